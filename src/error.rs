use std::path::PathBuf;
use thiserror::Error;

/// Errors that end an ingestion run early.
///
/// Per-file problems (unreadable file, malformed sidecar, detection failure)
/// never surface here; they are logged and counted by the pipeline.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("export path not found: {0}")]
    SourceNotFound(PathBuf),

    #[error("not a directory or supported archive: {0}")]
    UnsupportedSource(PathBuf),

    #[error(transparent)]
    Setup(#[from] SetupError),

    #[error("failed to extract archive {path}: {source}")]
    Archive {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("duplicate content {hash} for {path} (already stored as photo {existing_id})")]
    DuplicateAbort {
        path: PathBuf,
        hash: String,
        existing_id: i64,
    },

    /// Dry-run counterpart of `DuplicateAbort` when the earlier copy was
    /// only planned, not stored.
    #[error("duplicate content {hash} for {path} (same content as {first} earlier in this run)")]
    DuplicateInRun {
        path: PathBuf,
        hash: String,
        first: PathBuf,
    },

    #[error("ingestion cancelled")]
    Cancelled,

    #[error(transparent)]
    Store(#[from] anyhow::Error),

    /// Lifecycle moves, intake listing and worker pool setup
    #[error(transparent)]
    Io(anyhow::Error),
}

/// Failure of the external tag-writing tool for one file.
#[derive(Debug, Error)]
pub enum TagWriteError {
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("tag writer exited with {status} for {path}: {stderr}")]
    Failed {
        path: PathBuf,
        status: i32,
        stderr: String,
    },
}

/// Problems detected before any file is touched.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("path does not exist: {0}")]
    MissingPath(PathBuf),

    #[error("no usable rows in mapping file {0}")]
    EmptyMapping(PathBuf),

    #[error("{0}")]
    Capability(String),
}
