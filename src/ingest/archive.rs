//! Unpacking packaged exports into a scratch directory.

use flate2::read::GzDecoder;
use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;
use tar::Archive;
use tempfile::TempDir;

use crate::error::IngestError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Zip,
    Tar,
    TarGz,
}

impl ArchiveKind {
    /// Recognise an archive by its file name.
    pub fn detect(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_string_lossy().to_lowercase();
        if name.ends_with(".zip") {
            Some(ArchiveKind::Zip)
        } else if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Some(ArchiveKind::TarGz)
        } else if name.ends_with(".tar") {
            Some(ArchiveKind::Tar)
        } else {
            None
        }
    }
}

pub fn is_archive(path: &Path) -> bool {
    path.is_file() && ArchiveKind::detect(path).is_some()
}

fn unpack(path: &Path, kind: ArchiveKind, dest: &Path) -> io::Result<()> {
    let file = File::open(path)?;
    match kind {
        ArchiveKind::Zip => {
            let mut archive = zip::ZipArchive::new(BufReader::new(file))
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            archive
                .extract(dest)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
        }
        ArchiveKind::Tar => Archive::new(BufReader::new(file)).unpack(dest),
        ArchiveKind::TarGz => Archive::new(GzDecoder::new(BufReader::new(file))).unpack(dest),
    }
}

/// Extract an archive into a fresh temporary directory.
///
/// The directory is removed when the returned guard drops, on success,
/// error and cancellation alike.
pub fn extract_to_scratch(path: &Path) -> Result<TempDir, IngestError> {
    let kind = ArchiveKind::detect(path)
        .ok_or_else(|| IngestError::UnsupportedSource(path.to_path_buf()))?;

    let scratch = tempfile::Builder::new()
        .prefix("facesort-")
        .tempdir()
        .map_err(|source| IngestError::Archive {
            path: path.to_path_buf(),
            source,
        })?;

    tracing::info!(archive = %path.display(), scratch = %scratch.path().display(), "Extracting archive");
    unpack(path, kind, scratch.path()).map_err(|source| IngestError::Archive {
        path: path.to_path_buf(),
        source,
    })?;

    Ok(scratch)
}
