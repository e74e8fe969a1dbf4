//! Intake, processed and pending-review directories.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::IngestConfig;

#[derive(Debug, Clone)]
pub struct LifecycleDirs {
    /// Where new exports are dropped
    pub intake: PathBuf,
    /// Where fully ingested archives end up
    pub processed: PathBuf,
    /// Where faceless files are copied for manual review
    pub pending: PathBuf,
}

impl From<&IngestConfig> for LifecycleDirs {
    fn from(config: &IngestConfig) -> Self {
        Self {
            intake: config.intake_dir.clone(),
            processed: config.processed_dir.clone(),
            pending: config.pending_dir.clone(),
        }
    }
}

/// First free path in `dir` for `file_name`: `name.ext`, then `name_1.ext`,
/// `name_2.ext`, ...
pub fn unique_destination(dir: &Path, file_name: &Path) -> PathBuf {
    let candidate = dir.join(file_name);
    if !candidate.exists() {
        return candidate;
    }

    let stem = file_name
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "unknown".to_string());
    let extension = file_name
        .extension()
        .map(|s| format!(".{}", s.to_string_lossy()))
        .unwrap_or_default();

    (1u64..)
        .map(|n| dir.join(format!("{}_{}{}", stem, n, extension)))
        .find(|p| !p.exists())
        .unwrap_or(candidate)
}

fn file_name_of(path: &Path) -> Result<&Path> {
    path.file_name()
        .map(Path::new)
        .with_context(|| format!("No file name in {}", path.display()))
}

impl LifecycleDirs {
    /// Where `path` would land in pending-review right now.
    pub fn pending_destination(&self, path: &Path) -> Result<PathBuf> {
        Ok(unique_destination(&self.pending, file_name_of(path)?))
    }

    /// Where `path` would land in processed right now.
    pub fn processed_destination(&self, path: &Path) -> Result<PathBuf> {
        Ok(unique_destination(&self.processed, file_name_of(path)?))
    }

    /// Copy (never move) a file into pending-review without overwriting.
    pub fn copy_to_pending(&self, path: &Path) -> Result<PathBuf> {
        fs::create_dir_all(&self.pending)
            .context("Failed to create pending-review directory")?;
        let dest = self.pending_destination(path)?;
        fs::copy(path, &dest)
            .with_context(|| format!("Failed to copy {} to pending-review", path.display()))?;
        Ok(dest)
    }

    /// Move a finished export into processed, returning its new path.
    pub fn move_to_processed(&self, path: &Path) -> Result<PathBuf> {
        fs::create_dir_all(&self.processed)
            .context("Failed to create processed directory")?;
        let dest = self.processed_destination(path)?;

        // Try rename first (fastest, same filesystem)
        match fs::rename(path, &dest) {
            Ok(_) => Ok(dest),
            Err(_) => {
                // Fall back to copy + delete for cross-filesystem moves
                fs::copy(path, &dest)
                    .with_context(|| format!("Failed to copy {} to processed", path.display()))?;
                fs::remove_file(path)
                    .context("Failed to remove original after copying to processed")?;
                Ok(dest)
            }
        }
    }
}
