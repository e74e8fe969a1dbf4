//! Hash backfill and duplicate cleanup over the photo store.

use anyhow::Result;
use clap::ValueEnum;
use std::path::PathBuf;
use tracing::{info, warn};

use super::{DuplicateGroup, PhotoStore};
use crate::scanner::hash_files;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum MaintenanceAction {
    #[default]
    Report,
    Delete,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MaintenanceOptions {
    pub action: MaintenanceAction,
    pub dry_run: bool,
    pub compute_hashes: bool,
}

#[derive(Debug, Default)]
pub struct MaintenanceReport {
    /// Photos that needed a hash
    pub missing_hashes: usize,
    /// Hashes computed and stored
    pub hashed: usize,
    /// Photos whose file could not be read
    pub hash_failures: usize,
    pub groups: Vec<DuplicateGroup>,
    pub deleted: usize,
}

impl MaintenanceReport {
    /// Number of records planned (or done) for deletion
    pub fn redundant(&self) -> usize {
        self.groups.iter().map(|g| g.extras().len()).sum()
    }
}

/// Fill in missing content hashes. Files are hashed in parallel; the store is
/// written from the calling thread. A dry run only counts.
pub fn compute_missing_hashes(
    store: &dyn PhotoStore,
    dry_run: bool,
    report: &mut MaintenanceReport,
) -> Result<()> {
    let pending = store.photos_without_hash()?;
    report.missing_hashes = pending.len();
    if pending.is_empty() || dry_run {
        return Ok(());
    }

    let paths: Vec<PathBuf> = pending
        .iter()
        .map(|p| PathBuf::from(&p.original_path))
        .collect();
    let hashes = hash_files(&paths);

    for (photo, hash) in pending.iter().zip(hashes) {
        match hash {
            Some(hash) => {
                store.set_hash(photo.id, &hash)?;
                report.hashed += 1;
            }
            None => {
                warn!(id = photo.id, path = %photo.original_path, "Could not hash photo");
                report.hash_failures += 1;
            }
        }
    }
    Ok(())
}

pub fn run_maintenance(store: &dyn PhotoStore, opts: MaintenanceOptions) -> Result<MaintenanceReport> {
    let mut report = MaintenanceReport::default();

    if opts.compute_hashes {
        compute_missing_hashes(store, opts.dry_run, &mut report)?;
        info!(
            missing = report.missing_hashes,
            hashed = report.hashed,
            failed = report.hash_failures,
            "Hash backfill finished"
        );
    }

    report.groups = store.duplicate_groups()?;

    if opts.action == MaintenanceAction::Delete && !opts.dry_run {
        let ids: Vec<i64> = report
            .groups
            .iter()
            .flat_map(|g| g.extras().iter().map(|p| p.id))
            .collect();
        if !ids.is_empty() {
            report.deleted = store.delete_photos(&ids)?;
        }
        info!(deleted = report.deleted, "Removed duplicate records");
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{NewPhoto, SqliteStore};
    use std::fs;
    use tempfile::tempdir;

    fn store() -> SqliteStore {
        let store = SqliteStore::open_in_memory().unwrap();
        store.initialize().unwrap();
        store
    }

    fn add(store: &SqliteStore, path: &str, hash: Option<&str>) -> i64 {
        store
            .create_photo(&NewPhoto {
                original_path: path.to_string(),
                file_hash: hash.map(str::to_string),
                ..Default::default()
            })
            .unwrap()
    }

    #[test]
    fn test_report_does_not_delete() {
        let store = store();
        add(&store, "/a", Some("h"));
        add(&store, "/b", Some("h"));

        let report = run_maintenance(
            &store,
            MaintenanceOptions {
                action: MaintenanceAction::Report,
                ..Default::default()
            },
        )
        .unwrap();

        assert_eq!(report.groups.len(), 1);
        assert_eq!(report.redundant(), 1);
        assert_eq!(report.deleted, 0);
        assert_eq!(store.count_photos().unwrap(), 2);
    }

    #[test]
    fn test_delete_keeps_oldest() {
        let store = store();
        let keep = add(&store, "/a", Some("h"));
        add(&store, "/b", Some("h"));
        add(&store, "/c", Some("h"));
        let unique = add(&store, "/d", Some("u"));

        let report = run_maintenance(
            &store,
            MaintenanceOptions {
                action: MaintenanceAction::Delete,
                ..Default::default()
            },
        )
        .unwrap();

        assert_eq!(report.deleted, 2);
        assert_eq!(store.count_photos().unwrap(), 2);
        assert!(store.get_photo(keep).unwrap().is_some());
        assert!(store.get_photo(unique).unwrap().is_some());
    }

    #[test]
    fn test_delete_dry_run_is_report() {
        let store = store();
        add(&store, "/a", Some("h"));
        add(&store, "/b", Some("h"));

        let report = run_maintenance(
            &store,
            MaintenanceOptions {
                action: MaintenanceAction::Delete,
                dry_run: true,
                compute_hashes: false,
            },
        )
        .unwrap();

        assert_eq!(report.redundant(), 1);
        assert_eq!(report.deleted, 0);
        assert_eq!(store.count_photos().unwrap(), 2);
    }

    #[test]
    fn test_compute_hashes_then_group() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.jpg");
        let b = dir.path().join("b.jpg");
        fs::write(&a, b"same bytes").unwrap();
        fs::write(&b, b"same bytes").unwrap();
        let missing = dir.path().join("gone.jpg");

        let store = store();
        add(&store, &a.to_string_lossy(), None);
        add(&store, &b.to_string_lossy(), None);
        add(&store, &missing.to_string_lossy(), None);

        let report = run_maintenance(
            &store,
            MaintenanceOptions {
                action: MaintenanceAction::Report,
                dry_run: false,
                compute_hashes: true,
            },
        )
        .unwrap();

        assert_eq!(report.missing_hashes, 3);
        assert_eq!(report.hashed, 2);
        assert_eq!(report.hash_failures, 1);
        assert_eq!(report.groups.len(), 1);
        assert_eq!(report.groups[0].photos.len(), 2);
    }

    #[test]
    fn test_compute_hashes_dry_run_only_counts() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.jpg");
        fs::write(&a, b"x").unwrap();

        let store = store();
        add(&store, &a.to_string_lossy(), None);

        let report = run_maintenance(
            &store,
            MaintenanceOptions {
                action: MaintenanceAction::Report,
                dry_run: true,
                compute_hashes: true,
            },
        )
        .unwrap();

        assert_eq!(report.missing_hashes, 1);
        assert_eq!(report.hashed, 0);
        assert_eq!(store.photos_without_hash().unwrap().len(), 1);
    }
}
