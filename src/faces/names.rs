//! Write operator-chosen person names back onto the original photos.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::materialize::ManifestRow;
use crate::db::PhotoStore;
use crate::error::SetupError;
use crate::exiftool::{TagDirective, TagWriter};

/// Read a `cluster_id,person_name` mapping. No header is required; blank,
/// short or unparseable rows and rows with an empty name are ignored.
pub fn read_mapping(path: &Path) -> Result<BTreeMap<i32, String>> {
    if !path.exists() {
        return Err(SetupError::MissingPath(path.to_path_buf()).into());
    }

    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("Failed to open mapping {}", path.display()))?;

    let mut mapping = BTreeMap::new();
    for record in rdr.records() {
        let Ok(record) = record else { continue };
        let (Some(key), Some(name)) = (record.get(0), record.get(1)) else {
            continue;
        };
        let Ok(cluster_id) = key.parse::<i32>() else {
            continue;
        };
        if !name.is_empty() {
            mapping.insert(cluster_id, name.to_string());
        }
    }

    if mapping.is_empty() {
        return Err(SetupError::EmptyMapping(path.to_path_buf()).into());
    }
    Ok(mapping)
}

/// One keyword write, planned or performed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagAction {
    pub cluster_id: i32,
    pub path: PathBuf,
    pub name: String,
}

impl TagAction {
    pub fn directives(&self) -> Vec<TagDirective> {
        vec![TagDirective::AppendKeyword(self.name.clone())]
    }
}

#[derive(Debug, Default)]
pub struct BindReport {
    /// Every action for a mapped row whose file exists, in manifest order
    pub planned: Vec<TagAction>,
    pub written: usize,
    pub failed: usize,
    /// Mapped rows whose source file is gone
    pub missing: usize,
    /// Rows whose cluster has no name
    pub unmapped: usize,
    /// Stored faces linked to a person
    pub faces_linked: usize,
}

/// Tag each manifest row's original file with its cluster's name.
///
/// Failures are logged per row and never stop the batch. A dry run fills
/// `planned` without calling the writer or touching the store.
pub fn bind_names(
    rows: &[ManifestRow],
    mapping: &BTreeMap<i32, String>,
    writer: &dyn TagWriter,
    dry_run: bool,
    store: Option<&dyn PhotoStore>,
) -> BindReport {
    let mut report = BindReport::default();

    for row in rows {
        let Some(name) = mapping.get(&row.cluster_id) else {
            report.unmapped += 1;
            continue;
        };

        let path = PathBuf::from(&row.filename);
        if !path.exists() {
            warn!(path = %path.display(), cluster = row.cluster_id, "File not found, skipping");
            report.missing += 1;
            continue;
        }

        let action = TagAction {
            cluster_id: row.cluster_id,
            path,
            name: name.clone(),
        };

        if dry_run {
            info!(path = %action.path.display(), name = %action.name, "DRY-RUN: would add keyword");
            report.planned.push(action);
            continue;
        }

        match writer.write_tags(&action.path, &action.directives()) {
            Ok(()) => report.written += 1,
            Err(e) => {
                warn!(path = %action.path.display(), error = %e, "Keyword write failed");
                report.failed += 1;
            }
        }

        if let (Some(store), Some(bbox)) = (store, row.bbox()) {
            match store.assign_person(&row.filename, &bbox, name) {
                Ok(linked) => report.faces_linked += linked,
                Err(e) => warn!(path = %row.filename, error = %e, "Could not record person"),
            }
        }

        report.planned.push(action);
    }

    info!(
        planned = report.planned.len(),
        written = report.written,
        failed = report.failed,
        missing = report.missing,
        "Name binding finished"
    );
    report
}
