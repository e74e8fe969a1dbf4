//! Write sidecar metadata back into the media files of an unpacked export.

use anyhow::Result;
use std::path::Path;

use super::discovery::discover_media;
use super::sidecar::Sidecar;
use crate::error::SetupError;
use crate::exiftool::{TagDirective, TagWriter};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub updated: usize,
    pub failed: usize,
    pub without_sidecar: usize,
    pub malformed: usize,
    pub nothing_to_write: usize,
}

/// Translate a sidecar into tag edits.
pub fn sidecar_directives(sidecar: &Sidecar) -> Vec<TagDirective> {
    let mut directives = Vec::new();

    if let Some(taken) = sidecar.taken_at() {
        let stamp = taken.format("%Y:%m:%d %H:%M:%S").to_string();
        for tag in ["DateTimeOriginal", "CreateDate", "ModifyDate"] {
            directives.push(TagDirective::field(tag, stamp.clone()));
        }
    }

    if let Some(description) = sidecar.description().or_else(|| sidecar.title()) {
        for tag in ["Caption-Abstract", "ImageDescription", "Description"] {
            directives.push(TagDirective::field(tag, description.clone()));
        }
    }

    for keyword in sidecar.keywords() {
        directives.push(TagDirective::Keyword(keyword));
    }

    if let (Some(lat), Some(lon)) = (sidecar.latitude(), sidecar.longitude()) {
        directives.push(TagDirective::field("GPSLatitude", lat.abs().to_string()));
        directives.push(TagDirective::field(
            "GPSLatitudeRef",
            if lat < 0.0 { "S" } else { "N" },
        ));
        directives.push(TagDirective::field("GPSLongitude", lon.abs().to_string()));
        directives.push(TagDirective::field(
            "GPSLongitudeRef",
            if lon < 0.0 { "W" } else { "E" },
        ));
    }

    directives
}

/// Walk `root` and inject each file's sidecar metadata through `writer`.
pub fn merge_export(
    root: &Path,
    extensions: &[String],
    writer: &dyn TagWriter,
    dry_run: bool,
) -> Result<MergeReport> {
    if !root.is_dir() {
        return Err(SetupError::MissingPath(root.to_path_buf()).into());
    }

    let mut report = MergeReport::default();

    for media in discover_media(root, extensions) {
        let Some(sidecar_path) = Sidecar::locate(&media) else {
            report.without_sidecar += 1;
            continue;
        };

        let sidecar = match Sidecar::load(&sidecar_path) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(sidecar = %sidecar_path.display(), error = %e, "Failed to parse sidecar");
                report.malformed += 1;
                continue;
            }
        };

        let directives = sidecar_directives(&sidecar);
        if directives.is_empty() {
            report.nothing_to_write += 1;
            continue;
        }

        if dry_run {
            let args: Vec<String> = directives.iter().map(TagDirective::to_arg).collect();
            tracing::info!(path = %media.display(), args = ?args, "DRY-RUN: would write metadata");
            report.updated += 1;
            continue;
        }

        match writer.write_tags(&media, &directives) {
            Ok(()) => report.updated += 1,
            Err(e) => {
                tracing::error!(path = %media.display(), error = %e, "Metadata write failed");
                report.failed += 1;
            }
        }
    }

    Ok(report)
}
