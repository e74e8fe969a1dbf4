//! Tag writing through the external ExifTool executable.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::{SetupError, TagWriteError};

/// One edit applied to a file's embedded metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagDirective {
    /// Add to the keyword list, keeping existing entries.
    AppendKeyword(String),
    /// Set the keyword list; several in one call build the list.
    Keyword(String),
    /// Assign a single tag.
    Field { tag: String, value: String },
}

impl TagDirective {
    pub fn field(tag: &str, value: impl Into<String>) -> Self {
        TagDirective::Field {
            tag: tag.to_string(),
            value: value.into(),
        }
    }

    pub fn to_arg(&self) -> String {
        match self {
            TagDirective::AppendKeyword(k) => format!("-Keywords+={}", k),
            TagDirective::Keyword(k) => format!("-Keywords={}", k),
            TagDirective::Field { tag, value } => format!("-{}={}", tag, value),
        }
    }
}

/// In-place metadata editor for a single file.
pub trait TagWriter: Send + Sync {
    fn write_tags(&self, path: &Path, directives: &[TagDirective]) -> Result<(), TagWriteError>;
}

#[derive(Debug, Clone)]
pub struct ExifTool {
    program: PathBuf,
}

impl ExifTool {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Confirm the executable runs before a batch starts.
    pub fn ensure_available(&self) -> Result<String, SetupError> {
        let output = Command::new(&self.program).arg("-ver").output().map_err(|e| {
            SetupError::Capability(format!(
                "exiftool not runnable at {}: {}",
                self.program.display(),
                e
            ))
        })?;

        if !output.status.success() {
            return Err(SetupError::Capability(format!(
                "exiftool at {} exited with {}",
                self.program.display(),
                output.status
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Full argument list, as run and as shown in dry-run output.
    pub fn command_args(path: &Path, directives: &[TagDirective]) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["-overwrite_original".into()];
        args.extend(directives.iter().map(|d| OsString::from(d.to_arg())));
        args.push(path.as_os_str().to_os_string());
        args
    }

    /// Printable command line.
    pub fn render_command(&self, path: &Path, directives: &[TagDirective]) -> String {
        let mut parts = vec![self.program.to_string_lossy().to_string()];
        parts.extend(
            Self::command_args(path, directives)
                .iter()
                .map(|a| a.to_string_lossy().to_string()),
        );
        parts.join(" ")
    }
}

impl TagWriter for ExifTool {
    fn write_tags(&self, path: &Path, directives: &[TagDirective]) -> Result<(), TagWriteError> {
        let output = Command::new(&self.program)
            .args(Self::command_args(path, directives))
            .output()
            .map_err(|source| TagWriteError::Spawn {
                program: self.program.to_string_lossy().to_string(),
                source,
            })?;

        if !output.status.success() {
            return Err(TagWriteError::Failed {
                path: path.to_path_buf(),
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(())
    }
}
