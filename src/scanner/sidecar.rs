//! JSON sidecar metadata shipped next to exported media.
//!
//! Exports pair `IMG_1.jpg` with `IMG_1.json` (or `IMG_1.jpg.json`). The
//! schema is loose: keys may be missing, `null`, or carry a different JSON
//! type than expected, so each accessor goes through [`Field`] and decides
//! on the JSON type rather than just on presence.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

/// Integer coordinates above this magnitude are fixed-point E7 values.
const E7_THRESHOLD: i64 = 1000;
const E7_SCALE: f64 = 1e7;

/// State of a single key in a JSON object.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Field<'a> {
    Absent,
    Null,
    Value(&'a Value),
}

impl<'a> Field<'a> {
    fn of(object: Option<&'a Map<String, Value>>, key: &str) -> Self {
        match object.and_then(|o| o.get(key)) {
            None => Field::Absent,
            Some(Value::Null) => Field::Null,
            Some(v) => Field::Value(v),
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Field::Absent)
    }

    pub fn value(&self) -> Option<&'a Value> {
        match self {
            Field::Value(v) => Some(v),
            _ => None,
        }
    }

    /// Non-empty string content.
    fn text(&self) -> Option<String> {
        match self.value()? {
            Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
            _ => None,
        }
    }

    /// Numeric coordinate; zero counts as unset.
    fn coordinate(&self) -> Option<f64> {
        let number = match self.value()? {
            Value::Number(n) => n,
            _ => return None,
        };

        let degrees = match number.as_i64() {
            Some(0) => return None,
            Some(i) if i.abs() > E7_THRESHOLD => i as f64 / E7_SCALE,
            Some(i) => i as f64,
            None => number.as_f64()?,
        };

        if degrees == 0.0 {
            None
        } else {
            Some(degrees)
        }
    }
}

/// Parsed sidecar document.
#[derive(Debug, Clone)]
pub struct Sidecar {
    raw: Value,
}

impl Sidecar {
    pub fn parse(text: &str) -> serde_json::Result<Self> {
        Ok(Self {
            raw: serde_json::from_str(text)?,
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read sidecar {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("Malformed sidecar JSON {}", path.display()))
    }

    /// Sidecar path for a media file, if one exists on disk.
    pub fn locate(media: &Path) -> Option<PathBuf> {
        let stem_json = media.with_extension("json");
        if stem_json.is_file() {
            return Some(stem_json);
        }

        let file_name = media.file_name()?;
        let mut full_name = file_name.to_os_string();
        full_name.push(".json");
        let full_json = media.with_file_name(full_name);
        full_json.is_file().then_some(full_json)
    }

    pub fn raw(&self) -> &Value {
        &self.raw
    }

    pub fn into_raw(self) -> Value {
        self.raw
    }

    fn root(&self) -> Option<&Map<String, Value>> {
        self.raw.as_object()
    }

    /// Top-level key.
    pub fn field(&self, key: &str) -> Field<'_> {
        Field::of(self.root(), key)
    }

    /// First of `keys` holding a non-empty string.
    fn first_text(&self, keys: &[&str]) -> Option<String> {
        keys.iter().find_map(|k| self.field(k).text())
    }

    /// `photoTakenTime.timestamp`, epoch seconds as string or integer.
    pub fn taken_at(&self) -> Option<DateTime<Utc>> {
        let taken = self.field("photoTakenTime").value()?.as_object();
        let seconds = match Field::of(taken, "timestamp").value()? {
            Value::String(s) => s.trim().parse::<i64>().ok()?,
            Value::Number(n) => n.as_i64()?,
            _ => return None,
        };
        DateTime::from_timestamp(seconds, 0)
    }

    pub fn title(&self) -> Option<String> {
        self.first_text(&["title", "description", "caption"])
    }

    pub fn description(&self) -> Option<String> {
        self.first_text(&["description", "caption"])
    }

    fn geo(&self) -> Option<&Map<String, Value>> {
        ["geoData", "location"].iter().find_map(|k| {
            self.field(k)
                .value()
                .and_then(Value::as_object)
                .filter(|o| !o.is_empty())
        })
    }

    fn coordinate(&self, key: &str, e7_key: &str) -> Option<f64> {
        let geo = self.geo();
        Field::of(geo, key)
            .coordinate()
            .or_else(|| Field::of(geo, e7_key).coordinate())
    }

    pub fn latitude(&self) -> Option<f64> {
        self.coordinate("latitude", "latitudeE7")
    }

    pub fn longitude(&self) -> Option<f64> {
        self.coordinate("longitude", "longitudeE7")
    }

    /// `labels` | `keywords` | `photoTags`, strings or `{"name": ..}` objects.
    pub fn keywords(&self) -> Vec<String> {
        let list = ["labels", "keywords", "photoTags"].iter().find_map(|k| {
            self.field(k)
                .value()
                .and_then(Value::as_array)
                .filter(|a| !a.is_empty())
        });

        list.map(|items| {
            items
                .iter()
                .filter_map(|item| match item {
                    Value::String(s) => Some(s.clone()),
                    Value::Object(o) => o.get("name").and_then(Value::as_str).map(str::to_string),
                    _ => None,
                })
                .filter(|s| !s.trim().is_empty())
                .collect()
        })
        .unwrap_or_default()
    }
}

/// Flattened sidecar values as stored on a photo record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SidecarMetadata {
    pub taken_at: Option<DateTime<Utc>>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub keywords: Vec<String>,
    pub raw: Option<Value>,
}

impl From<Sidecar> for SidecarMetadata {
    fn from(sidecar: Sidecar) -> Self {
        Self {
            taken_at: sidecar.taken_at(),
            title: sidecar.title(),
            description: sidecar.description(),
            latitude: sidecar.latitude(),
            longitude: sidecar.longitude(),
            keywords: sidecar.keywords(),
            raw: Some(sidecar.into_raw()),
        }
    }
}

/// Metadata for a media file from its sidecar.
///
/// A missing sidecar yields empty metadata; a malformed one is logged and
/// also yields empty metadata.
pub fn read_metadata_for(media: &Path) -> SidecarMetadata {
    let Some(sidecar_path) = Sidecar::locate(media) else {
        return SidecarMetadata::default();
    };

    match Sidecar::load(&sidecar_path) {
        Ok(sidecar) => sidecar.into(),
        Err(e) => {
            tracing::warn!(sidecar = %sidecar_path.display(), error = %e, "Ignoring sidecar");
            SidecarMetadata::default()
        }
    }
}
