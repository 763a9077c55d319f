//! Composite cache keys encoded in file names.
//!
//! Primary artifacts: `{region}.json`.
//! Derived layers: `{timestamp}_{name}_{region}_{kind}.json`, where the
//! timestamp is milliseconds since the Unix epoch.
//!
//! Keys are parsed by splitting on `.` and `_`, so no component may contain
//! either separator.

use chrono::{DateTime, Utc};
use popframe_core::{LayerKind, RegionId, Timestamp};

/// File extension for every cache entry.
pub const EXTENSION: &str = "json";

const FIELD_SEPARATOR: char = '_';
const EXTENSION_SEPARATOR: char = '.';

/// Key of a primary model artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArtifactKey {
    pub region_id: RegionId,
}

impl ArtifactKey {
    pub fn new(region_id: RegionId) -> Self {
        Self { region_id }
    }

    pub fn file_name(&self) -> String {
        format!("{}{}{}", self.region_id, EXTENSION_SEPARATOR, EXTENSION)
    }

    /// Parse a file name; anything that is not the canonical `{int}.json`
    /// yields `None`, so `05.json` or `+5.json` never shadow region 5.
    pub fn parse(file_name: &str) -> Option<Self> {
        let (stem, ext) = split_extension(file_name)?;
        if ext != EXTENSION {
            return None;
        }
        let key = Self::new(RegionId::new(stem.parse::<i64>().ok()?));
        (key.file_name() == file_name).then_some(key)
    }
}

/// Key of a derived layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LayerKey {
    pub created_at: Timestamp,
    pub name: String,
    pub region_id: RegionId,
    pub kind: LayerKind,
}

impl LayerKey {
    /// Build a key. `name` must be free of `_` and `.`.
    pub fn new(created_at: Timestamp, name: impl Into<String>, region_id: RegionId, kind: LayerKind) -> Option<Self> {
        let name = name.into();
        if !is_clean_component(&name) {
            return None;
        }
        // the file name keeps millisecond precision only
        let created_at = DateTime::<Utc>::from_timestamp_millis(created_at.timestamp_millis())?;
        Some(Self {
            created_at,
            name,
            region_id,
            kind,
        })
    }

    pub fn file_name(&self) -> String {
        format!(
            "{ts}{sep}{name}{sep}{region}{sep}{kind}{dot}{ext}",
            ts = self.created_at.timestamp_millis(),
            name = self.name,
            region = self.region_id,
            kind = self.kind,
            sep = FIELD_SEPARATOR,
            dot = EXTENSION_SEPARATOR,
            ext = EXTENSION,
        )
    }

    pub fn parse(file_name: &str) -> Option<Self> {
        let (stem, ext) = split_extension(file_name)?;
        if ext != EXTENSION {
            return None;
        }
        let parts: Vec<&str> = stem.split(FIELD_SEPARATOR).collect();
        let [ts, name, region, kind] = parts.as_slice() else {
            return None;
        };
        let created_at = DateTime::<Utc>::from_timestamp_millis(ts.parse::<i64>().ok()?)?;
        if name.is_empty() {
            return None;
        }
        Some(Self {
            created_at,
            name: (*name).to_string(),
            region_id: RegionId::new(region.parse::<i64>().ok()?),
            kind: kind.parse::<LayerKind>().ok()?,
        })
    }
}

fn split_extension(file_name: &str) -> Option<(&str, &str)> {
    let mut parts = file_name.split(EXTENSION_SEPARATOR);
    let stem = parts.next()?;
    let ext = parts.next()?;
    if parts.next().is_some() || stem.is_empty() {
        return None;
    }
    Some((stem, ext))
}

fn is_clean_component(value: &str) -> bool {
    !value.is_empty()
        && !value.contains(FIELD_SEPARATOR)
        && !value.contains(EXTENSION_SEPARATOR)
        && !value.contains('/')
}
