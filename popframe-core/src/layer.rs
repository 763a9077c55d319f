//! Derived geo-layers computed from a model artifact

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::{FeatureCollection, RegionId, Timestamp};

/// Kind of derived layer. The string form is used in cache file names and
/// must never contain `_` or `.`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LayerKind {
    #[serde(rename = "settlements")]
    Settlements,
    #[serde(rename = "agglomerations")]
    AgglomerationBoundary,
}

impl LayerKind {
    pub const ALL: [LayerKind; 2] = [LayerKind::Settlements, LayerKind::AgglomerationBoundary];

    pub fn as_str(&self) -> &'static str {
        match self {
            LayerKind::Settlements => "settlements",
            LayerKind::AgglomerationBoundary => "agglomerations",
        }
    }
}

impl fmt::Display for LayerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LayerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LayerKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown layer kind '{}'", s))
    }
}

/// Builder output for derivation: one geometry collection per kind.
pub type DerivedLayers = BTreeMap<LayerKind, FeatureCollection>;

/// A derived layer as persisted in the cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedLayer {
    pub region_id: RegionId,
    pub kind: LayerKind,
    pub created_at: Timestamp,
    pub features: FeatureCollection,
}
