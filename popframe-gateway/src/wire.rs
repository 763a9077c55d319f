//! Upstream payload shapes.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use popframe_core::TerritoryId;

/// Entry of `all_territories_without_geometry`.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct TerritoryRecord {
    pub territory_id: i64,
}

/// Feature of the `all_territories` collection. Geometry stays raw so a
/// parse failure can report it verbatim.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct TerritoryFeature {
    #[serde(default)]
    pub geometry: Value,
    pub properties: TerritoryProperties,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct TerritoryProperties {
    pub territory_id: i64,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct TerritoryCollection {
    #[serde(default)]
    pub features: Vec<TerritoryFeature>,
}

/// Accessibility matrix service response.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct MatrixPayload {
    pub values: Vec<Vec<f64>>,
    pub index: Vec<i64>,
    pub columns: Vec<i64>,
}

/// Indicator value written back to the indicator service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorValue {
    pub indicator_id: i64,
    pub territory_id: TerritoryId,
    pub date_type: String,
    pub date_value: NaiveDate,
    pub value: f64,
    pub value_type: String,
    pub information_source: String,
}

impl IndicatorValue {
    /// A yearly real-valued indicator computed by this service.
    pub fn yearly(indicator_id: i64, territory_id: TerritoryId, year: i32, value: f64) -> Option<Self> {
        Some(Self {
            indicator_id,
            territory_id,
            date_type: "year".to_string(),
            date_value: NaiveDate::from_ymd_opt(year, 1, 1)?,
            value,
            value_type: "real".to_string(),
            information_source: "popframe".to_string(),
        })
    }
}
