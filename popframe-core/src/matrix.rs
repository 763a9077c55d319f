//! Accessibility (travel-time) matrix between settlements

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use crate::error::ValidationError;
use crate::TerritoryId;

/// Transport mode the matrix service computes travel times for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GraphType {
    #[default]
    Car,
    Walk,
    Intermodal,
}

impl GraphType {
    pub fn as_str(&self) -> &'static str {
        match self {
            GraphType::Car => "car",
            GraphType::Walk => "walk",
            GraphType::Intermodal => "intermodal",
        }
    }
}

impl fmt::Display for GraphType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GraphType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "car" => Ok(GraphType::Car),
            "walk" => Ok(GraphType::Walk),
            "intermodal" => Ok(GraphType::Intermodal),
            other => Err(format!("unknown graph type '{}'", other)),
        }
    }
}

/// Square travel-time table keyed by territory id on both axes.
///
/// Row `i` holds the travel times from `index[i]` to every id in `columns`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessibilityMatrix {
    index: Vec<TerritoryId>,
    columns: Vec<TerritoryId>,
    values: Vec<Vec<f64>>,
}

impl AccessibilityMatrix {
    /// Shape the raw table, rejecting ragged rows, axis/row count mismatches,
    /// non-square tables and duplicate keys.
    pub fn new(
        index: Vec<TerritoryId>,
        columns: Vec<TerritoryId>,
        values: Vec<Vec<f64>>,
    ) -> Result<Self, ValidationError> {
        if values.len() != index.len() {
            return Err(ValidationError::MatrixShape {
                reason: format!("{} rows for {} index entries", values.len(), index.len()),
            });
        }
        if let Some((row, width)) = values
            .iter()
            .enumerate()
            .map(|(i, r)| (i, r.len()))
            .find(|(_, width)| *width != columns.len())
        {
            return Err(ValidationError::MatrixShape {
                reason: format!(
                    "row {} has {} values for {} columns",
                    row,
                    width,
                    columns.len()
                ),
            });
        }
        if index.len() != columns.len() {
            return Err(ValidationError::MatrixShape {
                reason: format!("{}x{} table is not square", index.len(), columns.len()),
            });
        }
        if has_duplicates(&index) || has_duplicates(&columns) {
            return Err(ValidationError::MatrixShape {
                reason: "duplicate territory ids on an axis".to_string(),
            });
        }
        Ok(Self {
            index,
            columns,
            values,
        })
    }

    pub fn index(&self) -> &[TerritoryId] {
        &self.index
    }

    pub fn columns(&self) -> &[TerritoryId] {
        &self.columns
    }

    pub fn values(&self) -> &[Vec<f64>] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Travel time from `from` to `to`, if both are on the table.
    pub fn get(&self, from: TerritoryId, to: TerritoryId) -> Option<f64> {
        let row = self.index.iter().position(|id| *id == from)?;
        let col = self.columns.iter().position(|id| *id == to)?;
        Some(self.values[row][col])
    }

    /// Intersect rows and columns down to `ids`, in the order given.
    ///
    /// Every id must be present on both axes.
    pub fn restrict_to(&self, ids: &[TerritoryId]) -> Result<Self, ValidationError> {
        let rows: HashMap<TerritoryId, usize> =
            self.index.iter().enumerate().map(|(i, id)| (*id, i)).collect();
        let cols: HashMap<TerritoryId, usize> =
            self.columns.iter().enumerate().map(|(i, id)| (*id, i)).collect();

        let missing: Vec<TerritoryId> = ids
            .iter()
            .filter(|id| !rows.contains_key(id) || !cols.contains_key(id))
            .copied()
            .collect();
        if !missing.is_empty() {
            return Err(ValidationError::MissingMatrixIds { ids: missing });
        }

        let values = ids
            .iter()
            .map(|from| {
                let row = &self.values[rows[from]];
                ids.iter().map(|to| row[cols[to]]).collect()
            })
            .collect();

        Ok(Self {
            index: ids.to_vec(),
            columns: ids.to_vec(),
            values,
        })
    }
}

fn has_duplicates(ids: &[TerritoryId]) -> bool {
    let mut seen = HashSet::with_capacity(ids.len());
    ids.iter().any(|id| !seen.insert(*id))
}
