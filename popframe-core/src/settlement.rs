//! Settlements and their hierarchical level

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::{Geometry, TerritoryId};

/// A settlement as listed by the territory catalog, before population is
/// attached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementSite {
    pub territory_id: TerritoryId,
    pub name: Option<String>,
    pub geometry: Geometry,
}

/// Hierarchical level derived from population.
///
/// Ordered from smallest to largest so `level >= SettlementLevel::LargeCity`
/// reads naturally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementLevel {
    Village,
    Town,
    SmallCity,
    MediumCity,
    BigCity,
    LargeCity,
    Megacity,
}

impl SettlementLevel {
    /// Lower population bound (inclusive) of each level, largest first.
    const BANDS: [(u64, SettlementLevel); 6] = [
        (1_000_000, SettlementLevel::Megacity),
        (250_000, SettlementLevel::LargeCity),
        (100_000, SettlementLevel::BigCity),
        (50_000, SettlementLevel::MediumCity),
        (10_000, SettlementLevel::SmallCity),
        (1_000, SettlementLevel::Town),
    ];

    pub fn from_population(population: u64) -> Self {
        Self::BANDS
            .iter()
            .find(|(floor, _)| population >= *floor)
            .map(|(_, level)| *level)
            .unwrap_or(SettlementLevel::Village)
    }

    /// Whether a settlement of this level anchors an agglomeration.
    pub fn is_agglomeration_center(&self) -> bool {
        *self >= SettlementLevel::LargeCity
    }
}

/// A populated settlement ready for model construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settlement {
    pub territory_id: TerritoryId,
    pub name: Option<String>,
    pub geometry: Geometry,
    pub population: u64,
    pub level: SettlementLevel,
}

/// Join catalog sites with population, keeping catalog order.
///
/// Sites without a population entry, or with a non-positive one, are dropped.
pub fn align_settlements(
    sites: Vec<SettlementSite>,
    population: &HashMap<TerritoryId, i64>,
) -> Vec<Settlement> {
    sites
        .into_iter()
        .filter_map(|site| {
            let count = *population.get(&site.territory_id)?;
            if count <= 0 {
                return None;
            }
            let count = count as u64;
            Some(Settlement {
                territory_id: site.territory_id,
                name: site.name,
                geometry: site.geometry,
                population: count,
                level: SettlementLevel::from_population(count),
            })
        })
        .collect()
}
