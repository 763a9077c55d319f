//! Reference model builder.
//!
//! [`SnapshotBuilder`] packages a region's aligned inputs as the artifact
//! and derives the two published layers from it:
//!
//! - `settlements`: one point per settlement with its population, level and
//!   the centre of the agglomeration it belongs to (if any);
//! - `agglomerations`: one multipoint per agglomeration. Centres are the
//!   settlements at `LargeCity` level or above, taken by descending
//!   population; each claims every still-unassigned settlement reachable
//!   within the travel-time threshold.

use std::collections::HashMap;

use popframe_core::{
    AccessibilityMatrix, DerivedLayers, Feature, FeatureCollection, Geometry, LayerKind,
    ModelBuilder, RegionId, RegionInputs, Settlement, TerritoryId, ValidationError,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Persisted artifact of the reference builder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionSnapshot {
    pub region_id: RegionId,
    pub boundary: Geometry,
    pub settlements: Vec<Settlement>,
    pub matrix: AccessibilityMatrix,
}

impl RegionSnapshot {
    pub fn total_population(&self) -> u64 {
        self.settlements.iter().map(|s| s.population).sum()
    }
}

#[derive(Debug, Clone)]
pub struct SnapshotBuilder {
    agglomeration_time_min: f64,
}

impl SnapshotBuilder {
    pub fn new(agglomeration_time_min: u32) -> Self {
        Self {
            agglomeration_time_min: f64::from(agglomeration_time_min),
        }
    }

    /// Greedy assignment of settlements to agglomeration centres.
    fn assign_agglomerations(&self, snapshot: &RegionSnapshot) -> Vec<(TerritoryId, Vec<TerritoryId>)> {
        let mut centres: Vec<&Settlement> = snapshot
            .settlements
            .iter()
            .filter(|s| s.level.is_agglomeration_center())
            .collect();
        centres.sort_by(|a, b| b.population.cmp(&a.population).then(a.territory_id.cmp(&b.territory_id)));

        let mut assigned: HashMap<TerritoryId, TerritoryId> = HashMap::new();
        let mut agglomerations = Vec::new();
        for centre in centres {
            if assigned.contains_key(&centre.territory_id) {
                continue;
            }
            let members: Vec<TerritoryId> = snapshot
                .settlements
                .iter()
                .filter(|s| !assigned.contains_key(&s.territory_id))
                .filter(|s| {
                    s.territory_id == centre.territory_id
                        || snapshot
                            .matrix
                            .get(centre.territory_id, s.territory_id)
                            .is_some_and(|minutes| minutes <= self.agglomeration_time_min)
                })
                .map(|s| s.territory_id)
                .collect();
            for member in &members {
                assigned.insert(*member, centre.territory_id);
            }
            agglomerations.push((centre.territory_id, members));
        }
        agglomerations
    }
}

impl Default for SnapshotBuilder {
    fn default() -> Self {
        Self::new(80)
    }
}

impl ModelBuilder for SnapshotBuilder {
    type Artifact = RegionSnapshot;

    fn build(&self, inputs: RegionInputs) -> Result<RegionSnapshot, ValidationError> {
        inputs.boundary.validate()?;
        if inputs.settlements.is_empty() {
            return Err(ValidationError::EmptySettlements {
                region_id: inputs.region_id,
            });
        }
        let ids: Vec<TerritoryId> = inputs.settlements.iter().map(|s| s.territory_id).collect();
        if inputs.matrix.index() != ids.as_slice() {
            return Err(ValidationError::BuildFailed {
                reason: "matrix axes do not follow the settlement order".to_string(),
            });
        }
        Ok(RegionSnapshot {
            region_id: inputs.region_id,
            boundary: inputs.boundary,
            settlements: inputs.settlements,
            matrix: inputs.matrix,
        })
    }

    fn derive(&self, snapshot: &RegionSnapshot) -> Result<DerivedLayers, ValidationError> {
        let agglomerations = self.assign_agglomerations(snapshot);
        let by_id: HashMap<TerritoryId, &Settlement> =
            snapshot.settlements.iter().map(|s| (s.territory_id, s)).collect();
        let centre_of: HashMap<TerritoryId, TerritoryId> = agglomerations
            .iter()
            .flat_map(|(centre, members)| members.iter().map(move |m| (*m, *centre)))
            .collect();

        let mut settlement_features = Vec::with_capacity(snapshot.settlements.len());
        for settlement in &snapshot.settlements {
            let anchor = point_of(settlement)?;
            let mut properties = Map::new();
            properties.insert("territory_id".into(), json!(settlement.territory_id));
            properties.insert("name".into(), json!(settlement.name));
            properties.insert("population".into(), json!(settlement.population));
            properties.insert("level".into(), json!(settlement.level));
            properties.insert(
                "agglomeration".into(),
                centre_of.get(&settlement.territory_id).map_or(Value::Null, |c| json!(c)),
            );
            settlement_features.push(Feature::new(anchor, properties));
        }

        let mut agglomeration_features = Vec::with_capacity(agglomerations.len());
        for (centre, members) in &agglomerations {
            let mut points = Vec::with_capacity(members.len());
            let mut population = 0u64;
            for member in members {
                let settlement = by_id.get(member).ok_or_else(|| ValidationError::DeriveFailed {
                    reason: format!("agglomeration member {} is not a settlement", member),
                })?;
                if let Geometry::Point(position) = point_of(settlement)? {
                    points.push(position);
                }
                population += settlement.population;
            }
            let mut properties = Map::new();
            properties.insert("center".into(), json!(centre));
            properties.insert("name".into(), json!(by_id.get(centre).and_then(|s| s.name.clone())));
            properties.insert("members".into(), json!(members));
            properties.insert("population".into(), json!(population));
            agglomeration_features.push(Feature::new(Geometry::MultiPoint(points), properties));
        }

        let mut layers = DerivedLayers::new();
        layers.insert(LayerKind::Settlements, FeatureCollection::new(settlement_features));
        layers.insert(
            LayerKind::AgglomerationBoundary,
            FeatureCollection::new(agglomeration_features),
        );
        Ok(layers)
    }
}

fn point_of(settlement: &Settlement) -> Result<Geometry, ValidationError> {
    let [x, y] = settlement
        .geometry
        .anchor()
        .ok_or_else(|| ValidationError::DeriveFailed {
            reason: format!("settlement {} has no usable geometry", settlement.territory_id),
        })?;
    Ok(Geometry::Point(vec![x, y]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use popframe_core::SettlementLevel;

    fn settlement(id: i64, population: u64) -> Settlement {
        Settlement {
            territory_id: TerritoryId::new(id),
            name: Some(format!("town-{}", id)),
            geometry: Geometry::Point(vec![30.0 + id as f64, 60.0]),
            population,
            level: SettlementLevel::from_population(population),
        }
    }

    fn boundary() -> Geometry {
        Geometry::Polygon(vec![vec![
            vec![29.0, 59.0],
            vec![40.0, 59.0],
            vec![40.0, 61.0],
            vec![29.0, 59.0],
        ]])
    }

    /// Two large centres 100 minutes apart; towns 3 and 4 sit near the
    /// first, town 5 near the second.
    fn inputs() -> RegionInputs {
        let settlements = vec![
            settlement(1, 600_000),
            settlement(2, 300_000),
            settlement(3, 20_000),
            settlement(4, 5_000),
            settlement(5, 2_000),
        ];
        let ids: Vec<TerritoryId> = settlements.iter().map(|s| s.territory_id).collect();
        let values = vec![
            vec![0.0, 100.0, 30.0, 70.0, 120.0],
            vec![100.0, 0.0, 90.0, 60.0, 40.0],
            vec![30.0, 90.0, 0.0, 50.0, 110.0],
            vec![70.0, 60.0, 50.0, 0.0, 95.0],
            vec![120.0, 40.0, 110.0, 95.0, 0.0],
        ];
        RegionInputs {
            region_id: RegionId::new(42),
            boundary: boundary(),
            settlements,
            matrix: AccessibilityMatrix::new(ids.clone(), ids, values).expect("square"),
        }
    }

    #[test]
    fn test_build_keeps_inputs() {
        let snapshot = SnapshotBuilder::default().build(inputs()).expect("build");
        assert_eq!(snapshot.region_id, RegionId::new(42));
        assert_eq!(snapshot.settlements.len(), 5);
        assert_eq!(snapshot.total_population(), 927_000);
    }

    #[test]
    fn test_build_rejects_empty_and_misaligned_inputs() {
        let mut empty = inputs();
        empty.settlements.clear();
        assert_eq!(
            SnapshotBuilder::default().build(empty),
            Err(ValidationError::EmptySettlements {
                region_id: RegionId::new(42)
            })
        );

        let mut misaligned = inputs();
        misaligned.settlements.reverse();
        assert!(matches!(
            SnapshotBuilder::default().build(misaligned),
            Err(ValidationError::BuildFailed { .. })
        ));
    }

    #[test]
    fn test_agglomerations_are_claimed_by_larger_centre_first() {
        let builder = SnapshotBuilder::new(80);
        let snapshot = builder.build(inputs()).expect("build");
        let layers = builder.derive(&snapshot).expect("derive");

        let agglomerations = &layers[&LayerKind::AgglomerationBoundary];
        assert_eq!(agglomerations.len(), 2);
        let first = &agglomerations.features[0];
        assert_eq!(first.property("center"), Some(&json!(1)));
        assert_eq!(first.property("members"), Some(&json!([1, 3, 4])));
        assert_eq!(first.property("population"), Some(&json!(625_000)));
        let second = &agglomerations.features[1];
        assert_eq!(second.property("members"), Some(&json!([2, 5])));
        assert!(matches!(&second.geometry, Some(Geometry::MultiPoint(points)) if points.len() == 2));

        let settlements = &layers[&LayerKind::Settlements];
        assert_eq!(settlements.len(), 5);
        let town_four = &settlements.features[3];
        assert_eq!(town_four.property("agglomeration"), Some(&json!(1)));
        assert_eq!(town_four.property("level"), Some(&json!("town")));
    }

    #[test]
    fn test_threshold_limits_membership() {
        let builder = SnapshotBuilder::new(50);
        let snapshot = builder.build(inputs()).expect("build");
        let layers = builder.derive(&snapshot).expect("derive");

        let agglomerations = &layers[&LayerKind::AgglomerationBoundary];
        assert_eq!(agglomerations.features[0].property("members"), Some(&json!([1, 3])));
        assert_eq!(agglomerations.features[1].property("members"), Some(&json!([2, 5])));
        let settlements = &layers[&LayerKind::Settlements];
        assert_eq!(settlements.features[3].property("agglomeration"), Some(&Value::Null));
    }

    #[test]
    fn test_region_without_large_centres_has_no_agglomerations() {
        let mut inputs = inputs();
        for s in &mut inputs.settlements {
            s.population = 900;
            s.level = SettlementLevel::Village;
        }
        let builder = SnapshotBuilder::default();
        let layers = builder.derive(&builder.build(inputs).expect("build")).expect("derive");
        assert!(layers[&LayerKind::AgglomerationBoundary].is_empty());
        assert_eq!(layers[&LayerKind::Settlements].len(), 5);
    }
}
