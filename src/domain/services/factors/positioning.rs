use chrono::NaiveDate;

use crate::domain::services::factors::{
    Direction, FactorCalculator, Normalization, SubMetric, SymbolObservations,
};
use crate::domain::value_objects::category::FactorCategory;

/// Who is accumulating the stock: institutional flow, insider buying, and
/// crowding on the short side.
#[derive(Default)]
pub struct PositioningFactor;

static SUB_METRICS: [SubMetric; 3] = [
    SubMetric {
        name: "institutional_flow",
        weight: 0.4,
        normalization: Normalization::UniversePercentile,
        direction: Direction::HigherIsBetter,
    },
    SubMetric {
        name: "insider_net_buying",
        weight: 0.3,
        normalization: Normalization::UniversePercentile,
        direction: Direction::HigherIsBetter,
    },
    SubMetric {
        name: "short_interest",
        weight: 0.3,
        normalization: Normalization::UniversePercentile,
        direction: Direction::LowerIsBetter,
    },
];

impl FactorCalculator for PositioningFactor {
    fn category(&self) -> FactorCategory {
        FactorCategory::Positioning
    }

    fn sub_metrics(&self) -> &'static [SubMetric] {
        &SUB_METRICS
    }

    fn extract(&self, observations: &SymbolObservations, _as_of: NaiveDate) -> Vec<Option<f64>> {
        let ownership = match &observations.ownership {
            Some(o) => o,
            None => return vec![None; SUB_METRICS.len()],
        };

        vec![
            ownership.institutional_ownership_change,
            ownership.insider_net_shares,
            ownership.short_interest_pct,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::raw_observation::OwnershipFields;

    fn as_of() -> NaiveDate {
        "2026-08-07".parse().unwrap()
    }

    #[test]
    fn test_positioning_passthrough() {
        let observations = SymbolObservations {
            pricing: vec![],
            fundamentals: None,
            ownership: Some(OwnershipFields {
                institutional_ownership_change: Some(0.03),
                insider_net_shares: Some(-15000.0),
                short_interest_pct: Some(0.08),
                ..Default::default()
            }),
        };
        let values = PositioningFactor.extract(&observations, as_of());
        assert_eq!(values, vec![Some(0.03), Some(-15000.0), Some(0.08)]);
    }

    #[test]
    fn test_positioning_no_ownership_all_null() {
        let observations = SymbolObservations::default();
        assert_eq!(
            PositioningFactor.extract(&observations, as_of()),
            vec![None, None, None]
        );
    }
}
