use chrono::NaiveDate;

use crate::domain::services::factors::{
    Direction, FactorCalculator, Normalization, SubMetric, SymbolObservations,
};
use crate::domain::value_objects::category::FactorCategory;

/// Analyst action sentiment: revision breadth and target-price direction.
#[derive(Default)]
pub struct SentimentFactor;

static SUB_METRICS: [SubMetric; 2] = [
    SubMetric {
        name: "revision_breadth",
        weight: 0.5,
        normalization: Normalization::UniversePercentile,
        direction: Direction::HigherIsBetter,
    },
    SubMetric {
        name: "target_revision",
        weight: 0.5,
        normalization: Normalization::UniversePercentile,
        direction: Direction::HigherIsBetter,
    },
];

impl FactorCalculator for SentimentFactor {
    fn category(&self) -> FactorCategory {
        FactorCategory::Sentiment
    }

    fn sub_metrics(&self) -> &'static [SubMetric] {
        &SUB_METRICS
    }

    fn extract(&self, observations: &SymbolObservations, _as_of: NaiveDate) -> Vec<Option<f64>> {
        let ownership = match &observations.ownership {
            Some(o) => o,
            None => return vec![None; SUB_METRICS.len()],
        };

        let breadth = match (ownership.analyst_upgrades, ownership.analyst_downgrades) {
            (Some(up), Some(down)) if up + down > 0.0 => Some((up - down) / (up + down)),
            // No analyst actions at all is absence of evidence, not neutral
            // sentiment.
            _ => None,
        };

        vec![breadth, ownership.analyst_target_change_pct]
    }
}
