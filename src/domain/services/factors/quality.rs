use chrono::NaiveDate;

use crate::domain::services::factors::{
    Direction, FactorCalculator, Normalization, SubMetric, SymbolObservations,
};
use crate::domain::value_objects::category::FactorCategory;

/// Balance-sheet and profitability quality, sector-relative.
#[derive(Default)]
pub struct QualityFactor;

static SUB_METRICS: [SubMetric; 3] = [
    SubMetric {
        name: "return_on_equity",
        weight: 0.4,
        normalization: Normalization::SectorZScore,
        direction: Direction::HigherIsBetter,
    },
    SubMetric {
        name: "gross_margin",
        weight: 0.3,
        normalization: Normalization::SectorZScore,
        direction: Direction::HigherIsBetter,
    },
    SubMetric {
        name: "leverage",
        weight: 0.3,
        normalization: Normalization::SectorZScore,
        direction: Direction::LowerIsBetter,
    },
];

impl FactorCalculator for QualityFactor {
    fn category(&self) -> FactorCategory {
        FactorCategory::Quality
    }

    fn sub_metrics(&self) -> &'static [SubMetric] {
        &SUB_METRICS
    }

    fn extract(&self, observations: &SymbolObservations, _as_of: NaiveDate) -> Vec<Option<f64>> {
        let fundamentals = match &observations.fundamentals {
            Some(f) => f,
            None => return vec![None; SUB_METRICS.len()],
        };

        // Ratios over equity are meaningless for non-positive equity.
        let equity = fundamentals.shareholder_equity.filter(|&e| e > 0.0);

        let roe = match (fundamentals.net_income_ttm, equity) {
            (Some(net_income), Some(equity)) => Some(net_income / equity),
            _ => None,
        };
        let leverage = match (fundamentals.total_debt, equity) {
            (Some(debt), Some(equity)) => Some(debt / equity),
            _ => None,
        };

        vec![roe, fundamentals.gross_margin, leverage]
    }
}
