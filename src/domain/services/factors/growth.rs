use chrono::NaiveDate;

use crate::domain::services::factors::{
    Direction, FactorCalculator, Normalization, SubMetric, SymbolObservations,
};
use crate::domain::value_objects::category::FactorCategory;

/// Year-over-year trailing growth rates.
#[derive(Default)]
pub struct GrowthFactor;

static SUB_METRICS: [SubMetric; 2] = [
    SubMetric {
        name: "revenue_growth",
        weight: 0.5,
        normalization: Normalization::UniversePercentile,
        direction: Direction::HigherIsBetter,
    },
    SubMetric {
        name: "eps_growth",
        weight: 0.5,
        normalization: Normalization::UniversePercentile,
        direction: Direction::HigherIsBetter,
    },
];

impl FactorCalculator for GrowthFactor {
    fn category(&self) -> FactorCategory {
        FactorCategory::Growth
    }

    fn sub_metrics(&self) -> &'static [SubMetric] {
        &SUB_METRICS
    }

    fn extract(&self, observations: &SymbolObservations, _as_of: NaiveDate) -> Vec<Option<f64>> {
        let fundamentals = match &observations.fundamentals {
            Some(f) => f,
            None => return vec![None; SUB_METRICS.len()],
        };

        let revenue_growth = match (fundamentals.revenue_ttm, fundamentals.revenue_prior_ttm) {
            (Some(current), Some(prior)) if prior > 0.0 => Some(current / prior - 1.0),
            _ => None,
        };
        // Prior EPS can be negative; scale the change by its magnitude.
        let eps_growth = match (fundamentals.eps_ttm, fundamentals.eps_prior_ttm) {
            (Some(current), Some(prior)) if prior != 0.0 => Some((current - prior) / prior.abs()),
            _ => None,
        };

        vec![revenue_growth, eps_growth]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::raw_observation::FundamentalFields;

    fn as_of() -> NaiveDate {
        "2026-08-07".parse().unwrap()
    }

    fn with_fundamentals(fundamentals: FundamentalFields) -> SymbolObservations {
        SymbolObservations {
            pricing: vec![],
            fundamentals: Some(fundamentals),
            ownership: None,
        }
    }

    #[test]
    fn test_growth_rates() {
        let observations = with_fundamentals(FundamentalFields {
            revenue_ttm: Some(120.0),
            revenue_prior_ttm: Some(100.0),
            eps_ttm: Some(3.0),
            eps_prior_ttm: Some(2.0),
            ..Default::default()
        });
        let values = GrowthFactor.extract(&observations, as_of());
        assert!((values[0].unwrap() - 0.2).abs() < 1e-9);
        assert!((values[1].unwrap() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_growth_recovery_from_negative_eps() {
        let observations = with_fundamentals(FundamentalFields {
            eps_ttm: Some(1.0),
            eps_prior_ttm: Some(-2.0),
            ..Default::default()
        });
        let values = GrowthFactor.extract(&observations, as_of());
        // (1 - (-2)) / 2 = 1.5: improvement reads as positive growth.
        assert!((values[1].unwrap() - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_growth_zero_prior_is_null() {
        let observations = with_fundamentals(FundamentalFields {
            revenue_ttm: Some(120.0),
            revenue_prior_ttm: Some(0.0),
            eps_ttm: Some(1.0),
            eps_prior_ttm: Some(0.0),
            ..Default::default()
        });
        assert_eq!(GrowthFactor.extract(&observations, as_of()), vec![None, None]);
    }
}
