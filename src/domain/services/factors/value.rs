use chrono::NaiveDate;

use crate::domain::services::factors::{
    latest_close, Direction, FactorCalculator, Normalization, SubMetric, SymbolObservations,
};
use crate::domain::value_objects::category::FactorCategory;

/// Valuation yields against the latest close, normalized against sector
/// peers (raw yields are not comparable across sectors).
#[derive(Default)]
pub struct ValueFactor;

static SUB_METRICS: [SubMetric; 3] = [
    SubMetric {
        name: "earnings_yield",
        weight: 0.4,
        normalization: Normalization::SectorZScore,
        direction: Direction::HigherIsBetter,
    },
    SubMetric {
        name: "book_to_price",
        weight: 0.3,
        normalization: Normalization::SectorZScore,
        direction: Direction::HigherIsBetter,
    },
    SubMetric {
        name: "cash_flow_yield",
        weight: 0.3,
        normalization: Normalization::SectorZScore,
        direction: Direction::HigherIsBetter,
    },
];

impl FactorCalculator for ValueFactor {
    fn category(&self) -> FactorCategory {
        FactorCategory::Value
    }

    fn sub_metrics(&self) -> &'static [SubMetric] {
        &SUB_METRICS
    }

    fn history_days(&self) -> u32 {
        10
    }

    fn extract(&self, observations: &SymbolObservations, as_of: NaiveDate) -> Vec<Option<f64>> {
        let price = match latest_close(observations, as_of) {
            Some(price) => price,
            None => return vec![None; SUB_METRICS.len()],
        };
        let fundamentals = match &observations.fundamentals {
            Some(f) => f,
            None => return vec![None; SUB_METRICS.len()],
        };

        vec![
            fundamentals.eps_ttm.map(|eps| eps / price),
            fundamentals.book_value_per_share.map(|bvps| bvps / price),
            fundamentals
                .operating_cash_flow_per_share
                .map(|ocf| ocf / price),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::raw_observation::FundamentalFields;
    use crate::domain::services::factors::PricePoint;

    fn as_of() -> NaiveDate {
        "2026-08-07".parse().unwrap()
    }

    fn with_price_and_fundamentals(
        close: f64,
        fundamentals: FundamentalFields,
    ) -> SymbolObservations {
        SymbolObservations {
            pricing: vec![PricePoint {
                date: "2026-08-06".parse().unwrap(),
                close,
                volume: None,
            }],
            fundamentals: Some(fundamentals),
            ownership: None,
        }
    }

    #[test]
    fn test_value_yields_against_price() {
        let observations = with_price_and_fundamentals(
            50.0,
            FundamentalFields {
                eps_ttm: Some(5.0),
                book_value_per_share: Some(25.0),
                operating_cash_flow_per_share: Some(10.0),
                ..Default::default()
            },
        );
        let values = ValueFactor.extract(&observations, as_of());
        assert_eq!(values[0], Some(0.1));
        assert_eq!(values[1], Some(0.5));
        assert_eq!(values[2], Some(0.2));
    }

    #[test]
    fn test_value_negative_earnings_allowed() {
        let observations = with_price_and_fundamentals(
            50.0,
            FundamentalFields {
                eps_ttm: Some(-2.5),
                ..Default::default()
            },
        );
        let values = ValueFactor.extract(&observations, as_of());
        assert_eq!(values[0], Some(-0.05));
        assert_eq!(values[1], None);
    }

    #[test]
    fn test_value_without_price_all_null() {
        let observations = SymbolObservations {
            pricing: vec![],
            fundamentals: Some(FundamentalFields {
                eps_ttm: Some(5.0),
                ..Default::default()
            }),
            ownership: None,
        };
        assert_eq!(
            ValueFactor.extract(&observations, as_of()),
            vec![None, None, None]
        );
    }

    #[test]
    fn test_value_without_fundamentals_all_null() {
        let observations = SymbolObservations {
            pricing: vec![PricePoint {
                date: "2026-08-06".parse().unwrap(),
                close: 50.0,
                volume: None,
            }],
            fundamentals: None,
            ownership: None,
        };
        assert_eq!(
            ValueFactor.extract(&observations, as_of()),
            vec![None, None, None]
        );
    }
}
