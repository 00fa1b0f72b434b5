use chrono::NaiveDate;

use crate::domain::services::factors::{
    Direction, FactorCalculator, Normalization, SubMetric, SymbolObservations,
};
use crate::domain::value_objects::category::FactorCategory;

/// Price momentum over standard lookback windows, skipping the most recent
/// month in the long window to avoid short-term reversal.
pub struct MomentumFactor {
    /// Minimum trading days of price history; below this the whole category
    /// is NULL for the symbol.
    pub min_history_days: usize,
}

impl Default for MomentumFactor {
    fn default() -> Self {
        MomentumFactor {
            min_history_days: 252,
        }
    }
}

static SUB_METRICS: [SubMetric; 3] = [
    SubMetric {
        name: "twelve_minus_one_return",
        weight: 0.5,
        normalization: Normalization::UniversePercentile,
        direction: Direction::HigherIsBetter,
    },
    SubMetric {
        name: "six_month_return",
        weight: 0.3,
        normalization: Normalization::UniversePercentile,
        direction: Direction::HigherIsBetter,
    },
    SubMetric {
        name: "three_month_return",
        weight: 0.2,
        normalization: Normalization::UniversePercentile,
        direction: Direction::HigherIsBetter,
    },
];

impl FactorCalculator for MomentumFactor {
    fn category(&self) -> FactorCategory {
        FactorCategory::Momentum
    }

    fn sub_metrics(&self) -> &'static [SubMetric] {
        &SUB_METRICS
    }

    fn history_days(&self) -> u32 {
        270
    }

    fn extract(&self, observations: &SymbolObservations, as_of: NaiveDate) -> Vec<Option<f64>> {
        let closes: Vec<f64> = observations
            .pricing
            .iter()
            .filter(|p| p.date <= as_of && p.close > 0.0)
            .map(|p| p.close)
            .collect();

        if closes.len() < self.min_history_days {
            return vec![None; SUB_METRICS.len()];
        }

        let last = closes.len() - 1;
        // Long window: 12 months back to 1 month back (21 trading days).
        let twelve_minus_one = last
            .checked_sub(21)
            .and_then(|end| window_return(&closes, end, 230));
        let six_month = window_return(&closes, last, 126);
        let three_month = window_return(&closes, last, 63);

        vec![twelve_minus_one, six_month, three_month]
    }
}

/// Simple return from `days` trading days before `end` to `end`.
fn window_return(closes: &[f64], end: usize, days: usize) -> Option<f64> {
    let start = end.checked_sub(days)?;
    let base = closes[start];
    if base > 0.0 {
        Some(closes[end] / base - 1.0)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::services::factors::PricePoint;
    use chrono::Duration;

    fn history(days: usize, daily_growth: f64) -> SymbolObservations {
        let start: NaiveDate = "2025-01-01".parse().unwrap();
        let pricing = (0..days)
            .map(|i| PricePoint {
                date: start + Duration::days(i as i64),
                close: 100.0 * (1.0 + daily_growth).powi(i as i32),
                volume: Some(1000.0),
            })
            .collect();
        SymbolObservations {
            pricing,
            fundamentals: None,
            ownership: None,
        }
    }

    fn as_of() -> NaiveDate {
        "2026-08-07".parse().unwrap()
    }

    #[test]
    fn test_momentum_short_history_is_null() {
        let calc = MomentumFactor::default();
        let values = calc.extract(&history(100, 0.001), as_of());
        assert_eq!(values, vec![None, None, None]);
    }

    #[test]
    fn test_momentum_exact_minimum_history() {
        let calc = MomentumFactor::default();
        let values = calc.extract(&history(252, 0.001), as_of());
        assert!(values.iter().all(|v| v.is_some()));
    }

    #[test]
    fn test_momentum_uptrend_positive_returns() {
        let calc = MomentumFactor::default();
        let values = calc.extract(&history(300, 0.002), as_of());
        for v in values {
            assert!(v.unwrap() > 0.0);
        }
    }

    #[test]
    fn test_momentum_downtrend_negative_returns() {
        let calc = MomentumFactor::default();
        let values = calc.extract(&history(300, -0.002), as_of());
        for v in values {
            assert!(v.unwrap() < 0.0);
        }
    }

    #[test]
    fn test_momentum_ignores_future_prices() {
        let calc = MomentumFactor::default();
        let observations = history(300, 0.002);
        // Scoring as of before the history starts: nothing usable.
        let values = calc.extract(&observations, "2024-01-01".parse().unwrap());
        assert_eq!(values, vec![None, None, None]);
    }

    #[test]
    fn test_sub_weights_sum_to_one() {
        let total: f64 = SUB_METRICS.iter().map(|s| s.weight).sum();
        assert!((total - 1.0).abs() < 1e-9);
    }
}
