use chrono::NaiveDate;

use crate::domain::services::factors::{
    Direction, FactorCalculator, Normalization, SubMetric, SymbolObservations,
};
use crate::domain::value_objects::category::FactorCategory;

const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// Realized risk, inverted so that calmer symbols score higher.
pub struct RiskFactor {
    /// Minimum trading days of price history; below this the whole category
    /// is NULL for the symbol.
    pub min_history_days: usize,
    /// Return window for volatility and downside deviation.
    pub volatility_window: usize,
}

impl Default for RiskFactor {
    fn default() -> Self {
        RiskFactor {
            min_history_days: 63,
            volatility_window: 63,
        }
    }
}

static SUB_METRICS: [SubMetric; 3] = [
    SubMetric {
        name: "realized_volatility",
        weight: 0.4,
        normalization: Normalization::UniversePercentile,
        direction: Direction::LowerIsBetter,
    },
    SubMetric {
        name: "max_drawdown",
        weight: 0.3,
        normalization: Normalization::UniversePercentile,
        direction: Direction::LowerIsBetter,
    },
    SubMetric {
        name: "downside_deviation",
        weight: 0.3,
        normalization: Normalization::UniversePercentile,
        direction: Direction::LowerIsBetter,
    },
];

impl FactorCalculator for RiskFactor {
    fn category(&self) -> FactorCategory {
        FactorCategory::Risk
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

        let returns: Vec<f64> = closes.windows(2).map(|w| (w[1] / w[0]).ln()).collect();
        let window = &returns[returns.len().saturating_sub(self.volatility_window)..];

        vec![
            annualized_std(window),
            Some(max_drawdown(&closes)),
            downside_deviation(window),
        ]
    }
}

fn annualized_std(returns: &[f64]) -> Option<f64> {
    if returns.len() < 2 {
        return None;
    }
    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1.0);
    Some(variance.sqrt() * TRADING_DAYS_PER_YEAR.sqrt())
}

/// Largest peak-to-trough decline as a positive fraction.
fn max_drawdown(closes: &[f64]) -> f64 {
    let mut peak = f64::MIN;
    let mut worst = 0.0f64;
    for &close in closes {
        peak = peak.max(close);
        worst = worst.max(1.0 - close / peak);
    }
    worst
}

/// Annualized deviation of negative returns only; zero when the window has
/// no down days.
fn downside_deviation(returns: &[f64]) -> Option<f64> {
    if returns.len() < 2 {
        return None;
    }
    let n = returns.len() as f64;
    let downside = returns.iter().map(|r| r.min(0.0).powi(2)).sum::<f64>() / (n - 1.0);
    Some(downside.sqrt() * TRADING_DAYS_PER_YEAR.sqrt())
}
