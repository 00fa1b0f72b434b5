//! Factor metric calculators.
//!
//! Each of the seven categories is produced by one [`FactorCalculator`]: it
//! declares weighted sub-metrics and extracts their raw values per symbol;
//! [`compute_factor_metrics`] then normalizes each sub-metric across the
//! cross-section and combines the normalized values into one category score
//! per symbol. A sub-metric with no raw input is excluded and the remaining
//! sub-weights renormalize; with zero sub-metrics available the category
//! score is NULL.

pub mod growth;
pub mod momentum;
pub mod positioning;
pub mod quality;
pub mod risk;
pub mod sentiment;
pub mod value;

pub use growth::GrowthFactor;
pub use momentum::MomentumFactor;
pub use positioning::PositioningFactor;
pub use quality::QualityFactor;
pub use risk::RiskFactor;
pub use sentiment::SentimentFactor;
pub use value::ValueFactor;

use std::collections::HashMap;

use chrono::NaiveDate;
use serde_json::{Map, Value};
use tracing::debug;

use crate::domain::entities::factor_metric::FactorMetric;
use crate::domain::entities::raw_observation::{FundamentalFields, OwnershipFields};
use crate::domain::entities::symbol::Symbol;
use crate::domain::services::normalization::{
    percentile_ranks, sector_zscores, zscore_to_score,
};
use crate::domain::value_objects::category::FactorCategory;
use crate::domain::value_objects::score::Score;

/// Cross-sectional normalization method for one sub-metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Normalization {
    /// Tie-averaged percentile rank across the active universe.
    UniversePercentile,
    /// Z-score against the sector peer group, mapped onto 0-100.
    SectorZScore,
}

/// Whether a larger raw value means a better score.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    HigherIsBetter,
    LowerIsBetter,
}

/// Declaration of one weighted sub-metric within a category.
#[derive(Debug, Clone, Copy)]
pub struct SubMetric {
    pub name: &'static str,
    pub weight: f64,
    pub normalization: Normalization,
    pub direction: Direction,
}

/// One daily close, ordered oldest-first in [`SymbolObservations::pricing`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PricePoint {
    pub date: NaiveDate,
    pub close: f64,
    pub volume: Option<f64>,
}

/// Observation history for one symbol as of a scoring date.
#[derive(Debug, Clone, Default)]
pub struct SymbolObservations {
    /// Daily closes up to and including the scoring date, oldest first.
    pub pricing: Vec<PricePoint>,
    /// Most recent fundamentals on or before the scoring date.
    pub fundamentals: Option<FundamentalFields>,
    /// Most recent ownership snapshot on or before the scoring date.
    pub ownership: Option<OwnershipFields>,
}

pub trait FactorCalculator: Send + Sync {
    fn category(&self) -> FactorCategory;

    /// Sub-metric declarations; extraction output aligns with this slice.
    fn sub_metrics(&self) -> &'static [SubMetric];

    /// Days of pricing history this calculator wants loaded. Zero when the
    /// calculator reads no price series.
    fn history_days(&self) -> u32 {
        0
    }

    /// Raw (pre-normalization) sub-metric values for one symbol, aligned
    /// with [`sub_metrics`](Self::sub_metrics). `None` marks an unavailable
    /// input; it is never substituted with a default.
    fn extract(&self, observations: &SymbolObservations, as_of: NaiveDate) -> Vec<Option<f64>>;
}

/// Compute one [`FactorMetric`] row per symbol for the given date.
///
/// Symbols missing from `data` still yield a row with a NULL score so that
/// downstream coverage accounting sees them.
pub fn compute_factor_metrics(
    calculator: &dyn FactorCalculator,
    universe: &[Symbol],
    data: &HashMap<String, SymbolObservations>,
    as_of: NaiveDate,
) -> Vec<FactorMetric> {
    let specs = calculator.sub_metrics();
    let empty = SymbolObservations::default();

    // Raw sub-metric values per symbol, aligned with `specs`.
    let mut raw: Vec<(usize, Vec<Option<f64>>)> = Vec::with_capacity(universe.len());
    for (idx, symbol) in universe.iter().enumerate() {
        let observations = data.get(&symbol.ticker).unwrap_or(&empty);
        let mut values = calculator.extract(observations, as_of);
        values.resize(specs.len(), None);
        for value in values.iter_mut() {
            if value.map_or(false, |v| !v.is_finite()) {
                *value = None;
            }
        }
        raw.push((idx, values));
    }

    // Normalize each sub-metric across the symbols that have it.
    let mut normalized: Vec<HashMap<String, f64>> = Vec::with_capacity(specs.len());
    for (j, spec) in specs.iter().enumerate() {
        let scores = match spec.normalization {
            Normalization::UniversePercentile => {
                let cross_section: Vec<(String, f64)> = raw
                    .iter()
                    .filter_map(|(idx, values)| {
                        values[j].map(|v| (universe[*idx].ticker.clone(), v))
                    })
                    .collect();
                let mut ranks = percentile_ranks(&cross_section);
                if spec.direction == Direction::LowerIsBetter {
                    for rank in ranks.values_mut() {
                        *rank = 100.0 - *rank;
                    }
                }
                ranks
            }
            Normalization::SectorZScore => {
                let cross_section: Vec<(String, Option<String>, f64)> = raw
                    .iter()
                    .filter_map(|(idx, values)| {
                        values[j].map(|v| {
                            let symbol = &universe[*idx];
                            (symbol.ticker.clone(), symbol.sector.clone(), v)
                        })
                    })
                    .collect();
                sector_zscores(&cross_section)
                    .into_iter()
                    .map(|(ticker, z)| {
                        let z = match spec.direction {
                            Direction::HigherIsBetter => z,
                            Direction::LowerIsBetter => -z,
                        };
                        (ticker, zscore_to_score(z))
                    })
                    .collect()
            }
        };
        normalized.push(scores);
    }

    // Combine normalized sub-metrics per symbol, renormalizing the
    // sub-weights over whatever is present.
    let mut metrics = Vec::with_capacity(universe.len());
    for (idx, values) in &raw {
        let symbol = &universe[*idx];
        let mut weighted_sum = 0.0;
        let mut present_weight = 0.0;
        let mut inputs = Map::with_capacity(specs.len());

        for (j, spec) in specs.iter().enumerate() {
            match values[j] {
                Some(raw_value) => {
                    inputs.insert(spec.name.to_string(), raw_value.into());
                    if let Some(&normalized_value) = normalized[j].get(&symbol.ticker) {
                        weighted_sum += spec.weight * normalized_value;
                        present_weight += spec.weight;
                    }
                }
                None => {
                    inputs.insert(spec.name.to_string(), Value::Null);
                }
            }
        }

        let score = if present_weight > 0.0 {
            // Clamp: normalization is range-bound, this only absorbs
            // floating-point residue.
            Some(Score::clamped(weighted_sum / present_weight).expect("finite score"))
        } else {
            None
        };

        debug!(
            symbol = %symbol.ticker,
            category = %calculator.category(),
            score = ?score.map(|s| s.value()),
            present_weight = present_weight,
            "Computed factor metric"
        );

        metrics.push(FactorMetric::new(
            symbol.ticker.clone(),
            as_of,
            calculator.category(),
            score,
            Value::Object(inputs),
        ));
    }

    metrics
}

/// Latest usable close on or before `as_of`.
pub(crate) fn latest_close(observations: &SymbolObservations, as_of: NaiveDate) -> Option<f64> {
    observations
        .pricing
        .iter()
        .rev()
        .find(|p| p.date <= as_of && p.close > 0.0)
        .map(|p| p.close)
}
