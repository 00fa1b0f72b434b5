use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::errors::ConfigError;
use crate::domain::value_objects::category::FactorCategory;

/// Tolerance on the weight-sum invariant.
pub const WEIGHT_SUM_TOLERANCE: f64 = 1e-4;

/// Per-category weight table for the composite scoring engine.
///
/// Construction validates that weights sum to 1.0 within
/// [`WEIGHT_SUM_TOLERANCE`] and that every weight lies in [0, 1]; a
/// violation is a fatal configuration error, never a runtime fallback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeWeights {
    weights: BTreeMap<FactorCategory, f64>,
}

impl CompositeWeights {
    pub fn new(weights: BTreeMap<FactorCategory, f64>) -> Result<Self, ConfigError> {
        if weights.is_empty() {
            return Err(ConfigError::MissingValue(
                "composite weights (at least one category required)".to_string(),
            ));
        }
        for (category, &weight) in &weights {
            if !weight.is_finite() || !(0.0..=1.0).contains(&weight) {
                return Err(ConfigError::WeightRange {
                    category: category.to_string(),
                    weight,
                });
            }
        }
        let sum: f64 = weights.values().sum();
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(ConfigError::WeightSum { sum });
        }
        Ok(CompositeWeights { weights })
    }

    /// Production default: heavier on return-like factors, lighter on
    /// ownership-derived ones.
    pub fn standard() -> Self {
        let mut weights = BTreeMap::new();
        weights.insert(FactorCategory::Momentum, 0.20);
        weights.insert(FactorCategory::Value, 0.20);
        weights.insert(FactorCategory::Quality, 0.15);
        weights.insert(FactorCategory::Growth, 0.15);
        weights.insert(FactorCategory::Positioning, 0.10);
        weights.insert(FactorCategory::Risk, 0.10);
        weights.insert(FactorCategory::Sentiment, 0.10);
        CompositeWeights::new(weights).expect("standard weights sum to 1.0")
    }

    pub fn weight(&self, category: FactorCategory) -> Option<f64> {
        self.weights.get(&category).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (FactorCategory, f64)> + '_ {
        self.weights.iter().map(|(c, w)| (*c, *w))
    }

    pub fn total_weight(&self) -> f64 {
        self.weights.values().sum()
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }
}
