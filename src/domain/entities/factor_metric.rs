use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::value_objects::category::FactorCategory;
use crate::domain::value_objects::score::Score;

/// One normalized category score per (symbol, date, category), produced by
/// exactly one factor metric stage.
///
/// `inputs` records the raw sub-metric values the score was derived from,
/// with JSON `null` marking each input that was unavailable. A `None` score
/// means zero sub-metrics were available; a default value is never invented.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactorMetric {
    pub symbol: String,
    pub date: NaiveDate,
    pub category: FactorCategory,
    pub score: Option<f64>,
    pub inputs: Value,
    pub computed_at: DateTime<Utc>,
}

impl FactorMetric {
    /// Create a metric row, validating the score range when present.
    pub fn new(
        symbol: impl Into<String>,
        date: NaiveDate,
        category: FactorCategory,
        score: Option<Score>,
        inputs: Value,
    ) -> Self {
        FactorMetric {
            symbol: symbol.into(),
            date,
            category,
            score: score.map(|s| s.value()),
            inputs,
            computed_at: Utc::now(),
        }
    }

    pub fn is_null(&self) -> bool {
        self.score.is_none()
    }
}
