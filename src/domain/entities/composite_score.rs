use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::value_objects::category::FactorCategory;

/// Weighted composite of category scores for one (symbol, date).
///
/// `composite` is NULL when data completeness fell below the configured
/// minimum coverage; category-level rows remain stored regardless.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompositeScore {
    pub symbol: String,
    pub date: NaiveDate,
    pub composite: Option<f64>,
    /// Tie-averaged percentile across the universe of non-null composites.
    pub percentile_rank: Option<f64>,
    /// Percentile within the symbol's sector peer group; NULL when the peer
    /// group is below the configured population floor.
    pub sector_percentile: Option<f64>,
    /// Per-category contribution to the composite, in score points.
    pub contributions: BTreeMap<FactorCategory, f64>,
    /// Fraction of total category weight backed by non-null data, in [0, 1].
    pub completeness: f64,
    pub computed_at: DateTime<Utc>,
}

impl CompositeScore {
    pub fn new(
        symbol: impl Into<String>,
        date: NaiveDate,
        composite: Option<f64>,
        contributions: BTreeMap<FactorCategory, f64>,
        completeness: f64,
    ) -> Self {
        assert!(
            (0.0..=1.0).contains(&completeness),
            "completeness must be in [0.0, 1.0], got {}",
            completeness
        );
        if let Some(score) = composite {
            assert!(
                (0.0..=100.0).contains(&score),
                "composite must be in [0.0, 100.0], got {}",
                score
            );
        }
        CompositeScore {
            symbol: symbol.into(),
            date,
            composite,
            percentile_rank: None,
            sector_percentile: None,
            contributions,
            completeness,
            computed_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    #[test]
    fn test_composite_score_creation() {
        let mut contributions = BTreeMap::new();
        contributions.insert(FactorCategory::Momentum, 40.0);
        contributions.insert(FactorCategory::Value, 30.0);

        let score = CompositeScore::new("AAA", date("2026-08-07"), Some(70.0), contributions, 1.0);
        assert_eq!(score.composite, Some(70.0));
        assert_eq!(score.completeness, 1.0);
        assert!(score.percentile_rank.is_none());
    }

    #[test]
    fn test_suppressed_composite_keeps_completeness() {
        let score =
            CompositeScore::new("BBB", date("2026-08-07"), None, BTreeMap::new(), 0.25);
        assert!(score.composite.is_none());
        assert_eq!(score.completeness, 0.25);
    }

    #[test]
    #[should_panic(expected = "completeness must be in [0.0, 1.0]")]
    fn test_completeness_validation() {
        CompositeScore::new("AAA", date("2026-08-07"), None, BTreeMap::new(), 1.2);
    }

    #[test]
    #[should_panic(expected = "composite must be in [0.0, 100.0]")]
    fn test_composite_range_validation() {
        CompositeScore::new("AAA", date("2026-08-07"), Some(120.0), BTreeMap::new(), 1.0);
    }
}
