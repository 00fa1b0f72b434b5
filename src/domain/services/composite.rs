use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;
use tracing::{debug, warn};

use crate::domain::entities::composite_score::CompositeScore;
use crate::domain::entities::factor_metric::FactorMetric;
use crate::domain::entities::symbol::Symbol;
use crate::domain::errors::ConfigError;
use crate::domain::services::normalization::percentile_ranks;
use crate::domain::value_objects::weights::CompositeWeights;

/// Combines category scores into one weighted composite per symbol per date.
///
/// Weights renormalize over the categories actually present for a symbol;
/// absent categories contribute nothing and are reflected in the
/// completeness measure instead. Composites with completeness below the
/// minimum coverage are stored as NULL.
#[derive(Debug)]
pub struct CompositeEngine {
    weights: CompositeWeights,
    min_coverage: f64,
    sector_rank_min_peers: usize,
}

impl CompositeEngine {
    pub fn new(
        weights: CompositeWeights,
        min_coverage: f64,
        sector_rank_min_peers: usize,
    ) -> Result<Self, ConfigError> {
        if !(0.0..=1.0).contains(&min_coverage) || !min_coverage.is_finite() {
            return Err(ConfigError::InvalidThreshold {
                name: "min_coverage".to_string(),
                value: min_coverage,
            });
        }
        Ok(CompositeEngine {
            weights,
            min_coverage,
            sector_rank_min_peers,
        })
    }

    pub fn weights(&self) -> &CompositeWeights {
        &self.weights
    }

    /// Score every symbol with at least one non-null same-date factor
    /// metric. Metrics from any other date are ignored outright.
    pub fn score_date(
        &self,
        universe: &[Symbol],
        metrics: &[FactorMetric],
        as_of: NaiveDate,
    ) -> Vec<CompositeScore> {
        let sectors: HashMap<&str, Option<&str>> = universe
            .iter()
            .map(|s| (s.ticker.as_str(), s.sector.as_deref()))
            .collect();

        // category -> score per symbol, same-date rows only.
        let mut by_symbol: HashMap<&str, BTreeMap<_, f64>> = HashMap::new();
        for metric in metrics {
            if metric.date != as_of {
                warn!(
                    symbol = %metric.symbol,
                    metric_date = %metric.date,
                    as_of = %as_of,
                    "Ignoring factor metric from a different date"
                );
                continue;
            }
            if let Some(score) = metric.score {
                by_symbol
                    .entry(metric.symbol.as_str())
                    .or_default()
                    .insert(metric.category, score);
            } else {
                // Ensure the symbol still gets a completeness row even when
                // every category turns out NULL.
                by_symbol.entry(metric.symbol.as_str()).or_default();
            }
        }

        let total_weight = self.weights.total_weight();
        let mut scores = Vec::with_capacity(by_symbol.len());

        for (ticker, categories) in by_symbol {
            let mut weighted_sum = 0.0;
            let mut present_weight = 0.0;
            let mut contributions = BTreeMap::new();

            for (category, weight) in self.weights.iter() {
                if let Some(&score) = categories.get(&category) {
                    weighted_sum += weight * score;
                    present_weight += weight;
                    contributions.insert(category, weight * score);
                }
            }

            let completeness = (present_weight / total_weight).clamp(0.0, 1.0);
            let composite = if present_weight > 0.0 && completeness >= self.min_coverage {
                // Clamp absorbs floating-point residue at the range edges.
                Some((weighted_sum / present_weight).clamp(0.0, 100.0))
            } else {
                None
            };

            // Contributions are reported on the renormalized scale so they
            // sum to the composite.
            if present_weight > 0.0 {
                for value in contributions.values_mut() {
                    *value /= present_weight;
                }
            }

            debug!(
                symbol = %ticker,
                composite = ?composite,
                completeness = completeness,
                categories_present = categories.len(),
                "Computed composite score"
            );

            scores.push(CompositeScore::new(
                ticker.to_string(),
                as_of,
                composite,
                contributions,
                completeness,
            ));
        }

        self.rank(&mut scores, &sectors);
        scores.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        scores
    }

    /// Tie-averaged percentile across all non-null composites, plus a
    /// sector-relative percentile when the peer group is populous enough.
    fn rank(&self, scores: &mut [CompositeScore], sectors: &HashMap<&str, Option<&str>>) {
        let ranked: Vec<(String, f64)> = scores
            .iter()
            .filter_map(|s| s.composite.map(|c| (s.symbol.clone(), c)))
            .collect();
        let universe_ranks = percentile_ranks(&ranked);

        let mut sector_groups: HashMap<&str, Vec<(String, f64)>> = HashMap::new();
        for (symbol, composite) in &ranked {
            if let Some(Some(sector)) = sectors.get(symbol.as_str()) {
                sector_groups
                    .entry(sector)
                    .or_default()
                    .push((symbol.clone(), *composite));
            }
        }
        let mut sector_ranks: HashMap<String, f64> = HashMap::new();
        for (_, group) in sector_groups {
            if group.len() >= self.sector_rank_min_peers {
                sector_ranks.extend(percentile_ranks(&group));
            }
        }

        for score in scores.iter_mut() {
            score.percentile_rank = universe_ranks.get(&score.symbol).copied();
            score.sector_percentile = sector_ranks.get(&score.symbol).copied();
        }
    }
}
