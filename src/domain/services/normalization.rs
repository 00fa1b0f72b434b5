//! Cross-sectional normalization used by the factor metric stages.
//!
//! Two methods are supported: tie-averaged percentile rank across the
//! active universe, and z-score against a sector peer group mapped onto the
//! 0-100 scale. Both operate on the set of symbols that actually have a raw
//! value; absent inputs never enter the cross-section.

use std::collections::HashMap;

/// Tie-averaged percentile ranks on the 0-100 scale (Hazen midrank:
/// `100 * (rank - 0.5) / n` with the 1-based rank averaged over ties).
///
/// A single-element cross-section ranks at 50.
pub fn percentile_ranks(values: &[(String, f64)]) -> HashMap<String, f64> {
    let n = values.len();
    let mut ranks = HashMap::with_capacity(n);
    if n == 0 {
        return ranks;
    }

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| {
        values[a]
            .1
            .partial_cmp(&values[b].1)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut i = 0;
    while i < n {
        // Extend over the run of equal values and assign the average rank.
        let mut j = i;
        while j + 1 < n && values[order[j + 1]].1 == values[order[i]].1 {
            j += 1;
        }
        let avg_rank = ((i + 1 + j + 1) as f64) / 2.0;
        let percentile = 100.0 * (avg_rank - 0.5) / n as f64;
        for &idx in &order[i..=j] {
            ranks.insert(values[idx].0.clone(), percentile);
        }
        i = j + 1;
    }

    ranks
}

/// Z-scores within sector peer groups, falling back to the whole
/// cross-section for symbols without a sector or whose group is degenerate
/// (fewer than two members, or zero dispersion).
pub fn sector_zscores(values: &[(String, Option<String>, f64)]) -> HashMap<String, f64> {
    let mut groups: HashMap<&str, Vec<f64>> = HashMap::new();
    for (_, sector, value) in values {
        if let Some(sector) = sector {
            groups.entry(sector.as_str()).or_default().push(*value);
        }
    }

    let universe: Vec<f64> = values.iter().map(|(_, _, v)| *v).collect();
    let universe_stats = mean_and_std(&universe);

    let mut zscores = HashMap::with_capacity(values.len());
    for (symbol, sector, value) in values {
        let group_stats = sector
            .as_ref()
            .and_then(|s| groups.get(s.as_str()))
            .and_then(|peers| {
                if peers.len() < 2 {
                    None
                } else {
                    mean_and_std(peers)
                }
            });

        let z = match group_stats.or(universe_stats) {
            Some((mean, std)) => (*value - mean) / std,
            None => 0.0,
        };
        zscores.insert(symbol.clone(), z);
    }

    zscores
}

/// Map a z-score onto the 0-100 scale: 50 + 25z, clamped. Two standard
/// deviations saturate the scale.
pub fn zscore_to_score(z: f64) -> f64 {
    (50.0 + 25.0 * z).max(0.0).min(100.0)
}

fn mean_and_std(values: &[f64]) -> Option<(f64, f64)> {
    if values.len() < 2 {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    let std = variance.sqrt();
    if std == 0.0 || !std.is_finite() {
        None
    } else {
        Some((mean, std))
    }
}
