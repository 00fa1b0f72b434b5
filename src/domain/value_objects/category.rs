use serde::{Deserialize, Serialize};

/// One analytical dimension of the composite score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactorCategory {
    Momentum,
    Value,
    Quality,
    Growth,
    Positioning,
    Risk,
    Sentiment,
}

impl FactorCategory {
    pub const ALL: [FactorCategory; 7] = [
        FactorCategory::Momentum,
        FactorCategory::Value,
        FactorCategory::Quality,
        FactorCategory::Growth,
        FactorCategory::Positioning,
        FactorCategory::Risk,
        FactorCategory::Sentiment,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FactorCategory::Momentum => "momentum",
            FactorCategory::Value => "value",
            FactorCategory::Quality => "quality",
            FactorCategory::Growth => "growth",
            FactorCategory::Positioning => "positioning",
            FactorCategory::Risk => "risk",
            FactorCategory::Sentiment => "sentiment",
        }
    }

    /// Pipeline stage name for the stage producing this category.
    pub fn stage_name(&self) -> &'static str {
        match self {
            FactorCategory::Momentum => "factor_momentum",
            FactorCategory::Value => "factor_value",
            FactorCategory::Quality => "factor_quality",
            FactorCategory::Growth => "factor_growth",
            FactorCategory::Positioning => "factor_positioning",
            FactorCategory::Risk => "factor_risk",
            FactorCategory::Sentiment => "factor_sentiment",
        }
    }

    pub fn parse(s: &str) -> Result<Self, String> {
        match s {
            "momentum" => Ok(FactorCategory::Momentum),
            "value" => Ok(FactorCategory::Value),
            "quality" => Ok(FactorCategory::Quality),
            "growth" => Ok(FactorCategory::Growth),
            "positioning" => Ok(FactorCategory::Positioning),
            "risk" => Ok(FactorCategory::Risk),
            "sentiment" => Ok(FactorCategory::Sentiment),
            other => Err(format!("Unknown factor category: {}", other)),
        }
    }
}

impl std::fmt::Display for FactorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Source bucket a raw observation was ingested from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceCategory {
    Pricing,
    Fundamentals,
    Ownership,
}

impl SourceCategory {
    pub const ALL: [SourceCategory; 3] = [
        SourceCategory::Pricing,
        SourceCategory::Fundamentals,
        SourceCategory::Ownership,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceCategory::Pricing => "pricing",
            SourceCategory::Fundamentals => "fundamentals",
            SourceCategory::Ownership => "ownership",
        }
    }

    /// Pipeline stage name for the ingestor of this source.
    pub fn stage_name(&self) -> &'static str {
        match self {
            SourceCategory::Pricing => "ingest_pricing",
            SourceCategory::Fundamentals => "ingest_fundamentals",
            SourceCategory::Ownership => "ingest_ownership",
        }
    }

    pub fn parse(s: &str) -> Result<Self, String> {
        match s {
            "pricing" => Ok(SourceCategory::Pricing),
            "fundamentals" => Ok(SourceCategory::Fundamentals),
            "ownership" => Ok(SourceCategory::Ownership),
            other => Err(format!("Unknown source category: {}", other)),
        }
    }
}

impl std::fmt::Display for SourceCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factor_category_round_trip() {
        for category in FactorCategory::ALL {
            assert_eq!(FactorCategory::parse(category.as_str()).unwrap(), category);
        }
    }

    #[test]
    fn test_factor_category_parse_unknown() {
        assert!(FactorCategory::parse("liquidity").is_err());
    }

    #[test]
    fn test_source_category_round_trip() {
        for source in SourceCategory::ALL {
            assert_eq!(SourceCategory::parse(source.as_str()).unwrap(), source);
        }
    }

    #[test]
    fn test_stage_names_are_distinct() {
        let mut names: Vec<&str> = FactorCategory::ALL.iter().map(|c| c.stage_name()).collect();
        names.extend(SourceCategory::ALL.iter().map(|s| s.stage_name()));
        let count = names.len();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), count);
    }
}
