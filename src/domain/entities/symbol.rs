use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Instrument classification for a tradable symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstrumentType {
    Equity,
    Fund,
}

impl InstrumentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstrumentType::Equity => "equity",
            InstrumentType::Fund => "fund",
        }
    }

    pub fn parse(s: &str) -> Result<Self, String> {
        match s {
            "equity" => Ok(InstrumentType::Equity),
            "fund" => Ok(InstrumentType::Fund),
            other => Err(format!("Unknown instrument type: {}", other)),
        }
    }
}

/// A tradable symbol in the universe.
///
/// Symbols are created or reactivated by universe sync and flagged inactive
/// when absent from every source registry. They are never deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Symbol {
    pub ticker: String,
    pub name: Option<String>,
    pub instrument_type: InstrumentType,
    pub sector: Option<String>,
    pub industry: Option<String>,
    pub active: bool,
    pub first_seen_at: DateTime<Utc>,
    pub deactivated_at: Option<DateTime<Utc>>,
}

impl Symbol {
    pub fn new(ticker: impl Into<String>, instrument_type: InstrumentType) -> Self {
        Symbol {
            ticker: ticker.into(),
            name: None,
            instrument_type,
            sector: None,
            industry: None,
            active: true,
            first_seen_at: Utc::now(),
            deactivated_at: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_sector(mut self, sector: impl Into<String>) -> Self {
        self.sector = Some(sector.into());
        self
    }

    pub fn with_industry(mut self, industry: impl Into<String>) -> Self {
        self.industry = Some(industry.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_builder() {
        let symbol = Symbol::new("AAA", InstrumentType::Equity)
            .with_name("Alpha Corp")
            .with_sector("Technology")
            .with_industry("Software");

        assert_eq!(symbol.ticker, "AAA");
        assert_eq!(symbol.name.as_deref(), Some("Alpha Corp"));
        assert_eq!(symbol.sector.as_deref(), Some("Technology"));
        assert!(symbol.active);
        assert!(symbol.deactivated_at.is_none());
    }

    #[test]
    fn test_instrument_type_round_trip() {
        assert_eq!(
            InstrumentType::parse(InstrumentType::Equity.as_str()).unwrap(),
            InstrumentType::Equity
        );
        assert_eq!(
            InstrumentType::parse(InstrumentType::Fund.as_str()).unwrap(),
            InstrumentType::Fund
        );
        assert!(InstrumentType::parse("bond").is_err());
    }
}
