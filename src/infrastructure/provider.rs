use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::entities::symbol::InstrumentType;
use crate::domain::errors::ProviderError;

/// Inclusive date range requested from a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        DateRange { start, end }
    }

    /// Range ending at `end`, reaching back `days` calendar days.
    pub fn trailing(end: NaiveDate, days: u32) -> Self {
        DateRange {
            start: end - chrono::Duration::days(days as i64),
            end,
        }
    }
}

/// One listing row from a symbol registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listing {
    pub ticker: String,
    #[serde(default)]
    pub name: Option<String>,
    pub instrument_type: InstrumentType,
    #[serde(default)]
    pub sector: Option<String>,
    #[serde(default)]
    pub industry: Option<String>,
}

/// One provider-native record, already keyed the way raw observations are.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderRecord {
    pub symbol: String,
    pub date: NaiveDate,
    pub fields: Value,
}

/// Canonical symbol list source. The universe sync stage consults one or
/// more of these.
#[async_trait]
pub trait SymbolRegistryProvider: Send + Sync {
    fn provider_id(&self) -> &str;

    async fn fetch_listings(&self) -> Result<Vec<Listing>, ProviderError>;
}

/// Time-series observation source for one source category. The core never
/// assumes anything about the wire format beyond this contract.
#[async_trait]
pub trait ObservationProvider: Send + Sync {
    fn provider_id(&self) -> &str;

    async fn fetch(
        &self,
        symbols: &[String],
        range: DateRange,
    ) -> Result<Vec<ProviderRecord>, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trailing_range() {
        let end: NaiveDate = "2026-08-07".parse().unwrap();
        let range = DateRange::trailing(end, 30);
        assert_eq!(range.end, end);
        assert_eq!(range.start, "2026-07-08".parse::<NaiveDate>().unwrap());
    }

    #[test]
    fn test_listing_deserializes_with_missing_optionals() {
        let listing: Listing = serde_json::from_value(serde_json::json!({
            "ticker": "AAA",
            "instrument_type": "equity"
        }))
        .unwrap();
        assert_eq!(listing.ticker, "AAA");
        assert_eq!(listing.sector, None);
    }
}
