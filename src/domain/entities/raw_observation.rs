use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::errors::DataIntegrityError;
use crate::domain::value_objects::category::SourceCategory;

/// A raw time-series input keyed by (symbol, date, source category).
///
/// Append-only from the pipeline's point of view; re-ingesting the same key
/// on the same day upserts the payload rather than duplicating the row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawObservation {
    pub symbol: String,
    pub date: NaiveDate,
    pub source: SourceCategory,
    /// Source-specific raw fields, stored verbatim for auditability.
    pub payload: Value,
    pub ingested_at: DateTime<Utc>,
}

impl RawObservation {
    pub fn new(
        symbol: impl Into<String>,
        date: NaiveDate,
        source: SourceCategory,
        payload: Value,
    ) -> Self {
        RawObservation {
            symbol: symbol.into(),
            date,
            source,
            payload,
            ingested_at: Utc::now(),
        }
    }

    /// Typed view over a pricing payload.
    pub fn pricing(&self) -> Result<PricingFields, DataIntegrityError> {
        self.typed(SourceCategory::Pricing)
    }

    /// Typed view over a fundamentals payload.
    pub fn fundamentals(&self) -> Result<FundamentalFields, DataIntegrityError> {
        self.typed(SourceCategory::Fundamentals)
    }

    /// Typed view over an ownership payload.
    pub fn ownership(&self) -> Result<OwnershipFields, DataIntegrityError> {
        self.typed(SourceCategory::Ownership)
    }

    fn typed<T: for<'de> Deserialize<'de>>(
        &self,
        expected: SourceCategory,
    ) -> Result<T, DataIntegrityError> {
        if self.source != expected {
            return Err(DataIntegrityError::new(
                &self.symbol,
                format!("expected {} payload, found {}", expected, self.source),
            ));
        }
        serde_json::from_value(self.payload.clone()).map_err(|e| {
            DataIntegrityError::new(
                &self.symbol,
                format!("malformed {} payload: {}", expected, e),
            )
        })
    }
}

/// Daily pricing fields. `close` is required downstream; everything else is
/// optional and excluded from sub-metrics when absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PricingFields {
    #[serde(default)]
    pub close: Option<f64>,
    #[serde(default)]
    pub volume: Option<f64>,
}

/// Trailing financial-statement line items per share or in aggregate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FundamentalFields {
    #[serde(default)]
    pub eps_ttm: Option<f64>,
    #[serde(default)]
    pub eps_prior_ttm: Option<f64>,
    #[serde(default)]
    pub revenue_ttm: Option<f64>,
    #[serde(default)]
    pub revenue_prior_ttm: Option<f64>,
    #[serde(default)]
    pub book_value_per_share: Option<f64>,
    #[serde(default)]
    pub operating_cash_flow_per_share: Option<f64>,
    #[serde(default)]
    pub net_income_ttm: Option<f64>,
    #[serde(default)]
    pub shareholder_equity: Option<f64>,
    #[serde(default)]
    pub total_debt: Option<f64>,
    #[serde(default)]
    pub gross_margin: Option<f64>,
}

/// Ownership and analyst-action fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OwnershipFields {
    #[serde(default)]
    pub institutional_ownership_change: Option<f64>,
    #[serde(default)]
    pub insider_net_shares: Option<f64>,
    #[serde(default)]
    pub short_interest_pct: Option<f64>,
    #[serde(default)]
    pub analyst_upgrades: Option<f64>,
    #[serde(default)]
    pub analyst_downgrades: Option<f64>,
    #[serde(default)]
    pub analyst_target_change_pct: Option<f64>,
}
