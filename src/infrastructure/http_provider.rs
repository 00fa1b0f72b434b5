use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::debug;

use crate::domain::errors::ProviderError;
use crate::infrastructure::provider::{
    DateRange, Listing, ObservationProvider, ProviderRecord, SymbolRegistryProvider,
};

/// Configuration for one JSON HTTP data source.
#[derive(Debug, Clone)]
pub struct HttpProviderConfig {
    pub provider_id: String,
    pub base_url: String,
    pub call_timeout: Duration,
}

/// Thin JSON adapter over one external data source.
///
/// Expects `GET {base}/listings` for registries and
/// `GET {base}/observations?symbols=A,B&start=…&end=…` for time series. All
/// throttling, retry, and circuit policy lives in the access guard; this
/// adapter only maps transport and status codes onto [`ProviderError`].
pub struct HttpDataProvider {
    config: HttpProviderConfig,
    client: Client,
}

impl HttpDataProvider {
    pub fn new(config: HttpProviderConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(config.call_timeout)
            .build()
            .map_err(|e| ProviderError::Unreachable(e.to_string()))?;
        Ok(HttpDataProvider { config, client })
    }

    async fn get_json<T: for<'de> serde::Deserialize<'de>>(
        &self,
        url: &str,
    ) -> Result<T, ProviderError> {
        debug!(provider = %self.config.provider_id, url = %url, "Fetching from provider");

        let response = self.client.get(url).send().await.map_err(map_transport)?;
        match response.status() {
            status if status.is_success() => {
                response
                    .json::<T>()
                    .await
                    .map_err(|e| ProviderError::Malformed(e.to_string()))
            }
            StatusCode::TOO_MANY_REQUESTS => Err(ProviderError::RateLimited),
            StatusCode::NOT_FOUND => Err(ProviderError::NotFound(url.to_string())),
            status if status.is_server_error() => Err(ProviderError::Server {
                status: status.as_u16(),
            }),
            status => Err(ProviderError::Malformed(format!(
                "unexpected status {}",
                status
            ))),
        }
    }
}

fn map_transport(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout
    } else {
        ProviderError::Unreachable(e.to_string())
    }
}

#[async_trait]
impl SymbolRegistryProvider for HttpDataProvider {
    fn provider_id(&self) -> &str {
        &self.config.provider_id
    }

    async fn fetch_listings(&self) -> Result<Vec<Listing>, ProviderError> {
        let url = format!("{}/listings", self.config.base_url);
        self.get_json(&url).await
    }
}

#[async_trait]
impl ObservationProvider for HttpDataProvider {
    fn provider_id(&self) -> &str {
        &self.config.provider_id
    }

    async fn fetch(
        &self,
        symbols: &[String],
        range: DateRange,
    ) -> Result<Vec<ProviderRecord>, ProviderError> {
        let url = format!(
            "{}/observations?symbols={}&start={}&end={}",
            self.config.base_url,
            symbols.join(","),
            range.start,
            range.end
        );
        self.get_json(&url).await
    }
}
