//! HTTP price-feed client.
//!
//! Fetches the latest traded price for a symbol from a REST endpoint of the
//! form `GET {base_url}/price/{symbol}` returning a [`PriceQuote`].

use crate::types::PriceQuote;
use crate::{Error, Result};
use std::time::Duration as StdDuration;
use tracing::{debug, warn};

/// REST client for the market-data price endpoint.
pub struct PriceFeedClient {
    base_url: String,
    http_client: reqwest::Client,
}

impl PriceFeedClient {
    /// Default price feed base URL.
    pub const DEFAULT_BASE_URL: &'static str = "http://127.0.0.1:8080";

    /// Maximum retry attempts for API calls.
    const MAX_RETRIES: u32 = 3;

    pub fn new(base_url: Option<String>, timeout_secs: u64) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(StdDuration::from_secs(timeout_secs))
            .connect_timeout(StdDuration::from_secs(5))
            .build()?;
        let base_url = base_url
            .unwrap_or_else(|| Self::DEFAULT_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        Ok(Self {
            base_url,
            http_client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// URL of the price endpoint for a symbol.
    pub fn price_url(&self, symbol: &str) -> String {
        format!("{}/price/{}", self.base_url, symbol)
    }

    /// Execute an HTTP GET with retry and exponential backoff.
    ///
    /// Retries on 5xx server errors and 429 rate-limit responses. All other
    /// 4xx errors fail immediately.
    async fn get_with_retry(&self, url: &str) -> Result<reqwest::Response> {
        let mut last_error = None;

        for attempt in 0..Self::MAX_RETRIES {
            match self.http_client.get(url).send().await {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response)
                    if response.status().as_u16() == 429 || response.status().is_server_error() =>
                {
                    let status = response.status();
                    let is_rate_limited = status.as_u16() == 429;
                    warn!(
                        attempt = attempt + 1,
                        status = %status,
                        url = url,
                        rate_limited = is_rate_limited,
                        "Retryable price feed error, backing off"
                    );
                    last_error = Some(Error::Api {
                        message: format!(
                            "{}: {}",
                            if is_rate_limited {
                                "Rate limited"
                            } else {
                                "Server error"
                            },
                            status
                        ),
                        status: Some(status.as_u16()),
                    });
                }
                Ok(response) => {
                    return Err(Error::Api {
                        message: format!("API error: {}", response.status()),
                        status: Some(response.status().as_u16()),
                    });
                }
                Err(e) => {
                    warn!(
                        attempt = attempt + 1,
                        error = %e,
                        url = url,
                        "Price feed request failed, backing off"
                    );
                    last_error = Some(Error::Http(e));
                }
            }

            if attempt + 1 < Self::MAX_RETRIES {
                // 250ms, 500ms, 1s
                let backoff = StdDuration::from_millis(250 * 2u64.pow(attempt));
                tokio::time::sleep(backoff).await;
            }
        }

        Err(last_error.unwrap_or(Error::Api {
            message: "Max retries exceeded".to_string(),
            status: None,
        }))
    }

    /// Fetch the latest quote for a symbol.
    pub async fn get_quote(&self, symbol: &str) -> Result<PriceQuote> {
        let url = self.price_url(symbol);
        let response = self.get_with_retry(&url).await?;
        let body = response.text().await?;
        let quote: PriceQuote = serde_json::from_str(&body)?;

        if !quote.price.is_finite() || quote.price <= 0.0 {
            return Err(Error::InvalidPrice {
                symbol: symbol.to_string(),
                value: quote.price.to_string(),
            });
        }

        debug!(symbol = symbol, price = quote.price, "Fetched price quote");
        Ok(quote)
    }

    /// Fetch just the latest price for a symbol.
    pub async fn get_price(&self, symbol: &str) -> Result<f64> {
        Ok(self.get_quote(symbol).await?.price)
    }
}
