//! Collaborators the engine pulls market inputs from.

use async_trait::async_trait;
use market_core::api::PriceFeedClient;

/// Current market price for a symbol.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn price(&self, symbol: &str) -> anyhow::Result<f64>;
}

/// Signal confidence for a symbol, 0-100.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ConfidenceSource: Send + Sync {
    async fn confidence(&self, symbol: &str) -> anyhow::Result<f64>;
}

#[async_trait]
impl PriceSource for PriceFeedClient {
    async fn price(&self, symbol: &str) -> anyhow::Result<f64> {
        Ok(self.get_price(symbol).await?)
    }
}

/// Reports the same confidence for every symbol.
///
/// For deployments without a scoring service.
#[derive(Debug, Clone, Copy)]
pub struct FixedConfidence(pub f64);

#[async_trait]
impl ConfidenceSource for FixedConfidence {
    async fn confidence(&self, _symbol: &str) -> anyhow::Result<f64> {
        Ok(self.0.clamp(0.0, 100.0))
    }
}
