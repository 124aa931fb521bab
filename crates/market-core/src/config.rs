//! Configuration management for the stop monitor.

use crate::{Error, Result};
use serde::Deserialize;
use std::env;

/// Application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub price_feed: PriceFeedConfig,
    pub confidence: ConfidenceConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PriceFeedConfig {
    pub url: Option<String>,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConfidenceConfig {
    /// Confidence reported when no scoring service is wired in (0-100).
    pub fixed_confidence: f64,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let fixed_confidence = env::var("STOP_FIXED_CONFIDENCE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(50.0);
        if !(0.0..=100.0).contains(&fixed_confidence) {
            return Err(Error::Config {
                message: format!(
                    "STOP_FIXED_CONFIDENCE must be within 0-100, got {}",
                    fixed_confidence
                ),
            });
        }

        Ok(Self {
            price_feed: PriceFeedConfig {
                url: env::var("PRICE_FEED_URL").ok(),
                timeout_secs: env::var("PRICE_FEED_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(10),
            },
            confidence: ConfidenceConfig { fixed_confidence },
        })
    }

    /// Load configuration for testing (with defaults).
    #[cfg(test)]
    pub fn test_config() -> Self {
        Self {
            price_feed: PriceFeedConfig {
                url: Some("http://127.0.0.1:18080".to_string()),
                timeout_secs: 2,
            },
            confidence: ConfidenceConfig {
                fixed_confidence: 50.0,
            },
        }
    }
}
