//! Error types for the market data layer.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Invalid price for {symbol}: {value}")]
    InvalidPrice { symbol: String, value: String },

    #[error("API error: {message}")]
    Api { message: String, status: Option<u16> },
}

pub type Result<T> = std::result::Result<T, Error>;
