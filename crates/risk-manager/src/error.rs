//! Error types for the trailing-stop engine.

use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum StopError {
    #[error("Position {0} is not tracked")]
    NotFound(Uuid),

    #[error("Position {0} is already tracked")]
    AlreadyTracked(Uuid),

    #[error("Invalid stop price for position {position_id}: {stop_price}")]
    InvalidStop { position_id: Uuid, stop_price: f64 },

    #[error("Invalid engine configuration: {message}")]
    InvalidConfig { message: String },

    #[error("Collaborator error for {symbol}: {message}")]
    Collaborator { symbol: String, message: String },
}

impl StopError {
    pub(crate) fn collaborator(symbol: &str, err: impl std::fmt::Display) -> Self {
        StopError::Collaborator {
            symbol: symbol.to_string(),
            message: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, StopError>;
