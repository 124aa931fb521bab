//! Market Core Library
//!
//! Shared position types, the price-feed client, and environment configuration
//! for the adaptive trailing-stop engine.

pub mod api;
pub mod config;
pub mod error;
pub mod types;

pub use error::{Error, Result};
