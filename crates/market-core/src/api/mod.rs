//! API clients for external services.

pub mod price_feed;

pub use price_feed::PriceFeedClient;
