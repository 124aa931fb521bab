//! Core domain types shared across the workspace.

pub mod market;
pub mod position;

pub use market::*;
pub use position::*;
