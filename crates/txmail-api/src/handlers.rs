//! API request handlers

pub mod health;
pub mod tx;

pub use health::*;
