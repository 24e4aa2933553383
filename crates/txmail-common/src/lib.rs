//! txmail Common - Shared types and utilities
//!
//! This crate provides the message model, configuration, and error types
//! shared across all txmail components.

pub mod config;
pub mod error;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
pub use types::{Attachment, ContentType, Headers, Message, Subscriber, Template};
