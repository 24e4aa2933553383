//! txmail API - HTTP entry points for transactional dispatch
//!
//! Exposes queued and synchronous send endpoints plus health checks on top
//! of a shared [`txmail_core::DispatchPipeline`].

pub mod error;
pub mod handlers;
pub mod routes;

pub use error::ApiError;
pub use routes::{create_router, AppState};
