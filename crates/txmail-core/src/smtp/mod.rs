//! Outbound SMTP: protocol client, authentication and connection pooling

mod auth;
mod client;
mod error;
mod pool;
mod reply;
mod tls;

pub use auth::{cram_md5_response, plain_payload};
pub use client::{Endpoint, SmtpClient};
pub use error::{SmtpError, SmtpResult};
pub use pool::{Envelope, PoolSettings, SmtpPool};
pub use reply::{Capabilities, Reply};
pub use tls::create_tls_connector;
