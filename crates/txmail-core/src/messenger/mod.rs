//! Messenger backends and their registry

mod registry;

pub use registry::MessengerRegistry;

use crate::smtp::SmtpError;
use async_trait::async_trait;
use thiserror::Error;
use txmail_common::Message;

/// How a failed push should be reported to the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Temporary lack of capacity; the caller may retry
    RateLimited,
    /// The request itself cannot be delivered as given
    Validation,
    /// The backend or the remote server failed
    Delivery,
}

/// Error returned by a messenger backend
#[derive(Debug, Error)]
pub enum MessengerError {
    #[error("invalid from address '{0}'")]
    InvalidFromAddress(String),

    #[error("no SMTP server allowed to send from '{0}'")]
    NoApplicableServer(String),

    #[error("timed out waiting for a free connection to {server}")]
    PoolTimeout { server: String },

    #[error("failed to build message: {0}")]
    Assembly(String),

    #[error("messenger is closed")]
    Closed,

    #[error("delivery via {server} failed: {source}")]
    Smtp {
        server: String,
        #[source]
        source: SmtpError,
    },

    #[error("{message}")]
    Backend { class: FailureClass, message: String },
}

impl MessengerError {
    /// Wrap an SMTP error, lifting pool exhaustion into its own variant
    pub fn smtp(server: impl Into<String>, source: SmtpError) -> Self {
        let server = server.into();
        match source {
            SmtpError::PoolTimeout(_) => MessengerError::PoolTimeout { server },
            SmtpError::Closed => MessengerError::Closed,
            source => MessengerError::Smtp { server, source },
        }
    }

    pub fn class(&self) -> FailureClass {
        match self {
            MessengerError::InvalidFromAddress(_) | MessengerError::NoApplicableServer(_) => {
                FailureClass::Validation
            }
            MessengerError::PoolTimeout { .. } => FailureClass::RateLimited,
            MessengerError::Backend { class, .. } => *class,
            MessengerError::Assembly(_) | MessengerError::Closed | MessengerError::Smtp { .. } => {
                FailureClass::Delivery
            }
        }
    }
}

impl From<MessengerError> for txmail_common::Error {
    fn from(err: MessengerError) -> Self {
        let message = err.to_string();
        match err.class() {
            FailureClass::RateLimited => txmail_common::Error::RateLimited(message),
            FailureClass::Validation => txmail_common::Error::Validation(message),
            FailureClass::Delivery => txmail_common::Error::Delivery(message),
        }
    }
}

/// A named message transport
#[async_trait]
pub trait Messenger: Send + Sync {
    /// Name requests use to select this backend
    fn name(&self) -> &str;

    /// Deliver one message
    async fn push(&self, message: Message) -> Result<(), MessengerError>;

    /// Flush anything buffered
    async fn flush(&self) -> Result<(), MessengerError>;

    /// Release resources; further pushes fail
    async fn close(&self) -> Result<(), MessengerError>;
}
