//! SMTP client and pool errors

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SmtpError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Server replied {code}: {message}")]
    Rejected { code: u16, message: String },

    #[error("No free connection within {0:?}")]
    PoolTimeout(Duration),

    #[error("Connection pool is closed")]
    Closed,
}

pub type SmtpResult<T> = std::result::Result<T, SmtpError>;

impl SmtpError {
    pub(crate) fn rejected(code: u16, message: impl Into<String>) -> Self {
        SmtpError::Rejected {
            code,
            message: message.into(),
        }
    }

    /// The connection is unusable after this error
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            SmtpError::Io(_) | SmtpError::Timeout(_) | SmtpError::Protocol(_)
        )
    }

    /// Permanent (5xx) rejection by the server
    pub fn is_permanent(&self) -> bool {
        matches!(self, SmtpError::Rejected { code, .. } if *code >= 500)
    }
}
