//! One configured outbound SMTP server

use crate::messenger::MessengerError;
use crate::smtp::{Endpoint, Envelope, PoolSettings, SmtpPool};
use txmail_common::config::SmtpServerConfig;
use txmail_common::{Headers, Result};

/// Outbound server with its sender filter, static headers and connection pool
pub struct ServerPool {
    name: String,
    allowed_from: Vec<String>,
    headers: Headers,
    pool: SmtpPool,
}

impl ServerPool {
    pub fn new(config: &SmtpServerConfig) -> Result<Self> {
        let endpoint = Endpoint::from_config(config)?;

        Ok(Self {
            name: config.display_name(),
            allowed_from: config
                .allowed_from_addresses
                .iter()
                .map(|a| a.trim().to_string())
                .filter(|a| !a.is_empty())
                .collect(),
            headers: config.email_headers.clone(),
            pool: SmtpPool::new(endpoint, PoolSettings::from(config)),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Headers added to every message sent through this server
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn pool(&self) -> &SmtpPool {
        &self.pool
    }

    pub fn allows_from_address(&self, address: &str) -> bool {
        allows_from_address(&self.allowed_from, address)
    }

    pub async fn send(&self, envelope: Envelope) -> std::result::Result<(), MessengerError> {
        self.pool
            .send(envelope)
            .await
            .map_err(|e| MessengerError::smtp(&self.name, e))
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Whether `address` passes the allow-list.
///
/// An empty list allows everything. Otherwise an entry must equal either
/// the full address or its domain, ignoring ASCII case.
pub fn allows_from_address(allowed: &[String], address: &str) -> bool {
    if allowed.is_empty() {
        return true;
    }

    let domain = address.rsplit_once('@').map(|(_, domain)| domain);
    allowed.iter().any(|entry| {
        entry.eq_ignore_ascii_case(address)
            || domain.is_some_and(|domain| entry.eq_ignore_ascii_case(domain))
    })
}
