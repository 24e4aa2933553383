//! The `email` messenger backend

use super::assemble::assemble;
use super::selector::ServerSelector;
use super::server::ServerPool;
use crate::messenger::{Messenger, MessengerError};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};
use txmail_common::config::SmtpServerConfig;
use txmail_common::{Error, Message, Result};

/// Delivers messages over SMTP through the configured servers
pub struct Emailer {
    selector: ServerSelector,
    closed: AtomicBool,
}

impl Emailer {
    pub const NAME: &'static str = "email";

    /// Build one pool per enabled server. Disabled servers are skipped.
    pub fn new(configs: &[SmtpServerConfig]) -> Result<Self> {
        let mut servers = Vec::new();
        for config in configs {
            if !config.enabled {
                info!("Skipping disabled SMTP server {}", config.display_name());
                continue;
            }
            let server = ServerPool::new(config)?;
            info!(
                "Configured SMTP server {} (max {} connections)",
                server.name(),
                config.max_conns
            );
            servers.push(Arc::new(server));
        }

        if servers.is_empty() {
            return Err(Error::Config("no enabled SMTP servers".to_string()));
        }

        Ok(Self {
            selector: ServerSelector::new(servers),
            closed: AtomicBool::new(false),
        })
    }

    pub fn selector(&self) -> &ServerSelector {
        &self.selector
    }
}

#[async_trait]
impl Messenger for Emailer {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn push(&self, message: Message) -> std::result::Result<(), MessengerError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(MessengerError::Closed);
        }

        let server = self.selector.select(&message.from)?;
        let envelope = assemble(&message, server.headers())?;

        debug!(
            server = server.name(),
            envelope_from = %envelope.from,
            recipients = ?envelope.recipients,
            "Sending email"
        );
        server.send(envelope).await
    }

    async fn flush(&self) -> std::result::Result<(), MessengerError> {
        Ok(())
    }

    async fn close(&self) -> std::result::Result<(), MessengerError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        for server in self.selector.servers() {
            server.close().await;
        }
        Ok(())
    }
}
