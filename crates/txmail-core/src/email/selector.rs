//! Sender-based server selection

use super::server::ServerPool;
use crate::messenger::MessengerError;
use lettre::message::Mailbox;
use rand::seq::SliceRandom;
use std::sync::Arc;

/// Picks a server permitted to send for a given From address
pub struct ServerSelector {
    servers: Vec<Arc<ServerPool>>,
}

impl ServerSelector {
    pub fn new(servers: Vec<Arc<ServerPool>>) -> Self {
        Self { servers }
    }

    pub fn servers(&self) -> &[Arc<ServerPool>] {
        &self.servers
    }

    /// Servers whose allow-list admits the bare `address`
    pub fn candidates(&self, address: &str) -> Vec<&Arc<ServerPool>> {
        self.servers
            .iter()
            .filter(|server| server.allows_from_address(address))
            .collect()
    }

    /// Parse `from` (`Name <a@b>` or `a@b`) and choose uniformly among the candidates
    pub fn select(&self, from: &str) -> Result<Arc<ServerPool>, MessengerError> {
        let mailbox: Mailbox = from
            .trim()
            .parse()
            .map_err(|_| MessengerError::InvalidFromAddress(from.to_string()))?;
        let address = mailbox.email.to_string();

        self.candidates(&address)
            .choose(&mut rand::thread_rng())
            .map(|server| Arc::clone(server))
            .ok_or(MessengerError::NoApplicableServer(address))
    }
}
