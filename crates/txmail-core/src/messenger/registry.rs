//! Name to backend lookup

use super::Messenger;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};
use txmail_common::{Error, Result};

/// Registered messenger backends, built once at startup
#[derive(Default)]
pub struct MessengerRegistry {
    backends: HashMap<String, Arc<dyn Messenger>>,
    closed: AtomicBool,
}

impl MessengerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a backend under its own name
    pub fn register(&mut self, messenger: Arc<dyn Messenger>) -> Result<()> {
        let name = messenger.name().to_string();
        if self.backends.contains_key(&name) {
            return Err(Error::Config(format!(
                "messenger '{}' is already registered",
                name
            )));
        }
        info!("Registered messenger {}", name);
        self.backends.insert(name, messenger);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Messenger>> {
        self.backends
            .get(name)
            .cloned()
            .ok_or_else(|| Error::Validation(format!("invalid messenger: {}", name)))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.backends.contains_key(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.backends.keys().cloned().collect();
        names.sort();
        names
    }

    /// Close every backend once; failures are logged, not returned
    pub async fn close_all(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        for (name, messenger) in &self.backends {
            if let Err(e) = messenger.flush().await {
                warn!("Failed to flush messenger {}: {}", name, e);
            }
            match messenger.close().await {
                Ok(()) => info!("Closed messenger {}", name),
                Err(e) => warn!("Failed to close messenger {}: {}", name, e),
            }
        }
    }
}
