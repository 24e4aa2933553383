//! Bounded SMTP connection pool
//!
//! At most `max_conns` sessions are in use at once. A send waits up to
//! `wait_timeout` for a free slot and fails with [`SmtpError::PoolTimeout`]
//! otherwise. Sessions are kept for reuse until `idle_timeout` elapses.

use super::client::{Endpoint, SmtpClient};
use super::error::{SmtpError, SmtpResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, warn};
use txmail_common::config::SmtpServerConfig;

/// Pool sizing
#[derive(Debug, Clone, Copy)]
pub struct PoolSettings {
    pub max_conns: usize,
    pub wait_timeout: Duration,
    pub idle_timeout: Duration,
}

impl From<&SmtpServerConfig> for PoolSettings {
    fn from(config: &SmtpServerConfig) -> Self {
        Self {
            max_conns: config.max_conns.max(1),
            wait_timeout: config.wait_timeout(),
            idle_timeout: config.idle_timeout(),
        }
    }
}

/// Envelope and formatted content of one outgoing email
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub from: String,
    pub recipients: Vec<String>,
    pub data: Vec<u8>,
}

struct IdleConn {
    client: SmtpClient,
    since: Instant,
}

struct PoolInner {
    endpoint: Endpoint,
    settings: PoolSettings,
    slots: Arc<Semaphore>,
    idle: Mutex<Vec<IdleConn>>,
    closed: AtomicBool,
}

/// Connection pool for one server; cheap to clone
#[derive(Clone)]
pub struct SmtpPool {
    inner: Arc<PoolInner>,
}

impl SmtpPool {
    pub fn new(endpoint: Endpoint, settings: PoolSettings) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                slots: Arc::new(Semaphore::new(settings.max_conns)),
                endpoint,
                settings,
                idle: Mutex::new(Vec::new()),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.inner.endpoint
    }

    /// Number of sessions parked for reuse
    pub fn idle_count(&self) -> usize {
        self.inner.idle.lock().map(|idle| idle.len()).unwrap_or(0)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Deliver one email.
    ///
    /// The transaction runs in its own task and completes even if the
    /// caller stops waiting for it.
    pub async fn send(&self, envelope: Envelope) -> SmtpResult<()> {
        if self.is_closed() {
            return Err(SmtpError::Closed);
        }

        let wait = self.inner.settings.wait_timeout;
        let permit = match tokio::time::timeout(wait, self.inner.slots.clone().acquire_owned()).await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(SmtpError::Closed),
            Err(_) => return Err(SmtpError::PoolTimeout(wait)),
        };

        let inner = self.inner.clone();
        let task = tokio::spawn(async move {
            let result = inner.deliver(&envelope).await;
            drop(permit);
            result
        });

        task.await
            .map_err(|e| SmtpError::Protocol(format!("Delivery task failed: {}", e)))?
    }

    /// Stop handing out sessions and QUIT the idle ones. Idempotent.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.slots.close();

        let idle: Vec<IdleConn> = match self.inner.idle.lock() {
            Ok(mut idle) => idle.drain(..).collect(),
            Err(_) => Vec::new(),
        };
        debug!(
            "Closing pool for {} ({} idle sessions)",
            self.inner.endpoint.address(),
            idle.len()
        );
        for conn in idle {
            conn.client.quit().await;
        }
    }
}

impl PoolInner {
    async fn deliver(&self, envelope: &Envelope) -> SmtpResult<()> {
        let mut retried = false;

        loop {
            let (mut client, reused) = match self.take_idle() {
                Some(client) => (client, true),
                None => (SmtpClient::connect(&self.endpoint).await?, false),
            };

            match client
                .send(&envelope.from, &envelope.recipients, &envelope.data)
                .await
            {
                Ok(()) => {
                    self.release(client).await;
                    return Ok(());
                }
                Err(e) if reused && !retried && e.is_connection_error() => {
                    debug!(
                        "Reused session to {} failed ({}), retrying on a new one",
                        self.endpoint.address(),
                        e
                    );
                    retried = true;
                }
                Err(e) => {
                    if !e.is_connection_error() && client.reset().await.is_ok() {
                        self.release(client).await;
                    }
                    return Err(e);
                }
            }
        }
    }

    fn take_idle(&self) -> Option<SmtpClient> {
        let mut idle = self.idle.lock().ok()?;
        while let Some(conn) = idle.pop() {
            if conn.since.elapsed() < self.settings.idle_timeout {
                return Some(conn.client);
            }
            // Expired; dropping closes the socket
        }
        None
    }

    async fn release(&self, client: SmtpClient) {
        if self.closed.load(Ordering::Acquire) {
            client.quit().await;
            return;
        }

        match self.idle.lock() {
            Ok(mut idle) => idle.push(IdleConn {
                client,
                since: Instant::now(),
            }),
            Err(_) => warn!("Idle list poisoned, dropping session"),
        }
    }
}
