//! Bounded send queue for asynchronous dispatch

use crate::messenger::MessengerRegistry;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use txmail_common::config::QueueConfig;
use txmail_common::{Error, Message, Result};

/// A rendered message waiting for its messenger
#[derive(Debug)]
pub struct QueuedMessage {
    pub messenger: String,
    pub message: Message,
}

/// Producer side of the queue
#[derive(Debug, Clone)]
pub struct SendQueue {
    tx: mpsc::Sender<QueuedMessage>,
    wait_timeout: Duration,
}

impl SendQueue {
    /// Create the queue and the worker that drains it
    pub fn new(config: &QueueConfig, registry: Arc<MessengerRegistry>) -> (Self, QueueWorker) {
        let (tx, rx) = mpsc::channel(config.capacity.max(1));
        let queue = Self {
            tx,
            wait_timeout: config.wait_timeout(),
        };
        let worker = QueueWorker {
            rx,
            registry,
            concurrency: config.concurrency.max(1),
        };
        (queue, worker)
    }

    /// Enqueue, waiting at most `wait_timeout` for free capacity
    pub async fn enqueue(&self, item: QueuedMessage) -> Result<()> {
        match self.tx.send_timeout(item, self.wait_timeout).await {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(_)) => Err(Error::RateLimited(
                "send queue is full, try again later".to_string(),
            )),
            Err(SendTimeoutError::Closed(_)) => {
                Err(Error::Internal("send queue is closed".to_string()))
            }
        }
    }

    /// Free slots right now
    pub fn available(&self) -> usize {
        self.tx.capacity()
    }
}

/// Consumer side; pushes queued messages with bounded concurrency
pub struct QueueWorker {
    rx: mpsc::Receiver<QueuedMessage>,
    registry: Arc<MessengerRegistry>,
    concurrency: usize,
}

impl QueueWorker {
    /// Run until `shutdown` resolves or every producer is gone, then
    /// deliver what is already queued and wait for in-flight pushes.
    pub async fn run<F>(mut self, shutdown: F)
    where
        F: Future<Output = ()> + Send,
    {
        let slots = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();
        tokio::pin!(shutdown);

        info!("Send queue worker started (concurrency {})", self.concurrency);

        loop {
            let item = tokio::select! {
                item = self.rx.recv() => item,
                _ = &mut shutdown => {
                    info!("Send queue closing, draining pending messages");
                    self.rx.close();
                    break;
                }
            };

            let Some(item) = item else {
                break;
            };
            self.spawn(item, &slots, &mut tasks).await;

            // Reap finished pushes so the set does not grow unbounded
            while tasks.try_join_next().is_some() {}
        }

        while let Some(item) = self.rx.recv().await {
            self.spawn(item, &slots, &mut tasks).await;
        }
        while tasks.join_next().await.is_some() {}

        info!("Send queue worker stopped");
    }

    async fn spawn(
        &self,
        item: QueuedMessage,
        slots: &Arc<Semaphore>,
        tasks: &mut JoinSet<()>,
    ) {
        let permit = match slots.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                error!("Send queue worker semaphore closed, dropping message");
                return;
            }
        };

        let registry = self.registry.clone();
        tasks.spawn(async move {
            let _permit = permit;
            let QueuedMessage { messenger, message } = item;
            let to = message.to.join(", ");

            let backend = match registry.get(&messenger) {
                Ok(backend) => backend,
                Err(e) => {
                    error!("Dropping queued message to {}: {}", to, e);
                    return;
                }
            };

            match backend.push(message).await {
                Ok(()) => debug!("Delivered queued message to {} via {}", to, messenger),
                Err(e) => warn!(
                    class = ?e.class(),
                    "Failed to deliver queued message to {} via {}: {}",
                    to,
                    messenger,
                    e
                ),
            }
        });
    }
}
