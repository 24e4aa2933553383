//! txmail - transactional mail service entry point

use anyhow::{Context, Result};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use txmail_common::config::{Config, LoggingConfig};
use txmail_common::Template;
use txmail_core::{
    DispatchPipeline, Emailer, MemorySubscriberStore, MemoryTemplateStore, MessengerRegistry,
    SendQueue,
};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load().context("Failed to load configuration")?;

    init_logging(&config.logging);

    info!("Starting txmail...");

    // Seed the in-memory stores
    let templates = Arc::new(MemoryTemplateStore::new());
    for seed in &config.templates {
        templates
            .insert(Template {
                id: seed.id,
                name: seed.name.clone(),
                updated_at: Utc::now(),
                subject: seed.subject.clone(),
                body: seed.load_body()?,
                alt_body: seed.alt_body.clone(),
            })
            .await;
    }
    info!("Loaded {} templates", config.templates.len());

    let subscribers = Arc::new(MemorySubscriberStore::new());
    for subscriber in &config.subscribers {
        subscribers.insert(subscriber.clone()).await;
    }
    info!("Loaded {} subscribers", config.subscribers.len());

    // Messenger backends
    let mut registry = MessengerRegistry::new();
    registry.register(Arc::new(Emailer::new(&config.smtp)?))?;
    let registry = Arc::new(registry);
    info!("Registered messengers: {}", registry.names().join(", "));

    // Send queue and its worker
    let (queue, worker) = SendQueue::new(&config.queue, registry.clone());
    let (stop_worker, worker_stopped) = oneshot::channel::<()>();
    let worker_handle = tokio::spawn(worker.run(async move {
        let _ = worker_stopped.await;
    }));

    let pipeline = Arc::new(
        DispatchPipeline::new(templates, subscribers, registry.clone(), &config.app)
            .with_queue(queue),
    );

    // API server
    let app = txmail_api::create_router(pipeline);
    let listener = tokio::net::TcpListener::bind(config.api.bind.as_str())
        .await
        .with_context(|| format!("Failed to bind API server to {}", config.api.bind))?;
    info!("Starting API server on {}", config.api.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("API server error")?;

    // Drain queued messages, then release SMTP connections
    let _ = stop_worker.send(());
    if let Err(e) = worker_handle.await {
        warn!("Send queue worker ended abnormally: {}", e);
    }
    registry.close_all().await;

    info!("txmail shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.level));

    let registry = tracing_subscriber::registry().with(filter);

    if config.format.eq_ignore_ascii_case("json") {
        registry
            .with(fmt::layer().json().with_target(true).with_level(true))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_level(true))
            .init();
    }
}
