//! Transactional dispatch pipeline

use super::queue::{QueuedMessage, SendQueue};
use super::request::TxRequest;
use crate::messenger::MessengerRegistry;
use crate::store::{AddressSanitizer, EmailSanitizer, SubscriberStore, TemplateStore};
use crate::template::{CompiledTemplate, TemplateCache, TemplateFuncs};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};
use txmail_common::config::AppConfig;
use txmail_common::types::{SubscriberId, TemplateId};
use txmail_common::{Error, Message, Result, Subscriber};

/// How a rendered message is handed to its messenger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// Push and wait for the backend's result
    Sync,
    /// Enqueue for the background worker
    Queued,
}

#[derive(Serialize)]
struct RenderContext<'a> {
    subscriber: &'a Subscriber,
    tx: TxContext<'a>,
}

#[derive(Serialize)]
struct TxContext<'a> {
    data: &'a serde_json::Map<String, serde_json::Value>,
    subject: &'a str,
    body: &'a str,
}

/// Validates requests, renders templates and hands messages to messengers
pub struct DispatchPipeline {
    templates: Arc<dyn TemplateStore>,
    subscribers: Arc<dyn SubscriberStore>,
    sanitizer: Arc<dyn EmailSanitizer>,
    registry: Arc<MessengerRegistry>,
    queue: Option<SendQueue>,
    cache: TemplateCache,
    funcs: Arc<TemplateFuncs>,
    default_from: String,
    default_messenger: String,
}

impl DispatchPipeline {
    pub fn new(
        templates: Arc<dyn TemplateStore>,
        subscribers: Arc<dyn SubscriberStore>,
        registry: Arc<MessengerRegistry>,
        app: &AppConfig,
    ) -> Self {
        Self {
            templates,
            subscribers,
            sanitizer: Arc::new(AddressSanitizer),
            registry,
            queue: None,
            cache: TemplateCache::new(),
            funcs: Arc::new(TemplateFuncs::with_defaults()),
            default_from: app.from_email.clone(),
            default_messenger: app.default_messenger.clone(),
        }
    }

    /// Enable [`DispatchMode::Queued`]
    pub fn with_queue(mut self, queue: SendQueue) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn with_sanitizer(mut self, sanitizer: Arc<dyn EmailSanitizer>) -> Self {
        self.sanitizer = sanitizer;
        self
    }

    /// Replace the template function registry
    pub fn with_funcs(mut self, funcs: TemplateFuncs) -> Self {
        self.funcs = Arc::new(funcs);
        self
    }

    pub fn registry(&self) -> &Arc<MessengerRegistry> {
        &self.registry
    }

    pub fn cache(&self) -> &TemplateCache {
        &self.cache
    }

    /// Render `request` and deliver it through the requested messenger
    pub async fn dispatch(&self, request: TxRequest, mode: DispatchMode) -> Result<()> {
        let template_id = request.template_id;
        let (messenger, message) = self.prepare(request).await?;

        match mode {
            DispatchMode::Sync => {
                let backend = self.registry.get(&messenger)?;
                backend.push(message).await?;
            }
            DispatchMode::Queued => {
                let queue = self.queue.as_ref().ok_or_else(|| {
                    Error::Internal("asynchronous dispatch is not enabled".to_string())
                })?;
                queue.enqueue(QueuedMessage { messenger: messenger.clone(), message }).await?;
            }
        }

        info!(template_id, messenger = %messenger, mode = ?mode, "Dispatched transactional message");
        Ok(())
    }

    /// Validate, resolve and render; returns the messenger name and the message
    pub async fn prepare(&self, request: TxRequest) -> Result<(String, Message)> {
        if !request.has_subscriber() {
            return Err(Error::Validation(
                "missing subscriber_email or subscriber_id".to_string(),
            ));
        }

        let email = if request.subscriber_email.trim().is_empty() {
            String::new()
        } else {
            self.sanitizer.sanitize(&request.subscriber_email)?
        };

        let from = match request.from_email.trim() {
            "" => self.default_from.clone(),
            from => from.to_string(),
        };

        let messenger = match request.messenger.trim() {
            "" => self.default_messenger.clone(),
            name => name.to_string(),
        };
        if !self.registry.contains(&messenger) {
            return Err(Error::Validation(format!("invalid messenger: {}", messenger)));
        }

        let attachments = request.decode_attachments()?;

        let template = self.resolve_template(request.template_id).await?;
        let subscriber = self
            .resolve_subscriber(request.subscriber_id, &email)
            .await?;

        let ctx = RenderContext {
            subscriber: &subscriber,
            tx: TxContext {
                data: &request.data,
                subject: &request.subject,
                body: &request.body,
            },
        };
        let rendered = template.render(&ctx).map_err(|e| {
            Error::Validation(format!(
                "error rendering template {}: {}",
                request.template_id, e
            ))
        })?;

        let subject = if request.subject.is_empty() {
            rendered.subject
        } else {
            request.subject
        };

        let message = Message {
            to: vec![subscriber.email.clone()],
            from,
            subject,
            content_type: request.content_type.unwrap_or_default(),
            body: rendered.body,
            alt_body: rendered.alt_body,
            headers: request.headers,
            attachments,
            subscriber: Some(subscriber),
        };

        Ok((messenger, message))
    }

    /// Compiled template, recompiling when the store has a newer version
    pub async fn resolve_template(&self, id: TemplateId) -> Result<Arc<CompiledTemplate>> {
        let meta = self.templates.get(id, true).await?;

        if let Some(compiled) = self.cache.get_fresh(id, meta.updated_at).await {
            return Ok(compiled);
        }

        let template = self.templates.get(id, false).await?;
        let compiled = CompiledTemplate::compile(&template, &self.funcs)
            .map_err(|e| Error::Validation(format!("error compiling template {}: {}", id, e)))?;
        let compiled = Arc::new(compiled);

        self.cache.put(id, compiled.clone()).await;
        debug!(template_id = id, updated_at = %template.updated_at, "Compiled template");

        Ok(compiled)
    }

    async fn resolve_subscriber(&self, id: SubscriberId, email: &str) -> Result<Subscriber> {
        match self.subscribers.get(id, "", email).await {
            Ok(subscriber) => Ok(subscriber),
            Err(Error::NotFound(_)) if !email.is_empty() => {
                debug!("Subscriber {} not found, using a synthetic one", email);
                Ok(Subscriber::synthetic(email))
            }
            Err(e) => Err(e),
        }
    }
}
