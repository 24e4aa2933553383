//! Template and subscriber stores, and the email sanitizer

use async_trait::async_trait;
use chrono::Utc;
use lettre::Address;
use std::collections::HashMap;
use tokio::sync::RwLock;
use txmail_common::types::{SubscriberId, TemplateId};
use txmail_common::{Error, Result, Subscriber, Template};
use uuid::Uuid;

/// Template store trait
#[async_trait]
pub trait TemplateStore: Send + Sync {
    /// Fetch a template; with `metadata_only` the sources are left empty
    async fn get(&self, id: TemplateId, metadata_only: bool) -> Result<Template>;
}

/// Subscriber store trait
#[async_trait]
pub trait SubscriberStore: Send + Sync {
    /// Look up by `id` when non-zero (and `key`, the subscriber uuid, when
    /// non-empty), else by `key`, else by `email`
    async fn get(&self, id: SubscriberId, key: &str, email: &str) -> Result<Subscriber>;
}

/// Normalizes and validates email addresses
pub trait EmailSanitizer: Send + Sync {
    fn sanitize(&self, raw: &str) -> Result<String>;
}

/// Accepts bare `local@domain` addresses, trimmed and lowercased
#[derive(Debug, Clone, Copy, Default)]
pub struct AddressSanitizer;

impl EmailSanitizer for AddressSanitizer {
    fn sanitize(&self, raw: &str) -> Result<String> {
        let email = raw.trim().to_lowercase();
        let invalid = || Error::Validation(format!("invalid email: {}", raw.trim()));

        let address: Address = email.parse().map_err(|_| invalid())?;
        if address.as_ref() != email {
            return Err(invalid());
        }
        Ok(email)
    }
}

/// In-memory template store
#[derive(Debug, Default)]
pub struct MemoryTemplateStore {
    templates: RwLock<HashMap<TemplateId, Template>>,
}

impl MemoryTemplateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a template as given
    pub async fn insert(&self, template: Template) {
        self.templates.write().await.insert(template.id, template);
    }

    /// Replace the sources of an existing template and stamp it with the current time
    pub async fn update(
        &self,
        id: TemplateId,
        subject: impl Into<String>,
        body: impl Into<String>,
        alt_body: Option<String>,
    ) -> Result<Template> {
        let mut templates = self.templates.write().await;
        let template = templates
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("template {}", id)))?;

        let now = Utc::now();
        template.updated_at = if now > template.updated_at {
            now
        } else {
            template.updated_at + chrono::Duration::microseconds(1)
        };
        template.subject = subject.into();
        template.body = body.into();
        template.alt_body = alt_body;
        Ok(template.clone())
    }
}

#[async_trait]
impl TemplateStore for MemoryTemplateStore {
    async fn get(&self, id: TemplateId, metadata_only: bool) -> Result<Template> {
        let templates = self.templates.read().await;
        let template = templates
            .get(&id)
            .ok_or_else(|| Error::NotFound(format!("template {}", id)))?;

        Ok(if metadata_only {
            template.metadata()
        } else {
            template.clone()
        })
    }
}

/// In-memory subscriber store
#[derive(Debug, Default)]
pub struct MemorySubscriberStore {
    subscribers: RwLock<Vec<Subscriber>>,
}

impl MemorySubscriberStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a subscriber, assigning an id and uuid when missing
    pub async fn insert(&self, mut subscriber: Subscriber) -> Subscriber {
        let mut subscribers = self.subscribers.write().await;
        if subscriber.id == 0 {
            subscriber.id = subscribers.iter().map(|s| s.id).max().unwrap_or(0) + 1;
        }
        if subscriber.uuid.is_empty() {
            subscriber.uuid = Uuid::new_v4().to_string();
        }
        subscriber.email = subscriber.email.trim().to_lowercase();
        subscribers.retain(|s| s.id != subscriber.id);
        subscribers.push(subscriber.clone());
        subscriber
    }
}

#[async_trait]
impl SubscriberStore for MemorySubscriberStore {
    async fn get(&self, id: SubscriberId, key: &str, email: &str) -> Result<Subscriber> {
        let subscribers = self.subscribers.read().await;
        let found = if id != 0 {
            subscribers
                .iter()
                .find(|s| s.id == id && (key.is_empty() || s.uuid == key))
        } else if !key.is_empty() {
            subscribers.iter().find(|s| s.uuid == key)
        } else {
            subscribers
                .iter()
                .find(|s| s.email.eq_ignore_ascii_case(email))
        };

        found.cloned().ok_or_else(|| {
            if id != 0 {
                Error::NotFound(format!("subscriber {}", id))
            } else if !key.is_empty() {
                Error::NotFound(format!("subscriber {}", key))
            } else {
                Error::NotFound(format!("subscriber {}", email))
            }
        })
    }
}
