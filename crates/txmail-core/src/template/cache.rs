//! Compiled template cache keyed by template id

use super::compile::CompiledTemplate;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use txmail_common::types::TemplateId;

/// Most recently compiled version of each template.
///
/// Entries are replaced wholesale and never mutated; readers get a shared
/// handle that stays valid after a replacement.
#[derive(Debug, Default)]
pub struct TemplateCache {
    entries: RwLock<HashMap<TemplateId, Arc<CompiledTemplate>>>,
}

impl TemplateCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, id: TemplateId) -> Option<Arc<CompiledTemplate>> {
        self.entries.read().await.get(&id).cloned()
    }

    /// The cached entry, only if it was compiled from the source stamped `updated_at`
    pub async fn get_fresh(
        &self,
        id: TemplateId,
        updated_at: DateTime<Utc>,
    ) -> Option<Arc<CompiledTemplate>> {
        self.get(id)
            .await
            .filter(|compiled| compiled.updated_at() == updated_at)
    }

    pub async fn put(&self, id: TemplateId, compiled: Arc<CompiledTemplate>) {
        self.entries.write().await.insert(id, compiled);
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}
