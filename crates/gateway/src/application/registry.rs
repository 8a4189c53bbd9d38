use dashmap::DashMap;
use std::sync::Arc;

use super::adapter::ExchangeAdapter;
use crate::domain::ExchangeId;

/// Adapters by exchange id
#[derive(Default)]
pub struct ExchangeRegistry {
    adapters: DashMap<ExchangeId, Arc<dyn ExchangeAdapter>>,
}

impl ExchangeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter under its own id, replacing any previous one
    pub fn register(&self, adapter: Arc<dyn ExchangeAdapter>) -> Option<Arc<dyn ExchangeAdapter>> {
        let id = adapter.id();
        tracing::info!(exchange = %id, "Registered exchange adapter");
        self.adapters.insert(id, adapter)
    }

    /// Adapter for `id`. Unsupported exchanges are logged and yield `None`.
    pub fn get(&self, id: &ExchangeId) -> Option<Arc<dyn ExchangeAdapter>> {
        let adapter = self.adapters.get(id).map(|entry| Arc::clone(entry.value()));
        if adapter.is_none() {
            tracing::warn!(exchange = %id, "Exchange not supported");
        }
        adapter
    }

    pub fn contains(&self, id: &ExchangeId) -> bool {
        self.adapters.contains_key(id)
    }

    /// Registered ids, sorted
    pub fn exchanges(&self) -> Vec<ExchangeId> {
        let mut ids: Vec<ExchangeId> = self.adapters.iter().map(|entry| entry.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }

    pub fn shutdown_all(&self) {
        for entry in self.adapters.iter() {
            tracing::info!(exchange = %entry.key(), "Shutting down adapter");
            entry.value().shutdown();
        }
    }
}
