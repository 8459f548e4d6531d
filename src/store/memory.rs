use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use super::{Store, StoreError, StorePath};

/// Entries kept per history path before the oldest are dropped.
pub const DEFAULT_HISTORY_CAP: usize = 1000;

#[derive(Debug, Default)]
struct Inner {
    current: HashMap<StorePath, Value>,
    history: HashMap<StorePath, VecDeque<(String, Value)>>,
    tokens: Vec<String>,
}

/// Process-local store used when no database is configured, and in tests.
///
/// Each history path is a ring buffer of at most `history_cap` entries.
/// Cheap to clone; clones share the same data.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
    history_cap: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::with_history_cap(DEFAULT_HISTORY_CAP)
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_history_cap(history_cap: usize) -> Self {
        Self {
            inner: Arc::default(),
            history_cap: history_cap.max(1),
        }
    }

    pub async fn register_token(&self, token: impl Into<String>) {
        let token = token.into();
        let mut inner = self.inner.write().await;
        if !inner.tokens.contains(&token) {
            inner.tokens.push(token);
        }
    }

    /// Snapshot of the log at `path`, oldest first.
    pub async fn history(&self, path: StorePath) -> Vec<(String, Value)> {
        self.inner
            .read()
            .await
            .history
            .get(&path)
            .map(|log| log.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn set_current(&self, path: StorePath, data: &Value) -> Result<(), StoreError> {
        self.inner.write().await.current.insert(path, data.clone());
        Ok(())
    }

    async fn append_history(&self, path: StorePath, id: &str, data: &Value) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let log = inner.history.entry(path).or_default();
        if log.len() == self.history_cap {
            log.pop_front();
        }
        log.push_back((id.to_owned(), data.clone()));
        Ok(())
    }

    async fn latest(&self, path: StorePath) -> Result<Option<Value>, StoreError> {
        Ok(self.inner.read().await.current.get(&path).cloned())
    }

    async fn device_tokens(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.inner.read().await.tokens.clone())
    }
}
