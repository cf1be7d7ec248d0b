//! Session values persisted in a key/value store.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::debug;
use webflo_core::{KvStore, StoreError};

use crate::errors::{HttpError, Result};

/// A JSON key/value session stored under its session ID.
///
/// Values are loaded at open and written back at commit, only when they
/// changed. Committing an emptied session deletes the record.
pub struct ServerSideSession {
    id: String,
    store: Arc<dyn KvStore>,
    initial: Map<String, Value>,
    live: Map<String, Value>,
}

impl ServerSideSession {
    /// Open the session `id`, resolving its store through `storage`.
    pub async fn open_with<F>(id: &str, storage: F) -> Result<Self>
    where
        F: FnOnce(&str) -> Arc<dyn KvStore>,
    {
        if id.is_empty() {
            return Err(HttpError::MissingSessionId);
        }
        let store = storage(id);
        Self::open(id, store).await
    }

    /// Open the session `id` in `store`.
    pub async fn open(id: &str, store: Arc<dyn KvStore>) -> Result<Self> {
        if id.is_empty() {
            return Err(HttpError::MissingSessionId);
        }
        let initial = match store.get(id).await? {
            None => Map::new(),
            Some(Value::Object(map)) => map,
            Some(other) => {
                return Err(StoreError::Malformed {
                    key: id.to_owned(),
                    reason: format!("expected object, found {}", json_kind(&other)),
                }
                .into());
            }
        };
        Ok(Self {
            id: id.to_owned(),
            store,
            live: initial.clone(),
            initial,
        })
    }

    /// Session ID.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Value under `key`.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.live.get(key)
    }

    /// Set `key`.
    pub fn set(&mut self, key: &str, value: Value) {
        let _ = self.live.insert(key.to_owned(), value);
    }

    /// Remove `key`. Returns the previous value.
    pub fn delete(&mut self, key: &str) -> Option<Value> {
        self.live.remove(key)
    }

    /// Keys of the live values.
    pub fn keys(&self) -> Vec<String> {
        self.live.keys().cloned().collect()
    }

    /// Drop every value.
    pub fn clear(&mut self) {
        self.live.clear();
    }

    /// Whether live differs from what was loaded or last committed.
    pub fn is_dirty(&self) -> bool {
        self.live != self.initial
    }

    /// Persist changes. Returns whether the store was written.
    pub async fn commit(&mut self) -> Result<bool> {
        if !self.is_dirty() {
            return Ok(false);
        }
        if self.live.is_empty() {
            let _ = self.store.delete(&self.id).await?;
        } else {
            self.store
                .set(&self.id, Value::Object(self.live.clone()))
                .await?;
        }
        self.initial = self.live.clone();
        debug!(keys = self.live.len(), "server-side session committed");
        Ok(true)
    }
}

impl std::fmt::Debug for ServerSideSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerSideSession")
            .field("id", &self.id)
            .field("keys", &self.keys())
            .field("dirty", &self.is_dirty())
            .finish_non_exhaustive()
    }
}

pub(crate) fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
