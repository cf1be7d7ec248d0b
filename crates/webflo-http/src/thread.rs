//! Thread-scoped signal store.
//!
//! An [`HttpThread`] is a named bag of ordered values per key, persisted in
//! a [`KvStore`] as one JSON object under the thread ID:
//!
//! ```json
//! { "redirect": ["/a", "/b"], "flash": [{"level": "info"}] }
//! ```
//!
//! Per key the only states are absent and present-with-values. Consuming
//! the last value of a key removes the key; removing the last key deletes
//! the record.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::debug;
use webflo_core::{IdGenerator, KvStore, StoreError, UuidGenerator};

use crate::errors::Result;
use crate::session::json_kind;

/// Which values of a key an operation selects.
#[derive(Clone, Copy, Default)]
pub enum Filter<'a> {
    /// The most recently appended value.
    #[default]
    Latest,
    /// Every value, oldest first, as a JSON array.
    All,
    /// The oldest value matching the predicate.
    Matching(&'a (dyn Fn(&Value) -> bool + Sync)),
}

impl fmt::Debug for Filter<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Latest => f.write_str("Latest"),
            Self::All => f.write_str("All"),
            Self::Matching(_) => f.write_str("Matching(..)"),
        }
    }
}

type Record = Map<String, Value>;
type LockTable = DashMap<String, Arc<Mutex<()>>>;

/// Opens [`HttpThread`]s over one backing store.
///
/// Every handle opened through the same `ThreadStore` (or a clone of it)
/// takes the same async lock for a given thread ID, so read-modify-write
/// sequences on one record never interleave, whichever request holds the
/// handle. Lock entries are dropped with the last handle of their ID.
#[derive(Clone)]
pub struct ThreadStore {
    store: Arc<dyn KvStore>,
    locks: Arc<LockTable>,
    ids: Arc<dyn IdGenerator>,
}

impl ThreadStore {
    /// Wrap `store`, generating thread IDs from UUIDs.
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self {
            store,
            locks: Arc::new(DashMap::new()),
            ids: Arc::new(UuidGenerator),
        }
    }

    /// Use `ids` for generated thread IDs. The lock table is kept.
    #[must_use]
    pub fn with_id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    /// The backing store.
    pub fn store(&self) -> &Arc<dyn KvStore> {
        &self.store
    }

    /// Open a thread in `realm`.
    ///
    /// `thread_id` is kept when it carries the `wq.<realm>.` prefix;
    /// otherwise a fresh `wq.<realm>.<id>` ID is generated.
    pub fn open(&self, realm: &str, thread_id: Option<&str>) -> HttpThread {
        let id = resolve_id(realm, thread_id, self.ids.as_ref());
        HttpThread {
            lock: self.lock_for(&id),
            home: self.clone(),
            realm: realm.to_owned(),
            id,
            extended: false,
        }
    }

    /// Number of thread IDs with a live handle.
    pub fn open_threads(&self) -> usize {
        self.locks.len()
    }

    fn lock_for(&self, id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(id.to_owned())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone()
    }

    fn release(&self, id: &str) {
        // The table holds one reference and the departing handle another.
        let _ = self.locks.remove_if(id, |_, lock| Arc::strong_count(lock) <= 2);
    }
}

impl fmt::Debug for ThreadStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadStore")
            .field("open_threads", &self.open_threads())
            .finish_non_exhaustive()
    }
}

/// Handle on one thread of signals.
pub struct HttpThread {
    home: ThreadStore,
    lock: Arc<Mutex<()>>,
    realm: String,
    id: String,
    extended: bool,
}

impl HttpThread {
    /// Open a thread on a store of its own.
    ///
    /// Handles opened this way do not serialize against other handles on
    /// the same store; open them from one shared [`ThreadStore`] for that.
    pub fn create(store: Arc<dyn KvStore>, realm: &str, thread_id: Option<&str>) -> Self {
        ThreadStore::new(store).open(realm, thread_id)
    }

    /// Thread ID.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Realm the thread ID is namespaced under.
    pub fn realm(&self) -> &str {
        &self.realm
    }

    /// Open another handle on the same store under a new or given ID.
    pub fn spawn(&self, thread_id: Option<&str>) -> Self {
        self.home.open(&self.realm, thread_id)
    }

    /// Mark or unmark the thread as extended.
    pub fn extend(&mut self, set: bool) {
        self.extended = set;
    }

    /// Whether the thread is marked extended.
    pub fn is_extended(&self) -> bool {
        self.extended
    }

    /// Append `value` under `key`.
    pub async fn append(&self, key: &str, value: Value) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut record = self.load().await?;
        match record.get_mut(key) {
            Some(Value::Array(values)) => values.push(value),
            _ => {
                let _ = record.insert(key.to_owned(), Value::Array(vec![value]));
            }
        }
        self.save(record).await
    }

    /// Read without removing.
    pub async fn get(&self, key: &str, filter: Filter<'_>) -> Result<Option<Value>> {
        let record = self.load().await?;
        Ok(record
            .get(key)
            .and_then(|values| select(values.as_array()?, filter)))
    }

    /// Read and remove what [`HttpThread::get`] would return.
    pub async fn consume(&self, key: &str, filter: Filter<'_>) -> Result<Option<Value>> {
        let _guard = self.lock.lock().await;
        let mut record = self.load().await?;
        let Some(Value::Array(values)) = record.get_mut(key) else {
            return Ok(None);
        };
        let taken = match filter {
            Filter::Latest => values.pop(),
            Filter::All => Some(Value::Array(std::mem::take(values))),
            Filter::Matching(predicate) => values
                .iter()
                .position(|v| predicate(v))
                .map(|index| values.remove(index)),
        };
        if taken.is_none() {
            return Ok(None);
        }
        if values.is_empty() {
            let _ = record.remove(key);
        }
        self.save(record).await?;
        Ok(taken)
    }

    /// Whether `key` is present, or with a predicate, whether any of its
    /// values matches.
    pub async fn has(&self, key: &str, filter: Filter<'_>) -> Result<bool> {
        let record = self.load().await?;
        let Some(values) = record.get(key).and_then(Value::as_array) else {
            return Ok(false);
        };
        Ok(match filter {
            Filter::Latest | Filter::All => !values.is_empty(),
            Filter::Matching(predicate) => values.iter().any(predicate),
        })
    }

    /// Keys currently present.
    pub async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.load().await?.keys().cloned().collect())
    }

    /// Delete the whole thread record.
    pub async fn clear(&self) -> Result<()> {
        let _guard = self.lock.lock().await;
        let _ = self.home.store.delete(&self.id).await?;
        debug!(thread_id = %self.id, "thread cleared");
        Ok(())
    }

    async fn load(&self) -> Result<Record> {
        let record = match self.home.store.get(&self.id).await? {
            None => Record::new(),
            Some(Value::Object(record)) => record,
            Some(other) => return Err(self.malformed(format!("expected object, found {}", json_kind(&other)))),
        };
        if let Some((key, _)) = record.iter().find(|(_, v)| !v.is_array()) {
            return Err(self.malformed(format!("values under '{key}' are not a list")));
        }
        Ok(record)
    }

    async fn save(&self, record: Record) -> Result<()> {
        if record.is_empty() {
            let _ = self.home.store.delete(&self.id).await?;
            debug!(thread_id = %self.id, "thread emptied");
        } else {
            self.home.store.set(&self.id, Value::Object(record)).await?;
        }
        Ok(())
    }

    fn malformed(&self, reason: String) -> crate::errors::HttpError {
        StoreError::Malformed {
            key: self.id.clone(),
            reason,
        }
        .into()
    }
}

impl fmt::Debug for HttpThread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpThread")
            .field("id", &self.id)
            .field("realm", &self.realm)
            .field("extended", &self.extended)
            .finish_non_exhaustive()
    }
}

impl Clone for HttpThread {
    fn clone(&self) -> Self {
        Self {
            home: self.home.clone(),
            lock: self.lock.clone(),
            realm: self.realm.clone(),
            id: self.id.clone(),
            extended: self.extended,
        }
    }
}

impl Drop for HttpThread {
    fn drop(&mut self) {
        self.home.release(&self.id);
    }
}

fn resolve_id(realm: &str, requested: Option<&str>, ids: &dyn IdGenerator) -> String {
    let prefix = format!("wq.{realm}.");
    match requested {
        Some(id) if id.len() > prefix.len() && id.starts_with(&prefix) => id.to_owned(),
        Some(id) => {
            debug!(thread_id = id, realm, "thread id outside realm, generating a new one");
            format!("{prefix}{}", ids.generate())
        }
        None => format!("{prefix}{}", ids.generate()),
    }
}

fn select(values: &[Value], filter: Filter<'_>) -> Option<Value> {
    match filter {
        Filter::Latest => values.last().cloned(),
        Filter::All => (!values.is_empty()).then(|| Value::Array(values.to_vec())),
        Filter::Matching(predicate) => values.iter().find(|v| predicate(v)).cloned(),
    }
}
