//! In-memory [`DocumentStore`] double for unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use backfill_shared::{BackfillError, Document, Result, WriteBatch};
use backfill_storage::{DocumentStore, check_in_values};
use serde_json::Value;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

#[derive(Default)]
pub(crate) struct MemoryStore {
    pub collections: RwLock<HashMap<String, Vec<Document>>>,
    /// Size of every `find_in` call, in call order.
    pub lookups: Mutex<Vec<usize>>,
    pub commits: Mutex<usize>,
    pub fail_scan: bool,
    /// Fail the n-th (0-based) `find_in` call.
    pub fail_lookup_at: Option<usize>,
    pub fail_commit: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert documents from a JSON array; each object must carry a string `id`.
    pub fn insert_json(&self, collection: &str, docs: Value) {
        let Value::Array(items) = docs else {
            panic!("expected array");
        };
        let mut guard = self.collections.write().expect("RwLock poisoned");
        let entry = guard.entry(collection.to_string()).or_default();
        for item in items {
            let Value::Object(mut data) = item else {
                panic!("expected object");
            };
            let Some(Value::String(id)) = data.remove("id") else {
                panic!("document needs a string id");
            };
            entry.push(Document::new(id, data));
        }
    }

    pub fn get(&self, collection: &str, id: &str) -> Option<Document> {
        self.collections
            .read()
            .expect("RwLock poisoned")
            .get(collection)
            .and_then(|docs| docs.iter().find(|d| d.id == id).cloned())
    }

    pub fn lookups(&self) -> Vec<usize> {
        self.lookups.lock().expect("Mutex poisoned").clone()
    }

    pub fn commit_count(&self) -> usize {
        *self.commits.lock().expect("Mutex poisoned")
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn scan(&self, collection: &str) -> Result<Vec<Document>> {
        if self.fail_scan {
            return Err(BackfillError::read("injected scan failure"));
        }
        Ok(self
            .collections
            .read()
            .expect("RwLock poisoned")
            .get(collection)
            .cloned()
            .unwrap_or_default())
    }

    async fn find_in(
        &self,
        collection: &str,
        field: &str,
        values: &[String],
    ) -> Result<Vec<Document>> {
        check_in_values(values)?;
        let call = {
            let mut lookups = self.lookups.lock().expect("Mutex poisoned");
            lookups.push(values.len());
            lookups.len() - 1
        };
        if self.fail_lookup_at == Some(call) {
            return Err(BackfillError::read("injected lookup failure"));
        }

        Ok(self
            .collections
            .read()
            .expect("RwLock poisoned")
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .filter(|d| {
                        matches!(d.field(field), Some(Value::String(s)) if values.contains(s))
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn commit(&self, batch: WriteBatch) -> Result<usize> {
        if self.fail_commit {
            return Err(BackfillError::commit("injected commit failure"));
        }
        let mut guard = self.collections.write().expect("RwLock poisoned");

        // Validate everything first so a bad update leaves nothing applied.
        for update in batch.updates() {
            let exists = guard
                .get(&update.collection)
                .is_some_and(|docs| docs.iter().any(|d| d.id == update.doc_id));
            if !exists {
                return Err(BackfillError::commit(format!(
                    "no document {}/{}",
                    update.collection, update.doc_id
                )));
            }
        }

        let applied = batch.len();
        for update in batch.into_updates() {
            if let Some(doc) = guard
                .get_mut(&update.collection)
                .and_then(|docs| docs.iter_mut().find(|d| d.id == update.doc_id))
            {
                doc.data.insert(update.field, Value::String(update.value));
            }
        }
        *self.commits.lock().expect("Mutex poisoned") += 1;
        Ok(applied)
    }
}

/// Counts ERROR events emitted while the returned guard is alive.
pub(crate) fn capture_errors() -> (Arc<AtomicUsize>, tracing::subscriber::DefaultGuard) {
    let count = Arc::new(AtomicUsize::new(0));
    let subscriber = tracing_subscriber::registry::Registry::default().with(ErrorCounter {
        count: Arc::clone(&count),
    });
    (count, tracing::subscriber::set_default(subscriber))
}

struct ErrorCounter {
    count: Arc<AtomicUsize>,
}

impl<S: Subscriber> Layer<S> for ErrorCounter {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if *event.metadata().level() == Level::ERROR {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }
}
