//! In-memory trigger store.
//!
//! Documents live as raw JSON in a `HashMap` behind a mutex, so a document
//! that is not a valid trigger is stored and reported like CouchDB would.
//! Every write is pushed to each feed subscriber's unbounded queue under the
//! same lock, so subscribers see every change in write order. Revisions
//! follow the CouchDB shape (`{generation}-mem`) so conflict handling is
//! exercised the same way.

use std::collections::HashMap;
use std::sync::Mutex;

use alarmd_core::error::{AlarmError, Result};
use alarmd_core::traits::{Change, ChangeStream, FeedPosition, TriggerStore, WorkerTriggers};
use alarmd_core::trigger::DEFAULT_WORKER;
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

struct Subscriber {
    worker: String,
    tx: mpsc::UnboundedSender<Change>,
}

#[derive(Default)]
struct Inner {
    docs: HashMap<String, Value>,
    seq: u64,
    subscribers: Vec<Subscriber>,
}

impl Inner {
    /// `worker` is the feed worker of the document before or after the write.
    fn publish(&mut self, id: &str, worker: Option<String>, doc: Option<Value>) {
        self.seq += 1;
        let Some(worker) = worker else {
            return;
        };
        let change = Change::from_raw(id.to_string(), self.seq.to_string(), doc.is_none(), doc);
        self.subscribers.retain(|sub| {
            if sub.worker != worker {
                return !sub.tx.is_closed();
            }
            sub.tx.send(change.clone()).is_ok()
        });
    }
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| AlarmError::Store("memory store lock poisoned".into()))
    }

    /// Number of stored documents.
    pub fn len(&self) -> usize {
        self.lock().map(|inner| inner.docs.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Same predicate as the CouchDB filter: alarm documents, keyed by worker.
fn feed_worker(doc: &Value) -> Option<String> {
    if doc.get("maxTriggers").is_none_or(Value::is_null) {
        return None;
    }
    let worker = doc
        .get("worker")
        .and_then(Value::as_str)
        .unwrap_or(DEFAULT_WORKER);
    Some(worker.to_string())
}

/// Same predicate as the CouchDB view: missing status means active.
fn is_active(doc: &Value) -> bool {
    doc.pointer("/status/active")
        .is_none_or(|active| active.as_bool() == Some(true))
}

fn rev_of(doc: &Value) -> Option<&str> {
    doc.get("_rev").and_then(Value::as_str)
}

fn next_rev(current: Option<&str>) -> String {
    let generation = current
        .and_then(|rev| rev.split('-').next())
        .and_then(|g| g.parse::<u64>().ok())
        .unwrap_or(0);
    format!("{}-mem", generation + 1)
}

#[async_trait]
impl TriggerStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get_raw(&self, id: &str) -> Result<Value> {
        self.lock()?
            .docs
            .get(id)
            .cloned()
            .ok_or_else(|| AlarmError::NotFound(id.to_string()))
    }

    async fn insert_raw(&self, id: &str, doc: &Value) -> Result<String> {
        let Value::Object(fields) = doc else {
            return Err(AlarmError::Store(format!("document {id} is not a JSON object")));
        };
        let mut inner = self.lock()?;
        let current = inner.docs.get(id).and_then(rev_of).map(String::from);
        if current.as_deref() != rev_of(doc) {
            return Err(AlarmError::Conflict(id.to_string()));
        }

        let rev = next_rev(current.as_deref());
        let mut stored = fields.clone();
        stored.insert("_id".into(), Value::String(id.to_string()));
        stored.insert("_rev".into(), Value::String(rev.clone()));
        let stored = Value::Object(stored);
        let worker = feed_worker(&stored);
        inner.docs.insert(id.to_string(), stored.clone());
        inner.publish(id, worker, Some(stored));
        Ok(rev)
    }

    async fn delete(&self, id: &str, rev: &str) -> Result<()> {
        let mut inner = self.lock()?;
        let existing = inner
            .docs
            .get(id)
            .ok_or_else(|| AlarmError::NotFound(id.to_string()))?;
        if rev_of(existing) != Some(rev) {
            return Err(AlarmError::Conflict(id.to_string()));
        }
        let worker = feed_worker(existing);
        inner.docs.remove(id);
        inner.publish(id, worker, None);
        Ok(())
    }

    async fn triggers_by_worker(&self, worker: &str) -> Result<WorkerTriggers> {
        let mut triggers = WorkerTriggers::default();
        for (id, doc) in self.lock()?.docs.iter() {
            if is_active(doc) && feed_worker(doc).as_deref() == Some(worker) {
                triggers.push_raw(id, doc.clone());
            }
        }
        Ok(triggers)
    }

    async fn worker_counts(&self) -> Result<HashMap<String, u64>> {
        let mut counts = HashMap::new();
        for doc in self.lock()?.docs.values() {
            if let Some(worker) = feed_worker(doc).filter(|_| is_active(doc)) {
                *counts.entry(worker).or_insert(0) += 1;
            }
        }
        Ok(counts)
    }

    /// History is not kept, so every subscription starts at "now".
    async fn changes(&self, worker: &str, since: FeedPosition) -> Result<ChangeStream> {
        if let FeedPosition::After(seq) = since {
            tracing::debug!("memory store feed cannot replay from {seq}; starting now");
        }
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock()?.subscribers.push(Subscriber {
            worker: worker.to_string(),
            tx,
        });
        Ok(UnboundedReceiverStream::new(rx).map(Ok).boxed())
    }
}
