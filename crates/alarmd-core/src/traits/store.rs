//! Persistent trigger store trait.
//!
//! Any document database works as long as it offers get / insert / delete by
//! id with optimistic-concurrency conflicts, an index of active triggers per
//! worker, and a worker-filtered change feed.

use std::collections::HashMap;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::Value;

use crate::error::Result;
use crate::trigger::TriggerDoc;

/// One entry of the change feed.
#[derive(Debug, Clone)]
pub struct Change {
    /// Document id (the trigger identifier).
    pub id: String,
    /// Opaque feed position of this change.
    pub seq: String,
    /// Document was hard-deleted.
    pub deleted: bool,
    pub doc: Option<TriggerDoc>,
    /// Decode error when the stored document is not a valid trigger.
    pub malformed: Option<String>,
}

impl Change {
    /// Build a change from a raw feed document, keeping decode failures.
    pub fn from_raw(id: String, seq: String, deleted: bool, raw: Option<Value>) -> Self {
        let (doc, malformed) = match raw.filter(|_| !deleted).map(decode_doc) {
            Some(Ok(doc)) => (Some(doc), None),
            Some(Err(e)) => (None, Some(e)),
            None => (None, None),
        };
        Self {
            id,
            seq,
            deleted,
            doc,
            malformed,
        }
    }
}

/// A stored document that could not be read as a trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedDoc {
    pub id: String,
    pub error: String,
}

/// Result of the per-worker index lookup.
#[derive(Debug, Clone, Default)]
pub struct WorkerTriggers {
    pub docs: Vec<TriggerDoc>,
    pub malformed: Vec<MalformedDoc>,
}

impl WorkerTriggers {
    /// Sort one raw index row into `docs` or `malformed`.
    pub fn push_raw(&mut self, id: &str, raw: Value) {
        match decode_doc(raw) {
            Ok(doc) => self.docs.push(doc),
            Err(error) => self.malformed.push(MalformedDoc {
                id: id.to_string(),
                error,
            }),
        }
    }
}

pub fn decode_doc(raw: Value) -> std::result::Result<TriggerDoc, String> {
    serde_json::from_value(raw).map_err(|e| e.to_string())
}

/// Where a change-feed subscription starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedPosition {
    /// Only changes made after subscribing.
    Now,
    /// Changes after a previously observed sequence.
    After(String),
}

pub type ChangeStream = BoxStream<'static, Result<Change>>;

#[async_trait]
pub trait TriggerStore: Send + Sync {
    /// Backend name for logs.
    fn name(&self) -> &str;

    /// Fetch a document as stored; `AlarmError::NotFound` when absent.
    async fn get_raw(&self, id: &str) -> Result<Value>;

    /// Insert or replace a document. Its `_rev` must match the stored
    /// revision (or be absent for a new document), otherwise
    /// `AlarmError::Conflict`. Returns the new revision.
    async fn insert_raw(&self, id: &str, doc: &Value) -> Result<String>;

    async fn get(&self, id: &str) -> Result<TriggerDoc> {
        Ok(serde_json::from_value(self.get_raw(id).await?)?)
    }

    async fn insert(&self, id: &str, doc: &TriggerDoc) -> Result<String> {
        self.insert_raw(id, &serde_json::to_value(doc)?).await
    }

    /// Delete a document at a specific revision.
    async fn delete(&self, id: &str, rev: &str) -> Result<()>;

    /// Active trigger documents assigned to `worker`. Documents that fail to
    /// decode are reported in `malformed` instead of failing the lookup.
    async fn triggers_by_worker(&self, worker: &str) -> Result<WorkerTriggers>;

    /// Active trigger count per worker.
    async fn worker_counts(&self) -> Result<HashMap<String, u64>>;

    /// Continuous change feed restricted to documents of `worker`.
    async fn changes(&self, worker: &str, since: FeedPosition) -> Result<ChangeStream>;
}
