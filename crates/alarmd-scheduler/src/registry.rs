//! Trigger registry: the in-memory table of triggers armed on this process.
//!
//! Every entry owns its timer task and its mutable firing state. Inserting an
//! identifier that is already present is refused, so there is never more than
//! one live timer per trigger; removing an entry aborts its timer.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use alarmd_core::traits::TriggerTarget;
use alarmd_core::trigger::TriggerDoc;
use serde_json::Value;
use tokio::sync::OwnedMutexGuard;
use tokio::task::AbortHandle;

use crate::alarm::Alarm;

/// Mutable per-trigger state touched by the firing engine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FireState {
    /// Fires left; `None` when unlimited.
    pub triggers_left: Option<u64>,
    pub fired: u64,
}

/// Runtime record of one armed trigger.
pub struct TriggerEntry {
    pub id: String,
    pub target: TriggerTarget,
    pub payload: Value,
    pub alarm: Alarm,
    /// Host this self-test trigger is pinned to.
    pub monitor: Option<String>,
    pub max_triggers: Option<u64>,
    /// Held for the whole of one fire (all retries included).
    state: Arc<tokio::sync::Mutex<FireState>>,
    timer: Mutex<Option<AbortHandle>>,
}

impl TriggerEntry {
    pub fn new(id: &str, doc: &TriggerDoc, alarm: Alarm) -> Self {
        let max_triggers = doc.fire_limit();
        Self {
            id: id.to_string(),
            target: TriggerTarget::from_doc(doc),
            payload: doc.payload.clone(),
            alarm,
            monitor: doc.monitor.clone(),
            max_triggers,
            state: Arc::new(tokio::sync::Mutex::new(FireState {
                triggers_left: max_triggers,
                ..Default::default()
            })),
            timer: Mutex::new(None),
        }
    }

    pub fn is_pinned(&self) -> bool {
        self.monitor.is_some()
    }

    /// Claim the fire slot, or `None` while a previous fire is still running.
    pub fn try_begin_fire(&self) -> Option<OwnedMutexGuard<FireState>> {
        self.state.clone().try_lock_owned().ok()
    }

    pub async fn state(&self) -> FireState {
        self.state.lock().await.clone()
    }

    pub(crate) fn set_timer(&self, handle: AbortHandle) {
        if let Ok(mut timer) = self.timer.lock() {
            if let Some(old) = timer.replace(handle) {
                old.abort();
            }
        }
    }

    fn stop(&self) {
        if let Ok(mut timer) = self.timer.lock() {
            if let Some(handle) = timer.take() {
                handle.abort();
            }
        }
    }
}

/// Shared table of armed triggers, keyed by trigger identifier.
#[derive(Default)]
pub struct TriggerRegistry {
    entries: RwLock<HashMap<String, Arc<TriggerEntry>>>,
}

impl TriggerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert unless the identifier is already armed. Returns whether it was inserted.
    pub fn insert_if_absent(&self, entry: Arc<TriggerEntry>) -> bool {
        let Ok(mut entries) = self.entries.write() else {
            return false;
        };
        if entries.contains_key(&entry.id) {
            return false;
        }
        entries.insert(entry.id.clone(), entry);
        true
    }

    /// Stop the timer and evict the entry. Returns whether one was present.
    pub fn remove(&self, id: &str) -> bool {
        let removed = self.entries.write().ok().and_then(|mut e| e.remove(id));
        match removed {
            Some(entry) => {
                entry.stop();
                tracing::info!("🛑 Trigger {id} stopped and removed from memory");
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: &str) -> Option<Arc<TriggerEntry>> {
        self.entries.read().ok()?.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries
            .read()
            .map(|e| e.contains_key(id))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ids(&self) -> Vec<String> {
        self.entries
            .read()
            .map(|e| e.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Stop every timer (process shutdown).
    pub fn clear(&self) {
        let drained: Vec<_> = match self.entries.write() {
            Ok(mut entries) => entries.drain().map(|(_, e)| e).collect(),
            Err(_) => return,
        };
        for entry in drained {
            entry.stop();
        }
    }
}
