//! Store synchronization: the bootstrap scan and the live change feed keep
//! the registry equal to the set of active documents of this worker.

use std::sync::Arc;

use alarmd_core::error::Result;
use alarmd_core::traits::{Change, ChangeStream, FeedPosition, TriggerTarget, WorkerTriggers};
use alarmd_core::trigger::TriggerDoc;
use chrono::Utc;
use futures::StreamExt;
use tokio::task::JoinHandle;

use crate::alarm::{Alarm, OnTick, spawn_timer};
use crate::engine::AlarmEngine;
use crate::monitor::Stage;
use crate::registry::TriggerEntry;
use crate::retry::is_terminal_status;

/// Upstream lookups in flight during the bootstrap scan.
const BOOTSTRAP_CONCURRENCY: usize = 16;

fn doc_id(doc: &TriggerDoc) -> String {
    doc.id.clone().unwrap_or_else(|| doc.identifier())
}

impl AlarmEngine {
    /// Follow the change feed and arm every stored trigger of this worker.
    ///
    /// The feed is opened before the scan so nothing written during the scan
    /// is missed. Failing to read the store is fatal; per-trigger failures
    /// only retire that trigger. Returns the feed task.
    pub async fn start(self: &Arc<Self>) -> Result<JoinHandle<()>> {
        let feed = self.store.changes(&self.worker, FeedPosition::Now).await?;
        let engine = Arc::clone(self);
        let follower = tokio::spawn(async move { engine.follow(feed).await });

        match self.bootstrap().await {
            Ok(armed) => {
                tracing::info!("⏰ {armed} triggers armed for {} on {}", self.worker, self.host());
                Ok(follower)
            }
            Err(e) => {
                follower.abort();
                Err(e)
            }
        }
    }

    /// Arm every active document assigned to this worker. Returns how many were armed.
    pub async fn bootstrap(self: &Arc<Self>) -> Result<usize> {
        let WorkerTriggers { docs, malformed } = self.store.triggers_by_worker(&self.worker).await?;
        tracing::info!("📋 Found {} stored triggers for {}", docs.len() + malformed.len(), self.worker);
        for bad in malformed {
            tracing::warn!("⚠️ Stored trigger {} is not readable: {}", bad.id, bad.error);
            let message = format!(
                "Automatically disabled after receiving error on trigger initialization: {}",
                bad.error
            );
            self.retire(&bad.id, None, &message).await;
        }
        let armed = futures::stream::iter(docs)
            .map(|doc| self.bootstrap_one(doc))
            .buffer_unordered(BOOTSTRAP_CONCURRENCY)
            .filter(|armed| futures::future::ready(*armed))
            .count()
            .await;
        Ok(armed)
    }

    async fn bootstrap_one(self: &Arc<Self>, doc: TriggerDoc) -> bool {
        let id = doc_id(&doc);
        // Self-test leftovers are cleaned up by the monitor, not re-armed.
        if doc.monitor.is_some() || self.registry.contains(&id) {
            return false;
        }

        let target = TriggerTarget::from_doc(&doc);
        if let Err(e) = self.platform.get_trigger(&target).await {
            match e.http_status() {
                Some(status) if is_terminal_status(status) => {
                    let message = format!(
                        "Automatically disabled after receiving a {status} status code on trigger initialization"
                    );
                    self.retire(&id, Some(status), &message).await;
                    return false;
                }
                _ => tracing::warn!("⚠️ Could not verify {id} upstream, arming anyway: {e}"),
            }
        }

        let mut armed_rev = doc.rev.clone();
        let mut armed = self.arm_on_startup(&id, &doc).await;
        // The feed may have changed the document while the lookup was in
        // flight; a change to an id not yet registered is not applied there.
        while armed {
            let current = match self.store.get(&id).await {
                Ok(current) => current,
                Err(e) if e.is_not_found() => {
                    self.registry.remove(&id);
                    return false;
                }
                Err(e) => {
                    tracing::warn!("⚠️ Could not re-read {id} after arming: {e}");
                    return true;
                }
            };
            if current.rev == armed_rev {
                return true;
            }
            self.registry.remove(&id);
            if !current.is_active() || current.monitor.is_some() {
                tracing::info!("⏹️ Trigger {id} changed during startup, not armed");
                return false;
            }
            armed_rev = current.rev.clone();
            armed = self.arm_on_startup(&id, &current).await;
        }
        false
    }

    async fn arm_on_startup(self: &Arc<Self>, id: &str, doc: &TriggerDoc) -> bool {
        match self.create_trigger(id, doc) {
            Ok(armed) => armed,
            Err(e) => {
                let message = format!(
                    "Automatically disabled after receiving error on trigger initialization: {e}"
                );
                self.retire(id, None, &message).await;
                false
            }
        }
    }

    /// Validate the schedule and start its timer. `Ok(false)` when the
    /// trigger is already armed.
    pub fn create_trigger(self: &Arc<Self>, id: &str, doc: &TriggerDoc) -> Result<bool> {
        if self.registry.contains(id) {
            return Ok(false);
        }
        let alarm = Alarm::from_doc(doc, Utc::now())?;
        let entry = Arc::new(TriggerEntry::new(id, doc, alarm.clone()));
        if !self.registry.insert_if_absent(Arc::clone(&entry)) {
            return Ok(false);
        }

        let engine = Arc::downgrade(self);
        let tick_id = id.to_string();
        let on_tick: OnTick = Arc::new(move |at| {
            if let Some(engine) = engine.upgrade() {
                engine.on_tick(&tick_id, at);
            }
        });
        let timer = spawn_timer(id, alarm, on_tick);
        entry.set_timer(timer.abort_handle());
        // Evicted between insert and set_timer: nobody else can stop this timer.
        if !self
            .registry
            .get(id)
            .is_some_and(|current| Arc::ptr_eq(&current, &entry))
        {
            timer.abort();
            return Ok(false);
        }
        tracing::info!("✅ Trigger {id} armed ({})", entry.alarm.kind());
        Ok(true)
    }

    async fn follow(self: Arc<Self>, mut feed: ChangeStream) {
        while let Some(change) = feed.next().await {
            match change {
                Ok(change) => self.apply_change(change).await,
                Err(e) => tracing::warn!("⚠️ Change feed error: {e}"),
            }
        }
        tracing::warn!("⚠️ Change feed for {} ended", self.worker);
    }

    /// Reconcile the registry with one document change.
    pub async fn apply_change(self: &Arc<Self>, change: Change) {
        let id = change.id;
        if change.deleted {
            self.registry.remove(&id);
            return;
        }
        if let Some(error) = change.malformed {
            tracing::warn!("⚠️ Changed trigger {id} is not readable: {error}");
            let message =
                format!("Automatically disabled after receiving error on trigger creation: {error}");
            self.retire(&id, None, &message).await;
            return;
        }
        let Some(doc) = change.doc else {
            return;
        };

        let pinned_here = doc.monitor.as_deref() == Some(self.host());
        if !doc.is_active() {
            self.registry.remove(&id);
            if pinned_here {
                self.monitor.mark(&doc.name, Stage::Stopped);
            }
            return;
        }
        if self.registry.contains(&id) || !(doc.monitor.is_none() || pinned_here) {
            return;
        }

        match self.create_trigger(&id, &doc) {
            Ok(true) => {
                if pinned_here {
                    self.monitor.mark(&doc.name, Stage::Started);
                }
            }
            Ok(false) => {}
            Err(e) => {
                let message =
                    format!("Automatically disabled after receiving error on trigger creation: {e}");
                self.retire(&id, None, &message).await;
            }
        }
    }
}
