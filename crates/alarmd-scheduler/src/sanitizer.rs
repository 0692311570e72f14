//! Lifecycle sanitizer: every store and platform mutation that ends a
//! trigger's life.
//!
//! Each operation evicts the trigger from the registry before touching the
//! store, so no timer survives a disable or delete. Store writes are
//! read-modify-write with a bounded number of conflict retries, done on the
//! raw document so ones that no longer decode as triggers can still be retired.

use std::sync::Arc;
use std::time::Duration;

use alarmd_core::config::RetryConfig;
use alarmd_core::error::{AlarmError, Result};
use alarmd_core::traits::{Platform, TriggerStore, TriggerTarget};
use alarmd_core::trigger::TriggerStatus;
use serde_json::Value;

use crate::registry::TriggerRegistry;

pub const MARKED_FOR_DELETION: &str = "Marked for deletion";

pub struct Sanitizer {
    store: Arc<dyn TriggerStore>,
    platform: Arc<dyn Platform>,
    registry: Arc<TriggerRegistry>,
    conflict_attempts: u32,
    conflict_delay: Duration,
}

impl Sanitizer {
    pub fn new(
        store: Arc<dyn TriggerStore>,
        platform: Arc<dyn Platform>,
        registry: Arc<TriggerRegistry>,
        retry: &RetryConfig,
    ) -> Self {
        Self {
            store,
            platform,
            registry,
            conflict_attempts: retry.conflict_attempts,
            conflict_delay: Duration::from_millis(retry.conflict_delay_ms),
        }
    }

    /// Stop the trigger and mark its document inactive with an `AUTO` reason.
    ///
    /// Returns `false` without writing when the document is already inactive
    /// (which also protects `ADMIN` reasons) or no longer exists.
    pub async fn disable(&self, id: &str, status_code: Option<u16>, message: &str) -> Result<bool> {
        self.registry.remove(id);
        let mut attempt = 0;
        loop {
            let mut doc = match self.store.get_raw(id).await {
                Ok(doc) => doc,
                Err(e) if e.is_not_found() => {
                    tracing::info!("could not find {id} in database");
                    return Ok(false);
                }
                Err(e) => return Err(e),
            };
            if doc.pointer("/status/active") == Some(&Value::Bool(false)) {
                tracing::debug!("{id} is already disabled");
                return Ok(false);
            }
            let status = serde_json::to_value(TriggerStatus::auto_disabled(status_code, message))?;
            let Some(fields) = doc.as_object_mut() else {
                return Err(AlarmError::Store(format!("document {id} is not a JSON object")));
            };
            fields.insert("status".into(), status);
            match self.store.insert_raw(id, &doc).await {
                Ok(_) => {
                    tracing::info!("🚫 Trigger {id} disabled: {message}");
                    return Ok(true);
                }
                Err(e) if e.is_conflict() && attempt < self.conflict_attempts => {
                    attempt += 1;
                    tracing::debug!("conflict disabling {id}, retry {attempt}");
                    tokio::time::sleep(self.conflict_delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Hard-delete the document. A missing document counts as deleted.
    pub async fn delete_trigger_from_db(&self, id: &str) -> Result<bool> {
        self.registry.remove(id);
        let mut attempt = 0;
        loop {
            let existing = match self.store.get_raw(id).await {
                Ok(doc) => doc,
                Err(e) if e.is_not_found() => {
                    tracing::debug!("{id} already removed from the database");
                    return Ok(false);
                }
                Err(e) => return Err(e),
            };
            let rev = existing.get("_rev").and_then(Value::as_str).unwrap_or_default();
            match self.store.delete(id, rev).await {
                Ok(()) => {
                    tracing::info!("🗑️ Trigger {id} deleted from the database");
                    return Ok(true);
                }
                Err(e) if e.is_not_found() => return Ok(false),
                Err(e) if e.is_conflict() && attempt < self.conflict_attempts => {
                    attempt += 1;
                    tokio::time::sleep(self.conflict_delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Mark the document for deletion, then delete it.
    pub async fn delete_trigger_feed(&self, id: &str) -> Result<()> {
        self.disable(id, None, MARKED_FOR_DELETION).await?;
        self.delete_trigger_from_db(id).await?;
        Ok(())
    }

    /// Delete the platform trigger, retrying conflicts. Already gone is success.
    pub async fn delete_trigger(&self, target: &TriggerTarget) -> Result<()> {
        let mut attempt = 0;
        loop {
            match self.platform.delete_trigger(target).await {
                Ok(()) => {
                    tracing::info!("🗑️ Trigger {} deleted upstream", target.path());
                    return Ok(());
                }
                Err(e) if e.http_status() == Some(404) => return Ok(()),
                Err(e) if e.http_status() == Some(409) && attempt < self.conflict_attempts => {
                    attempt += 1;
                    tokio::time::sleep(self.conflict_delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Delete a rule (`namespace/name`) with the trigger's credential.
    pub async fn delete_rule(&self, apikey: &str, rule: &str) -> Result<()> {
        let mut attempt = 0;
        loop {
            match self.platform.delete_rule(apikey, rule).await {
                Ok(()) => return Ok(()),
                Err(e) if e.http_status() == Some(404) => return Ok(()),
                Err(e) if e.http_status() == Some(409) && attempt < self.conflict_attempts => {
                    attempt += 1;
                    tokio::time::sleep(self.conflict_delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Delete every rule bound to the trigger, then the trigger itself.
    /// Rule failures are logged and skipped. Returns the rules deleted.
    pub async fn delete_trigger_and_rules(&self, target: &TriggerTarget) -> Result<usize> {
        let trigger = self.platform.get_trigger(target).await.map_err(|e| {
            tracing::error!("trigger get request failed for {}: {e}", target.path());
            e
        })?;

        let mut deleted = 0;
        for rule in &trigger.rules {
            match self.delete_rule(&target.apikey, rule).await {
                Ok(()) => {
                    tracing::info!("🗑️ Rule {rule} deleted");
                    deleted += 1;
                }
                Err(e) => tracing::error!("rule delete request failed for {rule}: {e}"),
            }
        }
        self.delete_trigger(target).await?;
        Ok(deleted)
    }
}

/// Log-and-continue wrapper for fire-and-forget sanitizer calls.
pub(crate) fn log_failure<T>(what: &str, id: &str, result: Result<T>) {
    if let Err(e) = result {
        match e {
            AlarmError::Conflict(_) => {
                tracing::error!("❌ {what} for {id} gave up after repeated conflicts")
            }
            other => tracing::error!("❌ {what} for {id} failed: {other}"),
        }
    }
}
