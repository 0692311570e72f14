//! Firing engine: dispatch with retry, then post-fire lifecycle checks.

use std::sync::Arc;

use alarmd_core::error::AlarmError;
use alarmd_core::trigger::DeleteAfterFire;
use chrono::{DateTime, Utc};

use crate::alarm::Alarm;
use crate::engine::AlarmEngine;
use crate::monitor::Stage;
use crate::registry::{FireState, TriggerEntry};
use crate::retry::{Failure, TOO_MANY_REQUESTS, classify};
use crate::sanitizer::log_failure;

pub const THROTTLED: &str =
    "Automatically disabled after continuously receiving a 429 status code when firing the trigger";
pub const FIRED_ONCE: &str = "Automatically disabled after firing once";
pub const LAST_CRON_FIRE: &str =
    "Automatically disabled after firing last scheduled cron trigger";
pub const LAST_INTERVAL_FIRE: &str =
    "Automatically disabled after firing last scheduled interval trigger";
pub const MAX_TRIGGERS: &str = "Automatically disabled after reaching max triggers";

/// What became of one scheduled fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireOutcome {
    Delivered,
    /// Retries ran out on transient failures.
    Undelivered,
    /// The trigger was retired with this status.
    Disabled(u16),
    /// Nothing was sent (unknown trigger, standby host, fire in progress, budget spent).
    Skipped,
}

fn failure_message(err: &AlarmError) -> String {
    match err {
        AlarmError::Http { message, .. } => message.clone(),
        other => other.to_string(),
    }
}

impl AlarmEngine {
    /// Timer callback. The fire runs on its own task so a slow dispatch
    /// never delays the timer.
    pub(crate) fn on_tick(self: &Arc<Self>, id: &str, scheduled: DateTime<Utc>) {
        let engine = Arc::clone(self);
        let id = id.to_string();
        tokio::spawn(async move {
            engine.fire(&id, scheduled).await;
        });
    }

    /// Run one scheduled fire of `id` to completion.
    pub async fn fire(&self, id: &str, scheduled: DateTime<Utc>) -> FireOutcome {
        let Some(entry) = self.registry.get(id) else {
            tracing::debug!("{id} is no longer armed, ignoring fire");
            return FireOutcome::Skipped;
        };
        if !self.active.should_fire(entry.monitor.as_deref()) {
            tracing::debug!("{id} not fired, {} is not the active host", self.host());
            return FireOutcome::Skipped;
        }
        let Some(mut state) = entry.try_begin_fire() else {
            tracing::warn!("⚠️ {id} is still firing, skipping the fire scheduled for {scheduled}");
            return FireOutcome::Skipped;
        };
        if state.triggers_left == Some(0) {
            return FireOutcome::Skipped;
        }

        let outcome = self.post_trigger(&entry, &mut state).await;
        if !matches!(outcome, FireOutcome::Disabled(_)) {
            self.handle_fired(&entry, &state, scheduled).await;
        }
        outcome
    }

    /// Dispatch with the retry policy. The fire budget is only consumed by
    /// a delivered attempt.
    async fn post_trigger(&self, entry: &TriggerEntry, state: &mut FireState) -> FireOutcome {
        let id = &entry.id;
        let mut retry = 0;
        let mut throttled = 0;
        loop {
            if let Some(left) = state.triggers_left.as_mut() {
                *left = left.saturating_sub(1);
            }
            let err = match self.platform.fire_trigger(&entry.target, &entry.payload).await {
                Ok(()) => {
                    state.fired += 1;
                    match state.triggers_left {
                        Some(left) => tracing::info!("🔔 Fired {id}, {left} fires left"),
                        None => tracing::info!("🔔 Fired {id}"),
                    }
                    return FireOutcome::Delivered;
                }
                Err(e) => e,
            };
            if let Some(left) = state.triggers_left.as_mut() {
                *left += 1;
            }

            let failure = classify(&err);
            if let Failure::Terminal(status) = failure {
                tracing::error!("❌ Firing {id} was rejected with {status}");
                let message = format!("Trigger automatically disabled: {}", failure_message(&err));
                self.retire(id, Some(status), &message).await;
                return FireOutcome::Disabled(status);
            }
            if failure.is_throttled() {
                throttled += 1;
            }
            retry += 1;
            match self.retry.next_delay(retry, throttled) {
                Some(delay) => {
                    tracing::info!("🔁 Attempting to fire {id} again in {delay:?}, retry {retry}: {err}");
                    tokio::time::sleep(delay).await;
                }
                None if self.retry.throttled_out(throttled) => {
                    self.retire(id, Some(TOO_MANY_REQUESTS), THROTTLED).await;
                    return FireOutcome::Disabled(TOO_MANY_REQUESTS);
                }
                None => {
                    tracing::error!("❌ Unable to reach server to fire {id}: {err}");
                    return FireOutcome::Undelivered;
                }
            }
        }
    }

    /// Retire the trigger when this fire ended its schedule or its budget.
    async fn handle_fired(&self, entry: &Arc<TriggerEntry>, state: &FireState, scheduled: DateTime<Utc>) {
        let id = &entry.id;
        // Removed (or replaced) while the dispatch was in flight.
        let still_armed = self
            .registry
            .get(id)
            .is_some_and(|current| Arc::ptr_eq(&current, entry));
        if !still_armed {
            tracing::debug!("{id} was stopped while firing");
            return;
        }
        if entry.is_pinned() {
            self.monitor.mark(&entry.target.name, Stage::Fired);
        }

        match &entry.alarm {
            Alarm::Date(date) => match date.delete_after_fire {
                DeleteAfterFire::Keep => self.retire(id, None, FIRED_ONCE).await,
                DeleteAfterFire::Trigger => {
                    log_failure("delete", id, self.sanitizer.delete_trigger_feed(id).await);
                    log_failure(
                        "trigger delete",
                        id,
                        self.sanitizer.delete_trigger(&entry.target).await,
                    );
                }
                DeleteAfterFire::Rules => {
                    log_failure("delete", id, self.sanitizer.delete_trigger_feed(id).await);
                    log_failure(
                        "trigger and rules delete",
                        id,
                        self.sanitizer.delete_trigger_and_rules(&entry.target).await,
                    );
                }
            },
            alarm if alarm.stop_date().is_some() && alarm.past_last_fire(scheduled) => {
                let message = match alarm {
                    Alarm::Cron(_) => LAST_CRON_FIRE,
                    _ => LAST_INTERVAL_FIRE,
                };
                self.retire(id, None, message).await;
            }
            _ if state.triggers_left == Some(0) => self.retire(id, None, MAX_TRIGGERS).await,
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakePlatform, date_doc, engine, eventually, interval_doc};
    use alarmd_core::traits::{TriggerStore, TriggerTarget};
    use alarmd_core::trigger::{ReasonKind, TriggerDoc};
    use alarmd_store::MemoryStore;
    use chrono::Duration;

    async fn armed(
        store: &Arc<MemoryStore>,
        engine: &Arc<AlarmEngine>,
        doc: &TriggerDoc,
    ) -> String {
        let id = doc.identifier();
        store.insert(&id, doc).await.unwrap();
        assert!(engine.create_trigger(&id, doc).unwrap());
        id
    }

    fn reason(doc: &TriggerDoc) -> (ReasonKind, Option<u16>, String) {
        let reason = doc.status.clone().unwrap().reason.unwrap();
        (reason.kind, reason.status_code, reason.message)
    }

    #[tokio::test]
    async fn test_max_triggers_disables_after_last_fire() {
        let store = Arc::new(MemoryStore::new());
        let platform = Arc::new(FakePlatform::default());
        let engine = engine(store.clone(), platform.clone());
        let id = armed(&store, &engine, &interval_doc("twice", 2)).await;

        assert_eq!(engine.fire(&id, Utc::now()).await, FireOutcome::Delivered);
        assert!(engine.registry().contains(&id));
        assert_eq!(engine.fire(&id, Utc::now()).await, FireOutcome::Delivered);
        assert!(!engine.registry().contains(&id));
        assert_eq!(engine.fire(&id, Utc::now()).await, FireOutcome::Skipped);
        assert_eq!(platform.fired("twice"), 2);

        let doc = store.get(&id).await.unwrap();
        assert!(!doc.is_active());
        assert_eq!(reason(&doc), (ReasonKind::Auto, None, MAX_TRIGGERS.to_string()));
    }

    #[tokio::test]
    async fn test_retry_does_not_consume_budget() {
        let store = Arc::new(MemoryStore::new());
        let platform = Arc::new(FakePlatform::default());
        let engine = engine(store.clone(), platform.clone());
        let id = armed(&store, &engine, &interval_doc("flaky", 3)).await;

        platform.script_fires(&[503]);
        assert_eq!(engine.fire(&id, Utc::now()).await, FireOutcome::Delivered);
        assert_eq!(platform.attempts(), 2);
        let state = engine.registry().get(&id).unwrap().state().await;
        assert_eq!(state.triggers_left, Some(2));
        assert_eq!(state.fired, 1);
    }

    #[tokio::test]
    async fn test_exhausted_retries_keep_trigger_and_budget() {
        let store = Arc::new(MemoryStore::new());
        let platform = Arc::new(FakePlatform::default());
        let engine = engine(store.clone(), platform.clone());
        let id = armed(&store, &engine, &interval_doc("down", 1)).await;

        platform.always_fail_fires(500);
        assert_eq!(engine.fire(&id, Utc::now()).await, FireOutcome::Undelivered);
        // First attempt plus two retries.
        assert_eq!(platform.attempts(), 3);
        let state = engine.registry().get(&id).unwrap().state().await;
        assert_eq!(state.triggers_left, Some(1));
        assert!(store.get(&id).await.unwrap().is_active());
    }

    #[tokio::test]
    async fn test_terminal_status_disables_without_retry() {
        let store = Arc::new(MemoryStore::new());
        let platform = Arc::new(FakePlatform::default());
        let engine = engine(store.clone(), platform.clone());
        let id = armed(&store, &engine, &interval_doc("gone", -1)).await;

        platform.always_fail_fires(404);
        assert_eq!(engine.fire(&id, Utc::now()).await, FireOutcome::Disabled(404));
        assert_eq!(platform.attempts(), 1);
        assert!(!engine.registry().contains(&id));
        let (kind, code, message) = reason(&store.get(&id).await.unwrap());
        assert_eq!(kind, ReasonKind::Auto);
        assert_eq!(code, Some(404));
        assert_eq!(
            message,
            "Trigger automatically disabled: Received a 404 status code when firing the trigger"
        );
    }

    #[tokio::test]
    async fn test_continuous_throttling_disables() {
        let store = Arc::new(MemoryStore::new());
        let platform = Arc::new(FakePlatform::default());
        let engine = engine(store.clone(), platform.clone());
        let id = armed(&store, &engine, &interval_doc("busy", -1)).await;

        platform.always_fail_fires(429);
        assert_eq!(engine.fire(&id, Utc::now()).await, FireOutcome::Disabled(429));
        let (_, code, message) = reason(&store.get(&id).await.unwrap());
        assert_eq!(code, Some(429));
        assert_eq!(message, THROTTLED);
    }

    #[tokio::test]
    async fn test_one_shot_is_disabled_after_firing() {
        let store = Arc::new(MemoryStore::new());
        let platform = Arc::new(FakePlatform::default());
        let engine = engine(store.clone(), platform.clone());
        let id = armed(&store, &engine, &date_doc("once", Utc::now() + Duration::hours(1))).await;

        assert_eq!(engine.fire(&id, Utc::now()).await, FireOutcome::Delivered);
        let (_, _, message) = reason(&store.get(&id).await.unwrap());
        assert_eq!(message, FIRED_ONCE);
    }

    #[tokio::test]
    async fn test_delete_after_fire_rules() {
        let store = Arc::new(MemoryStore::new());
        let platform = Arc::new(FakePlatform::default());
        let engine = engine(store.clone(), platform.clone());
        let mut doc = date_doc("cleanup", Utc::now() + Duration::hours(1));
        doc.delete_after_fire = Some(DeleteAfterFire::Rules);
        let target = TriggerTarget::from_doc(&doc);
        platform.add_trigger(&target, &["ns/r1", "ns/r2"]);
        let id = armed(&store, &engine, &doc).await;

        assert_eq!(engine.fire(&id, Utc::now()).await, FireOutcome::Delivered);
        assert!(store.get(&id).await.unwrap_err().is_not_found());
        assert_eq!(platform.rule_count(), 0);
        assert!(!platform.has_trigger(&target));
    }

    #[tokio::test]
    async fn test_interval_stop_date_disables_after_last_fire() {
        let store = Arc::new(MemoryStore::new());
        let platform = Arc::new(FakePlatform::default());
        let engine = engine(store.clone(), platform.clone());
        let now = Utc::now();
        let mut doc = interval_doc("window", -1);
        doc.minutes = Some(1);
        doc.start_date = Some(now + Duration::seconds(10));
        doc.stop_date = Some(now + Duration::seconds(30));
        let id = armed(&store, &engine, &doc).await;

        let first = now + Duration::seconds(10);
        assert_eq!(engine.fire(&id, first).await, FireOutcome::Delivered);
        let (_, _, message) = reason(&store.get(&id).await.unwrap());
        assert_eq!(message, LAST_INTERVAL_FIRE);
    }

    #[tokio::test]
    async fn test_seconds_cron_runs_through_timer() {
        let store = Arc::new(MemoryStore::new());
        let platform = Arc::new(FakePlatform::default());
        let engine = engine(store.clone(), platform.clone());
        let mut doc = interval_doc("every-second", 2);
        doc.minutes = None;
        doc.cron = Some("* * * * * *".into());
        let id = armed(&store, &engine, &doc).await;

        for _ in 0..4 {
            if !engine.registry().contains(&id) {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_secs(1)).await;
        }
        assert!(eventually(|| !engine.registry().contains(&id)).await);
        assert_eq!(platform.fired("every-second"), 2);
        assert!(!store.get(&id).await.unwrap().is_active());
    }

    #[tokio::test]
    async fn test_standby_host_does_not_fire() {
        let store = Arc::new(MemoryStore::new());
        let platform = Arc::new(FakePlatform::default());
        let engine = engine(store.clone(), platform.clone());
        let id = armed(&store, &engine, &interval_doc("quiet", -1)).await;

        engine.active().set_enabled(false);
        assert_eq!(engine.fire(&id, Utc::now()).await, FireOutcome::Skipped);
        assert_eq!(platform.attempts(), 0);
    }

    fn spawn_fire(engine: &Arc<AlarmEngine>, id: &str) -> tokio::task::JoinHandle<FireOutcome> {
        let engine = Arc::clone(engine);
        let id = id.to_string();
        tokio::spawn(async move { engine.fire(&id, Utc::now()).await })
    }

    #[tokio::test]
    async fn test_removed_while_firing_is_not_retired() {
        let store = Arc::new(MemoryStore::new());
        let platform = Arc::new(FakePlatform::default());
        let engine = engine(store.clone(), platform.clone());
        let id = armed(&store, &engine, &interval_doc("stopped", 1)).await;
        platform.delay_fires(std::time::Duration::from_millis(100));

        let firing = spawn_fire(&engine, &id);
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        engine.registry().remove(&id);

        assert_eq!(firing.await.unwrap(), FireOutcome::Delivered);
        assert!(engine.registry().is_empty());
        let stored = store.get(&id).await.unwrap();
        assert!(stored.is_active());
        assert_eq!(stored.rev.as_deref(), Some("1-mem"));
    }

    #[tokio::test]
    async fn test_replaced_while_firing_keeps_replacement() {
        let store = Arc::new(MemoryStore::new());
        let platform = Arc::new(FakePlatform::default());
        let engine = engine(store.clone(), platform.clone());
        let doc = interval_doc("swapped", 1);
        let id = armed(&store, &engine, &doc).await;
        platform.delay_fires(std::time::Duration::from_millis(100));

        let firing = spawn_fire(&engine, &id);
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        engine.registry().remove(&id);
        assert!(engine.create_trigger(&id, &doc).unwrap());
        let replacement = engine.registry().get(&id).unwrap();

        // The finished fire spent the old entry's only fire, not the replacement's.
        assert_eq!(firing.await.unwrap(), FireOutcome::Delivered);
        let current = engine.registry().get(&id).unwrap();
        assert!(Arc::ptr_eq(&current, &replacement));
        assert_eq!(current.state().await.triggers_left, Some(1));
        let stored = store.get(&id).await.unwrap();
        assert!(stored.is_active());
        assert_eq!(stored.rev.as_deref(), Some("1-mem"));
    }

    #[tokio::test]
    async fn test_tick_during_retrying_fire_is_skipped() {
        let store = Arc::new(MemoryStore::new());
        let platform = Arc::new(FakePlatform::default());
        let engine = engine(store.clone(), platform.clone());
        let id = armed(&store, &engine, &interval_doc("slow", 3)).await;
        platform.script_fires(&[503]);
        platform.delay_fires(std::time::Duration::from_millis(100));

        let first = spawn_fire(&engine, &id);
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        assert_eq!(engine.fire(&id, Utc::now()).await, FireOutcome::Skipped);

        assert_eq!(first.await.unwrap(), FireOutcome::Delivered);
        assert_eq!(platform.attempts(), 2);
        assert_eq!(platform.fired("slow"), 1);
        let state = engine.registry().get(&id).unwrap().state().await;
        assert_eq!(state.triggers_left, Some(2));
        assert_eq!(state.fired, 1);
    }
}
