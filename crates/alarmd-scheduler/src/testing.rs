//! In-process platform double and engine fixtures for unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use alarmd_core::config::{AlarmConfig, RetryConfig};
use alarmd_core::error::{AlarmError, Result};
use alarmd_core::traits::{Platform, PlatformTrigger, TriggerStore, TriggerTarget};
use alarmd_core::trigger::{TriggerDoc, TriggerStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Value, json};

use crate::active::ActiveHost;
use crate::engine::AlarmEngine;

#[derive(Default)]
pub struct FakePlatform {
    inner: Mutex<FakeInner>,
}

#[derive(Default)]
struct FakeInner {
    /// Trigger path → bound rules.
    triggers: HashMap<String, Vec<String>>,
    /// Scripted fire statuses, consumed in order; empty means 200.
    fire_script: VecDeque<u16>,
    fire_always: Option<u16>,
    rule_delete_failures: VecDeque<u16>,
    attempts: u32,
    fired: Vec<(String, Value)>,
    lookup_delay: Duration,
    fire_delay: Duration,
}

fn http(status: u16) -> AlarmError {
    AlarmError::Http {
        status: Some(status),
        message: format!("Received a {status} status code when firing the trigger"),
    }
}

impl FakePlatform {
    fn lock(&self) -> std::sync::MutexGuard<'_, FakeInner> {
        self.inner.lock().unwrap()
    }

    pub fn add_trigger(&self, target: &TriggerTarget, rules: &[&str]) {
        self.lock()
            .triggers
            .insert(target.path(), rules.iter().map(|r| r.to_string()).collect());
    }

    pub fn has_trigger(&self, target: &TriggerTarget) -> bool {
        self.lock().triggers.contains_key(&target.path())
    }

    pub fn rule_count(&self) -> usize {
        self.lock().triggers.values().map(Vec::len).sum()
    }

    pub fn script_fires(&self, statuses: &[u16]) {
        self.lock().fire_script.extend(statuses);
    }

    pub fn always_fail_fires(&self, status: u16) {
        self.lock().fire_always = Some(status);
    }

    /// Slow down every `get_trigger` call.
    pub fn delay_lookups(&self, delay: Duration) {
        self.lock().lookup_delay = delay;
    }

    /// Slow down every fire attempt.
    pub fn delay_fires(&self, delay: Duration) {
        self.lock().fire_delay = delay;
    }

    pub fn fail_next_rule_delete(&self, status: u16) {
        self.lock().rule_delete_failures.push_back(status);
    }

    /// Every dispatch attempt, successful or not.
    pub fn attempts(&self) -> u32 {
        self.lock().attempts
    }

    /// Successful dispatches to `name`.
    pub fn fired(&self, name: &str) -> usize {
        self.lock().fired.iter().filter(|(n, _)| n == name).count()
    }
}

#[async_trait]
impl Platform for FakePlatform {
    async fn fire_trigger(&self, target: &TriggerTarget, payload: &Value) -> Result<()> {
        let delay = self.lock().fire_delay;
        tokio::time::sleep(delay).await;
        let mut inner = self.lock();
        inner.attempts += 1;
        let status = match inner.fire_always {
            Some(status) => status,
            None => inner.fire_script.pop_front().unwrap_or(200),
        };
        if (200..300).contains(&status) {
            inner.fired.push((target.name.clone(), payload.clone()));
            Ok(())
        } else {
            Err(http(status))
        }
    }

    async fn get_trigger(&self, target: &TriggerTarget) -> Result<PlatformTrigger> {
        let delay = self.lock().lookup_delay;
        tokio::time::sleep(delay).await;
        match self.lock().triggers.get(&target.path()) {
            Some(rules) => Ok(PlatformTrigger {
                rules: rules.clone(),
            }),
            None => Err(http(404)),
        }
    }

    async fn create_trigger(&self, target: &TriggerTarget) -> Result<()> {
        self.lock().triggers.entry(target.path()).or_default();
        Ok(())
    }

    async fn delete_trigger(&self, target: &TriggerTarget) -> Result<()> {
        match self.lock().triggers.remove(&target.path()) {
            Some(_) => Ok(()),
            None => Err(http(404)),
        }
    }

    async fn delete_rule(&self, _apikey: &str, rule: &str) -> Result<()> {
        let mut inner = self.lock();
        if let Some(status) = inner.rule_delete_failures.pop_front() {
            return Err(http(status));
        }
        for rules in inner.triggers.values_mut() {
            rules.retain(|r| r != rule);
        }
        Ok(())
    }
}

/// Millisecond retries so failure paths finish quickly.
pub fn fast_config() -> AlarmConfig {
    AlarmConfig {
        retry: RetryConfig {
            attempts: 2,
            delay_ms: 5,
            max_backoff_ms: 5,
            conflict_attempts: 2,
            conflict_delay_ms: 1,
        },
        ..Default::default()
    }
}

pub fn engine(store: Arc<dyn TriggerStore>, platform: Arc<FakePlatform>) -> Arc<AlarmEngine> {
    let config = fast_config();
    let active = Arc::new(ActiveHost::standalone(&config.provider.host));
    AlarmEngine::new(&config, store, platform, active)
}

pub fn interval_doc(name: &str, max_triggers: i64) -> TriggerDoc {
    TriggerDoc {
        apikey: "uuid:key".into(),
        namespace: "ns".into(),
        name: name.into(),
        payload: json!({"name": name}),
        max_triggers: Some(max_triggers),
        minutes: Some(60),
        status: Some(TriggerStatus::active_now()),
        ..Default::default()
    }
}

pub fn date_doc(name: &str, date: DateTime<Utc>) -> TriggerDoc {
    TriggerDoc {
        minutes: None,
        date: Some(date),
        ..interval_doc(name, -1)
    }
}

/// Poll `cond` for up to two seconds.
pub async fn eventually<F: Fn() -> bool>(cond: F) -> bool {
    for _ in 0..200 {
        if cond() {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    cond()
}
