//! Self-test monitor.
//!
//! Every cycle creates a short-lived trigger pinned to this host and watches
//! it go through started → fired → stopped. The previous cycle's trigger is
//! graded and removed when the next one is created; types rotate
//! interval → date → cron.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use alarmd_core::error::Result;
use alarmd_core::schedule::ScheduleKind;
use alarmd_core::traits::TriggerTarget;
use alarmd_core::trigger::{TriggerDoc, TriggerStatus, UNLIMITED};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tokio::task::JoinHandle;

use crate::engine::AlarmEngine;
use crate::sanitizer::log_failure;

pub const MONITOR_NAMESPACE: &str = "_";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Started,
    Fired,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StageResult {
    Success,
    Failed,
}

/// Outcome of one self-test cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorReport {
    pub trigger_name: String,
    pub trigger_type: ScheduleKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger_started: Option<StageResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger_fired: Option<StageResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger_stopped: Option<StageResult>,
}

impl MonitorReport {
    fn new(name: &str, kind: ScheduleKind) -> Self {
        Self {
            trigger_name: name.to_string(),
            trigger_type: kind,
            trigger_started: None,
            trigger_fired: None,
            trigger_stopped: None,
        }
    }

    fn slot(&mut self, stage: Stage) -> &mut Option<StageResult> {
        match stage {
            Stage::Started => &mut self.trigger_started,
            Stage::Fired => &mut self.trigger_fired,
            Stage::Stopped => &mut self.trigger_stopped,
        }
    }

    /// Mark the first stage that never happened as failed.
    fn grade(mut self) -> Self {
        for stage in [Stage::Started, Stage::Fired, Stage::Stopped] {
            let slot = self.slot(stage);
            if slot.is_none() {
                *slot = Some(StageResult::Failed);
                break;
            }
        }
        self
    }

    pub fn passed(&self) -> bool {
        [self.trigger_started, self.trigger_fired, self.trigger_stopped]
            .iter()
            .all(|r| *r == Some(StageResult::Success))
    }
}

/// Stage tracking shared between the monitor loop and the engine.
#[derive(Default)]
pub struct MonitorStatus {
    inner: Mutex<MonitorState>,
}

#[derive(Default)]
struct MonitorState {
    current: Option<MonitorReport>,
    last: Option<MonitorReport>,
}

impl MonitorStatus {
    /// Start tracking `name`; grades and returns the cycle it replaces.
    pub fn begin(&self, name: &str, kind: ScheduleKind) -> Option<MonitorReport> {
        let Ok(mut state) = self.inner.lock() else {
            return None;
        };
        let finished = state.current.take().map(MonitorReport::grade);
        if finished.is_some() {
            state.last = finished.clone();
        }
        state.current = Some(MonitorReport::new(name, kind));
        finished
    }

    /// Record that the trigger `name` reached `stage`. Unknown names are ignored.
    pub fn mark(&self, name: &str, stage: Stage) {
        let Ok(mut state) = self.inner.lock() else {
            return;
        };
        if let Some(report) = state.current.as_mut().filter(|r| r.trigger_name == name) {
            *report.slot(stage) = Some(StageResult::Success);
        }
    }

    pub fn current(&self) -> Option<MonitorReport> {
        self.inner.lock().ok()?.current.clone()
    }

    /// Most recently graded cycle.
    pub fn last(&self) -> Option<MonitorReport> {
        self.inner.lock().ok()?.last.clone()
    }
}

fn next_kind(kind: Option<ScheduleKind>) -> ScheduleKind {
    match kind {
        None | Some(ScheduleKind::Cron) => ScheduleKind::Interval,
        Some(ScheduleKind::Interval) => ScheduleKind::Date,
        Some(ScheduleKind::Date) => ScheduleKind::Cron,
    }
}

/// The synthetic trigger document for one self-test cycle.
pub fn monitor_doc(
    apikey: &str,
    worker: &str,
    host: &str,
    kind: ScheduleKind,
    now: DateTime<Utc>,
) -> TriggerDoc {
    let minute = chrono::Duration::minutes(1);
    let mut doc = TriggerDoc {
        apikey: apikey.to_string(),
        namespace: MONITOR_NAMESPACE.to_string(),
        name: format!("alarms_{worker}{host}_{}", now.timestamp_millis()),
        payload: json!({}),
        max_triggers: Some(UNLIMITED),
        worker: Some(worker.to_string()),
        monitor: Some(host.to_string()),
        status: Some(TriggerStatus::active_now()),
        ..Default::default()
    };
    match kind {
        ScheduleKind::Interval => {
            let start = now + minute;
            doc.minutes = Some(1);
            doc.start_date = Some(start);
            doc.stop_date = Some(start + minute);
        }
        ScheduleKind::Date => doc.date = Some(now + minute),
        ScheduleKind::Cron => {
            doc.cron = Some("* * * * *".to_string());
            doc.stop_date = Some(now + minute * 2);
        }
    }
    doc
}

pub struct SelfTestMonitor {
    engine: Arc<AlarmEngine>,
    apikey: String,
    interval: Duration,
    previous: Option<TriggerDoc>,
}

impl SelfTestMonitor {
    pub fn new(engine: Arc<AlarmEngine>, apikey: &str, interval: Duration) -> Self {
        Self {
            engine,
            apikey: apikey.to_string(),
            interval,
            previous: None,
        }
    }

    /// Grade and remove the previous self-test trigger, then create the next one.
    pub async fn run_cycle(&mut self, now: DateTime<Utc>) -> Result<Option<MonitorReport>> {
        let engine = &self.engine;
        let kind = next_kind(engine.monitor.current().map(|r| r.trigger_type));
        let doc = monitor_doc(&self.apikey, engine.worker(), engine.host(), kind, now);
        let id = doc.identifier();

        let report = engine.monitor.begin(&doc.name, kind);
        if let Some(report) = &report {
            if report.passed() {
                tracing::info!("💚 Self-test {} ({}) passed", report.trigger_name, report.trigger_type);
            } else {
                tracing::warn!("💔 Self-test {} ({}) failed: {report:?}", report.trigger_name, report.trigger_type);
            }
        }

        if let Some(previous) = self.previous.take() {
            let previous_id = previous.identifier();
            log_failure(
                "self-test cleanup",
                &previous_id,
                engine.sanitizer.delete_trigger_from_db(&previous_id).await,
            );
            log_failure(
                "self-test cleanup",
                &previous_id,
                engine.sanitizer.delete_trigger(&TriggerTarget::from_doc(&previous)).await,
            );
        }

        engine
            .platform
            .create_trigger(&TriggerTarget::from_doc(&doc))
            .await?;
        self.previous = Some(doc.clone());
        engine.store.insert(&id, &doc).await?;
        tracing::info!("🩺 Self-test trigger {id} ({kind}) created");
        Ok(report)
    }

    pub fn spawn(mut self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            loop {
                ticker.tick().await;
                if let Err(e) = self.run_cycle(Utc::now()).await {
                    tracing::error!("❌ Self-test cycle failed: {e}");
                }
            }
        })
    }
}
