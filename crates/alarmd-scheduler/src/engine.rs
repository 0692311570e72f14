//! The alarm engine: shared handles every runtime path works through.
//!
//! Firing lives in `fire.rs`, the store feed in `sync.rs`; both are `impl`
//! blocks on [`AlarmEngine`].

use std::sync::Arc;

use alarmd_core::config::AlarmConfig;
use alarmd_core::traits::{Platform, TriggerStore};
use serde::Serialize;

use crate::active::ActiveHost;
use crate::monitor::{MonitorReport, MonitorStatus};
use crate::registry::TriggerRegistry;
use crate::retry::RetryPolicy;
use crate::sanitizer::{Sanitizer, log_failure};

pub struct AlarmEngine {
    pub(crate) worker: String,
    pub(crate) registry: Arc<TriggerRegistry>,
    pub(crate) store: Arc<dyn TriggerStore>,
    pub(crate) platform: Arc<dyn Platform>,
    pub(crate) active: Arc<ActiveHost>,
    pub(crate) sanitizer: Sanitizer,
    pub(crate) monitor: MonitorStatus,
    pub(crate) retry: RetryPolicy,
}

/// Snapshot served by the health endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineHealth {
    pub worker: String,
    pub host: String,
    pub active_host: String,
    pub active: bool,
    pub enabled: bool,
    pub triggers: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub monitor: Option<MonitorReport>,
}

impl AlarmEngine {
    pub fn new(
        config: &AlarmConfig,
        store: Arc<dyn TriggerStore>,
        platform: Arc<dyn Platform>,
        active: Arc<ActiveHost>,
    ) -> Arc<Self> {
        let registry = Arc::new(TriggerRegistry::new());
        let sanitizer = Sanitizer::new(
            Arc::clone(&store),
            Arc::clone(&platform),
            Arc::clone(&registry),
            &config.retry,
        );
        Arc::new(Self {
            worker: config.provider.worker.clone(),
            registry,
            store,
            platform,
            active,
            sanitizer,
            monitor: MonitorStatus::default(),
            retry: RetryPolicy::from_config(&config.retry),
        })
    }

    pub fn worker(&self) -> &str {
        &self.worker
    }

    pub fn host(&self) -> &str {
        self.active.host()
    }

    pub fn registry(&self) -> &TriggerRegistry {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn TriggerStore> {
        &self.store
    }

    pub fn platform(&self) -> &Arc<dyn Platform> {
        &self.platform
    }

    pub fn active(&self) -> &ActiveHost {
        &self.active
    }

    pub fn sanitizer(&self) -> &Sanitizer {
        &self.sanitizer
    }

    pub fn monitor_status(&self) -> &MonitorStatus {
        &self.monitor
    }

    pub fn health(&self) -> EngineHealth {
        EngineHealth {
            worker: self.worker.clone(),
            host: self.host().to_string(),
            active_host: self.active.active_host(),
            active: self.active.is_active(),
            enabled: self.active.enabled(),
            triggers: self.registry.len(),
            monitor: self.monitor.last(),
        }
    }

    /// Disable through the sanitizer, logging instead of propagating.
    pub(crate) async fn retire(&self, id: &str, status_code: Option<u16>, message: &str) {
        log_failure(
            "disable",
            id,
            self.sanitizer.disable(id, status_code, message).await,
        );
    }

    /// Stop every timer. Documents are left untouched.
    pub fn shutdown(&self) {
        let armed = self.registry.len();
        self.registry.clear();
        tracing::info!("🛑 Stopped {armed} trigger timers");
    }
}
