//! alarmd configuration system.
//!
//! TOML file first, then the environment variables the provider has always
//! been deployed with (`WORKER`, `HOST_INDEX`, `ROUTER_HOST`, ...).

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{AlarmError, Result};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlarmConfig {
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub coordination: CoordinationConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
}

impl AlarmConfig {
    /// Load config from the default path (~/.alarmd/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AlarmError::Config(format!("Failed to read config: {e}")))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| AlarmError::Config(format!("Failed to parse config: {e}")))
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".alarmd")
            .join("config.toml")
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary variable lookup.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(worker) = var("WORKER") {
            self.provider.worker = worker;
        }
        if let Some(host) = var("HOST_INDEX") {
            self.provider.host = host;
        }
        if let Some(router) = var("ROUTER_HOST") {
            self.provider.router_host = router;
        }
        if let Some(auth) = var("ENDPOINT_AUTH") {
            self.provider.endpoint_auth = Some(auth);
        }
        if let Some(port) = var("PORT") {
            self.provider.port = port
                .parse()
                .map_err(|_| AlarmError::Config(format!("PORT '{port}' is not a valid port")))?;
        }
        if let Some(url) = var("DB_URL") {
            self.store.backend = StoreBackend::CouchDb;
            self.store.url = url;
        }
        if let Some(name) = var("DB_NAME") {
            self.store.db_name = name;
        } else if let Some(prefix) = var("DB_PREFIX") {
            self.store.db_name = format!("{prefix}{}", default_db_suffix());
        }
        if let Some(user) = var("DB_USERNAME") {
            self.store.username = Some(user);
        }
        if let Some(password) = var("DB_PASSWORD") {
            self.store.password = Some(password);
        }
        if let Some(url) = var("REDIS_URL") {
            self.coordination.redis_url = Some(url);
        }
        if let Some(prefix) = var("REDIS_KEY_PREFIX") {
            self.coordination.key_prefix = Some(prefix);
        }
        if let Some(auth) = var("MONITORING_AUTH") {
            self.monitor.auth = Some(auth);
        }
        if let Some(interval) = var("MONITORING_INTERVAL") {
            let ms: u64 = interval.parse().map_err(|_| {
                AlarmError::Config(format!("MONITORING_INTERVAL '{interval}' is not a number"))
            })?;
            self.monitor.interval_secs = (ms / 1000).max(1);
        }
        Ok(())
    }

    /// Coordination key shared by both hosts of this worker.
    pub fn redis_key(&self) -> String {
        let prefix = self
            .coordination
            .key_prefix
            .as_deref()
            .unwrap_or(&self.store.db_name);
        format!("{prefix}_{}", self.provider.worker)
    }
}

/// Identity and platform settings of this provider process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Shard this process serves.
    #[serde(default = "default_worker")]
    pub worker: String,
    /// Host id within the redundant pair (`host0` / `host1`).
    #[serde(default = "default_host")]
    pub host: String,
    /// Platform router host; `https://` is assumed when no scheme is given.
    #[serde(default = "default_router_host")]
    pub router_host: String,
    /// `user:pass` required on `/health` and `/active` when set.
    #[serde(default)]
    pub endpoint_auth: Option<String>,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Upper bound accepted for `maxTriggers` on create.
    #[serde(default = "default_triggers_limit")]
    pub triggers_limit: i64,
    /// Workers new triggers may be assigned to.
    #[serde(default = "default_workers")]
    pub workers: Vec<String>,
    /// Skip TLS verification towards the router (self-signed deployments).
    #[serde(default)]
    pub accept_invalid_certs: bool,
}

fn default_worker() -> String { "worker0".into() }
fn default_host() -> String { "host0".into() }
fn default_router_host() -> String { "localhost".into() }
fn default_port() -> u16 { 8080 }
fn default_triggers_limit() -> i64 { 10_000 }
fn default_workers() -> Vec<String> { vec![default_worker()] }

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            worker: default_worker(),
            host: default_host(),
            router_host: default_router_host(),
            endpoint_auth: None,
            port: default_port(),
            triggers_limit: default_triggers_limit(),
            workers: default_workers(),
            accept_invalid_certs: false,
        }
    }
}

impl ProviderConfig {
    /// Base URI of the platform router.
    pub fn router_uri(&self) -> String {
        if self.router_host.starts_with("http://") || self.router_host.starts_with("https://") {
            self.router_host.trim_end_matches('/').to_string()
        } else {
            format!("https://{}", self.router_host.trim_end_matches('/'))
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    #[serde(rename = "couchdb")]
    CouchDb,
}

/// Trigger document store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    #[serde(default = "default_store_url")]
    pub url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_db_name")]
    pub db_name: String,
}

fn default_store_url() -> String { "http://127.0.0.1:5984".into() }
fn default_db_suffix() -> String { "alarmservice".into() }
fn default_db_name() -> String { default_db_suffix() }

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            url: default_store_url(),
            username: None,
            password: None,
            db_name: default_db_name(),
        }
    }
}

/// Active/standby coordination. No redis url means single-host mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinationConfig {
    #[serde(default)]
    pub redis_url: Option<String>,
    /// Key prefix; defaults to the database name.
    #[serde(default)]
    pub key_prefix: Option<String>,
    #[serde(default = "default_redis_field")]
    pub field: String,
}

fn default_redis_field() -> String { "active".into() }

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            key_prefix: None,
            field: default_redis_field(),
        }
    }
}

/// Retry budgets for dispatch and store writes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first dispatch attempt.
    #[serde(default = "default_retry_attempts")]
    pub attempts: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub delay_ms: u64,
    /// Ceiling for the rate-limit back-off.
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Retries of a conflicting store or platform write.
    #[serde(default = "default_conflict_attempts")]
    pub conflict_attempts: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub conflict_delay_ms: u64,
}

fn default_retry_attempts() -> u32 { 10 }
fn default_retry_delay_ms() -> u64 { 1000 }
fn default_max_backoff_ms() -> u64 { 60_000 }
fn default_conflict_attempts() -> u32 { 5 }

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: default_retry_attempts(),
            delay_ms: default_retry_delay_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            conflict_attempts: default_conflict_attempts(),
            conflict_delay_ms: default_retry_delay_ms(),
        }
    }
}

/// Synthetic self-test trigger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Credential used to create the self-test trigger. Disabled when unset.
    #[serde(default)]
    pub auth: Option<String>,
    #[serde(default = "default_monitor_interval")]
    pub interval_secs: u64,
}

fn default_monitor_interval() -> u64 { 300 }

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            auth: None,
            interval_secs: default_monitor_interval(),
        }
    }
}
