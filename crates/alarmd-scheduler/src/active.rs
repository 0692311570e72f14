//! Active/standby coordination between the two hosts of a worker.
//!
//! The shared channel holds the active host id under `(key, field)` and
//! broadcasts swaps on `key`. Without a channel the process is always active.
//! A dropped subscription is reopened with backoff and the recorded active
//! host re-read. On top of the protocol sits an operator switch (`/active`)
//! that can keep this host from firing unpinned triggers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use alarmd_core::error::Result;
use alarmd_core::traits::{CoordinationChannel, SwapStream};
use futures::StreamExt;
use tokio::task::JoinHandle;

const RESUBSCRIBE_MIN_DELAY: Duration = Duration::from_millis(100);
const RESUBSCRIBE_MAX_DELAY: Duration = Duration::from_secs(30);

pub struct ActiveHost {
    host: String,
    key: String,
    field: String,
    channel: Option<Arc<dyn CoordinationChannel>>,
    active_host: RwLock<String>,
    enabled: AtomicBool,
}

/// `host1` → `host`.
pub fn host_prefix(host: &str) -> &str {
    host.trim_end_matches(|c: char| c.is_ascii_digit())
}

impl ActiveHost {
    pub fn new(
        host: &str,
        key: &str,
        field: &str,
        channel: Option<Arc<dyn CoordinationChannel>>,
    ) -> Self {
        // Until the channel says otherwise the first host of the pair is active.
        let initial = match channel {
            Some(_) => format!("{}0", host_prefix(host)),
            None => host.to_string(),
        };
        Self {
            host: host.to_string(),
            key: key.to_string(),
            field: field.to_string(),
            channel,
            active_host: RwLock::new(initial),
            enabled: AtomicBool::new(true),
        }
    }

    /// Single-host mode.
    pub fn standalone(host: &str) -> Self {
        Self::new(host, "", "", None)
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// The other host of the pair.
    pub fn redundant_host(&self) -> String {
        let prefix = host_prefix(&self.host);
        if self.host == format!("{prefix}0") {
            format!("{prefix}1")
        } else {
            format!("{prefix}0")
        }
    }

    pub fn active_host(&self) -> String {
        self.active_host
            .read()
            .map(|h| h.clone())
            .unwrap_or_default()
    }

    pub fn is_active(&self) -> bool {
        self.active_host() == self.host
    }

    pub fn enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Flip the operator switch. Returns whether the value changed.
    pub fn set_enabled(&self, enabled: bool) -> bool {
        self.enabled.swap(enabled, Ordering::SeqCst) != enabled
    }

    /// Pinned triggers fire only on their host; the rest only on the
    /// enabled, active host.
    pub fn should_fire(&self, monitor: Option<&str>) -> bool {
        match monitor {
            Some(pinned) => pinned == self.host,
            None => self.enabled() && self.is_active(),
        }
    }

    /// Record a swap notification. Duplicates and stale repeats are no-ops.
    pub fn apply_swap(&self, host: &str) -> bool {
        let Ok(mut active) = self.active_host.write() else {
            return false;
        };
        if *active == host {
            return false;
        }
        tracing::info!("🔀 {host} set to active host for {}", self.key);
        *active = host.to_string();
        true
    }

    /// Read (or seed) the recorded active host and follow swap notifications.
    pub async fn init(self: &Arc<Self>) -> Result<Option<JoinHandle<()>>> {
        let Some(channel) = self.channel.clone() else {
            tracing::info!("🟢 No coordination channel, {} is always active", self.host);
            return Ok(None);
        };

        // Subscribe before reading so a swap in between is not lost.
        let swaps = channel.subscribe(&self.key).await?;
        match channel.get_active(&self.key, &self.field).await? {
            Some(recorded) => {
                self.apply_swap(&recorded);
            }
            None => {
                let initial = self.active_host();
                tracing::info!("🔑 Seeding active host {initial} under {}", self.key);
                channel.set_active(&self.key, &self.field, &initial).await?;
            }
        }
        tracing::info!(
            "🟢 Active host for {} is {} (this host: {})",
            self.key,
            self.active_host(),
            self.host
        );

        let this = Arc::clone(self);
        Ok(Some(tokio::spawn(this.follow_swaps(channel, swaps))))
    }

    async fn follow_swaps(self: Arc<Self>, channel: Arc<dyn CoordinationChannel>, mut swaps: SwapStream) {
        loop {
            while let Some(host) = swaps.next().await {
                self.apply_swap(&host);
            }
            tracing::warn!("⚠️ Swap subscription for {} ended, resubscribing", self.key);
            swaps = self.resubscribe(channel.as_ref()).await;
        }
    }

    async fn resubscribe(&self, channel: &dyn CoordinationChannel) -> SwapStream {
        let mut delay = RESUBSCRIBE_MIN_DELAY;
        loop {
            tokio::time::sleep(delay).await;
            match self.resync(channel).await {
                Ok(swaps) => {
                    tracing::info!(
                        "🔁 Swap subscription for {} restored, active host is {}",
                        self.key,
                        self.active_host()
                    );
                    return swaps;
                }
                Err(e) => {
                    tracing::warn!("⚠️ Resubscribing to {} failed: {e}", self.key);
                    delay = (delay * 2).min(RESUBSCRIBE_MAX_DELAY);
                }
            }
        }
    }

    /// Swaps published while disconnected are recovered from the recorded value.
    async fn resync(&self, channel: &dyn CoordinationChannel) -> Result<SwapStream> {
        let swaps = channel.subscribe(&self.key).await?;
        if let Some(recorded) = channel.get_active(&self.key, &self.field).await? {
            self.apply_swap(&recorded);
        }
        Ok(swaps)
    }

    /// Pass the active role to the redundant host (graceful shutdown).
    /// Returns the new active host when a hand-off happened.
    pub async fn hand_off(&self) -> Result<Option<String>> {
        let Some(channel) = &self.channel else {
            return Ok(None);
        };
        if !self.is_active() {
            return Ok(None);
        }
        let next = self.redundant_host();
        channel.set_active(&self.key, &self.field, &next).await?;
        channel.publish(&self.key, &next).await?;
        self.apply_swap(&next);
        tracing::info!("👋 Handed active role for {} to {next}", self.key);
        Ok(Some(next))
    }
}
