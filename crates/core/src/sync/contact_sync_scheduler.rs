//! Scheduling constants and the staleness check for automatic cycles.

use std::time::Duration;

use chrono::{DateTime, Utc};

use super::retry_policy::RetryPolicy;

/// Quiet period before staged mutations are written.
pub const BATCH_DELAY_MS: u64 = 1_000;

/// Minimum age of the last successful sync before a lifecycle event triggers a cycle.
pub const AUTO_SYNC_INTERVAL_SECS: u64 = 5 * 60;

/// Tunables for the contact sync service.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Debounce window of the write coalescer.
    pub batch_delay: Duration,
    /// Staleness threshold checked on foreground and screen-focus events.
    pub auto_sync_interval: Duration,
    /// Attempt a push right after each persisted local mutation.
    pub push_on_mutation: bool,
    /// Backoff applied to automatic cycles after a failure.
    pub retry: RetryPolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_delay: Duration::from_millis(BATCH_DELAY_MS),
            auto_sync_interval: Duration::from_secs(AUTO_SYNC_INTERVAL_SECS),
            push_on_mutation: true,
            retry: RetryPolicy::default(),
        }
    }
}

/// Whether an automatic (lifecycle-triggered) cycle is due.
///
/// Due when the device never synced or the last sync is older than
/// `interval`, and any failure backoff window has passed.
pub fn should_auto_sync(
    last_sync_at: Option<DateTime<Utc>>,
    next_retry_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    interval: Duration,
) -> bool {
    if let Some(retry_at) = next_retry_at {
        if now < retry_at {
            return false;
        }
    }
    match last_sync_at {
        None => true,
        Some(last) => match chrono::Duration::from_std(interval) {
            Ok(interval) => now.signed_duration_since(last) > interval,
            Err(_) => false,
        },
    }
}
