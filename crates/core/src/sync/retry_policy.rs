//! How failed contact sync cycles delay the next automatic attempt.

use std::time::Duration;

use super::sync_state_model::SyncCycleStatus;

/// Delay after the first failure; doubles with each further failure in a row.
pub const RETRY_BASE_DELAY_SECS: u64 = 5;

/// Ceiling while the device is offline.
pub const OFFLINE_MAX_DELAY_SECS: u64 = 60;

/// Ceiling for server-side pull/push failures.
pub const FAILURE_MAX_DELAY_SECS: u64 = 10 * 60;

/// Hold on automatic cycles after the server rejected the credentials.
/// Only a re-login fixes this; manual sync bypasses the hold.
pub const AUTH_HOLD_SECS: u64 = 30 * 60;

/// What a remote failure means for the next attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncRetryClass {
    /// Transient: connectivity, timeouts, throttling, server faults.
    Retryable,
    /// The service rejected the request itself; repeating it unchanged fails again.
    Permanent,
    /// Credentials were refused.
    ReauthRequired,
}

impl SyncRetryClass {
    /// Classifies a non-success status from the profile endpoint.
    ///
    /// 409 and 423 show up when another device replaced the record at the
    /// same time; the next cycle pulls the winner and retries.
    pub fn from_http_status(status: u16) -> Self {
        match status {
            401 | 403 => Self::ReauthRequired,
            408 | 409 | 423 | 425 | 429 => Self::Retryable,
            500..=599 => Self::Retryable,
            _ => Self::Permanent,
        }
    }
}

/// Backoff for automatic cycles, keyed by the failed cycle's status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub offline_max_delay: Duration,
    pub failure_max_delay: Duration,
    pub auth_hold: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(RETRY_BASE_DELAY_SECS),
            offline_max_delay: Duration::from_secs(OFFLINE_MAX_DELAY_SECS),
            failure_max_delay: Duration::from_secs(FAILURE_MAX_DELAY_SECS),
            auth_hold: Duration::from_secs(AUTH_HOLD_SECS),
        }
    }
}

impl RetryPolicy {
    /// Wait before the next automatic cycle, given the status of the latest
    /// cycle and how many cycles in a row have failed (including it).
    ///
    /// `None` for statuses that are not failures.
    pub fn delay_after(
        &self,
        status: SyncCycleStatus,
        consecutive_failures: u32,
    ) -> Option<Duration> {
        let ceiling = match status {
            SyncCycleStatus::Ok | SyncCycleStatus::Skipped | SyncCycleStatus::NotDue => {
                return None
            }
            SyncCycleStatus::AuthError => return Some(self.auth_hold),
            SyncCycleStatus::Offline => self.offline_max_delay,
            SyncCycleStatus::PullError | SyncCycleStatus::PushError => self.failure_max_delay,
        };
        let doublings = consecutive_failures.saturating_sub(1).min(16);
        Some(self.base_delay.saturating_mul(1_u32 << doublings).min(ceiling))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_endpoint_statuses_map_to_retry_classes() {
        assert_eq!(SyncRetryClass::from_http_status(503), SyncRetryClass::Retryable);
        assert_eq!(SyncRetryClass::from_http_status(409), SyncRetryClass::Retryable);
        assert_eq!(SyncRetryClass::from_http_status(403), SyncRetryClass::ReauthRequired);
        // the server refused the record as invalid
        assert_eq!(SyncRetryClass::from_http_status(422), SyncRetryClass::Permanent);
    }

    #[test]
    fn offline_retries_stay_short() {
        let policy = RetryPolicy::default();
        let delays: Vec<u64> = (1..=6)
            .map(|n| {
                policy
                    .delay_after(SyncCycleStatus::Offline, n)
                    .map(|d| d.as_secs())
                    .unwrap_or_default()
            })
            .collect();
        assert_eq!(delays, vec![5, 10, 20, 40, 60, 60]);
    }

    #[test]
    fn server_failures_back_off_further_than_offline() {
        let policy = RetryPolicy::default();
        let push = policy.delay_after(SyncCycleStatus::PushError, 8);
        let offline = policy.delay_after(SyncCycleStatus::Offline, 8);
        assert_eq!(push, Some(Duration::from_secs(FAILURE_MAX_DELAY_SECS)));
        assert!(push > offline);
        assert_eq!(
            policy.delay_after(SyncCycleStatus::PullError, 100),
            Some(Duration::from_secs(FAILURE_MAX_DELAY_SECS))
        );
    }

    #[test]
    fn rejected_credentials_hold_automatic_cycles() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.delay_after(SyncCycleStatus::AuthError, 1),
            Some(Duration::from_secs(AUTH_HOLD_SECS))
        );
    }

    #[test]
    fn non_failures_arm_no_backoff() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_after(SyncCycleStatus::Ok, 0), None);
        assert_eq!(policy.delay_after(SyncCycleStatus::Skipped, 3), None);
    }
}
