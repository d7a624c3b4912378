//! Observable sync status and cycle outcomes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status the UI renders (online badge, spinner, pending counter).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncState {
    pub is_online: bool,
    pub is_syncing: bool,
    pub pending_operations: usize,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl Default for SyncState {
    /// Online until a request proves otherwise.
    fn default() -> Self {
        Self {
            is_online: true,
            is_syncing: false,
            pending_operations: 0,
            last_sync_at: None,
            last_error: None,
        }
    }
}

/// Outcome class of one reconciliation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncCycleStatus {
    Ok,
    /// Another cycle was in flight; nothing was done.
    Skipped,
    /// An automatic trigger found the last sync fresh enough.
    NotDue,
    Offline,
    PullError,
    PushError,
    AuthError,
}

/// Result of a reconcile call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncCycleResult {
    pub status: SyncCycleStatus,
    pub pulled_count: usize,
    pub pushed_count: usize,
    pub pending_operations: usize,
    pub duration_ms: i64,
}

impl SyncCycleResult {
    pub fn without_cycle(status: SyncCycleStatus, pending_operations: usize) -> Self {
        Self {
            status,
            pulled_count: 0,
            pushed_count: 0,
            pending_operations,
            duration_ms: 0,
        }
    }

    pub fn is_skipped(&self) -> bool {
        self.status == SyncCycleStatus::Skipped
    }

    pub fn is_ok(&self) -> bool {
        self.status == SyncCycleStatus::Ok
    }
}

/// Trigger source for sync cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncCycleTrigger {
    Startup,
    Foreground,
    ScreenFocus,
    LocalMutation,
    Manual,
}

/// App lifecycle events delivered by the host runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleEvent {
    Foreground,
    Background,
    ScreenFocus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_state_serializes_camel_case() {
        let value = serde_json::to_value(SyncState::default()).expect("serialize state");
        assert_eq!(value["isOnline"], true);
        assert_eq!(value["pendingOperations"], 0);
        assert!(value["lastSyncAt"].is_null());
    }

    #[test]
    fn cycle_status_serialization_matches_contract() {
        let actual = [
            SyncCycleStatus::Ok,
            SyncCycleStatus::Skipped,
            SyncCycleStatus::Offline,
            SyncCycleStatus::PushError,
        ]
        .iter()
        .map(|status| serde_json::to_string(status).expect("serialize status"))
        .collect::<Vec<_>>();

        assert_eq!(
            actual,
            vec!["\"ok\"", "\"skipped\"", "\"offline\"", "\"push_error\""]
        );
    }
}
