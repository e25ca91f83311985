use crate::admission::AdmissionStatsSnapshot;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Lifecycle of a scanning session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    Idle,
    AwaitingPermission,
    Starting,
    Running,
    Stopping,
    Faulted,
}

impl SessionState {
    /// Whether a start request is in progress or scanning is live
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SessionState::AwaitingPermission | SessionState::Starting | SessionState::Running
        )
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::AwaitingPermission => "awaiting_permission",
            SessionState::Starting => "starting",
            SessionState::Running => "running",
            SessionState::Stopping => "stopping",
            SessionState::Faulted => "faulted",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// A new session is being brought up
    Started,
    /// A session was already awaiting permission, starting or running
    AlreadyActive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The session was torn down
    Stopped,
    /// Nothing was running
    AlreadyIdle,
}

/// Controller-wide counters
#[derive(Debug, Default)]
pub struct SessionStats {
    pub sessions_started: AtomicU64,
    pub detections_forwarded: AtomicU64,
    pub detections_empty: AtomicU64,
    pub detections_discarded: AtomicU64,
    pub detector_failures: AtomicU64,
}

impl SessionStats {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionStatsSnapshot {
    pub admission: AdmissionStatsSnapshot,
    pub sessions_started: u64,
    pub detections_forwarded: u64,
    pub detections_empty: u64,
    pub detections_discarded: u64,
    pub detector_failures: u64,
}

impl SessionStatsSnapshot {
    pub(crate) fn capture(stats: &SessionStats, admission: AdmissionStatsSnapshot) -> Self {
        Self {
            admission,
            sessions_started: stats.sessions_started.load(Ordering::Relaxed),
            detections_forwarded: stats.detections_forwarded.load(Ordering::Relaxed),
            detections_empty: stats.detections_empty.load(Ordering::Relaxed),
            detections_discarded: stats.detections_discarded.load(Ordering::Relaxed),
            detector_failures: stats.detector_failures.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_active_states() {
        assert!(!SessionState::Idle.is_active());
        assert!(SessionState::AwaitingPermission.is_active());
        assert!(SessionState::Starting.is_active());
        assert!(SessionState::Running.is_active());
        assert!(!SessionState::Stopping.is_active());
        assert!(!SessionState::Faulted.is_active());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(SessionState::AwaitingPermission.to_string(), "awaiting_permission");
        assert_eq!(SessionState::Faulted.to_string(), "faulted");
    }
}
