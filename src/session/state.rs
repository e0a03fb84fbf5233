use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a scanning session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanState {
    Idle,
    Scanning,
    Finalizing,
}

impl fmt::Display for ScanState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScanState::Idle => "idle",
            ScanState::Scanning => "scanning",
            ScanState::Finalizing => "finalizing",
        };
        f.write_str(name)
    }
}

/// Session counters, kept across sessions
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub sessions_started: u64,
    pub camera_failures: u64,
    pub frames_captured: u64,
    pub captures_skipped: u64,
    pub batches_submitted: u64,
    pub analyses_failed: u64,
    pub stale_discarded: u64,
}
