#![forbid(unsafe_code)]

use std::sync::Arc;

use crate::{
    request::{LoadStats, SegmentRequest},
    types::LoadErrorKind,
};

/// Orchestrator → engine notifications.
#[derive(Clone, Debug)]
pub enum Notification {
    /// A segment request began downloading.
    RequestStarted(Arc<SegmentRequest>),
    /// A segment request finished successfully.
    RequestCompleted {
        request: Arc<SegmentRequest>,
        stats: LoadStats,
    },
    /// A load failed.
    Error(LoadErrorKind),
}

/// Engine → orchestrator events.
#[derive(Clone, Debug)]
pub enum AbrEvent {
    /// The monitored request was cancelled; re-request at `to_level`.
    Abandoned(Abandonment),
    /// A completed request was fed to the estimator.
    EstimateUpdated { estimate_bps: u64 },
}

/// Emergency switch-down of an in-flight request.
#[derive(Clone, Debug)]
pub struct Abandonment {
    /// The cancelled request.
    pub request: Arc<SegmentRequest>,
    pub from_level: usize,
    /// Level forced for the next selection.
    pub to_level: usize,
    /// Projected seconds to finish the cancelled request.
    pub remaining_delay_secs: f64,
    /// Projected seconds to download the segment at `to_level`.
    pub fallback_delay_secs: f64,
    /// Seconds of playback left in the buffer when the switch happened.
    pub starvation_delay_secs: f64,
}
