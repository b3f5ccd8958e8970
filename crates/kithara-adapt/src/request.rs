#![forbid(unsafe_code)]

use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use web_time::Instant;

use crate::types::{RequestKind, StreamKind};

/// An in-flight segment request, shared between the orchestrator and the engine.
///
/// The orchestrator owns the request and updates `bytes_loaded` as data
/// arrives. The engine holds an `Arc` to the request it monitors and may
/// cancel it through the embedded token.
#[derive(Debug)]
pub struct SegmentRequest {
    level: usize,
    kind: RequestKind,
    stream: StreamKind,
    duration: Duration,
    load_attempt: u32,
    auto_selected: bool,
    bytes_loaded: AtomicU64,
    started_at: Mutex<Option<Instant>>,
    cancel: CancellationToken,
}

impl SegmentRequest {
    /// First attempt of an auto-selected main segment on an on-demand stream.
    #[must_use]
    pub fn new(level: usize, duration: Duration) -> Self {
        Self {
            level,
            kind: RequestKind::Main,
            stream: StreamKind::OnDemand,
            duration,
            load_attempt: 1,
            auto_selected: true,
            bytes_loaded: AtomicU64::new(0),
            started_at: Mutex::new(None),
            cancel: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn with_kind(mut self, kind: RequestKind) -> Self {
        self.kind = kind;
        self
    }

    #[must_use]
    pub fn with_stream(mut self, stream: StreamKind) -> Self {
        self.stream = stream;
        self
    }

    #[must_use]
    pub fn with_load_attempt(mut self, attempt: u32) -> Self {
        self.load_attempt = attempt;
        self
    }

    /// Mark the level as forced by the user rather than chosen by ABR.
    #[must_use]
    pub fn with_auto_selected(mut self, auto_selected: bool) -> Self {
        self.auto_selected = auto_selected;
        self
    }

    /// Use an externally owned cancellation token, e.g. a child of the loader's.
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn level(&self) -> usize {
        self.level
    }

    pub fn kind(&self) -> RequestKind {
        self.kind
    }

    pub fn stream(&self) -> StreamKind {
        self.stream
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn load_attempt(&self) -> u32 {
        self.load_attempt
    }

    pub fn is_auto_selected(&self) -> bool {
        self.auto_selected
    }

    pub fn bytes_loaded(&self) -> u64 {
        self.bytes_loaded.load(Ordering::Acquire)
    }

    /// Report the total bytes received so far. Never decreases.
    pub fn record_progress(&self, total_bytes: u64) {
        self.bytes_loaded.fetch_max(total_bytes, Ordering::AcqRel);
    }

    pub fn started_at(&self) -> Option<Instant> {
        *self.started_at.lock()
    }

    pub(crate) fn mark_started(&self, now: Instant) {
        *self.started_at.lock() = Some(now);
    }

    /// Cancel the download. Single-use: later calls are no-ops.
    pub fn abort(&self) {
        self.cancel.cancel();
    }

    pub fn is_aborted(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Token the loader should observe to stop the transfer.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

/// Completion statistics reported with a finished request.
#[derive(Clone, Copy, Debug)]
pub struct LoadStats {
    pub loaded_at: Instant,
    pub total_bytes: u64,
    /// The payload is partial (aborted transfer).
    pub aborted: bool,
}

impl LoadStats {
    #[must_use]
    pub fn completed(loaded_at: Instant, total_bytes: u64) -> Self {
        Self {
            loaded_at,
            total_bytes,
            aborted: false,
        }
    }
}
