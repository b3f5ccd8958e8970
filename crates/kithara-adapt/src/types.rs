#![forbid(unsafe_code)]

/// One entry of the bitrate ladder.
///
/// Levels are identified by their rank in the ladder (0 = lowest quality).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct QualityLevel {
    /// Declared bitrate in bits per second.
    pub bitrate_bps: u64,
}

impl QualityLevel {
    #[must_use]
    pub const fn new(bitrate_bps: u64) -> Self {
        Self { bitrate_bps }
    }
}

impl From<u64> for QualityLevel {
    fn from(bitrate_bps: u64) -> Self {
        Self::new(bitrate_bps)
    }
}

/// Whether the session plays a live stream or on-demand content.
///
/// Selects the estimator smoothing constants, once per session.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum StreamKind {
    Live,
    #[default]
    OnDemand,
}

impl StreamKind {
    #[must_use]
    pub fn is_live(self) -> bool {
        matches!(self, Self::Live)
    }
}

/// Segment request category. Only `Main` requests are monitored.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum RequestKind {
    #[default]
    Main,
    Other,
}

/// Error kinds reported by the orchestrator.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LoadErrorKind {
    LoadError,
    LoadTimeout,
    /// Any other failure; does not affect monitoring.
    Other,
}

impl LoadErrorKind {
    /// Errors that end the monitored request.
    #[must_use]
    pub fn disarms_monitor(self) -> bool {
        matches!(self, Self::LoadError | Self::LoadTimeout)
    }
}
