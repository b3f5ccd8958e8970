#![forbid(unsafe_code)]

use std::time::Duration;

use crate::types::StreamKind;

/// Half-lives (seconds) of the fast and slow EWMA used by the estimator.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EwmaHalfLife {
    pub fast: f64,
    pub slow: f64,
}

/// ABR engine configuration.
///
/// Read once at session start; the engine never mutates it.
#[derive(Clone, Debug)]
pub struct AbrOptions {
    /// Smoothing constants for live streams.
    pub live_half_life: EwmaHalfLife,
    /// Smoothing constants for on-demand streams.
    pub vod_half_life: EwmaHalfLife,
    /// Estimate (bits per second) reported before any sample was recorded.
    pub default_estimate_bps: u64,
    /// Gaps in the buffered ranges smaller than this (seconds) are ignored.
    pub max_buffer_hole: f64,
    /// Cadence of the abandonment monitor.
    pub monitor_interval: Duration,
    /// Lowest bitrate auto selection may pick. Zero disables the floor.
    pub min_auto_bitrate_bps: u64,
    /// Segment duration assumed by selection until a main segment was seen.
    pub default_segment_duration: Duration,
}

impl Default for AbrOptions {
    fn default() -> Self {
        Self {
            live_half_life: EwmaHalfLife {
                fast: 5.0,
                slow: 9.0,
            },
            vod_half_life: EwmaHalfLife {
                fast: 4.0,
                slow: 15.0,
            },
            default_estimate_bps: 500_000,
            max_buffer_hole: 0.5,
            monitor_interval: Duration::from_millis(100),
            min_auto_bitrate_bps: 0,
            default_segment_duration: Duration::from_secs(6),
        }
    }
}

impl AbrOptions {
    /// Smoothing constants for the given stream kind.
    #[must_use]
    pub fn half_life(&self, stream: StreamKind) -> EwmaHalfLife {
        match stream {
            StreamKind::Live => self.live_half_life,
            StreamKind::OnDemand => self.vod_half_life,
        }
    }

    #[must_use]
    pub fn with_default_estimate_bps(mut self, bps: u64) -> Self {
        self.default_estimate_bps = bps;
        self
    }

    #[must_use]
    pub fn with_max_buffer_hole(mut self, secs: f64) -> Self {
        self.max_buffer_hole = secs;
        self
    }

    #[must_use]
    pub fn with_monitor_interval(mut self, interval: Duration) -> Self {
        self.monitor_interval = interval;
        self
    }

    #[must_use]
    pub fn with_min_auto_bitrate_bps(mut self, bps: u64) -> Self {
        self.min_auto_bitrate_bps = bps;
        self
    }

    #[must_use]
    pub fn with_default_segment_duration(mut self, duration: Duration) -> Self {
        self.default_segment_duration = duration;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn half_life_is_keyed_on_stream_kind() {
        let opts = AbrOptions::default();
        assert_eq!(opts.half_life(StreamKind::Live), opts.live_half_life);
        assert_eq!(opts.half_life(StreamKind::OnDemand), opts.vod_half_life);
        assert_ne!(opts.live_half_life, opts.vod_half_life);
    }

    #[test]
    fn builders_override_defaults() {
        let opts = AbrOptions::default()
            .with_default_estimate_bps(1_000_000)
            .with_max_buffer_hole(0.25)
            .with_monitor_interval(Duration::from_millis(50));
        assert_eq!(opts.default_estimate_bps, 1_000_000);
        assert!((opts.max_buffer_hole - 0.25).abs() < f64::EPSILON);
        assert_eq!(opts.monitor_interval, Duration::from_millis(50));
    }
}
