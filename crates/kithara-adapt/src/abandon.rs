#![forbid(unsafe_code)]

//! Emergency abandonment of a main segment that will not arrive in time.

use std::time::Duration;

use crate::{select::TARGET_BUFFER_SEGMENTS, types::QualityLevel};

/// Fraction of the segment duration to wait before judging a request.
const MIN_ELAPSED_RATIO: f64 = 0.5;
/// Share of the observed throughput trusted for a fallback download.
const FALLBACK_THROUGHPUT_RATIO: f64 = 0.8;

/// Telemetry of the monitored request at one tick.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Probe<'a> {
    pub levels: &'a [QualityLevel],
    pub level: usize,
    /// Segment duration in seconds.
    pub duration: f64,
    pub elapsed: Duration,
    pub bytes_loaded: u64,
    /// Seconds until playback exhausts the buffer.
    pub starvation_delay: f64,
    /// Absolute playback rate, never zero.
    pub rate: f64,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct Fallback {
    pub to_level: usize,
    /// Projected download time of the fallback segment.
    pub fallback_delay: f64,
    /// Projected remaining time of the current request.
    pub remaining_delay: f64,
    pub starvation_delay: f64,
    /// Observed throughput, bytes per second.
    pub load_rate: f64,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) enum Verdict {
    /// Less than half a segment duration elapsed.
    TooEarly,
    /// Enough buffer left, or the request finishes before starvation.
    Safe { remaining_delay: f64 },
    /// Abort would be justified but no lower level downloads faster.
    NoImprovement { remaining_delay: f64, fallback_delay: f64 },
    Abandon(Fallback),
}

#[expect(clippy::cast_precision_loss, reason = "byte counts and bitrates fit f64 mantissa")]
pub(crate) fn evaluate(probe: &Probe<'_>) -> Verdict {
    let elapsed_ms = probe.elapsed.as_secs_f64() * 1000.0;
    if elapsed_ms <= MIN_ELAPSED_RATIO * 1000.0 * probe.duration / probe.rate {
        return Verdict::TooEarly;
    }

    let bitrate_of = |index: usize| probe.levels.get(index).map_or(0, |l| l.bitrate_bps) as f64;

    let loaded = probe.bytes_loaded as f64;
    let load_rate = (loaded * 1000.0 / elapsed_ms).max(1.0);
    let expected_len = loaded.max((probe.duration * bitrate_of(probe.level) / 8.0).round());
    let remaining_delay = (expected_len - loaded) / load_rate;
    let starvation_delay = probe.starvation_delay;

    let low_buffer = starvation_delay < TARGET_BUFFER_SEGMENTS * probe.duration / probe.rate;
    if !(low_buffer && remaining_delay > starvation_delay) {
        return Verdict::Safe { remaining_delay };
    }

    // Highest lower level whose download fits before starvation. When none
    // fits the loop runs off the bottom: the compared delay stays level 0's
    // and the index is clamped to 0 only afterwards.
    let mut fallback_delay = f64::INFINITY;
    let mut matched = None;
    for index in (0..probe.level).rev() {
        fallback_delay = probe.duration * bitrate_of(index)
            / (8.0 * FALLBACK_THROUGHPUT_RATIO * load_rate);
        if fallback_delay < starvation_delay {
            matched = Some(index);
            break;
        }
    }

    if fallback_delay < remaining_delay {
        Verdict::Abandon(Fallback {
            to_level: matched.unwrap_or(0),
            fallback_delay,
            remaining_delay,
            starvation_delay,
            load_rate,
        })
    } else {
        Verdict::NoImprovement {
            remaining_delay,
            fallback_delay,
        }
    }
}
