#![forbid(unsafe_code)]

//! Next-level selection: a greedy scan from the highest allowed level down.

use crate::types::QualityLevel;

/// Why a level was picked.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SelectionReason {
    /// One-shot override set by the orchestrator or by an abandonment.
    Forced,
    /// Buffer above target; highest level that downloads within the slack.
    Comfortable,
    /// Buffer at or below target; highest level that still nets buffer gain.
    Recovery,
    /// No level passed either scan; degraded default.
    NoFeasibleLevel,
    /// The ladder is empty.
    NoLevels,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct LevelDecision {
    pub level: usize,
    pub reason: SelectionReason,
}

/// Inputs of a selection pass. Levels are scanned from `max_level` down to `min_level`.
#[derive(Clone, Copy, Debug)]
pub(crate) struct SelectionContext<'a> {
    pub levels: &'a [QualityLevel],
    pub min_level: usize,
    pub max_level: usize,
    pub estimate_bps: u64,
    /// Segment duration in seconds.
    pub duration: f64,
    /// Seconds until playback exhausts the buffer.
    pub starvation_delay: f64,
    /// Absolute playback rate, never zero.
    pub rate: f64,
}

/// Segments of buffer the engine tries to keep ahead of playback.
pub(crate) const TARGET_BUFFER_SEGMENTS: f64 = 2.0;
/// Weight of an existing deficit in the recovery scan.
const DEFICIT_DAMPING: f64 = 0.5;

#[expect(clippy::cast_precision_loss, reason = "bitrates fit f64 mantissa")]
pub(crate) fn select_level(ctx: &SelectionContext<'_>) -> LevelDecision {
    let target_min_buffered = TARGET_BUFFER_SEGMENTS * ctx.duration / ctx.rate;
    let available_fetch_time = ctx.starvation_delay - target_min_buffered;
    let estimate = ctx.estimate_bps.max(1) as f64;

    let fetch_time = |index: usize| {
        let bitrate = ctx.levels.get(index).map_or(0, |l| l.bitrate_bps) as f64;
        bitrate * ctx.duration / estimate
    };
    let candidates = || (ctx.min_level..=ctx.max_level).rev();

    tracing::debug!(
        estimate_bps = ctx.estimate_bps,
        duration = ctx.duration,
        starvation_delay = ctx.starvation_delay,
        available_fetch_time,
        min_level = ctx.min_level,
        max_level = ctx.max_level,
        "ABR select: evaluating"
    );

    if available_fetch_time > 0.0 {
        if let Some(level) = candidates().find(|&i| fetch_time(i) < available_fetch_time) {
            return LevelDecision {
                level,
                reason: SelectionReason::Comfortable,
            };
        }
    }

    if let Some(level) = candidates().find(|&i| {
        let time_recovered = ctx.duration - fetch_time(i);
        DEFICIT_DAMPING * available_fetch_time + time_recovered > 0.0
    }) {
        return LevelDecision {
            level,
            reason: SelectionReason::Recovery,
        };
    }

    tracing::warn!(
        estimate_bps = ctx.estimate_bps,
        available_fetch_time,
        fallback = ctx.min_level,
        "ABR select: no feasible level"
    );
    LevelDecision {
        level: ctx.min_level,
        reason: SelectionReason::NoFeasibleLevel,
    }
}
