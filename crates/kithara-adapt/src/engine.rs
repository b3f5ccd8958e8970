#![forbid(unsafe_code)]

use std::{sync::Arc, time::Duration};

use tracing::{debug, info, trace, warn};
use web_time::Instant;

use crate::{
    AbrError, AbrOptions, AbrResult, BandwidthEstimator, Estimator, MediaState,
    abandon::{self, Probe, Verdict},
    events::{Abandonment, AbrEvent, Notification},
    request::{LoadStats, SegmentRequest},
    select::{self, LevelDecision, SelectionContext, SelectionReason},
    types::{LoadErrorKind, QualityLevel, RequestKind, StreamKind},
};

/// Builds the session estimator once the stream kind is known.
pub type EstimatorFactory<E> = Box<dyn FnOnce(&AbrOptions, StreamKind) -> E + Send>;

/// The request under watch. At most one exists per engine.
#[derive(Debug)]
struct Monitor {
    request: Arc<SegmentRequest>,
    epoch: u64,
}

/// Selection policy state owned by the engine.
#[derive(Clone, Copy, Debug, Default)]
struct AutoLevelState {
    capping: Option<usize>,
    forced_next: Option<usize>,
    last_loaded_level: Option<usize>,
}

/// Rate-adaptation decision engine.
///
/// Synchronous and runtime-agnostic: the embedder feeds it notifications,
/// calls [`AbrEngine::tick`] at [`AbrOptions::monitor_interval`] while
/// [`AbrEngine::is_monitoring`] holds, and queries the next level on demand.
/// All calls must be serialized; see [`crate::driver`] for a tokio adapter.
pub struct AbrEngine<M, E = BandwidthEstimator> {
    opts: AbrOptions,
    levels: Vec<QualityLevel>,
    media: M,
    estimator: Option<E>,
    make_estimator: Option<EstimatorFactory<E>>,
    monitor: Option<Monitor>,
    monitor_epoch: u64,
    state: AutoLevelState,
    last_segment_duration: Option<Duration>,
}

impl<M: MediaState> AbrEngine<M, BandwidthEstimator> {
    /// Engine with the default EWMA estimator, created on the first main request.
    #[must_use]
    pub fn new(opts: AbrOptions, levels: Vec<QualityLevel>, media: M) -> Self {
        Self::with_estimator_factory(opts, levels, media, BandwidthEstimator::for_stream)
    }
}

impl<M: MediaState, E: Estimator> AbrEngine<M, E> {
    /// Engine whose estimator is built lazily by `factory`.
    pub fn with_estimator_factory(
        opts: AbrOptions,
        levels: Vec<QualityLevel>,
        media: M,
        factory: impl FnOnce(&AbrOptions, StreamKind) -> E + Send + 'static,
    ) -> Self {
        Self {
            opts,
            levels,
            media,
            estimator: None,
            make_estimator: Some(Box::new(factory)),
            monitor: None,
            monitor_epoch: 0,
            state: AutoLevelState::default(),
            last_segment_duration: None,
        }
    }

    /// Engine with an estimator already chosen for the session.
    pub fn with_estimator(
        opts: AbrOptions,
        levels: Vec<QualityLevel>,
        media: M,
        estimator: E,
    ) -> Self {
        Self {
            opts,
            levels,
            media,
            estimator: Some(estimator),
            make_estimator: None,
            monitor: None,
            monitor_epoch: 0,
            state: AutoLevelState::default(),
            last_segment_duration: None,
        }
    }

    /// Build the estimator for `stream`. Allowed once per session.
    ///
    /// # Errors
    ///
    /// [`AbrError::EstimatorAlreadyInitialized`] if an estimator exists.
    pub fn initialize_estimator(&mut self, stream: StreamKind) -> AbrResult<()> {
        if self.estimator.is_some() {
            return Err(AbrError::EstimatorAlreadyInitialized(stream));
        }
        self.ensure_estimator(stream);
        Ok(())
    }

    /// Build the estimator on first use. Exactly one of `estimator` and
    /// `make_estimator` is set at any time.
    fn ensure_estimator(&mut self, stream: StreamKind) {
        if self.estimator.is_some() {
            return;
        }
        let Some(factory) = self.make_estimator.take() else {
            return;
        };
        debug!(?stream, "ABR: estimator initialized");
        self.estimator = Some(factory(&self.opts, stream));
    }

    pub fn is_estimator_initialized(&self) -> bool {
        self.estimator.is_some()
    }

    /// Current bandwidth estimate, or the configured default before the
    /// estimator exists.
    pub fn estimate_bps(&self) -> u64 {
        self.estimator
            .as_ref()
            .map_or(self.opts.default_estimate_bps, Estimator::estimate_bps)
    }

    pub fn options(&self) -> &AbrOptions {
        &self.opts
    }

    pub fn levels(&self) -> &[QualityLevel] {
        &self.levels
    }

    pub fn media(&self) -> &M {
        &self.media
    }

    pub fn is_monitoring(&self) -> bool {
        self.monitor.is_some()
    }

    /// Identifier of the armed monitor; changes every time a request is armed.
    pub fn monitor_epoch(&self) -> Option<u64> {
        self.monitor.as_ref().map(|m| m.epoch)
    }

    pub fn monitored_request(&self) -> Option<&Arc<SegmentRequest>> {
        self.monitor.as_ref().map(|m| &m.request)
    }

    pub fn last_loaded_level(&self) -> Option<usize> {
        self.state.last_loaded_level
    }

    pub fn level_cap(&self) -> Option<usize> {
        self.state.capping
    }

    /// Cap the highest level auto selection may return. `None` removes the cap.
    ///
    /// # Errors
    ///
    /// [`AbrError::LevelOutOfRange`] if `cap` is not a ladder index.
    pub fn set_level_cap(&mut self, cap: Option<usize>) -> AbrResult<()> {
        self.check_level(cap)?;
        self.state.capping = cap;
        Ok(())
    }

    pub fn forced_next_level(&self) -> Option<usize> {
        self.state.forced_next
    }

    /// Force the next selection. Cleared by the next successful main completion.
    ///
    /// # Errors
    ///
    /// [`AbrError::LevelOutOfRange`] if `level` is not a ladder index.
    pub fn set_forced_next_level(&mut self, level: Option<usize>) -> AbrResult<()> {
        self.check_level(level)?;
        self.state.forced_next = level;
        Ok(())
    }

    fn check_level(&self, level: Option<usize>) -> AbrResult<()> {
        match level {
            Some(index) if index >= self.levels.len() => Err(AbrError::LevelOutOfRange {
                index,
                count: self.levels.len(),
            }),
            _ => Ok(()),
        }
    }

    /// Lowest level whose bitrate reaches `min_auto_bitrate_bps`.
    pub fn min_auto_level(&self) -> usize {
        if self.opts.min_auto_bitrate_bps == 0 {
            return 0;
        }
        self.levels
            .iter()
            .position(|l| l.bitrate_bps >= self.opts.min_auto_bitrate_bps)
            .unwrap_or(0)
    }

    /// Dispatch an orchestrator notification.
    pub fn handle(&mut self, notification: Notification, now: Instant) -> Option<AbrEvent> {
        match notification {
            Notification::RequestStarted(request) => {
                self.on_request_started(request, now);
                None
            }
            Notification::RequestCompleted { request, stats } => {
                self.on_request_completed(&request, stats)
            }
            Notification::Error(kind) => {
                self.on_error(kind);
                None
            }
        }
    }

    /// Arm the monitor for a main request and stamp its start time.
    pub fn on_request_started(&mut self, request: Arc<SegmentRequest>, now: Instant) {
        if request.kind() != RequestKind::Main {
            trace!(level = request.level(), "ABR: ignoring non-main request");
            return;
        }

        request.mark_started(now);
        self.ensure_estimator(request.stream());
        self.last_segment_duration = Some(request.duration());

        if let Some(previous) = self.monitor.take() {
            if !Arc::ptr_eq(&previous.request, &request) {
                warn!(
                    previous_level = previous.request.level(),
                    level = request.level(),
                    "ABR: monitor already armed, replacing"
                );
            }
        }

        self.monitor_epoch += 1;
        debug!(
            level = request.level(),
            duration = request.duration().as_secs_f64(),
            epoch = self.monitor_epoch,
            "ABR: monitoring request"
        );
        self.monitor = Some(Monitor {
            request,
            epoch: self.monitor_epoch,
        });
    }

    /// Feed a completed main request back into the estimator.
    ///
    /// Only the monitored request is acted upon. Duplicate completions and
    /// completions of requests whose monitor was replaced or disarmed are
    /// stale and ignored.
    pub fn on_request_completed(
        &mut self,
        request: &Arc<SegmentRequest>,
        stats: LoadStats,
    ) -> Option<AbrEvent> {
        if request.kind() != RequestKind::Main {
            return None;
        }

        if !self.is_monitored(request) {
            debug!(level = request.level(), "ABR: ignoring completion of unmonitored request");
            return None;
        }
        self.disarm_monitor();

        if request.is_aborted() {
            debug!(level = request.level(), "ABR: ignoring completion of cancelled request");
            return None;
        }

        let mut event = None;
        if request.load_attempt() == 1 && !stats.aborted {
            if let Some(started_at) = request.started_at() {
                self.ensure_estimator(request.stream());
                let elapsed = stats.loaded_at.saturating_duration_since(started_at);
                if let Some(estimator) = self.estimator.as_mut() {
                    estimator.sample(elapsed, stats.total_bytes);
                    let estimate_bps = estimator.estimate_bps();
                    debug!(
                        level = request.level(),
                        bytes = stats.total_bytes,
                        elapsed_ms = elapsed.as_millis(),
                        estimate_bps,
                        "ABR: completion sampled"
                    );
                    event = Some(AbrEvent::EstimateUpdated { estimate_bps });
                }
            } else {
                debug!(level = request.level(), "ABR: completion without start time, not sampled");
            }
        }

        self.state.last_loaded_level = Some(request.level());
        self.state.forced_next = None;
        event
    }

    pub fn on_error(&mut self, kind: LoadErrorKind) {
        if kind.disarms_monitor() {
            debug!(?kind, "ABR: load failed, disarming monitor");
            self.disarm_monitor();
        }
    }

    /// Stop monitoring. No-op when idle.
    pub fn disarm_monitor(&mut self) {
        if let Some(monitor) = self.monitor.take() {
            trace!(epoch = monitor.epoch, "ABR: monitor disarmed");
        }
    }

    fn is_monitored(&self, request: &Arc<SegmentRequest>) -> bool {
        self.monitor
            .as_ref()
            .is_some_and(|m| Arc::ptr_eq(&m.request, request))
    }

    /// One monitor activation: decide whether the in-flight request must be
    /// abandoned. On abandonment the request is cancelled, the monitor is
    /// disarmed and the fallback level is forced for the next selection.
    pub fn tick(&mut self, now: Instant) -> Option<Abandonment> {
        let request = Arc::clone(&self.monitor.as_ref()?.request);

        if request.is_aborted() {
            debug!(level = request.level(), "ABR tick: request no longer in flight");
            self.disarm_monitor();
            return None;
        }

        let rate = self.media.playback_rate();
        let playing = !self.media.is_paused() && rate != 0.0;
        if !playing && self.media.has_data() {
            return None;
        }
        if !request.is_auto_selected() || request.level() == 0 {
            return None;
        }
        if request.level() >= self.levels.len() {
            warn!(
                level = request.level(),
                count = self.levels.len(),
                "ABR tick: request level outside ladder"
            );
            return None;
        }
        // Nothing to project against until the host sets a rate.
        let rate = rate.abs();
        if rate == 0.0 {
            return None;
        }
        let started_at = request.started_at()?;

        let position = self.media.current_time();
        let buffered = self.media.buffered_range(position, self.opts.max_buffer_hole);
        let elapsed = now.saturating_duration_since(started_at);
        let bytes_loaded = request.bytes_loaded();

        let verdict = abandon::evaluate(&Probe {
            levels: &self.levels,
            level: request.level(),
            duration: request.duration().as_secs_f64(),
            elapsed,
            bytes_loaded,
            starvation_delay: (buffered.end - position) / rate,
            rate,
        });

        let fallback = match verdict {
            Verdict::Abandon(fallback) => fallback,
            other => {
                trace!(
                    level = request.level(),
                    elapsed_ms = elapsed.as_millis(),
                    bytes_loaded,
                    ?other,
                    "ABR tick"
                );
                return None;
            }
        };

        info!(
            from_level = request.level(),
            to_level = fallback.to_level,
            load_rate = fallback.load_rate,
            remaining_delay = fallback.remaining_delay,
            fallback_delay = fallback.fallback_delay,
            starvation_delay = fallback.starvation_delay,
            "ABR: abandoning segment request"
        );

        if let Some(estimator) = self.estimator.as_mut() {
            estimator.sample(elapsed, bytes_loaded);
        }
        request.abort();
        self.disarm_monitor();
        self.state.forced_next = Some(fallback.to_level);

        Some(Abandonment {
            from_level: request.level(),
            to_level: fallback.to_level,
            remaining_delay_secs: fallback.remaining_delay,
            fallback_delay_secs: fallback.fallback_delay,
            starvation_delay_secs: fallback.starvation_delay,
            request,
        })
    }

    /// Level the next request should target.
    pub fn select_next_level(&self) -> usize {
        self.decide_next_level().level
    }

    /// Level the next request should target, with the reason it was chosen.
    pub fn decide_next_level(&self) -> LevelDecision {
        let Some(top) = self.levels.len().checked_sub(1) else {
            return LevelDecision {
                level: 0,
                reason: SelectionReason::NoLevels,
            };
        };
        let max_level = self.state.capping.map_or(top, |cap| cap.min(top));

        if let Some(forced) = self.state.forced_next {
            return LevelDecision {
                level: forced.min(max_level),
                reason: SelectionReason::Forced,
            };
        }

        let rate = self.media.playback_rate();
        // Paused hosts still need a plan; assume normal speed.
        let rate = if rate == 0.0 { 1.0 } else { rate.abs() };
        let position = self.media.current_time();
        let buffered = self.media.buffered_range(position, self.opts.max_buffer_hole);
        let duration = self
            .last_segment_duration
            .unwrap_or(self.opts.default_segment_duration);

        let decision = select::select_level(&SelectionContext {
            levels: &self.levels,
            min_level: self.min_auto_level().min(max_level),
            max_level,
            estimate_bps: self.estimate_bps(),
            duration: duration.as_secs_f64(),
            starvation_delay: (buffered.end - position) / rate,
            rate,
        });
        debug!(level = decision.level, reason = ?decision.reason, "ABR select");
        decision
    }
}

impl<M, E> std::fmt::Debug for AbrEngine<M, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AbrEngine")
            .field("levels", &self.levels.len())
            .field("estimator", &self.estimator.is_some())
            .field("monitor_epoch", &self.monitor.as_ref().map(|m| m.epoch))
            .field("capping", &self.state.capping)
            .field("forced_next", &self.state.forced_next)
            .field("last_loaded_level", &self.state.last_loaded_level)
            .finish_non_exhaustive()
    }
}
