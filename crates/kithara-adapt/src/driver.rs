#![forbid(unsafe_code)]

//! Tokio adapter for [`AbrEngine`].
//!
//! One task owns the monitor cadence: notifications arrive over a channel,
//! a [`tokio::time::Interval`] exists only while the engine has an armed
//! monitor, and events are broadcast to subscribers. The engine lives behind
//! a mutex so ticks, notifications and queries from other threads never
//! interleave.

use std::{sync::Arc, time::Duration};

use parking_lot::Mutex;
use tokio::{
    sync::broadcast,
    time::{Interval, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};
use web_time::Instant;

use crate::{
    AbrEngine, AbrError, AbrResult, BandwidthEstimator, Estimator, MediaState,
    events::{AbrEvent, Notification},
    request::{LoadStats, SegmentRequest},
    select::LevelDecision,
    types::LoadErrorKind,
};

const EVENT_CAPACITY: usize = 64;
const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Clock shared with tokio so paused test time drives the engine too.
fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

/// Move `engine` onto a tokio task and return a handle to it.
///
/// Must be called within a tokio runtime.
pub fn spawn<M, E>(engine: AbrEngine<M, E>) -> AbrHandle<M, E>
where
    M: MediaState + Send + 'static,
    E: Estimator + Send + 'static,
{
    let period = engine.options().monitor_interval.max(MIN_PERIOD);
    let engine = Arc::new(Mutex::new(engine));
    let (tx, rx) = kanal::unbounded_async();
    let (events, _) = broadcast::channel(EVENT_CAPACITY);
    let cancel = CancellationToken::new();

    let driver = Driver {
        engine: Arc::clone(&engine),
        rx,
        events: events.clone(),
        cancel: cancel.clone(),
        period,
    };
    tokio::spawn(driver.run());

    AbrHandle {
        engine,
        tx: tx.to_sync(),
        events,
        cancel,
    }
}

struct Driver<M, E> {
    engine: Arc<Mutex<AbrEngine<M, E>>>,
    rx: kanal::AsyncReceiver<Notification>,
    events: broadcast::Sender<AbrEvent>,
    cancel: CancellationToken,
    period: Duration,
}

impl<M: MediaState, E: Estimator> Driver<M, E> {
    async fn run(self) {
        debug!(period_ms = self.period.as_millis(), "ABR driver started");
        let mut monitor: Option<(u64, Interval)> = None;

        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                msg = self.rx.recv() => {
                    let Ok(notification) = msg else { break };
                    let event = self.engine.lock().handle(notification, now());
                    self.publish(event);
                }
                () = next_tick(&mut monitor) => {
                    let abandonment = self.engine.lock().tick(now());
                    self.publish(abandonment.map(AbrEvent::Abandoned));
                }
            }
            self.sync_monitor(&mut monitor);
        }

        self.engine.lock().disarm_monitor();
        debug!("ABR driver stopped");
    }

    fn publish(&self, event: Option<AbrEvent>) {
        if let Some(event) = event {
            let _ = self.events.send(event);
        }
    }

    /// Keep exactly one interval per armed monitor epoch.
    fn sync_monitor(&self, monitor: &mut Option<(u64, Interval)>) {
        let epoch = self.engine.lock().monitor_epoch();
        match (epoch, monitor.as_ref().map(|(armed, _)| *armed)) {
            (Some(current), Some(armed)) if current == armed => {}
            (Some(current), _) => {
                let start = tokio::time::Instant::now() + self.period;
                let mut interval = tokio::time::interval_at(start, self.period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
                trace!(epoch = current, "ABR driver: monitor armed");
                *monitor = Some((current, interval));
            }
            (None, Some(armed)) => {
                trace!(epoch = armed, "ABR driver: monitor dropped");
                *monitor = None;
            }
            (None, None) => {}
        }
    }
}

async fn next_tick(monitor: &mut Option<(u64, Interval)>) {
    match monitor {
        Some((_, interval)) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Handle to an engine running on a driver task.
///
/// Queries and ticks lock the engine and then read the media state, which
/// may take the media's own lock. Release any media lock before calling
/// into the handle, or a concurrent tick deadlocks against it.
pub struct AbrHandle<M, E = BandwidthEstimator> {
    engine: Arc<Mutex<AbrEngine<M, E>>>,
    tx: kanal::Sender<Notification>,
    events: broadcast::Sender<AbrEvent>,
    cancel: CancellationToken,
}

impl<M, E> Clone for AbrHandle<M, E> {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
            tx: self.tx.clone(),
            events: self.events.clone(),
            cancel: self.cancel.clone(),
        }
    }
}

impl<M: MediaState, E: Estimator> AbrHandle<M, E> {
    /// Queue a notification for the driver.
    ///
    /// Notifications are applied in order; queries below read the engine
    /// directly and may observe state from before a queued notification.
    ///
    /// # Errors
    ///
    /// [`AbrError::DriverStopped`] once the driver task has exited.
    pub fn notify(&self, notification: Notification) -> AbrResult<()> {
        self.tx
            .send(notification)
            .map_err(|_| AbrError::DriverStopped)
    }

    /// # Errors
    ///
    /// [`AbrError::DriverStopped`] once the driver task has exited.
    pub fn request_started(&self, request: Arc<SegmentRequest>) -> AbrResult<()> {
        self.notify(Notification::RequestStarted(request))
    }

    /// # Errors
    ///
    /// [`AbrError::DriverStopped`] once the driver task has exited.
    pub fn request_completed(&self, request: Arc<SegmentRequest>, stats: LoadStats) -> AbrResult<()> {
        self.notify(Notification::RequestCompleted { request, stats })
    }

    /// # Errors
    ///
    /// [`AbrError::DriverStopped`] once the driver task has exited.
    pub fn error(&self, kind: LoadErrorKind) -> AbrResult<()> {
        self.notify(Notification::Error(kind))
    }

    pub fn select_next_level(&self) -> usize {
        self.engine.lock().select_next_level()
    }

    pub fn decide_next_level(&self) -> LevelDecision {
        self.engine.lock().decide_next_level()
    }

    pub fn level_cap(&self) -> Option<usize> {
        self.engine.lock().level_cap()
    }

    /// # Errors
    ///
    /// [`AbrError::LevelOutOfRange`] if `cap` is not a ladder index.
    pub fn set_level_cap(&self, cap: Option<usize>) -> AbrResult<()> {
        self.engine.lock().set_level_cap(cap)
    }

    pub fn forced_next_level(&self) -> Option<usize> {
        self.engine.lock().forced_next_level()
    }

    /// # Errors
    ///
    /// [`AbrError::LevelOutOfRange`] if `level` is not a ladder index.
    pub fn set_forced_next_level(&self, level: Option<usize>) -> AbrResult<()> {
        self.engine.lock().set_forced_next_level(level)
    }

    pub fn estimate_bps(&self) -> u64 {
        self.engine.lock().estimate_bps()
    }

    pub fn is_monitoring(&self) -> bool {
        self.engine.lock().is_monitoring()
    }

    /// Receive abandonments and estimate updates published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<AbrEvent> {
        self.events.subscribe()
    }

    /// Stop the driver task. The monitor is disarmed on exit.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}
