#![forbid(unsafe_code)]

use std::{sync::Arc, time::Duration};

use kithara_adapt::{
    AbrEngine, AbrError, AbrEvent, AbrOptions, LoadErrorKind, LoadStats, MediaSnapshot,
    QualityLevel, SegmentRequest, SelectionReason, spawn,
};
use parking_lot::Mutex;
use tokio::time::timeout;

fn ladder() -> Vec<QualityLevel> {
    vec![
        QualityLevel::new(500_000),
        QualityLevel::new(1_000_000),
        QualityLevel::new(2_000_000),
    ]
}

fn shared_media(position: f64, ahead: f64) -> Arc<Mutex<MediaSnapshot>> {
    Arc::new(Mutex::new(MediaSnapshot::playing(position, ahead)))
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// Let the driver task drain its queue.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

#[tokio::test(start_paused = true)]
async fn slow_segment_is_abandoned_and_fallback_forced() {
    init_tracing();
    let media = shared_media(10.0, 2.0);
    let handle = spawn(AbrEngine::new(AbrOptions::default(), ladder(), media));
    let mut events = handle.subscribe();

    let request = Arc::new(SegmentRequest::new(2, Duration::from_secs(6)));
    handle.request_started(Arc::clone(&request)).unwrap();
    request.record_progress(800_000);

    let event = timeout(Duration::from_secs(10), events.recv())
        .await
        .expect("abandonment within 10s")
        .unwrap();
    let AbrEvent::Abandoned(abandonment) = event else {
        panic!("expected abandonment, got {event:?}");
    };

    assert!(Arc::ptr_eq(&abandonment.request, &request));
    assert_eq!(abandonment.from_level, 2);
    assert_eq!(abandonment.to_level, 0);
    assert!(abandonment.fallback_delay_secs < abandonment.remaining_delay_secs);
    assert!(request.is_aborted());
    assert!(request.cancel_token().is_cancelled());
    assert!(!handle.is_monitoring());

    let decision = handle.decide_next_level();
    assert_eq!(decision.level, 0);
    assert_eq!(decision.reason, SelectionReason::Forced);

    // A late completion of the cancelled request changes nothing.
    handle
        .request_completed(
            Arc::clone(&request),
            LoadStats::completed(web_time::Instant::now(), 1_500_000),
        )
        .unwrap();
    settle().await;
    assert_eq!(handle.forced_next_level(), Some(0));
}

#[tokio::test(start_paused = true)]
async fn healthy_segment_feeds_estimator() {
    init_tracing();
    let handle = spawn(AbrEngine::new(
        AbrOptions::default(),
        ladder(),
        shared_media(0.0, 17.0),
    ));
    let mut events = handle.subscribe();

    let request = Arc::new(SegmentRequest::new(1, Duration::from_secs(6)));
    handle.request_started(Arc::clone(&request)).unwrap();
    settle().await;
    assert!(handle.is_monitoring());

    tokio::time::sleep(Duration::from_secs(3)).await;
    request.record_progress(1_500_000);
    let loaded_at = tokio::time::Instant::now().into_std();
    handle
        .request_completed(Arc::clone(&request), LoadStats::completed(loaded_at, 1_500_000))
        .unwrap();

    let event = timeout(Duration::from_secs(1), events.recv())
        .await
        .expect("estimate update")
        .unwrap();
    let AbrEvent::EstimateUpdated { estimate_bps } = event else {
        panic!("expected estimate update, got {event:?}");
    };
    // 1.5 MB in 3s (give or take the queue settling time)
    assert!((3_900_000..=4_100_000).contains(&estimate_bps));
    assert!(!request.is_aborted());
    assert!(!handle.is_monitoring());
    assert_eq!(handle.select_next_level(), 2);
}

#[tokio::test(start_paused = true)]
async fn load_timeout_disarms_monitor() {
    let handle = spawn(AbrEngine::new(
        AbrOptions::default(),
        ladder(),
        shared_media(10.0, 2.0),
    ));
    let request = Arc::new(SegmentRequest::new(2, Duration::from_secs(6)));
    handle.request_started(Arc::clone(&request)).unwrap();
    settle().await;
    assert!(handle.is_monitoring());

    handle.error(LoadErrorKind::LoadTimeout).unwrap();
    settle().await;
    assert!(!handle.is_monitoring());

    // Disarmed: even a starving request is no longer judged.
    request.record_progress(800_000);
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(!request.is_aborted());
}

#[tokio::test(start_paused = true)]
async fn policy_surface_applies_to_next_query() {
    let handle = spawn(AbrEngine::new(
        AbrOptions::default().with_default_estimate_bps(50_000_000),
        ladder(),
        shared_media(0.0, 60.0),
    ));
    assert_eq!(handle.select_next_level(), 2);

    handle.set_level_cap(Some(1)).unwrap();
    assert_eq!(handle.level_cap(), Some(1));
    assert_eq!(handle.select_next_level(), 1);

    assert!(matches!(
        handle.set_forced_next_level(Some(5)),
        Err(AbrError::LevelOutOfRange { index: 5, count: 3 })
    ));
    handle.set_forced_next_level(Some(0)).unwrap();
    assert_eq!(handle.select_next_level(), 0);
}

#[tokio::test(start_paused = true)]
async fn media_updates_interleave_with_ticks_and_queries() {
    let media = shared_media(0.0, 30.0);
    let handle = spawn(AbrEngine::new(
        AbrOptions::default(),
        ladder(),
        Arc::clone(&media),
    ));
    let request = Arc::new(SegmentRequest::new(0, Duration::from_secs(6)));
    handle.request_started(Arc::clone(&request)).unwrap();

    for step in 1..=20_u32 {
        {
            let mut state = media.lock();
            state.position = f64::from(step) * 0.1;
        }
        // media guard released before the engine is locked
        assert!(handle.select_next_level() <= 2);
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    assert!(handle.is_monitoring());
    assert!(!request.is_aborted());
}

#[tokio::test(start_paused = true)]
async fn shutdown_stops_driver() {
    let handle = spawn(AbrEngine::new(
        AbrOptions::default(),
        ladder(),
        shared_media(10.0, 2.0),
    ));
    let request = Arc::new(SegmentRequest::new(2, Duration::from_secs(6)));
    handle.request_started(Arc::clone(&request)).unwrap();
    settle().await;

    handle.shutdown();
    settle().await;

    assert!(!handle.is_monitoring());
    assert!(matches!(
        handle.request_started(request),
        Err(AbrError::DriverStopped)
    ));
}
