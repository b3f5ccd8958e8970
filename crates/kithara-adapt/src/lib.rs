//! Rate-adaptation decision engine for adaptive streaming.
//!
//! Given a bitrate ladder and live telemetry from the in-flight segment
//! download, [`AbrEngine`] decides which level the next request should
//! target and whether the current download must be abandoned before the
//! playback buffer runs dry.
//!
//! ## Features
//!
//! - **Next-level selection**: greedy scan from the highest allowed level,
//!   spending buffer slack on quality and tolerating short deficits
//! - **Emergency abandonment**: projects the remaining download time against
//!   buffer starvation and forces a lower level when it will not make it
//! - **Dual-EWMA estimator**: separate smoothing for live and on-demand streams
//! - **Policy surface**: level capping and one-shot forced levels
//! - **Runtime-agnostic core**: synchronous engine plus an optional tokio
//!   [`driver`] that owns the monitor cadence
//!
//! ## Example
//!
//! ```rust
//! use std::{sync::Arc, time::Duration};
//!
//! use kithara_adapt::{AbrEngine, AbrOptions, LoadStats, MediaSnapshot, QualityLevel, SegmentRequest};
//! use web_time::Instant;
//!
//! let levels = vec![
//!     QualityLevel::new(500_000),
//!     QualityLevel::new(1_000_000),
//!     QualityLevel::new(2_000_000),
//! ];
//! // 20 seconds buffered ahead of the playhead
//! let media = MediaSnapshot::playing(0.0, 20.0);
//! let mut engine = AbrEngine::new(AbrOptions::default(), levels, media);
//!
//! let t0 = Instant::now();
//! let request = Arc::new(SegmentRequest::new(0, Duration::from_secs(6)));
//! engine.on_request_started(Arc::clone(&request), t0);
//! request.record_progress(375_000);
//! engine.on_request_completed(
//!     &request,
//!     LoadStats::completed(t0 + Duration::from_millis(500), 375_000),
//! );
//!
//! // 6 Mbps measured: the top level downloads well within the slack
//! assert_eq!(engine.select_next_level(), 2);
//! ```

#![forbid(unsafe_code)]

mod abandon;
mod buffer;
#[cfg(not(target_arch = "wasm32"))]
pub mod driver;
mod engine;
mod error;
mod estimator;
mod events;
mod options;
mod request;
mod select;
mod types;

pub use buffer::{BufferedRange, MediaSnapshot, MediaState, buffered_range};
#[cfg(not(target_arch = "wasm32"))]
pub use driver::{AbrHandle, spawn};
pub use engine::{AbrEngine, EstimatorFactory};
pub use error::{AbrError, AbrResult};
pub use estimator::{BandwidthEstimator, Estimator};
pub use events::{Abandonment, AbrEvent, Notification};
pub use options::{AbrOptions, EwmaHalfLife};
pub use request::{LoadStats, SegmentRequest};
pub use select::{LevelDecision, SelectionReason};
pub use types::{LoadErrorKind, QualityLevel, RequestKind, StreamKind};
