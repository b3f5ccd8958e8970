#![forbid(unsafe_code)]

use std::time::Duration;

use crate::{AbrOptions, StreamKind, options::EwmaHalfLife};

/// Bandwidth estimation seam used by the engine.
///
/// Allows testing `AbrEngine` with mock estimators.
#[cfg_attr(test, unimock::unimock(api = EstimatorMock))]
pub trait Estimator {
    /// Record `bytes` transferred over `elapsed`. Zero elapsed time is ignored.
    fn sample(&mut self, elapsed: Duration, bytes: u64);

    /// Estimated throughput in bits per second.
    ///
    /// Returns a configured default until enough samples were recorded.
    fn estimate_bps(&self) -> u64;
}

/// Dual-EWMA throughput estimator.
///
/// The estimate is the minimum of a fast and a slow moving average, so drops
/// are picked up quickly while spikes are discounted.
#[derive(Clone, Debug)]
pub struct BandwidthEstimator {
    fast_ewma: Ewma,
    slow_ewma: Ewma,
    default_bps: u64,
}

impl BandwidthEstimator {
    const MIN_DELAY_MS: f64 = 50.0;
    const MIN_WEIGHT_SECS: f64 = 0.001;

    #[must_use]
    pub fn new(half_life: EwmaHalfLife, default_bps: u64) -> Self {
        Self {
            fast_ewma: Ewma::new(half_life.fast),
            slow_ewma: Ewma::new(half_life.slow),
            default_bps,
        }
    }

    /// Estimator with the smoothing constants configured for `stream`.
    #[must_use]
    pub fn for_stream(opts: &AbrOptions, stream: StreamKind) -> Self {
        Self::new(opts.half_life(stream), opts.default_estimate_bps)
    }

    /// Whether enough samples were recorded to trust the averages.
    #[must_use]
    pub fn can_estimate(&self) -> bool {
        self.fast_ewma.total_weight >= Self::MIN_WEIGHT_SECS
    }

    pub fn sample(&mut self, elapsed: Duration, bytes: u64) {
        if elapsed.is_zero() {
            tracing::trace!(bytes, "estimator: ignoring sample with zero elapsed time");
            return;
        }

        let dur_ms = (elapsed.as_secs_f64() * 1000.0).max(Self::MIN_DELAY_MS);
        #[expect(clippy::cast_precision_loss)] // byte counts stay far below 2^52
        let bps = (bytes as f64) * 8000.0 / dur_ms;
        let weight_secs = dur_ms / 1000.0;

        self.fast_ewma.add_sample(weight_secs, bps);
        self.slow_ewma.add_sample(weight_secs, bps);
    }

    #[must_use]
    #[expect(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        reason = "estimate is non-negative and bounded by sampled rates"
    )]
    pub fn estimate_bps(&self) -> u64 {
        if !self.can_estimate() {
            return self.default_bps;
        }
        let est = self
            .fast_ewma
            .get_estimate()
            .min(self.slow_ewma.get_estimate());
        est.max(0.0).round() as u64
    }
}

impl Estimator for BandwidthEstimator {
    fn sample(&mut self, elapsed: Duration, bytes: u64) {
        self.sample(elapsed, bytes);
    }

    fn estimate_bps(&self) -> u64 {
        self.estimate_bps()
    }
}

#[derive(Clone, Debug)]
struct Ewma {
    alpha: f64,
    last_estimate: f64,
    total_weight: f64,
}

impl Ewma {
    fn new(half_life_secs: f64) -> Self {
        Self {
            alpha: f64::exp(0.5_f64.ln() / half_life_secs.max(0.001)),
            last_estimate: 0.0,
            total_weight: 0.0,
        }
    }

    fn add_sample(&mut self, weight: f64, val: f64) {
        let adj_alpha = self.alpha.powf(weight.max(0.0));
        self.last_estimate = val * (1.0 - adj_alpha) + adj_alpha * self.last_estimate;
        self.total_weight += weight.max(0.0);
    }

    fn get_estimate(&self) -> f64 {
        if self.total_weight <= 0.0 {
            0.0
        } else {
            let zero_factor = 1.0 - self.alpha.powf(self.total_weight);
            self.last_estimate / zero_factor.max(1e-6)
        }
    }
}
