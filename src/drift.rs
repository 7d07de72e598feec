//! Sampling-rate drift correction.
//!
//! Buffer servers announce a nominal sampling rate (say 256.0 Hz) that can
//! differ slightly from the hardware's true rate (say 256.003 Hz). Left
//! alone, a long acquisition slowly desynchronizes sample time from wall
//! time. The corrector compares the sample count implied by the wall clock
//! against the count actually delivered and nudges the next wait threshold
//! so the fetch cadence re-synchronizes, one bounded adjustment at a time.
//! Timestamps already delivered are never rewritten.
//!
//! With no usable nominal rate the corrector degrades to a pass-through that
//! always returns the configured base threshold. That is a deliberate mode,
//! not an error.

use std::time::Duration;

use tracing::{debug, trace};

/// Lifecycle epoch of the drift state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriftEpoch {
    /// Before the first start; counters are zero.
    Idle,
    /// Actively tracking between start and stop.
    Tracking,
    /// Stopped; counters are stale until the next start resets them.
    ResetPending,
}

/// Tracks delivered-vs-expected sample counts and derives the wait threshold.
#[derive(Debug)]
pub struct DriftCorrector {
    base_threshold: u32,
    nominal_hz: Option<f64>,
    epoch: DriftEpoch,
    /// Samples actually delivered since the last start.
    delivered: u64,
    /// Net samples already absorbed by threshold corrections.
    corrected: f64,
    /// Drift accumulated since the last applied correction.
    residual: f64,
}

impl DriftCorrector {
    /// Create a corrector with the configured base threshold.
    ///
    /// `nominal_hz` of `None` disables correction entirely.
    pub fn new(base_threshold: u32, nominal_hz: Option<f64>) -> Self {
        let base_threshold = base_threshold.max(1);
        DriftCorrector {
            base_threshold,
            nominal_hz,
            epoch: DriftEpoch::Idle,
            delivered: 0,
            corrected: 0.0,
            residual: 0.0,
        }
    }

    /// Whether drift correction is active (a usable nominal rate exists).
    pub fn is_enabled(&self) -> bool {
        self.nominal_hz.is_some()
    }

    /// Current epoch.
    pub fn epoch(&self) -> DriftEpoch {
        self.epoch
    }

    /// Samples delivered since the last start.
    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    /// Drift accumulated since the last correction, in samples.
    pub fn drift(&self) -> f64 {
        self.residual
    }

    /// Running per-sample drift estimate. Negative when the source runs
    /// faster than its nominal rate.
    pub fn per_sample_drift(&self) -> f64 {
        if self.delivered == 0 {
            return 0.0;
        }
        (self.corrected + self.residual) / self.delivered as f64
    }

    /// Reset all counters and begin tracking. Called at `start()`.
    pub fn start(&mut self) {
        self.delivered = 0;
        self.corrected = 0.0;
        self.residual = 0.0;
        self.epoch = DriftEpoch::Tracking;
        debug!(
            base_threshold = self.base_threshold,
            enabled = self.is_enabled(),
            "drift tracking started"
        );
    }

    /// Stop tracking; counters stay frozen until the next start. Called at
    /// `stop()`.
    pub fn stop(&mut self) {
        if self.epoch == DriftEpoch::Tracking {
            self.epoch = DriftEpoch::ResetPending;
        }
    }

    /// Record samples handed to the consumer path.
    pub fn record_delivery(&mut self, samples: u64) {
        if self.epoch == DriftEpoch::Tracking {
            self.delivered += samples;
        }
    }

    /// Minimum-samples threshold for the next wait, given the wall-clock
    /// time elapsed since start.
    ///
    /// While the accumulated drift stays under one sample this returns the
    /// base threshold. Once it reaches a full sample the rounded drift is
    /// folded into the next request (never below a floor of 1) and the
    /// accumulator is cleared.
    pub fn threshold(&mut self, elapsed: Duration) -> u32 {
        let Some(hz) = self.nominal_hz else {
            return self.base_threshold;
        };
        if self.epoch != DriftEpoch::Tracking {
            return self.base_threshold;
        }

        let expected = elapsed.as_secs_f64() * hz;
        let drift = expected - self.delivered as f64 - self.corrected;
        self.residual = drift;

        if drift.abs() < 1.0 {
            return self.base_threshold;
        }

        let adjustment = drift.round();
        self.corrected += adjustment;
        self.residual = drift - adjustment;

        let threshold = (i64::from(self.base_threshold) + adjustment as i64).max(1);
        trace!(drift, threshold, "applying drift correction");
        threshold as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Simulated source: the server produces samples at `true_hz`; each wait
    /// returns once the requested number of fresh samples exists, so wall
    /// time advances by `threshold / true_hz` per cycle.
    fn run_simulation(corrector: &mut DriftCorrector, true_hz: f64, target_samples: u64) -> f64 {
        let mut elapsed = Duration::ZERO;
        let mut worst_drift: f64 = 0.0;

        corrector.start();
        while corrector.delivered() < target_samples {
            let threshold = corrector.threshold(elapsed);
            elapsed += Duration::from_secs_f64(f64::from(threshold) / true_hz);
            corrector.record_delivery(u64::from(threshold));

            // Refresh the accumulator for inspection without advancing time.
            corrector.threshold(elapsed);
            worst_drift = worst_drift.max(corrector.drift().abs());
        }
        worst_drift
    }

    #[test]
    fn drift_stays_bounded_with_fast_source() {
        let mut corrector = DriftCorrector::new(100, Some(256.0));
        let worst = run_simulation(&mut corrector, 256.01, 20_000);
        assert!(worst < 2.0, "drift grew to {worst} samples");
    }

    #[test]
    fn drift_stays_bounded_with_slow_source() {
        let mut corrector = DriftCorrector::new(100, Some(256.0));
        let worst = run_simulation(&mut corrector, 255.99, 20_000);
        assert!(worst < 2.0, "drift grew to {worst} samples");
    }

    #[test]
    fn exact_source_never_corrects() {
        let mut corrector = DriftCorrector::new(32, Some(500.0));
        let mut elapsed = Duration::ZERO;

        corrector.start();
        for _ in 0..1_000 {
            let threshold = corrector.threshold(elapsed);
            assert_eq!(threshold, 32);
            elapsed += Duration::from_secs_f64(32.0 / 500.0);
            corrector.record_delivery(32);
        }
    }

    #[test]
    fn disabled_corrector_is_a_pass_through() {
        let mut corrector = DriftCorrector::new(64, None);
        corrector.start();
        corrector.record_delivery(1_000_000);

        // Wildly inconsistent elapsed times must not move the threshold.
        for seconds in [0u64, 1, 3600, 86_400] {
            assert_eq!(corrector.threshold(Duration::from_secs(seconds)), 64);
        }
        assert_eq!(corrector.drift(), 0.0);
        assert!(!corrector.is_enabled());
    }

    #[test]
    fn threshold_never_drops_below_one() {
        let mut corrector = DriftCorrector::new(1, Some(256.0));
        corrector.start();
        // A large backlog of delivered samples with almost no elapsed time
        // pushes the drift far negative.
        corrector.record_delivery(10_000);
        let threshold = corrector.threshold(Duration::from_millis(1));
        assert_eq!(threshold, 1);
    }

    #[test]
    fn start_resets_counters() {
        let mut corrector = DriftCorrector::new(100, Some(256.0));
        corrector.start();
        corrector.record_delivery(5_000);
        corrector.threshold(Duration::from_secs(30));
        corrector.stop();
        assert_eq!(corrector.epoch(), DriftEpoch::ResetPending);

        corrector.start();
        assert_eq!(corrector.epoch(), DriftEpoch::Tracking);
        assert_eq!(corrector.delivered(), 0);
        assert_eq!(corrector.drift(), 0.0);
        assert_eq!(corrector.per_sample_drift(), 0.0);
    }

    #[test]
    fn deliveries_are_ignored_outside_tracking() {
        let mut corrector = DriftCorrector::new(100, Some(256.0));
        corrector.record_delivery(500);
        assert_eq!(corrector.delivered(), 0);

        corrector.start();
        corrector.record_delivery(500);
        corrector.stop();
        corrector.record_delivery(500);
        assert_eq!(corrector.delivered(), 500);
    }

    #[test]
    fn per_sample_estimate_tracks_rate_error() {
        let mut corrector = DriftCorrector::new(100, Some(256.0));
        run_simulation(&mut corrector, 256.01, 100_000);

        // Source runs fast, so each delivered sample carries slightly less
        // nominal time than real time: the estimate is small and negative.
        let estimate = corrector.per_sample_drift();
        assert!(estimate < 0.0, "estimate {estimate} should be negative");
        assert!(estimate.abs() < 1e-3, "estimate {estimate} should be tiny");
    }
}
