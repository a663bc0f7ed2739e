//! Threshold tracking for a single endpoint's probe results.

use tracing::{debug, warn};

use outpost_core::{HealthStatus, ProbeSpec};

/// Result of a single probe attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeResult {
    /// The target answered as expected.
    Healthy,
    /// The target answered, but not successfully (non-2xx, non-zero exit).
    Unhealthy,
    /// The probe could not be executed (connection error, timeout).
    Failed,
}

impl ProbeResult {
    pub fn is_success(&self) -> bool {
        *self == ProbeResult::Healthy
    }
}

/// Tracks consecutive probe results for a single endpoint.
///
/// An endpoint only becomes healthy after `success_threshold` consecutive
/// successes and only becomes unhealthy after `failure_threshold`
/// consecutive failures, so transient errors do not flap its state.
#[derive(Debug, Clone)]
pub struct HealthTracker {
    status: HealthStatus,
    consecutive_failures: u32,
    consecutive_successes: u32,
    success_threshold: u32,
    failure_threshold: u32,
}

impl HealthTracker {
    pub fn new(spec: &ProbeSpec) -> Self {
        Self::with_thresholds(spec.success_threshold, spec.failure_threshold)
    }

    pub fn with_thresholds(success_threshold: u32, failure_threshold: u32) -> Self {
        Self {
            status: HealthStatus::Unknown,
            consecutive_failures: 0,
            consecutive_successes: 0,
            success_threshold: success_threshold.max(1),
            failure_threshold: failure_threshold.max(1),
        }
    }

    /// Record a probe result and return the new health status.
    pub fn record(&mut self, result: ProbeResult) -> HealthStatus {
        if result.is_success() {
            self.consecutive_failures = 0;
            self.consecutive_successes = self.consecutive_successes.saturating_add(1);

            if self.consecutive_successes >= self.success_threshold
                && self.status != HealthStatus::Healthy
            {
                debug!(successes = self.consecutive_successes, "endpoint became healthy");
                self.status = HealthStatus::Healthy;
            }
        } else {
            self.consecutive_successes = 0;
            self.consecutive_failures = self.consecutive_failures.saturating_add(1);

            if self.consecutive_failures >= self.failure_threshold
                && self.status != HealthStatus::Unhealthy
            {
                warn!(
                    failures = self.consecutive_failures,
                    threshold = self.failure_threshold,
                    "endpoint marked unhealthy"
                );
                self.status = HealthStatus::Unhealthy;
            }
        }

        self.status
    }

    pub fn status(&self) -> HealthStatus {
        self.status
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn consecutive_successes(&self) -> u32 {
        self.consecutive_successes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn healthy_tracker(failure_threshold: u32) -> HealthTracker {
        let mut tracker = HealthTracker::with_thresholds(1, failure_threshold);
        tracker.record(ProbeResult::Healthy);
        assert_eq!(tracker.status(), HealthStatus::Healthy);
        tracker
    }

    #[test]
    fn tracker_starts_unknown() {
        let tracker = HealthTracker::new(&ProbeSpec::tcp());
        assert_eq!(tracker.status(), HealthStatus::Unknown);
        assert_eq!(tracker.consecutive_failures(), 0);
        assert_eq!(tracker.consecutive_successes(), 0);
    }

    #[test]
    fn needs_success_threshold_to_become_healthy() {
        let mut tracker = HealthTracker::with_thresholds(2, 3);
        assert_eq!(tracker.record(ProbeResult::Healthy), HealthStatus::Unknown);
        assert_eq!(tracker.record(ProbeResult::Healthy), HealthStatus::Healthy);
    }

    #[test]
    fn two_failures_then_success_does_not_flap() {
        let mut tracker = healthy_tracker(3);
        tracker.record(ProbeResult::Failed);
        tracker.record(ProbeResult::Unhealthy);
        assert_eq!(tracker.status(), HealthStatus::Healthy);
        assert_eq!(tracker.consecutive_failures(), 2);

        tracker.record(ProbeResult::Healthy);
        assert_eq!(tracker.status(), HealthStatus::Healthy);
        assert_eq!(tracker.consecutive_failures(), 0);

        // The counter restarted: two more failures are still tolerated.
        tracker.record(ProbeResult::Failed);
        tracker.record(ProbeResult::Failed);
        assert_eq!(tracker.status(), HealthStatus::Healthy);
    }

    #[test]
    fn three_consecutive_failures_mark_unhealthy() {
        let mut tracker = healthy_tracker(3);
        tracker.record(ProbeResult::Failed);
        tracker.record(ProbeResult::Failed);
        assert_eq!(tracker.record(ProbeResult::Failed), HealthStatus::Unhealthy);
    }

    #[test]
    fn unknown_endpoint_can_go_straight_to_unhealthy() {
        let mut tracker = HealthTracker::with_thresholds(2, 2);
        tracker.record(ProbeResult::Failed);
        assert_eq!(tracker.status(), HealthStatus::Unknown);
        assert_eq!(tracker.record(ProbeResult::Failed), HealthStatus::Unhealthy);
    }

    #[test]
    fn recovery_needs_success_threshold() {
        let mut tracker = HealthTracker::with_thresholds(3, 1);
        tracker.record(ProbeResult::Failed);
        assert_eq!(tracker.status(), HealthStatus::Unhealthy);

        tracker.record(ProbeResult::Healthy);
        tracker.record(ProbeResult::Healthy);
        assert_eq!(tracker.status(), HealthStatus::Unhealthy);
        tracker.record(ProbeResult::Healthy);
        assert_eq!(tracker.status(), HealthStatus::Healthy);
    }

    #[test]
    fn zero_thresholds_are_clamped() {
        let mut tracker = HealthTracker::with_thresholds(0, 0);
        assert_eq!(tracker.record(ProbeResult::Healthy), HealthStatus::Healthy);
        assert_eq!(tracker.record(ProbeResult::Failed), HealthStatus::Unhealthy);
    }
}
