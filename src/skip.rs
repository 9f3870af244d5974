//! Skip detection.
//!
//! When a new play is recorded, the play immediately before it (of any track)
//! counts as skipped if the gap between the two is shorter than a fraction of
//! the earlier track's duration. The rule runs once, at ingestion.
//!
//! Overlapping playback from several devices is not excluded; such plays can
//! mark each other skipped.

/// Threshold for the skip heuristic.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SkipPolicy {
    threshold: f64,
}

impl Default for SkipPolicy {
    fn default() -> Self {
        Self {
            threshold: Self::DEFAULT_THRESHOLD,
        }
    }
}

impl SkipPolicy {
    /// Fraction of the duration a track must play to not count as skipped.
    pub const DEFAULT_THRESHOLD: f64 = 0.9;

    /// Threshold is clamped to `0.0..=1.0`.
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold: threshold.clamp(0.0, 1.0),
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Whether a play followed `elapsed_ms` later by the next one was skipped.
    pub fn is_skip(&self, elapsed_ms: i64, expected_ms: i64) -> bool {
        (elapsed_ms as f64) < self.threshold * expected_ms as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_gap_is_skip() {
        let policy = SkipPolicy::default();
        assert!(policy.is_skip(150_000, 200_000));
    }

    #[test]
    fn test_full_play_is_not_skip() {
        let policy = SkipPolicy::default();
        assert!(!policy.is_skip(200_000, 200_000));
        assert!(!policy.is_skip(500_000, 200_000));
    }

    #[test]
    fn test_exact_threshold_is_not_skip() {
        let policy = SkipPolicy::default();
        assert!(!policy.is_skip(180_000, 200_000));
        assert!(policy.is_skip(179_999, 200_000));
    }

    #[test]
    fn test_unknown_duration_never_skips() {
        assert!(!SkipPolicy::default().is_skip(1, 0));
    }

    #[test]
    fn test_threshold_clamped() {
        assert_eq!(SkipPolicy::new(3.0).threshold(), 1.0);
        assert_eq!(SkipPolicy::new(-1.0).threshold(), 0.0);
        assert!(!SkipPolicy::new(0.0).is_skip(1, 200_000));
    }
}
