//! Reconnect backoff policy.
//!
//! Purely functional: the controller only computes the next delay. The
//! session owner applies it as a sleep before the next connect attempt, so
//! no timers live here and the policy is trivial to test.

use std::time::Duration;

/// Exponential backoff with a floor and a ceiling.
///
/// Each failure doubles the delay up to the ceiling; any success snaps the
/// delay back to the floor.
#[derive(Debug, Clone)]
pub struct BackoffController {
    floor: Duration,
    ceiling: Duration,
    current: Duration,
}

impl BackoffController {
    pub fn new(floor: Duration, ceiling: Duration) -> Self {
        let ceiling = ceiling.max(floor);
        Self {
            floor,
            ceiling,
            current: floor,
        }
    }

    /// Delay to sleep before the next connect attempt.
    pub fn on_failure(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.ceiling);
        delay
    }

    pub fn on_success(&mut self) {
        self.current = self.floor;
    }

    pub fn current_delay(&self) -> Duration {
        self.current
    }
}

impl Default for BackoffController {
    fn default() -> Self {
        Self::new(Duration::from_millis(500), Duration::from_secs(30))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_double_up_to_ceiling() {
        let mut backoff =
            BackoffController::new(Duration::from_millis(500), Duration::from_secs(4));
        let delays: Vec<_> = (0..6).map(|_| backoff.on_failure()).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(500),
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(4),
                Duration::from_secs(4),
            ]
        );
    }

    #[test]
    fn sequence_is_non_decreasing() {
        let mut backoff = BackoffController::default();
        let mut last = Duration::ZERO;
        for _ in 0..20 {
            let d = backoff.on_failure();
            assert!(d >= last);
            assert!(d <= Duration::from_secs(30));
            last = d;
        }
    }

    #[test]
    fn success_resets_to_floor() {
        let mut backoff = BackoffController::default();
        for _ in 0..5 {
            backoff.on_failure();
        }
        backoff.on_success();
        assert_eq!(backoff.on_failure(), Duration::from_millis(500));
    }

    #[test]
    fn ceiling_below_floor_is_clamped() {
        let mut backoff =
            BackoffController::new(Duration::from_secs(2), Duration::from_millis(100));
        assert_eq!(backoff.on_failure(), Duration::from_secs(2));
        assert_eq!(backoff.on_failure(), Duration::from_secs(2));
    }
}
