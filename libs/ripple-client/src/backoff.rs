//! Reconnection delay schedule.

use std::time::Duration;

use crate::error::ClientError;

/// A non-decreasing, capped delay schedule indexed by consecutive-failure
/// count. Failure counts beyond the last step reuse the final (cap) value.
#[derive(Debug, Clone)]
pub struct BackoffSchedule {
    steps: Vec<Duration>,
}

impl BackoffSchedule {
    /// Build a schedule from explicit steps. The steps must be non-empty and
    /// non-decreasing — the last step is the cap.
    pub fn new(steps: Vec<Duration>) -> Result<Self, ClientError> {
        if steps.is_empty() {
            return Err(ClientError::Config(
                "backoff schedule must not be empty".to_string(),
            ));
        }
        if steps.windows(2).any(|pair| pair[1] < pair[0]) {
            return Err(ClientError::Config(
                "backoff schedule must be non-decreasing".to_string(),
            ));
        }
        Ok(Self { steps })
    }

    /// Delay before reconnect attempt number `failures` (0-indexed).
    pub fn delay_for(&self, failures: u32) -> Duration {
        let index = (failures as usize).min(self.steps.len() - 1);
        self.steps[index]
    }

    /// The largest delay the schedule can produce.
    pub fn cap(&self) -> Duration {
        *self.steps.last().expect("schedule is never empty")
    }
}

impl Default for BackoffSchedule {
    /// `1s, 3s, 5s, 10s, 30s, 60s`, capped at `120s`.
    fn default() -> Self {
        Self {
            steps: [1, 3, 5, 10, 30, 60, 120]
                .into_iter()
                .map(Duration::from_secs)
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_schedule_is_monotonic_and_capped() {
        let schedule = BackoffSchedule::default();
        let mut previous = Duration::ZERO;
        for failures in 0..32 {
            let delay = schedule.delay_for(failures);
            assert!(delay >= previous, "delay decreased at attempt {failures}");
            assert!(delay <= schedule.cap());
            previous = delay;
        }
    }

    #[test]
    fn delays_beyond_schedule_reuse_cap() {
        let schedule = BackoffSchedule::default();
        assert_eq!(schedule.delay_for(6), Duration::from_secs(120));
        assert_eq!(schedule.delay_for(1000), Duration::from_secs(120));
    }

    #[test]
    fn explicit_schedule_is_used_verbatim() {
        let schedule = BackoffSchedule::new(vec![
            Duration::from_millis(10),
            Duration::from_millis(10),
            Duration::from_millis(50),
        ])
        .unwrap();
        assert_eq!(schedule.delay_for(0), Duration::from_millis(10));
        assert_eq!(schedule.delay_for(1), Duration::from_millis(10));
        assert_eq!(schedule.delay_for(2), Duration::from_millis(50));
        assert_eq!(schedule.delay_for(3), Duration::from_millis(50));
        assert_eq!(schedule.cap(), Duration::from_millis(50));
    }

    #[test]
    fn empty_schedule_is_rejected() {
        assert!(BackoffSchedule::new(Vec::new()).is_err());
    }

    #[test]
    fn decreasing_schedule_is_rejected() {
        let result = BackoffSchedule::new(vec![
            Duration::from_secs(5),
            Duration::from_secs(1),
        ]);
        assert!(result.is_err());
    }
}
