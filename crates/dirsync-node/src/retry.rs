//! Retry schedule (spec §4.4 "Retry schedule semantics"): an ordered
//! list of `(interval, remaining attempts)` pairs, the last of which
//! may repeat forever. A successful refresh resets every counter back
//! to its configured starting value.

use std::time::Duration;

/// One step of a configured retry schedule. `remaining = None` means
/// this step repeats indefinitely once reached.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryStep {
    pub interval: Duration,
    pub remaining: Option<u32>,
}

impl RetryStep {
    #[must_use]
    pub fn new(interval: Duration, remaining: Option<u32>) -> Self {
        Self { interval, remaining }
    }
}

/// Outcome of [`RetrySchedule::on_failure`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryOutcome {
    /// Retry after this interval; the schedule still has budget.
    Retry(Duration),
    /// Every step's counter reached zero; the source should be removed
    /// from the run queue (spec §4.4 step 6, "hard failures").
    Exhausted,
}

#[derive(Clone, Debug)]
pub struct RetrySchedule {
    initial: Vec<RetryStep>,
    steps: Vec<RetryStep>,
    current: usize,
}

impl RetrySchedule {
    #[must_use]
    pub fn new(steps: Vec<RetryStep>) -> Self {
        Self {
            initial: steps.clone(),
            steps,
            current: 0,
        }
    }

    /// The interval a caller should wait right now, without consuming
    /// a retry attempt (used for the schedule's steady-state poll
    /// interval, not a failure backoff).
    #[must_use]
    pub fn current_interval(&self) -> Duration {
        self.steps
            .get(self.current)
            .map_or(Duration::from_secs(60), |step| step.interval)
    }

    /// Consumes one attempt from the current step. Returns the interval
    /// to wait before the next attempt, or `Exhausted` once every step
    /// has run out.
    pub fn on_failure(&mut self) -> RetryOutcome {
        loop {
            let Some(step) = self.steps.get_mut(self.current) else {
                return RetryOutcome::Exhausted;
            };
            match step.remaining {
                None => return RetryOutcome::Retry(step.interval),
                Some(0) => {
                    self.current += 1;
                }
                Some(ref mut n) => {
                    *n -= 1;
                    return RetryOutcome::Retry(step.interval);
                }
            }
        }
    }

    /// A successful refresh (`refreshDone`) resets every counter to its
    /// originally configured value (spec §4.4).
    pub fn reset(&mut self) {
        self.steps = self.initial.clone();
        self.current = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhausts_after_consuming_every_step() {
        let mut schedule = RetrySchedule::new(vec![
            RetryStep::new(Duration::from_secs(1), Some(2)),
            RetryStep::new(Duration::from_secs(5), Some(1)),
        ]);

        assert_eq!(
            schedule.on_failure(),
            RetryOutcome::Retry(Duration::from_secs(1))
        );
        assert_eq!(
            schedule.on_failure(),
            RetryOutcome::Retry(Duration::from_secs(1))
        );
        assert_eq!(
            schedule.on_failure(),
            RetryOutcome::Retry(Duration::from_secs(5))
        );
        assert_eq!(schedule.on_failure(), RetryOutcome::Exhausted);
    }

    #[test]
    fn a_forever_final_step_never_exhausts() {
        let mut schedule = RetrySchedule::new(vec![RetryStep::new(Duration::from_secs(30), None)]);
        for _ in 0..10 {
            assert_eq!(
                schedule.on_failure(),
                RetryOutcome::Retry(Duration::from_secs(30))
            );
        }
    }

    #[test]
    fn reset_restores_every_counter() {
        let mut schedule = RetrySchedule::new(vec![RetryStep::new(Duration::from_secs(1), Some(1))]);
        assert_eq!(
            schedule.on_failure(),
            RetryOutcome::Retry(Duration::from_secs(1))
        );
        assert_eq!(schedule.on_failure(), RetryOutcome::Exhausted);

        schedule.reset();
        assert_eq!(
            schedule.on_failure(),
            RetryOutcome::Retry(Duration::from_secs(1))
        );
    }
}
