//! Run-queue abstraction (spec §9 "Global scheduling state"): the core
//! interacts with the process-wide scheduler only through `insert`,
//! `resched`, `stop`, `remove`, `is_running`, each independently
//! guarded — here, by sharding the bookkeeping across a
//! [`dashmap::DashMap`] instead of one run-queue-wide mutex.

use std::time::Duration;

use dashmap::DashMap;

pub type TaskId = u64;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TaskState {
    Running,
    Paused,
}

struct TaskEntry {
    state: TaskState,
    interval: Duration,
}

#[derive(Default)]
pub struct Scheduler {
    tasks: DashMap<TaskId, TaskEntry>,
}

impl Scheduler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `task` with a steady-state tick interval.
    pub fn insert(&self, task: TaskId, interval: Duration) {
        self.tasks.insert(
            task,
            TaskEntry {
                state: TaskState::Running,
                interval,
            },
        );
    }

    /// Re-arms `task`. `defer = true` pauses it instead of leaving it
    /// immediately runnable (used when refresh arbitration denies a
    /// source and it must wait to be woken — spec §4.4 step 3).
    pub fn resched(&self, task: TaskId, defer: bool) {
        if let Some(mut entry) = self.tasks.get_mut(&task) {
            entry.state = if defer {
                TaskState::Paused
            } else {
                TaskState::Running
            };
        }
    }

    /// Pauses `task` without removing its bookkeeping.
    pub fn stop(&self, task: TaskId) {
        if let Some(mut entry) = self.tasks.get_mut(&task) {
            entry.state = TaskState::Paused;
        }
    }

    /// Drops `task` entirely (spec §4.4 step 6: retry schedule
    /// exhausted, or the source was marked deleted).
    pub fn remove(&self, task: TaskId) {
        self.tasks.remove(&task);
    }

    #[must_use]
    pub fn is_running(&self, task: TaskId) -> bool {
        self.tasks
            .get(&task)
            .is_some_and(|entry| entry.state == TaskState::Running)
    }

    #[must_use]
    pub fn interval(&self, task: TaskId) -> Option<Duration> {
        self.tasks.get(&task).map(|entry| entry.interval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inserted_task_starts_running() {
        let scheduler = Scheduler::new();
        scheduler.insert(1, Duration::from_secs(5));
        assert!(scheduler.is_running(1));
        assert_eq!(scheduler.interval(1), Some(Duration::from_secs(5)));
    }

    #[test]
    fn stop_pauses_and_resched_can_revive_or_defer() {
        let scheduler = Scheduler::new();
        scheduler.insert(1, Duration::from_secs(5));

        scheduler.stop(1);
        assert!(!scheduler.is_running(1));

        scheduler.resched(1, true);
        assert!(!scheduler.is_running(1));

        scheduler.resched(1, false);
        assert!(scheduler.is_running(1));
    }

    #[test]
    fn remove_drops_the_task_entirely() {
        let scheduler = Scheduler::new();
        scheduler.insert(1, Duration::from_secs(5));
        scheduler.remove(1);
        assert!(!scheduler.is_running(1));
        assert_eq!(scheduler.interval(1), None);
    }
}
