//! Running entry: a dispatched task and its liveness bookkeeping.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::task::{Task, TaskId};
use crate::ports::clock::elapsed_secs;

/// Running tasks keyed by task id.
pub type RunningMap = BTreeMap<TaskId, RunningEntry>;

/// Snapshot of a task that a worker is executing right now.
///
/// Created by the assignment step, dropped on `task_done`, hard timeout,
/// crash or cancel. `soft_sent` makes the soft-timeout warning one-shot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunningEntry {
    pub task: Task,
    pub worker_id: usize,
    pub started_at: DateTime<Utc>,
    pub last_heartbeat_at: DateTime<Utc>,
    pub soft_sent: bool,
    pub attempt: u32,
}

impl RunningEntry {
    pub fn start(task: Task, worker_id: usize, now: DateTime<Utc>) -> Self {
        let attempt = task.effective_attempt();
        Self {
            task,
            worker_id,
            started_at: now,
            last_heartbeat_at: now,
            soft_sent: false,
            attempt,
        }
    }

    /// Wall-clock seconds since dispatch (never negative).
    pub fn runtime_sec(&self, now: DateTime<Utc>) -> f64 {
        elapsed_secs(self.started_at, now)
    }

    /// Seconds since the worker last said anything about this task.
    pub fn heartbeat_lag_sec(&self, now: DateTime<Utc>) -> f64 {
        elapsed_secs(self.last_heartbeat_at, now)
    }

    /// Record a heartbeat. Out-of-order timestamps never move it backwards.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        if now > self.last_heartbeat_at {
            self.last_heartbeat_at = now;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TaskKind;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn heartbeat_defaults_to_start() {
        let e = RunningEntry::start(Task::new("a", TaskKind::Task, 1, "x"), 2, t0());
        assert_eq!(e.last_heartbeat_at, e.started_at);
        assert_eq!(e.attempt, 1);
        assert!(!e.soft_sent);
    }

    #[test]
    fn runtime_and_lag_are_measured_independently() {
        let mut e = RunningEntry::start(Task::new("a", TaskKind::Task, 1, "x"), 0, t0());
        e.touch(t0() + Duration::seconds(30));

        let now = t0() + Duration::seconds(100);
        assert_eq!(e.runtime_sec(now), 100.0);
        assert_eq!(e.heartbeat_lag_sec(now), 70.0);
    }

    #[test]
    fn touch_never_goes_backwards() {
        let mut e = RunningEntry::start(Task::new("a", TaskKind::Task, 1, "x"), 0, t0());
        e.touch(t0() - Duration::seconds(5));
        assert_eq!(e.last_heartbeat_at, t0());
    }
}
