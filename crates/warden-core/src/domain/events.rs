//! Events.
//!
//! - [`WorkerEvent`]: what workers put on the shared output channel.
//! - [`SupervisorEvent`]: structured diagnostics appended to the event log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::errors::FailureKind;
use super::task::TaskId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerEventKind {
    /// Agent made progress on a task. Also counts as a heartbeat.
    Progress,
    Heartbeat,
    /// Paid work was done; `data` carries `{cost, prompt_tokens, completion_tokens}`.
    Usage,
    /// The worker finished its current task (`data.ok` tells success).
    TaskDone,
    Log,
    #[serde(other)]
    Other,
}

/// An event produced while a worker executes a task.
///
/// `worker_id` and `generation` are stamped by the pool side (emitter or
/// process reader), never trusted from the executor itself. `generation`
/// tells apart successive workers spawned into the same slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerEvent {
    #[serde(default)]
    pub worker_id: usize,

    #[serde(default)]
    pub generation: u64,

    #[serde(rename = "type")]
    pub kind: WorkerEventKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,

    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
}

impl WorkerEvent {
    pub fn new(worker_id: usize, kind: WorkerEventKind, task_id: Option<TaskId>, data: Value) -> Self {
        Self {
            worker_id,
            generation: 0,
            kind,
            task_id,
            data,
        }
    }

    pub fn with_generation(mut self, generation: u64) -> Self {
        self.generation = generation;
        self
    }
}

/// Structured supervisor diagnostics (one JSON line each in the event log).
///
/// A diagnostic, not a control surface: nothing reads these back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SupervisorEvent {
    WorkerCrashed {
        worker_id: usize,
        task_id: Option<TaskId>,
        requeued: bool,
    },
    CrashStorm {
        crashes: usize,
        window_sec: u64,
    },
    CrashStormResetBlocked {
        error: String,
    },
    CrashStormDepsSyncFailed {
        error: String,
    },
    CrashStormRecovered {
        branch: String,
    },
    TaskSoftTimeout {
        task_id: TaskId,
        task_type: String,
        worker_id: usize,
        runtime_sec: f64,
        heartbeat_lag_sec: f64,
    },
    TaskHardTimeout {
        task_id: TaskId,
        task_type: String,
        worker_id: usize,
        runtime_sec: f64,
        heartbeat_lag_sec: f64,
        heartbeat_stale: bool,
        attempt: u32,
        requeued: bool,
        new_attempt: u32,
        max_retries: u32,
    },
    QueueRestoredFromSnapshot {
        restored_pending: usize,
    },
    RunningClearedOnKill {
        count: usize,
    },
    EvolutionDisabledBudget {
        budget_pct: f64,
    },
}

impl SupervisorEvent {
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            SupervisorEvent::WorkerCrashed { .. } => Some(FailureKind::WorkerCrash),
            SupervisorEvent::CrashStorm { .. }
            | SupervisorEvent::CrashStormResetBlocked { .. }
            | SupervisorEvent::CrashStormDepsSyncFailed { .. } => Some(FailureKind::CrashStorm),
            SupervisorEvent::TaskSoftTimeout { .. } => Some(FailureKind::TaskSoftTimeout),
            SupervisorEvent::TaskHardTimeout { .. } => Some(FailureKind::TaskHardTimeout),
            SupervisorEvent::EvolutionDisabledBudget { .. } => Some(FailureKind::BudgetExhausted),
            SupervisorEvent::CrashStormRecovered { .. }
            | SupervisorEvent::QueueRestoredFromSnapshot { .. }
            | SupervisorEvent::RunningClearedOnKill { .. } => None,
        }
    }
}

/// One line of the event log: the event plus when it was written and, for
/// failures, which kind.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventRecord {
    pub ts: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
    #[serde(flatten)]
    pub event: SupervisorEvent,
}

impl EventRecord {
    pub fn new(ts: DateTime<Utc>, event: SupervisorEvent) -> Self {
        Self {
            ts,
            failure: event.failure_kind(),
            event,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn record_is_flat_with_type_tag() {
        let rec = EventRecord::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            SupervisorEvent::RunningClearedOnKill { count: 2 },
        );
        let v = serde_json::to_value(&rec).unwrap();
        assert_eq!(v["type"], "running_cleared_on_kill");
        assert_eq!(v["count"], 2);
        assert!(v.get("failure").is_none());
        assert!(v["ts"].as_str().unwrap().starts_with("2024-01-01T00:00:00"));
    }

    #[test]
    fn unknown_worker_event_kind_is_other() {
        let ev: WorkerEvent =
            serde_json::from_str(r#"{"type":"send_message","task_id":"t1","data":{"x":1}}"#).unwrap();
        assert_eq!(ev.kind, WorkerEventKind::Other);
        assert_eq!(ev.worker_id, 0);
        assert_eq!(ev.generation, 0);
        assert_eq!(ev.task_id, Some(TaskId::new("t1")));
    }

    #[test]
    fn failure_events_carry_their_kind() {
        let ev = SupervisorEvent::TaskHardTimeout {
            task_id: TaskId::new("t"),
            task_type: "task".into(),
            worker_id: 0,
            runtime_sec: 1.0,
            heartbeat_lag_sec: 1.0,
            heartbeat_stale: false,
            attempt: 1,
            requeued: true,
            new_attempt: 2,
            max_retries: 1,
        };
        let rec = EventRecord::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(), ev);
        assert_eq!(rec.failure, Some(FailureKind::TaskHardTimeout));
        let v = serde_json::to_value(&rec).unwrap();
        assert_eq!(v["failure"], "task_hard_timeout");
        assert_eq!(v["type"], "task_hard_timeout");
    }
}
