//! Crash-safe snapshot of pending + running state.
//!
//! Written after every state-changing operation; read back once at startup
//! to resume pending work after the supervisor process itself restarted.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::TaskQueue;
use crate::domain::{FailureKind, RunningEntry, RunningMap, Task, TaskId, TaskKind};
use crate::error::WardenError;
use crate::fs::write_atomic;
use crate::ports::clock::elapsed_secs;

/// On-disk snapshot document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub ts: DateTime<Utc>,
    pub reason: String,
    pub pending_count: usize,
    pub running_count: usize,
    pub pending: Vec<PendingRow>,
    pub running: Vec<RunningRow>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingRow {
    pub id: TaskId,
    #[serde(rename = "type")]
    pub kind: TaskKind,
    pub priority: i32,
    pub attempt: u32,
    pub queued_at: Option<DateTime<Utc>>,
    pub queue_seq: i64,
    pub task: Task,
}

impl PendingRow {
    fn from_task(task: &Task) -> Self {
        Self {
            id: task.id.clone(),
            kind: task.kind.clone(),
            priority: task.effective_priority(),
            attempt: task.effective_attempt(),
            queued_at: task.queued_at,
            queue_seq: task.queue_seq,
            task: task.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunningRow {
    pub id: TaskId,
    #[serde(rename = "type")]
    pub kind: TaskKind,
    pub priority: i32,
    pub attempt: u32,
    pub queued_at: Option<DateTime<Utc>>,
    pub queue_seq: i64,
    pub worker_id: usize,
    pub started_at: DateTime<Utc>,
    pub runtime_sec: f64,
    pub heartbeat_lag_sec: f64,
    pub heartbeat_stale: bool,
    pub soft_sent: bool,
    pub task: Task,
}

impl RunningRow {
    fn from_entry(entry: &RunningEntry, now: DateTime<Utc>, heartbeat_stale_sec: u64) -> Self {
        let lag = entry.heartbeat_lag_sec(now);
        Self {
            id: entry.task.id.clone(),
            kind: entry.task.kind.clone(),
            priority: entry.task.effective_priority(),
            attempt: entry.attempt,
            queued_at: entry.task.queued_at,
            queue_seq: entry.task.queue_seq,
            worker_id: entry.worker_id,
            started_at: entry.started_at,
            runtime_sec: round1(entry.runtime_sec(now)),
            heartbeat_lag_sec: round1(lag),
            heartbeat_stale: lag >= heartbeat_stale_sec as f64,
            soft_sent: entry.soft_sent,
            task: entry.task.clone(),
        }
    }
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

/// Why a restore brought nothing back.
#[derive(Debug, Clone, PartialEq)]
enum Skip {
    Missing,
    Stale { age_sec: f64 },
    Malformed(String),
}

/// Snapshot file owner. Single writer.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
    heartbeat_stale_sec: u64,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>, heartbeat_stale_sec: u64) -> Self {
        Self {
            path: path.into(),
            heartbeat_stale_sec,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn build(
        &self,
        queue: &TaskQueue,
        running: &RunningMap,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Snapshot {
        let pending: Vec<PendingRow> = queue.pending().iter().map(PendingRow::from_task).collect();
        let running: Vec<RunningRow> = running
            .values()
            .map(|e| RunningRow::from_entry(e, now, self.heartbeat_stale_sec))
            .collect();
        Snapshot {
            ts: now,
            reason: reason.to_string(),
            pending_count: pending.len(),
            running_count: running.len(),
            pending,
            running,
        }
    }

    /// Serialize and atomically replace the snapshot file.
    pub fn persist(
        &self,
        queue: &TaskQueue,
        running: &RunningMap,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<(), WardenError> {
        let snapshot = self.build(queue, running, reason, now);
        let bytes = serde_json::to_vec_pretty(&snapshot)?;
        write_atomic(&self.path, &bytes)
    }

    /// Parsed snapshot, or `None` when no snapshot was written yet.
    pub fn read(&self) -> Result<Option<Snapshot>, WardenError> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(WardenError::io(&self.path, e)),
        }
    }

    /// Re-enqueue pending rows of a fresh snapshot. Best-effort: every
    /// failure is logged and counts as nothing restored.
    ///
    /// Does nothing while `queue` has pending work. Rows without a usable
    /// `id`/`chat_id`, or whose id is already running, are skipped. Restored
    /// rows go to the back of the queue with their stored priority and attempt.
    pub fn restore(
        &self,
        queue: &mut TaskQueue,
        running: &RunningMap,
        now: DateTime<Utc>,
        max_age_sec: u64,
    ) -> usize {
        if !queue.is_empty() {
            debug!(pending = queue.len(), "snapshot restore skipped, queue is live");
            return 0;
        }

        let rows = match self.load_fresh_rows(now, max_age_sec) {
            Ok(rows) => rows,
            Err(Skip::Missing) => return 0,
            Err(Skip::Stale { age_sec }) => {
                info!(
                    kind = ?FailureKind::SnapshotRestoreStale,
                    age_sec,
                    max_age_sec,
                    "snapshot too old, not restoring"
                );
                return 0;
            }
            Err(Skip::Malformed(reason)) => {
                warn!(kind = ?FailureKind::SnapshotRestoreMalformed, %reason, "snapshot unreadable");
                return 0;
            }
        };

        let mut restored = 0;
        for row in rows {
            let Some(task) = restorable_task(&row) else {
                debug!(
                    kind = ?FailureKind::SnapshotRestoreMalformed,
                    "skipping malformed snapshot row"
                );
                continue;
            };
            if running.contains_key(&task.id) || queue.contains(&task.id) {
                continue;
            }
            queue.enqueue(task, false, now);
            restored += 1;
        }

        if restored > 0
            && let Err(e) = self.persist(queue, running, "queue_restored", now)
        {
            warn!(error = %e, "failed to persist restored queue");
        }
        restored
    }

    fn load_fresh_rows(&self, now: DateTime<Utc>, max_age_sec: u64) -> Result<Vec<Value>, Skip> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(Skip::Missing),
            Err(e) => return Err(Skip::Malformed(e.to_string())),
        };
        let doc: Value = serde_json::from_str(&raw).map_err(|e| Skip::Malformed(e.to_string()))?;

        let ts = doc
            .get("ts")
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|t| t.with_timezone(&Utc))
            .ok_or_else(|| Skip::Malformed("missing or invalid ts".to_string()))?;

        let age_sec = elapsed_secs(ts, now);
        if age_sec > max_age_sec as f64 {
            return Err(Skip::Stale { age_sec });
        }

        match doc.get("pending") {
            Some(Value::Array(rows)) => Ok(rows.clone()),
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(_) => Err(Skip::Malformed("pending is not a list".to_string())),
        }
    }
}

/// The task of a pending row, if it has a non-empty `id` and a non-zero
/// `chat_id` and otherwise deserializes.
fn restorable_task(row: &Value) -> Option<Task> {
    let task = match row.get("task") {
        Some(t @ Value::Object(_)) => t,
        _ => row,
    };
    let id_ok = task
        .get("id")
        .and_then(Value::as_str)
        .is_some_and(|s| !s.trim().is_empty());
    let chat_ok = match task.get("chat_id") {
        Some(Value::Number(n)) => n.as_i64().is_some_and(|c| c != 0),
        _ => false,
    };
    if !id_ok || !chat_ok {
        return None;
    }
    serde_json::from_value(task.clone()).ok()
}
