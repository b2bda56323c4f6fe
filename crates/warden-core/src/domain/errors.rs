//! Failure taxonomy.
//!
//! These are classifications, not error values: every failure listed here is
//! recovered inside the supervisor (respawn, requeue, drop) or surfaced to the
//! owner as a notification. Nothing here ever stops the supervisor.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Worker process died unexpectedly. Recovered by respawn + front requeue.
    WorkerCrash,

    /// Advisory: a task crossed the soft runtime threshold.
    TaskSoftTimeout,

    /// A task crossed the hard threshold and was killed. Retried up to the
    /// configured cap, dropped afterwards.
    TaskHardTimeout,

    /// Too many crashes inside the sliding window. Triggers fallback.
    CrashStorm,

    /// Snapshot older than the restore window. Ignored.
    SnapshotRestoreStale,

    /// Snapshot unreadable or a row without `id`/`chat_id`. Ignored.
    SnapshotRestoreMalformed,

    /// Spent budget reached the limit; evolution scheduling turns itself off.
    BudgetExhausted,
}
