//! Queue module: pending task ordering and crash-safe snapshots.

mod snapshot;

pub use snapshot::{PendingRow, RunningRow, Snapshot, SnapshotStore};

use chrono::{DateTime, Utc};

use crate::domain::{Task, TaskId, TaskKind};

/// Pending tasks, kept sorted by `(priority asc, queue_seq asc)`.
///
/// Normal inserts get `+seq`, front inserts get `-seq` from the same counter,
/// so fronts always sort ahead of normals of equal priority and the most
/// recent front insert comes first.
#[derive(Debug, Default)]
pub struct TaskQueue {
    pending: Vec<Task>,
    seq: i64,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stamp `task` with its sequence number, defaults and `queued_at`, then
    /// insert it at its place in the order. Returns the stored copy.
    pub fn enqueue(&mut self, mut task: Task, front: bool, now: DateTime<Utc>) -> Task {
        self.seq += 1;
        task.priority = Some(task.effective_priority());
        task.attempt = Some(task.effective_attempt());
        task.queue_seq = if front { -self.seq } else { self.seq };
        task.queued_at = Some(now);

        let key = task.sort_key();
        let at = self.pending.partition_point(|t| t.sort_key() <= key);
        self.pending.insert(at, task.clone());
        task
    }

    /// Remove and return the head of the queue.
    pub fn pop_for_assignment(&mut self) -> Option<Task> {
        if self.pending.is_empty() {
            None
        } else {
            Some(self.pending.remove(0))
        }
    }

    pub fn remove(&mut self, id: &TaskId) -> Option<Task> {
        let idx = self.pending.iter().position(|t| &t.id == id)?;
        Some(self.pending.remove(idx))
    }

    pub fn contains(&self, id: &TaskId) -> bool {
        self.pending.iter().any(|t| &t.id == id)
    }

    pub fn contains_kind(&self, kind: &TaskKind) -> bool {
        self.pending.iter().any(|t| &t.kind == kind)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Pending tasks in pop order.
    pub fn pending(&self) -> &[Task] {
        &self.pending
    }
}
