//! Worker pool: a fixed arena of worker slots with stable ids.
//!
//! Every worker consumes its own input channel and writes tagged
//! [`WorkerEvent`]s to one shared output channel owned by the pool. How a
//! worker is actually run (tokio task, OS process) is the [`WorkerSpawner`]'s
//! business.

mod inproc;
mod process;

pub use inproc::TokioSpawner;
pub use process::{ProcessCommand, ProcessSpawner};

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, warn};

use crate::domain::{Task, TaskId, WorkerEvent};
use crate::error::WardenError;

/// What goes down a worker's input channel.
///
/// On the process wire this is one JSON line: `{"type":"run","task":{..}}`
/// or the sentinel `{"type":"shutdown"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerInput {
    Run { task: Task },
    Shutdown,
}

/// Exclusive handle on one running worker.
#[async_trait]
pub trait WorkerHandle: Send {
    /// Queue a task on the worker's input channel. Never waits for it to run.
    fn send(&mut self, task: &Task) -> Result<(), WardenError>;

    fn is_alive(&mut self) -> bool;

    /// Send the shutdown sentinel and wait up to `timeout` for a clean exit,
    /// then terminate.
    async fn shutdown(&mut self, timeout: Duration);

    /// Hard stop. No cooperation from the worker is expected.
    async fn terminate(&mut self, timeout: Duration);
}

/// Worker 起動戦略
///
/// Every event the worker emits must carry `worker_id` and `generation`.
pub trait WorkerSpawner: Send + Sync {
    fn spawn(
        &self,
        worker_id: usize,
        generation: u64,
        events: UnboundedSender<WorkerEvent>,
    ) -> Result<Box<dyn WorkerHandle>, WardenError>;
}

/// One slot of the pool. The handle is owned here and replaced wholesale on
/// respawn; `None` means the last spawn failed. `generation` changes with
/// every spawn attempt.
struct WorkerSlot {
    id: usize,
    generation: u64,
    handle: Option<Box<dyn WorkerHandle>>,
    busy_task_id: Option<TaskId>,
}

impl WorkerSlot {
    fn is_busy(&self) -> bool {
        self.busy_task_id.is_some()
    }
}

pub struct WorkerPool {
    spawner: Arc<dyn WorkerSpawner>,
    slots: BTreeMap<usize, WorkerSlot>,
    events_tx: UnboundedSender<WorkerEvent>,
    events_rx: UnboundedReceiver<WorkerEvent>,
    join_timeout: Duration,
    last_generation: u64,
}

impl WorkerPool {
    pub fn new(spawner: Arc<dyn WorkerSpawner>, join_timeout: Duration) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            spawner,
            slots: BTreeMap::new(),
            events_tx,
            events_rx,
            join_timeout,
            last_generation: 0,
        }
    }

    /// Replace the whole table with `n` fresh workers, ids `0..n`.
    ///
    /// A slot whose spawn fails is kept empty so the health check retries it.
    pub async fn spawn(&mut self, n: usize) {
        self.terminate_all().await;
        for id in 0..n {
            let (generation, handle) = self.spawn_handle(id);
            self.slots.insert(
                id,
                WorkerSlot {
                    id,
                    generation,
                    handle,
                    busy_task_id: None,
                },
            );
        }
    }

    /// Terminate every worker and clear the table.
    pub async fn terminate_all(&mut self) {
        let slots = std::mem::take(&mut self.slots);
        for (_, mut slot) in slots {
            if let Some(handle) = slot.handle.as_mut() {
                handle.terminate(self.join_timeout).await;
            }
        }
    }

    /// Send the shutdown sentinel to every worker, then clear the table.
    pub async fn shutdown_all(&mut self) {
        let slots = std::mem::take(&mut self.slots);
        for (_, mut slot) in slots {
            if let Some(handle) = slot.handle.as_mut() {
                handle.shutdown(self.join_timeout).await;
            }
        }
    }

    /// Replace slot `id` with a fresh worker under the same id and a new
    /// generation. The old one is terminated first; the slot comes back idle.
    pub async fn respawn(&mut self, id: usize) -> Result<(), WardenError> {
        let join_timeout = self.join_timeout;
        let slot = self.slots.get_mut(&id).ok_or(WardenError::UnknownWorker(id))?;
        if let Some(mut old) = slot.handle.take() {
            old.terminate(join_timeout).await;
        }
        slot.busy_task_id = None;

        let (generation, handle) = self.spawn_handle(id);
        let spawned = handle.is_some();
        if let Some(slot) = self.slots.get_mut(&id) {
            slot.generation = generation;
            slot.handle = handle;
        }
        if spawned {
            debug!(worker_id = id, "worker respawned");
            Ok(())
        } else {
            Err(WardenError::Spawn {
                worker_id: id,
                reason: "respawn failed".to_string(),
            })
        }
    }

    /// Hand `task` to worker `id` and mark it busy.
    pub fn dispatch(&mut self, id: usize, task: &Task) -> Result<(), WardenError> {
        let slot = self.slots.get_mut(&id).ok_or(WardenError::UnknownWorker(id))?;
        let handle = slot
            .handle
            .as_mut()
            .ok_or(WardenError::WorkerChannelClosed(id))?;
        handle.send(task)?;
        slot.busy_task_id = Some(task.id.clone());
        Ok(())
    }

    /// Idle slots that have a worker, in id order.
    pub fn idle_ids(&self) -> Vec<usize> {
        self.slots
            .values()
            .filter(|s| !s.is_busy() && s.handle.is_some())
            .map(|s| s.id)
            .collect()
    }

    /// Slots whose worker was started and has since gone (exited, panicked,
    /// killed).
    pub fn dead_ids(&mut self) -> Vec<usize> {
        self.slots
            .values_mut()
            .filter_map(|s| {
                let handle = s.handle.as_mut()?;
                (!handle.is_alive()).then_some(s.id)
            })
            .collect()
    }

    /// Slots with no worker because the last spawn failed.
    pub fn unspawned_ids(&self) -> Vec<usize> {
        self.slots
            .values()
            .filter(|s| s.handle.is_none())
            .map(|s| s.id)
            .collect()
    }

    /// Generation of the worker currently in slot `id`.
    pub fn generation(&self, id: usize) -> Option<u64> {
        self.slots.get(&id).map(|s| s.generation)
    }

    /// True if an event stamped `(id, generation)` comes from the worker
    /// that occupies the slot now.
    pub fn is_current(&self, id: usize, generation: u64) -> bool {
        self.generation(id) == Some(generation)
    }

    pub fn busy_task(&self, id: usize) -> Option<&TaskId> {
        self.slots.get(&id).and_then(|s| s.busy_task_id.as_ref())
    }

    /// Clear and return the task id slot `id` was busy with.
    pub fn set_idle(&mut self, id: usize) -> Option<TaskId> {
        self.slots.get_mut(&id).and_then(|s| s.busy_task_id.take())
    }

    pub fn try_recv_event(&mut self) -> Option<WorkerEvent> {
        self.events_rx.try_recv().ok()
    }

    /// Sender side of the shared output channel.
    pub fn events_sender(&self) -> UnboundedSender<WorkerEvent> {
        self.events_tx.clone()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn busy_count(&self) -> usize {
        self.slots.values().filter(|s| s.is_busy()).count()
    }

    fn spawn_handle(&mut self, id: usize) -> (u64, Option<Box<dyn WorkerHandle>>) {
        self.last_generation += 1;
        let generation = self.last_generation;
        match self.spawner.spawn(id, generation, self.events_tx.clone()) {
            Ok(handle) => (generation, Some(handle)),
            Err(e) => {
                warn!(worker_id = id, generation, error = %e, "worker spawn failed");
                (generation, None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{TaskKind, WorkerEventKind};
    use crate::impls::ScriptedExecutor;

    fn pool() -> WorkerPool {
        let spawner = TokioSpawner::new(Arc::new(ScriptedExecutor));
        WorkerPool::new(Arc::new(spawner), Duration::from_millis(200))
    }

    async fn next_event(pool: &mut WorkerPool) -> WorkerEvent {
        for _ in 0..200 {
            if let Some(ev) = pool.try_recv_event() {
                return ev;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("no worker event");
    }

    #[tokio::test]
    async fn spawn_gives_stable_idle_ids() {
        let mut pool = pool();
        pool.spawn(3).await;

        assert_eq!(pool.len(), 3);
        assert_eq!(pool.idle_ids(), vec![0, 1, 2]);
        assert!(pool.dead_ids().is_empty());
    }

    #[tokio::test]
    async fn dispatch_marks_busy_and_events_are_tagged() {
        let mut pool = pool();
        pool.spawn(2).await;

        let task = Task::new("t1", TaskKind::Task, 1, "progress hello");
        pool.dispatch(1, &task).unwrap();
        assert_eq!(pool.busy_task(1), Some(&TaskId::new("t1")));
        assert_eq!(pool.idle_ids(), vec![0]);

        let ev = next_event(&mut pool).await;
        assert_eq!(ev.worker_id, 1);
        assert!(pool.is_current(1, ev.generation));
        assert_eq!(ev.kind, WorkerEventKind::Progress);
        let done = next_event(&mut pool).await;
        assert_eq!(done.kind, WorkerEventKind::TaskDone);
        assert_eq!(done.data["ok"], true);
    }

    #[tokio::test]
    async fn panicking_worker_is_dead_until_respawned() {
        let mut pool = pool();
        pool.spawn(1).await;

        pool.dispatch(0, &Task::new("t1", TaskKind::Task, 1, "panic boom")).unwrap();
        for _ in 0..200 {
            if !pool.dead_ids().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(pool.dead_ids(), vec![0]);

        let before = pool.generation(0).unwrap();
        pool.respawn(0).await.unwrap();
        assert!(pool.dead_ids().is_empty());
        assert_eq!(pool.busy_task(0), None);
        assert!(pool.generation(0).unwrap() > before);
        assert!(!pool.is_current(0, before));
    }

    struct NoSpawner;

    impl WorkerSpawner for NoSpawner {
        fn spawn(
            &self,
            worker_id: usize,
            _generation: u64,
            _events: UnboundedSender<WorkerEvent>,
        ) -> Result<Box<dyn WorkerHandle>, WardenError> {
            Err(WardenError::Spawn {
                worker_id,
                reason: "no program".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn failed_spawn_is_unspawned_not_dead() {
        let mut pool = WorkerPool::new(Arc::new(NoSpawner), Duration::from_millis(50));
        pool.spawn(2).await;

        assert_eq!(pool.len(), 2);
        assert!(pool.dead_ids().is_empty());
        assert_eq!(pool.unspawned_ids(), vec![0, 1]);
        assert!(pool.idle_ids().is_empty());
        assert!(matches!(pool.respawn(1).await, Err(WardenError::Spawn { worker_id: 1, .. })));
    }

    #[tokio::test]
    async fn respawn_unknown_slot_fails() {
        let mut pool = pool();
        assert!(matches!(pool.respawn(7).await, Err(WardenError::UnknownWorker(7))));
    }

    #[tokio::test]
    async fn terminate_all_clears_table() {
        let mut pool = pool();
        pool.spawn(2).await;
        pool.dispatch(0, &Task::new("t1", TaskKind::Task, 1, "hang")).unwrap();

        pool.terminate_all().await;
        assert!(pool.is_empty());
        assert_eq!(pool.busy_count(), 0);
    }
}
