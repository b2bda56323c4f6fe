//! Supervisor: the single owner of queue, running map and worker pool.
//!
//! All mutation happens on the poll loop (`tick`), so nothing here is
//! locked. Workers only talk back through the pool's event channel.
//!
//! tick の順序: events → health → timeouts → assign → evolution

mod builder;
mod health;
mod scheduling;
mod status;
mod timeout;

pub use builder::{BuildError, SupervisorBuilder};
pub use health::CrashWindow;

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::SupervisorConfig;
use crate::domain::{
    BudgetTracker, EventRecord, RunningEntry, RunningMap, SupervisorEvent, SupervisorState, Task,
    TaskId, TaskKind, WorkerEvent, WorkerEventKind,
};
use crate::error::WardenError;
use crate::ports::{Clock, EventSink, IdGenerator, Notifier, StateStore, Vcs};
use crate::queue::{SnapshotStore, TaskQueue};
use crate::worker::WorkerPool;

pub struct Supervisor {
    config: SupervisorConfig,
    queue: TaskQueue,
    running: RunningMap,
    pool: WorkerPool,
    snapshots: SnapshotStore,
    crashes: CrashWindow,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    state: Arc<dyn StateStore>,
    events: Arc<dyn EventSink>,
    notifier: Arc<dyn Notifier>,
    vcs: Arc<dyn Vcs>,
}

impl Supervisor {
    pub fn builder(config: SupervisorConfig) -> SupervisorBuilder {
        SupervisorBuilder::new(config)
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Pending tasks in assignment order.
    pub fn pending(&self) -> &[Task] {
        self.queue.pending()
    }

    pub fn running(&self) -> &RunningMap {
        &self.running
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub fn snapshots(&self) -> &SnapshotStore {
        &self.snapshots
    }

    /// Add a task to the pending queue. Persisting is up to the caller.
    pub fn enqueue(&mut self, task: Task, front: bool) -> Result<Task, WardenError> {
        if self.queue.contains(&task.id) || self.running.contains_key(&task.id) {
            return Err(WardenError::DuplicateTask(task.id));
        }
        let stored = self.queue.enqueue(task, front, self.clock.now());
        debug!(task_id = %stored.id, seq = stored.queue_seq, front, "task enqueued");
        Ok(stored)
    }

    /// True if a pending task or a running task has this kind.
    pub fn has_type(&self, kind: &TaskKind) -> bool {
        self.queue.contains_kind(kind) || self.running.values().any(|e| &e.task.kind == kind)
    }

    /// Drop a pending task, or kill the worker running it.
    pub async fn cancel(&mut self, task_id: &TaskId) -> bool {
        if self.queue.remove(task_id).is_some() {
            info!(%task_id, "pending task cancelled");
            self.persist_quiet("cancel_pending");
            return true;
        }

        let Some(entry) = self.running.remove(task_id) else {
            return false;
        };
        let worker_id = entry.worker_id;
        self.release_worker(worker_id, task_id);
        self.respawn_worker(worker_id).await;
        info!(%task_id, worker_id, "running task cancelled, worker respawned");
        self.persist_quiet("cancel_running");
        true
    }

    /// Write the snapshot now.
    pub fn persist(&self, reason: &str) -> Result<(), WardenError> {
        self.snapshots
            .persist(&self.queue, &self.running, reason, self.clock.now())
    }

    fn persist_quiet(&self, reason: &str) {
        if let Err(e) = self.persist(reason) {
            warn!(reason, error = %e, "snapshot persist failed");
        }
    }

    /// Bring back pending tasks after a restart. Only acts when both
    /// pending and running are empty.
    pub fn restore_pending(&mut self) -> usize {
        if !self.running.is_empty() {
            return 0;
        }
        let restored = self.snapshots.restore(
            &mut self.queue,
            &self.running,
            self.clock.now(),
            self.config.snapshot_max_age_sec,
        );
        if restored > 0 {
            info!(restored, "pending tasks restored from snapshot");
            self.emit(SupervisorEvent::QueueRestoredFromSnapshot {
                restored_pending: restored,
            });
        }
        restored
    }

    /// Startup: restore the queue, then start the pool.
    pub async fn start(&mut self) -> usize {
        let restored = self.restore_pending();
        self.spawn_workers().await;
        restored
    }

    pub async fn spawn_workers(&mut self) {
        self.pool.spawn(self.config.max_workers).await;
        info!(workers = self.pool.len(), "worker pool started");
    }

    /// Terminate every worker and forget what they were running.
    pub async fn kill_workers(&mut self) {
        self.pool.terminate_all().await;
        let cleared = self.running.len();
        self.running.clear();
        if cleared > 0 {
            warn!(count = cleared, "running tasks cleared on kill");
            self.emit(SupervisorEvent::RunningClearedOnKill { count: cleared });
        }
        self.persist_quiet("kill_workers");
    }

    async fn respawn_worker(&mut self, worker_id: usize) {
        if let Err(e) = self.pool.respawn(worker_id).await {
            warn!(worker_id, error = %e, "respawn failed, slot retried on next health check");
        }
    }

    /// Free `worker_id` if it is still marked busy with `task_id`.
    fn release_worker(&mut self, worker_id: usize, task_id: &TaskId) {
        if self.pool.busy_task(worker_id) == Some(task_id) {
            self.pool.set_idle(worker_id);
        }
    }

    /// Hand pending tasks to idle workers, head of the queue first.
    pub async fn assign_ready(&mut self) -> usize {
        let mut assigned = 0;
        for worker_id in self.pool.idle_ids() {
            let Some(task) = self.queue.pop_for_assignment() else {
                break;
            };
            let now = self.clock.now();
            if let Err(e) = self.pool.dispatch(worker_id, &task) {
                warn!(worker_id, task_id = %task.id, error = %e, "dispatch failed, task back to front");
                self.queue.enqueue(task, true, now);
                continue;
            }

            let entry = RunningEntry::start(task, worker_id, now);
            info!(
                task_id = %entry.task.id,
                task_type = %entry.task.kind,
                worker_id,
                attempt = entry.attempt,
                "task assigned"
            );
            let announce = entry
                .task
                .kind
                .announces_start()
                .then(|| format!("{} task {} started.", title_case(entry.task.kind.as_str()), entry.task.id));
            self.running.insert(entry.task.id.clone(), entry);
            if let Some(text) = announce {
                self.notify_owner(&text).await;
            }
            self.persist_quiet("assign_task");
            assigned += 1;
        }
        assigned
    }

    /// Read up to `event_drain_limit` worker events without blocking.
    pub fn drain_events(&mut self) -> usize {
        let mut handled = 0;
        while handled < self.config.event_drain_limit {
            let Some(event) = self.pool.try_recv_event() else {
                break;
            };
            self.handle_event(event);
            handled += 1;
        }
        handled
    }

    fn handle_event(&mut self, event: WorkerEvent) {
        // usage は stale な worker からでも課金済み
        if event.kind == WorkerEventKind::Usage {
            self.record_usage(&event.data);
        }

        // 同じ slot に respawn された後の旧 worker のイベントは無視
        let current = self.pool.is_current(event.worker_id, event.generation);
        let now = self.clock.now();
        let owned = match event.task_id.as_ref().and_then(|id| self.running.get_mut(id)) {
            Some(entry) if current && entry.worker_id == event.worker_id => {
                entry.touch(now);
                true
            }
            _ => false,
        };
        if !owned {
            debug!(
                worker_id = event.worker_id,
                generation = event.generation,
                kind = ?event.kind,
                "event for no running task"
            );
            return;
        }

        match event.kind {
            WorkerEventKind::TaskDone => {
                let Some(task_id) = event.task_id else { return };
                if let Some(entry) = self.running.remove(&task_id) {
                    self.release_worker(entry.worker_id, &task_id);
                    let ok = event.data.get("ok").and_then(Value::as_bool).unwrap_or(true);
                    info!(
                        %task_id,
                        worker_id = entry.worker_id,
                        ok,
                        runtime_sec = entry.runtime_sec(now),
                        "task done"
                    );
                    self.persist_quiet("task_done");
                }
            }
            WorkerEventKind::Log => {
                debug!(worker_id = event.worker_id, data = %event.data, "worker log");
            }
            _ => {}
        }
    }

    /// Apply one usage report to the persisted budget counters.
    pub fn record_usage(&self, usage: &Value) {
        let Some(mut state) = self.load_state() else {
            return;
        };
        BudgetTracker::record_usage(&mut state, usage);
        self.save_state(&state);
    }

    pub fn budget_pct(&self) -> f64 {
        self.load_state()
            .map(|st| BudgetTracker::budget_pct(&st, self.config.total_budget_limit))
            .unwrap_or(0.0)
    }

    fn load_state(&self) -> Option<SupervisorState> {
        match self.state.load() {
            Ok(state) => Some(state),
            Err(e) => {
                warn!(error = %e, "state load failed");
                None
            }
        }
    }

    fn save_state(&self, state: &SupervisorState) {
        if let Err(e) = self.state.save(state) {
            warn!(error = %e, "state save failed");
        }
    }

    /// Best-effort message to the owner, if there is one.
    async fn notify_owner(&self, text: &str) {
        let Some(owner) = self.load_state().and_then(|st| st.owner()) else {
            debug!("no owner to notify");
            return;
        };
        if let Err(e) = self.notifier.notify(owner, text).await {
            warn!(error = %e, "owner notification failed");
        }
    }

    fn emit(&self, event: SupervisorEvent) {
        let record = EventRecord::new(self.clock.now(), event);
        if let Err(e) = self.events.emit(&record) {
            warn!(error = %e, "event log write failed");
        }
    }

    /// One pass of the poll loop.
    pub async fn tick(&mut self) {
        self.drain_events();
        self.ensure_workers_healthy().await;
        self.enforce_task_timeouts().await;
        self.assign_ready().await;
        self.enqueue_evolution_if_needed().await;
    }

    /// Tick until `shutdown` flips to true (or its sender is dropped), then
    /// shut the pool down.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.tick_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = ticker.tick() => self.tick().await,
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        self.shutdown_workers().await;
    }

    /// Sentinel to every worker, then collect what finished meanwhile.
    /// Tasks still running go back to the front of the queue so the final
    /// snapshot has them.
    pub async fn shutdown_workers(&mut self) {
        self.pool.shutdown_all().await;
        self.drain_events();

        let now = self.clock.now();
        let unfinished: Vec<RunningEntry> = std::mem::take(&mut self.running).into_values().collect();
        for entry in unfinished {
            debug!(task_id = %entry.task.id, "requeue unfinished task on shutdown");
            let task = entry.task.with_attempt(entry.attempt);
            self.queue.enqueue(task, true, now);
        }
        self.persist_quiet("supervisor_shutdown");
        info!(pending = self.queue.len(), "supervisor stopped");
    }
}

fn title_case(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
