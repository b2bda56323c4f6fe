//! Health monitor: dead workers, crash window, crash-storm fallback.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use super::Supervisor;
use crate::domain::SupervisorEvent;
use crate::ports::UnsyncedPolicy;
use crate::ports::clock::elapsed_secs;

const FALLBACK_REASON: &str = "crash_storm_fallback";

/// Sliding window of crash timestamps.
#[derive(Debug, Clone)]
pub struct CrashWindow {
    window_sec: u64,
    threshold: usize,
    crashes: VecDeque<DateTime<Utc>>,
}

impl CrashWindow {
    pub fn new(window_sec: u64, threshold: usize) -> Self {
        Self {
            window_sec,
            threshold,
            crashes: VecDeque::new(),
        }
    }

    pub fn record(&mut self, at: DateTime<Utc>) {
        self.crashes.push_back(at);
    }

    /// Forget crashes older than the window.
    pub fn prune(&mut self, now: DateTime<Utc>) {
        let window = self.window_sec as f64;
        self.crashes.retain(|t| elapsed_secs(*t, now) < window);
    }

    pub fn is_storm(&self) -> bool {
        self.crashes.len() >= self.threshold
    }

    pub fn len(&self) -> usize {
        self.crashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.crashes.is_empty()
    }

    pub fn clear(&mut self) {
        self.crashes.clear();
    }
}

impl Supervisor {
    /// Respawn dead workers and put their task back at the front, same
    /// attempt. Then check the crash window.
    ///
    /// Only a worker that was running and died counts as a crash. Slots
    /// whose spawn failed are retried every call without touching the window.
    pub async fn ensure_workers_healthy(&mut self) {
        let now = self.clock.now();

        for worker_id in self.pool.unspawned_ids() {
            if self.pool.respawn(worker_id).await.is_ok() {
                info!(worker_id, "worker spawned on retry");
            }
        }

        for worker_id in self.pool.dead_ids() {
            self.crashes.record(now);

            let task_id = self.pool.set_idle(worker_id);
            let requeued = match task_id.as_ref().and_then(|id| self.running.remove(id)) {
                Some(entry) => {
                    let task = entry.task.with_attempt(entry.attempt);
                    self.queue.enqueue(task, true, now);
                    true
                }
                None => false,
            };
            warn!(
                worker_id,
                task_id = ?task_id,
                requeued,
                "worker died"
            );
            self.emit(SupervisorEvent::WorkerCrashed {
                worker_id,
                task_id,
                requeued,
            });

            self.respawn_worker(worker_id).await;
            self.persist_quiet("worker_respawn_after_crash");
        }

        self.crashes.prune(now);
        if self.crashes.is_storm() {
            self.handle_crash_storm().await;
        }
    }

    /// Reset to the stable branch, re-sync deps, restart the pool. Any
    /// failure leaves the pool as it is and clears the window.
    async fn handle_crash_storm(&mut self) {
        let crashes = self.crashes.len();
        let window_sec = self.config.crash_window_sec;
        let branch = self.config.branch_stable.clone();

        error!(crashes, window_sec, %branch, "crash storm, falling back to stable branch");
        self.emit(SupervisorEvent::CrashStorm { crashes, window_sec });
        self.notify_owner(&format!(
            "Crash storm: {crashes} worker crashes within {window_sec}s. Falling back to {branch}."
        ))
        .await;

        match self
            .vcs
            .checkout_and_reset(&branch, FALLBACK_REASON, UnsyncedPolicy::RescueAndReset)
            .await
        {
            Ok(msg) => info!(%branch, %msg, "fallback reset done"),
            Err(e) => {
                error!(%branch, error = %e, "fallback reset failed, workers not restarted");
                self.emit(SupervisorEvent::CrashStormResetBlocked {
                    error: e.to_string(),
                });
                self.notify_owner(&format!(
                    "Crash storm fallback blocked: reset to {branch} failed: {e}"
                ))
                .await;
                self.crashes.clear();
                return;
            }
        }

        match self.vcs.sync_runtime_dependencies(FALLBACK_REASON).await {
            Ok(msg) => info!(%msg, "fallback dependency sync done"),
            Err(e) => {
                error!(error = %e, "fallback dependency sync failed, workers not restarted");
                self.emit(SupervisorEvent::CrashStormDepsSyncFailed {
                    error: e.to_string(),
                });
                self.notify_owner(&format!(
                    "Crash storm fallback blocked: dependency sync failed: {e}"
                ))
                .await;
                self.crashes.clear();
                return;
            }
        }

        self.kill_workers().await;
        self.spawn_workers().await;
        self.crashes.clear();
        self.emit(SupervisorEvent::CrashStormRecovered {
            branch: branch.clone(),
        });
        self.notify_owner(&format!("Crash storm fallback done: workers restarted on {branch}."))
            .await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::domain::{TaskId, TaskKind, WorkerEvent};
    use crate::error::WardenError;
    use crate::impls::{ScriptedExecutor, ScriptedVcs};
    use crate::supervisor::test_support::{Harness, harness, harness_with_spawner, task};
    use crate::worker::{TokioSpawner, WorkerHandle, WorkerSpawner};
    use chrono::TimeZone;
    use tokio::sync::mpsc::UnboundedSender;

    /// Fails the first `failures` spawns, then starts tokio workers.
    struct FlakySpawner {
        failures: AtomicUsize,
        inner: TokioSpawner,
    }

    impl FlakySpawner {
        fn new(failures: usize) -> Arc<Self> {
            Arc::new(Self {
                failures: AtomicUsize::new(failures),
                inner: TokioSpawner::new(Arc::new(ScriptedExecutor)),
            })
        }
    }

    impl WorkerSpawner for FlakySpawner {
        fn spawn(
            &self,
            worker_id: usize,
            generation: u64,
            events: UnboundedSender<WorkerEvent>,
        ) -> Result<Box<dyn WorkerHandle>, WardenError> {
            let failing = self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(WardenError::Spawn {
                    worker_id,
                    reason: "no such program".to_string(),
                });
            }
            self.inner.spawn(worker_id, generation, events)
        }
    }

    #[test]
    fn window_prunes_old_crashes() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let mut w = CrashWindow::new(60, 3);
        w.record(t0);
        w.record(t0 + chrono::Duration::seconds(30));
        w.record(t0 + chrono::Duration::seconds(59));
        assert!(w.is_storm());

        w.prune(t0 + chrono::Duration::seconds(61));
        assert_eq!(w.len(), 2);
        assert!(!w.is_storm());
    }

    async fn wait_dead(h: &mut Harness, n: usize) {
        for _ in 0..400 {
            if h.sup.pool.dead_ids().len() >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("workers did not die");
    }

    #[tokio::test]
    async fn crash_requeues_at_front_with_same_attempt() {
        let mut h = harness(2, ScriptedVcs::ok());
        h.sup.spawn_workers().await;
        h.sup
            .enqueue(task("boom", TaskKind::Task, "panic worker died").with_attempt(1), false)
            .unwrap();
        h.sup.assign_ready().await;
        h.sup.enqueue(task("next", TaskKind::Task, ""), false).unwrap();

        wait_dead(&mut h, 1).await;
        h.sup.ensure_workers_healthy().await;

        assert!(h.sup.running().is_empty());
        assert_eq!(h.sup.pending()[0].id.as_str(), "boom");
        assert_eq!(h.sup.pending()[0].attempt, Some(1));
        assert!(h.sup.pool.dead_ids().is_empty());
        assert_eq!(h.sup.pool().busy_count(), 0);
        assert_eq!(h.events.types(), vec!["worker_crashed"]);

        let snap = h.sup.snapshots().read().unwrap().unwrap();
        assert_eq!(snap.reason, "worker_respawn_after_crash");
        assert_eq!(snap.pending[0].id, TaskId::new("boom"));
        assert_eq!(snap.running_count, 0);
    }

    async fn crash_three(h: &mut Harness) {
        for i in 0..3 {
            h.sup
                .enqueue(task(&format!("c{i}"), TaskKind::Task, "panic again"), false)
                .unwrap();
        }
        h.sup.assign_ready().await;
        wait_dead(h, 3).await;
    }

    #[tokio::test]
    async fn three_crashes_trigger_one_fallback_and_reset_the_count() {
        let mut h = harness(3, ScriptedVcs::ok());
        h.sup.spawn_workers().await;
        crash_three(&mut h).await;

        h.sup.ensure_workers_healthy().await;
        assert_eq!(h.vcs.reset_calls(), 1);
        assert_eq!(h.vcs.deps_calls(), 1);
        assert_eq!(h.vcs.last_branch().as_deref(), Some("warden-stable"));
        assert!(h.sup.crashes.is_empty());
        assert_eq!(h.sup.pool().len(), 3);
        assert!(h.events.types().contains(&"crash_storm_recovered".to_string()));

        // 4th crash in the same window starts a fresh count
        for i in 0..3 {
            assert!(h.sup.cancel(&TaskId::new(format!("c{i}"))).await);
        }
        h.sup.enqueue(task("c3", TaskKind::Task, "panic once more"), false).unwrap();
        h.sup.assign_ready().await;
        wait_dead(&mut h, 1).await;
        h.sup.ensure_workers_healthy().await;
        assert_eq!(h.sup.crashes.len(), 1);
        assert_eq!(h.vcs.reset_calls(), 1);
    }

    #[tokio::test]
    async fn spawn_failures_never_count_as_crashes() {
        let mut h = harness_with_spawner(
            2,
            ScriptedVcs::failing_reset("dirty tree"),
            FlakySpawner::new(usize::MAX),
        );
        h.sup.spawn_workers().await;

        for _ in 0..30 {
            h.clock.advance_secs(1);
            h.sup.ensure_workers_healthy().await;
        }

        assert_eq!(h.vcs.reset_calls(), 0);
        assert!(h.sup.crashes.is_empty());
        assert!(h.notifier.texts().is_empty());
        assert!(h.events.types().is_empty());
        assert_eq!(h.sup.pool().len(), 2);
        assert!(h.sup.pool().idle_ids().is_empty());
    }

    #[tokio::test]
    async fn failed_spawn_is_retried_until_it_works() {
        let mut h = harness_with_spawner(1, ScriptedVcs::ok(), FlakySpawner::new(2));
        h.sup.spawn_workers().await;
        assert_eq!(h.sup.pool().unspawned_ids(), vec![0]);

        h.sup.ensure_workers_healthy().await;
        assert_eq!(h.sup.pool().unspawned_ids(), vec![0]);
        h.sup.ensure_workers_healthy().await;
        assert!(h.sup.pool().unspawned_ids().is_empty());
        assert_eq!(h.sup.pool().idle_ids(), vec![0]);
        assert!(h.sup.crashes.is_empty());

        h.sup.enqueue(task("a", TaskKind::Task, ""), false).unwrap();
        assert_eq!(h.sup.assign_ready().await, 1);
    }

    #[tokio::test]
    async fn failed_reset_leaves_pool_running() {
        let mut h = harness(3, ScriptedVcs::failing_reset("dirty tree"));
        h.sup.spawn_workers().await;
        crash_three(&mut h).await;

        h.sup.ensure_workers_healthy().await;
        assert_eq!(h.vcs.reset_calls(), 1);
        assert_eq!(h.vcs.deps_calls(), 0);
        assert!(h.sup.crashes.is_empty());
        assert!(h.events.types().contains(&"crash_storm_reset_blocked".to_string()));
        assert!(
            h.notifier.texts().iter().any(|t| t.contains("dirty tree")),
            "{:?}",
            h.notifier.texts()
        );
        // crashed tasks were requeued and workers respawned individually
        assert_eq!(h.sup.pending().len(), 3);
        assert!(h.sup.pool.dead_ids().is_empty());
    }

    #[tokio::test]
    async fn failed_dependency_sync_does_not_restart() {
        let mut h = harness(3, ScriptedVcs::failing_deps("lockfile"));
        h.sup.spawn_workers().await;
        crash_three(&mut h).await;

        h.sup.ensure_workers_healthy().await;
        assert_eq!(h.vcs.deps_calls(), 1);
        let types = h.events.types();
        assert!(types.contains(&"crash_storm_deps_sync_failed".to_string()));
        assert!(!types.contains(&"crash_storm_recovered".to_string()));
    }
}
