//! Timeout enforcer. Driven by wall-clock polls on every tick, no timers.
//!
//! RUNNING ─soft─▶ RUNNING_SOFT_WARNED ─hard─▶ REQUEUED | DROPPED
//!
//! A stale heartbeat is only reported; the hard timeout alone kills.

use serde_json::json;
use tracing::{info, warn};

use super::Supervisor;
use crate::domain::{SupervisorEvent, TaskId};

impl Supervisor {
    pub async fn enforce_task_timeouts(&mut self) {
        let now = self.clock.now();
        let soft = self.config.soft_timeout_sec as f64;
        let hard = self.config.hard_timeout_sec as f64;
        let stale_after = self.config.heartbeat_stale_sec as f64;
        let max_retries = self.config.max_retries;

        let ids: Vec<TaskId> = self.running.keys().cloned().collect();
        for task_id in ids {
            let Some(entry) = self.running.get_mut(&task_id) else {
                continue;
            };
            let runtime = entry.runtime_sec(now);
            let lag = entry.heartbeat_lag_sec(now);
            let worker_id = entry.worker_id;
            let task_type = entry.task.kind.to_string();

            if runtime >= soft && !entry.soft_sent {
                entry.soft_sent = true;
                info!(%task_id, worker_id, runtime_sec = runtime, heartbeat_lag_sec = lag, "soft timeout");
                self.emit(SupervisorEvent::TaskSoftTimeout {
                    task_id: task_id.clone(),
                    task_type: task_type.clone(),
                    worker_id,
                    runtime_sec: runtime,
                    heartbeat_lag_sec: lag,
                });
                self.notify_owner(&format!(
                    "Task {task_id} ({task_type}) has been running for {runtime:.0}s \
                     (heartbeat lag {lag:.0}s). Still waiting."
                ))
                .await;
            }

            if runtime < hard {
                continue;
            }

            let Some(entry) = self.running.remove(&task_id) else {
                continue;
            };
            self.release_worker(worker_id, &task_id);
            self.respawn_worker(worker_id).await;

            let attempt = entry.attempt;
            let heartbeat_stale = lag >= stale_after;
            let requeued = attempt <= max_retries;
            let new_attempt = if requeued { attempt + 1 } else { attempt };

            if requeued {
                let task = entry
                    .task
                    .with_attempt(new_attempt)
                    .with_extra("timeout_retry_from", json!(task_id))
                    .with_extra("timeout_retry_at", json!(now.to_rfc3339()));
                self.queue.enqueue(task, true, now);
                warn!(%task_id, worker_id, runtime_sec = runtime, heartbeat_stale, new_attempt, "hard timeout, retrying");
            } else {
                warn!(%task_id, worker_id, runtime_sec = runtime, heartbeat_stale, attempt, "hard timeout, retries exhausted, task dropped");
            }

            self.emit(SupervisorEvent::TaskHardTimeout {
                task_id: task_id.clone(),
                task_type: task_type.clone(),
                worker_id,
                runtime_sec: runtime,
                heartbeat_lag_sec: lag,
                heartbeat_stale,
                attempt,
                requeued,
                new_attempt,
                max_retries,
            });

            let text = if requeued {
                format!(
                    "Task {task_id} ({task_type}) hit the hard timeout after {runtime:.0}s. \
                     Worker {worker_id} restarted, retrying as attempt {new_attempt}."
                )
            } else {
                format!(
                    "Task {task_id} ({task_type}) hit the hard timeout after {runtime:.0}s \
                     on attempt {attempt}. No retries left, task dropped."
                )
            };
            self.notify_owner(&text).await;
            self.persist_quiet("task_hard_timeout");
        }
    }
}
