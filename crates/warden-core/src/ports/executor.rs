//! AgentExecutor port - タスクの中身を実行する外部エージェント
//!
//! The supervisor never looks inside a task. An executor runs one task at a
//! time inside a worker and reports back through an [`EventEmitter`].

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::mpsc::UnboundedSender;

use crate::domain::{Task, WorkerEvent, WorkerEventKind};

#[async_trait]
pub trait AgentExecutor: Send + Sync {
    /// Run `task` to completion. `Err` is reported as a failed `task_done`,
    /// it does not kill the worker.
    async fn execute(&self, task: &Task, events: &EventEmitter) -> Result<(), String>;
}

/// Sends events on the shared output channel, tagged with the worker id and
/// spawn generation.
#[derive(Debug, Clone)]
pub struct EventEmitter {
    worker_id: usize,
    generation: u64,
    tx: UnboundedSender<WorkerEvent>,
}

impl EventEmitter {
    pub fn new(worker_id: usize, generation: u64, tx: UnboundedSender<WorkerEvent>) -> Self {
        Self {
            worker_id,
            generation,
            tx,
        }
    }

    pub fn worker_id(&self) -> usize {
        self.worker_id
    }

    /// Returns false once the supervisor side is gone.
    pub fn emit(&self, kind: WorkerEventKind, task: &Task, data: Value) -> bool {
        let event = WorkerEvent::new(self.worker_id, kind, Some(task.id.clone()), data)
            .with_generation(self.generation);
        self.tx.send(event).is_ok()
    }

    pub fn progress(&self, task: &Task, message: &str) -> bool {
        self.emit(WorkerEventKind::Progress, task, json!({ "message": message }))
    }

    pub fn heartbeat(&self, task: &Task) -> bool {
        self.emit(WorkerEventKind::Heartbeat, task, Value::Null)
    }

    pub fn usage(&self, task: &Task, cost: f64, prompt_tokens: u64, completion_tokens: u64) -> bool {
        self.emit(
            WorkerEventKind::Usage,
            task,
            json!({
                "cost": cost,
                "prompt_tokens": prompt_tokens,
                "completion_tokens": completion_tokens,
            }),
        )
    }

    pub fn task_done(&self, task: &Task, result: &Result<(), String>) -> bool {
        let data = match result {
            Ok(()) => json!({ "ok": true }),
            Err(error) => json!({ "ok": false, "error": error }),
        };
        self.emit(WorkerEventKind::TaskDone, task, data)
    }
}
