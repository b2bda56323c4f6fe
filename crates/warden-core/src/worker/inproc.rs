//! In-process workers: one tokio task per slot running an [`AgentExecutor`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::debug;

use super::{WorkerHandle, WorkerInput, WorkerSpawner};
use crate::domain::{Task, WorkerEvent};
use crate::error::WardenError;
use crate::ports::{AgentExecutor, EventEmitter};

/// Spawns workers as tokio tasks on the current runtime.
///
/// A panic inside the executor ends the task; the pool then sees the worker
/// as dead, same as a crashed process.
pub struct TokioSpawner {
    executor: Arc<dyn AgentExecutor>,
}

impl TokioSpawner {
    pub fn new(executor: Arc<dyn AgentExecutor>) -> Self {
        Self { executor }
    }
}

impl WorkerSpawner for TokioSpawner {
    fn spawn(
        &self,
        worker_id: usize,
        generation: u64,
        events: UnboundedSender<WorkerEvent>,
    ) -> Result<Box<dyn WorkerHandle>, WardenError> {
        let rt = Handle::try_current().map_err(|e| WardenError::Spawn {
            worker_id,
            reason: e.to_string(),
        })?;
        let (input, rx) = mpsc::unbounded_channel();
        let emitter = EventEmitter::new(worker_id, generation, events);
        let join = rt.spawn(worker_loop(Arc::clone(&self.executor), rx, emitter));
        Ok(Box::new(TokioWorker {
            worker_id,
            input,
            join: Some(join),
        }))
    }
}

struct TokioWorker {
    worker_id: usize,
    input: UnboundedSender<WorkerInput>,
    // None once joined; a JoinHandle must not be polled after completion
    join: Option<JoinHandle<()>>,
}

#[async_trait]
impl WorkerHandle for TokioWorker {
    fn send(&mut self, task: &Task) -> Result<(), WardenError> {
        self.input
            .send(WorkerInput::Run { task: task.clone() })
            .map_err(|_| WardenError::WorkerChannelClosed(self.worker_id))
    }

    fn is_alive(&mut self) -> bool {
        self.join.as_ref().is_some_and(|j| !j.is_finished())
    }

    async fn shutdown(&mut self, timeout: Duration) {
        let _ = self.input.send(WorkerInput::Shutdown);
        if let Some(join) = self.join.as_mut()
            && tokio::time::timeout(timeout, join).await.is_ok()
        {
            self.join = None;
            return;
        }
        debug!(worker_id = self.worker_id, "worker ignored shutdown, aborting");
        self.terminate(timeout).await;
    }

    async fn terminate(&mut self, timeout: Duration) {
        if let Some(mut join) = self.join.take() {
            join.abort();
            let _ = tokio::time::timeout(timeout, &mut join).await;
        }
    }
}

// 1 worker = 1 task at a time, strictly sequential
async fn worker_loop(
    executor: Arc<dyn AgentExecutor>,
    mut rx: UnboundedReceiver<WorkerInput>,
    emitter: EventEmitter,
) {
    while let Some(input) = rx.recv().await {
        let task = match input {
            WorkerInput::Run { task } => task,
            WorkerInput::Shutdown => break,
        };
        let result = executor.execute(&task, &emitter).await;
        if !emitter.task_done(&task, &result) {
            break;
        }
    }
    debug!(worker_id = emitter.worker_id(), "worker loop finished");
}
