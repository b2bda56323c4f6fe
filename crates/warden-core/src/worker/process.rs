//! OS process workers.
//!
//! Each worker is a child process speaking JSON lines: [`WorkerInput`] on its
//! stdin, [`WorkerEvent`]s on its stdout. Stdout lines that are not events are
//! forwarded as `log` events.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{WorkerHandle, WorkerInput, WorkerSpawner};
use crate::domain::{Task, TaskId, WorkerEvent, WorkerEventKind};
use crate::error::WardenError;

/// Command line used to start one worker process.
#[derive(Debug, Clone, Default)]
pub struct ProcessCommand {
    pub program: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub current_dir: Option<PathBuf>,
}

pub struct ProcessSpawner {
    command: ProcessCommand,
}

impl ProcessSpawner {
    pub fn new(command: ProcessCommand) -> Self {
        Self { command }
    }
}

type CurrentTask = Arc<Mutex<Option<TaskId>>>;

impl WorkerSpawner for ProcessSpawner {
    fn spawn(
        &self,
        worker_id: usize,
        generation: u64,
        events: UnboundedSender<WorkerEvent>,
    ) -> Result<Box<dyn WorkerHandle>, WardenError> {
        let spawn_err = |reason: String| WardenError::Spawn { worker_id, reason };
        let rt = Handle::try_current().map_err(|e| spawn_err(e.to_string()))?;

        let mut cmd = Command::new(&self.command.program);
        cmd.args(&self.command.args)
            .envs(&self.command.env)
            .env("WARDEN_WORKER_ID", worker_id.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        if let Some(dir) = &self.command.current_dir {
            cmd.current_dir(dir);
        }

        let mut child = {
            let _guard = rt.enter();
            cmd.spawn().map_err(|e| spawn_err(e.to_string()))?
        };
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| spawn_err("stdin not captured".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| spawn_err("stdout not captured".to_string()))?;

        let current: CurrentTask = Arc::new(Mutex::new(None));
        let (input, rx) = mpsc::unbounded_channel();
        let writer = rt.spawn(write_inputs(worker_id, stdin, rx));
        let reader = rt.spawn(read_events(
            worker_id,
            generation,
            stdout,
            events,
            Arc::clone(&current),
        ));

        debug!(worker_id, generation, pid = ?child.id(), "worker process started");
        Ok(Box::new(ProcessWorker {
            worker_id,
            child,
            input,
            current,
            writer,
            reader,
        }))
    }
}

struct ProcessWorker {
    worker_id: usize,
    child: Child,
    input: UnboundedSender<WorkerInput>,
    current: CurrentTask,
    writer: JoinHandle<()>,
    reader: JoinHandle<()>,
}

impl ProcessWorker {
    fn set_current(&self, id: Option<TaskId>) {
        *self.current.lock().unwrap_or_else(|e| e.into_inner()) = id;
    }
}

#[async_trait]
impl WorkerHandle for ProcessWorker {
    fn send(&mut self, task: &Task) -> Result<(), WardenError> {
        self.input
            .send(WorkerInput::Run { task: task.clone() })
            .map_err(|_| WardenError::WorkerChannelClosed(self.worker_id))?;
        self.set_current(Some(task.id.clone()));
        Ok(())
    }

    fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    async fn shutdown(&mut self, timeout: Duration) {
        let _ = self.input.send(WorkerInput::Shutdown);
        match tokio::time::timeout(timeout, self.child.wait()).await {
            Ok(_) => {
                let _ = tokio::time::timeout(timeout, &mut self.reader).await;
                self.writer.abort();
            }
            Err(_) => {
                debug!(worker_id = self.worker_id, "worker process ignored shutdown, killing");
                self.terminate(timeout).await;
            }
        }
    }

    async fn terminate(&mut self, timeout: Duration) {
        if let Err(e) = self.child.start_kill() {
            debug!(worker_id = self.worker_id, error = %e, "kill failed, process already gone?");
        }
        if tokio::time::timeout(timeout, self.child.wait()).await.is_err() {
            warn!(worker_id = self.worker_id, "worker process did not exit within join timeout");
        }
        self.writer.abort();
        self.reader.abort();
        self.set_current(None);
    }
}

async fn write_inputs(
    worker_id: usize,
    mut stdin: ChildStdin,
    mut rx: UnboundedReceiver<WorkerInput>,
) {
    while let Some(input) = rx.recv().await {
        let is_shutdown = matches!(input, WorkerInput::Shutdown);
        let mut line = match serde_json::to_vec(&input) {
            Ok(line) => line,
            Err(e) => {
                warn!(worker_id, error = %e, "failed to encode worker input");
                continue;
            }
        };
        line.push(b'\n');
        if stdin.write_all(&line).await.is_err() || stdin.flush().await.is_err() {
            break;
        }
        if is_shutdown {
            break;
        }
    }
    // stdin drop -> EOF
}

async fn read_events(
    worker_id: usize,
    generation: u64,
    stdout: ChildStdout,
    events: UnboundedSender<WorkerEvent>,
    current: CurrentTask,
) {
    let mut lines = BufReader::new(stdout).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let mut event = serde_json::from_str::<WorkerEvent>(line).unwrap_or_else(|_| {
            WorkerEvent::new(worker_id, WorkerEventKind::Log, None, json!({ "line": line }))
        });
        event.worker_id = worker_id;
        event.generation = generation;
        {
            let mut current = current.lock().unwrap_or_else(|e| e.into_inner());
            if event.task_id.is_none() {
                event.task_id = current.clone();
            }
            if event.kind == WorkerEventKind::TaskDone {
                *current = None;
            }
        }
        if events.send(event).is_err() {
            break;
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::domain::TaskKind;

    fn sh(script: &str) -> ProcessSpawner {
        ProcessSpawner::new(ProcessCommand {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            ..Default::default()
        })
    }

    async fn recv(rx: &mut UnboundedReceiver<WorkerEvent>) -> WorkerEvent {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn events_are_tagged_and_raw_lines_become_logs() {
        let spawner = sh(
            r#"read line; echo 'starting'; echo '{"type":"task_done","data":{"ok":true}}'; read rest"#,
        );
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut worker = spawner.spawn(4, 9, tx).unwrap();
        worker.send(&Task::new("t1", TaskKind::Task, 1, "go")).unwrap();

        let log = recv(&mut rx).await;
        assert_eq!(log.kind, WorkerEventKind::Log);
        assert_eq!(log.worker_id, 4);
        assert_eq!(log.generation, 9);
        assert_eq!(log.data["line"], "starting");

        let done = recv(&mut rx).await;
        assert_eq!(done.kind, WorkerEventKind::TaskDone);
        assert_eq!(done.task_id, Some(TaskId::new("t1")));

        worker.shutdown(Duration::from_secs(2)).await;
        assert!(!worker.is_alive());
    }

    #[tokio::test]
    async fn terminate_kills_a_stuck_process() {
        let spawner = sh("sleep 30");
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut worker = spawner.spawn(0, 1, tx).unwrap();
        assert!(worker.is_alive());

        worker.terminate(Duration::from_secs(2)).await;
        assert!(!worker.is_alive());
    }

    #[tokio::test]
    async fn missing_program_is_a_spawn_error() {
        let spawner = ProcessSpawner::new(ProcessCommand {
            program: "/nonexistent/warden-worker".to_string(),
            ..Default::default()
        });
        let (tx, _rx) = mpsc::unbounded_channel();
        assert!(matches!(
            spawner.spawn(2, 1, tx),
            Err(WardenError::Spawn { worker_id: 2, .. })
        ));
    }
}
