//! Line-scripted [`AgentExecutor`].
//!
//! Reads the task text as a tiny script, one directive per line:
//!
//! ```text
//! progress <message>
//! heartbeat
//! usage <cost> [prompt_tokens] [completion_tokens]
//! sleep <ms>
//! fail <message>
//! panic <message>
//! hang
//! ```
//!
//! Anything else is reported as progress. Handy for local dry runs and for
//! driving crash/timeout paths in tests.

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::Task;
use crate::ports::{AgentExecutor, EventEmitter};

#[derive(Debug, Clone, Copy, Default)]
pub struct ScriptedExecutor;

#[async_trait]
impl AgentExecutor for ScriptedExecutor {
    async fn execute(&self, task: &Task, events: &EventEmitter) -> Result<(), String> {
        for line in task.text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let (cmd, rest) = line.split_once(' ').unwrap_or((line, ""));
            let rest = rest.trim();
            match cmd {
                "progress" => {
                    events.progress(task, rest);
                }
                "heartbeat" => {
                    events.heartbeat(task);
                }
                "usage" => {
                    let mut parts = rest.split_whitespace();
                    let cost = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0.0);
                    let prompt = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
                    let completion = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
                    events.usage(task, cost, prompt, completion);
                }
                "sleep" => {
                    let ms = rest.parse().unwrap_or(0);
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                }
                "fail" => return Err(rest.to_string()),
                "panic" => panic!("scripted panic: {rest}"),
                "hang" => std::future::pending::<()>().await,
                _ => {
                    events.progress(task, line);
                }
            }
        }
        Ok(())
    }
}
