//! Append-only JSON lines event log.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use crate::domain::EventRecord;
use crate::error::WardenError;
use crate::ports::EventSink;

#[derive(Debug)]
pub struct JsonlEventSink {
    path: PathBuf,
    // serializes appends from the same process
    write_lock: Mutex<()>,
}

impl JsonlEventSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }
}

impl EventSink for JsonlEventSink {
    fn emit(&self, record: &EventRecord) -> Result<(), WardenError> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|e| WardenError::io(parent, e))?;
        }
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| WardenError::io(&self.path, e))?;
        f.write_all(&line).map_err(|e| WardenError::io(&self.path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SupervisorEvent;
    use chrono::Utc;

    #[test]
    fn appends_one_object_per_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("supervisor.jsonl");
        let sink = JsonlEventSink::new(&path);

        for count in [1, 2] {
            sink.emit(&EventRecord::new(
                Utc::now(),
                SupervisorEvent::RunningClearedOnKill { count },
            ))
            .unwrap();
        }

        let raw = fs::read_to_string(&path).unwrap();
        let lines: Vec<serde_json::Value> = raw
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1]["type"], "running_cleared_on_kill");
        assert_eq!(lines[1]["count"], 2);
        assert!(lines[0]["ts"].is_string());
    }
}
