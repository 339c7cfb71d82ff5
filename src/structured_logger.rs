//! Structured JSONL journal for workflow instances.
//!
//! Every command applied to the state machine and every event it emits is
//! appended as one JSON line, giving an auditable record that survives
//! process restarts alongside the instance document itself. Entries carry
//! a monotonic sequence number and a microsecond ISO 8601 timestamp.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

use crate::state_machine::{StateCommand, StateEvent};

/// Append-only JSONL journal for one workflow instance.
pub struct StructuredLogger {
    instance_id: String,
    run_id: String,
    seq: AtomicU64,
    journal: Mutex<File>,
}

/// A single journal line.
#[derive(Serialize, Deserialize)]
pub struct JournalEntry {
    /// Monotonic sequence number within this process.
    pub seq: u64,
    /// ISO 8601 timestamp with microseconds.
    pub ts: String,
    /// The workflow instance this entry belongs to.
    pub instance_id: String,
    /// Correlates entries written by the same process run.
    pub run_id: String,
    /// Component that emitted the entry.
    pub component: String,
    /// Structured payload.
    pub event: Value,
}

impl StructuredLogger {
    /// Opens (or creates) the journal for an instance at
    /// `<logs_dir>/<instance-id>.events.jsonl`.
    ///
    /// # Errors
    ///
    /// Returns an error if the logs directory cannot be created or the
    /// journal file cannot be opened.
    pub fn new(instance_id: &str, logs_dir: &Path) -> anyhow::Result<Self> {
        std::fs::create_dir_all(logs_dir)?;
        let path = logs_dir.join(format!("{}.events.jsonl", instance_id));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        Ok(Self {
            instance_id: instance_id.to_string(),
            run_id: Uuid::new_v4().to_string(),
            seq: AtomicU64::new(0),
            journal: Mutex::new(file),
        })
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Appends a structured entry. Thread-safe; journal write failures are
    /// swallowed so logging can never fail a workflow mutation.
    pub fn log(&self, component: &str, event: impl Serialize) {
        let entry = JournalEntry {
            seq: self.next_seq(),
            ts: Utc::now().format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string(),
            instance_id: self.instance_id.clone(),
            run_id: self.run_id.clone(),
            component: component.to_string(),
            event: serde_json::to_value(event).unwrap_or(Value::Null),
        };

        if let Ok(mut file) = self.journal.lock() {
            if let Ok(line) = serde_json::to_string(&entry) {
                let _ = writeln!(file, "{}", line);
                let _ = file.flush();
            }
        }
    }

    /// Journals a state-machine command before it is applied.
    pub fn log_command(&self, machine_seq: u64, command: &StateCommand) {
        self.log(
            "StateMachine",
            serde_json::json!({
                "kind": "command",
                "machine_seq": machine_seq,
                "command": command,
            }),
        );
    }

    /// Journals an event emitted by an applied command.
    pub fn log_event(&self, machine_seq: u64, event: &StateEvent) {
        self.log(
            "StateMachine",
            serde_json::json!({
                "kind": "event",
                "machine_seq": machine_seq,
                "event": event,
            }),
        );
    }
}
