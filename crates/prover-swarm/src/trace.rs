//! Append-only JSONL run telemetry.
//!
//! Every event carries a UTC timestamp and an `event` discriminator. Sink
//! failures are logged and swallowed so a broken trace file never aborts a
//! run.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

use serde_json::{json, Value};
use tracing::warn;

use crate::graph::{AgentKind, NodeId, NodeStatus};

/// JSONL trace sink. With no path configured all methods are no-ops.
pub struct TraceLogger {
    sink: Option<BufWriter<File>>,
}

impl TraceLogger {
    /// Open (append) the trace file, creating parent directories as needed.
    /// Open failures disable tracing for the run rather than failing it.
    pub fn new(path: Option<&Path>) -> Self {
        let sink = path.and_then(|path| {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    if let Err(error) = std::fs::create_dir_all(parent) {
                        warn!(path = %path.display(), %error, "trace directory creation failed");
                        return None;
                    }
                }
            }
            match OpenOptions::new().create(true).append(true).open(path) {
                Ok(file) => Some(BufWriter::new(file)),
                Err(error) => {
                    warn!(path = %path.display(), %error, "trace file open failed");
                    None
                }
            }
        });
        Self { sink }
    }

    pub fn disabled() -> Self {
        Self { sink: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.sink.is_some()
    }

    fn write_event(&mut self, mut event: Value) {
        let Some(sink) = self.sink.as_mut() else {
            return;
        };
        event["timestamp"] = json!(chrono::Utc::now().to_rfc3339());
        let result = writeln!(sink, "{event}").and_then(|_| sink.flush());
        if let Err(error) = result {
            warn!(%error, "trace write failed, disabling trace sink");
            self.sink = None;
        }
    }

    pub fn run_start(&mut self, config_name: &str, problem: &str) {
        self.write_event(json!({
            "event": "run_start",
            "config": config_name,
            "problem": problem,
        }));
    }

    pub fn run_end(&mut self, completed: bool, steps_used: u32) {
        self.write_event(json!({
            "event": "run_end",
            "completed": completed,
            "steps_used": steps_used,
        }));
    }

    pub fn agent_event(&mut self, id: NodeId, kind: AgentKind, status: NodeStatus) {
        self.write_event(json!({
            "event": "agent",
            "node_id": id,
            "kind": kind,
            "status": status,
        }));
    }

    pub fn llm_request(&mut self, id: NodeId, model: &str, request: &Value) {
        self.write_event(json!({
            "event": "llm_request",
            "node_id": id,
            "model": model,
            "request": request,
        }));
    }

    pub fn llm_response(&mut self, id: NodeId, model: &str, response: &Value) {
        self.write_event(json!({
            "event": "llm_response",
            "node_id": id,
            "model": model,
            "response": response,
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_logger_is_inert() {
        let mut trace = TraceLogger::disabled();
        assert!(!trace.is_enabled());
        trace.run_start("default", "p");
        trace.run_end(true, 1);
    }

    #[test]
    fn events_land_as_jsonl_with_timestamps() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("trace.jsonl");

        let mut trace = TraceLogger::new(Some(&path));
        assert!(trace.is_enabled());
        trace.run_start("direct", "Prove 1 + 1 = 2.");
        trace.agent_event(1, AgentKind::Orchestrator, NodeStatus::Running);
        trace.run_end(true, 3);
        drop(trace);

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);

        let events: Vec<Value> = lines
            .iter()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(events[0]["event"], "run_start");
        assert_eq!(events[1]["event"], "agent");
        assert_eq!(events[1]["node_id"], 1);
        assert_eq!(events[2]["event"], "run_end");
        for event in &events {
            assert!(event["timestamp"].is_string());
        }
    }

    #[test]
    fn appends_across_reopens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.jsonl");

        TraceLogger::new(Some(&path)).run_start("default", "a");
        TraceLogger::new(Some(&path)).run_start("default", "b");

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
    }
}
