//! Function-tool surface exposed to tool-capable roles (prover, exploration).
//!
//! Three tools: `spawn_agent` to delegate a subtask, `kb_write` to propose
//! knowledge entries, and `finish` to deliver the final text. Argument
//! parsing is permissive; a call with unusable arguments is skipped rather
//! than failing the execution.

use schemars::{schema_for, JsonSchema};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::graph::{AgentKind, SpawnRequest, TaskPayload};
use crate::llm::ToolCall;
use crate::schemas::{KbEntry, KbKind};

pub const SPAWN_AGENT_TOOL: &str = "spawn_agent";
pub const KB_WRITE_TOOL: &str = "kb_write";
pub const FINISH_TOOL: &str = "finish";

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SpawnAgentArgs {
    /// Role of the agent to spawn.
    pub agent_type: AgentKind,
    pub task: TaskPayload,
    /// Whether the spawned agent reports back to the caller.
    #[serde(default = "default_true")]
    pub edge_from_parent: bool,
}

fn default_true() -> bool {
    true
}

/// Loose KB entry shape tolerated from models: every field optional, kind as
/// free text.
#[derive(Debug, Default, Deserialize, JsonSchema)]
#[serde(default)]
pub struct KbEntryArgs {
    pub id: String,
    pub kind: String,
    pub title: String,
    pub content_md: String,
    pub tags: Vec<String>,
    pub sources: Vec<String>,
}

impl KbEntryArgs {
    pub fn into_entry(self) -> KbEntry {
        let id = if self.id.trim().is_empty() {
            "Result".to_string()
        } else {
            self.id
        };
        let title = if self.title.trim().is_empty() {
            "Untitled".to_string()
        } else {
            self.title
        };
        KbEntry {
            id,
            kind: KbKind::parse_lossy(&self.kind),
            title,
            content_md: self.content_md,
            tags: self.tags,
            sources: self.sources,
        }
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct KbWriteArgs {
    pub entries: Vec<KbEntryArgs>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct FinishArgs {
    /// Final Markdown output of this agent.
    pub output_text: String,
}

fn function_def(name: &str, description: &str, parameters: Value) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": name,
            "description": description,
            "parameters": parameters,
        }
    })
}

/// OpenAI-style definitions for all three tools.
pub fn tool_defs() -> Vec<Value> {
    vec![
        function_def(
            SPAWN_AGENT_TOOL,
            "Delegate a subtask to a new agent of the given type.",
            json!(schema_for!(SpawnAgentArgs)),
        ),
        function_def(
            KB_WRITE_TOOL,
            "Propose entries for the shared knowledge base.",
            json!(schema_for!(KbWriteArgs)),
        ),
        function_def(
            FINISH_TOOL,
            "Deliver the final output of this agent and stop.",
            json!(schema_for!(FinishArgs)),
        ),
    ]
}

/// Decode a batch of tool calls into spawn requests, KB entries, and the
/// finish text (last `finish` call wins). Unparseable arguments are logged
/// and dropped.
pub fn parse_tool_calls(calls: &[ToolCall]) -> (Vec<SpawnRequest>, Vec<KbEntry>, Option<String>) {
    let mut spawns = Vec::new();
    let mut kb_entries = Vec::new();
    let mut finish_text = None;

    for call in calls {
        let name = call.function.name.as_str();
        let arguments = call.function.arguments.as_str();
        match name {
            SPAWN_AGENT_TOOL => match serde_json::from_str::<SpawnAgentArgs>(arguments) {
                Ok(args) => spawns.push(SpawnRequest {
                    kind: args.agent_type,
                    task: args.task,
                    edge_from_parent: args.edge_from_parent,
                }),
                Err(error) => debug!(tool = name, %error, "skipping malformed tool call"),
            },
            KB_WRITE_TOOL => match serde_json::from_str::<KbWriteArgs>(arguments) {
                Ok(args) => {
                    kb_entries.extend(args.entries.into_iter().map(KbEntryArgs::into_entry));
                }
                Err(error) => debug!(tool = name, %error, "skipping malformed tool call"),
            },
            FINISH_TOOL => match serde_json::from_str::<FinishArgs>(arguments) {
                Ok(args) => finish_text = Some(args.output_text),
                Err(error) => debug!(tool = name, %error, "skipping malformed tool call"),
            },
            _ => debug!(tool = name, "ignoring unknown tool call"),
        }
    }

    (spawns, kb_entries, finish_text)
}
