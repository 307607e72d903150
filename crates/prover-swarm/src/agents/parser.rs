//! Parser role: free text in, best-effort structured JSON out.
//!
//! Other roles call [`llm_parse`] inline as a normalization fallback; the
//! standalone node form exists for detached parses requested via tools.

use anyhow::Context as _;
use serde_json::{json, Value};
use tracing::debug;

use crate::agents::AgentContext;
use crate::config::ConfigError;
use crate::graph::{AgentNode, AgentOutput, NodeId};
use crate::llm::ChatRequest;
use crate::schemas::Normalized;

/// Ask the parser LLM to render `text` as JSON matching `schema`. Returns
/// `Ok(None)` when the model's reply is not valid JSON; transport failures
/// bubble up.
pub async fn llm_parse(
    ctx: &mut AgentContext<'_>,
    node_id: NodeId,
    target: &str,
    text: &str,
    schema: &Value,
) -> anyhow::Result<Option<Value>> {
    let llm = ctx
        .config
        .parser
        .llm
        .clone()
        .ok_or(ConfigError::MissingLlm { role: "parser" })?;

    let user_prompt = format!(
        "JSON Schema:\n{}\n\nMarkdown input:\n```\n{}\n```",
        serde_json::to_string_pretty(schema).unwrap_or_else(|_| schema.to_string()),
        text
    );
    let request =
        ChatRequest::new(&ctx.config.parser.system_prompt, &user_prompt).with_json_response();
    let response = super::chat_with_trace(ctx, &llm, node_id, request)
        .await
        .with_context(|| format!("parser call failed for target '{target}'"))?;

    let content = response.content_text();
    match serde_json::from_str::<Value>(content.trim()) {
        Ok(value) => Ok(Some(value)),
        Err(error) => {
            debug!(target, %error, "parser reply was not valid JSON");
            Ok(None)
        }
    }
}

/// Standalone parser node: parses `task.text` against `task.schema`.
pub async fn run(node: &mut AgentNode, ctx: &mut AgentContext<'_>) -> anyhow::Result<AgentOutput> {
    let task = &node.inputs.task;
    let target = task.target.clone().unwrap_or_else(|| "value".to_string());
    let text = task.text.clone().unwrap_or_default();
    let schema = task.schema.clone().unwrap_or_else(|| json!({}));

    match llm_parse(ctx, node.id, &target, &text, &schema).await? {
        Some(value) => Ok(AgentOutput::new(
            node.kind,
            value.to_string(),
            Normalized::Parsed(value),
        )),
        None => Ok(AgentOutput::new(
            node.kind,
            text.clone(),
            Normalized::Text(text),
        )),
    }
}
