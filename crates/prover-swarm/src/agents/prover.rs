//! Prover role: produce one structured solution attempt for a problem.
//!
//! The model replies with tool calls and/or free Markdown. Normalization is
//! a fallback chain: structured parse via the parser LLM first, then local
//! heuristics over the raw text, so an attempt is always produced.

use std::sync::LazyLock;

use regex::Regex;
use schemars::schema_for;
use serde::Deserialize;
use serde_json::json;

use crate::agents::tools::{self, KbEntryArgs};
use crate::agents::AgentContext;
use crate::config::ConfigError;
use crate::graph::{AgentNode, AgentOutput, NodeId};
use crate::llm::ChatRequest;
use crate::schemas::{KbEntry, Normalized, SolutionAttempt};
use crate::text;

/// KB summaries are meant for prompts, so they stay short.
pub const KB_SUMMARY_TITLE_CHARS: usize = 120;
pub const KB_SUMMARY_STATEMENT_CHARS: usize = 320;

static OUTPUT_TYPE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)output\s*type\s*:\s*(plan|solution|error)")
        .expect("OUTPUT_TYPE_RE regex should compile")
});
static BULLET_LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:[-*]|\d+[.)])\s+(.+)$").expect("BULLET_LINE_RE regex should compile")
});

/// Loose solution shape tolerated from the parser LLM.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawSolution {
    final_answer_md: String,
    outline_steps: Vec<String>,
    kb_updates: Vec<KbEntryArgs>,
    claims_incorrect_conclusion: bool,
}

pub async fn run(node: &mut AgentNode, ctx: &mut AgentContext<'_>) -> anyhow::Result<AgentOutput> {
    let llm = ctx
        .config
        .prover
        .llm
        .clone()
        .ok_or(ConfigError::MissingLlm { role: "prover" })?;
    let problem = node.inputs.task.problem.clone();

    let mut user_prompt = format!(
        "Problem:\n{problem}\n\nContext hierarchy:\n{}\n\nKnowledge base:\n{}",
        node.inputs.context_hierarchy_md,
        ctx.kb.render_prompt_md(),
    );
    let local_context_md = text::format_local_context(&node.inputs.local_context);
    if !local_context_md.is_empty() {
        user_prompt.push_str(&format!("\n\nLocal context:\n{local_context_md}"));
    }
    if let Some(feedback) = node
        .inputs
        .task
        .feedback_md
        .as_deref()
        .filter(|f| !f.trim().is_empty())
    {
        user_prompt.push_str(&format!("\n\nVerifier feedback on prior attempts:\n{feedback}"));
    }

    let request = ChatRequest::new(&ctx.config.prover.system_prompt, &user_prompt)
        .with_tools(tools::tool_defs());
    let response = super::chat_with_trace(ctx, &llm, node.id, request).await?;

    let (spawns, tool_kb_entries, finish_text) = tools::parse_tool_calls(response.tool_calls());
    let content = response.content_text();
    let final_md = finish_text
        .filter(|t| !t.trim().is_empty())
        .or_else(|| Some(content.clone()).filter(|t| !t.trim().is_empty()))
        .unwrap_or_else(|| format!("Sketch solution for {problem}"));

    let mut attempt = match structured_parse(ctx, node.id, &final_md).await? {
        Some(attempt) => attempt,
        None => parse_solution_attempt(&final_md),
    };

    // Tool-proposed KB entries take precedence over entries embedded in the
    // attempt; with neither, fall back to a deterministic auto-entry.
    let kb_updates = if !tool_kb_entries.is_empty() {
        tool_kb_entries
    } else if !attempt.kb_updates.is_empty() {
        std::mem::take(&mut attempt.kb_updates)
    } else {
        vec![text::make_kb_entry(
            node.id,
            "Auto-generated fact",
            &attempt.final_answer_md,
        )]
    };
    attempt.kb_updates = summarize_kb_entries(ctx, node.id, kb_updates).await?;

    Ok(
        AgentOutput::new(node.kind, attempt.final_answer_md.clone(), Normalized::Attempt(attempt))
            .with_spawns(spawns),
    )
}

/// First rung of the fallback chain: structured parse through the parser LLM.
async fn structured_parse(
    ctx: &mut AgentContext<'_>,
    node_id: NodeId,
    text: &str,
) -> anyhow::Result<Option<SolutionAttempt>> {
    let schema = json!(schema_for!(SolutionAttempt));
    let Some(value) =
        super::parser::llm_parse(ctx, node_id, "solution_attempt", text, &schema).await?
    else {
        return Ok(None);
    };

    let Ok(raw) = serde_json::from_value::<RawSolution>(value) else {
        return Ok(None);
    };
    if raw.final_answer_md.trim().is_empty() {
        return Ok(None);
    }
    Ok(Some(SolutionAttempt {
        final_answer_md: text::clean_solution_text(&raw.final_answer_md),
        outline_steps: raw
            .outline_steps
            .into_iter()
            .map(|step| step.trim().to_string())
            .filter(|step| !step.is_empty())
            .collect(),
        kb_updates: raw
            .kb_updates
            .into_iter()
            .map(KbEntryArgs::into_entry)
            .collect(),
        claims_incorrect_conclusion: raw.claims_incorrect_conclusion,
    }))
}

/// Last rung: heuristics over raw Markdown. Plan replies become outlines,
/// error replies flag the conclusion as contested.
fn parse_solution_attempt(raw: &str) -> SolutionAttempt {
    let output_type = OUTPUT_TYPE_RE
        .captures(raw)
        .and_then(|captures| captures.get(1))
        .map(|m| m.as_str().to_lowercase())
        .unwrap_or_else(|| "solution".to_string());

    let mut attempt = SolutionAttempt::answer(text::clean_solution_text(raw));
    match output_type.as_str() {
        "plan" => {
            attempt.outline_steps = raw
                .lines()
                .filter_map(|line| {
                    BULLET_LINE_RE
                        .captures(line)
                        .and_then(|captures| captures.get(1))
                        .map(|m| m.as_str().trim().to_string())
                })
                .collect();
        }
        "error" => attempt.claims_incorrect_conclusion = true,
        _ => {}
    }
    attempt
}

/// Distill draft KB entries into succinct statements when a summarizer LLM
/// is configured.
async fn summarize_kb_entries(
    ctx: &mut AgentContext<'_>,
    node_id: NodeId,
    entries: Vec<KbEntry>,
) -> anyhow::Result<Vec<KbEntry>> {
    let Some(llm) = ctx.config.kb_summarizer.llm.clone() else {
        return Ok(entries);
    };

    let mut summarized = Vec::with_capacity(entries.len());
    for mut entry in entries {
        let user_prompt = format!(
            "Reply with a JSON object with keys \"title\" and \"statement_md\".\n\n\
             Draft entry:\n```\n{}\n```",
            entry.content_md
        );
        let request = ChatRequest::new(&ctx.config.kb_summarizer.system_prompt, &user_prompt)
            .with_json_response();
        let response = super::chat_with_trace(ctx, &llm, node_id, request).await?;

        if let Ok(value) = serde_json::from_str::<serde_json::Value>(response.content_text().trim())
        {
            let title = value["title"].as_str().unwrap_or_default().trim();
            let statement = value["statement_md"].as_str().unwrap_or_default().trim();
            if !title.is_empty() {
                entry.title = text::clip(title, KB_SUMMARY_TITLE_CHARS);
            }
            if !statement.is_empty() {
                entry.content_md = text::clip(statement, KB_SUMMARY_STATEMENT_CHARS);
            }
        }
        summarized.push(entry);
    }
    Ok(summarized)
}
