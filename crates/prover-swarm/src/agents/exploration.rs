//! Exploration role: propose intermediate questions, delegate each to a
//! worker, then distill the answers into knowledge-base entries.
//!
//! Runs in two phases across a re-entry: phase 1 proposes questions and fans
//! out workers, phase 2 (after the join) writes Q/A entries to the KB.

use std::sync::LazyLock;

use regex::Regex;
use schemars::schema_for;
use serde_json::json;
use tracing::debug;

use crate::agents::{tools, AgentContext};
use crate::config::ConfigError;
use crate::graph::{AgentKind, AgentNode, AgentOutput, Goal, SpawnRequest, TaskPayload};
use crate::schemas::{ExplorationQuestions, KbEntry, KbKind, Normalized};
use crate::text;

static QUESTION_BULLET_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:[-*]|\d+[.)])\s+(.+)$").expect("QUESTION_BULLET_RE regex should compile")
});

pub async fn run(node: &mut AgentNode, ctx: &mut AgentContext<'_>) -> anyhow::Result<AgentOutput> {
    let has_worker_results = node
        .inputs
        .local_context
        .iter()
        .any(|out| out.kind == AgentKind::Worker);
    if !has_worker_results {
        return propose_and_delegate(node, ctx).await;
    }

    let mut worker_outputs: Vec<&AgentOutput> = node
        .inputs
        .local_context
        .iter()
        .filter(|out| out.kind == AgentKind::Worker)
        .collect();
    worker_outputs.sort_by_key(|out| out.request_index.unwrap_or(usize::MAX));

    let questions = node
        .inputs
        .exploration_questions
        .clone()
        .or_else(|| {
            node.outputs
                .iter()
                .rev()
                .find_map(|out| out.normalized.as_questions().cloned())
        })
        .unwrap_or_default();
    Ok(harvest_answers(node, &questions, &worker_outputs))
}

/// Phase 1: ask the exploration LLM for questions, then spawn one worker per
/// question. Spawns are reversed so the first question executes first under
/// the LIFO scheduler.
async fn propose_and_delegate(
    node: &mut AgentNode,
    ctx: &mut AgentContext<'_>,
) -> anyhow::Result<AgentOutput> {
    let llm = ctx
        .config
        .exploration
        .llm
        .clone()
        .ok_or(ConfigError::MissingLlm {
            role: "exploration",
        })?;
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
    let request = crate::llm::ChatRequest::new(
        &ctx.config.exploration.formatted_system_prompt(),
        &user_prompt,
    )
    .with_tools(tools::tool_defs());
    let response = super::chat_with_trace(ctx, &llm, node.id, request).await?;

    let (_, _, finish_text) = tools::parse_tool_calls(response.tool_calls());
    let content = finish_text
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| response.content_text());

    let max_questions = ctx.config.exploration.max_questions;
    let questions = match structured_questions(ctx, node, &content, max_questions).await? {
        Some(questions) => questions,
        None => heuristic_questions(&content, &problem, max_questions),
    };
    node.inputs.exploration_questions = Some(questions.clone());

    let mut spawns: Vec<SpawnRequest> = questions
        .questions
        .iter()
        .enumerate()
        .map(|(index, question)| {
            SpawnRequest::linked(
                AgentKind::Worker,
                TaskPayload {
                    goal: Some(Goal::Explore),
                    parent_problem: Some(problem.clone()),
                    round: node.inputs.task.round,
                    request_index: Some(index),
                    ..TaskPayload::for_problem(question.clone())
                },
            )
        })
        .collect();
    spawns.reverse();

    debug!(
        node_id = node.id,
        questions = questions.questions.len(),
        "exploration delegating questions"
    );
    Ok(
        AgentOutput::new(node.kind, content, Normalized::Questions(questions))
            .with_spawns(spawns),
    )
}

async fn structured_questions(
    ctx: &mut AgentContext<'_>,
    node: &AgentNode,
    content: &str,
    max_questions: usize,
) -> anyhow::Result<Option<ExplorationQuestions>> {
    let schema = json!(schema_for!(ExplorationQuestions));
    let Some(value) =
        super::parser::llm_parse(ctx, node.id, "exploration_questions", content, &schema).await?
    else {
        return Ok(None);
    };
    let Ok(parsed) = serde_json::from_value::<ExplorationQuestions>(value) else {
        return Ok(None);
    };

    let questions: Vec<String> = parsed
        .questions
        .into_iter()
        .map(|question| question.trim().to_string())
        .filter(|question| !question.is_empty())
        .take(max_questions)
        .collect();
    if questions.is_empty() {
        return Ok(None);
    }
    let rationales_md = pad_rationales(&questions, parsed.rationales_md);
    Ok(Some(ExplorationQuestions {
        questions,
        rationales_md,
    }))
}

/// Bullet lines first, then lines ending in `?`, then the whole reply.
fn heuristic_questions(content: &str, problem: &str, max_questions: usize) -> ExplorationQuestions {
    let mut questions: Vec<String> = content
        .lines()
        .filter_map(|line| {
            QUESTION_BULLET_RE
                .captures(line)
                .and_then(|captures| captures.get(1))
                .map(|m| m.as_str().trim().to_string())
        })
        .take(max_questions)
        .collect();

    if questions.is_empty() {
        questions = content
            .lines()
            .map(str::trim)
            .filter(|line| line.ends_with('?'))
            .map(str::to_string)
            .take(max_questions)
            .collect();
    }
    if questions.is_empty() {
        let fallback = content.trim();
        questions = vec![if fallback.is_empty() {
            problem.to_string()
        } else {
            fallback.to_string()
        }];
    }

    let rationales_md = pad_rationales(&questions, Vec::new());
    ExplorationQuestions {
        questions,
        rationales_md,
    }
}

fn pad_rationales(questions: &[String], mut rationales: Vec<String>) -> Vec<String> {
    rationales.truncate(questions.len());
    for question in questions.iter().skip(rationales.len()) {
        rationales.push(format!("Rationale for: {question}"));
    }
    rationales
}

/// Phase 2: pair each question with its worker's answer positionally and
/// write one Q/A entry per question.
fn harvest_answers(
    node: &AgentNode,
    questions: &ExplorationQuestions,
    worker_outputs: &[&AgentOutput],
) -> AgentOutput {
    let mut entries: Vec<KbEntry> = Vec::new();
    for (index, question) in questions.questions.iter().enumerate() {
        let rationale = questions
            .rationales_md
            .get(index)
            .map(String::as_str)
            .unwrap_or("");
        let answer = worker_outputs
            .get(index)
            .map(|out| worker_answer_snippet(out))
            .unwrap_or_else(|| "No worker response was produced.".to_string());

        let ordinal = index + 1;
        entries.push(KbEntry {
            id: format!("Exploration {}.{}", node.id, ordinal),
            kind: KbKind::Result,
            title: format!("Exploration Q{ordinal}: {}", text::clip(question, 120)),
            content_md: format!(
                "**Question {ordinal}:** {question}\n**Rationale:** {rationale}\n**Answer:**\n{answer}"
            ),
            tags: vec!["exploration".to_string()],
            sources: vec![format!("agent-{}", node.id)],
        });
    }

    // Workers beyond the question list still carry usable results.
    for (extra, out) in worker_outputs
        .iter()
        .enumerate()
        .skip(questions.questions.len())
    {
        let ordinal = extra + 1;
        entries.push(KbEntry {
            id: format!("Exploration {}.{}", node.id, ordinal),
            kind: KbKind::Result,
            title: "Additional worker result".to_string(),
            content_md: worker_answer_snippet(out),
            tags: vec!["exploration".to_string()],
            sources: vec![format!("agent-{}", node.id)],
        });
    }

    AgentOutput::new(
        node.kind,
        "exploration complete",
        Normalized::Questions(questions.clone()),
    )
    .with_kb_writes(text::prepare_kb_entries(entries))
}

fn worker_answer_snippet(out: &AgentOutput) -> String {
    let snippet = match out.normalized.as_attempt() {
        Some(attempt) => {
            text::extract_result_snippet(&attempt.final_answer_md, text::DEFAULT_MAX_TEXT_CHARS)
        }
        None => text::extract_result_snippet(&out.raw_text, text::DEFAULT_MAX_TEXT_CHARS),
    };
    if snippet.is_empty() {
        "No worker response was produced.".to_string()
    } else {
        snippet
    }
}
