//! Verifier role: ensemble majority vote over a batch of solution attempts.
//!
//! Each attempt receives `min(ensemble_size, #verifier LLMs)` ballots. An
//! attempt is accepted only on a strict majority of accept votes; ties in
//! score break toward the earliest attempt.

use std::cmp::Reverse;
use std::sync::LazyLock;

use futures::future::join_all;
use regex::Regex;
use serde_json::json;
use tracing::info;

use crate::agents::AgentContext;
use crate::config::ConfigError;
use crate::graph::{AgentKind, AgentNode, AgentOutput};
use crate::llm::ChatRequest;
use crate::schemas::{Normalized, SolutionAttempt, VerificationReport};

pub const DEFAULT_REJECTION_FEEDBACK: &str = "Deterministic verifier majority rule.";

static VERDICT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)verdict\s*:\s*(correct|incorrect)").expect("VERDICT_RE regex should compile")
});
static REASON_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)reason\s*:\s*(.*)").expect("REASON_RE regex should compile"));

pub async fn run(node: &mut AgentNode, ctx: &mut AgentContext<'_>) -> anyhow::Result<AgentOutput> {
    let attempts = collect_attempts(node);
    if ctx.config.verifier.llms.is_empty() {
        return Err(ConfigError::MissingLlm { role: "verifier" }.into());
    }
    let ballots = ctx
        .config
        .verifier
        .ensemble_size
        .max(1)
        .min(ctx.config.verifier.llms.len());

    let mut scores: Vec<u32> = Vec::with_capacity(attempts.len());
    let mut critiques: Vec<String> = Vec::with_capacity(attempts.len());
    for (index, attempt) in attempts.iter().enumerate() {
        let (score, critique) = vote_on_attempt(node, ctx, index, attempt, ballots).await?;
        scores.push(score);
        critiques.push(critique);
    }

    let (best_attempt_index, accepted) = decide(&scores, ballots);
    let global_feedback_md = if accepted {
        String::new()
    } else {
        best_attempt_index
            .map(|index| critiques[index].trim().to_string())
            .filter(|critique| !critique.is_empty())
            .unwrap_or_else(|| DEFAULT_REJECTION_FEEDBACK.to_string())
    };

    info!(
        node_id = node.id,
        attempts = attempts.len(),
        ballots,
        accepted,
        best = ?best_attempt_index,
        "verifier vote complete"
    );

    let report = VerificationReport {
        accepted,
        best_attempt_index,
        attempt_scores: scores,
        attempt_critiques_md: critiques,
        global_feedback_md,
    };
    let raw = if report.accepted { "accepted" } else { "rejected" };
    Ok(AgentOutput::new(node.kind, raw, Normalized::Report(report)))
}

/// Attempts handed over in the spawning task, falling back to prover outputs
/// accumulated in the local context.
fn collect_attempts(node: &AgentNode) -> Vec<SolutionAttempt> {
    if !node.inputs.task.attempts.is_empty() {
        return node.inputs.task.attempts.clone();
    }
    node.inputs
        .local_context
        .iter()
        .filter(|out| out.kind == AgentKind::Prover)
        .filter_map(|out| out.normalized.as_attempt().cloned())
        .collect()
}

/// Cast `ballots` concurrent votes on one attempt. Returns the accept count
/// and the concatenated critiques from rejecting voters.
async fn vote_on_attempt(
    node: &AgentNode,
    ctx: &mut AgentContext<'_>,
    attempt_index: usize,
    attempt: &SolutionAttempt,
    ballots: usize,
) -> anyhow::Result<(u32, String)> {
    let user_prompt = format!(
        "Problem:\n{}\n\nContext hierarchy:\n{}\n\nKnowledge base:\n{}\n\n\
         Solution attempt {}:\n{}",
        node.inputs.task.problem,
        node.inputs.context_hierarchy_md,
        ctx.kb.render_prompt_md(),
        attempt_index + 1,
        attempt.final_answer_md,
    );

    // Build every client up front, then gather the ballots concurrently.
    // Tracing happens afterwards so the trace sink needs no locking.
    let mut clients = Vec::with_capacity(ballots);
    for llm in ctx.config.verifier.llms.iter().take(ballots) {
        clients.push(ctx.clients.client_for(llm)?);
    }
    let futures = clients.iter().map(|client| {
        let request = ChatRequest::new(&ctx.config.verifier.system_prompt, &user_prompt);
        async move {
            let result = client.chat(request.clone()).await;
            (client.model().to_string(), request, result)
        }
    });
    let outcomes = join_all(futures).await;

    let mut score = 0u32;
    let mut critiques: Vec<String> = Vec::new();
    for (model, request, result) in outcomes {
        ctx.trace.llm_request(node.id, &model, &json!(&request));
        let response = result?;
        ctx.trace.llm_response(node.id, &model, &json!(&response));

        let (verdict, reason) = parse_vote(&response.content_text());
        if verdict == Some(true) {
            score += 1;
        } else if !reason.is_empty() {
            critiques.push(reason);
        }
    }
    Ok((score, critiques.join("\n\n")))
}

/// Extract `(verdict, reason)` from a voter's reply. An indeterminate
/// verdict counts as a rejection.
pub fn parse_vote(text: &str) -> (Option<bool>, String) {
    let verdict = VERDICT_RE
        .captures(text)
        .and_then(|captures| captures.get(1))
        .map(|m| m.as_str().eq_ignore_ascii_case("correct"));
    let reason = REASON_RE
        .captures(text)
        .and_then(|captures| captures.get(1))
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_default();
    (verdict, reason)
}

/// Majority decision over per-attempt accept counts. The best attempt is the
/// highest score, ties broken toward the lowest index; acceptance requires
/// `2 * best_score > ballots`.
pub fn decide(scores: &[u32], ballots: usize) -> (Option<usize>, bool) {
    let best = scores
        .iter()
        .enumerate()
        .max_by_key(|(index, score)| (**score, Reverse(*index)));
    match best {
        Some((index, score)) => (Some(index), 2 * (*score as usize) > ballots),
        None => (None, false),
    }
}
