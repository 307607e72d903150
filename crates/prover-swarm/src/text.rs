//! Text normalization heuristics shared by the KB and the agent roles.
//!
//! Model output is Markdown-ish and unreliable; everything here is
//! best-effort cleanup that must never fail.

use std::sync::LazyLock;

use regex::Regex;

use crate::graph::AgentOutput;
use crate::schemas::{KbEntry, KbKind, Normalized};

/// Hard cap applied to any stored text block.
pub const DEFAULT_MAX_TEXT_CHARS: usize = 1_000_000;
/// How many local-context items are rendered into a prompt.
pub const DEFAULT_LOCAL_CONTEXT_LIMIT: usize = 8;
/// Per-item snippet length in local-context renderings.
pub const LOCAL_CONTEXT_SNIPPET_CHARS: usize = 240;

static MULTI_BLANK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{3,}").expect("MULTI_BLANK_RE regex should compile"));
static FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^```[\w+-]*\n(.*)\n```$").expect("FENCE_RE regex should compile")
});
static OUTPUT_TYPE_PREFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^output\s*type\s*:").expect("prefix regex should compile"));
static SOLUTION_PREFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^solution\s*:").expect("prefix regex should compile"));
static PARAGRAPH_SPLIT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n\s*\n").expect("paragraph regex should compile"));

/// Trim and truncate to at most `max_chars` characters, appending `…` when
/// anything was cut. Operates on characters, not bytes.
pub fn clip(text: &str, max_chars: usize) -> String {
    let cleaned = text.trim();
    if cleaned.chars().count() <= max_chars {
        return cleaned.to_string();
    }
    let mut head: String = cleaned.chars().take(max_chars.saturating_sub(1)).collect();
    head.truncate(head.trim_end().len());
    head.push('…');
    head
}

/// Collapse runs of blank lines and cap the overall length.
pub fn normalize_text_block(text: &str, max_chars: usize) -> String {
    let cleaned = MULTI_BLANK_RE.replace_all(text.trim(), "\n\n");
    clip(&cleaned, max_chars)
}

/// Strip common scaffolding from a prover's raw Markdown: an outer code
/// fence, and leading `Output type:` / `Solution:` header lines.
pub fn clean_solution_text(text: &str) -> String {
    let stripped = text.trim();
    let body = match FENCE_RE.captures(stripped) {
        Some(captures) => captures.get(1).map(|m| m.as_str()).unwrap_or(stripped),
        None => stripped,
    };

    let mut cleaned_lines: Vec<&str> = Vec::new();
    let mut skipping_prefix = true;
    for line in body.lines() {
        let normalized = line.trim();
        if skipping_prefix {
            if normalized.is_empty()
                || OUTPUT_TYPE_PREFIX_RE.is_match(normalized)
                || SOLUTION_PREFIX_RE.is_match(normalized)
            {
                continue;
            }
            skipping_prefix = false;
        }
        cleaned_lines.push(line.trim_end());
    }

    let cleaned = cleaned_lines.join("\n");
    MULTI_BLANK_RE
        .replace_all(cleaned.trim(), "\n\n")
        .into_owned()
}

/// True when the paragraph is a standalone display-math block.
pub fn looks_like_display_math(paragraph: &str) -> bool {
    let stripped = paragraph.trim();
    !stripped.is_empty()
        && ((stripped.starts_with("\\[") && stripped.ends_with("\\]"))
            || (stripped.starts_with("$$") && stripped.ends_with("$$")))
}

/// Extract a succinct result statement from a longer solution: the trailing
/// paragraph, pulling in the preceding one when the tail is bare math.
pub fn extract_result_snippet(text: &str, max_chars: usize) -> String {
    let cleaned = clean_solution_text(text);
    if cleaned.is_empty() {
        return String::new();
    }

    let paragraphs: Vec<&str> = PARAGRAPH_SPLIT_RE
        .split(&cleaned)
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect();

    let snippet = match paragraphs.as_slice() {
        [] => cleaned.trim().to_string(),
        [.., prev, last] if looks_like_display_math(last) => format!("{prev}\n{last}"),
        [.., last] => (*last).to_string(),
    };
    clip(&snippet, max_chars)
}

/// Derive a one-line title from a solution snippet, falling back when the
/// snippet is empty.
pub fn derive_result_title(text: &str, fallback: &str, title_chars: usize) -> String {
    let snippet = extract_result_snippet(text, DEFAULT_MAX_TEXT_CHARS);
    let first_line = snippet.lines().next().map(str::trim).unwrap_or("");
    let title = if first_line.is_empty() {
        fallback
    } else {
        first_line
    };
    clip(title, title_chars)
}

/// Create a `Result` KB entry with a deterministic per-node id.
pub fn make_kb_entry(node_id: u64, title: &str, content: &str) -> KbEntry {
    KbEntry {
        id: format!("Result {node_id}"),
        kind: KbKind::Result,
        title: derive_result_title(content, title, DEFAULT_MAX_TEXT_CHARS),
        content_md: extract_result_snippet(content, DEFAULT_MAX_TEXT_CHARS),
        tags: Vec::new(),
        sources: vec![format!("agent-{node_id}")],
    }
}

/// Clean incoming KB entries so they are ready for insertion: result entries
/// are reduced to their statement snippet, everything else just gets the
/// scaffolding stripped.
pub fn prepare_kb_entries(entries: Vec<KbEntry>) -> Vec<KbEntry> {
    entries
        .into_iter()
        .map(|entry| {
            let content = match entry.kind {
                KbKind::Result => extract_result_snippet(&entry.content_md, DEFAULT_MAX_TEXT_CHARS),
                _ => clip(&clean_solution_text(&entry.content_md), DEFAULT_MAX_TEXT_CHARS),
            };
            KbEntry {
                id: entry.id.trim().to_string(),
                kind: entry.kind,
                title: entry.title.trim().to_string(),
                content_md: MULTI_BLANK_RE.replace_all(&content, "\n\n").into_owned(),
                tags: entry.tags,
                sources: entry.sources,
            }
        })
        .collect()
}

/// Render a node's recent local context into compact Markdown bullets, one
/// line per item, dispatching on the normalized variant.
pub fn format_local_context(local_context: &[AgentOutput]) -> String {
    if local_context.is_empty() {
        return String::new();
    }

    let start = local_context
        .len()
        .saturating_sub(DEFAULT_LOCAL_CONTEXT_LIMIT);
    let mut parts: Vec<String> = Vec::new();
    for out in &local_context[start..] {
        let snippet = match &out.normalized {
            Normalized::Attempt(attempt) => {
                clip(&attempt.final_answer_md, LOCAL_CONTEXT_SNIPPET_CHARS)
            }
            Normalized::Report(report) => {
                let verdict = if report.accepted { "accepted" } else { "rejected" };
                format!("verdict={verdict}")
            }
            Normalized::WorkerStatus(status) => format!(
                "phase={}, round={}, provers_spawned={}",
                status.phase, status.round_index, status.provers_spawned
            ),
            Normalized::OrchestratorStatus(status) => format!(
                "phase={}, message={}",
                status.phase,
                clip(&status.message, LOCAL_CONTEXT_SNIPPET_CHARS)
            ),
            Normalized::Questions(questions) => {
                if questions.questions.is_empty() {
                    "no questions".to_string()
                } else {
                    format!("{} questions", questions.questions.len())
                }
            }
            Normalized::Parsed(_) | Normalized::Text(_) => {
                clip(&out.raw_text, DEFAULT_MAX_TEXT_CHARS)
            }
        };
        parts.push(format!("- **{}**: {snippet}", out.kind));
    }
    parts.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::AgentKind;
    use crate::schemas::SolutionAttempt;

    #[test]
    fn clip_appends_ellipsis_when_truncating() {
        assert_eq!(clip("short", 10), "short");
        let clipped = clip("a very long line of text", 10);
        assert!(clipped.ends_with('…'));
        assert!(clipped.chars().count() <= 10);
    }

    #[test]
    fn clips_on_char_boundaries() {
        let clipped = clip("αβγδεζηθικλ", 5);
        assert!(clipped.chars().count() <= 5);
    }

    #[test]
    fn clean_strips_fence_and_headers() {
        let raw = "```\nOutput type: Solution\n\nSolution:\nThe claim holds.\n```";
        assert_eq!(clean_solution_text(raw), "The claim holds.");
    }

    #[test]
    fn clean_collapses_blank_runs() {
        let cleaned = clean_solution_text("First.\n\n\n\nSecond.");
        assert_eq!(cleaned, "First.\n\nSecond.");
    }

    #[test]
    fn snippet_takes_trailing_paragraph() {
        let text = "Setup paragraph.\n\nTherefore the result follows.";
        assert_eq!(
            extract_result_snippet(text, 1000),
            "Therefore the result follows."
        );
    }

    #[test]
    fn snippet_keeps_math_block_with_its_lead_in() {
        let text = "Intro.\n\nHence we conclude:\n\n$$1 + 1 = 2$$";
        let snippet = extract_result_snippet(text, 1000);
        assert_eq!(snippet, "Hence we conclude:\n$$1 + 1 = 2$$");
    }

    #[test]
    fn make_kb_entry_is_deterministic() {
        let entry = make_kb_entry(7, "Fallback", "Output type: Solution\n\nSolution:\nDone.");
        assert_eq!(entry.id, "Result 7");
        assert_eq!(entry.kind, KbKind::Result);
        assert_eq!(entry.content_md, "Done.");
        assert_eq!(entry.sources, vec!["agent-7".to_string()]);
    }

    #[test]
    fn local_context_renders_each_variant() {
        let context = vec![
            AgentOutput::new(
                AgentKind::Prover,
                "raw",
                Normalized::Attempt(SolutionAttempt::answer("An answer.")),
            ),
            AgentOutput::new(
                AgentKind::Verifier,
                "rejected",
                Normalized::Report(crate::schemas::VerificationReport {
                    accepted: false,
                    best_attempt_index: Some(0),
                    attempt_scores: vec![0],
                    attempt_critiques_md: vec![String::new()],
                    global_feedback_md: String::new(),
                }),
            ),
        ];
        let rendered = format_local_context(&context);
        assert!(rendered.contains("- **prover**: An answer."));
        assert!(rendered.contains("- **verifier**: verdict=rejected"));
    }

    #[test]
    fn local_context_window_is_bounded() {
        let context: Vec<AgentOutput> = (0..20)
            .map(|i| {
                AgentOutput::new(
                    AgentKind::Prover,
                    format!("raw {i}"),
                    Normalized::Attempt(SolutionAttempt::answer(format!("answer {i}"))),
                )
            })
            .collect();
        let rendered = format_local_context(&context);
        assert_eq!(rendered.lines().count(), DEFAULT_LOCAL_CONTEXT_LIMIT);
        assert!(rendered.contains("answer 19"));
        assert!(!rendered.contains("answer 11\n"));
    }
}
