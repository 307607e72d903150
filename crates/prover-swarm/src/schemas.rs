//! Typed schemas for normalized agent outputs and knowledge-base entries.
//!
//! Every agent execution produces exactly one [`Normalized`] variant. The set
//! is closed so that consumption sites (context rendering, propagation, the
//! worker policy) can match exhaustively instead of inspecting raw text.

use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Kinds of knowledge-base entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum KbKind {
    Definition,
    Notation,
    Result,
    Algorithm,
    Example,
    Counterexample,
}

impl KbKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Definition => "Definition",
            Self::Notation => "Notation",
            Self::Result => "Result",
            Self::Algorithm => "Algorithm",
            Self::Example => "Example",
            Self::Counterexample => "Counterexample",
        }
    }

    /// Parse a kind name, falling back to `Result` for anything unrecognized.
    /// Model output is not trusted to spell enum values correctly.
    pub fn parse_lossy(value: &str) -> Self {
        match value.trim() {
            "Definition" => Self::Definition,
            "Notation" => Self::Notation,
            "Algorithm" => Self::Algorithm,
            "Example" => Self::Example,
            "Counterexample" => Self::Counterexample,
            _ => Self::Result,
        }
    }
}

impl fmt::Display for KbKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single knowledge-base entry. Entries are keyed by `id`; writing an
/// existing id overwrites the previous value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct KbEntry {
    pub id: String,
    pub kind: KbKind,
    pub title: String,
    pub content_md: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub sources: Vec<String>,
}

/// Structured solution produced by a prover.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct SolutionAttempt {
    pub final_answer_md: String,
    /// Plan steps when the prover chose to outline rather than solve.
    #[serde(default)]
    pub outline_steps: Vec<String>,
    /// KB entries the attempt proposes; applied only if the attempt is accepted.
    #[serde(default)]
    pub kb_updates: Vec<KbEntry>,
    /// True when the attempt argues the requested conclusion is false.
    #[serde(default)]
    pub claims_incorrect_conclusion: bool,
}

impl SolutionAttempt {
    /// Plain answer with no outline or KB proposals.
    pub fn answer(final_answer_md: impl Into<String>) -> Self {
        Self {
            final_answer_md: final_answer_md.into(),
            ..Self::default()
        }
    }
}

/// Verifier's judgment on a batch of prover attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub accepted: bool,
    /// Index into the voted attempt list; `None` when there were no attempts.
    pub best_attempt_index: Option<usize>,
    /// Accept-vote count per attempt, in attempt order.
    pub attempt_scores: Vec<u32>,
    pub attempt_critiques_md: Vec<String>,
    /// Free-text feedback carried into the next prover round.
    pub global_feedback_md: String,
}

/// Questions proposed during exploration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct ExplorationQuestions {
    pub questions: Vec<String>,
    #[serde(default)]
    pub rationales_md: Vec<String>,
}

/// Status update emitted by the orchestrator between phases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorStatus {
    /// High-level execution phase ("exploration", "solve").
    pub phase: String,
    /// Exploration round index when applicable (1-based).
    pub round_index: Option<usize>,
    pub message: String,
}

/// Status update emitted by a worker on a non-terminal execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerStatus {
    /// Current loop phase ("prover_generation", "verification", "decomposition").
    pub phase: String,
    /// Verification rounds completed so far.
    pub round_index: usize,
    pub provers_spawned: usize,
    pub verifier_spawned: bool,
    pub decomposition_triggered: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback_md: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Explicit phase record for a worker node, updated on every execution that
/// spawns children. The accumulated local context remains the bookkeeping
/// authority; the phase exists so re-entries never have to reverse-engineer
/// what the previous execution did from context-list shape alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum WorkerPhase {
    /// Provers for round `round` are in flight.
    Generation { round: usize },
    /// A verifier for round `round` has been spawned.
    Verification { round: usize },
    /// Decomposition sub-workers spawned after round `round` was rejected.
    Decomposition { round: usize },
}

/// Closed set of structured values an agent execution can produce.
#[derive(Debug, Clone, PartialEq)]
pub enum Normalized {
    Attempt(SolutionAttempt),
    Report(VerificationReport),
    Questions(ExplorationQuestions),
    OrchestratorStatus(OrchestratorStatus),
    WorkerStatus(WorkerStatus),
    /// Output of the parser role: best-effort structured JSON.
    Parsed(serde_json::Value),
    /// Fallback for raw, unstructured text.
    Text(String),
}

impl Normalized {
    pub fn as_attempt(&self) -> Option<&SolutionAttempt> {
        match self {
            Self::Attempt(attempt) => Some(attempt),
            _ => None,
        }
    }

    pub fn as_report(&self) -> Option<&VerificationReport> {
        match self {
            Self::Report(report) => Some(report),
            _ => None,
        }
    }

    pub fn as_questions(&self) -> Option<&ExplorationQuestions> {
        match self {
            Self::Questions(questions) => Some(questions),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kb_kind_parse_lossy_falls_back_to_result() {
        assert_eq!(KbKind::parse_lossy("Definition"), KbKind::Definition);
        assert_eq!(KbKind::parse_lossy("theorem"), KbKind::Result);
        assert_eq!(KbKind::parse_lossy(""), KbKind::Result);
    }

    #[test]
    fn solution_attempt_deserializes_with_defaults() {
        let attempt: SolutionAttempt =
            serde_json::from_str(r#"{"final_answer_md": "QED"}"#).unwrap();
        assert_eq!(attempt.final_answer_md, "QED");
        assert!(attempt.outline_steps.is_empty());
        assert!(!attempt.claims_incorrect_conclusion);
    }
}
