//! Context graph: agent nodes, spawn requests, and per-execution outputs.
//!
//! The graph grows strictly forward by spawning; parent/child edges are
//! acyclic by construction. A node may execute more than once; each
//! re-entry sees the local context its completed children accumulated.

use std::collections::BTreeSet;
use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::schemas::{ExplorationQuestions, KbEntry, Normalized, SolutionAttempt, WorkerPhase};

/// Node identifier: unique, monotonically assigned, never reused.
pub type NodeId = u64;

/// The closed set of agent roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    /// Top-level coordinator: exploration rounds, then a solve worker.
    Orchestrator,
    /// Proposes intermediate questions and delegates them to workers.
    Exploration,
    /// Generate → verify → accept/retry/decompose loop.
    Worker,
    /// Produces one candidate solution attempt.
    Prover,
    /// Scores candidate attempts with an ensemble ballot.
    Verifier,
    /// Converts free text into structured JSON.
    Parser,
}

impl AgentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Orchestrator => "orchestrator",
            Self::Exploration => "exploration",
            Self::Worker => "worker",
            Self::Prover => "prover",
            Self::Verifier => "verifier",
            Self::Parser => "parser",
        }
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Node lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Pending,
    Running,
    /// Blocked until every pending child completes.
    Waiting,
    Done,
}

/// Task goal attached to a spawned node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Goal {
    Solve,
    Explore,
    DecomposeStep,
}

impl fmt::Display for Goal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Solve => f.write_str("solve"),
            Self::Explore => f.write_str("explore"),
            Self::DecomposeStep => f.write_str("decompose_step"),
        }
    }
}

/// Task payload handed to a node at spawn time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct TaskPayload {
    /// Problem statement this node should work on.
    pub problem: String,
    pub goal: Option<Goal>,
    /// Verifier feedback carried over from the previous round.
    pub feedback_md: Option<String>,
    /// Exploration round index (1-based).
    pub round: Option<usize>,
    /// Problem statement of the node that delegated this task.
    pub parent_problem: Option<String>,
    /// How many decomposition layers are above this task.
    pub decomposition_depth: usize,
    /// Position within an ordered fan-out, used for order-stable pairing of
    /// completions with requests regardless of completion order.
    pub request_index: Option<usize>,
    /// Attempts handed to a verifier for scoring.
    pub attempts: Vec<SolutionAttempt>,
    /// Parser-only: semantic target label for tracing.
    pub target: Option<String>,
    /// Parser-only: raw text to parse.
    pub text: Option<String>,
    /// Parser-only: JSON schema describing the expected shape.
    pub schema: Option<serde_json::Value>,
}

impl TaskPayload {
    pub fn for_problem(problem: impl Into<String>) -> Self {
        Self {
            problem: problem.into(),
            ..Self::default()
        }
    }
}

/// Request to create a child node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpawnRequest {
    pub kind: AgentKind,
    pub task: TaskPayload,
    /// Parent-linked children block the parent until they complete. Detached
    /// children receive no inherited context and nothing joins their output.
    pub edge_from_parent: bool,
}

impl SpawnRequest {
    pub fn linked(kind: AgentKind, task: TaskPayload) -> Self {
        Self {
            kind,
            task,
            edge_from_parent: true,
        }
    }

    pub fn detached(kind: AgentKind, task: TaskPayload) -> Self {
        Self {
            kind,
            task,
            edge_from_parent: false,
        }
    }
}

/// Result of one node execution.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentOutput {
    pub kind: AgentKind,
    pub raw_text: String,
    pub normalized: Normalized,
    /// KB deltas the scheduler applies after this execution returns.
    pub kb_writes: Vec<KbEntry>,
    pub spawn_requests: Vec<SpawnRequest>,
    /// Stamped from the producing node's task when the output is propagated
    /// to a parent, so the parent can re-sort completions into request order.
    pub request_index: Option<usize>,
}

impl AgentOutput {
    pub fn new(kind: AgentKind, raw_text: impl Into<String>, normalized: Normalized) -> Self {
        Self {
            kind,
            raw_text: raw_text.into(),
            normalized,
            kb_writes: Vec::new(),
            spawn_requests: Vec::new(),
            request_index: None,
        }
    }

    pub fn with_kb_writes(mut self, kb_writes: Vec<KbEntry>) -> Self {
        self.kb_writes = kb_writes;
        self
    }

    pub fn with_spawns(mut self, spawn_requests: Vec<SpawnRequest>) -> Self {
        self.spawn_requests = spawn_requests;
        self
    }
}

/// Inputs assembled for a node at spawn time, plus the mutable slots a node
/// accumulates across re-entries.
#[derive(Debug, Clone, Default)]
pub struct NodeInputs {
    /// Top-level problem text inherited from the spawning parent.
    pub problem: String,
    pub task: TaskPayload,
    /// Completed results routed to this node, in completion order.
    pub local_context: Vec<AgentOutput>,
    /// Rendered ancestor-chain summary, fixed at spawn time.
    pub context_hierarchy_md: String,
    /// Exploration: questions proposed in phase 1, consumed in phase 2.
    pub exploration_questions: Option<ExplorationQuestions>,
    /// Worker: explicit record of the last spawning decision.
    pub worker_phase: Option<WorkerPhase>,
}

/// A unit of recursive work in the context graph.
#[derive(Debug, Clone)]
pub struct AgentNode {
    pub id: NodeId,
    pub kind: AgentKind,
    pub inputs: NodeInputs,
    /// One entry per execution; re-entrant nodes accumulate several.
    pub outputs: Vec<AgentOutput>,
    pub status: NodeStatus,
    pub parents: Vec<NodeId>,
    pub children: Vec<NodeId>,
    /// Children this node is currently blocked on. Invariant: non-empty iff
    /// the node status is `Waiting`.
    pub pending_children: BTreeSet<NodeId>,
}

impl AgentNode {
    pub fn new(id: NodeId, kind: AgentKind, inputs: NodeInputs, parents: Vec<NodeId>) -> Self {
        Self {
            id,
            kind,
            inputs,
            outputs: Vec::new(),
            status: NodeStatus::Pending,
            parents,
            children: Vec::new(),
            pending_children: BTreeSet::new(),
        }
    }

    pub fn is_waiting(&self) -> bool {
        self.status == NodeStatus::Waiting
    }

    pub fn latest_output(&self) -> Option<&AgentOutput> {
        self.outputs.last()
    }
}
