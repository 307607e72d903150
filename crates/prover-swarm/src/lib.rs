//! Recursive multi-agent theorem-proving runtime.
//!
//! A run builds a context graph of agent nodes rooted at an orchestrator:
//! exploration rounds seed a shared knowledge base, then a worker drives a
//! generate → verify loop over prover attempts, scored by a verifier
//! ensemble under a strict-majority rule. Scheduling is single-threaded and
//! deterministic: a LIFO ready stack under a global step ceiling.

pub mod agents;
pub mod config;
pub mod context;
pub mod graph;
pub mod kb;
pub mod llm;
pub mod prompts;
pub mod runtime;
pub mod schemas;
pub mod text;
pub mod trace;

pub use config::{get_config, list_configs, ConfigError, LlmConfig, RunConfig};
pub use graph::{AgentKind, AgentNode, AgentOutput, NodeId, NodeStatus, SpawnRequest, TaskPayload};
pub use kb::KnowledgeBase;
pub use llm::{ChatRequest, ChatResponse, ClientFactory, LlmClient, LlmError, OpenRouterFactory};
pub use runtime::{render_final_report, run_problem, RunReport, Runtime};
pub use schemas::{
    ExplorationQuestions, KbEntry, KbKind, Normalized, SolutionAttempt, VerificationReport,
};
pub use trace::TraceLogger;
