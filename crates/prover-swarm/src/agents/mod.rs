//! Agent role implementations and the shared execution context.

pub mod exploration;
pub mod orchestrator;
pub mod parser;
pub mod prover;
pub mod tools;
pub mod verifier;
pub mod worker;

use serde_json::json;

use crate::config::{LlmConfig, RunConfig};
use crate::graph::{AgentKind, AgentNode, AgentOutput, NodeId};
use crate::kb::KnowledgeBase;
use crate::llm::{ChatRequest, ChatResponse, ClientFactory};
use crate::trace::TraceLogger;

/// Shared, read-mostly state an agent sees while executing. The node itself
/// is borrowed mutably by the caller and passed alongside.
pub struct AgentContext<'a> {
    pub config: &'a RunConfig,
    pub kb: &'a KnowledgeBase,
    pub clients: &'a dyn ClientFactory,
    pub trace: &'a mut TraceLogger,
}

/// Execute one node according to its role.
pub async fn execute(
    node: &mut AgentNode,
    ctx: &mut AgentContext<'_>,
) -> anyhow::Result<AgentOutput> {
    match node.kind {
        AgentKind::Orchestrator => orchestrator::run(node, ctx),
        AgentKind::Exploration => exploration::run(node, ctx).await,
        AgentKind::Worker => worker::run(node, ctx),
        AgentKind::Prover => prover::run(node, ctx).await,
        AgentKind::Verifier => verifier::run(node, ctx).await,
        AgentKind::Parser => parser::run(node, ctx).await,
    }
}

/// One traced chat round trip against a single LLM.
pub(crate) async fn chat_with_trace(
    ctx: &mut AgentContext<'_>,
    llm: &LlmConfig,
    node_id: NodeId,
    request: ChatRequest,
) -> anyhow::Result<ChatResponse> {
    let client = ctx.clients.client_for(llm)?;
    ctx.trace
        .llm_request(node_id, client.model(), &json!(&request));
    let response = client.chat(request).await?;
    ctx.trace
        .llm_response(node_id, client.model(), &json!(&response));
    Ok(response)
}
