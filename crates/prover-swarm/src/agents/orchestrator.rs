//! Orchestrator role: sequential exploration rounds, then one solve worker,
//! then a terminal answer assembled from the worker's result.

use tracing::info;

use crate::agents::AgentContext;
use crate::graph::{AgentKind, AgentNode, AgentOutput, Goal, SpawnRequest, TaskPayload};
use crate::schemas::{Normalized, OrchestratorStatus, SolutionAttempt};

pub fn run(node: &mut AgentNode, ctx: &mut AgentContext<'_>) -> anyhow::Result<AgentOutput> {
    let problem = node.inputs.task.problem.clone();
    let exploration_done = node
        .inputs
        .local_context
        .iter()
        .filter(|out| out.kind == AgentKind::Exploration)
        .count();

    if exploration_done < ctx.config.orchestrator.exploration_rounds {
        let round = exploration_done + 1;
        info!(node_id = node.id, round, "orchestrator starting exploration round");
        let task = TaskPayload {
            round: Some(round),
            ..TaskPayload::for_problem(problem.clone())
        };
        let status = OrchestratorStatus {
            phase: "exploration".to_string(),
            round_index: Some(round),
            message: format!("spawning exploration round {round}"),
        };
        return Ok(AgentOutput::new(
            node.kind,
            status.message.clone(),
            Normalized::OrchestratorStatus(status),
        )
        .with_spawns(vec![SpawnRequest::linked(AgentKind::Exploration, task)]));
    }

    let last_worker = node
        .inputs
        .local_context
        .iter()
        .rev()
        .find(|out| out.kind == AgentKind::Worker);
    let Some(worker_output) = last_worker else {
        info!(node_id = node.id, "orchestrator starting the solve phase");
        let task = TaskPayload {
            goal: Some(Goal::Solve),
            ..TaskPayload::for_problem(problem.clone())
        };
        let status = OrchestratorStatus {
            phase: "solve".to_string(),
            round_index: None,
            message: "spawning solve worker".to_string(),
        };
        return Ok(AgentOutput::new(
            node.kind,
            status.message.clone(),
            Normalized::OrchestratorStatus(status),
        )
        .with_spawns(vec![SpawnRequest::linked(AgentKind::Worker, task)]));
    };

    let attempt = worker_output
        .normalized
        .as_attempt()
        .cloned()
        .unwrap_or_else(|| SolutionAttempt::answer(worker_output.raw_text.clone()));
    Ok(AgentOutput::new(
        node.kind,
        attempt.final_answer_md.clone(),
        Normalized::Attempt(attempt),
    ))
}
