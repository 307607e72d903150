//! End-to-end runs against the deterministic mock chat router.

mod common;

use std::sync::Arc;

use common::MockLlmRouter;
use prover_swarm::config::get_config;
use prover_swarm::graph::Goal;
use prover_swarm::{AgentKind, RunConfig, Runtime, TraceLogger};

const PROBLEM: &str = "Prove that 1 + 1 = 2.";

fn direct_style_config() -> RunConfig {
    let mut config = get_config("default").unwrap();
    config.orchestrator.exploration_rounds = 0;
    config.worker.num_provers = 1;
    config.worker.max_verify_rounds = 1;
    config.worker.allow_decomposition = false;
    config.verifier.ensemble_size = 1;
    config
}

fn runtime_with_router(config: RunConfig) -> (Runtime, MockLlmRouter) {
    let router = MockLlmRouter::new(&config);
    let runtime = Runtime::new(config, Arc::new(router.clone()), TraceLogger::disabled());
    (runtime, router)
}

fn count_kind(runtime: &Runtime, kind: AgentKind) -> usize {
    runtime
        .nodes()
        .values()
        .filter(|node| node.kind == kind)
        .count()
}

#[tokio::test]
async fn single_round_solve_is_accepted_end_to_end() {
    let (mut runtime, _router) = runtime_with_router(direct_style_config());

    let report = runtime.run(PROBLEM).await.unwrap();
    assert!(report.completed);

    // One prover round, one verification, no retries.
    assert_eq!(count_kind(&runtime, AgentKind::Prover), 1);
    assert_eq!(count_kind(&runtime, AgentKind::Verifier), 1);

    // The worker ran three times: fan-out, verification, terminal answer.
    let worker = runtime
        .nodes()
        .values()
        .find(|node| node.kind == AgentKind::Worker)
        .unwrap();
    assert_eq!(worker.outputs.len(), 3);

    let attempt = report
        .output
        .as_ref()
        .and_then(|out| out.normalized.as_attempt())
        .unwrap();
    assert!(attempt
        .final_answer_md
        .contains("A mock proof verifies the conclusion directly."));

    // The accepted attempt's knowledge made it into the shared KB.
    assert!(!runtime.kb().is_empty());
}

#[tokio::test]
async fn exploration_rounds_are_sequential() {
    let mut config = direct_style_config();
    config.orchestrator.exploration_rounds = 2;
    config.exploration.max_questions = 2;
    let (mut runtime, _router) = runtime_with_router(config);

    let report = runtime.run(PROBLEM).await.unwrap();
    assert!(report.completed);

    let mut exploration_ids: Vec<_> = runtime
        .nodes()
        .values()
        .filter(|node| node.kind == AgentKind::Exploration)
        .map(|node| node.id)
        .collect();
    exploration_ids.sort_unstable();
    assert_eq!(exploration_ids.len(), 2);

    // Round 2 starts only after round 1's whole subtree finished: every node
    // reachable from the first exploration has a smaller id than the second.
    let first = runtime.node(exploration_ids[0]).unwrap();
    let mut frontier = first.children.clone();
    let mut max_subtree_id = first.id;
    while let Some(id) = frontier.pop() {
        max_subtree_id = max_subtree_id.max(id);
        frontier.extend(runtime.node(id).unwrap().children.clone());
    }
    assert!(max_subtree_id < exploration_ids[1]);

    // The solve worker comes last of all.
    let solve_worker = runtime
        .nodes()
        .values()
        .find(|node| node.inputs.task.goal == Some(Goal::Solve))
        .unwrap();
    assert!(solve_worker.id > exploration_ids[1]);

    // Each answered question became a KB entry.
    assert!(runtime
        .kb()
        .snapshot()
        .iter()
        .any(|entry| entry.id.starts_with("Exploration ")));
}

#[tokio::test]
async fn children_inherit_the_spawning_parents_latest_output() {
    let (mut runtime, _router) = runtime_with_router(direct_style_config());
    runtime.run(PROBLEM).await.unwrap();

    let worker = runtime
        .nodes()
        .values()
        .find(|node| node.kind == AgentKind::Worker)
        .unwrap();
    assert_eq!(worker.inputs.local_context[0].kind, AgentKind::Orchestrator);

    let prover = runtime
        .nodes()
        .values()
        .find(|node| node.kind == AgentKind::Prover)
        .unwrap();
    assert_eq!(prover.inputs.local_context[0].kind, AgentKind::Worker);
}

#[tokio::test]
async fn rejected_rounds_end_at_the_verify_ceiling() {
    let mut config = direct_style_config();
    config.worker.num_provers = 2;
    let (mut runtime, router) = runtime_with_router(config);
    router.reject_everything();

    let report = runtime.run(PROBLEM).await.unwrap();
    // The run completes; the answer records the verification failure.
    assert!(report.completed);
    assert_eq!(count_kind(&runtime, AgentKind::Prover), 2);
    assert_eq!(count_kind(&runtime, AgentKind::Verifier), 1);

    let attempt = report
        .output
        .as_ref()
        .and_then(|out| out.normalized.as_attempt())
        .unwrap();
    assert!(attempt
        .final_answer_md
        .starts_with("Verifier could not confirm a solution for:"));
}

#[tokio::test]
async fn every_role_sees_its_own_prompt() {
    let mut config = direct_style_config();
    config.orchestrator.exploration_rounds = 1;
    let (mut runtime, router) = runtime_with_router(config.clone());
    runtime.run(PROBLEM).await.unwrap();

    let calls = router.calls();
    assert!(calls
        .iter()
        .any(|call| call.system_prompt == config.prover.system_prompt && call.tools_requested));
    assert!(calls
        .iter()
        .any(|call| call.system_prompt == config.verifier.system_prompt));
    assert!(calls
        .iter()
        .any(|call| call.system_prompt == config.parser.system_prompt && call.json_requested));
    assert!(calls
        .iter()
        .any(|call| call.system_prompt == config.exploration.formatted_system_prompt()));

    // Ballots go to the configured verifier model.
    let verifier_model = &config.verifier.llms[0].model;
    assert!(calls
        .iter()
        .any(|call| call.system_prompt == config.verifier.system_prompt
            && &call.model == verifier_model));

    // Prover prompts carry the shared KB and the ancestor chain.
    let prover_call = calls
        .iter()
        .find(|call| call.system_prompt == config.prover.system_prompt)
        .unwrap();
    assert!(prover_call.user_prompt.contains("Knowledge base:"));
    assert!(prover_call.user_prompt.contains("Context hierarchy:"));
}

#[tokio::test]
async fn reasoner_prompts_carry_inherited_local_context() {
    let mut config = direct_style_config();
    config.orchestrator.exploration_rounds = 1;
    let (mut runtime, router) = runtime_with_router(config.clone());
    runtime.run(PROBLEM).await.unwrap();

    // Provers and explorations inherit their parent's latest output at spawn
    // time, so every one of their calls renders a local-context section.
    let calls = router.calls();
    let prover_calls: Vec<_> = calls
        .iter()
        .filter(|call| call.system_prompt == config.prover.system_prompt)
        .collect();
    assert!(!prover_calls.is_empty());
    for call in &prover_calls {
        assert!(call.user_prompt.contains("Local context:"));
    }

    let exploration_call = calls
        .iter()
        .find(|call| call.system_prompt == config.exploration.formatted_system_prompt())
        .unwrap();
    assert!(exploration_call.user_prompt.contains("Local context:"));
}
