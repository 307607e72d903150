//! Worker role: the generate → verify → accept/retry/decompose loop.
//!
//! The worker itself never calls an LLM. Each execution inspects the results
//! accumulated in its local context and makes exactly one spawning decision
//! (or produces a terminal attempt). The local context remains the
//! bookkeeping authority; `worker_phase` is an explicit record of the last
//! decision, kept for observability and tracing.

use tracing::{debug, info};

use crate::agents::AgentContext;
use crate::graph::{AgentKind, AgentNode, AgentOutput, Goal, SpawnRequest, TaskPayload};
use crate::schemas::{Normalized, SolutionAttempt, VerificationReport, WorkerPhase, WorkerStatus};
use crate::text;

pub fn run(node: &mut AgentNode, ctx: &mut AgentContext<'_>) -> anyhow::Result<AgentOutput> {
    let task = node.inputs.task.clone();
    let items: Vec<AgentOutput> = node.inputs.local_context.clone();

    let last_verifier = items.iter().rposition(|out| out.kind == AgentKind::Verifier);
    let prev_verifier = last_verifier
        .and_then(|last| items[..last].iter().rposition(|out| out.kind == AgentKind::Verifier));
    let rounds_completed = items
        .iter()
        .filter(|out| out.kind == AgentKind::Verifier)
        .count();

    let tail_start = last_verifier.map(|index| index + 1).unwrap_or(0);
    let in_progress = prover_attempts(&items[tail_start..]);
    let workers_since_verify = items[tail_start..]
        .iter()
        .any(|out| out.kind == AgentKind::Worker);

    let just_verified = {
        let segment = match (prev_verifier, last_verifier) {
            (Some(prev), Some(last)) => &items[prev + 1..last],
            (None, Some(last)) => &items[..last],
            _ => &items[..0],
        };
        sorted_attempts(prover_attempts(segment))
    };

    let latest_pv = items
        .iter()
        .rev()
        .find(|out| matches!(out.kind, AgentKind::Prover | AgentKind::Verifier));
    let latest_report =
        latest_pv.and_then(|out| (out.kind == AgentKind::Verifier).then(|| out.normalized.as_report())
        .flatten());

    if let Some(report) = latest_report {
        return Ok(evaluate_report(
            node,
            ctx,
            &task,
            report.clone(),
            just_verified,
            rounds_completed,
            workers_since_verify,
        ));
    }

    let num_provers = ctx.config.worker.num_provers.max(1);
    if in_progress.len() < num_provers {
        // First execution, or a round whose fan-out is incomplete: spawn the
        // missing provers.
        let feedback = latest_round_feedback(&items, &task);
        let shortfall = num_provers - in_progress.len();
        let spawns = spawn_provers(&task, feedback, shortfall, in_progress.len());
        node.inputs.worker_phase = Some(WorkerPhase::Generation {
            round: rounds_completed,
        });
        debug!(node_id = node.id, shortfall, "worker spawning provers");
        return Ok(status_output(
            node.kind,
            WorkerStatus {
                phase: "prover_generation".to_string(),
                round_index: rounds_completed,
                provers_spawned: shortfall,
                verifier_spawned: false,
                decomposition_triggered: false,
                feedback_md: task.feedback_md.clone(),
                notes: None,
            },
        )
        .with_spawns(spawns));
    }

    if latest_pv.map(|out| out.kind) == Some(AgentKind::Prover) {
        // Full fan-out is in: hand the batch to a verifier, in request order.
        let attempts: Vec<SolutionAttempt> = sorted_attempts(in_progress);
        let verifier_task = TaskPayload {
            attempts,
            parent_problem: Some(task.problem.clone()),
            ..TaskPayload::for_problem(task.problem.clone())
        };
        node.inputs.worker_phase = Some(WorkerPhase::Verification {
            round: rounds_completed,
        });
        return Ok(status_output(
            node.kind,
            WorkerStatus {
                phase: "verification".to_string(),
                round_index: rounds_completed,
                provers_spawned: 0,
                verifier_spawned: true,
                decomposition_triggered: false,
                feedback_md: None,
                notes: None,
            },
        )
        .with_spawns(vec![SpawnRequest::linked(
            AgentKind::Verifier,
            verifier_task,
        )]));
    }

    Ok(failure_output(
        node.kind,
        format!("Worker internal error (no verifier report) for: {}", task.problem),
    ))
}

/// A verifier just reported: accept, fail the round ceiling, decompose, or
/// retry with feedback.
fn evaluate_report(
    node: &mut AgentNode,
    ctx: &mut AgentContext<'_>,
    task: &TaskPayload,
    report: VerificationReport,
    just_verified: Vec<SolutionAttempt>,
    rounds_completed: usize,
    workers_since_verify: bool,
) -> AgentOutput {
    let worker_cfg = &ctx.config.worker;

    if report.accepted {
        let Some(mut attempt) = report
            .best_attempt_index
            .and_then(|index| just_verified.get(index).cloned())
        else {
            return failure_output(
                node.kind,
                format!(
                    "Worker internal error (invalid best attempt) for: {}",
                    task.problem
                ),
            );
        };
        let kb_writes = text::prepare_kb_entries(if attempt.kb_updates.is_empty() {
            vec![text::make_kb_entry(
                node.id,
                "Auto-generated fact",
                &attempt.final_answer_md,
            )]
        } else {
            attempt.kb_updates.clone()
        });
        attempt.kb_updates = kb_writes.clone();
        info!(node_id = node.id, rounds = rounds_completed, "worker accepted a solution");
        return AgentOutput::new(
            node.kind,
            attempt.final_answer_md.clone(),
            Normalized::Attempt(attempt),
        )
        .with_kb_writes(kb_writes);
    }

    if rounds_completed >= worker_cfg.max_verify_rounds {
        info!(node_id = node.id, rounds = rounds_completed, "worker hit the round ceiling");
        return failure_output(
            node.kind,
            format!("Verifier could not confirm a solution for: {}", task.problem),
        );
    }

    let may_decompose = worker_cfg.allow_decomposition
        && task.decomposition_depth < worker_cfg.max_decomposition_depth
        && task.goal == Some(Goal::Solve)
        && !workers_since_verify;
    if may_decompose {
        if let Some(plan) = pick_plan(&report, &just_verified) {
            let steps: Vec<&String> = plan
                .outline_steps
                .iter()
                .take(worker_cfg.max_plan_steps)
                .collect();
            let mut spawns: Vec<SpawnRequest> = steps
                .iter()
                .enumerate()
                .map(|(index, step)| {
                    SpawnRequest::linked(
                        AgentKind::Worker,
                        TaskPayload {
                            goal: Some(Goal::DecomposeStep),
                            parent_problem: Some(task.problem.clone()),
                            decomposition_depth: task.decomposition_depth + 1,
                            request_index: Some(index),
                            ..TaskPayload::for_problem((*step).clone())
                        },
                    )
                })
                .collect();
            // LIFO scheduler: reverse so step 1 executes first.
            spawns.reverse();

            node.inputs.worker_phase = Some(WorkerPhase::Decomposition {
                round: rounds_completed,
            });
            info!(node_id = node.id, steps = spawns.len(), "worker decomposing the problem");
            return status_output(
                node.kind,
                WorkerStatus {
                    phase: "decomposition".to_string(),
                    round_index: rounds_completed,
                    provers_spawned: 0,
                    verifier_spawned: false,
                    decomposition_triggered: true,
                    feedback_md: non_empty(report.global_feedback_md.clone()),
                    notes: None,
                },
            )
            .with_spawns(spawns);
        }
    }

    // Retry: a fresh prover round carrying the verifier's feedback.
    let num_provers = ctx.config.worker.num_provers.max(1);
    let feedback = non_empty(report.global_feedback_md.clone());
    let spawns = spawn_provers(task, feedback.clone(), num_provers, 0);
    node.inputs.worker_phase = Some(WorkerPhase::Generation {
        round: rounds_completed,
    });
    status_output(
        node.kind,
        WorkerStatus {
            phase: "prover_generation".to_string(),
            round_index: rounds_completed,
            provers_spawned: num_provers,
            verifier_spawned: false,
            decomposition_triggered: false,
            feedback_md: feedback,
            notes: None,
        },
    )
    .with_spawns(spawns)
}

/// The plan used for decomposition: the verifier's best attempt when it has
/// an outline, otherwise the first attempt that offered one.
fn pick_plan<'a>(
    report: &VerificationReport,
    attempts: &'a [SolutionAttempt],
) -> Option<&'a SolutionAttempt> {
    report
        .best_attempt_index
        .and_then(|index| attempts.get(index))
        .filter(|attempt| !attempt.outline_steps.is_empty())
        .or_else(|| attempts.iter().find(|attempt| !attempt.outline_steps.is_empty()))
}

fn prover_attempts(items: &[AgentOutput]) -> Vec<&AgentOutput> {
    items
        .iter()
        .filter(|out| out.kind == AgentKind::Prover && out.normalized.as_attempt().is_some())
        .collect()
}

/// Attempts in request order, regardless of completion order.
fn sorted_attempts(mut outputs: Vec<&AgentOutput>) -> Vec<SolutionAttempt> {
    outputs.sort_by_key(|out| out.request_index.unwrap_or(usize::MAX));
    outputs
        .into_iter()
        .filter_map(|out| out.normalized.as_attempt().cloned())
        .collect()
}

/// Feedback for a fresh fan-out: the most recent verifier report's feedback,
/// falling back to the feedback the worker itself was spawned with.
fn latest_round_feedback(items: &[AgentOutput], task: &TaskPayload) -> Option<String> {
    items
        .iter()
        .rev()
        .find_map(|out| out.normalized.as_report())
        .and_then(|report| non_empty(report.global_feedback_md.clone()))
        .or_else(|| task.feedback_md.clone())
}

fn spawn_provers(
    task: &TaskPayload,
    feedback: Option<String>,
    count: usize,
    start_index: usize,
) -> Vec<SpawnRequest> {
    (0..count)
        .map(|offset| {
            SpawnRequest::linked(
                AgentKind::Prover,
                TaskPayload {
                    feedback_md: feedback.clone(),
                    parent_problem: task.parent_problem.clone(),
                    request_index: Some(start_index + offset),
                    ..TaskPayload::for_problem(task.problem.clone())
                },
            )
        })
        .collect()
}

fn status_output(kind: AgentKind, status: WorkerStatus) -> AgentOutput {
    let raw = format!("worker phase: {}", status.phase);
    AgentOutput::new(kind, raw, Normalized::WorkerStatus(status))
}

fn failure_output(kind: AgentKind, message: String) -> AgentOutput {
    AgentOutput::new(
        kind,
        message.clone(),
        Normalized::Attempt(SolutionAttempt::answer(message)),
    )
}

fn non_empty(text: String) -> Option<String> {
    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{get_config, LlmConfig, RunConfig};
    use crate::graph::NodeInputs;
    use crate::kb::KnowledgeBase;
    use crate::llm::{ClientFactory, LlmClient, LlmError};
    use crate::trace::TraceLogger;

    /// The worker never calls an LLM; a factory that always errors proves it.
    struct NoLlm;

    impl ClientFactory for NoLlm {
        fn client_for(&self, config: &LlmConfig) -> Result<Box<dyn LlmClient>, LlmError> {
            Err(LlmError::MissingApiKey {
                env: "UNUSED".to_string(),
                model: config.model.clone(),
            })
        }
    }

    fn test_config() -> RunConfig {
        let mut config = get_config("default").unwrap();
        config.worker.num_provers = 2;
        config.worker.max_verify_rounds = 2;
        config
    }

    fn run_worker(config: &RunConfig, node: &mut AgentNode) -> AgentOutput {
        let kb = KnowledgeBase::new();
        let mut trace = TraceLogger::disabled();
        let mut ctx = AgentContext {
            config,
            kb: &kb,
            clients: &NoLlm,
            trace: &mut trace,
        };
        run(node, &mut ctx).unwrap()
    }

    fn solve_worker_node() -> AgentNode {
        let mut inputs = NodeInputs::default();
        inputs.problem = "Prove it.".to_string();
        inputs.task = TaskPayload {
            goal: Some(Goal::Solve),
            ..TaskPayload::for_problem("Prove it.")
        };
        AgentNode::new(10, AgentKind::Worker, inputs, vec![1])
    }

    fn prover_output(index: usize, answer: &str) -> AgentOutput {
        let mut out = AgentOutput::new(
            AgentKind::Prover,
            answer,
            Normalized::Attempt(SolutionAttempt::answer(answer)),
        );
        out.request_index = Some(index);
        out
    }

    fn verifier_output(report: VerificationReport) -> AgentOutput {
        let raw = if report.accepted { "accepted" } else { "rejected" };
        AgentOutput::new(AgentKind::Verifier, raw, Normalized::Report(report))
    }

    fn report(accepted: bool, best: Option<usize>, feedback: &str) -> VerificationReport {
        VerificationReport {
            accepted,
            best_attempt_index: best,
            attempt_scores: vec![1, 0],
            attempt_critiques_md: vec![String::new(), String::new()],
            global_feedback_md: feedback.to_string(),
        }
    }

    #[test]
    fn first_execution_fans_out_exactly_num_provers() {
        let config = test_config();
        let mut node = solve_worker_node();
        let out = run_worker(&config, &mut node);

        assert_eq!(out.spawn_requests.len(), 2);
        assert!(out
            .spawn_requests
            .iter()
            .all(|request| request.kind == AgentKind::Prover));
        let indices: Vec<_> = out
            .spawn_requests
            .iter()
            .map(|request| request.task.request_index)
            .collect();
        assert_eq!(indices, vec![Some(0), Some(1)]);
        assert_eq!(
            node.inputs.worker_phase,
            Some(WorkerPhase::Generation { round: 0 })
        );
    }

    #[test]
    fn full_fan_out_spawns_one_verifier_with_sorted_attempts() {
        let config = test_config();
        let mut node = solve_worker_node();
        // Completion order inverted relative to request order.
        node.inputs.local_context = vec![prover_output(1, "second"), prover_output(0, "first")];

        let out = run_worker(&config, &mut node);
        assert_eq!(out.spawn_requests.len(), 1);
        let verifier = &out.spawn_requests[0];
        assert_eq!(verifier.kind, AgentKind::Verifier);
        let answers: Vec<_> = verifier
            .task
            .attempts
            .iter()
            .map(|attempt| attempt.final_answer_md.as_str())
            .collect();
        assert_eq!(answers, vec!["first", "second"]);
        assert_eq!(
            node.inputs.worker_phase,
            Some(WorkerPhase::Verification { round: 0 })
        );
    }

    #[test]
    fn accepted_report_yields_terminal_attempt_with_kb_fallback() {
        let config = test_config();
        let mut node = solve_worker_node();
        node.inputs.local_context = vec![
            prover_output(0, "The answer is 4."),
            prover_output(1, "The answer is 5."),
            verifier_output(report(true, Some(0), "")),
        ];

        let out = run_worker(&config, &mut node);
        assert!(out.spawn_requests.is_empty());
        let attempt = out.normalized.as_attempt().unwrap();
        assert_eq!(attempt.final_answer_md, "The answer is 4.");
        assert_eq!(out.kb_writes.len(), 1);
        assert_eq!(out.kb_writes[0].id, "Result 10");
    }

    #[test]
    fn rejection_retries_with_feedback_until_round_ceiling() {
        let mut config = test_config();
        config.worker.allow_decomposition = false;
        let mut node = solve_worker_node();
        node.inputs.local_context = vec![
            prover_output(0, "a"),
            prover_output(1, "b"),
            verifier_output(report(false, Some(0), "Base case missing.")),
        ];

        let out = run_worker(&config, &mut node);
        assert_eq!(out.spawn_requests.len(), 2);
        assert!(out
            .spawn_requests
            .iter()
            .all(|request| request.task.feedback_md.as_deref() == Some("Base case missing.")));

        // Second rejection hits the ceiling.
        node.inputs.local_context.extend([
            prover_output(0, "c"),
            prover_output(1, "d"),
            verifier_output(report(false, Some(0), "Still wrong.")),
        ]);
        let out = run_worker(&config, &mut node);
        assert!(out.spawn_requests.is_empty());
        let attempt = out.normalized.as_attempt().unwrap();
        assert!(attempt
            .final_answer_md
            .starts_with("Verifier could not confirm a solution for:"));
    }

    #[test]
    fn rejection_with_outline_triggers_decomposition() {
        let config = test_config();
        let mut node = solve_worker_node();
        let mut planned = SolutionAttempt::answer("plan only");
        planned.outline_steps = vec!["Step one".to_string(), "Step two".to_string()];
        let mut plan_output = AgentOutput::new(
            AgentKind::Prover,
            "plan only",
            Normalized::Attempt(planned),
        );
        plan_output.request_index = Some(0);
        node.inputs.local_context = vec![
            plan_output,
            prover_output(1, "b"),
            verifier_output(report(false, Some(0), "Needs structure.")),
        ];

        let out = run_worker(&config, &mut node);
        assert_eq!(out.spawn_requests.len(), 2);
        assert!(out
            .spawn_requests
            .iter()
            .all(|request| request.kind == AgentKind::Worker));
        // Reversed for the LIFO stack: step one must pop first.
        assert_eq!(out.spawn_requests.last().unwrap().task.problem, "Step one");
        assert!(out
            .spawn_requests
            .iter()
            .all(|request| request.task.goal == Some(Goal::DecomposeStep)));
        assert!(out
            .spawn_requests
            .iter()
            .all(|request| request.task.decomposition_depth == 1));
        assert_eq!(
            node.inputs.worker_phase,
            Some(WorkerPhase::Decomposition { round: 1 })
        );
    }

    #[test]
    fn decomposition_is_not_retriggered_after_subworkers_return() {
        let config = test_config();
        let mut node = solve_worker_node();
        let mut planned = SolutionAttempt::answer("plan only");
        planned.outline_steps = vec!["Step one".to_string()];
        let mut plan_output = AgentOutput::new(
            AgentKind::Prover,
            "plan only",
            Normalized::Attempt(planned),
        );
        plan_output.request_index = Some(0);
        node.inputs.local_context = vec![
            plan_output,
            prover_output(1, "b"),
            verifier_output(report(false, Some(0), "Needs structure.")),
            AgentOutput::new(
                AgentKind::Worker,
                "step result",
                Normalized::Attempt(SolutionAttempt::answer("step result")),
            ),
        ];

        let out = run_worker(&config, &mut node);
        // Sub-workers came back: a fresh prover round, not more decomposition.
        assert_eq!(out.spawn_requests.len(), 2);
        assert!(out
            .spawn_requests
            .iter()
            .all(|request| request.kind == AgentKind::Prover));
    }

    #[test]
    fn invalid_best_index_is_an_internal_error() {
        let config = test_config();
        let mut node = solve_worker_node();
        node.inputs.local_context = vec![
            prover_output(0, "a"),
            verifier_output(report(true, Some(7), "")),
        ];

        let out = run_worker(&config, &mut node);
        let attempt = out.normalized.as_attempt().unwrap();
        assert!(attempt.final_answer_md.contains("internal error"));
    }
}
