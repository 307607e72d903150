//! Deterministic single-threaded scheduler over the context graph.
//!
//! One node executes at a time, popped from a LIFO ready stack, under a
//! global step ceiling. Spawning is the only way the graph grows; a parent
//! that spawns linked children blocks until every one of them completes,
//! then re-enters with their outputs appended to its local context.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context as _;
use tracing::{debug, info, warn};

use crate::agents::{self, AgentContext};
use crate::config::{get_config, RunConfig};
use crate::context::build_context_hierarchy_md;
use crate::graph::{
    AgentKind, AgentNode, AgentOutput, NodeId, NodeInputs, NodeStatus, SpawnRequest, TaskPayload,
};
use crate::kb::KnowledgeBase;
use crate::llm::{ClientFactory, OpenRouterFactory};
use crate::trace::TraceLogger;

/// Outcome of one run.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// The root orchestrator's terminal output, when it produced one.
    pub output: Option<AgentOutput>,
    /// True when the root finished and no node was left waiting. A run that
    /// exhausts the step ceiling is incomplete, not failed.
    pub completed: bool,
    pub steps_used: u32,
}

pub struct Runtime {
    config: RunConfig,
    kb: KnowledgeBase,
    nodes: HashMap<NodeId, AgentNode>,
    stack: Vec<NodeId>,
    next_id: NodeId,
    trace: TraceLogger,
    clients: Arc<dyn ClientFactory>,
}

impl Runtime {
    pub fn new(config: RunConfig, clients: Arc<dyn ClientFactory>, trace: TraceLogger) -> Self {
        Self {
            config,
            kb: KnowledgeBase::new(),
            nodes: HashMap::new(),
            stack: Vec::new(),
            next_id: 0,
            trace,
            clients,
        }
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn kb(&self) -> &KnowledgeBase {
        &self.kb
    }

    pub fn nodes(&self) -> &HashMap<NodeId, AgentNode> {
        &self.nodes
    }

    pub fn node(&self, id: NodeId) -> Option<&AgentNode> {
        self.nodes.get(&id)
    }

    fn allocate_id(&mut self) -> NodeId {
        self.next_id += 1;
        self.next_id
    }

    fn register_node(&mut self, node: AgentNode) {
        self.trace.agent_event(node.id, node.kind, NodeStatus::Pending);
        self.stack.push(node.id);
        self.nodes.insert(node.id, node);
    }

    /// Execute a full run for `problem`, bounded by the configured step
    /// ceiling.
    pub async fn run(&mut self, problem: &str) -> anyhow::Result<RunReport> {
        self.trace.run_start(&self.config.name, problem);

        let root_id = self.allocate_id();
        let inputs = NodeInputs {
            problem: problem.to_string(),
            task: TaskPayload::for_problem(problem),
            local_context: Vec::new(),
            context_hierarchy_md: build_context_hierarchy_md(&self.nodes, &[]),
            exploration_questions: None,
            worker_phase: None,
        };
        self.register_node(AgentNode::new(
            root_id,
            AgentKind::Orchestrator,
            inputs,
            Vec::new(),
        ));

        let max_steps = self.config.orchestrator.max_total_steps;
        let mut steps = 0u32;
        let mut run_error: Option<anyhow::Error> = None;
        while !self.stack.is_empty() && steps < max_steps {
            steps += 1;
            if let Err(error) = self.run_once().await {
                run_error = Some(error);
                break;
            }
        }

        let root = self.nodes.get(&root_id);
        let output = root.and_then(|node| node.latest_output().cloned());
        let any_waiting = self.nodes.values().any(AgentNode::is_waiting);
        let completed =
            output.is_some() && self.stack.is_empty() && !any_waiting && run_error.is_none();

        if !completed && run_error.is_none() {
            warn!(steps, max_steps, "run stopped before completion");
        }
        self.trace.run_end(completed, steps);

        match run_error {
            Some(error) => Err(error),
            None => Ok(RunReport {
                output,
                completed,
                steps_used: steps,
            }),
        }
    }

    /// Pop and execute one node. Returns `Ok(false)` when the stack is empty.
    async fn run_once(&mut self) -> anyhow::Result<bool> {
        let Some(node_id) = self.stack.pop() else {
            return Ok(false);
        };
        // Stale stack entries are skipped, and the skip still costs a step.
        let runnable = self
            .nodes
            .get(&node_id)
            .map(|node| matches!(node.status, NodeStatus::Pending))
            .unwrap_or(false);
        if !runnable {
            debug!(node_id, "skipping non-runnable stack entry");
            return Ok(true);
        }

        let Some(mut node) = self.nodes.remove(&node_id) else {
            return Ok(true);
        };
        node.status = NodeStatus::Running;
        self.trace
            .agent_event(node.id, node.kind, NodeStatus::Running);

        let result = {
            let mut ctx = AgentContext {
                config: &self.config,
                kb: &self.kb,
                clients: self.clients.as_ref(),
                trace: &mut self.trace,
            };
            agents::execute(&mut node, &mut ctx).await
        };
        let output = match result {
            Ok(output) => output,
            Err(error) => {
                let kind = node.kind;
                self.nodes.insert(node_id, node);
                return Err(error).with_context(|| format!("{kind} node {node_id} failed"));
            }
        };

        let kind = node.kind;
        let kb_writes = output.kb_writes.clone();
        let spawns = output.spawn_requests.clone();
        node.outputs.push(output);
        node.status = NodeStatus::Done;
        self.nodes.insert(node_id, node);

        self.kb.extend(kb_writes);
        self.spawn_children(node_id, spawns);

        let waiting = self
            .nodes
            .get(&node_id)
            .map(AgentNode::is_waiting)
            .unwrap_or(false);
        self.trace.agent_event(
            node_id,
            kind,
            if waiting {
                NodeStatus::Waiting
            } else {
                NodeStatus::Done
            },
        );
        if !waiting {
            self.handle_child_completion(node_id);
        }
        Ok(true)
    }

    /// Materialize a node's spawn requests. Linked children inherit the
    /// parent's latest output and block the parent until they complete;
    /// detached children start with an empty context and join nothing.
    fn spawn_children(&mut self, parent_id: NodeId, spawns: Vec<SpawnRequest>) {
        if spawns.is_empty() {
            return;
        }

        let mut dependents: Vec<NodeId> = Vec::new();
        for request in spawns {
            let child_id = self.allocate_id();
            let parents = if request.edge_from_parent {
                vec![parent_id]
            } else {
                Vec::new()
            };

            let mut local_context = Vec::new();
            let mut problem = request.task.problem.clone();
            if request.edge_from_parent {
                if let Some(parent) = self.nodes.get(&parent_id) {
                    problem = parent.inputs.problem.clone();
                    if let Some(latest) = parent.latest_output() {
                        local_context.push(latest.clone());
                    }
                }
            }
            let context_hierarchy_md = build_context_hierarchy_md(&self.nodes, &parents);

            let inputs = NodeInputs {
                problem,
                task: request.task,
                local_context,
                context_hierarchy_md,
                exploration_questions: None,
                worker_phase: None,
            };
            debug!(parent_id, child_id, kind = %request.kind, "spawning child node");
            self.register_node(AgentNode::new(child_id, request.kind, inputs, parents));

            if let Some(parent) = self.nodes.get_mut(&parent_id) {
                parent.children.push(child_id);
            }
            if request.edge_from_parent {
                dependents.push(child_id);
            }
        }

        if !dependents.is_empty() {
            if let Some(parent) = self.nodes.get_mut(&parent_id) {
                parent.pending_children.extend(dependents);
                parent.status = NodeStatus::Waiting;
            }
        }
    }

    /// Propagate a completed node's output to its parents. A parent whose
    /// last pending child completes becomes runnable again; a parent with
    /// other children still pending stays blocked.
    fn handle_child_completion(&mut self, node_id: NodeId) {
        let Some(node) = self.nodes.get(&node_id) else {
            return;
        };
        if node.is_waiting() {
            return;
        }
        let Some(output) = node.latest_output() else {
            return;
        };

        let mut propagated = output.clone();
        propagated.request_index = node.inputs.task.request_index;
        let parents = node.parents.clone();

        for parent_id in parents {
            let Some(parent) = self.nodes.get_mut(&parent_id) else {
                continue;
            };
            parent.inputs.local_context.push(propagated.clone());
            parent.pending_children.remove(&node_id);
            if parent.pending_children.is_empty() && parent.is_waiting() {
                parent.status = NodeStatus::Pending;
                self.stack.push(parent_id);
                debug!(parent_id, child_id = node_id, "parent unblocked");
            }
        }
    }
}

/// Render the final run report as Markdown.
pub fn render_final_report(problem: &str, output: Option<&AgentOutput>, kb: &KnowledgeBase) -> String {
    let answer = output
        .map(|out| match out.normalized.as_attempt() {
            Some(attempt) => attempt.final_answer_md.clone(),
            None => out.raw_text.clone(),
        })
        .filter(|text| !text.trim().is_empty())
        .unwrap_or_else(|| "No solution was produced.".to_string());

    let appendix = if kb.is_empty() {
        "No KB entries.".to_string()
    } else {
        kb.render_appendix_lines().join("\n")
    };

    format!("# Problem\n{problem}\n\n# Solution\n{answer}\n\n# KB Appendix\n{appendix}\n")
}

/// End-to-end entry point used by the CLI: read the problem, run it against
/// a named configuration, and write (or print) the rendered report. Returns
/// whether the run completed.
pub async fn run_problem(
    input_path: &Path,
    output_path: Option<&Path>,
    config_name: &str,
    trace_path: Option<&Path>,
    max_steps: Option<u32>,
) -> anyhow::Result<bool> {
    let problem = std::fs::read_to_string(input_path)
        .with_context(|| format!("failed to read problem file {}", input_path.display()))?
        .trim()
        .to_string();

    let mut config = get_config(config_name)?;
    if let Some(max_steps) = max_steps {
        config.orchestrator.max_total_steps = max_steps;
    }

    let trace = TraceLogger::new(trace_path);
    let mut runtime = Runtime::new(config, Arc::new(OpenRouterFactory), trace);
    let report = runtime.run(&problem).await?;
    info!(
        completed = report.completed,
        steps = report.steps_used,
        kb_entries = runtime.kb().len(),
        "run finished"
    );

    let rendered = render_final_report(&problem, report.output.as_ref(), runtime.kb());
    match output_path {
        Some(path) => {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).with_context(|| {
                        format!("failed to create output directory {}", parent.display())
                    })?;
                }
            }
            std::fs::write(path, &rendered)
                .with_context(|| format!("failed to write report to {}", path.display()))?;
        }
        None => println!("{rendered}"),
    }
    Ok(report.completed)
}
