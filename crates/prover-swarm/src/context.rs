//! Ancestor-context assembly for freshly spawned nodes.
//!
//! When a child is created it receives a rendered summary of the chain of
//! tasks above it, so prompts can situate a sub-problem inside the larger
//! effort without shipping the entire graph.

use std::collections::HashMap;

use crate::graph::{AgentNode, NodeId};
use crate::text::clip;

/// How many ancestors a hierarchy walk collects before stopping.
pub const CONTEXT_HIERARCHY_MAX_DEPTH: usize = 8;
/// Per-ancestor clip applied to the rendered problem text.
pub const CONTEXT_HIERARCHY_PROBLEM_CHARS: usize = 600;

/// Render the ancestor chains above `parent_ids` as an indented Markdown
/// list, root first. Multi-parent nodes follow the smallest parent id so the
/// walk is deterministic.
pub fn build_context_hierarchy_md(
    nodes: &HashMap<NodeId, AgentNode>,
    parent_ids: &[NodeId],
) -> String {
    if parent_ids.is_empty() {
        return "None.".to_string();
    }

    let mut lines: Vec<String> = Vec::new();
    for parent_id in parent_ids {
        let mut chain: Vec<&AgentNode> = Vec::new();
        let mut current = nodes.get(parent_id);
        let mut steps = 0;
        while let Some(node) = current {
            if steps >= CONTEXT_HIERARCHY_MAX_DEPTH {
                break;
            }
            chain.push(node);
            let Some(next_parent) = node.parents.iter().min() else {
                break;
            };
            current = nodes.get(next_parent);
            steps += 1;
        }
        chain.reverse();

        for (depth, node) in chain.iter().enumerate() {
            let problem = if node.inputs.task.problem.is_empty() {
                &node.inputs.problem
            } else {
                &node.inputs.task.problem
            };
            let label = match node.inputs.task.goal {
                Some(goal) => format!("{}#{} ({goal})", node.kind, node.id),
                None => format!("{}#{}", node.kind, node.id),
            };
            let indent = "  ".repeat(depth);
            let problem_text = clip(problem, CONTEXT_HIERARCHY_PROBLEM_CHARS);
            lines.push(format!("{indent}- **{label}**: {problem_text}"));
        }
    }

    if lines.is_empty() {
        "None.".to_string()
    } else {
        lines.join("\n")
    }
}
