//! Flattens a node arena into a latency-balanced execution plan.
//!
//! 1. Depth-first postorder from the root, with three-colour marking so a
//!    back edge (a cycle) is found on the way down.
//! 2. Properties are resolved in that order, so every node sees its inputs'.
//! 3. Latency is accumulated along every path; wherever inputs of a node
//!    arrive with different accumulated latency, a [`LatencyNode`] is put in
//!    front of each early input so all of them line up with the latest one.

use std::collections::HashSet;

use crate::graph::plan::{ExecutionPlan, LatencyCompensation, PlanEntry};
use crate::graph::{GraphError, NodeKey};
use crate::node::{Node, NodeId, NodeProperties};
use crate::nodes::latency::{COMPENSATION_SALT, LatencyNode};

type Slots = Vec<Option<Box<dyn Node>>>;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    New,
    Visiting,
    Done,
}

fn filled(slots: &Slots, key: NodeKey) -> Result<&dyn Node, GraphError> {
    slots
        .get(key.0)
        .ok_or(GraphError::UnknownNode(key))?
        .as_deref()
        .ok_or(GraphError::UnfilledSlot(key))
}

// --- Postorder with cycle detection ---

fn postorder(slots: &Slots, root: NodeKey) -> Result<Vec<NodeKey>, GraphError> {
    filled(slots, root)?;
    let mut marks = vec![Mark::New; slots.len()];
    let mut order = Vec::new();
    let mut stack = vec![(root, 0usize)];
    marks[root.0] = Mark::Visiting;

    while let Some(top) = stack.len().checked_sub(1) {
        let (key, next) = stack[top];
        let inputs = filled(slots, key)?.direct_inputs();
        if let Some(&input) = inputs.get(next) {
            stack[top].1 += 1;
            filled(slots, input)?;
            match marks[input.0] {
                Mark::New => {
                    marks[input.0] = Mark::Visiting;
                    stack.push((input, 0));
                }
                Mark::Visiting => return Err(GraphError::CycleDetected(input)),
                Mark::Done => {}
            }
        } else {
            marks[key.0] = Mark::Done;
            order.push(key);
            stack.pop();
        }
    }
    Ok(order)
}

// --- Property resolution ---

fn resolve_properties(
    slots: &Slots,
    order: &[NodeKey],
) -> Result<Vec<Option<NodeProperties>>, GraphError> {
    let mut resolved: Vec<Option<NodeProperties>> = vec![None; slots.len()];
    let mut ids = HashSet::with_capacity(order.len());
    for &key in order {
        let node = filled(slots, key)?;
        let inputs: Vec<NodeProperties> =
            node.direct_inputs().iter().filter_map(|k| resolved[k.0]).collect();
        let properties = node.properties(&inputs);
        if !ids.insert(properties.node_id) {
            return Err(GraphError::DuplicateNodeId(properties.node_id));
        }
        resolved[key.0] = Some(properties);
    }
    Ok(resolved)
}

// --- Plan emission with latency balancing ---

pub(super) fn build(mut slots: Slots, root: NodeKey) -> Result<ExecutionPlan, GraphError> {
    let order = postorder(&slots, root)?;
    let resolved = resolve_properties(&slots, &order)?;

    let mut entries: Vec<PlanEntry> = Vec::with_capacity(order.len());
    let mut accumulated: Vec<usize> = Vec::with_capacity(order.len());
    let mut plan_index = vec![usize::MAX; slots.len()];
    let mut compensations = Vec::new();
    let mut ids: HashSet<NodeId> = resolved.iter().flatten().map(|p| p.node_id).collect();

    for &key in &order {
        let (Some(node), Some(properties)) = (slots[key.0].take(), resolved[key.0]) else {
            return Err(GraphError::UnfilledSlot(key));
        };
        let mut inputs: Vec<usize> = node.direct_inputs().iter().map(|k| plan_index[k.0]).collect();
        let latest = inputs.iter().map(|&i| accumulated[i]).max().unwrap_or(0);

        for (slot, input) in inputs.iter_mut().enumerate() {
            let behind = latest - accumulated[*input];
            if behind == 0 {
                continue;
            }
            let source = entries[*input].properties;
            let id = NodeId::derived(
                &[properties.node_id.0, source.node_id.0, slot as u64],
                COMPENSATION_SALT,
            );
            if !ids.insert(id) {
                return Err(GraphError::DuplicateNodeId(id));
            }
            let delay = LatencyNode::compensating(id, behind);
            let delay_properties = delay.properties(&[source]);
            compensations.push(LatencyCompensation {
                consumer: properties.node_id,
                input: source.node_id,
                node: id,
                delay_samples: behind,
            });
            #[cfg(feature = "tracing")]
            tracing::debug!(
                "graph_balance: delay {} -> {} by {behind} samples",
                source.node_id,
                properties.node_id
            );
            entries.push(PlanEntry {
                node: Box::new(delay),
                properties: delay_properties,
                inputs: vec![*input],
            });
            accumulated.push(latest);
            *input = entries.len() - 1;
        }

        plan_index[key.0] = entries.len();
        accumulated.push(latest + properties.latency_num_samples);
        entries.push(PlanEntry {
            node,
            properties,
            inputs,
        });
    }

    #[cfg(feature = "tracing")]
    {
        let unreachable = slots.iter().filter(|s| s.is_some()).count();
        if unreachable > 0 {
            tracing::debug!("graph_build: dropped {unreachable} nodes not reachable from the root");
        }
        tracing::debug!(
            "graph_build: {} steps, {} latency compensations",
            entries.len(),
            compensations.len()
        );
    }
    drop(slots);

    let latency = accumulated.last().copied().unwrap_or(0);
    Ok(ExecutionPlan::new(entries, compensations, latency))
}
