//! Topological scheduling of graph nodes.
//!
//! Produces a linear order in which every operand precedes every consumer;
//! the reverse of this order drives backpropagation. Recurrence markers
//! (`Node::pre`) are deliberately NOT treated as edges: they are the one
//! sanctioned form of pseudo-cycle, resolved by the unroller. A true cycle
//! through operand edges indicates a builder defect and is reported as
//! `CycleDetected`.

use crate::error::GradnetError;
use crate::graph::node::{Node, NodeId};

#[derive(Clone, Copy, PartialEq)]
enum Mark {
    Unvisited,
    OnStack,
    Done,
}

/// Returns the nodes reachable from `roots` through operand edges, in
/// topological order (operands first). Ties are broken by creation order:
/// roots and operands are visited in the order given, which makes the result
/// deterministic for a fixed arena.
pub(crate) fn order(nodes: &[Node], roots: &[NodeId]) -> Result<Vec<NodeId>, GradnetError> {
    let mut marks = vec![Mark::Unvisited; nodes.len()];
    let mut sorted = Vec::with_capacity(nodes.len());

    // Iterative post-order DFS; the explicit stack carries (node, next
    // operand index) so deep graphs cannot overflow the call stack.
    let mut stack: Vec<(NodeId, usize)> = Vec::new();
    for &root in roots {
        if marks[root] == Mark::Done {
            continue;
        }
        stack.push((root, 0));
        marks[root] = Mark::OnStack;
        while let Some(&mut (id, ref mut next)) = stack.last_mut() {
            let operands = &nodes[id].operands;
            if *next < operands.len() {
                let child = operands[*next];
                *next += 1;
                match marks[child] {
                    Mark::Unvisited => {
                        marks[child] = Mark::OnStack;
                        stack.push((child, 0));
                    }
                    Mark::OnStack => {
                        return Err(GradnetError::CycleDetected { node: child });
                    }
                    Mark::Done => {}
                }
            } else {
                marks[id] = Mark::Done;
                sorted.push(id);
                stack.pop();
            }
        }
    }
    log::trace!("topological order over {} node(s): {:?}", sorted.len(), sorted);
    Ok(sorted)
}

/// Number of consumers of each node among those in `order`.
pub(crate) fn count_uses(nodes: &[Node], order: &[NodeId]) -> Vec<u32> {
    let mut uses = vec![0u32; nodes.len()];
    for &id in order {
        for &op in &nodes[id].operands {
            uses[op] += 1;
        }
    }
    uses
}
