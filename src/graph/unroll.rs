//! Recurrent expansion: rewrites a graph containing recurrence markers into
//! an explicit chain of time-step copies.
//!
//! The base graph is never mutated; unrolling produces a fresh arena, so the
//! original can be unrolled again at a different length. Trainable variables
//! (and their buffer offsets) are NOT copied: every step's operator nodes
//! are rewired to the single shared variable node and the unrolled graph
//! clones the base graph's variable-store handle, so gradient writes from an
//! unrolled backward pass land where the base graph's optimizer reads them.
//! Feed nodes ARE copied per step, one bind slot per time step; per-step
//! cost copies are merged into one scalar cost node using the configured
//! aggregation rule.

use crate::error::GradnetError;
use crate::graph::node::{Node, NodeId, NodeKind, F_COST};
use crate::graph::{topo, Graph};
use crate::config::CostAggregation;
use crate::ops::{infer_shape, OpKind};

impl Graph {
    /// Unrolls a recurrent graph into `len` chained time-step copies.
    ///
    /// Step `t`'s reference to a recurrence placeholder resolves to step
    /// `t - 1`'s copy of the placeholder's feedback node; step 0 resolves to
    /// the original initial-state leaf (shared, and trainable when it is a
    /// variable). Operator shapes are re-inferred per step, because step 0
    /// consumes the unbatched initial state while later steps consume a
    /// batched previous-step activation.
    ///
    /// # Errors
    /// `NotRecurrent` when the graph carries no recurrence marker,
    /// `InvalidUnrollLength` when `len` is zero.
    pub fn unroll(&self, len: usize) -> Result<Graph, GradnetError> {
        if len == 0 {
            return Err(GradnetError::InvalidUnrollLength);
        }
        if !self.is_recurrent() {
            return Err(GradnetError::NotRecurrent);
        }
        let n = self.nodes.len();
        let mut new_nodes: Vec<Node> = Vec::new();
        let mut new_consts: Vec<f32> = Vec::new();
        // Base leaf id -> its single shared copy.
        let mut shared: Vec<Option<NodeId>> = vec![None; n];
        // Base id -> copy at the previous step.
        let mut prev: Vec<Option<NodeId>> = vec![None; n];
        // Base cost node -> its per-step copies, in step order.
        let mut cost_copies: Vec<(NodeId, Vec<NodeId>)> = Vec::new();

        for t in 0..len {
            let mut cur: Vec<Option<NodeId>> = vec![None; n];
            for i in 0..n {
                let node = &self.nodes[i];
                let new_id = match node.kind {
                    NodeKind::Var | NodeKind::Const => {
                        if t > 0 {
                            if let Some(f) = node.pre {
                                // Previous-step state threading.
                                cur[i] = prev[f];
                                continue;
                            }
                        }
                        match shared[i] {
                            Some(id) => id,
                            None => {
                                let mut c = node.clone();
                                c.pre = None;
                                c.uses = 0;
                                if node.is_const() {
                                    c.offset = new_consts.len();
                                    new_consts.extend_from_slice(
                                        &self.consts[node.offset..node.offset + node.len()],
                                    );
                                }
                                let id = new_nodes.len();
                                new_nodes.push(c);
                                shared[i] = Some(id);
                                id
                            }
                        }
                    }
                    NodeKind::Feed => {
                        let mut c = node.clone();
                        c.pre = None;
                        c.uses = 0;
                        let id = new_nodes.len();
                        new_nodes.push(c);
                        id
                    }
                    NodeKind::Op(op) => {
                        let operands: Vec<NodeId> = node
                            .operands
                            .iter()
                            .map(|&j| {
                                cur[j].ok_or(GradnetError::InternalError(
                                    "operand not yet copied during unroll".to_string(),
                                ))
                            })
                            .collect::<Result<_, _>>()?;
                        let refs: Vec<&Node> =
                            operands.iter().map(|&id| &new_nodes[id]).collect();
                        let (dims, batched) = infer_shape(op, &refs)?;
                        let mut c = node.clone();
                        c.operands = operands;
                        c.dims = dims;
                        c.batched = batched;
                        c.pre = None;
                        c.uses = 0;
                        let id = new_nodes.len();
                        if c.flags & F_COST != 0 {
                            c.flags &= !F_COST;
                            match cost_copies.iter_mut().find(|(base, _)| *base == i) {
                                Some((_, copies)) => copies.push(id),
                                None => cost_copies.push((i, vec![id])),
                            }
                        }
                        new_nodes.push(c);
                        id
                    }
                };
                cur[i] = Some(new_id);
            }
            prev = cur;
        }

        // One aggregated scalar cost per base cost node.
        let agg_op = match self.config.cost_aggregation {
            CostAggregation::Mean => OpKind::Avg,
            CostAggregation::Sum => OpKind::Sum,
        };
        for (base, copies) in &cost_copies {
            let mut agg = Node::leaf(NodeKind::Op(agg_op), Vec::new(), false);
            agg.operands = copies.clone();
            agg.flags = self.nodes[*base].flags;
            agg.label = self.nodes[*base].label;
            new_nodes.push(agg);
        }

        let order: Vec<NodeId> = (0..new_nodes.len()).collect();
        let uses = topo::count_uses(&new_nodes, &order);
        for (node, &u) in new_nodes.iter_mut().zip(uses.iter()) {
            node.uses = u;
        }

        log::debug!(
            "unrolled {} base node(s) to {} node(s) over {} step(s)",
            n,
            new_nodes.len(),
            len
        );
        Ok(Graph::from_parts(
            new_nodes,
            self.var_store(),
            new_consts,
            self.config.clone(),
            self.rng.clone(),
            self.batch,
            false,
        ))
    }
}

#[cfg(test)]
#[path = "unroll_test.rs"]
mod tests;
