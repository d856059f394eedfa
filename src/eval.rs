//! # Forward/backward evaluation (`eval`)
//!
//! Executes each node's operator in the cached topological order (forward)
//! and each operator's local derivative rule in reverse order (backward),
//! accumulating gradients into shared predecessor slots. Evaluation is
//! single-threaded and synchronous: the fixed order is what makes gradient
//! accumulation correct, since a node's adjoint is complete before the node
//! propagates its own rule.
//!
//! Also hosts the continuous-feeding state machine for recurrent graphs,
//! which carries hidden state across repeated single-step evaluations inside
//! the same buffers, without unrolling.

use std::mem;
use std::rc::Rc;

use crate::buffer::VarStore;
use crate::error::GradnetError;
use crate::graph::node::{Node, NodeId, NodeKind, F_COST, F_OUT, F_TRUTH};
use crate::graph::Graph;
use crate::ops::{backward, forward};

/// Evaluation mode, passed explicitly into every forward pass and consulted
/// only by mode-sensitive operators (dropout, switch). Replaces a mutable
/// per-graph train/eval flag so evaluation stays side-effect-free.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Train,
    Eval,
}

/// Continuous-feeding lifecycle of a recurrent graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RnnState {
    Idle,
    Started,
    Stepping,
    Ended,
}

/// Resolves a node's current value: activation buffer for feeds/operators,
/// collated slot for variables/constants, or the continuous-feeding override
/// for recurrence placeholders while a stream is active.
fn node_value<'a>(
    nodes: &'a [Node],
    var_x: &'a [f32],
    consts: &'a [f32],
    act: &'a [Vec<f32>],
    state: &'a [Option<Vec<f32>>],
    rnn_active: bool,
    id: NodeId,
) -> &'a [f32] {
    if rnn_active {
        if let Some(ref v) = state[id] {
            return v;
        }
    }
    let node = &nodes[id];
    match node.kind {
        NodeKind::Var => &var_x[node.offset..node.offset + node.len()],
        NodeKind::Const => &consts[node.offset..node.offset + node.len()],
        _ => &act[id],
    }
}

impl Graph {
    /// Current continuous-feeding state.
    pub fn rnn_state(&self) -> RnnState {
        self.rnn_state
    }

    fn rnn_active(&self) -> bool {
        matches!(self.rnn_state, RnnState::Started | RnnState::Stepping)
    }

    /// Marks every node reachable backward from `roots` through operand
    /// edges (the nodes a pass over those roots must compute).
    fn mark_ancestors(&self, roots: &[NodeId]) -> Vec<bool> {
        let mut marked = vec![false; self.nodes.len()];
        let mut stack: Vec<NodeId> = roots.to_vec();
        while let Some(id) = stack.pop() {
            if marked[id] {
                continue;
            }
            marked[id] = true;
            stack.extend_from_slice(&self.nodes[id].operands);
        }
        marked
    }

    /// Runs a full forward pass over every node.
    ///
    /// All feed nodes must hold bound data; see [`Graph::feed_bind`].
    pub fn forward(&mut self, mode: Mode) -> Result<(), GradnetError> {
        self.forward_marked(None, mode)
    }

    /// Evaluates only the nodes matching `flags`/`label` (and their
    /// ancestors); returns how many nodes matched. Used to compute outputs
    /// without requiring truth feeds to be bound.
    pub fn eval(&mut self, flags: u32, label: i32, mode: Mode) -> Result<usize, GradnetError> {
        let targets: Vec<NodeId> = self
            .nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.matches(flags, label))
            .map(|(id, _)| id)
            .collect();
        if targets.is_empty() {
            return Ok(0);
        }
        let marked = self.mark_ancestors(&targets);
        self.forward_marked(Some(&marked), mode)?;
        Ok(targets.len())
    }

    fn forward_marked(
        &mut self,
        marked: Option<&[bool]>,
        mode: Mode,
    ) -> Result<(), GradnetError> {
        let vars = Rc::clone(&self.vars);
        let store = vars.borrow();
        let rnn_active = self.rnn_active();
        for i in 0..self.nodes.len() {
            if let Some(m) = marked {
                if !m[i] {
                    continue;
                }
            }
            let op = match self.nodes[i].kind {
                NodeKind::Feed => {
                    if !self.bound[i] {
                        return Err(GradnetError::UnboundFeed { node: i });
                    }
                    continue;
                }
                NodeKind::Var | NodeKind::Const => continue,
                NodeKind::Op(op) => op,
            };
            let mut out = mem::take(&mut self.act[i]);
            let mut aux = mem::take(&mut self.aux[i]);
            let res = {
                let node = &self.nodes[i];
                let ins: Vec<(&Node, &[f32])> = node
                    .operands
                    .iter()
                    .map(|&j| {
                        (
                            &self.nodes[j],
                            node_value(
                                &self.nodes,
                                &store.x,
                                &self.consts,
                                &self.act,
                                &self.state,
                                rnn_active,
                                j,
                            ),
                        )
                    })
                    .collect();
                forward::run(op, node, &ins, &mut out, &mut aux, mode, &mut self.rng)
            };
            self.act[i] = out;
            self.aux[i] = aux;
            res?;
        }
        Ok(())
    }

    /// Backpropagates from `cost_id`: zeroes all gradient slots, seeds the
    /// cost adjoint with 1.0 and walks the schedule in reverse, summing each
    /// operand's contributions (never overwriting) into its adjoint or into
    /// the shared variable gradient buffer.
    ///
    /// `mode` must match the preceding forward pass so mode-sensitive
    /// operators replay the same behavior.
    pub fn backward_from(&mut self, cost_id: NodeId, mode: Mode) -> Result<(), GradnetError> {
        for a in self.adj.iter_mut() {
            a.fill(0.0);
        }
        let vars = Rc::clone(&self.vars);
        let mut store = vars.borrow_mut();
        store.zero_grad();
        let VarStore { x, g } = &mut *store;
        let x: &[f32] = x;

        let marked = self.mark_ancestors(&[cost_id]);
        if self.adj[cost_id].len() != 1 {
            return Err(GradnetError::NonScalarCost {
                dims: self.nodes[cost_id].dims.clone(),
            });
        }
        self.adj[cost_id][0] = 1.0;

        let rnn_active = self.rnn_active();
        for i in (0..self.nodes.len()).rev() {
            if !marked[i] {
                continue;
            }
            let op = match self.nodes[i].kind {
                NodeKind::Op(op) => op,
                _ => continue,
            };
            let gy = mem::take(&mut self.adj[i]);
            let mut gin: Vec<Vec<f32>> = self.nodes[i]
                .operands
                .iter()
                .map(|&j| vec![0.0; self.nodes[j].len()])
                .collect();
            let res = {
                let node = &self.nodes[i];
                let ins: Vec<(&Node, &[f32])> = node
                    .operands
                    .iter()
                    .map(|&j| {
                        (
                            &self.nodes[j],
                            node_value(
                                &self.nodes,
                                x,
                                &self.consts,
                                &self.act,
                                &self.state,
                                rnn_active,
                                j,
                            ),
                        )
                    })
                    .collect();
                backward::run(op, node, &ins, &self.act[i], &gy, &self.aux[i], mode, &mut gin)
            };
            self.adj[i] = gy;
            res?;
            let operands = self.nodes[i].operands.clone();
            for (idx, &j) in operands.iter().enumerate() {
                match self.nodes[j].kind {
                    NodeKind::Var => {
                        let off = self.nodes[j].offset;
                        for (k, v) in gin[idx].iter().enumerate() {
                            g[off + k] += v;
                        }
                    }
                    NodeKind::Const => {}
                    _ => {
                        for (k, v) in gin[idx].iter().enumerate() {
                            self.adj[j][k] += v;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Computes the cost selected by `cost_label` and optionally its
    /// gradients.
    ///
    /// Evaluates only the cost node's ancestors; a graph carrying several
    /// cost nodes (adversarial or multi-objective setups) selects one by
    /// label, and the call fails if zero or more than one matches.
    pub fn cost(
        &mut self,
        cost_label: i32,
        with_grad: bool,
        mode: Mode,
    ) -> Result<f32, GradnetError> {
        let cost_id = self.find(F_COST, cost_label)?;
        let marked = self.mark_ancestors(&[cost_id]);
        self.forward_marked(Some(&marked), mode)?;
        let c = self.act[cost_id][0];
        if with_grad {
            self.backward_from(cost_id, mode)?;
        }
        Ok(c)
    }

    /// Counts, over the current batch, the samples whose output argmax
    /// disagrees with the truth argmax. A derived diagnostic over
    /// already-computed values: run [`Graph::eval`] or [`Graph::cost`]
    /// first. Rows whose truth is all zero are skipped.
    pub fn class_error(&self, label: i32) -> Result<usize, GradnetError> {
        let out_id = self.find(F_OUT, label)?;
        let truth_id = self.find(F_TRUTH, label)?;
        let n = self.nodes[out_id].len_per_sample();
        if n != self.nodes[truth_id].len_per_sample() {
            return Err(GradnetError::ShapeMismatch {
                expected: self.nodes[out_id].dims.clone(),
                actual: self.nodes[truth_id].dims.clone(),
                operation: "class_error".to_string(),
            });
        }
        let out = self.get_value(out_id)?;
        let truth = self.get_value(truth_id)?;
        let mut errors = 0usize;
        for (orow, trow) in out.chunks_exact(n).zip(truth.chunks_exact(n)) {
            let tmax = trow.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
            if tmax <= 0.0 {
                continue;
            }
            if argmax(orow) != argmax(trow) {
                errors += 1;
            }
        }
        Ok(errors)
    }

    /// Identifier of the node whose previous-step value each recurrence
    /// placeholder tracks, paired with the placeholder itself.
    fn recurrent_pairs(&self) -> Vec<(NodeId, NodeId)> {
        self.nodes
            .iter()
            .enumerate()
            .filter_map(|(id, n)| n.pre.map(|f| (id, f)))
            .collect()
    }

    /// Prepares a recurrent graph for continuous feeding: resets every
    /// recurrence placeholder to its initial value and activates the state
    /// overrides. Requires batch size 1 (single-sample streaming).
    pub fn rnn_start(&mut self) -> Result<(), GradnetError> {
        if !self.is_recurrent() {
            return Err(GradnetError::NotRecurrent);
        }
        if self.batch != 1 {
            return Err(GradnetError::ConfigurationError(
                "continuous feeding requires batch size 1".to_string(),
            ));
        }
        if !matches!(self.rnn_state, RnnState::Idle | RnnState::Ended) {
            return Err(GradnetError::InvalidRnnState {
                operation: "rnn_start",
                state: self.rnn_state,
            });
        }
        for (s, _) in self.recurrent_pairs() {
            let init = self.get_value(s)?;
            self.state[s] = Some(init);
        }
        self.rnn_state = RnnState::Started;
        Ok(())
    }

    /// Feeds one time step: runs a forward pass and carries each feedback
    /// value into its placeholder's override, so the next step sees this
    /// step's hidden state. The caller may stream indefinitely.
    pub fn rnn_step(&mut self, mode: Mode) -> Result<(), GradnetError> {
        if !self.rnn_active() {
            return Err(GradnetError::InvalidRnnState {
                operation: "rnn_step",
                state: self.rnn_state,
            });
        }
        self.forward(mode)?;
        for (s, f) in self.recurrent_pairs() {
            let carried = self.get_value(f)?;
            self.state[s] = Some(carried);
        }
        self.rnn_state = RnnState::Stepping;
        Ok(())
    }

    /// Ends a continuous-feeding stream, dropping the state overrides.
    pub fn rnn_end(&mut self) -> Result<(), GradnetError> {
        if !self.rnn_active() {
            return Err(GradnetError::InvalidRnnState {
                operation: "rnn_end",
                state: self.rnn_state,
            });
        }
        for s in self.state.iter_mut() {
            *s = None;
        }
        self.rnn_state = RnnState::Ended;
        Ok(())
    }

    /// Copies out a node's current gradient: the shared slot for variables,
    /// the adjoint buffer otherwise.
    pub fn get_grad(&self, id: NodeId) -> Result<Vec<f32>, GradnetError> {
        if id >= self.nodes.len() {
            return Err(GradnetError::InvalidOperand {
                index: id,
                node_count: self.nodes.len(),
            });
        }
        let node = &self.nodes[id];
        Ok(match node.kind {
            NodeKind::Var => {
                let store = self.vars.borrow();
                store.g[node.offset..node.offset + node.len()].to_vec()
            }
            _ => self.adj[id].clone(),
        })
    }
}

fn argmax(row: &[f32]) -> usize {
    let mut best = 0usize;
    for (i, &v) in row.iter().enumerate() {
        if v > row[best] {
            best = i;
        }
    }
    best
}

#[cfg(test)]
#[path = "eval_test.rs"]
mod tests;
