//! # Graph construction and ownership (`graph`)
//!
//! Nodes live in a single owning arena indexed by [`NodeId`]; operand
//! "references" are indices into that arena, so there are no pointer cycles
//! to manage and serialization is a matter of writing the arena out.
//!
//! [`GraphBuilder`] is the mutable arena used while assembling a network.
//! [`Graph::assemble`] walks backward from the cost node plus any extra
//! roots, deduplicates, orders the reachable nodes
//! topologically and collates variable/constant values into flat buffers.
//! From then on the node order IS the cached forward schedule; it only
//! changes when a new graph is derived (assembly or unrolling), never in
//! place.

pub mod node;
pub(crate) mod topo;
pub mod unroll;

use std::cell::RefCell;
use std::rc::Rc;

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::buffer::VarStore;
use crate::config::GraphConfig;
use crate::error::GradnetError;
use crate::eval::RnnState;
use crate::ops::{infer_shape, OpKind};

pub use node::{Node, NodeId, NodeKind, F_COST, F_IN, F_OUT, F_TRUTH};

/// Mutable node arena used while a network is being assembled.
///
/// Layer builders append feeds, variables, constants and operator
/// applications; [`Graph::assemble`] consumes the builder. Initial values of
/// variables and constants are kept per-node here and collated into flat
/// buffers at assembly time.
pub struct GraphBuilder {
    pub(crate) nodes: Vec<Node>,
    /// Initial data for Var/Const nodes, parallel to `nodes` (empty vec for
    /// feeds and operators).
    pub(crate) init: Vec<Vec<f32>>,
    pub(crate) config: GraphConfig,
    rng: StdRng,
}

impl GraphBuilder {
    pub fn new(config: GraphConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        GraphBuilder {
            nodes: Vec::new(),
            init: Vec::new(),
            config,
            rng,
        }
    }

    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    /// The builder-owned seeded random stream (weight initialization).
    pub fn rng(&mut self) -> &mut StdRng {
        &mut self.rng
    }

    pub fn n_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    fn push(&mut self, node: Node, init: Vec<f32>) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(node);
        self.init.push(init);
        id
    }

    fn check_id(&self, id: NodeId) -> Result<(), GradnetError> {
        if id < self.nodes.len() {
            Ok(())
        } else {
            Err(GradnetError::InvalidOperand {
                index: id,
                node_count: self.nodes.len(),
            })
        }
    }

    /// Creates a feed node of per-sample shape `dims`; the batch dimension is
    /// prepended and tracks the current batch size.
    pub fn feed(&mut self, dims: &[usize]) -> NodeId {
        let mut full = Vec::with_capacity(dims.len() + 1);
        full.push(1);
        full.extend_from_slice(dims);
        self.push(Node::leaf(NodeKind::Feed, full, true), Vec::new())
    }

    /// Creates a trainable variable with explicit initial values.
    pub fn var(&mut self, dims: &[usize], init: Vec<f32>) -> Result<NodeId, GradnetError> {
        let len: usize = dims.iter().product();
        if init.len() != len {
            return Err(GradnetError::ShapeMismatch {
                expected: dims.to_vec(),
                actual: vec![init.len()],
                operation: "var".to_string(),
            });
        }
        Ok(self.push(Node::leaf(NodeKind::Var, dims.to_vec(), false), init))
    }

    /// Creates a constant node with explicit values.
    pub fn constant(&mut self, dims: &[usize], values: Vec<f32>) -> Result<NodeId, GradnetError> {
        let len: usize = dims.iter().product();
        if values.len() != len {
            return Err(GradnetError::ShapeMismatch {
                expected: dims.to_vec(),
                actual: vec![values.len()],
                operation: "constant".to_string(),
            });
        }
        Ok(self.push(Node::leaf(NodeKind::Const, dims.to_vec(), false), values))
    }

    /// Creates a scalar constant.
    pub fn scalar(&mut self, value: f32) -> NodeId {
        self.push(Node::leaf(NodeKind::Const, vec![], false), vec![value])
    }

    /// Applies an operator to operand nodes, validating arity and shape
    /// compatibility and inferring the result shape.
    ///
    /// # Errors
    /// `ArityMismatch` / `IncompatibleShapes` on contract violations,
    /// `InvalidOperand` if an operand id does not belong to this arena.
    pub fn apply(&mut self, op: OpKind, operands: &[NodeId]) -> Result<NodeId, GradnetError> {
        for &id in operands {
            self.check_id(id)?;
        }
        let refs: Vec<&Node> = operands.iter().map(|&id| &self.nodes[id]).collect();
        let (dims, batched) = infer_shape(op, &refs)?;
        let mut node = Node::leaf(NodeKind::Op(op), dims, batched);
        node.operands = operands.to_vec();
        Ok(self.push(node, Vec::new()))
    }

    /// Adds external role flags to a node.
    pub fn set_flags(&mut self, id: NodeId, flags: u32) {
        self.nodes[id].flags |= flags;
    }

    /// Sets the external label used to match the node to caller data.
    pub fn set_label(&mut self, id: NodeId, label: i32) {
        self.nodes[id].label = label;
    }

    /// Marks `state` as a recurrence placeholder whose value at step `t` is
    /// `feedback`'s value at step `t - 1`. `state` must be a leaf (its own
    /// value is the initial state) with the same per-sample size as
    /// `feedback`.
    pub fn set_recurrence(
        &mut self,
        state: NodeId,
        feedback: NodeId,
    ) -> Result<(), GradnetError> {
        self.check_id(state)?;
        self.check_id(feedback)?;
        let s = &self.nodes[state];
        if !(s.is_var() || s.is_const()) {
            return Err(GradnetError::ConfigurationError(
                "recurrence state must be a variable or constant leaf".to_string(),
            ));
        }
        if s.len_per_sample() != self.nodes[feedback].len_per_sample() {
            return Err(GradnetError::ShapeMismatch {
                expected: s.dims.clone(),
                actual: self.nodes[feedback].dims.clone(),
                operation: "set_recurrence".to_string(),
            });
        }
        self.nodes[state].pre = Some(feedback);
        Ok(())
    }
}

/// An assembled network: node arena in topological order, collated buffers
/// and the evaluation workspace.
///
/// Variable values and gradients sit behind a shared handle so unrolled
/// derivatives of this graph can write gradients the base graph's optimizer
/// sees; constants and activations are owned per graph.
#[derive(Debug)]
pub struct Graph {
    pub(crate) nodes: Vec<Node>,
    pub(crate) vars: Rc<RefCell<VarStore>>,
    pub(crate) consts: Vec<f32>,
    /// Per-node activation buffers (feeds and operators; empty for leaves
    /// that read from the collated buffers).
    pub(crate) act: Vec<Vec<f32>>,
    /// Per-node adjoint buffers for backpropagation.
    pub(crate) adj: Vec<Vec<f32>>,
    /// Per-node scratch (dropout masks, cached softmax rows).
    pub(crate) aux: Vec<Vec<f32>>,
    /// Which feed nodes currently hold caller data.
    pub(crate) bound: Vec<bool>,
    /// Continuous-feeding overrides for recurrence placeholders.
    pub(crate) state: Vec<Option<Vec<f32>>>,
    pub(crate) rnn_state: RnnState,
    pub(crate) batch: usize,
    pub(crate) config: GraphConfig,
    pub(crate) rng: StdRng,
    /// False for unrolled graphs, which hold a non-owning view of the
    /// variable store.
    pub(crate) owns_vars: bool,
}

impl Graph {
    /// Assembles a network from a builder.
    ///
    /// Collects every node reachable by walking operand edges backward from
    /// the scalar `cost` node and the extra `rest` roots (auxiliary outputs
    /// for multi-head or adversarial setups), deduplicates them and fixes
    /// the topological schedule and buffer offsets.
    ///
    /// # Errors
    /// `MissingCostFlag` / `NonScalarCost` if the cost node does not satisfy
    /// its contract; `CycleDetected` for a true operand cycle.
    pub fn assemble(
        builder: GraphBuilder,
        cost: NodeId,
        rest: &[NodeId],
    ) -> Result<Graph, GradnetError> {
        builder.check_id(cost)?;
        for &r in rest {
            builder.check_id(r)?;
        }
        let cost_node = &builder.nodes[cost];
        if cost_node.flags & F_COST == 0 {
            return Err(GradnetError::MissingCostFlag);
        }
        if !cost_node.is_scalar() {
            return Err(GradnetError::NonScalarCost {
                dims: cost_node.dims.clone(),
            });
        }
        if !matches!(cost_node.kind, NodeKind::Op(_)) {
            return Err(GradnetError::ConfigurationError(
                "cost node must be a computed node".to_string(),
            ));
        }

        // Reachability must also pull in recurrence feedback targets; loop
        // until no reached node points outside the set.
        let mut roots: Vec<NodeId> = Vec::with_capacity(1 + rest.len());
        roots.push(cost);
        roots.extend_from_slice(rest);
        let order = loop {
            let order = topo::order(&builder.nodes, &roots)?;
            let mut extra: Vec<NodeId> = Vec::new();
            for &id in &order {
                if let Some(f) = builder.nodes[id].pre {
                    if !order.contains(&f) && !extra.contains(&f) {
                        extra.push(f);
                    }
                }
            }
            if extra.is_empty() {
                break order;
            }
            roots.extend(extra);
        };

        // Remap arena indices to the topological positions.
        let mut remap = vec![usize::MAX; builder.nodes.len()];
        for (new_id, &old_id) in order.iter().enumerate() {
            remap[old_id] = new_id;
        }
        let mut nodes: Vec<Node> = Vec::with_capacity(order.len());
        let mut store = VarStore::new();
        let mut consts: Vec<f32> = Vec::new();
        for &old_id in &order {
            let mut n = builder.nodes[old_id].clone();
            for op in n.operands.iter_mut() {
                *op = remap[*op];
            }
            if let Some(f) = n.pre {
                n.pre = Some(remap[f]);
            }
            match n.kind {
                NodeKind::Var => n.offset = store.push_var(&builder.init[old_id]),
                NodeKind::Const => {
                    n.offset = consts.len();
                    consts.extend_from_slice(&builder.init[old_id]);
                }
                _ => {}
            }
            nodes.push(n);
        }
        let uses = topo::count_uses(&nodes, &(0..nodes.len()).collect::<Vec<_>>());
        for (n, &u) in nodes.iter_mut().zip(uses.iter()) {
            n.uses = u;
        }

        log::debug!(
            "assembled graph: {} node(s), {} variable scalar(s), {} constant scalar(s)",
            nodes.len(),
            store.len(),
            consts.len()
        );
        let config = builder.config;
        let rng = StdRng::seed_from_u64(config.seed);
        Ok(Graph::from_parts(
            nodes,
            Rc::new(RefCell::new(store)),
            consts,
            config,
            rng,
            1,
            true,
        ))
    }

    pub(crate) fn from_parts(
        nodes: Vec<Node>,
        vars: Rc<RefCell<VarStore>>,
        consts: Vec<f32>,
        config: GraphConfig,
        rng: StdRng,
        batch: usize,
        owns_vars: bool,
    ) -> Graph {
        let n = nodes.len();
        let mut act = vec![Vec::new(); n];
        let adj = vec![Vec::new(); n];
        for (i, node) in nodes.iter().enumerate() {
            if matches!(node.kind, NodeKind::Feed | NodeKind::Op(_)) {
                act[i] = vec![0.0; node.len()];
            }
        }
        let mut g = Graph {
            nodes,
            vars,
            consts,
            act,
            adj,
            aux: vec![Vec::new(); n],
            bound: vec![false; n],
            state: vec![None; n],
            rnn_state: RnnState::Idle,
            batch,
            config,
            rng,
            owns_vars,
        };
        g.resize_adjoints();
        g
    }

    fn resize_adjoints(&mut self) {
        for (i, node) in self.nodes.iter().enumerate() {
            self.adj[i] = vec![0.0; node.len()];
        }
    }

    pub fn n_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    pub fn batch_size(&self) -> usize {
        self.batch
    }

    /// Whether the graph contains a recurrence marker.
    pub fn is_recurrent(&self) -> bool {
        self.nodes.iter().any(|n| n.pre.is_some())
    }

    /// Whether this graph owns its variable storage (false for unrolled
    /// views).
    pub fn owns_vars(&self) -> bool {
        self.owns_vars
    }

    /// Shared handle to the collated variable/gradient buffers.
    pub fn var_store(&self) -> Rc<RefCell<VarStore>> {
        Rc::clone(&self.vars)
    }

    /// Total number of trainable scalars.
    pub fn size_var(&self) -> usize {
        self.vars.borrow().len()
    }

    /// Total number of constant scalars.
    pub fn size_const(&self) -> usize {
        self.consts.len()
    }

    /// Sets the mini-batch size, resizing batched activation and adjoint
    /// buffers. Variable and constant buffers are untouched (their offsets
    /// are stable by construction); feed bindings are invalidated because
    /// the expected buffer sizes changed.
    pub fn set_batch_size(&mut self, b: usize) -> Result<(), GradnetError> {
        if b == 0 {
            return Err(GradnetError::ConfigurationError(
                "batch size must be positive".to_string(),
            ));
        }
        if b == self.batch {
            return Ok(());
        }
        log::debug!("batch size {} -> {}", self.batch, b);
        for i in 0..self.nodes.len() {
            if !self.nodes[i].batched {
                continue;
            }
            self.nodes[i].dims[0] = b;
            let len = self.nodes[i].len();
            if matches!(self.nodes[i].kind, NodeKind::Feed | NodeKind::Op(_)) {
                self.act[i].clear();
                self.act[i].resize(len, 0.0);
            }
            self.adj[i].clear();
            self.adj[i].resize(len, 0.0);
            if self.nodes[i].is_feed() {
                self.bound[i] = false;
            }
        }
        self.batch = b;
        Ok(())
    }

    /// Returns the single node matching `flags`/`label`.
    ///
    /// # Errors
    /// `NodeNotFound` when nothing matches, `AmbiguousNode` when more than
    /// one node does; callers that expect a specific node must check both.
    pub fn find(&self, flags: u32, label: i32) -> Result<NodeId, GradnetError> {
        let mut found: Option<NodeId> = None;
        let mut matches = 0usize;
        for (id, node) in self.nodes.iter().enumerate() {
            if node.matches(flags, label) {
                matches += 1;
                found.get_or_insert(id);
            }
        }
        match matches {
            0 => Err(GradnetError::NodeNotFound { flags, label }),
            1 => Ok(found.unwrap()),
            n => Err(GradnetError::AmbiguousNode {
                flags,
                label,
                matches: n,
            }),
        }
    }

    /// Per-sample element count of the single feed node matching
    /// `flags`/`label`.
    pub fn feed_dim(&self, flags: u32, label: i32) -> Result<usize, GradnetError> {
        let id = self.find(flags, label)?;
        Ok(self.nodes[id].len_per_sample())
    }

    /// Binds caller data to every feed node matching `flags`/`label`, one
    /// slice per matching node in node order, and returns how many were
    /// bound so callers can assert the expected arity.
    ///
    /// Data is copied into the nodes' activation buffers and stays bound
    /// until the batch size changes or the nodes are re-bound.
    pub fn feed_bind(
        &mut self,
        flags: u32,
        label: i32,
        data: &[&[f32]],
    ) -> Result<usize, GradnetError> {
        let targets: Vec<NodeId> = self
            .nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.is_feed() && n.matches(flags, label))
            .map(|(id, _)| id)
            .collect();
        if targets.len() != data.len() {
            return Err(GradnetError::FeedArityMismatch {
                flags,
                label,
                expected: targets.len(),
                actual: data.len(),
            });
        }
        for (&id, &buf) in targets.iter().zip(data.iter()) {
            let expected = self.nodes[id].len();
            if buf.len() != expected {
                return Err(GradnetError::FeedSizeMismatch {
                    node: id,
                    expected,
                    actual: buf.len(),
                });
            }
            self.act[id].copy_from_slice(buf);
            self.bound[id] = true;
        }
        Ok(targets.len())
    }

    /// Overwrites a constant node's values (the one sanctioned external
    /// write to the constant buffer).
    pub fn write_const(&mut self, id: NodeId, values: &[f32]) -> Result<(), GradnetError> {
        if id >= self.nodes.len() || !self.nodes[id].is_const() {
            return Err(GradnetError::InvalidOperand {
                index: id,
                node_count: self.nodes.len(),
            });
        }
        let node = &self.nodes[id];
        if values.len() != node.len() {
            return Err(GradnetError::ShapeMismatch {
                expected: node.dims.clone(),
                actual: vec![values.len()],
                operation: "write_const".to_string(),
            });
        }
        self.consts[node.offset..node.offset + values.len()].copy_from_slice(values);
        Ok(())
    }

    /// Copies out a node's current value (activation, variable or constant
    /// slot). Intended for reading outputs after a forward pass.
    pub fn get_value(&self, id: NodeId) -> Result<Vec<f32>, GradnetError> {
        if id >= self.nodes.len() {
            return Err(GradnetError::InvalidOperand {
                index: id,
                node_count: self.nodes.len(),
            });
        }
        let node = &self.nodes[id];
        let store = self.vars.borrow();
        let v = match node.kind {
            NodeKind::Var => store.x[node.offset..node.offset + node.len()].to_vec(),
            NodeKind::Const => self.consts[node.offset..node.offset + node.len()].to_vec(),
            _ => self.act[id].clone(),
        };
        Ok(v)
    }
}

#[cfg(test)]
#[path = "graph_test.rs"]
mod tests;
