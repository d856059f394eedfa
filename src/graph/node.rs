//! Node representation: one value-or-operation vertex of the computational
//! graph, owned by an arena and referenced by integer identity.

use serde::{Deserialize, Serialize};

use crate::ops::OpKind;

/// Stable integer identity of a node within its owning graph arena.
pub type NodeId = usize;

/// External role: node is an input feed.
pub const F_IN: u32 = 0x1;
/// External role: node is a network output.
pub const F_OUT: u32 = 0x2;
/// External role: node is a ground-truth feed.
pub const F_TRUTH: u32 = 0x4;
/// External role: node is a scalar cost.
pub const F_COST: u32 = 0x8;

/// What a node is, structurally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    /// Activation populated by the caller before each forward pass.
    Feed,
    /// Trainable variable; value and gradient slots in the shared [`crate::buffer::VarStore`].
    Var,
    /// Constant; value slot in the graph-owned constant buffer, no gradient.
    Const,
    /// Computed node applying an operator to its operands.
    Op(OpKind),
}

/// A single vertex of the computational graph.
///
/// `dims` excludes nothing: for batched nodes `dims[0]` is the current batch
/// size and is rewritten by `set_batch_size`; an empty `dims` means scalar.
/// `operands` are indices into the owning arena; operands always precede
/// their consumers once a graph is assembled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub kind: NodeKind,
    pub operands: Vec<NodeId>,
    pub dims: Vec<usize>,
    /// Whether `dims[0]` tracks the batch size.
    pub batched: bool,
    /// External role bits (`F_IN` | `F_OUT` | `F_TRUTH` | `F_COST`).
    pub flags: u32,
    /// External label matching a node to caller data at bind time.
    pub label: i32,
    /// Recurrence marker: this node's value is "the previous time step's
    /// value of node `pre`". Resolved only by the unroller or by continuous
    /// feeding; never a true edge of the DAG.
    pub pre: Option<NodeId>,
    /// Offset into the collated variable or constant buffer (leaves only).
    pub offset: usize,
    /// Number of consumers, computed at assembly.
    #[serde(skip)]
    pub uses: u32,
}

impl Node {
    pub(crate) fn leaf(kind: NodeKind, dims: Vec<usize>, batched: bool) -> Self {
        Node {
            kind,
            operands: Vec::new(),
            dims,
            batched,
            flags: 0,
            label: 0,
            pre: None,
            offset: 0,
            uses: 0,
        }
    }

    /// Total element count under the current batch size (scalar = 1).
    pub fn len(&self) -> usize {
        self.dims.iter().product()
    }

    /// Element count of a single sample (batch dimension excluded).
    pub fn len_per_sample(&self) -> usize {
        if self.batched {
            self.dims[1..].iter().product()
        } else {
            self.len()
        }
    }

    pub fn is_scalar(&self) -> bool {
        self.dims.is_empty()
    }

    pub fn is_feed(&self) -> bool {
        self.kind == NodeKind::Feed
    }

    pub fn is_var(&self) -> bool {
        self.kind == NodeKind::Var
    }

    pub fn is_const(&self) -> bool {
        self.kind == NodeKind::Const
    }

    /// Flag/label match used by `find`, `feed_bind` and cost selection.
    /// A zero `flags` argument matches any role.
    pub fn matches(&self, flags: u32, label: i32) -> bool {
        (flags == 0 || self.flags & flags != 0) && self.label == label
    }
}
