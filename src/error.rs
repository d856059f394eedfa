use thiserror::Error;

use crate::eval::RnnState;

/// Custom error type for the gradnet engine.
///
/// Structural errors (shapes, arity, missing cost node, cycles, unroll on a
/// non-recurrent graph) are raised at construction/unroll time; binding and
/// lookup errors at bind time. Numeric divergence (NaN/Inf) is deliberately
/// not trapped here.
#[derive(Error, Debug)]
pub enum GradnetError {
    #[error("Shape mismatch: expected {expected:?}, got {actual:?} during operation {operation}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
        operation: String,
    },

    #[error("Operator {op} expects {expected} operand(s), got {actual}")]
    ArityMismatch {
        op: &'static str,
        expected: String,
        actual: usize,
    },

    #[error("Incompatible operand shapes for {op}: {shape1:?} and {shape2:?}")]
    IncompatibleShapes {
        op: &'static str,
        shape1: Vec<usize>,
        shape2: Vec<usize>,
    },

    #[error("Operand index {index} is not a node of this graph (node count {node_count})")]
    InvalidOperand { index: usize, node_count: usize },

    #[error("Network assembly requires the cost node to carry the COST flag")]
    MissingCostFlag,

    #[error("Cost node must be scalar, got shape {dims:?}")]
    NonScalarCost { dims: Vec<usize> },

    #[error("Cycle detected in the computation graph at node {node}")]
    CycleDetected { node: usize },

    #[error("Graph contains no recurrence marker; nothing to unroll")]
    NotRecurrent,

    #[error("Unroll length must be positive")]
    InvalidUnrollLength,

    #[error("No node matches flags {flags:#x} and label {label}")]
    NodeNotFound { flags: u32, label: i32 },

    #[error("{matches} nodes match flags {flags:#x} and label {label}; expected exactly one")]
    AmbiguousNode {
        flags: u32,
        label: i32,
        matches: usize,
    },

    #[error("Feed bind expects {expected} buffer(s) for flags {flags:#x} label {label}, got {actual}")]
    FeedArityMismatch {
        flags: u32,
        label: i32,
        expected: usize,
        actual: usize,
    },

    #[error("Feed buffer for node {node} has length {actual}, expected {expected}")]
    FeedSizeMismatch {
        node: usize,
        expected: usize,
        actual: usize,
    },

    #[error("Feed node {node} has no bound data for this forward pass")]
    UnboundFeed { node: usize },

    #[error("Invalid recurrent-feeding transition: {operation} called in state {state:?}")]
    InvalidRnnState {
        operation: &'static str,
        state: RnnState,
    },

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Model I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Model serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
