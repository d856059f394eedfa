//! # gradnet
//!
//! A minimal neural-network training engine built on a computational-graph
//! automatic-differentiation layer. Nodes live in an arena owned by a
//! [`Graph`]; forward evaluation and reverse-mode differentiation walk a
//! cached topological schedule over that arena. Pseudo-cyclic recurrent
//! structures are expressed with recurrence markers and either unrolled
//! into a bounded DAG sharing weights across time steps, or streamed one
//! step at a time through the continuous-feeding interface.

pub mod buffer;
pub mod config;
pub mod error;
pub mod eval;
pub mod graph;
pub mod io;
pub mod nn;
pub mod ops;
pub mod optim;
pub mod utils;

pub use buffer::VarStore;
pub use config::{CostAggregation, GraphConfig};
pub use error::GradnetError;
pub use eval::{Mode, RnnState};
pub use graph::{Graph, GraphBuilder, Node, NodeId, NodeKind, F_COST, F_IN, F_OUT, F_TRUTH};
pub use ops::OpKind;

// Re-export traits required by public generic functions (grad clipping).
pub use num_traits;
