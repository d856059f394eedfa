//! Layer-construction collaborators: graph-producing functions assembling
//! common sub-graphs (input, linear, dropout, vanilla RNN, cost heads) on
//! top of a [`crate::graph::GraphBuilder`], plus weight initialization.

pub mod init;
pub mod layers;

pub use layers::{cost, dropout, input, linear, rnn, CostType};
