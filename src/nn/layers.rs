//! Common layer builders.
//!
//! Each function appends a small sub-graph to a [`GraphBuilder`] and returns
//! the node to build on. The core only requires that these produce valid DAG
//! fragments; they are conveniences for the tests and for callers, not part
//! of the differentiation machinery.

use crate::error::GradnetError;
use crate::graph::node::{NodeId, F_COST, F_IN, F_OUT, F_TRUTH};
use crate::graph::GraphBuilder;
use crate::nn::init;
use crate::ops::OpKind;

/// Cost head attached by [`cost`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CostType {
    /// Softmax output with multi-class cross-entropy cost.
    CrossEntropy,
    /// Linear output with mean squared error cost.
    MeanSquare,
}

/// Input feed of per-sample dimension `n`, flagged `F_IN`.
pub fn input(b: &mut GraphBuilder, n: usize) -> NodeId {
    let id = b.feed(&[n]);
    b.set_flags(id, F_IN);
    id
}

/// Dense weight matrix `[n_row, n_col]`, normal-initialized.
pub fn new_weight(b: &mut GraphBuilder, n_row: usize, n_col: usize) -> Result<NodeId, GradnetError> {
    let sigma = init::weight_sigma(n_col, n_row);
    let data = init::normal_vec(b.rng(), n_row * n_col, sigma);
    b.var(&[n_row, n_col], data)
}

/// Bias vector of length `n`, zero-initialized.
pub fn new_bias(b: &mut GraphBuilder, n: usize) -> Result<NodeId, GradnetError> {
    b.var(&[n], vec![0.0; n])
}

/// Fully connected layer: `in_ · Wᵀ + bias`, output dimension `n`.
pub fn linear(b: &mut GraphBuilder, in_: NodeId, n: usize) -> Result<NodeId, GradnetError> {
    let n_in = b.node(in_).len_per_sample();
    let w = new_weight(b, n, n_in)?;
    let bias = new_bias(b, n)?;
    let mm = b.apply(OpKind::MatMul, &[in_, w])?;
    b.apply(OpKind::Add, &[mm, bias])
}

/// Dropout with the given rate; pass-through in eval mode. The rate rides on
/// a scalar constant operand so it serializes with the graph.
pub fn dropout(b: &mut GraphBuilder, t: NodeId, rate: f32) -> Result<NodeId, GradnetError> {
    if !(0.0..=1.0).contains(&rate) {
        return Err(GradnetError::ConfigurationError(
            "dropout rate must be in [0.0, 1.0]".to_string(),
        ));
    }
    let r = b.scalar(rate);
    b.apply(OpKind::Dropout, &[t, r])
}

/// Vanilla recurrent layer: `h_t = tanh(x_t · Wᵀ + h_{t-1} · Uᵀ + bias)`.
///
/// The initial state `h0` is a zero constant, or a trainable variable when
/// `trainable_h0` is set; either way it carries the recurrence marker that
/// the unroller (or continuous feeding) resolves to the previous step's `h`.
pub fn rnn(
    b: &mut GraphBuilder,
    in_: NodeId,
    n: usize,
    trainable_h0: bool,
) -> Result<NodeId, GradnetError> {
    let n_in = b.node(in_).len_per_sample();
    let h0 = if trainable_h0 {
        b.var(&[n], vec![0.0; n])?
    } else {
        b.constant(&[n], vec![0.0; n])?
    };
    let w = new_weight(b, n, n_in)?;
    let u = new_weight(b, n, n)?;
    let bias = new_bias(b, n)?;
    let xw = b.apply(OpKind::MatMul, &[in_, w])?;
    let hu = b.apply(OpKind::MatMul, &[h0, u])?;
    let lin = b.apply(OpKind::Add, &[xw, hu])?;
    let lin = b.apply(OpKind::Add, &[lin, bias])?;
    let h = b.apply(OpKind::Tanh, &[lin])?;
    b.set_recurrence(h0, h)?;
    Ok(h)
}

/// Final cost head: linear projection to `n_out`, a `F_TRUTH` feed of the
/// same size and a scalar `F_COST` node; the prediction output is flagged
/// `F_OUT`. Returns the cost node.
pub fn cost(
    b: &mut GraphBuilder,
    t: NodeId,
    n_out: usize,
    cost_type: CostType,
) -> Result<NodeId, GradnetError> {
    let pre = linear(b, t, n_out)?;
    let truth = b.feed(&[n_out]);
    b.set_flags(truth, F_TRUTH);
    let c = match cost_type {
        CostType::CrossEntropy => {
            let out = b.apply(OpKind::Softmax, &[pre])?;
            b.set_flags(out, F_OUT);
            b.apply(OpKind::SoftmaxCrossEntropy, &[pre, truth])?
        }
        CostType::MeanSquare => {
            b.set_flags(pre, F_OUT);
            b.apply(OpKind::MeanSquareError, &[pre, truth])?
        }
    };
    b.set_flags(c, F_COST);
    Ok(c)
}
