//! # Graph operators (`ops`)
//!
//! The operator vocabulary of the computational graph, with arity checking
//! and result-shape inference used by the graph builder, plus the forward
//! kernels and local derivative rules used by the evaluator.
//!
//! Conventions shared by all operators:
//! - values are flat `f32` slices; a "batched" node's leading dimension is
//!   the current batch size;
//! - `Add`/`Mul` support block broadcasting: the left operand's length must
//!   be a multiple of the (unbatched) right operand's length, which is tiled
//!   over it;
//! - `Dropout` carries its rate as a scalar constant operand, so the rate
//!   serializes with the graph structure;
//! - backward rules always accumulate into operand gradient slots, never
//!   overwrite, because one operand may feed several consumers.

pub(crate) mod backward;
pub(crate) mod forward;

use serde::{Deserialize, Serialize};

use crate::error::GradnetError;
use crate::graph::node::Node;

/// Operator tags of computed nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpKind {
    /// `y = x · Wᵀ` with `x: [B, k]` (or `[k]`) and `W: [m, k]`.
    MatMul,
    /// Element-wise sum with block broadcasting of the right operand.
    Add,
    /// Element-wise product with block broadcasting of the right operand.
    Mul,
    Sigmoid,
    Tanh,
    Relu,
    /// Row-wise softmax over the last dimension.
    Softmax,
    /// Fused softmax + multi-class cross-entropy, averaged over rows; scalar.
    SoftmaxCrossEntropy,
    /// Mean squared error against a truth operand; scalar.
    MeanSquareError,
    /// Train-mode stochastic mask; pass-through in eval mode.
    Dropout,
    /// Selects operand 0 in train mode and operand 1 in eval mode.
    Switch,
    /// Element-wise mean of all operands (same shape).
    Avg,
    /// Element-wise sum of all operands (same shape).
    Sum,
}

/// Operand-count contract of an operator.
pub enum Arity {
    Exact(usize),
    AtLeast(usize),
}

impl OpKind {
    pub fn name(&self) -> &'static str {
        match self {
            OpKind::MatMul => "matmul",
            OpKind::Add => "add",
            OpKind::Mul => "mul",
            OpKind::Sigmoid => "sigmoid",
            OpKind::Tanh => "tanh",
            OpKind::Relu => "relu",
            OpKind::Softmax => "softmax",
            OpKind::SoftmaxCrossEntropy => "softmax_ce",
            OpKind::MeanSquareError => "mse",
            OpKind::Dropout => "dropout",
            OpKind::Switch => "switch",
            OpKind::Avg => "avg",
            OpKind::Sum => "sum",
        }
    }

    pub fn arity(&self) -> Arity {
        match self {
            OpKind::Sigmoid | OpKind::Tanh | OpKind::Relu | OpKind::Softmax => Arity::Exact(1),
            OpKind::MatMul
            | OpKind::Add
            | OpKind::Mul
            | OpKind::SoftmaxCrossEntropy
            | OpKind::MeanSquareError
            | OpKind::Dropout
            | OpKind::Switch => Arity::Exact(2),
            OpKind::Avg | OpKind::Sum => Arity::AtLeast(1),
        }
    }

    fn check_arity(&self, actual: usize) -> Result<(), GradnetError> {
        let ok = match self.arity() {
            Arity::Exact(n) => actual == n,
            Arity::AtLeast(n) => actual >= n,
        };
        if ok {
            Ok(())
        } else {
            Err(GradnetError::ArityMismatch {
                op: self.name(),
                expected: match self.arity() {
                    Arity::Exact(n) => n.to_string(),
                    Arity::AtLeast(n) => format!(">= {}", n),
                },
                actual,
            })
        }
    }
}

/// Validates operand shapes for `op` and infers the result's `(dims, batched)`.
///
/// Called by the graph builder on node construction and again by the unroller
/// when operand shapes change across time-step copies (an unbatched initial
/// state is replaced by a batched previous-step activation).
pub(crate) fn infer_shape(
    op: OpKind,
    operands: &[&Node],
) -> Result<(Vec<usize>, bool), GradnetError> {
    op.check_arity(operands.len())?;
    match op {
        OpKind::MatMul => {
            let a = operands[0];
            let w = operands[1];
            // Left operand: [rows, k] batched, or a bare [k] vector. Right
            // operand: an unbatched [m, k] weight matrix.
            let k = match a.dims.len() {
                1 => a.dims[0],
                2 => a.dims[1],
                _ => {
                    return Err(GradnetError::IncompatibleShapes {
                        op: op.name(),
                        shape1: a.dims.clone(),
                        shape2: w.dims.clone(),
                    })
                }
            };
            if w.batched || w.dims.len() != 2 || w.dims[1] != k {
                return Err(GradnetError::IncompatibleShapes {
                    op: op.name(),
                    shape1: a.dims.clone(),
                    shape2: w.dims.clone(),
                });
            }
            let m = w.dims[0];
            if a.dims.len() == 2 {
                Ok((vec![a.dims[0], m], a.batched))
            } else {
                Ok((vec![m], false))
            }
        }
        OpKind::Add | OpKind::Mul => {
            let a = operands[0];
            let b = operands[1];
            if a.dims == b.dims && a.batched == b.batched {
                return Ok((a.dims.clone(), a.batched));
            }
            // Block broadcast: tile the unbatched right operand over each
            // sample of the left one.
            let per_sample = if a.batched {
                a.dims[1..].iter().product::<usize>()
            } else {
                a.len()
            };
            if b.batched || b.len() == 0 || per_sample % b.len() != 0 {
                return Err(GradnetError::IncompatibleShapes {
                    op: op.name(),
                    shape1: a.dims.clone(),
                    shape2: b.dims.clone(),
                });
            }
            Ok((a.dims.clone(), a.batched))
        }
        OpKind::Sigmoid | OpKind::Tanh | OpKind::Relu => {
            Ok((operands[0].dims.clone(), operands[0].batched))
        }
        OpKind::Softmax => {
            let a = operands[0];
            if a.dims.is_empty() {
                return Err(GradnetError::IncompatibleShapes {
                    op: op.name(),
                    shape1: a.dims.clone(),
                    shape2: vec![],
                });
            }
            Ok((a.dims.clone(), a.batched))
        }
        OpKind::SoftmaxCrossEntropy | OpKind::MeanSquareError => {
            let x = operands[0];
            let t = operands[1];
            let rowless = op == OpKind::SoftmaxCrossEntropy && x.dims.is_empty();
            if rowless || x.dims != t.dims {
                return Err(GradnetError::IncompatibleShapes {
                    op: op.name(),
                    shape1: x.dims.clone(),
                    shape2: t.dims.clone(),
                });
            }
            // Scalar cost, reduced over the whole batch.
            Ok((vec![], false))
        }
        OpKind::Dropout => {
            let rate = operands[1];
            if !rate.dims.is_empty() {
                return Err(GradnetError::IncompatibleShapes {
                    op: op.name(),
                    shape1: operands[0].dims.clone(),
                    shape2: rate.dims.clone(),
                });
            }
            Ok((operands[0].dims.clone(), operands[0].batched))
        }
        OpKind::Switch => {
            let a = operands[0];
            let b = operands[1];
            if a.dims != b.dims || a.batched != b.batched {
                return Err(GradnetError::IncompatibleShapes {
                    op: op.name(),
                    shape1: a.dims.clone(),
                    shape2: b.dims.clone(),
                });
            }
            Ok((a.dims.clone(), a.batched))
        }
        OpKind::Avg | OpKind::Sum => {
            let first = operands[0];
            for other in &operands[1..] {
                if other.dims != first.dims || other.batched != first.batched {
                    return Err(GradnetError::IncompatibleShapes {
                        op: op.name(),
                        shape1: first.dims.clone(),
                        shape2: other.dims.clone(),
                    });
                }
            }
            Ok((first.dims.clone(), first.batched))
        }
    }
}
