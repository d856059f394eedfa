//! Local derivative rules, one per operator tag.
//!
//! Each rule turns the node's output adjoint `gy` into contributions to its
//! operands' gradient buffers. Contributions are ADDED into `gin` (zeroed
//! temporaries sized like each operand); the evaluator then accumulates them
//! into the operands' shared gradient slots, so a node feeding several
//! consumers sums all incoming contributions before propagating its own rule
//! (guaranteed by reverse-topological order).

use crate::error::GradnetError;
use crate::eval::Mode;
use crate::graph::node::Node;
use crate::ops::OpKind;

#[allow(clippy::too_many_arguments)]
pub(crate) fn run(
    op: OpKind,
    node: &Node,
    ins: &[(&Node, &[f32])],
    y: &[f32],
    gy: &[f32],
    aux: &[f32],
    mode: Mode,
    gin: &mut [Vec<f32>],
) -> Result<(), GradnetError> {
    match op {
        OpKind::MatMul => {
            let (wn, wv) = ins[1];
            let av = ins[0].1;
            let k = wn.dims[1];
            let m = wn.dims[0];
            let rows = av.len() / k;
            // dX = dY · W
            let ga = &mut gin[0];
            for r in 0..rows {
                for j in 0..k {
                    let mut acc = 0.0f32;
                    for c in 0..m {
                        acc += gy[r * m + c] * wv[c * k + j];
                    }
                    ga[r * k + j] += acc;
                }
            }
            // dW = dYᵀ · X
            let gw = &mut gin[1];
            for c in 0..m {
                for j in 0..k {
                    let mut acc = 0.0f32;
                    for r in 0..rows {
                        acc += gy[r * m + c] * av[r * k + j];
                    }
                    gw[c * k + j] += acc;
                }
            }
        }
        OpKind::Add => {
            let lb = ins[1].1.len();
            for (i, &g) in gy.iter().enumerate() {
                gin[0][i] += g;
                gin[1][i % lb] += g;
            }
        }
        OpKind::Mul => {
            let av = ins[0].1;
            let bv = ins[1].1;
            let lb = bv.len();
            for (i, &g) in gy.iter().enumerate() {
                gin[0][i] += g * bv[i % lb];
                gin[1][i % lb] += g * av[i];
            }
        }
        OpKind::Sigmoid => {
            for (i, &g) in gy.iter().enumerate() {
                gin[0][i] += g * y[i] * (1.0 - y[i]);
            }
        }
        OpKind::Tanh => {
            for (i, &g) in gy.iter().enumerate() {
                gin[0][i] += g * (1.0 - y[i] * y[i]);
            }
        }
        OpKind::Relu => {
            let xv = ins[0].1;
            for (i, &g) in gy.iter().enumerate() {
                if xv[i] > 0.0 {
                    gin[0][i] += g;
                }
            }
        }
        OpKind::Softmax => {
            let n = *node.dims.last().expect("softmax operand is not scalar");
            let ga = &mut gin[0];
            for r in 0..y.len() / n {
                let yr = &y[r * n..(r + 1) * n];
                let gr = &gy[r * n..(r + 1) * n];
                let dot: f32 = yr.iter().zip(gr.iter()).map(|(&a, &b)| a * b).sum();
                for j in 0..n {
                    ga[r * n + j] += yr[j] * (gr[j] - dot);
                }
            }
        }
        OpKind::SoftmaxCrossEntropy => {
            // aux holds the softmax computed forward; gradient flows to the
            // prediction operand only, the truth operand is data.
            let (xn, xv) = ins[0];
            let tv = ins[1].1;
            let n = *xn
                .dims
                .last()
                .expect("cross-entropy operand is not scalar");
            let rows = (xv.len() / n) as f32;
            let scale = gy[0] / rows;
            for (i, ga) in gin[0].iter_mut().enumerate() {
                *ga += scale * (aux[i] - tv[i]);
            }
        }
        OpKind::MeanSquareError => {
            let xv = ins[0].1;
            let tv = ins[1].1;
            let scale = gy[0] * 2.0 / xv.len() as f32;
            for (i, ga) in gin[0].iter_mut().enumerate() {
                *ga += scale * (xv[i] - tv[i]);
            }
        }
        OpKind::Dropout => {
            let rate = ins[1].1[0];
            if mode == Mode::Train && rate > 0.0 {
                for (i, &g) in gy.iter().enumerate() {
                    gin[0][i] += g * aux[i];
                }
            } else {
                for (i, &g) in gy.iter().enumerate() {
                    gin[0][i] += g;
                }
            }
        }
        OpKind::Switch => {
            let target = if mode == Mode::Train { 0 } else { 1 };
            for (i, &g) in gy.iter().enumerate() {
                gin[target][i] += g;
            }
        }
        OpKind::Avg => {
            let inv = 1.0 / ins.len() as f32;
            for gk in gin.iter_mut() {
                for (i, &g) in gy.iter().enumerate() {
                    gk[i] += g * inv;
                }
            }
        }
        OpKind::Sum => {
            for gk in gin.iter_mut() {
                for (i, &g) in gy.iter().enumerate() {
                    gk[i] += g;
                }
            }
        }
    }
    Ok(())
}
