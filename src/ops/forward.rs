//! Forward kernels, one per operator tag.
//!
//! Each kernel reads already-computed operand values and writes the node's
//! activation buffer. Only `Dropout` and `Switch` consult the evaluation
//! mode; dropout additionally records its mask in the node's scratch buffer
//! so the backward rule replays the same mask.

use rand::rngs::StdRng;
use rand::Rng;

use crate::error::GradnetError;
use crate::eval::Mode;
use crate::graph::node::Node;
use crate::ops::OpKind;

pub(crate) fn run(
    op: OpKind,
    node: &Node,
    ins: &[(&Node, &[f32])],
    out: &mut [f32],
    aux: &mut Vec<f32>,
    mode: Mode,
    rng: &mut StdRng,
) -> Result<(), GradnetError> {
    match op {
        OpKind::MatMul => {
            let (wn, wv) = ins[1];
            let av = ins[0].1;
            let k = wn.dims[1];
            let m = wn.dims[0];
            let rows = av.len() / k;
            debug_assert_eq!(out.len(), rows * m);
            for r in 0..rows {
                for c in 0..m {
                    let mut acc = 0.0f32;
                    for j in 0..k {
                        acc += av[r * k + j] * wv[c * k + j];
                    }
                    out[r * m + c] = acc;
                }
            }
        }
        OpKind::Add => {
            let av = ins[0].1;
            let bv = ins[1].1;
            let lb = bv.len();
            for (i, o) in out.iter_mut().enumerate() {
                *o = av[i] + bv[i % lb];
            }
        }
        OpKind::Mul => {
            let av = ins[0].1;
            let bv = ins[1].1;
            let lb = bv.len();
            for (i, o) in out.iter_mut().enumerate() {
                *o = av[i] * bv[i % lb];
            }
        }
        OpKind::Sigmoid => {
            for (o, &x) in out.iter_mut().zip(ins[0].1.iter()) {
                *o = 1.0 / (1.0 + (-x).exp());
            }
        }
        OpKind::Tanh => {
            for (o, &x) in out.iter_mut().zip(ins[0].1.iter()) {
                *o = x.tanh();
            }
        }
        OpKind::Relu => {
            for (o, &x) in out.iter_mut().zip(ins[0].1.iter()) {
                *o = x.max(0.0);
            }
        }
        OpKind::Softmax => {
            let av = ins[0].1;
            let n = *node.dims.last().expect("softmax operand is not scalar");
            softmax_rows(av, out, n);
        }
        OpKind::SoftmaxCrossEntropy => {
            let (xn, xv) = ins[0];
            let tv = ins[1].1;
            let n = *xn
                .dims
                .last()
                .expect("cross-entropy operand is not scalar");
            let rows = xv.len() / n;
            aux.clear();
            aux.resize(xv.len(), 0.0);
            softmax_rows(xv, aux, n);
            let mut cost = 0.0f32;
            for (p, &t) in aux.iter().zip(tv.iter()) {
                if t != 0.0 {
                    cost -= t * p.max(f32::MIN_POSITIVE).ln();
                }
            }
            out[0] = cost / rows as f32;
        }
        OpKind::MeanSquareError => {
            let xv = ins[0].1;
            let tv = ins[1].1;
            let mut acc = 0.0f32;
            for (&x, &t) in xv.iter().zip(tv.iter()) {
                let d = x - t;
                acc += d * d;
            }
            out[0] = acc / xv.len() as f32;
        }
        OpKind::Dropout => {
            let xv = ins[0].1;
            let rate = ins[1].1[0];
            if mode == Mode::Train && rate > 0.0 {
                aux.clear();
                aux.resize(xv.len(), 0.0);
                let scale = 1.0 / (1.0 - rate);
                for (m, (o, &x)) in aux.iter_mut().zip(out.iter_mut().zip(xv.iter())) {
                    *m = if rng.gen::<f32>() < rate { 0.0 } else { scale };
                    *o = x * *m;
                }
            } else {
                out.copy_from_slice(xv);
            }
        }
        OpKind::Switch => {
            let selected = if mode == Mode::Train { ins[0].1 } else { ins[1].1 };
            out.copy_from_slice(selected);
        }
        OpKind::Avg => {
            let inv = 1.0 / ins.len() as f32;
            for (i, o) in out.iter_mut().enumerate() {
                *o = ins.iter().map(|(_, v)| v[i]).sum::<f32>() * inv;
            }
        }
        OpKind::Sum => {
            for (i, o) in out.iter_mut().enumerate() {
                *o = ins.iter().map(|(_, v)| v[i]).sum::<f32>();
            }
        }
    }
    Ok(())
}

/// Row-wise numerically-stable softmax over groups of `n` values.
pub(crate) fn softmax_rows(x: &[f32], out: &mut [f32], n: usize) {
    for (xr, or) in x.chunks_exact(n).zip(out.chunks_exact_mut(n)) {
        let max = xr.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
        let mut sum = 0.0f32;
        for (o, &v) in or.iter_mut().zip(xr.iter()) {
            *o = (v - max).exp();
            sum += *o;
        }
        let inv = 1.0 / sum;
        for o in or.iter_mut() {
            *o *= inv;
        }
    }
}
