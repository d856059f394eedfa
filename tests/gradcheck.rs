//! Finite-difference validation of the backward rules.
//!
//! Every trainable scalar is perturbed both ways through the shared variable
//! store and the central difference of the cost is compared against the
//! gradient computed by backpropagation.

use gradnet::graph::{Graph, GraphBuilder};
use gradnet::nn;
use gradnet::{GraphConfig, Mode, F_IN, F_TRUTH};

const EPS: f32 = 1e-2;

fn numeric_grad(g: &mut Graph, i: usize, label: i32) -> f32 {
    let store = g.var_store();
    let orig = store.borrow().x[i];
    store.borrow_mut().x[i] = orig + EPS;
    let up = g.cost(label, false, Mode::Eval).unwrap();
    store.borrow_mut().x[i] = orig - EPS;
    let down = g.cost(label, false, Mode::Eval).unwrap();
    store.borrow_mut().x[i] = orig;
    (up - down) / (2.0 * EPS)
}

fn check_grads(g: &mut Graph, label: i32) {
    g.cost(label, true, Mode::Eval).unwrap();
    let analytic = g.var_store().borrow().g.clone();
    assert!(!analytic.is_empty());
    for (i, &a) in analytic.iter().enumerate() {
        let n = numeric_grad(g, i, label);
        let tol = 1e-3 + 1e-2 * a.abs().max(n.abs());
        assert!(
            (a - n).abs() <= tol,
            "variable {}: analytic {} vs numeric {}",
            i,
            a,
            n
        );
    }
}

#[test]
fn test_gradcheck_mlp_cross_entropy() {
    let mut b = GraphBuilder::new(GraphConfig::with_seed(21));
    let x = nn::input(&mut b, 3);
    let h = nn::linear(&mut b, x, 4).unwrap();
    let h = b.apply(gradnet::OpKind::Tanh, &[h]).unwrap();
    let c = nn::cost(&mut b, h, 2, nn::CostType::CrossEntropy).unwrap();
    let mut g = Graph::assemble(b, c, &[]).unwrap();

    g.feed_bind(F_IN, 0, &[&[0.3, -0.1, 0.8]]).unwrap();
    g.feed_bind(F_TRUTH, 0, &[&[1.0, 0.0]]).unwrap();
    check_grads(&mut g, 0);
}

#[test]
fn test_gradcheck_mlp_mean_square() {
    let mut b = GraphBuilder::new(GraphConfig::with_seed(22));
    let x = nn::input(&mut b, 2);
    let h = nn::linear(&mut b, x, 3).unwrap();
    let h = b.apply(gradnet::OpKind::Sigmoid, &[h]).unwrap();
    let c = nn::cost(&mut b, h, 2, nn::CostType::MeanSquare).unwrap();
    let mut g = Graph::assemble(b, c, &[]).unwrap();

    g.feed_bind(F_IN, 0, &[&[0.7, -0.3]]).unwrap();
    g.feed_bind(F_TRUTH, 0, &[&[0.2, -0.4]]).unwrap();
    check_grads(&mut g, 0);
}

#[test]
fn test_gradcheck_batched_forward() {
    let mut b = GraphBuilder::new(GraphConfig::with_seed(23));
    let x = nn::input(&mut b, 3);
    let h = nn::linear(&mut b, x, 4).unwrap();
    let h = b.apply(gradnet::OpKind::Tanh, &[h]).unwrap();
    let c = nn::cost(&mut b, h, 2, nn::CostType::CrossEntropy).unwrap();
    let mut g = Graph::assemble(b, c, &[]).unwrap();

    g.set_batch_size(2).unwrap();
    g.feed_bind(F_IN, 0, &[&[0.3, -0.1, 0.8, -0.5, 0.2, 0.4]]).unwrap();
    g.feed_bind(F_TRUTH, 0, &[&[1.0, 0.0, 0.0, 1.0]]).unwrap();
    check_grads(&mut g, 0);
}

#[test]
fn test_gradcheck_unrolled_rnn() {
    let mut b = GraphBuilder::new(GraphConfig::with_seed(24));
    let x = nn::input(&mut b, 2);
    let h = nn::rnn(&mut b, x, 3, true).unwrap();
    let c = nn::cost(&mut b, h, 2, nn::CostType::MeanSquare).unwrap();
    let base = Graph::assemble(b, c, &[]).unwrap();

    let mut g = base.unroll(3).unwrap();
    g.feed_bind(
        F_IN,
        0,
        &[&[0.5, -0.2], &[0.1, 0.9], &[-0.7, 0.3]],
    )
    .unwrap();
    g.feed_bind(
        F_TRUTH,
        0,
        &[&[0.1, 0.0], &[-0.2, 0.4], &[0.3, -0.1]],
    )
    .unwrap();
    // Gradients flow through every step into the one shared store,
    // including the trainable initial state.
    check_grads(&mut g, 0);
}

#[test]
fn test_gradcheck_two_layer_unrolled_rnn() {
    // Two stacked recurrent layers give two recurrence markers that the
    // unroller must thread independently.
    let mut b = GraphBuilder::new(GraphConfig::with_seed(25));
    let x = nn::input(&mut b, 2);
    let h = nn::rnn(&mut b, x, 3, false).unwrap();
    let h = nn::rnn(&mut b, h, 3, false).unwrap();
    let c = nn::cost(&mut b, h, 2, nn::CostType::MeanSquare).unwrap();
    let base = Graph::assemble(b, c, &[]).unwrap();

    let mut g = base.unroll(3).unwrap();
    g.feed_bind(
        F_IN,
        0,
        &[&[0.4, -0.6], &[0.0, 0.8], &[-0.3, 0.2]],
    )
    .unwrap();
    g.feed_bind(
        F_TRUTH,
        0,
        &[&[0.0, 0.2], &[0.5, -0.5], &[-0.1, 0.1]],
    )
    .unwrap();
    check_grads(&mut g, 0);
}
