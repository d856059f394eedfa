//! End-to-end training scenarios over the public API.

use gradnet::graph::{Graph, GraphBuilder};
use gradnet::io::{load_model, save_model};
use gradnet::nn;
use gradnet::optim::{clip_grad_norm_, RmsProp};
use gradnet::utils::testing::{check_finite, check_near};
use gradnet::{GraphConfig, Mode, F_IN, F_OUT, F_TRUTH};

fn classifier(seed: u64) -> Graph {
    let mut b = GraphBuilder::new(GraphConfig::with_seed(seed));
    let x = nn::input(&mut b, 4);
    let c = nn::cost(&mut b, x, 3, nn::CostType::CrossEntropy).unwrap();
    Graph::assemble(b, c, &[]).unwrap()
}

#[test]
fn test_rmsprop_training_reduces_cost() {
    let mut g = classifier(42);
    g.feed_bind(F_IN, 0, &[&[1.0, 0.0, 0.0, 0.0]]).unwrap();
    g.feed_bind(F_TRUTH, 0, &[&[0.0, 1.0, 0.0]]).unwrap();

    let store = g.var_store();
    let mut opt = RmsProp::for_graph(&g, 0.01, 0.9).unwrap();

    let initial = g.cost(0, true, Mode::Train).unwrap();
    check_finite(&[initial]);
    assert!(initial > 0.0);
    {
        let s = store.borrow();
        check_finite(&s.g);
        assert!(s.g.iter().any(|&v| v != 0.0));
    }

    // A single update on the same sample must already lower the cost.
    opt.step(&mut store.borrow_mut()).unwrap();
    let after_one = g.cost(0, true, Mode::Train).unwrap();
    assert!(after_one < initial, "cost went {} -> {}", initial, after_one);

    let mut last = after_one;
    for _ in 0..200 {
        last = g.cost(0, true, Mode::Train).unwrap();
        let mut s = store.borrow_mut();
        let norm = clip_grad_norm_(&mut s.g, 5.0).unwrap();
        assert!(norm.is_finite());
        opt.step(&mut s).unwrap();
    }
    assert!(last < initial, "cost went {} -> {}", initial, last);

    g.eval(F_OUT, 0, Mode::Eval).unwrap();
    assert_eq!(g.class_error(0).unwrap(), 0);
}

#[test]
fn test_same_seed_same_model() {
    let mut a = classifier(7);
    let mut b = classifier(7);
    assert_eq!(a.var_store().borrow().x, b.var_store().borrow().x);

    let x: &[f32] = &[0.5, -0.5, 0.25, 1.0];
    let t: &[f32] = &[1.0, 0.0, 0.0];
    a.feed_bind(F_IN, 0, &[x]).unwrap();
    a.feed_bind(F_TRUTH, 0, &[t]).unwrap();
    b.feed_bind(F_IN, 0, &[x]).unwrap();
    b.feed_bind(F_TRUTH, 0, &[t]).unwrap();
    let ca = a.cost(0, false, Mode::Eval).unwrap();
    let cb = b.cost(0, false, Mode::Eval).unwrap();
    assert_eq!(ca.to_bits(), cb.to_bits());
}

#[test]
fn test_different_seeds_differ() {
    let a = classifier(7);
    let b = classifier(8);
    assert_ne!(a.var_store().borrow().x, b.var_store().borrow().x);
}

#[test]
fn test_minibatch_training_then_single_sample_inference() {
    let mut g = classifier(3);
    g.set_batch_size(2).unwrap();
    // Two samples, row-major.
    g.feed_bind(
        F_IN,
        0,
        &[&[1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0]],
    )
    .unwrap();
    g.feed_bind(F_TRUTH, 0, &[&[0.0, 1.0, 0.0, 1.0, 0.0, 0.0]]).unwrap();

    let store = g.var_store();
    let mut opt = RmsProp::for_graph(&g, 0.01, 0.9).unwrap();
    let initial = g.cost(0, true, Mode::Train).unwrap();
    let mut last = initial;
    for _ in 0..100 {
        last = g.cost(0, true, Mode::Train).unwrap();
        opt.step(&mut store.borrow_mut()).unwrap();
    }
    assert!(last < initial);

    g.set_batch_size(1).unwrap();
    g.feed_bind(F_IN, 0, &[&[1.0, 0.0, 0.0, 0.0]]).unwrap();
    assert_eq!(g.eval(F_OUT, 0, Mode::Eval).unwrap(), 1);
    let out = g.get_value(g.find(F_OUT, 0).unwrap()).unwrap();
    assert_eq!(out.len(), 3);
    check_finite(&out);
    check_near(&[out.iter().sum::<f32>()], &[1.0], 1e-5);
}

#[test]
fn test_save_load_round_trip() {
    let mut g = classifier(42);
    let x: &[f32] = &[0.2, 0.4, -0.6, 0.8];
    g.feed_bind(F_IN, 0, &[x]).unwrap();
    g.eval(F_OUT, 0, Mode::Eval).unwrap();
    let out = g.get_value(g.find(F_OUT, 0).unwrap()).unwrap();

    let mut buf: Vec<u8> = Vec::new();
    save_model(&mut buf, &g).unwrap();
    let mut loaded = load_model(buf.as_slice()).unwrap();

    assert_eq!(loaded.n_nodes(), g.n_nodes());
    assert_eq!(loaded.size_var(), g.size_var());
    assert_eq!(loaded.var_store().borrow().x, g.var_store().borrow().x);

    loaded.feed_bind(F_IN, 0, &[x]).unwrap();
    loaded.eval(F_OUT, 0, Mode::Eval).unwrap();
    let out2 = loaded.get_value(loaded.find(F_OUT, 0).unwrap()).unwrap();
    check_near(&out2, &out, 1e-7);

    // The loaded model owns fresh storage and keeps training.
    loaded.feed_bind(F_TRUTH, 0, &[&[0.0, 0.0, 1.0]]).unwrap();
    let store = loaded.var_store();
    let mut opt = RmsProp::for_graph(&loaded, 0.01, 0.9).unwrap();
    let c0 = loaded.cost(0, true, Mode::Train).unwrap();
    opt.step(&mut store.borrow_mut()).unwrap();
    let c1 = loaded.cost(0, false, Mode::Train).unwrap();
    assert!(c1 < c0);
}

#[test]
fn test_load_rejects_out_of_order_operands() {
    // An operand index pointing at a later (or missing) node must surface
    // as an error, not a panic inside graph reconstruction.
    let malformed = r#"{
        "version": 1,
        "config": { "seed": 11, "cost_aggregation": "Mean" },
        "batch": 1,
        "nodes": [
            { "kind": { "Op": "Sum" }, "operands": [5], "dims": [],
              "batched": false, "flags": 8, "label": 0, "pre": null,
              "offset": 0 }
        ],
        "vars": [],
        "consts": []
    }"#;
    assert!(load_model(malformed.as_bytes()).is_err());
}

#[test]
fn test_dropout_regularized_net_trains() {
    let mut b = GraphBuilder::new(GraphConfig::with_seed(9));
    let x = nn::input(&mut b, 4);
    let h = nn::linear(&mut b, x, 8).unwrap();
    let h = b.apply(gradnet::OpKind::Relu, &[h]).unwrap();
    let h = nn::dropout(&mut b, h, 0.2).unwrap();
    let c = nn::cost(&mut b, h, 3, nn::CostType::CrossEntropy).unwrap();
    let mut g = Graph::assemble(b, c, &[]).unwrap();

    g.feed_bind(F_IN, 0, &[&[1.0, 0.0, 0.0, 0.0]]).unwrap();
    g.feed_bind(F_TRUTH, 0, &[&[0.0, 1.0, 0.0]]).unwrap();
    let store = g.var_store();
    let mut opt = RmsProp::for_graph(&g, 0.01, 0.9).unwrap();
    for _ in 0..100 {
        let c = g.cost(0, true, Mode::Train).unwrap();
        check_finite(&[c]);
        opt.step(&mut store.borrow_mut()).unwrap();
    }
    // Deterministic eval pass after stochastic training.
    let e1 = g.cost(0, false, Mode::Eval).unwrap();
    let e2 = g.cost(0, false, Mode::Eval).unwrap();
    assert_eq!(e1.to_bits(), e2.to_bits());
}
