//! Model persistence: graph structure (node arena with operator tags,
//! operand indices, shapes, flags) followed by the flattened variable and
//! constant buffers. A saved-then-loaded graph reconstructs the same
//! topological order and buffer layout, so it produces identical
//! forward/backward results.

use std::cell::RefCell;
use std::io::{Read, Write};
use std::rc::Rc;

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::buffer::VarStore;
use crate::config::GraphConfig;
use crate::error::GradnetError;
use crate::graph::node::{Node, NodeKind};
use crate::graph::Graph;

const FORMAT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct SavedModel {
    version: u32,
    config: GraphConfig,
    batch: usize,
    nodes: Vec<Node>,
    vars: Vec<f32>,
    consts: Vec<f32>,
}

/// Writes a graph (structure + variable and constant buffers) to `w`.
pub fn save_model<W: Write>(mut w: W, graph: &Graph) -> Result<(), GradnetError> {
    let model = SavedModel {
        version: FORMAT_VERSION,
        config: graph.config().clone(),
        batch: graph.batch_size(),
        nodes: graph.nodes().to_vec(),
        vars: graph.var_store().borrow().x.clone(),
        consts: graph.consts.clone(),
    };
    serde_json::to_writer(&mut w, &model)?;
    w.flush()?;
    Ok(())
}

/// Reconstructs a graph saved by [`save_model`].
///
/// The loaded graph owns fresh variable storage seeded with the saved
/// values; gradients start zeroed.
pub fn load_model<R: Read>(r: R) -> Result<Graph, GradnetError> {
    let model: SavedModel = serde_json::from_reader(r)?;
    if model.version != FORMAT_VERSION {
        return Err(GradnetError::ConfigurationError(format!(
            "unsupported model format version {}",
            model.version
        )));
    }
    // The saved arena must be self-consistent: operands strictly precede
    // their consumers (which also keeps the schedule topological) and
    // offsets address the flattened buffers they were saved with.
    for (id, node) in model.nodes.iter().enumerate() {
        for &op in &node.operands {
            if op >= id {
                return Err(GradnetError::InternalError(format!(
                    "node {} references operand {} out of topological order",
                    id, op
                )));
            }
        }
        if let Some(f) = node.pre {
            if f >= model.nodes.len() {
                return Err(GradnetError::InternalError(format!(
                    "node {} carries a recurrence marker to missing node {}",
                    id, f
                )));
            }
        }
        let (buf_len, name) = match node.kind {
            NodeKind::Var => (model.vars.len(), "variable"),
            NodeKind::Const => (model.consts.len(), "constant"),
            _ => continue,
        };
        if node.offset + node.len() > buf_len {
            return Err(GradnetError::InternalError(format!(
                "node {} overruns the saved {} buffer",
                id, name
            )));
        }
    }
    let mut nodes = model.nodes;
    let order: Vec<usize> = (0..nodes.len()).collect();
    let uses = crate::graph::topo::count_uses(&nodes, &order);
    for (node, &u) in nodes.iter_mut().zip(uses.iter()) {
        node.uses = u;
    }
    let n_var = model.vars.len();
    let store = VarStore {
        x: model.vars,
        g: vec![0.0; n_var],
    };
    let rng = StdRng::seed_from_u64(model.config.seed);
    Ok(Graph::from_parts(
        nodes,
        Rc::new(RefCell::new(store)),
        model.consts,
        model.config,
        rng,
        model.batch,
        true,
    ))
}
