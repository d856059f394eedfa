//! Collated variable storage shared between a base graph and its unrolled
//! derivatives.
//!
//! Trainable-variable values and their gradients live in two flat `f32`
//! arrays of identical length, addressed by per-node offsets assigned once at
//! assembly time. A graph holds the store behind `Rc<RefCell<..>>`; unrolling
//! clones the handle, so gradient writes from an unrolled backward pass are
//! visible to the optimizer stepping the base graph, and dropping either
//! graph never frees storage the other still needs.

/// Flat variable-value (`x`) and gradient (`g`) buffers.
///
/// Invariant: `x.len() == g.len()` at all times.
#[derive(Debug, Default, Clone)]
pub struct VarStore {
    pub x: Vec<f32>,
    pub g: Vec<f32>,
}

impl VarStore {
    pub fn new() -> Self {
        VarStore::default()
    }

    /// Total number of trainable scalars.
    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    /// Appends one variable's initial values, returning its offset.
    pub(crate) fn push_var(&mut self, init: &[f32]) -> usize {
        let offset = self.x.len();
        self.x.extend_from_slice(init);
        self.g.resize(self.x.len(), 0.0);
        offset
    }

    /// Zero-fills the gradient buffer. Called before every backward pass.
    pub fn zero_grad(&mut self) {
        self.g.fill(0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_var_offsets() {
        let mut store = VarStore::new();
        let o1 = store.push_var(&[1.0, 2.0, 3.0]);
        let o2 = store.push_var(&[4.0]);
        assert_eq!(o1, 0);
        assert_eq!(o2, 3);
        assert_eq!(store.len(), 4);
        assert_eq!(store.x, vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(store.g.len(), store.x.len());
    }

    #[test]
    fn test_zero_grad() {
        let mut store = VarStore::new();
        store.push_var(&[1.0, 2.0]);
        store.g.copy_from_slice(&[5.0, -5.0]);
        store.zero_grad();
        assert_eq!(store.g, vec![0.0, 0.0]);
    }
}
