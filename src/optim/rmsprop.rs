use crate::buffer::VarStore;
use crate::error::GradnetError;
use crate::graph::Graph;

const DEFAULT_EPS: f32 = 1e-6;

/// RMSprop over the flat variable/gradient buffers.
///
/// Keeps a persistent per-variable "memory" buffer `r`, an exponential
/// moving average of squared gradients, and steps each variable by the
/// gradient scaled with the adaptive per-variable rate
/// `lr / sqrt(eps + r)`. The core's only obligation to this rule is
/// correctly sized buffers; the optimizer never touches graph structure.
#[derive(Debug, Clone)]
pub struct RmsProp {
    lr: f32,
    decay: f32,
    eps: f32,
    /// Optional per-variable learning rates overriding `lr`.
    lr_per_var: Option<Vec<f32>>,
    r: Vec<f32>,
}

impl RmsProp {
    /// Creates an optimizer for `n` trainable scalars.
    ///
    /// # Errors
    /// `ConfigurationError` when `lr` is not positive or `decay` is outside
    /// `[0, 1)`.
    pub fn new(lr: f32, decay: f32, n: usize) -> Result<Self, GradnetError> {
        if lr <= 0.0 {
            return Err(GradnetError::ConfigurationError(
                "learning rate must be positive".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&decay) {
            return Err(GradnetError::ConfigurationError(
                "decay must be in [0.0, 1.0)".to_string(),
            ));
        }
        Ok(RmsProp {
            lr,
            decay,
            eps: DEFAULT_EPS,
            lr_per_var: None,
            r: vec![0.0; n],
        })
    }

    /// Creates an optimizer sized for a graph's variable store.
    pub fn for_graph(graph: &Graph, lr: f32, decay: f32) -> Result<Self, GradnetError> {
        RmsProp::new(lr, decay, graph.size_var())
    }

    /// Overrides the global learning rate with one rate per variable scalar.
    pub fn with_per_var_lr(mut self, rates: Vec<f32>) -> Result<Self, GradnetError> {
        if rates.len() != self.r.len() {
            return Err(GradnetError::ConfigurationError(format!(
                "expected {} per-variable rates, got {}",
                self.r.len(),
                rates.len()
            )));
        }
        self.lr_per_var = Some(rates);
        Ok(self)
    }

    /// The persistent squared-gradient memory.
    pub fn memory(&self) -> &[f32] {
        &self.r
    }

    /// Applies one update over the store's gradient buffer.
    pub fn step(&mut self, store: &mut VarStore) -> Result<(), GradnetError> {
        if store.len() != self.r.len() {
            return Err(GradnetError::ConfigurationError(format!(
                "optimizer sized for {} variables, store holds {}",
                self.r.len(),
                store.len()
            )));
        }
        for i in 0..self.r.len() {
            let g = store.g[i];
            self.r[i] = (1.0 - self.decay) * g * g + self.decay * self.r[i];
            let lr = match &self.lr_per_var {
                Some(rates) => rates[i],
                None => self.lr,
            };
            store.x[i] -= lr / (self.eps + self.r[i]).sqrt() * g;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_bad_hyperparams() {
        assert!(RmsProp::new(0.0, 0.9, 4).is_err());
        assert!(RmsProp::new(0.01, 1.0, 4).is_err());
        assert!(RmsProp::new(0.01, 0.9, 4).is_ok());
    }

    #[test]
    fn test_step_moves_against_gradient() {
        let mut store = VarStore::new();
        store.push_var(&[1.0, -1.0]);
        store.g.copy_from_slice(&[0.5, -0.5]);
        let mut opt = RmsProp::new(0.01, 0.9, 2).unwrap();
        opt.step(&mut store).unwrap();
        assert!(store.x[0] < 1.0);
        assert!(store.x[1] > -1.0);
        assert!(opt.memory().iter().all(|&r| r > 0.0));
    }

    #[test]
    fn test_step_size_mismatch() {
        let mut store = VarStore::new();
        store.push_var(&[1.0]);
        let mut opt = RmsProp::new(0.01, 0.9, 2).unwrap();
        assert!(opt.step(&mut store).is_err());
    }

    #[test]
    fn test_per_var_rates_respected() {
        let mut store = VarStore::new();
        store.push_var(&[0.0, 0.0]);
        store.g.copy_from_slice(&[1.0, 1.0]);
        let mut opt = RmsProp::new(0.01, 0.9, 2)
            .unwrap()
            .with_per_var_lr(vec![0.01, 0.0])
            .unwrap();
        opt.step(&mut store).unwrap();
        assert!(store.x[0] < 0.0);
        assert_eq!(store.x[1], 0.0);
    }
}
