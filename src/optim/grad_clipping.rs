use num_traits::Float;

use crate::error::GradnetError;

/// Clips the global L2 norm of a flat gradient buffer in place.
///
/// If the norm exceeds `max_norm`, every element is scaled down uniformly so
/// the norm equals `max_norm` exactly; otherwise the buffer is untouched.
/// This is a policy applied between backward and the update rule, not an
/// error condition.
///
/// # Arguments
/// * `g`: the flat gradient buffer.
/// * `max_norm`: the maximum allowed L2 norm; must be non-negative.
///
/// # Returns
/// The pre-clip norm.
pub fn clip_grad_norm_<T: Float>(g: &mut [T], max_norm: T) -> Result<T, GradnetError> {
    if max_norm < T::zero() {
        return Err(GradnetError::ConfigurationError(
            "max_norm must be non-negative".to_string(),
        ));
    }
    let norm = g
        .iter()
        .fold(T::zero(), |acc, &v| acc + v * v)
        .sqrt();
    if norm > max_norm && norm > T::zero() && norm.is_finite() {
        let coef = max_norm / norm;
        for v in g.iter_mut() {
            *v = *v * coef;
        }
    }
    Ok(norm)
}
