//! Small assertion helpers shared by unit and integration tests.

use approx::relative_eq;

/// Panics unless `actual` and `expected` agree element-wise within
/// `epsilon` (relative, with the same absolute fallback near zero).
pub fn check_near(actual: &[f32], expected: &[f32], epsilon: f32) {
    assert_eq!(
        actual.len(),
        expected.len(),
        "length mismatch: {} vs {}",
        actual.len(),
        expected.len()
    );
    for (i, (&a, &e)) in actual.iter().zip(expected.iter()).enumerate() {
        assert!(
            relative_eq!(a, e, epsilon = epsilon, max_relative = epsilon),
            "element {}: {} vs {} (epsilon {})",
            i,
            a,
            e,
            epsilon
        );
    }
}

/// Panics if any value is NaN or infinite.
pub fn check_finite(values: &[f32]) {
    for (i, &v) in values.iter().enumerate() {
        assert!(v.is_finite(), "element {} is not finite: {}", i, v);
    }
}
