//! Shared test utilities for the fieldio workspace.
//!
//! Analytic fields, Zarr archive fixtures and approximate-equality
//! assertions used by the crate and integration tests.

pub mod fixtures;
pub mod generators;

pub use fixtures::*;
pub use generators::*;

/// Assert that two numbers differ by at most `epsilon`.
///
/// Both sides are widened to `f64` first, so integer and `f32` operands work.
///
/// ```
/// test_utils::assert_approx_eq!(272.15_f32, 272.15_f64, 1e-4);
/// ```
#[macro_export]
macro_rules! assert_approx_eq {
    ($left:expr, $right:expr, $epsilon:expr) => {{
        let (left, right, epsilon) = ($left as f64, $right as f64, $epsilon as f64);
        assert!(
            (left - right).abs() <= epsilon,
            "values differ by more than {}: left {}, right {}",
            epsilon,
            left,
            right
        );
    }};
}

/// Elementwise [`assert_approx_eq!`] over two slices of equal length.
#[macro_export]
macro_rules! assert_all_approx_eq {
    ($left:expr, $right:expr, $epsilon:expr) => {{
        let left: &[f64] = &$left;
        let right: &[f64] = &$right;
        assert_eq!(left.len(), right.len(), "length mismatch");
        for (l, r) in left.iter().zip(right.iter()) {
            $crate::assert_approx_eq!(*l, *r, $epsilon);
        }
    }};
}
