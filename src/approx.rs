//! Utilities to approximate equality of floating point values.
//!
//! Host and device backends sum in different orders, so their results are
//! compared with a mixed tolerance: absolute for values close to zero and
//! relative above that.

/// Magnitude below which the absolute tolerance applies.
pub const ABSOLUTE_THRESHOLD: f32 = 0.01;

/// The max absolute difference accepted for small magnitudes.
pub const F32_MAX_ABSOLUTE_ERROR: f32 = 1e-3;

/// The max relative difference accepted above [`ABSOLUTE_THRESHOLD`].
pub const F32_MAX_RELATIVE_ERROR: f32 = 0.01;

/// Compares two values under the mixed absolute/relative tolerance.
///
/// Exactly equal values (including equal infinities) always compare equal;
/// NaN never does.
pub fn float_eq(a: f32, b: f32) -> bool {
    if a == b {
        return true;
    }

    let diff = (a - b).abs();
    let max = a.abs().max(b.abs());

    if max < ABSOLUTE_THRESHOLD {
        diff <= F32_MAX_ABSOLUTE_ERROR
    } else {
        diff <= max * F32_MAX_RELATIVE_ERROR
    }
}

/// Checks the relative distance of two values or sequences.
pub trait RelativeEq<Rhs: ?Sized = Self> {
    /// Whether `self` and `rhs` agree within tolerance.
    fn relative_eq(&self, rhs: &Rhs) -> bool;
}

impl RelativeEq for f32 {
    fn relative_eq(&self, rhs: &Self) -> bool {
        float_eq(*self, *rhs)
    }
}

impl RelativeEq for [f32] {
    fn relative_eq(&self, rhs: &Self) -> bool {
        self.len() == rhs.len() && first_mismatch(self, rhs).is_none()
    }
}

impl<const N: usize> RelativeEq for [f32; N] {
    fn relative_eq(&self, rhs: &Self) -> bool {
        self.as_slice().relative_eq(rhs.as_slice())
    }
}

impl RelativeEq for Vec<f32> {
    fn relative_eq(&self, rhs: &Self) -> bool {
        self.as_slice().relative_eq(rhs.as_slice())
    }
}

/// First position where two sequences disagree, with both values.
///
/// Only the common prefix is inspected; length differences are the caller's concern.
pub fn first_mismatch(a: &[f32], b: &[f32]) -> Option<(usize, f32, f32)> {
    a.iter()
        .zip(b)
        .position(|(&x, &y)| !float_eq(x, y))
        .map(|i| (i, a[i], b[i]))
}
