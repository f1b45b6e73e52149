//! Helpers over logical dimension vectors.
//!
//! Shapes are stored as plain `Vec<usize>` in logical NCHW order. Reading a
//! dimension past the stored rank yields 1, which lets a rank-2 output such
//! as `[4, 3]` be addressed through the same 4-D packed-layout formulas as
//! a full `[N, C, H, W]` tensor.

use std::fmt::Write;

/// Logical dimensions in NCHW order.
pub type DimsVector = Vec<usize>;

/// Dimension `index` of `dims`, or 1 when `index` is past the rank.
#[inline]
pub fn get_dim(dims: &[usize], index: usize) -> usize {
    dims.get(index).copied().unwrap_or(1)
}

/// Number of elements described by `dims` (1 for an empty shape).
#[inline]
pub fn count(dims: &[usize]) -> usize {
    dims.iter().product()
}

/// Render dims as `[a, b, c]` for log messages.
pub fn format_dims(dims: &[usize]) -> String {
    let mut out = String::from("[");
    for (i, d) in dims.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        let _ = write!(out, "{d}");
    }
    out.push(']');
    out
}
