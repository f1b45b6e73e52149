//! Axis normalization and the shape rules of a reduction.

use tensorpack_common::dims::DimsVector;
use tensorpack_common::{AccError, AccResult};

/// Map a possibly negative axis onto `[0, rank)` by adding `rank`.
///
/// No bounds check happens here; [`resolve_axes`] validates the result.
#[inline]
pub const fn normalize_axis(axis: i32, rank: usize) -> i32 {
    if axis >= 0 {
        axis
    } else {
        axis + rank as i32
    }
}

/// Normalize, validate and de-duplicate reduce axes against `rank`.
///
/// The first occurrence of each axis wins, so the returned order follows the
/// layer parameters. Empty axis lists and out-of-range axes are
/// configuration errors.
pub fn resolve_axes(axes: &[i32], rank: usize) -> AccResult<Vec<usize>> {
    if axes.is_empty() {
        return Err(AccError::config("reduce layer has no axes"));
    }
    let rank_i = i32::try_from(rank)
        .map_err(|_| AccError::config(format!("rank {rank} is out of range")))?;

    let mut resolved = Vec::with_capacity(axes.len());
    for &axis in axes {
        let normalized = normalize_axis(axis, rank);
        if !(0..rank_i).contains(&normalized) {
            return Err(AccError::config(format!(
                "reduce axis {axis} out of range for rank {rank}"
            )));
        }
        let normalized = normalized as usize;
        if !resolved.contains(&normalized) {
            resolved.push(normalized);
        }
    }
    Ok(resolved)
}

/// Logical output shape of reducing `input` over `axes`.
///
/// Reduced axes become 1 when `keep_dims` is set and disappear otherwise.
pub fn infer_output_dims(input: &[usize], axes: &[usize], keep_dims: bool) -> DimsVector {
    input
        .iter()
        .enumerate()
        .filter_map(|(i, &d)| match (axes.contains(&i), keep_dims) {
            (false, _) => Some(d),
            (true, true) => Some(1),
            (true, false) => None,
        })
        .collect()
}

/// Re-insert a size-1 dimension at every reduced axis of a dimension-dropped
/// output, restoring the input's rank.
pub fn pad_dims(output: &[usize], axes: &[usize]) -> AccResult<DimsVector> {
    let mut sorted = axes.to_vec();
    sorted.sort_unstable();
    sorted.dedup();

    let mut dims = output.to_vec();
    for axis in sorted {
        if axis > dims.len() {
            return Err(AccError::config(format!(
                "cannot pad output of rank {} at axis {axis}",
                output.len()
            )));
        }
        dims.insert(axis, 1);
    }
    Ok(dims)
}
