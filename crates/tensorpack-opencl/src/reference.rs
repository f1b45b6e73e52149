//! CPU reference reductions and packed-image conversion.
//!
//! These follow the reduce kernels' operator definitions and serve as the
//! ground truth when validating plans, layouts and device output.

use tensorpack_common::dims::{count, format_dims, get_dim, DimsVector};
use tensorpack_common::{AccError, AccResult};

use crate::axis::infer_output_dims;
use crate::layout::{PackedLayout, CHANNEL_PACK};
use crate::param::ReduceKind;

fn init_value(kind: ReduceKind) -> f64 {
    match kind {
        ReduceKind::Max => f64::NEG_INFINITY,
        ReduceKind::Min => f64::INFINITY,
        ReduceKind::Prod => 1.0,
        _ => 0.0,
    }
}

fn combine(kind: ReduceKind, acc: f64, x: f64) -> f64 {
    match kind {
        ReduceKind::Sum | ReduceKind::Mean | ReduceKind::LogSum => acc + x,
        ReduceKind::Max => acc.max(x),
        ReduceKind::Min => acc.min(x),
        ReduceKind::Prod => acc * x,
        ReduceKind::L1 => acc + x.abs(),
        ReduceKind::L2 | ReduceKind::SumSquare => acc + x * x,
        ReduceKind::LogSumExp => acc + x.exp(),
    }
}

fn finish(kind: ReduceKind, acc: f64, n: usize) -> f64 {
    match kind {
        ReduceKind::Mean => acc / n as f64,
        ReduceKind::L2 => acc.sqrt(),
        ReduceKind::LogSum | ReduceKind::LogSumExp => acc.ln(),
        _ => acc,
    }
}

fn check_len(what: &str, data: &[f32], expected: usize, dims: &[usize]) -> AccResult<()> {
    if data.len() != expected {
        return Err(AccError::config(format!(
            "{what}: {} values for shape {} (expected {expected})",
            data.len(),
            format_dims(dims)
        )));
    }
    Ok(())
}

/// Reduce a row-major tensor of shape `dims` over `axes`.
///
/// `axes` must already be normalized. Returns the values and the output
/// shape, which follows [`infer_output_dims`].
pub fn ref_reduce(
    input: &[f32],
    dims: &[usize],
    axes: &[usize],
    kind: ReduceKind,
    keep_dims: bool,
) -> AccResult<(Vec<f32>, DimsVector)> {
    check_len("ref_reduce", input, count(dims), dims)?;
    if let Some(bad) = axes.iter().find(|&&a| a >= dims.len()) {
        return Err(AccError::config(format!(
            "ref_reduce: axis {bad} out of range for {}",
            format_dims(dims)
        )));
    }

    let kept = infer_output_dims(dims, axes, true);
    let mut acc = vec![init_value(kind); count(&kept)];
    let reduced: usize = axes.iter().map(|&a| dims[a]).product();

    // Walk the input in row-major order, tracking the matching output index.
    let mut index = vec![0usize; dims.len()];
    for &x in input {
        let mut out = 0;
        for (axis, (&i, &k)) in index.iter().zip(&kept).enumerate() {
            let i = if axes.contains(&axis) { 0 } else { i };
            out = out * k + i;
        }
        acc[out] = combine(kind, acc[out], f64::from(x));

        for axis in (0..dims.len()).rev() {
            index[axis] += 1;
            if index[axis] < dims[axis] {
                break;
            }
            index[axis] = 0;
        }
    }

    let values = acc.into_iter().map(|a| finish(kind, a, reduced) as f32).collect();
    Ok((values, infer_output_dims(dims, axes, keep_dims)))
}

/// Drop size-1 `axes` from `dims`.
pub fn ref_squeeze(dims: &[usize], axes: &[usize]) -> AccResult<DimsVector> {
    if let Some(&bad) = axes.iter().find(|&&a| get_dim(dims, a) != 1 || a >= dims.len()) {
        return Err(AccError::config(format!(
            "cannot squeeze axis {bad} of {}",
            format_dims(dims)
        )));
    }
    Ok(infer_output_dims(dims, axes, false))
}

/// Texel-major RGBA buffer of a logical NCHW tensor in the packed layout.
///
/// The buffer is `hb` rows of `cw` texels with four lanes each; lanes past
/// `C` in the tail block are zero.
pub fn pack_nc4hw4_image(input: &[f32], dims: &[usize]) -> AccResult<Vec<f32>> {
    check_len("pack_nc4hw4_image", input, count(dims), dims)?;
    let layout = PackedLayout::from_dims(dims);
    let (n, c, h, w) = (get_dim(dims, 0), get_dim(dims, 1), get_dim(dims, 2), get_dim(dims, 3));
    let mut image = vec![0.0; layout.occupancy() * CHANNEL_PACK];
    for ni in 0..n {
        for ci in 0..c {
            for hi in 0..h {
                for wi in 0..w {
                    let x = (ci / CHANNEL_PACK) * w + wi;
                    let y = ni * h + hi;
                    let texel = (y * layout.cw + x) * CHANNEL_PACK + ci % CHANNEL_PACK;
                    image[texel] = input[((ni * c + ci) * h + hi) * w + wi];
                }
            }
        }
    }
    Ok(image)
}

/// Inverse of [`pack_nc4hw4_image`]; padding lanes are discarded.
pub fn unpack_nc4hw4_image(image: &[f32], dims: &[usize]) -> AccResult<Vec<f32>> {
    let layout = PackedLayout::from_dims(dims);
    check_len("unpack_nc4hw4_image", image, layout.occupancy() * CHANNEL_PACK, dims)?;
    let (n, c, h, w) = (get_dim(dims, 0), get_dim(dims, 1), get_dim(dims, 2), get_dim(dims, 3));
    let mut out = vec![0.0; count(dims)];
    for ni in 0..n {
        for ci in 0..c {
            for hi in 0..h {
                for wi in 0..w {
                    let x = (ci / CHANNEL_PACK) * w + wi;
                    let y = ni * h + hi;
                    out[((ni * c + ci) * h + hi) * w + wi] =
                        image[(y * layout.cw + x) * CHANNEL_PACK + ci % CHANNEL_PACK];
                }
            }
        }
    }
    Ok(out)
}
