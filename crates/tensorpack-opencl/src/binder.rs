//! Positional argument binding for the reduce kernels.
//!
//! Every reduce kernel shares the same leading arguments:
//!
//! | # | argument |
//! |---|---|
//! | 0, 1 | unrounded global work size |
//! | 2, 3 | input image, output image |
//! | 4..8 | input N, C, H, W |
//! | 8, 9, 10 | full channel blocks, channel remainder, `W * blocks` |
//! | 11 | reduced length |
//!
//! followed by the `int4` axis mask for `ReduceMultiAxis`, or the repeat
//! count and the `__local` scratch for the `…Local` kernels.

use tensorpack_common::{get_dim, AccError, AccResult};

use crate::execute_unit::{KernelArg, KernelLaunch};
use crate::image::ImageHandle;
use crate::layout::ChannelSplit;
use crate::selector::ReduceKernel;
use crate::workgroup::Geometry;

fn as_i32(what: &str, value: usize) -> AccResult<KernelArg> {
    i32::try_from(value)
        .map(KernelArg::I32)
        .map_err(|_| AccError::config(format!("{what} {value} does not fit a kernel int")))
}

/// Build the complete launch for `kernel` reading `input` (logical dims
/// `input_dims`) and writing `output`.
pub fn bind_reduce_launch(
    kernel: &ReduceKernel,
    geometry: &Geometry,
    input_dims: &[usize],
    input: ImageHandle,
    output: ImageHandle,
) -> AccResult<KernelLaunch> {
    let split = ChannelSplit::from_dims(input_dims);
    let width = get_dim(input_dims, 3);
    let cw4 = width.checked_mul(split.full_blocks).ok_or_else(|| {
        AccError::config(format!("width {width} x {} blocks overflows", split.full_blocks))
    })?;

    let mut args = Vec::with_capacity(14);
    args.push(KernelArg::U32(geometry.global[0]));
    args.push(KernelArg::U32(geometry.global[1]));
    args.push(KernelArg::Image(input));
    args.push(KernelArg::Image(output));
    for (index, name) in ["batch", "channel", "height", "width"].into_iter().enumerate() {
        args.push(as_i32(name, get_dim(input_dims, index))?);
    }
    args.push(as_i32("channel blocks", split.full_blocks)?);
    args.push(as_i32("channel remainder", split.remainder)?);
    args.push(as_i32("cw4", cw4)?);
    args.push(as_i32("reduced length", kernel.reduced_length(input_dims))?);

    match kernel {
        ReduceKernel::MultiAxis { mask } => args.push(KernelArg::Int4(mask.as_kernel_arg())),
        ReduceKernel::Axis { local: true, .. } => {
            let lr = geometry.local_reduction.ok_or_else(|| {
                AccError::InternalConsistency(format!(
                    "{} planned without a local reduction",
                    kernel.name()
                ))
            })?;
            args.push(as_i32("repeat", lr.repeat as usize)?);
            args.push(KernelArg::LocalMemory(lr.scratch_bytes));
        }
        ReduceKernel::Axis { local: false, .. } => {}
    }

    Ok(KernelLaunch { global: geometry.dispatch, local: geometry.local, args })
}
