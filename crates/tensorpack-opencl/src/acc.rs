//! The accelerator lifecycle shared by every OpenCL layer.

use tensorpack_common::dims::format_dims;
use tensorpack_common::{AccError, AccResult};

use crate::image::Blob;
use crate::param::LayerParam;
use crate::runtime::OpenClContext;

/// Highest rank the 4-D packed image layout can express.
pub const MAX_PACKED_RANK: usize = 4;

/// An OpenCL layer accelerator.
///
/// `init` builds kernels once; `reshape` plans and binds for the current
/// blob shapes; `forward` submits what `reshape` bound. A failed `init` or
/// `reshape` leaves the layer unable to `forward` until the next successful
/// `reshape`.
pub trait LayerAcc {
    fn init(
        &mut self,
        context: &OpenClContext,
        param: &LayerParam,
        inputs: &[Blob],
        outputs: &[Blob],
    ) -> AccResult<()>;

    fn reshape(&mut self, inputs: &[Blob], outputs: &[Blob]) -> AccResult<()>;

    fn forward(&mut self, inputs: &[Blob], outputs: &[Blob]) -> AccResult<()>;
}

/// The single input and single output of a unary layer, with their shapes
/// checked against the packed layout.
pub fn unary_io<'a>(
    layer: &str,
    inputs: &'a [Blob],
    outputs: &'a [Blob],
) -> AccResult<(&'a Blob, &'a Blob)> {
    let (input, output) = match (inputs, outputs) {
        ([input], [output]) => (input, output),
        _ => {
            return Err(AccError::config(format!(
                "{layer}: expected 1 input and 1 output, got {} and {}",
                inputs.len(),
                outputs.len()
            )))
        }
    };
    check_packable(layer, input)?;
    check_packable(layer, output)?;
    if input.dims().is_empty() {
        return Err(AccError::config(format!("{layer}: input '{}' is a scalar", input.name())));
    }
    Ok((input, output))
}

fn check_packable(layer: &str, blob: &Blob) -> AccResult<()> {
    let dims = blob.dims();
    if dims.len() > MAX_PACKED_RANK {
        return Err(AccError::config(format!(
            "{layer}: blob '{}' {} has rank {} > {MAX_PACKED_RANK}",
            blob.name(),
            format_dims(dims),
            dims.len()
        )));
    }
    if dims.contains(&0) {
        return Err(AccError::config(format!(
            "{layer}: blob '{}' {} has an empty dimension",
            blob.name(),
            format_dims(dims)
        )));
    }
    Ok(())
}
