//! Image-to-image reshape, used to collapse a padded reduce result onto
//! the real output shape.

use tensorpack_common::dims::{count, format_dims, get_dim, DimsVector};
use tensorpack_common::{AccError, AccResult};
use tracing::debug;

use crate::acc::{unary_io, LayerAcc};
use crate::build_options::precision_options;
use crate::execute_unit::{ExecuteUnit, KernelArg, KernelLaunch};
use crate::image::{image_extent, Blob};
use crate::param::LayerParam;
use crate::runtime::OpenClContext;
use crate::workgroup::round_up_global;

pub const RESHAPE_PROGRAM: &str = "reshape";
pub const RESHAPE_KERNEL: &str = "ImageToImage";

fn dims_int4(dims: &[usize]) -> AccResult<[i32; 4]> {
    let mut out = [0i32; 4];
    for (i, slot) in out.iter_mut().enumerate() {
        let d = get_dim(dims, i);
        *slot = i32::try_from(d)
            .map_err(|_| AccError::config(format!("dim {d} does not fit a kernel int")))?;
    }
    Ok(out)
}

#[derive(Debug, Default)]
pub struct OpenClReshapeLayerAcc {
    name: String,
    context: Option<OpenClContext>,
    unit: Option<ExecuteUnit>,
    target_dims: DimsVector,
    launch: Option<KernelLaunch>,
}

impl OpenClReshapeLayerAcc {
    pub fn new() -> Self {
        Self::default()
    }

    /// Output shape resolved at init.
    pub fn target_dims(&self) -> &[usize] {
        &self.target_dims
    }

    pub fn launch(&self) -> Option<&KernelLaunch> {
        self.launch.as_ref()
    }
}

impl LayerAcc for OpenClReshapeLayerAcc {
    fn init(
        &mut self,
        context: &OpenClContext,
        param: &LayerParam,
        inputs: &[Blob],
        outputs: &[Blob],
    ) -> AccResult<()> {
        let param = param.as_reshape()?;
        let (input, output) = unary_io(&param.name, inputs, outputs)?;
        let target = param.resolve_shape(input.dims())?;
        if target != output.dims() {
            return Err(AccError::config(format!(
                "{}: reshape of {} resolves to {}, output blob is {}",
                param.name,
                format_dims(input.dims()),
                format_dims(&target),
                format_dims(output.dims())
            )));
        }

        let options = precision_options(context.precision());
        let unit = context.runtime().create_execute_unit(RESHAPE_PROGRAM, RESHAPE_KERNEL, &options)?;

        self.name = param.name.clone();
        self.context = Some(context.clone());
        self.unit = Some(unit);
        self.target_dims = target;
        self.launch = None;
        debug!(layer = %self.name, "reshape stage initialized");
        Ok(())
    }

    fn reshape(&mut self, inputs: &[Blob], outputs: &[Blob]) -> AccResult<()> {
        self.launch = None;
        let (context, unit) = match (&self.context, &self.unit) {
            (Some(c), Some(u)) => (c, u),
            _ => return Err(AccError::NotReady("reshape stage used before init")),
        };
        let (input, output) = unary_io(&self.name, inputs, outputs)?;
        if count(input.dims()) != count(output.dims()) {
            return Err(AccError::config(format!(
                "{}: cannot reshape {} into {}",
                self.name,
                format_dims(input.dims()),
                format_dims(output.dims())
            )));
        }

        let (cw, hb) = image_extent(output.dims())?;
        let global = [cw, hb];
        let local = context.runtime().default_local_ws_2d(unit, global);
        let dispatch = round_up_global(global, local)?;
        let args = vec![
            KernelArg::U32(global[0]),
            KernelArg::U32(global[1]),
            KernelArg::Image(input.image()?),
            KernelArg::Image(output.image()?),
            KernelArg::Int4(dims_int4(input.dims())?),
            KernelArg::Int4(dims_int4(output.dims())?),
        ];
        debug!(
            layer = %self.name,
            from = %format_dims(input.dims()),
            to = %format_dims(output.dims()),
            ?global,
            ?local,
            "reshape stage bound"
        );
        self.target_dims = output.dims().to_vec();
        self.launch = Some(KernelLaunch { global: dispatch, local, args });
        Ok(())
    }

    fn forward(&mut self, _inputs: &[Blob], _outputs: &[Blob]) -> AccResult<()> {
        let (context, unit, launch) = match (&self.context, &self.unit, &self.launch) {
            (Some(c), Some(u), Some(l)) => (c, u, l),
            _ => return Err(AccError::NotReady("reshape stage has no bound launch")),
        };
        context.runtime().enqueue(unit, launch)
    }
}
