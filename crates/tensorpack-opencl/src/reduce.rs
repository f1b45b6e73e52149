//! The OpenCL reduce layer accelerator.
//!
//! `init` resolves the axes, allocates the shape adapter when reduced axes
//! are dropped, chooses the kernel variant and builds it. The variant is
//! fixed from then on. Every `reshape` re-plans geometry and rebinds the
//! whole argument list; `forward` submits the bound reduce kernel, then the
//! adapter's reshape stage when there is one.

use tensorpack_common::dims::{format_dims, DimsVector};
use tensorpack_common::{AccError, AccResult};
use tracing::{debug, info, warn};

use crate::acc::{unary_io, LayerAcc};
use crate::axis::infer_output_dims;
use crate::binder::bind_reduce_launch;
use crate::build_options::reduce_build_options;
use crate::execute_unit::{ExecuteUnit, KernelLaunch};
use crate::image::{Blob, ImageHandle};
use crate::param::{LayerParam, ReduceLayerParam};
use crate::runtime::OpenClContext;
use crate::selector::{ReduceKernel, VariantSelector};
use crate::shape_adapter::ShapeAdapter;
use crate::workgroup::{plan_geometry, Geometry};

pub const REDUCE_PROGRAM: &str = "reduce";

/// Everything `forward` needs, rebuilt as a whole on each `reshape`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionPlan {
    pub kernel: ReduceKernel,
    pub geometry: Geometry,
    pub launch: KernelLaunch,
}

/// State that exists only after a successful `init`.
#[derive(Debug)]
struct Initialized {
    context: OpenClContext,
    param: ReduceLayerParam,
    axes: Vec<usize>,
    kernel: ReduceKernel,
    unit: ExecuteUnit,
    adapter: Option<ShapeAdapter>,
}

#[derive(Debug, Default)]
pub struct OpenClReduceLayerAcc {
    state: Option<Initialized>,
    plan: Option<ExecutionPlan>,
}

fn check_output(param: &ReduceLayerParam, input: &[usize], axes: &[usize], output: &[usize]) -> AccResult<()> {
    let expected = infer_output_dims(input, axes, param.keep_dims);
    if expected != output {
        return Err(AccError::config(format!(
            "{}: reducing {} over {axes:?} (keep_dims={}) gives {}, output blob is {}",
            param.name,
            format_dims(input),
            param.keep_dims,
            format_dims(&expected),
            format_dims(output)
        )));
    }
    Ok(())
}

impl OpenClReduceLayerAcc {
    pub fn new() -> Self {
        Self::default()
    }

    /// Kernel chosen at init.
    pub fn kernel(&self) -> Option<ReduceKernel> {
        self.state.as_ref().map(|s| s.kernel)
    }

    /// Normalized axes resolved at init.
    pub fn axes(&self) -> Option<&[usize]> {
        self.state.as_ref().map(|s| s.axes.as_slice())
    }

    /// Current plan; `None` until a `reshape` succeeds.
    pub fn plan(&self) -> Option<&ExecutionPlan> {
        self.plan.as_ref()
    }

    /// The shape adapter, present only when reduced axes are dropped.
    pub fn adapter(&self) -> Option<&ShapeAdapter> {
        self.state.as_ref().and_then(|s| s.adapter.as_ref())
    }

    fn do_init(
        context: &OpenClContext,
        param: &LayerParam,
        inputs: &[Blob],
        outputs: &[Blob],
    ) -> AccResult<Initialized> {
        let param = param.as_reduce()?;
        context.config().validate()?;
        let (input, output) = unary_io(&param.name, inputs, outputs)?;
        let axes = param.resolve_axes(input.dims().len())?;
        check_output(param, input.dims(), &axes, output.dims())?;

        let mut adapter = if param.keep_dims {
            None
        } else {
            Some(ShapeAdapter::allocate(context, &param.name, output, &axes)?)
        };
        let kernel_out_dims: DimsVector = match &adapter {
            Some(a) => a.padded_dims().to_vec(),
            None => output.dims().to_vec(),
        };

        let selector = VariantSelector::from_config(context.config());
        let kernel = selector.select(input.dims(), &kernel_out_dims, &axes)?;
        let options = reduce_build_options(context.precision(), param.kind);
        let unit = context.runtime().create_execute_unit(REDUCE_PROGRAM, &kernel.name(), &options)?;

        if let Some(adapter) = adapter.as_mut() {
            adapter.init_stage(output)?;
        }

        info!(
            layer = %param.name,
            device = context.runtime().name(),
            kind = %param.kind,
            input = %format_dims(input.dims()),
            output = %format_dims(output.dims()),
            %kernel,
            adapter = adapter.is_some(),
            "reduce layer initialized"
        );
        Ok(Initialized { context: context.clone(), param: param.clone(), axes, kernel, unit, adapter })
    }

    fn do_reshape(state: &mut Initialized, inputs: &[Blob], outputs: &[Blob]) -> AccResult<ExecutionPlan> {
        let (input, output) = unary_io(&state.param.name, inputs, outputs)?;
        let axes = state.param.resolve_axes(input.dims().len())?;
        if axes != state.axes {
            return Err(AccError::config(format!(
                "{}: axes resolve to {axes:?} for {}, layer was initialized for {:?}",
                state.param.name,
                format_dims(input.dims()),
                state.axes
            )));
        }
        check_output(&state.param, input.dims(), &axes, output.dims())?;

        let (target_dims, target_image): (DimsVector, ImageHandle) =
            match (state.param.keep_dims, state.adapter.as_mut()) {
                (true, _) => (output.dims().to_vec(), output.image()?),
                (false, Some(adapter)) => {
                    adapter.reshape(output)?;
                    (adapter.padded_dims().to_vec(), adapter.blob().image()?)
                }
                (false, None) => {
                    return Err(AccError::InternalConsistency(format!(
                        "{}: dropped axes without a shape adapter",
                        state.param.name
                    )))
                }
            };

        let geometry = plan_geometry(
            &state.kernel,
            input.dims(),
            &target_dims,
            &state.unit,
            state.context.runtime(),
        )?;
        let launch = bind_reduce_launch(&state.kernel, &geometry, input.dims(), input.image()?, target_image)?;
        debug!(
            layer = %state.param.name,
            kernel = %state.kernel,
            global = ?geometry.global,
            local = ?geometry.local,
            args = launch.args.len(),
            "reduce layer bound"
        );
        Ok(ExecutionPlan { kernel: state.kernel, geometry, launch })
    }
}

impl LayerAcc for OpenClReduceLayerAcc {
    fn init(
        &mut self,
        context: &OpenClContext,
        param: &LayerParam,
        inputs: &[Blob],
        outputs: &[Blob],
    ) -> AccResult<()> {
        self.plan = None;
        self.state = None;
        match Self::do_init(context, param, inputs, outputs) {
            Ok(state) => {
                self.state = Some(state);
                Ok(())
            }
            Err(err) => {
                warn!(layer = %param.layer_name(), code = err.code(), %err, "reduce init failed");
                Err(err)
            }
        }
    }

    fn reshape(&mut self, inputs: &[Blob], outputs: &[Blob]) -> AccResult<()> {
        self.plan = None;
        let state = self.state.as_mut().ok_or(AccError::NotReady("reduce layer used before init"))?;
        match Self::do_reshape(state, inputs, outputs) {
            Ok(plan) => {
                self.plan = Some(plan);
                Ok(())
            }
            Err(err) => {
                warn!(layer = %state.param.name, code = err.code(), %err, "reduce reshape failed");
                Err(err)
            }
        }
    }

    fn forward(&mut self, inputs: &[Blob], outputs: &[Blob]) -> AccResult<()> {
        let state = self.state.as_mut().ok_or(AccError::NotReady("reduce layer used before init"))?;
        let plan = self
            .plan
            .as_ref()
            .ok_or(AccError::NotReady("reduce layer has no execution plan"))?;
        let (_, output) = unary_io(&state.param.name, inputs, outputs)?;

        state.context.runtime().enqueue(&state.unit, &plan.launch)?;
        match (state.param.keep_dims, state.adapter.as_mut()) {
            (true, _) => Ok(()),
            (false, Some(adapter)) => adapter.forward(output),
            (false, None) => Err(AccError::InternalConsistency(format!(
                "{}: dropped axes without a shape adapter",
                state.param.name
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::mock::MockRuntime;
    use crate::param::ReduceKind;
    use tensorpack_common::ReduceAccelConfig;

    fn setup() -> (Arc<MockRuntime>, OpenClContext) {
        let rt = Arc::new(MockRuntime::new());
        let ctx = OpenClContext::new(rt.clone(), ReduceAccelConfig::default());
        (rt, ctx)
    }

    fn blob(ctx: &OpenClContext, name: &str, dims: Vec<usize>) -> Blob {
        let image = ctx.allocate_tensor_image(&dims).unwrap();
        Blob::new(name, dims).with_image(image)
    }

    fn reduce(axis: Vec<i32>, keep_dims: bool) -> LayerParam {
        LayerParam::Reduce(ReduceLayerParam::new("sum", ReduceKind::Sum, axis, keep_dims))
    }

    #[test]
    fn wrong_param_kind_is_config_error() {
        let (_rt, ctx) = setup();
        let input = [blob(&ctx, "x", vec![1, 4, 2, 2])];
        let output = [blob(&ctx, "y", vec![1, 1, 2, 2])];
        let param = LayerParam::Reshape(crate::ReshapeLayerParam::to_dims("r", &[1, 1, 2, 2]).unwrap());
        let err = OpenClReduceLayerAcc::new().init(&ctx, &param, &input, &output).unwrap_err();
        assert!(matches!(err, AccError::Config(_)));
    }

    #[test]
    fn output_shape_must_match_reduction() {
        let (_rt, ctx) = setup();
        let input = [blob(&ctx, "x", vec![1, 4, 2, 2])];
        let output = [blob(&ctx, "y", vec![1, 4, 2, 2])];
        let err = OpenClReduceLayerAcc::new().init(&ctx, &reduce(vec![1], true), &input, &output).unwrap_err();
        assert!(err.to_string().contains("gives [1, 1, 2, 2]"), "{err}");
    }

    #[test]
    fn forward_requires_a_plan() {
        let (_rt, ctx) = setup();
        let input = [blob(&ctx, "x", vec![1, 4, 2, 2])];
        let output = [blob(&ctx, "y", vec![1, 1, 2, 2])];
        let mut acc = OpenClReduceLayerAcc::new();
        assert!(matches!(acc.forward(&input, &output), Err(AccError::NotReady(_))));
        acc.init(&ctx, &reduce(vec![1], true), &input, &output).unwrap();
        assert!(matches!(acc.forward(&input, &output), Err(AccError::NotReady(_))));
        acc.reshape(&input, &output).unwrap();
        acc.forward(&input, &output).unwrap();
    }

    #[test]
    fn failed_reshape_drops_the_plan() {
        let (_rt, ctx) = setup();
        let input = [blob(&ctx, "x", vec![1, 4, 2, 2])];
        let output = [blob(&ctx, "y", vec![1, 1, 2, 2])];
        let mut acc = OpenClReduceLayerAcc::new();
        acc.init(&ctx, &reduce(vec![1], true), &input, &output).unwrap();
        acc.reshape(&input, &output).unwrap();
        assert!(acc.plan().is_some());

        let wrong = [blob(&ctx, "y2", vec![1, 4, 2, 2])];
        assert!(acc.reshape(&input, &wrong).is_err());
        assert!(acc.plan().is_none());
        assert!(matches!(acc.forward(&input, &output), Err(AccError::NotReady(_))));
    }

    #[test]
    fn axes_changing_with_rank_is_rejected() {
        let (_rt, ctx) = setup();
        let input = [blob(&ctx, "x", vec![1, 4, 2, 2])];
        let output = [blob(&ctx, "y", vec![1, 4, 2, 1])];
        let mut acc = OpenClReduceLayerAcc::new();
        acc.init(&ctx, &reduce(vec![-1], true), &input, &output).unwrap();

        let input3 = [blob(&ctx, "x3", vec![4, 2, 2])];
        let output3 = [blob(&ctx, "y3", vec![4, 2, 1])];
        let err = acc.reshape(&input3, &output3).unwrap_err();
        assert!(matches!(err, AccError::Config(_)), "{err:?}");
    }

    #[test]
    fn invalid_config_fails_init() {
        let rt = Arc::new(MockRuntime::new());
        let config = ReduceAccelConfig { low_parallelism_threshold: 0, ..ReduceAccelConfig::default() };
        let ctx = OpenClContext::new(rt, config);
        let input = [blob(&ctx, "x", vec![1, 4, 2, 2])];
        let output = [blob(&ctx, "y", vec![1, 1, 2, 2])];
        let mut acc = OpenClReduceLayerAcc::new();
        assert!(matches!(
            acc.init(&ctx, &reduce(vec![1], true), &input, &output),
            Err(AccError::Config(_))
        ));
        assert!(acc.kernel().is_none());
    }
}
