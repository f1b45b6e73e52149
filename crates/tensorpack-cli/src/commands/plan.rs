//! `tensorpack plan`: run a reduce layer through init and reshape on the
//! mock device and report what would be launched.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use tensorpack_common::dims::format_dims;
use tensorpack_common::{Precision, ReduceAccelConfig};
use tensorpack_opencl::axis::{infer_output_dims, resolve_axes};
use tensorpack_opencl::layout::PackedLayout;
use tensorpack_opencl::mock::MockRuntime;
use tensorpack_opencl::{
    Blob, KernelLaunch, LayerAcc, LayerParam, OpenClContext, OpenClReduceLayerAcc, ReduceKind,
    ReduceLayerParam,
};
use tracing::info;

#[derive(Args, Debug, Clone)]
pub struct PlanCommand {
    /// Input shape, NCHW order (e.g. 1,512,1,1)
    #[arg(long, value_name = "DIMS", value_delimiter = ',', required = true)]
    pub shape: Vec<usize>,

    /// Axes to reduce; negative values count from the back
    #[arg(long, value_name = "AXES", value_delimiter = ',', allow_negative_numbers = true, required = true)]
    pub axes: Vec<i32>,

    /// Remove reduced axes from the output shape
    #[arg(long)]
    pub drop_dims: bool,

    /// Reduction operator
    #[arg(long, default_value = "sum")]
    pub kind: ReduceKind,

    /// Precision mode (high, normal, low); overrides the configuration
    #[arg(long)]
    pub precision: Option<Precision>,

    /// Device local memory per work-group, in bytes
    #[arg(long, value_name = "BYTES", default_value_t = tensorpack_opencl::mock::DEFAULT_LOCAL_MEM_SIZE)]
    pub local_mem: u64,

    /// Device maximum work-group size
    #[arg(long, value_name = "N", default_value_t = tensorpack_opencl::mock::DEFAULT_MAX_WORKGROUP_SIZE)]
    pub max_wg: u32,

    /// Emit the plan as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Serialize)]
pub struct LaunchReport {
    pub kernel: String,
    pub global: [u32; 2],
    pub local: [u32; 2],
    pub args: Vec<String>,
}

impl LaunchReport {
    fn new(kernel: &str, launch: &KernelLaunch) -> Self {
        Self {
            kernel: kernel.to_string(),
            global: launch.global,
            local: launch.local,
            args: launch.args.iter().map(ToString::to_string).collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AdapterReport {
    pub padded: Vec<usize>,
    pub real: Vec<usize>,
    pub reshape: Option<LaunchReport>,
}

#[derive(Debug, Serialize)]
pub struct PlanReport {
    pub device: String,
    pub kind: String,
    pub precision: String,
    pub input: Vec<usize>,
    pub output: Vec<usize>,
    pub axes: Vec<usize>,
    pub output_image: String,
    pub local: bool,
    pub lanes: Option<u32>,
    pub repeat: Option<u32>,
    pub scratch_bytes: Option<u32>,
    pub reduce: LaunchReport,
    pub adapter: Option<AdapterReport>,
}

impl PlanCommand {
    pub fn execute(&self, config: &ReduceAccelConfig) -> Result<()> {
        let report = self.build_report(config)?;
        if self.json {
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else {
            print_report(&report);
        }
        Ok(())
    }

    /// Run init + reshape on a mock device and collect the resulting plan.
    pub fn build_report(&self, config: &ReduceAccelConfig) -> Result<PlanReport> {
        let mut config = config.clone();
        if let Some(precision) = self.precision {
            config.precision = precision;
        }
        let runtime = Arc::new(
            MockRuntime::from_config(&config)
                .with_local_mem_size(self.local_mem)
                .with_max_workgroup_size(self.max_wg),
        );
        let ctx = OpenClContext::new(runtime, config.clone());

        let axes = resolve_axes(&self.axes, self.shape.len()).context("Invalid --axes")?;
        let output_dims = infer_output_dims(&self.shape, &axes, !self.drop_dims);
        let input = ctx.allocate_tensor_image(&self.shape).context("Failed to allocate input image")?;
        let output =
            ctx.allocate_tensor_image(&output_dims).context("Failed to allocate output image")?;
        let inputs = [Blob::new("input", self.shape.clone()).with_image(input)];
        let outputs = [Blob::new("output", output_dims.clone()).with_image(output)];

        let param = LayerParam::Reduce(ReduceLayerParam::new(
            "reduce",
            self.kind,
            self.axes.clone(),
            !self.drop_dims,
        ));
        let mut acc = OpenClReduceLayerAcc::new();
        acc.init(&ctx, &param, &inputs, &outputs).context("Reduce layer init failed")?;
        acc.reshape(&inputs, &outputs).context("Reduce layer reshape failed")?;
        let plan = acc.plan().context("Reduce layer produced no plan")?;
        info!(kernel = %plan.kernel, "planned");

        let kernel_out = acc.adapter().map_or(output_dims.as_slice(), |a| a.padded_dims());
        let lr = plan.geometry.local_reduction;
        Ok(PlanReport {
            device: ctx.runtime().name().to_string(),
            kind: self.kind.to_string(),
            precision: config.precision.to_string(),
            input: self.shape.clone(),
            output: output_dims.clone(),
            axes,
            output_image: PackedLayout::from_dims(kernel_out).to_string(),
            local: plan.kernel.is_local(),
            lanes: lr.map(|l| l.lanes),
            repeat: lr.map(|l| l.repeat),
            scratch_bytes: lr.map(|l| l.scratch_bytes),
            reduce: LaunchReport::new(&plan.kernel.name(), &plan.launch),
            adapter: acc.adapter().map(|a| AdapterReport {
                padded: a.padded_dims().to_vec(),
                real: output_dims.clone(),
                reshape: a
                    .stage()
                    .and_then(|s| s.launch())
                    .map(|l| LaunchReport::new(tensorpack_opencl::reshape::RESHAPE_KERNEL, l)),
            }),
        })
    }
}

fn print_launch(report: &LaunchReport) {
    println!("  kernel : {}", report.kernel);
    println!("  global : {:?}", report.global);
    println!("  local  : {:?}", report.local);
    for (i, arg) in report.args.iter().enumerate() {
        println!("  arg[{i:>2}]: {arg}");
    }
}

fn print_report(report: &PlanReport) {
    println!(
        "{} over {:?}: {} -> {} ({})",
        report.kind,
        report.axes,
        format_dims(&report.input),
        format_dims(&report.output),
        report.precision
    );
    println!("device {}, output image {}", report.device, report.output_image);
    if let (Some(lanes), Some(repeat), Some(scratch)) =
        (report.lanes, report.repeat, report.scratch_bytes)
    {
        println!("tree reduction: {lanes} lanes x {repeat} passes, {scratch} B local scratch");
    }
    println!("reduce:");
    print_launch(&report.reduce);
    if let Some(adapter) = &report.adapter {
        println!(
            "reshape {} -> {}:",
            format_dims(&adapter.padded),
            format_dims(&adapter.real)
        );
        if let Some(reshape) = &adapter.reshape {
            print_launch(reshape);
        }
    }
}
