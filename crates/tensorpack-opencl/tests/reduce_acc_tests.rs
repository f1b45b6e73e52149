//! Lifecycle tests for [`OpenClReduceLayerAcc`] against the mock runtime.

use std::sync::Arc;

use tensorpack_common::{AccError, Precision, ReduceAccelConfig};
use tensorpack_opencl::axis::infer_output_dims;
use tensorpack_opencl::mock::MockRuntime;
use tensorpack_opencl::{
    Blob, KernelArg, LayerAcc, LayerParam, OpenClContext, OpenClReduceLayerAcc, ReduceAxis,
    ReduceKernel, ReduceKind, ReduceLayerParam,
};

// ── Helpers ──────────────────────────────────────────────────────────

struct Fixture {
    runtime: Arc<MockRuntime>,
    ctx: OpenClContext,
}

impl Fixture {
    fn new(runtime: MockRuntime) -> Self {
        let runtime = Arc::new(runtime);
        let ctx = OpenClContext::new(runtime.clone(), ReduceAccelConfig::default());
        Self { runtime, ctx }
    }

    fn high() -> Self {
        Self::new(MockRuntime::new().with_precision(Precision::High))
    }

    fn blob(&self, name: &str, dims: &[usize]) -> Blob {
        let image = self.ctx.allocate_tensor_image(dims).unwrap();
        Blob::new(name, dims.to_vec()).with_image(image)
    }

    /// Input and matching output blobs for reducing `dims` over `axes`.
    fn io(&self, dims: &[usize], axes: &[usize], keep_dims: bool) -> ([Blob; 1], [Blob; 1]) {
        let out = infer_output_dims(dims, axes, keep_dims);
        ([self.blob("input", dims)], [self.blob("output", &out)])
    }

    fn ready(&self, param: &LayerParam, inputs: &[Blob], outputs: &[Blob]) -> OpenClReduceLayerAcc {
        let mut acc = OpenClReduceLayerAcc::new();
        acc.init(&self.ctx, param, inputs, outputs).unwrap();
        acc.reshape(inputs, outputs).unwrap();
        acc
    }
}

fn param(kind: ReduceKind, axis: &[i32], keep_dims: bool) -> LayerParam {
    LayerParam::Reduce(ReduceLayerParam::new("reduce0", kind, axis.to_vec(), keep_dims))
}

fn int_at(args: &[KernelArg], i: usize) -> i32 {
    match args[i] {
        KernelArg::I32(v) => v,
        other => panic!("arg {i} is {other}, expected int"),
    }
}

// ── Scenarios ────────────────────────────────────────────────────────

#[test]
fn channel_reduce_of_small_tensor_uses_plain_kernel() {
    let fx = Fixture::high();
    let (inputs, outputs) = fx.io(&[1, 8, 4, 4], &[1], true);
    let acc = fx.ready(&param(ReduceKind::Sum, &[1], true), &inputs, &outputs);

    assert_eq!(acc.kernel(), Some(ReduceKernel::Axis { axis: ReduceAxis::Channel, local: false }));
    let plan = acc.plan().unwrap();
    assert_eq!(plan.launch.global, [4, 4]);
    assert_eq!(plan.launch.args.len(), 12);
    assert_eq!(plan.launch.args[3], KernelArg::Image(outputs[0].image().unwrap()));
    // channel blocks of the input
    assert_eq!(int_at(&plan.launch.args, 8), 2);
    assert_eq!(int_at(&plan.launch.args, 11), 8);
    assert!(acc.adapter().is_none());
}

#[test]
fn long_channel_into_single_texel_uses_tree_reduction() {
    let fx = Fixture::high();
    let (inputs, outputs) = fx.io(&[1, 512, 1, 1], &[1], true);
    let acc = fx.ready(&param(ReduceKind::Mean, &[1], true), &inputs, &outputs);

    assert_eq!(acc.kernel().unwrap().name(), "ReduceC1Local");
    let plan = acc.plan().unwrap();
    let lr = plan.geometry.local_reduction.unwrap();
    // min(64 KiB / 16, 1024, 128 channel blocks) = 128
    assert_eq!(lr.lanes, 128);
    assert!(lr.lanes.is_power_of_two());
    assert_eq!(plan.launch.global, [128, 1]);
    assert_eq!(plan.launch.local, [128, 1]);
    assert_eq!(plan.launch.args[12], KernelArg::I32(1));
    assert_eq!(plan.launch.args[13], KernelArg::LocalMemory(128 * 16));
}

#[test]
fn dropped_axes_go_through_padded_intermediate() {
    let fx = Fixture::high();
    let (inputs, outputs) = fx.io(&[2, 4, 3, 3], &[0, 2], false);
    assert_eq!(outputs[0].dims(), &[4, 3]);
    let mut acc = fx.ready(&param(ReduceKind::Max, &[0, 2], false), &inputs, &outputs);

    let adapter = acc.adapter().unwrap();
    assert_eq!(adapter.padded_dims(), &[1, 4, 1, 3]);
    let padded = adapter.blob().image().unwrap();

    let plan = acc.plan().unwrap();
    assert_eq!(plan.kernel.name(), "ReduceMultiAxis");
    assert_eq!(plan.launch.args[3], KernelArg::Image(padded));
    assert_eq!(plan.launch.args[12], KernelArg::Int4([1, 1, 0, 0]));

    let stage = adapter.stage().unwrap().launch().unwrap();
    assert_eq!(stage.args[2], KernelArg::Image(padded));
    assert_eq!(stage.args[3], KernelArg::Image(outputs[0].image().unwrap()));
    assert_eq!(stage.args[4], KernelArg::Int4([1, 4, 1, 3]));
    assert_eq!(stage.args[5], KernelArg::Int4([4, 3, 1, 1]));

    acc.forward(&inputs, &outputs).unwrap();
    assert_eq!(fx.runtime.enqueued_kernels(), vec!["ReduceMultiAxis", "ImageToImage"]);
}

#[test]
fn keep_dims_writes_straight_to_output() {
    let fx = Fixture::high();
    let (inputs, outputs) = fx.io(&[2, 4, 3, 3], &[0, 2], true);
    let live_before = fx.runtime.live_images().len();
    let mut acc = fx.ready(&param(ReduceKind::Sum, &[0, 2], true), &inputs, &outputs);

    assert!(acc.adapter().is_none());
    assert_eq!(fx.runtime.live_images().len(), live_before);
    acc.forward(&inputs, &outputs).unwrap();
    assert_eq!(fx.runtime.enqueued_kernels(), vec!["ReduceMultiAxis"]);
}

// ── Axes ─────────────────────────────────────────────────────────────

#[test]
fn duplicate_and_negative_axes_collapse() {
    let fx = Fixture::high();
    let (inputs, outputs) = fx.io(&[2, 4, 3, 3], &[0, 3], true);
    let acc = fx.ready(&param(ReduceKind::Sum, &[3, -1, 0, -4], true), &inputs, &outputs);

    assert_eq!(acc.axes(), Some(&[3, 0][..]));
    match acc.kernel().unwrap() {
        ReduceKernel::MultiAxis { mask } => {
            assert_eq!(mask.bits_set(), 2);
            assert_eq!(mask.as_kernel_arg(), [1, 0, 1, 0]);
        }
        other => panic!("expected multi-axis kernel, got {other}"),
    }
    assert_eq!(int_at(&acc.plan().unwrap().launch.args, 11), 2 * 3);
}

#[test]
fn out_of_range_axis_fails_init() {
    let fx = Fixture::high();
    let inputs = [fx.blob("input", &[1, 4, 2, 2])];
    let outputs = [fx.blob("output", &[1, 4, 2, 2])];
    let err = OpenClReduceLayerAcc::new()
        .init(&fx.ctx, &param(ReduceKind::Sum, &[4], true), &inputs, &outputs)
        .unwrap_err();
    assert!(matches!(err, AccError::Config(_)), "{err:?}");
}

#[test]
fn lower_rank_inputs_read_missing_dims_as_one() {
    let fx = Fixture::high();
    // [N, C] tensor reduced over channels.
    let (inputs, outputs) = fx.io(&[3, 600], &[1], true);
    let acc = fx.ready(&param(ReduceKind::Sum, &[-1], true), &inputs, &outputs);
    assert_eq!(acc.kernel().unwrap().name(), "ReduceC1Local");
    let args = &acc.plan().unwrap().launch.args;
    assert_eq!(&args[4..8], &[KernelArg::I32(3), KernelArg::I32(600), KernelArg::I32(1), KernelArg::I32(1)]);
}

// ── Channel remainder ────────────────────────────────────────────────

#[test]
fn channel_remainder_floors_blocks_for_tree_reduction() {
    let fx = Fixture::high();
    // 514 channels: 128 full blocks and 2 leftover lanes.
    let (inputs, outputs) = fx.io(&[1, 514, 1, 1], &[1], true);
    let acc = fx.ready(&param(ReduceKind::Sum, &[1], true), &inputs, &outputs);
    let plan = acc.plan().unwrap();
    let lr = plan.geometry.local_reduction.unwrap();
    assert_eq!(lr.lanes, 128);
    assert_eq!(lr.repeat, 1);
    assert_eq!(int_at(&plan.launch.args, 8), 128);
    assert_eq!(int_at(&plan.launch.args, 9), 2);
    assert_eq!(int_at(&plan.launch.args, 10), 128);
    assert_eq!(int_at(&plan.launch.args, 11), 514);
}

#[test]
fn half_precision_doubles_scratch_capacity() {
    let fx = Fixture::new(
        MockRuntime::new().with_precision(Precision::Normal).with_local_mem_size(4096),
    );
    let (inputs, outputs) = fx.io(&[1, 4, 1, 2048], &[3], true);
    let acc = fx.ready(&param(ReduceKind::Sum, &[3], true), &inputs, &outputs);
    let lr = acc.plan().unwrap().geometry.local_reduction.unwrap();
    // 4096 / (4 * 2) = 512 slots
    assert_eq!(lr.lanes, 512);
    assert_eq!(lr.repeat, 4);
    assert_eq!(lr.scratch_bytes, 4096);
}

// ── Failures ─────────────────────────────────────────────────────────

#[test]
fn build_failure_aborts_init_and_frees_intermediate() {
    let fx = Fixture::new(MockRuntime::new().failing_build("ReduceMultiAxis"));
    let (inputs, outputs) = fx.io(&[2, 4, 3, 3], &[0, 2], false);
    let live_before = fx.runtime.live_images();

    let mut acc = OpenClReduceLayerAcc::new();
    let err = acc.init(&fx.ctx, &param(ReduceKind::Sum, &[0, 2], false), &inputs, &outputs).unwrap_err();
    assert!(matches!(err, AccError::BuildFailure { ref kernel, .. } if kernel == "ReduceMultiAxis"));
    assert_eq!(fx.runtime.live_images(), live_before);
    assert!(matches!(acc.reshape(&inputs, &outputs), Err(AccError::NotReady(_))));
}

#[test]
fn reshape_stage_build_failure_aborts_init() {
    let fx = Fixture::new(MockRuntime::new().failing_build("ImageToImage"));
    let (inputs, outputs) = fx.io(&[1, 8, 2, 2], &[1], false);
    let err = OpenClReduceLayerAcc::new()
        .init(&fx.ctx, &param(ReduceKind::Sum, &[1], false), &inputs, &outputs)
        .unwrap_err();
    assert_eq!(err.code(), 0x3001);
}

#[test]
fn intermediate_allocation_failure_is_reported() {
    let fx = Fixture::high();
    let (inputs, outputs) = fx.io(&[1, 8, 2, 2], &[1], false);
    let failing = OpenClContext::new(
        Arc::new(MockRuntime::new().failing_allocations()),
        ReduceAccelConfig::default(),
    );
    let err = OpenClReduceLayerAcc::new()
        .init(&failing, &param(ReduceKind::Sum, &[1], false), &inputs, &outputs)
        .unwrap_err();
    assert!(matches!(err, AccError::Allocation { .. }), "{err:?}");
}

#[test]
fn dropping_the_layer_releases_the_intermediate() {
    let fx = Fixture::high();
    let (inputs, outputs) = fx.io(&[1, 8, 2, 2], &[1], false);
    let before = fx.runtime.live_images().len();
    let acc = fx.ready(&param(ReduceKind::Sum, &[1], false), &inputs, &outputs);
    assert_eq!(fx.runtime.live_images().len(), before + 1);
    drop(acc);
    assert_eq!(fx.runtime.live_images().len(), before);
}

// ── Reshape ──────────────────────────────────────────────────────────

#[test]
fn reshape_rebinds_for_new_shape_and_keeps_variant() {
    let fx = Fixture::high();
    let (inputs, outputs) = fx.io(&[1, 8, 4, 4], &[1], false);
    let mut acc = fx.ready(&param(ReduceKind::Sum, &[1], false), &inputs, &outputs);
    let first = acc.plan().unwrap().clone();

    let (inputs2, outputs2) = fx.io(&[1, 8, 8, 8], &[1], false);
    acc.reshape(&inputs2, &outputs2).unwrap();
    let second = acc.plan().unwrap();
    assert_eq!(second.kernel, first.kernel);
    assert_eq!(second.launch.global, [8, 8]);
    assert_eq!(acc.adapter().unwrap().padded_dims(), &[1, 1, 8, 8]);

    acc.forward(&inputs2, &outputs2).unwrap();
    assert_eq!(fx.runtime.enqueued_kernels(), vec!["ReduceC1", "ImageToImage"]);
}

#[test]
fn every_reduce_kind_builds_with_its_operator() {
    for kind in ReduceKind::ALL {
        let fx = Fixture::high();
        let (inputs, outputs) = fx.io(&[1, 4, 2, 2], &[2], true);
        let mut acc = fx.ready(&param(kind, &[2], true), &inputs, &outputs);
        acc.forward(&inputs, &outputs).unwrap();
        assert_eq!(fx.runtime.launches().len(), 1, "{kind}");
    }
}
