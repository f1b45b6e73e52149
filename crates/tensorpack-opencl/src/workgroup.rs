//! Global/local work sizes for the reduce kernels.
//!
//! The naive kernels run one work-item per output texel on a `(cw, hb)`
//! grid. The tree-reduction kernels widen the first dimension by the lane
//! count so every output texel gets a whole work-group, and the lanes fold
//! the reduced axis in `repeat` strided passes before the tree step.

use tensorpack_common::{ceil_div, floor_pow2, get_dim, AccError, AccResult};

use crate::execute_unit::ExecuteUnit;
use crate::layout::PackedLayout;
use crate::runtime::DeviceRuntime;
use crate::selector::{ReduceAxis, ReduceKernel};

/// Packed lanes per texel; one tree slot holds a whole `FLOAT4`.
const LANES_PER_SLOT: u32 = 4;

/// Widest default tile along the first dimension.
const DEFAULT_TILE_X: u32 = 16;

// ---------------------------------------------------------------------------
// Backend default tiling
// ---------------------------------------------------------------------------

/// Default 2-D local size: a power-of-two tile no wider than 16 along x,
/// filled up along y to the work-group limit.
pub fn local_ws_2d_default(global: [u32; 2], max_workgroup_size: u32) -> [u32; 2] {
    let max_wg = max_workgroup_size.max(1);
    let lx = floor_pow2(global[0].min(DEFAULT_TILE_X).min(max_wg));
    let ly = floor_pow2(global[1].min(max_wg / lx));
    [lx, ly]
}

// ---------------------------------------------------------------------------
// Tree reduction sizing
// ---------------------------------------------------------------------------

/// Sizing of a local-memory tree reduction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalReduction {
    /// Work-items per output texel; always a power of two.
    pub lanes: u32,
    /// Strided passes each lane makes over the reduced axis.
    pub repeat: u32,
    /// `__local` scratch: one `FLOAT4` per lane.
    pub scratch_bytes: u32,
}

/// Length the local kernel walks: channel blocks on the channel axis,
/// the raw extent elsewhere.
///
/// The channel count is divided down, not up, so a trailing partial block
/// is not counted.
pub fn effective_reduce_len(axis: ReduceAxis, input_dims: &[usize]) -> usize {
    let len = get_dim(input_dims, axis.index());
    match axis {
        ReduceAxis::Channel => len / 4,
        _ => len,
    }
}

/// Lane count for a tree reduction over `reduce_len` elements.
pub fn local_reduction_lanes(
    local_mem_size: u64,
    workgroup_size_max: u32,
    element_bytes: u32,
    reduce_len: usize,
) -> u32 {
    let slot_bytes = u64::from(LANES_PER_SLOT * element_bytes.max(1));
    let candidate = (local_mem_size / slot_bytes)
        .min(u64::from(workgroup_size_max))
        .min(reduce_len as u64);
    // Bounded by workgroup_size_max, so the narrowing cannot truncate.
    floor_pow2(candidate as u32)
}

impl LocalReduction {
    pub fn plan(unit: &ExecuteUnit, element_bytes: u32, reduce_len: usize) -> AccResult<Self> {
        let lanes = local_reduction_lanes(
            unit.local_mem_size,
            unit.workgroup_size_max,
            element_bytes,
            reduce_len,
        );
        let repeat = u32::try_from(ceil_div(reduce_len, lanes as usize))
            .map_err(|_| AccError::config(format!("reduce length {reduce_len} exceeds u32")))?;
        Ok(Self { lanes, repeat, scratch_bytes: lanes * LANES_PER_SLOT * element_bytes })
    }
}

// ---------------------------------------------------------------------------
// Geometry
// ---------------------------------------------------------------------------

/// Launch geometry of one reduce dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    /// Work-items that map to output texels; bound as kernel args 0 and 1
    /// so the kernel can skip the padding items.
    pub global: [u32; 2],
    pub local: [u32; 2],
    /// `global` rounded up to a multiple of `local`; the enqueued range.
    pub dispatch: [u32; 2],
    /// Present only for the `…Local` kernels.
    pub local_reduction: Option<LocalReduction>,
}

/// Round each dimension of `global` up to a multiple of `local`.
pub fn round_up_global(global: [u32; 2], local: [u32; 2]) -> AccResult<[u32; 2]> {
    let mut dispatch = [0u32; 2];
    for (i, slot) in dispatch.iter_mut().enumerate() {
        let (g, l) = (global[i], local[i].max(1));
        *slot = g.div_ceil(l).checked_mul(l).ok_or_else(|| {
            AccError::config(format!("global size {g} rounded to {l} overflows u32"))
        })?;
    }
    Ok(dispatch)
}

fn extent_u32(what: &str, value: usize) -> AccResult<u32> {
    u32::try_from(value).map_err(|_| AccError::config(format!("{what} {value} exceeds u32")))
}

/// Plan the geometry of `kernel` writing an image shaped like
/// `kernel_out_dims`.
pub fn plan_geometry(
    kernel: &ReduceKernel,
    input_dims: &[usize],
    kernel_out_dims: &[usize],
    unit: &ExecuteUnit,
    runtime: &dyn DeviceRuntime,
) -> AccResult<Geometry> {
    let layout = PackedLayout::from_dims(kernel_out_dims);
    let cw = extent_u32("output width", layout.cw)?;
    let hb = extent_u32("output height", layout.hb)?;
    let element_bytes = runtime.precision().element_bytes();

    match kernel {
        ReduceKernel::Axis { axis, local: true } => {
            let reduce_len = effective_reduce_len(*axis, input_dims);
            let lr = LocalReduction::plan(unit, element_bytes, reduce_len)?;
            let gx = cw.checked_mul(lr.lanes).ok_or_else(|| {
                AccError::config(format!("global width {cw} x {} lanes overflows u32", lr.lanes))
            })?;
            let global = [gx, hb];
            let local = [lr.lanes, 1];
            Ok(Geometry { global, local, dispatch: global, local_reduction: Some(lr) })
        }
        ReduceKernel::Axis { local: false, .. } | ReduceKernel::MultiAxis { .. } => {
            let global = [cw, hb];
            let local = runtime.default_local_ws_2d(unit, global);
            let dispatch = round_up_global(global, local)?;
            Ok(Geometry { global, local, dispatch, local_reduction: None })
        }
    }
}
