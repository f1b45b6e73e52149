//! Reduce kernel variant selection.
//!
//! A single reduced axis gets one of the fixed-axis kernels `ReduceC0..3`,
//! optionally the `…Local` tree-reduction form when the output surface is
//! too small to keep the device busy but the reduced axis is long. Several
//! axes go to `ReduceMultiAxis` with a participation mask.

use std::fmt;

use tensorpack_common::dims::{format_dims, get_dim};
use tensorpack_common::{AccError, AccResult, ReduceAccelConfig};

use crate::layout::PackedLayout;

/// A logical NCHW axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReduceAxis {
    Batch,
    Channel,
    Height,
    Width,
}

impl ReduceAxis {
    pub const fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(Self::Batch),
            1 => Some(Self::Channel),
            2 => Some(Self::Height),
            3 => Some(Self::Width),
            _ => None,
        }
    }

    /// NCHW index, also the digit in the fixed-axis kernel name.
    pub const fn index(self) -> usize {
        match self {
            Self::Batch => 0,
            Self::Channel => 1,
            Self::Height => 2,
            Self::Width => 3,
        }
    }

    /// Slot in the multi-axis mask, which is laid out (N, H, W, C).
    pub const fn mask_slot(self) -> usize {
        match self {
            Self::Batch => 0,
            Self::Height => 1,
            Self::Width => 2,
            Self::Channel => 3,
        }
    }

    fn try_from_index(index: usize) -> AccResult<Self> {
        Self::from_index(index)
            .ok_or_else(|| AccError::config(format!("axis {index} is outside the 4-D packed layout")))
    }
}

/// Axis participation flags in (N, H, W, C) order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AxisMask([bool; 4]);

impl AxisMask {
    pub fn from_axes(axes: &[usize]) -> AccResult<Self> {
        let mut slots = [false; 4];
        for &index in axes {
            slots[ReduceAxis::try_from_index(index)?.mask_slot()] = true;
        }
        Ok(Self(slots))
    }

    pub fn bits_set(&self) -> usize {
        self.0.iter().filter(|&&set| set).count()
    }

    pub const fn contains(&self, axis: ReduceAxis) -> bool {
        self.0[axis.mask_slot()]
    }

    /// The `int4` kernel argument: 1 for a reduced slot, 0 otherwise.
    pub fn as_kernel_arg(&self) -> [i32; 4] {
        self.0.map(i32::from)
    }

    /// Reduced axes in NCHW order.
    pub fn axes(&self) -> impl Iterator<Item = ReduceAxis> + '_ {
        [ReduceAxis::Batch, ReduceAxis::Channel, ReduceAxis::Height, ReduceAxis::Width]
            .into_iter()
            .filter(|axis| self.contains(*axis))
    }
}

/// The kernel chosen for a reduce layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceKernel {
    /// `ReduceC{axis}` or, with `local`, `ReduceC{axis}Local`.
    Axis { axis: ReduceAxis, local: bool },
    MultiAxis { mask: AxisMask },
}

impl ReduceKernel {
    pub fn name(&self) -> String {
        match self {
            Self::Axis { axis, local: false } => format!("ReduceC{}", axis.index()),
            Self::Axis { axis, local: true } => format!("ReduceC{}Local", axis.index()),
            Self::MultiAxis { .. } => "ReduceMultiAxis".to_string(),
        }
    }

    pub const fn is_local(&self) -> bool {
        matches!(self, Self::Axis { local: true, .. })
    }

    /// Logical extent folded by the kernel: the raw length of the single
    /// axis, or the product of every masked axis.
    pub fn reduced_length(&self, input_dims: &[usize]) -> usize {
        match self {
            Self::Axis { axis, .. } => get_dim(input_dims, axis.index()),
            Self::MultiAxis { mask } => {
                mask.axes().map(|axis| get_dim(input_dims, axis.index())).product()
            }
        }
    }
}

impl fmt::Display for ReduceKernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

/// Threshold-driven variant selector.
///
/// Constructed once per layer and consulted at initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VariantSelector {
    /// Output texel count below which the surface is under-occupied.
    low_parallelism_threshold: u64,
    /// Minimum reduced-axis length for the tree reduction to pay off.
    high_intensity_threshold: u64,
}

impl VariantSelector {
    pub const fn new(low_parallelism_threshold: u64, high_intensity_threshold: u64) -> Self {
        Self { low_parallelism_threshold, high_intensity_threshold }
    }

    pub const fn from_config(config: &ReduceAccelConfig) -> Self {
        Self::new(config.low_parallelism_threshold, config.high_intensity_threshold)
    }

    /// Whether a single-axis reduce should use the local-memory kernel.
    pub fn wants_local(&self, occupancy: usize, axis_len: usize) -> bool {
        (occupancy as u64) < self.low_parallelism_threshold
            && axis_len as u64 >= self.high_intensity_threshold
    }

    /// Pick the kernel for reducing `axes` (normalized, unique) of
    /// `input_dims` into an image shaped like `kernel_out_dims`.
    pub fn select(
        &self,
        input_dims: &[usize],
        kernel_out_dims: &[usize],
        axes: &[usize],
    ) -> AccResult<ReduceKernel> {
        match axes {
            [] => Err(AccError::config("reduce needs at least one axis")),
            [single] => {
                let axis = ReduceAxis::try_from_index(*single)?;
                let occupancy = PackedLayout::from_dims(kernel_out_dims).occupancy();
                let axis_len = get_dim(input_dims, axis.index());
                let local = self.wants_local(occupancy, axis_len);
                tracing::trace!(
                    input = %format_dims(input_dims),
                    occupancy,
                    axis_len,
                    local,
                    "single-axis reduce"
                );
                Ok(ReduceKernel::Axis { axis, local })
            }
            many => Ok(ReduceKernel::MultiAxis { mask: AxisMask::from_axes(many)? }),
        }
    }
}

impl Default for VariantSelector {
    fn default() -> Self {
        Self::from_config(&ReduceAccelConfig::default())
    }
}
