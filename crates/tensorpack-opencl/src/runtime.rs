//! The device runtime seam.
//!
//! Everything that touches a real OpenCL queue goes through
//! [`DeviceRuntime`]. The accelerators only plan, bind and submit; the
//! runtime owns program compilation, image storage and the in-order queue.

use std::fmt;
use std::sync::Arc;

use tensorpack_common::{AccResult, Precision, ReduceAccelConfig};

use crate::build_options::BuildOptions;
use crate::execute_unit::{ExecuteUnit, KernelLaunch};
use crate::image::{image_extent, ImageFormat, ImageHandle};
use crate::workgroup;

/// Capabilities and services of an OpenCL device context.
pub trait DeviceRuntime: Send + Sync + fmt::Debug {
    /// Human-readable device name.
    fn name(&self) -> &str;

    /// Precision mode the context was created with.
    fn precision(&self) -> Precision;

    /// Compile (or fetch from cache) `kernel` of `program` with `options`.
    ///
    /// Fails with [`tensorpack_common::AccError::BuildFailure`] when the
    /// program does not compile or does not export the kernel.
    fn create_execute_unit(
        &self,
        program: &str,
        kernel: &str,
        options: &BuildOptions,
    ) -> AccResult<ExecuteUnit>;

    /// Backend default 2-D local work size for `global`.
    fn default_local_ws_2d(&self, unit: &ExecuteUnit, global: [u32; 2]) -> [u32; 2] {
        workgroup::local_ws_2d_default(global, unit.workgroup_size_max)
    }

    fn allocate_image(&self, width: u32, height: u32, format: ImageFormat)
        -> AccResult<ImageHandle>;

    /// Return an image to the runtime. Unknown handles are ignored.
    fn release_image(&self, handle: ImageHandle);

    /// Submit a launch to the in-order command queue.
    ///
    /// The caller owns the rounding: `launch.global` must already be a
    /// multiple of `launch.local` in each dimension, as OpenCL 1.x requires.
    /// Planners round the range up and pass the unrounded extent as kernel
    /// arguments so padding work-items can exit early. Implementations
    /// reject a ragged range instead of adjusting it.
    fn enqueue(&self, unit: &ExecuteUnit, launch: &KernelLaunch) -> AccResult<()>;
}

// ── OpenClContext ────────────────────────────────────────────────────────────

/// Shared handle to a device runtime plus the accelerator configuration.
#[derive(Debug, Clone)]
pub struct OpenClContext {
    runtime: Arc<dyn DeviceRuntime>,
    config: ReduceAccelConfig,
}

impl OpenClContext {
    pub fn new(runtime: Arc<dyn DeviceRuntime>, config: ReduceAccelConfig) -> Self {
        Self { runtime, config }
    }

    pub fn runtime(&self) -> &dyn DeviceRuntime {
        self.runtime.as_ref()
    }

    pub fn config(&self) -> &ReduceAccelConfig {
        &self.config
    }

    pub fn precision(&self) -> Precision {
        self.runtime.precision()
    }

    pub fn image_format(&self) -> ImageFormat {
        ImageFormat::for_precision(self.precision())
    }

    /// Allocate a packed image large enough for a tensor of `dims`.
    pub fn allocate_tensor_image(&self, dims: &[usize]) -> AccResult<ImageHandle> {
        let (width, height) = image_extent(dims)?;
        self.runtime.allocate_image(width, height, self.image_format())
    }

    pub fn release_image(&self, handle: ImageHandle) {
        self.runtime.release_image(handle);
    }
}
