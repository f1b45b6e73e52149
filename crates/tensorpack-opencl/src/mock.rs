//! Deterministic in-process [`DeviceRuntime`] for tests and planning tools.
//!
//! Knows the kernels of the `"reduce"` and `"reshape"` programs, hands out
//! sequential image ids, and records every launch instead of running it.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use tensorpack_common::{AccError, AccResult, Precision, ReduceAccelConfig};
use tracing::debug;

use crate::build_options::BuildOptions;
use crate::execute_unit::{ExecuteUnit, KernelLaunch};
use crate::image::{ImageFormat, ImageHandle};
use crate::runtime::DeviceRuntime;

pub const DEFAULT_LOCAL_MEM_SIZE: u64 = 64 * 1024;
pub const DEFAULT_MAX_WORKGROUP_SIZE: u32 = 1024;
/// `CL_DEVICE_IMAGE2D_MAX_WIDTH` / `HEIGHT` of a typical mobile GPU.
pub const DEFAULT_MAX_IMAGE_EXTENT: u32 = 16384;

const KNOWN_KERNELS: &[(&str, &[&str])] = &[
    (
        "reduce",
        &[
            "ReduceC0",
            "ReduceC1",
            "ReduceC2",
            "ReduceC3",
            "ReduceC0Local",
            "ReduceC1Local",
            "ReduceC2Local",
            "ReduceC3Local",
            "ReduceMultiAxis",
        ],
    ),
    ("reshape", &["ImageToImage"]),
];

/// One submission seen by [`MockRuntime::enqueue`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedLaunch {
    pub kernel_name: String,
    pub launch: KernelLaunch,
}

#[derive(Debug, Default)]
struct MockState {
    next_image_id: u64,
    live_images: Vec<ImageHandle>,
    launches: Vec<RecordedLaunch>,
    /// Build cache keyed like a real runtime: program, kernel, options.
    units: HashMap<(String, String, BuildOptions), ExecuteUnit>,
    builds: usize,
}

#[derive(Debug)]
pub struct MockRuntime {
    precision: Precision,
    local_mem_size: u64,
    max_workgroup_size: u32,
    max_image_extent: u32,
    failing_kernels: HashSet<String>,
    fail_allocations: bool,
    state: Mutex<MockState>,
}

impl Default for MockRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRuntime {
    pub fn new() -> Self {
        Self {
            precision: Precision::default(),
            local_mem_size: DEFAULT_LOCAL_MEM_SIZE,
            max_workgroup_size: DEFAULT_MAX_WORKGROUP_SIZE,
            max_image_extent: DEFAULT_MAX_IMAGE_EXTENT,
            failing_kernels: HashSet::new(),
            fail_allocations: false,
            state: Mutex::new(MockState { next_image_id: 1, ..MockState::default() }),
        }
    }

    /// A runtime whose precision mode comes from `config`.
    pub fn from_config(config: &ReduceAccelConfig) -> Self {
        Self::new().with_precision(config.precision)
    }

    pub fn with_precision(mut self, precision: Precision) -> Self {
        self.precision = precision;
        self
    }

    pub fn with_local_mem_size(mut self, bytes: u64) -> Self {
        self.local_mem_size = bytes;
        self
    }

    pub fn with_max_workgroup_size(mut self, size: u32) -> Self {
        self.max_workgroup_size = size;
        self
    }

    pub fn with_max_image_extent(mut self, extent: u32) -> Self {
        self.max_image_extent = extent;
        self
    }

    /// Make compilation of `kernel` fail.
    pub fn failing_build(mut self, kernel: impl Into<String>) -> Self {
        self.failing_kernels.insert(kernel.into());
        self
    }

    /// Make every image allocation fail.
    pub fn failing_allocations(mut self) -> Self {
        self.fail_allocations = true;
        self
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn live_images(&self) -> Vec<ImageHandle> {
        self.state().live_images.clone()
    }

    pub fn launches(&self) -> Vec<RecordedLaunch> {
        self.state().launches.clone()
    }

    /// Kernel names in submission order.
    pub fn enqueued_kernels(&self) -> Vec<String> {
        self.state().launches.iter().map(|l| l.kernel_name.clone()).collect()
    }

    /// Number of actual compilations (cache misses).
    pub fn build_count(&self) -> usize {
        self.state().builds
    }

}

impl DeviceRuntime for MockRuntime {
    fn name(&self) -> &str {
        "mock-opencl"
    }

    fn precision(&self) -> Precision {
        self.precision
    }

    fn create_execute_unit(
        &self,
        program: &str,
        kernel: &str,
        options: &BuildOptions,
    ) -> AccResult<ExecuteUnit> {
        let build_failure = |reason: &str| AccError::BuildFailure {
            program: program.to_string(),
            kernel: kernel.to_string(),
            reason: reason.to_string(),
        };
        let exported = KNOWN_KERNELS
            .iter()
            .find(|(name, _)| *name == program)
            .ok_or_else(|| build_failure("unknown program"))?
            .1;
        if !exported.contains(&kernel) {
            return Err(build_failure("kernel not found in program"));
        }
        if self.failing_kernels.contains(kernel) {
            return Err(build_failure("injected compilation failure"));
        }

        let key = (program.to_string(), kernel.to_string(), options.clone());
        let mut state = self.state();
        if let Some(unit) = state.units.get(&key) {
            return Ok(unit.clone());
        }
        let unit = ExecuteUnit {
            program: program.to_string(),
            kernel_name: kernel.to_string(),
            build_options: options.clone(),
            local_mem_size: self.local_mem_size,
            workgroup_size_max: self.max_workgroup_size,
        };
        state.builds += 1;
        state.units.insert(key, unit.clone());
        debug!(program, kernel, options = options.len(), "mock build");
        Ok(unit)
    }

    fn allocate_image(
        &self,
        width: u32,
        height: u32,
        format: ImageFormat,
    ) -> AccResult<ImageHandle> {
        let failure = |reason: &str| AccError::Allocation {
            width,
            height,
            reason: reason.to_string(),
        };
        if self.fail_allocations {
            return Err(failure("injected allocation failure"));
        }
        if width == 0 || height == 0 {
            return Err(failure("zero-sized image"));
        }
        if width > self.max_image_extent || height > self.max_image_extent {
            return Err(failure("exceeds device image2d limits"));
        }
        let mut state = self.state();
        let handle = ImageHandle { id: state.next_image_id, width, height, format };
        state.next_image_id += 1;
        state.live_images.push(handle);
        Ok(handle)
    }

    fn release_image(&self, handle: ImageHandle) {
        self.state().live_images.retain(|h| h.id != handle.id);
    }

    fn enqueue(&self, unit: &ExecuteUnit, launch: &KernelLaunch) -> AccResult<()> {
        let group = u64::from(launch.local[0]) * u64::from(launch.local[1]);
        if group == 0 || group > u64::from(unit.workgroup_size_max) {
            return Err(AccError::InternalConsistency(format!(
                "{}: work-group {:?} outside 1..={}",
                unit.kernel_name, launch.local, unit.workgroup_size_max
            )));
        }
        if launch.global.iter().zip(&launch.local).any(|(g, l)| g % l != 0) {
            return Err(AccError::InternalConsistency(format!(
                "{}: global {:?} is not a multiple of local {:?}",
                unit.kernel_name, launch.global, launch.local
            )));
        }
        if launch.local_memory_bytes() > unit.local_mem_size {
            return Err(AccError::InternalConsistency(format!(
                "{}: {} B of local memory requested, device has {}",
                unit.kernel_name,
                launch.local_memory_bytes(),
                unit.local_mem_size
            )));
        }
        let mut state = self.state();
        if let Some(stale) = launch
            .images()
            .find(|img| !state.live_images.iter().any(|live| live.id == img.id))
        {
            return Err(AccError::InternalConsistency(format!(
                "{}: argument {stale} is not a live image",
                unit.kernel_name
            )));
        }
        state.launches.push(RecordedLaunch {
            kernel_name: unit.kernel_name.clone(),
            launch: launch.clone(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execute_unit::KernelArg;

    #[test]
    fn unknown_kernel_is_a_build_failure() {
        let rt = MockRuntime::new();
        let err = rt.create_execute_unit("reduce", "ReduceC9", &BuildOptions::new()).unwrap_err();
        assert!(matches!(err, AccError::BuildFailure { .. }), "{err:?}");
    }

    #[test]
    fn injected_build_failure() {
        let rt = MockRuntime::new().failing_build("ReduceC1Local");
        assert!(rt.create_execute_unit("reduce", "ReduceC1", &BuildOptions::new()).is_ok());
        assert!(rt.create_execute_unit("reduce", "ReduceC1Local", &BuildOptions::new()).is_err());
    }

    #[test]
    fn builds_are_cached_per_option_set() {
        let rt = MockRuntime::new();
        let mut opts = BuildOptions::new();
        rt.create_execute_unit("reduce", "ReduceC0", &opts).unwrap();
        rt.create_execute_unit("reduce", "ReduceC0", &opts).unwrap();
        assert_eq!(rt.build_count(), 1);
        opts.insert("-DFLOAT=half".to_string());
        rt.create_execute_unit("reduce", "ReduceC0", &opts).unwrap();
        assert_eq!(rt.build_count(), 2);
    }

    #[test]
    fn images_are_tracked_until_released() {
        let rt = MockRuntime::new();
        let fmt = ImageFormat::for_precision(Precision::High);
        let a = rt.allocate_image(4, 4, fmt).unwrap();
        let b = rt.allocate_image(2, 1, fmt).unwrap();
        assert_ne!(a.id, b.id);
        rt.release_image(a);
        assert_eq!(rt.live_images(), vec![b]);
    }

    #[test]
    fn oversized_or_injected_allocation_fails() {
        let fmt = ImageFormat::for_precision(Precision::High);
        let rt = MockRuntime::new().with_max_image_extent(8);
        assert!(matches!(rt.allocate_image(9, 1, fmt), Err(AccError::Allocation { .. })));
        let rt = MockRuntime::new().failing_allocations();
        assert!(matches!(rt.allocate_image(1, 1, fmt), Err(AccError::Allocation { .. })));
    }

    #[test]
    fn enqueue_rejects_released_images_and_oversized_groups() {
        let rt = MockRuntime::new().with_max_workgroup_size(64);
        let unit = rt.create_execute_unit("reshape", "ImageToImage", &BuildOptions::new()).unwrap();
        let img = rt.allocate_image(1, 1, ImageFormat::for_precision(Precision::High)).unwrap();

        let launch = KernelLaunch { global: [1, 1], local: [1, 1], args: vec![KernelArg::Image(img)] };
        rt.enqueue(&unit, &launch).unwrap();

        let too_big = KernelLaunch { local: [128, 1], ..launch.clone() };
        assert!(rt.enqueue(&unit, &too_big).is_err());

        let ragged = KernelLaunch { global: [100, 4], local: [16, 4], ..launch.clone() };
        let err = rt.enqueue(&unit, &ragged).unwrap_err();
        assert!(err.to_string().contains("not a multiple"), "{err}");

        rt.release_image(img);
        assert!(rt.enqueue(&unit, &launch).is_err());
        assert_eq!(rt.enqueued_kernels(), vec!["ImageToImage".to_string()]);
    }
}
