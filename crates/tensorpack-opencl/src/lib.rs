//! OpenCL reduction accelerator for packed NC4HW4 image tensors.
//!
//! Plans and binds the reduce kernels of the `"reduce"` program:
//!
//! - [`layout`]: the packed 2-D image layout derived from logical NCHW dims
//! - [`axis`]: axis normalization and output-shape inference
//! - [`selector`]: fixed-axis / tree-reduction / multi-axis kernel choice
//! - [`workgroup`]: global/local work sizes and local scratch sizing
//! - [`binder`]: the ordered kernel argument list
//! - [`shape_adapter`]: axis removal through a padded intermediate image
//! - [`reduce`]: the [`OpenClReduceLayerAcc`] lifecycle tying it together
//!
//! The device runtime is reached only through [`DeviceRuntime`];
//! [`mock::MockRuntime`] stands in for hardware in tests and tools.

pub mod acc;
pub mod axis;
pub mod binder;
pub mod build_options;
pub mod execute_unit;
pub mod image;
pub mod layout;
pub mod mock;
pub mod param;
pub mod reduce;
pub mod reference;
pub mod reshape;
pub mod runtime;
pub mod selector;
pub mod shape_adapter;
pub mod workgroup;

pub use acc::LayerAcc;
pub use execute_unit::{ExecuteUnit, KernelArg, KernelLaunch};
pub use image::{Blob, ImageFormat, ImageHandle};
pub use layout::PackedLayout;
pub use param::{LayerParam, ReduceKind, ReduceLayerParam, ReshapeLayerParam};
pub use reduce::{ExecutionPlan, OpenClReduceLayerAcc};
pub use reshape::OpenClReshapeLayerAcc;
pub use runtime::{DeviceRuntime, OpenClContext};
pub use selector::{AxisMask, ReduceAxis, ReduceKernel, VariantSelector};
pub use shape_adapter::ShapeAdapter;
