//! Compiled kernels and the launches bound to them.

use std::fmt;

use crate::build_options::BuildOptions;
use crate::image::ImageHandle;

/// A kernel built by the device runtime, with the limits the device
/// reported for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecuteUnit {
    pub program: String,
    pub kernel_name: String,
    pub build_options: BuildOptions,
    /// Local memory available to one work-group, in bytes.
    pub local_mem_size: u64,
    /// Largest work-group this kernel can be launched with.
    pub workgroup_size_max: u32,
}

/// One positional kernel argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelArg {
    U32(u32),
    I32(i32),
    Image(ImageHandle),
    /// `__local` scratch reservation of this many bytes (no host data).
    LocalMemory(u32),
    /// An `int4` passed by value.
    Int4([i32; 4]),
}

impl fmt::Display for KernelArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::U32(v) => write!(f, "{v}u"),
            Self::I32(v) => write!(f, "{v}"),
            Self::Image(h) => write!(f, "{h}"),
            Self::LocalMemory(bytes) => write!(f, "__local[{bytes} B]"),
            Self::Int4([a, b, c, d]) => write!(f, "int4({a}, {b}, {c}, {d})"),
        }
    }
}

/// Geometry plus the complete argument list of one kernel dispatch.
///
/// Always built whole; there is no way to patch a single argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelLaunch {
    pub global: [u32; 2],
    pub local: [u32; 2],
    pub args: Vec<KernelArg>,
}

impl KernelLaunch {
    /// Total `__local` memory reserved through the arguments.
    pub fn local_memory_bytes(&self) -> u64 {
        self.args
            .iter()
            .map(|a| match a {
                KernelArg::LocalMemory(bytes) => u64::from(*bytes),
                _ => 0,
            })
            .sum()
    }

    /// Images referenced by the arguments, in argument order.
    pub fn images(&self) -> impl Iterator<Item = ImageHandle> + '_ {
        self.args.iter().filter_map(|a| match a {
            KernelArg::Image(h) => Some(*h),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::{ImageChannelType, ImageFormat};

    fn image(id: u64) -> ImageHandle {
        ImageHandle {
            id,
            width: 1,
            height: 1,
            format: ImageFormat { channel_type: ImageChannelType::Float },
        }
    }

    #[test]
    fn local_memory_is_summed_from_args() {
        let launch = KernelLaunch {
            global: [128, 1],
            local: [128, 1],
            args: vec![KernelArg::U32(128), KernelArg::LocalMemory(2048), KernelArg::I32(1)],
        };
        assert_eq!(launch.local_memory_bytes(), 2048);
    }

    #[test]
    fn images_are_listed_in_order() {
        let launch = KernelLaunch {
            global: [1, 1],
            local: [1, 1],
            args: vec![KernelArg::Image(image(7)), KernelArg::I32(0), KernelArg::Image(image(3))],
        };
        let ids: Vec<u64> = launch.images().map(|h| h.id).collect();
        assert_eq!(ids, vec![7, 3]);
    }

    #[test]
    fn display_formats_args() {
        assert_eq!(KernelArg::Int4([1, 0, 1, 0]).to_string(), "int4(1, 0, 1, 0)");
        assert_eq!(KernelArg::LocalMemory(64).to_string(), "__local[64 B]");
    }
}
