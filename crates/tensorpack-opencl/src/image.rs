//! Device image handles and the blobs that carry them.
//!
//! Every tensor the reduce accelerator touches lives in an RGBA `image2d`
//! in the packed layout of [`crate::layout`]. The texel channel type follows
//! the runtime precision.

use std::fmt;

use tensorpack_common::dims::{format_dims, DimsVector};
use tensorpack_common::{AccError, AccResult, Precision};

use crate::layout::PackedLayout;

/// OpenCL image channel data type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageChannelType {
    /// 32-bit float (`CL_FLOAT`).
    Float,
    /// 16-bit half float (`CL_HALF_FLOAT`).
    Half,
}

/// Format of a packed tensor image. Channel order is always `CL_RGBA`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageFormat {
    pub channel_type: ImageChannelType,
}

impl ImageFormat {
    pub const fn for_precision(precision: Precision) -> Self {
        let channel_type = match precision {
            Precision::High => ImageChannelType::Float,
            Precision::Normal | Precision::Low => ImageChannelType::Half,
        };
        Self { channel_type }
    }

    /// Bytes per RGBA texel.
    pub const fn bytes_per_pixel(&self) -> usize {
        match self.channel_type {
            ImageChannelType::Float => 16,
            ImageChannelType::Half => 8,
        }
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.channel_type {
            ImageChannelType::Float => write!(f, "CL_RGBA × CL_FLOAT"),
            ImageChannelType::Half => write!(f, "CL_RGBA × CL_HALF_FLOAT"),
        }
    }
}

/// Opaque reference to a device image owned by a [`crate::DeviceRuntime`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageHandle {
    pub id: u64,
    pub width: u32,
    pub height: u32,
    pub format: ImageFormat,
}

impl fmt::Display for ImageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "image#{} {}x{}", self.id, self.width, self.height)
    }
}

/// Image extent `(width, height)` of a logical shape in the packed layout.
pub fn image_extent(dims: &[usize]) -> AccResult<(u32, u32)> {
    let layout = PackedLayout::from_dims(dims);
    let to_u32 = |v: usize| {
        u32::try_from(v).map_err(|_| {
            AccError::config(format!("image extent {v} of {} exceeds u32", format_dims(dims)))
        })
    };
    Ok((to_u32(layout.cw)?, to_u32(layout.hb)?))
}

/// A tensor endpoint: logical dims plus the device image holding the data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    name: String,
    dims: DimsVector,
    handle: Option<ImageHandle>,
}

impl Blob {
    /// A packed-layout blob with no device storage attached yet.
    pub fn new(name: impl Into<String>, dims: DimsVector) -> Self {
        Self { name: name.into(), dims, handle: None }
    }

    pub fn with_image(mut self, handle: ImageHandle) -> Self {
        self.handle = Some(handle);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn handle(&self) -> Option<ImageHandle> {
        self.handle
    }

    /// The attached image, or a configuration error naming the blob.
    pub fn image(&self) -> AccResult<ImageHandle> {
        self.handle
            .ok_or_else(|| AccError::config(format!("blob '{}' has no device image", self.name())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_follows_precision() {
        assert_eq!(ImageFormat::for_precision(Precision::High).bytes_per_pixel(), 16);
        assert_eq!(ImageFormat::for_precision(Precision::Low).bytes_per_pixel(), 8);
    }

    #[test]
    fn extent_matches_packed_layout() {
        assert_eq!(image_extent(&[1, 4, 1, 3]).unwrap(), (3, 1));
        assert_eq!(image_extent(&[2, 5, 3, 3]).unwrap(), (6, 6));
    }

    #[test]
    fn blob_without_image_is_a_config_error() {
        let blob = Blob::new("x", vec![1, 1, 1, 1]);
        let err = blob.image().unwrap_err();
        assert!(err.to_string().contains("'x'"), "{err}");
    }
}
