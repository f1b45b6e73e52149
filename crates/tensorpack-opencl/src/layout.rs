//! Packed NC4HW4 image layout.
//!
//! Channels are grouped in blocks of four lanes (one RGBA texel). A logical
//! `[N, C, H, W]` tensor occupies a 2-D image where
//!
//! | axis   | extent                     |
//! |--------|----------------------------|
//! | width  | `W * ceil(C / 4)`          |
//! | height | `N * H`                    |
//!
//! Texel `(x, y)` with `x = cb * W + w` and `y = n * H + h` holds channels
//! `4*cb .. 4*cb+3` of element `(n, h, w)`.

use std::fmt;

use tensorpack_common::dims::get_dim;
use tensorpack_common::math::ceil_div;

/// Channels packed into one image texel.
pub const CHANNEL_PACK: usize = 4;

/// Image geometry of a logical shape in the packed layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PackedLayout {
    /// `ceil(C / 4)`.
    pub channel_blocks: usize,
    /// Image width: `W * channel_blocks`.
    pub cw: usize,
    /// Image height: `N * H`.
    pub hb: usize,
}

impl PackedLayout {
    /// Derive the packed geometry of `dims` (NCHW, missing dims read as 1).
    pub fn from_dims(dims: &[usize]) -> Self {
        let channel_blocks = ceil_div(get_dim(dims, 1), CHANNEL_PACK);
        Self {
            channel_blocks,
            cw: get_dim(dims, 3) * channel_blocks,
            hb: get_dim(dims, 0) * get_dim(dims, 2),
        }
    }

    /// Number of texels in the image (`cw * hb`).
    pub const fn occupancy(&self) -> usize {
        self.cw * self.hb
    }
}

impl fmt::Display for PackedLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{} (c4={})", self.cw, self.hb, self.channel_blocks)
    }
}

/// Channel split used by the reduce kernels: whole 4-lane blocks plus the
/// leftover lanes of a partial tail block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelSplit {
    /// `C / 4` (rounded down).
    pub full_blocks: usize,
    /// `C % 4`.
    pub remainder: usize,
}

impl ChannelSplit {
    pub fn from_dims(dims: &[usize]) -> Self {
        let c = get_dim(dims, 1);
        Self { full_blocks: c / CHANNEL_PACK, remainder: c % CHANNEL_PACK }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_of_full_nchw_shape() {
        let l = PackedLayout::from_dims(&[1, 8, 4, 4]);
        assert_eq!(l.channel_blocks, 2);
        assert_eq!(l.cw, 8);
        assert_eq!(l.hb, 4);
        assert_eq!(l.occupancy(), 32);
    }

    #[test]
    fn partial_channel_block_rounds_up() {
        let l = PackedLayout::from_dims(&[2, 5, 3, 3]);
        assert_eq!(l.channel_blocks, 2);
        assert_eq!(l.cw, 6);
        assert_eq!(l.hb, 6);
    }

    #[test]
    fn low_rank_shape_reads_missing_dims_as_one() {
        // [4, 3] is N=4, C=3, H=1, W=1.
        let l = PackedLayout::from_dims(&[4, 3]);
        assert_eq!(l.channel_blocks, 1);
        assert_eq!(l.cw, 1);
        assert_eq!(l.hb, 4);
    }

    #[test]
    fn channel_split_floors_blocks() {
        assert_eq!(
            ChannelSplit::from_dims(&[1, 130, 1, 1]),
            ChannelSplit { full_blocks: 32, remainder: 2 }
        );
        assert_eq!(
            ChannelSplit::from_dims(&[1, 512, 1, 1]),
            ChannelSplit { full_blocks: 128, remainder: 0 }
        );
        assert_eq!(
            ChannelSplit::from_dims(&[1, 3, 1, 1]),
            ChannelSplit { full_blocks: 0, remainder: 3 }
        );
    }
}
