// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

use num_derive::FromPrimitive;
use num_traits::FromPrimitive;

use crate::error::{Error, Result};

pub const PLANE_Y: usize = 0;
pub const PLANE_U: usize = 1;
pub const PLANE_V: usize = 2;
pub const MAX_PLANES: usize = 3;
pub const MAX_PALETTE_SIZE: usize = 8;

pub const MAX_SEGMENTS: usize = 8;
pub const NUM_REFERENCE_FRAME_SLOTS: usize = 8;
pub const NUM_INTER_REFERENCE_FRAMES: usize = 7;
pub const FRAME_LF_COUNT: usize = 4;
pub const MAX_LOOP_FILTER_VALUE: i32 = 63;
pub const MAX_QUANTIZER_INDEX: i32 = 255;
/// Matrix level meaning "no quantizer matrix".
pub const NO_QUANTIZER_MATRIX_LEVEL: u8 = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaneType {
    Y = 0,
    Uv = 1,
}

impl PlaneType {
    pub fn from_plane(plane: usize) -> PlaneType {
        if plane == PLANE_Y {
            PlaneType::Y
        } else {
            PlaneType::Uv
        }
    }
}

macro_rules! try_from_u8 {
    ($ty:ident) => {
        impl TryFrom<u8> for $ty {
            type Error = Error;

            fn try_from(value: u8) -> Result<Self> {
                Self::from_u8(value).ok_or(Error::InvalidEnum(value as u32, stringify!($ty)))
            }
        }
    };
}

#[repr(u8)]
#[derive(Debug, FromPrimitive, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum BlockSize {
    #[default]
    Block4x4 = 0,
    Block4x8,
    Block4x16,
    Block8x4,
    Block8x8,
    Block8x16,
    Block8x32,
    Block16x4,
    Block16x8,
    Block16x16,
    Block16x32,
    Block16x64,
    Block32x8,
    Block32x16,
    Block32x32,
    Block32x64,
    Block64x16,
    Block64x32,
    Block64x64,
    Block64x128,
    Block128x64,
    Block128x128,
}

try_from_u8!(BlockSize);

const BLOCK_WIDTH_LOG2: [u8; 22] = [
    2, 2, 2, 3, 3, 3, 3, 4, 4, 4, 4, 4, 5, 5, 5, 5, 6, 6, 6, 6, 7, 7,
];
const BLOCK_HEIGHT_LOG2: [u8; 22] = [
    2, 3, 4, 2, 3, 4, 5, 2, 3, 4, 5, 6, 3, 4, 5, 6, 4, 5, 6, 7, 6, 7,
];
const BLOCK_SIZE_GROUP: [u8; 22] = [
    0, 0, 1, 0, 1, 2, 2, 1, 2, 2, 3, 3, 2, 3, 3, 3, 3, 3, 3, 3, 3, 3,
];
const BLOCK_MAX_TX_DEPTH: [u8; 22] = [
    0, 1, 2, 1, 1, 2, 3, 2, 2, 2, 3, 4, 3, 3, 3, 4, 4, 4, 4, 4, 4, 4,
];

impl BlockSize {
    pub const ALL: [BlockSize; 22] = [
        BlockSize::Block4x4,
        BlockSize::Block4x8,
        BlockSize::Block4x16,
        BlockSize::Block8x4,
        BlockSize::Block8x8,
        BlockSize::Block8x16,
        BlockSize::Block8x32,
        BlockSize::Block16x4,
        BlockSize::Block16x8,
        BlockSize::Block16x16,
        BlockSize::Block16x32,
        BlockSize::Block16x64,
        BlockSize::Block32x8,
        BlockSize::Block32x16,
        BlockSize::Block32x32,
        BlockSize::Block32x64,
        BlockSize::Block64x16,
        BlockSize::Block64x32,
        BlockSize::Block64x64,
        BlockSize::Block64x128,
        BlockSize::Block128x64,
        BlockSize::Block128x128,
    ];

    pub fn width_log2(self) -> usize {
        BLOCK_WIDTH_LOG2[self as usize] as usize
    }

    pub fn height_log2(self) -> usize {
        BLOCK_HEIGHT_LOG2[self as usize] as usize
    }

    pub fn width(self) -> usize {
        1 << self.width_log2()
    }

    pub fn height(self) -> usize {
        1 << self.height_log2()
    }

    /// Width in 4x4 units.
    pub fn width4(self) -> usize {
        self.width() >> 2
    }

    /// Height in 4x4 units.
    pub fn height4(self) -> usize {
        self.height() >> 2
    }

    pub fn from_dimensions(width: usize, height: usize) -> Option<BlockSize> {
        Self::ALL
            .into_iter()
            .find(|size| size.width() == width && size.height() == height)
    }

    pub fn is_square(self) -> bool {
        self.width_log2() == self.height_log2()
    }

    pub fn size_group(self) -> usize {
        BLOCK_SIZE_GROUP[self as usize] as usize
    }

    pub fn max_transform_depth(self) -> usize {
        BLOCK_MAX_TX_DEPTH[self as usize] as usize
    }

    /// Largest rectangular transform fitting the block.
    pub fn max_rect_transform_size(self) -> TransformSize {
        // Every block dimension clamped to 64 is a transform dimension.
        TransformSize::from_dimensions(self.width().min(64), self.height().min(64))
            .unwrap_or(TransformSize::Tx64x64)
    }

    /// Transform size used for chroma blocks of this (already subsampled)
    /// residual size.
    pub fn uv_transform_size(self) -> TransformSize {
        self.max_rect_transform_size().adjusted()
    }

    /// Size of the block in a plane with the given subsampling, or `None`
    /// when the combination cannot be coded.
    pub fn subsampled(self, subsampling_x: u8, subsampling_y: u8) -> Option<BlockSize> {
        let (w, h) = (self.width(), self.height());
        match (subsampling_x, subsampling_y) {
            (0, 0) => Some(self),
            (1, 1) => Self::from_dimensions((w / 2).max(4), (h / 2).max(4)),
            (1, 0) => {
                if h > w {
                    None
                } else {
                    Self::from_dimensions((w / 2).max(4), h)
                }
            }
            (0, 1) => {
                if w > h {
                    None
                } else {
                    Self::from_dimensions(w, (h / 2).max(4))
                }
            }
            _ => None,
        }
    }

    /// Size of the children produced by `partition`, `None` if invalid.
    pub fn sub_size(self, partition: Partition) -> Option<BlockSize> {
        let (w, h) = (self.width(), self.height());
        let (sub_w, sub_h) = match partition {
            Partition::None => (w, h),
            Partition::Horizontal
            | Partition::HorizontalWithTopSplit
            | Partition::HorizontalWithBottomSplit => (w, h / 2),
            Partition::Vertical
            | Partition::VerticalWithLeftSplit
            | Partition::VerticalWithRightSplit => (w / 2, h),
            Partition::Split => (w / 2, h / 2),
            Partition::Horizontal4 => (w, h / 4),
            Partition::Vertical4 => (w / 4, h),
        };
        Self::from_dimensions(sub_w, sub_h)
    }
}

#[repr(u8)]
#[derive(Debug, FromPrimitive, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum TransformSize {
    #[default]
    Tx4x4 = 0,
    Tx4x8,
    Tx4x16,
    Tx8x4,
    Tx8x8,
    Tx8x16,
    Tx8x32,
    Tx16x4,
    Tx16x8,
    Tx16x16,
    Tx16x32,
    Tx16x64,
    Tx32x8,
    Tx32x16,
    Tx32x32,
    Tx32x64,
    Tx64x16,
    Tx64x32,
    Tx64x64,
}

try_from_u8!(TransformSize);

pub const NUM_TRANSFORM_SIZES: usize = 19;

impl TransformSize {
    pub const ALL: [TransformSize; NUM_TRANSFORM_SIZES] = [
        TransformSize::Tx4x4,
        TransformSize::Tx4x8,
        TransformSize::Tx4x16,
        TransformSize::Tx8x4,
        TransformSize::Tx8x8,
        TransformSize::Tx8x16,
        TransformSize::Tx8x32,
        TransformSize::Tx16x4,
        TransformSize::Tx16x8,
        TransformSize::Tx16x16,
        TransformSize::Tx16x32,
        TransformSize::Tx16x64,
        TransformSize::Tx32x8,
        TransformSize::Tx32x16,
        TransformSize::Tx32x32,
        TransformSize::Tx32x64,
        TransformSize::Tx64x16,
        TransformSize::Tx64x32,
        TransformSize::Tx64x64,
    ];

    pub fn width_log2(self) -> usize {
        BLOCK_WIDTH_LOG2[self as usize] as usize
    }

    pub fn height_log2(self) -> usize {
        BLOCK_HEIGHT_LOG2[self as usize] as usize
    }

    pub fn width(self) -> usize {
        1 << self.width_log2()
    }

    pub fn height(self) -> usize {
        1 << self.height_log2()
    }

    pub fn width4(self) -> usize {
        self.width() >> 2
    }

    pub fn height4(self) -> usize {
        self.height() >> 2
    }

    pub fn area(self) -> usize {
        self.width() * self.height()
    }

    pub fn from_dimensions(width: usize, height: usize) -> Option<TransformSize> {
        Self::ALL
            .into_iter()
            .find(|size| size.width() == width && size.height() == height)
    }

    /// The block size covering exactly this transform.
    pub fn block_size(self) -> BlockSize {
        BlockSize::ALL[self as usize]
    }

    /// Size with 64-sample dimensions clamped to 32, used for scans,
    /// contexts and coefficient storage.
    pub fn adjusted(self) -> TransformSize {
        Self::from_dimensions(self.width().min(32), self.height().min(32)).unwrap_or(self)
    }

    /// Next smaller size in the transform split tree.
    pub fn split(self) -> TransformSize {
        let (w, h) = (self.width(), self.height());
        let (w, h) = match w.cmp(&h) {
            std::cmp::Ordering::Equal => ((w / 2).max(4), (h / 2).max(4)),
            std::cmp::Ordering::Greater => (w / 2, h),
            std::cmp::Ordering::Less => (w, h / 2),
        };
        Self::from_dimensions(w, h).unwrap_or(TransformSize::Tx4x4)
    }

    /// Index of the largest square transform fitting inside (0 for 4x4, 4
    /// for 64x64).
    pub fn square_min_index(self) -> usize {
        self.width_log2().min(self.height_log2()) - 2
    }

    /// Index of the smallest square transform containing this one.
    pub fn square_max_index(self) -> usize {
        self.width_log2().max(self.height_log2()) - 2
    }

    /// Context used by the coefficient CDFs.
    pub fn context(self) -> usize {
        (self.square_min_index() + self.square_max_index() + 1) >> 1
    }

    /// Selects the end-of-block CDF: 0 for 16 coefficients up to 6 for 1024.
    pub fn eob_multi_size(self) -> usize {
        self.width_log2().min(5) + self.height_log2().min(5) - 4
    }

    pub fn quantization_shift(self) -> u32 {
        match self {
            TransformSize::Tx32x64 | TransformSize::Tx64x32 | TransformSize::Tx64x64 => 2,
            TransformSize::Tx16x32
            | TransformSize::Tx16x64
            | TransformSize::Tx32x16
            | TransformSize::Tx32x32
            | TransformSize::Tx64x16 => 1,
            _ => 0,
        }
    }
}

#[repr(u8)]
#[derive(Debug, FromPrimitive, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TransformType {
    #[default]
    DctDct = 0,
    AdstDct,
    DctAdst,
    AdstAdst,
    FlipadstDct,
    DctFlipadst,
    FlipadstFlipadst,
    AdstFlipadst,
    FlipadstAdst,
    IdentityIdentity,
    IdentityDct,
    DctIdentity,
    IdentityAdst,
    AdstIdentity,
    IdentityFlipadst,
    FlipadstIdentity,
}

try_from_u8!(TransformType);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformClass {
    TwoD,
    Horizontal,
    Vertical,
}

/// One-dimensional kernel of a transform type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transform1D {
    Dct,
    Adst,
    FlipAdst,
    Identity,
}

impl TransformType {
    pub fn class(self) -> TransformClass {
        match self {
            TransformType::IdentityDct
            | TransformType::IdentityAdst
            | TransformType::IdentityFlipadst => TransformClass::Vertical,
            TransformType::DctIdentity
            | TransformType::AdstIdentity
            | TransformType::FlipadstIdentity => TransformClass::Horizontal,
            _ => TransformClass::TwoD,
        }
    }

    /// Kernels applied along columns (first) and rows (second).
    pub fn kernels(self) -> (Transform1D, Transform1D) {
        use Transform1D::*;
        match self {
            TransformType::DctDct => (Dct, Dct),
            TransformType::AdstDct => (Adst, Dct),
            TransformType::DctAdst => (Dct, Adst),
            TransformType::AdstAdst => (Adst, Adst),
            TransformType::FlipadstDct => (FlipAdst, Dct),
            TransformType::DctFlipadst => (Dct, FlipAdst),
            TransformType::FlipadstFlipadst => (FlipAdst, FlipAdst),
            TransformType::AdstFlipadst => (Adst, FlipAdst),
            TransformType::FlipadstAdst => (FlipAdst, Adst),
            TransformType::IdentityIdentity => (Identity, Identity),
            // The one-dimensional types are named row kernel first.
            TransformType::IdentityDct => (Dct, Identity),
            TransformType::DctIdentity => (Identity, Dct),
            TransformType::IdentityAdst => (Adst, Identity),
            TransformType::AdstIdentity => (Identity, Adst),
            TransformType::IdentityFlipadst => (FlipAdst, Identity),
            TransformType::FlipadstIdentity => (Identity, FlipAdst),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformSet {
    DctOnly,
    Intra1,
    Intra2,
    Inter1,
    Inter2,
    Inter3,
}

const TRANSFORM_TYPE_IN_SET_MASK: [u16; 6] = [0x1, 0xE0F, 0x20F, 0xFFFF, 0xFFF, 0x201];

impl TransformSet {
    pub fn new(tx_size: TransformSize, is_inter: bool, reduced_tx_set: bool) -> TransformSet {
        let square_max = tx_size.square_max_index();
        let square_min = tx_size.square_min_index();
        if square_max == 4 {
            return TransformSet::DctOnly;
        }
        if is_inter {
            if reduced_tx_set || square_max == 3 {
                TransformSet::Inter3
            } else if square_min == 2 {
                TransformSet::Inter2
            } else {
                TransformSet::Inter1
            }
        } else if square_max == 3 {
            TransformSet::DctOnly
        } else if reduced_tx_set || square_min == 2 {
            TransformSet::Intra2
        } else {
            TransformSet::Intra1
        }
    }

    pub fn contains(self, tx_type: TransformType) -> bool {
        TRANSFORM_TYPE_IN_SET_MASK[self as usize] & (1 << tx_type as u16) != 0
    }

    /// Maps a decoded symbol to the transform type it denotes.
    pub fn transform_type(self, symbol: usize) -> TransformType {
        use TransformType::*;
        const INTRA1: [TransformType; 7] = [
            IdentityIdentity,
            DctDct,
            IdentityDct,
            DctIdentity,
            AdstAdst,
            DctAdst,
            AdstDct,
        ];
        const INTRA2: [TransformType; 5] = [IdentityIdentity, DctDct, AdstAdst, DctAdst, AdstDct];
        const INTER1: [TransformType; 16] = [
            IdentityIdentity,
            IdentityDct,
            DctIdentity,
            IdentityAdst,
            AdstIdentity,
            IdentityFlipadst,
            FlipadstIdentity,
            DctDct,
            DctAdst,
            AdstDct,
            DctFlipadst,
            FlipadstDct,
            AdstAdst,
            FlipadstFlipadst,
            FlipadstAdst,
            AdstFlipadst,
        ];
        const INTER2: [TransformType; 12] = [
            IdentityIdentity,
            IdentityDct,
            DctIdentity,
            DctDct,
            DctAdst,
            AdstDct,
            DctFlipadst,
            FlipadstDct,
            AdstAdst,
            FlipadstFlipadst,
            FlipadstAdst,
            AdstFlipadst,
        ];
        const INTER3: [TransformType; 2] = [IdentityIdentity, DctDct];
        let table: &[TransformType] = match self {
            TransformSet::DctOnly => &[DctDct],
            TransformSet::Intra1 => &INTRA1,
            TransformSet::Intra2 => &INTRA2,
            TransformSet::Inter1 => &INTER1,
            TransformSet::Inter2 => &INTER2,
            TransformSet::Inter3 => &INTER3,
        };
        table.get(symbol).copied().unwrap_or(DctDct)
    }
}

#[repr(u8)]
#[derive(Debug, FromPrimitive, Clone, Copy, PartialEq, Eq, Default)]
pub enum Partition {
    #[default]
    None = 0,
    Horizontal,
    Vertical,
    Split,
    HorizontalWithTopSplit,
    HorizontalWithBottomSplit,
    VerticalWithLeftSplit,
    VerticalWithRightSplit,
    Horizontal4,
    Vertical4,
}

try_from_u8!(Partition);

#[repr(u8)]
#[derive(Debug, FromPrimitive, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum PredictionMode {
    #[default]
    Dc = 0,
    Vertical,
    Horizontal,
    D45,
    D135,
    D113,
    D157,
    D203,
    D67,
    Smooth,
    SmoothVertical,
    SmoothHorizontal,
    Paeth,
    ChromaFromLuma,
    NearestMv,
    NearMv,
    GlobalMv,
    NewMv,
    NearestNearestMv,
    NearNearMv,
    NearestNewMv,
    NewNearestMv,
    NearNewMv,
    NewNearMv,
    GlobalGlobalMv,
    NewNewMv,
}

try_from_u8!(PredictionMode);

pub const INTRA_PREDICTION_MODES_Y: usize = 13;
pub const INTRA_PREDICTION_MODES_UV: usize = 14;
pub const NUM_COMPOUND_MODES: usize = 8;

impl PredictionMode {
    pub fn is_directional(self) -> bool {
        (PredictionMode::Vertical..=PredictionMode::D67).contains(&self)
    }

    pub fn is_inter(self) -> bool {
        self >= PredictionMode::NearestMv
    }

    pub fn is_compound(self) -> bool {
        self >= PredictionMode::NearestNearestMv
    }

    /// Nominal angle of a directional mode in degrees.
    pub fn base_angle(self) -> i32 {
        match self {
            PredictionMode::Vertical => 90,
            PredictionMode::Horizontal => 180,
            PredictionMode::D45 => 45,
            PredictionMode::D135 => 135,
            PredictionMode::D113 => 113,
            PredictionMode::D157 => 157,
            PredictionMode::D203 => 203,
            PredictionMode::D67 => 67,
            _ => 0,
        }
    }

    /// Transform type implied by an intra mode for chroma blocks.
    pub fn transform_type(self) -> TransformType {
        use TransformType::*;
        const MODE_TO_TRANSFORM_TYPE: [TransformType; INTRA_PREDICTION_MODES_UV] = [
            DctDct, DctAdst, AdstDct, DctDct, AdstAdst, DctAdst, AdstDct, AdstDct, DctAdst,
            AdstAdst, DctAdst, AdstDct, AdstAdst, DctDct,
        ];
        MODE_TO_TRANSFORM_TYPE
            .get(self as usize)
            .copied()
            .unwrap_or(DctDct)
    }

    /// Splits a compound mode into the single-reference modes used by each
    /// of its two predictions.
    pub fn compound_to_single(self) -> [PredictionMode; 2] {
        use PredictionMode::*;
        match self {
            NearestNearestMv => [NearestMv, NearestMv],
            NearNearMv => [NearMv, NearMv],
            NearestNewMv => [NearestMv, NewMv],
            NewNearestMv => [NewMv, NearestMv],
            NearNewMv => [NearMv, NewMv],
            NewNearMv => [NewMv, NearMv],
            GlobalGlobalMv => [GlobalMv, GlobalMv],
            NewNewMv => [NewMv, NewMv],
            single => [single, single],
        }
    }

    /// Context class of an intra mode used by the key frame y mode CDF.
    pub fn intra_mode_context(self) -> usize {
        const INTRA_MODE_CONTEXT: [u8; INTRA_PREDICTION_MODES_Y] =
            [0, 1, 2, 3, 4, 4, 4, 4, 3, 0, 1, 2, 0];
        INTRA_MODE_CONTEXT
            .get(self as usize)
            .copied()
            .unwrap_or(0) as usize
    }
}

#[repr(u8)]
#[derive(Debug, FromPrimitive, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilterIntraPredictor {
    #[default]
    Dc = 0,
    Vertical,
    Horizontal,
    D157,
    Paeth,
}

try_from_u8!(FilterIntraPredictor);

impl FilterIntraPredictor {
    /// Directional mode with the same intra edge usage.
    pub fn intra_predictor(self) -> PredictionMode {
        match self {
            FilterIntraPredictor::Dc | FilterIntraPredictor::Paeth => PredictionMode::Dc,
            FilterIntraPredictor::Vertical => PredictionMode::Vertical,
            FilterIntraPredictor::Horizontal => PredictionMode::Horizontal,
            FilterIntraPredictor::D157 => PredictionMode::D157,
        }
    }
}

#[repr(u8)]
#[derive(Debug, FromPrimitive, Clone, Copy, PartialEq, Eq, Default)]
pub enum InterpolationFilter {
    #[default]
    EightTap = 0,
    EightTapSmooth,
    EightTapSharp,
    Bilinear,
    Switchable,
}

try_from_u8!(InterpolationFilter);

#[repr(i8)]
#[derive(Debug, FromPrimitive, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum ReferenceFrameType {
    #[default]
    None = -1,
    Intra = 0,
    Last = 1,
    Last2,
    Last3,
    Golden,
    Backward,
    Alternate2,
    Alternate,
}

impl ReferenceFrameType {
    pub fn from_index(index: usize) -> ReferenceFrameType {
        Self::from_usize(index).unwrap_or(ReferenceFrameType::None)
    }

    /// Whether this is one of the seven inter references.
    pub fn is_inter(self) -> bool {
        self > ReferenceFrameType::Intra
    }

    pub fn is_backward(self) -> bool {
        self >= ReferenceFrameType::Backward
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    Key,
    Inter,
    IntraOnly,
    Switch,
}

impl FrameType {
    pub fn is_intra(self) -> bool {
        matches!(self, FrameType::Key | FrameType::IntraOnly)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxMode {
    Only4x4,
    Largest,
    Select,
}

/// Which components of a motion vector difference are coded.
#[repr(u8)]
#[derive(Debug, FromPrimitive, Clone, Copy, PartialEq, Eq, Default)]
pub enum MotionVectorJoint {
    #[default]
    Zero = 0,
    /// Only the column is non-zero.
    HorizontalNonZero,
    /// Only the row is non-zero.
    VerticalNonZero,
    NonZero,
}

try_from_u8!(MotionVectorJoint);

impl MotionVectorJoint {
    pub fn has_row(self) -> bool {
        matches!(self, MotionVectorJoint::VerticalNonZero | MotionVectorJoint::NonZero)
    }

    pub fn has_column(self) -> bool {
        matches!(self, MotionVectorJoint::HorizontalNonZero | MotionVectorJoint::NonZero)
    }
}

#[repr(u8)]
#[derive(Debug, FromPrimitive, Clone, Copy, PartialEq, Eq)]
pub enum SegmentFeature {
    Quantizer = 0,
    LoopFilterYVertical,
    LoopFilterYHorizontal,
    LoopFilterU,
    LoopFilterV,
    ReferenceFrame,
    Skip,
    GlobalMv,
}

pub const NUM_SEGMENT_FEATURES: usize = 8;

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn subsampled_sizes() {
        assert_eq!(
            BlockSize::Block4x16.subsampled(1, 1),
            Some(BlockSize::Block4x8)
        );
        assert_eq!(BlockSize::Block4x8.subsampled(1, 0), None);
        assert_eq!(
            BlockSize::Block16x8.subsampled(1, 0),
            Some(BlockSize::Block8x8)
        );
        assert_eq!(BlockSize::Block8x4.subsampled(0, 1), None);
        assert_eq!(
            BlockSize::Block128x128.subsampled(1, 1),
            Some(BlockSize::Block64x64)
        );
        assert_eq!(
            BlockSize::Block4x4.subsampled(1, 1),
            Some(BlockSize::Block4x4)
        );
    }

    #[test]
    fn partition_sub_sizes() {
        let size = BlockSize::Block64x64;
        assert_eq!(
            size.sub_size(Partition::Horizontal4),
            Some(BlockSize::Block64x16)
        );
        assert_eq!(
            size.sub_size(Partition::VerticalWithLeftSplit),
            Some(BlockSize::Block32x64)
        );
        assert_eq!(BlockSize::Block8x8.sub_size(Partition::Vertical4), None);
        assert_eq!(
            BlockSize::Block128x128.sub_size(Partition::Horizontal4),
            None
        );
    }

    #[test]
    fn transform_size_relations() {
        assert_eq!(TransformSize::Tx64x16.adjusted(), TransformSize::Tx32x16);
        assert_eq!(TransformSize::Tx16x64.split(), TransformSize::Tx16x32);
        assert_eq!(TransformSize::Tx4x16.split(), TransformSize::Tx4x8);
        assert_eq!(TransformSize::Tx64x64.split(), TransformSize::Tx32x32);
        assert_eq!(TransformSize::Tx4x4.split(), TransformSize::Tx4x4);
        let eob_sizes: Vec<usize> = TransformSize::ALL
            .iter()
            .map(|size| size.eob_multi_size())
            .collect();
        assert_eq!(
            eob_sizes,
            [0, 1, 2, 1, 2, 3, 4, 2, 3, 4, 5, 5, 4, 5, 6, 6, 5, 6, 6]
        );
        assert_eq!(
            BlockSize::Block16x64.max_rect_transform_size(),
            TransformSize::Tx16x64
        );
        assert_eq!(
            BlockSize::Block128x64.max_rect_transform_size(),
            TransformSize::Tx64x64
        );
        assert_eq!(
            BlockSize::Block64x16.uv_transform_size(),
            TransformSize::Tx32x16
        );
    }

    #[test]
    fn transform_sets() {
        assert_eq!(
            TransformSet::new(TransformSize::Tx64x64, true, false),
            TransformSet::DctOnly
        );
        assert_eq!(
            TransformSet::new(TransformSize::Tx16x16, true, false),
            TransformSet::Inter2
        );
        assert_eq!(
            TransformSet::new(TransformSize::Tx8x8, false, false),
            TransformSet::Intra1
        );
        assert_eq!(
            TransformSet::new(TransformSize::Tx8x8, false, true),
            TransformSet::Intra2
        );
        for set in [
            TransformSet::Intra1,
            TransformSet::Intra2,
            TransformSet::Inter1,
            TransformSet::Inter2,
            TransformSet::Inter3,
        ] {
            for symbol in 0..16 {
                assert!(set.contains(set.transform_type(symbol)));
            }
        }
    }
}
