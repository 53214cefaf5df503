// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Parsed sequence and frame header fields the tile decoder consumes.

use crate::{
    constants::{
        FRAME_LF_COUNT, FrameType, InterpolationFilter, MAX_PLANES, MAX_QUANTIZER_INDEX,
        MAX_SEGMENTS, NO_QUANTIZER_MATRIX_LEVEL, NUM_INTER_REFERENCE_FRAMES,
        NUM_SEGMENT_FEATURES, PlaneType, SegmentFeature, TransformSize, TxMode,
    },
    error::{Error, Result},
    util::clip3,
};

#[derive(Debug, Clone, PartialEq)]
pub struct SequenceHeader {
    pub bit_depth: u8,
    pub monochrome: bool,
    pub subsampling_x: u8,
    pub subsampling_y: u8,
    pub use_128x128_superblock: bool,
    pub enable_filter_intra: bool,
    pub enable_intra_edge_filter: bool,
    pub enable_dual_filter: bool,
    pub enable_cdef: bool,
    pub enable_order_hint: bool,
    pub order_hint_bits: u8,
}

impl Default for SequenceHeader {
    fn default() -> Self {
        SequenceHeader {
            bit_depth: 8,
            monochrome: false,
            subsampling_x: 1,
            subsampling_y: 1,
            use_128x128_superblock: false,
            enable_filter_intra: true,
            enable_intra_edge_filter: false,
            enable_dual_filter: true,
            enable_cdef: true,
            enable_order_hint: true,
            order_hint_bits: 7,
        }
    }
}

impl SequenceHeader {
    pub fn num_planes(&self) -> usize {
        if self.monochrome { 1 } else { MAX_PLANES }
    }

    /// Superblock edge in pixels.
    pub fn superblock_size(&self) -> usize {
        if self.use_128x128_superblock { 128 } else { 64 }
    }

    /// Superblock edge in 4x4 units.
    pub fn superblock_size4(&self) -> usize {
        self.superblock_size() >> 2
    }

    pub fn subsampling(&self, plane: usize) -> (u8, u8) {
        if plane == 0 {
            (0, 0)
        } else {
            (self.subsampling_x, self.subsampling_y)
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !matches!(self.bit_depth, 8 | 10 | 12) {
            return Err(Error::UnsupportedBitDepth(self.bit_depth));
        }
        if self.subsampling_x > 1 || self.subsampling_y > self.subsampling_x {
            return Err(Error::UnsupportedSubsampling(
                self.subsampling_x,
                self.subsampling_y,
            ));
        }
        Ok(())
    }
}

/// Tile layout. Start positions are in 4x4 units and carry one trailing entry
/// for the frame end.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TileInfo {
    pub tile_columns: usize,
    pub tile_rows: usize,
    pub column_start: Vec<usize>,
    pub row_start: Vec<usize>,
    /// Tile whose final CDFs are saved for the next frame.
    pub context_update_id: usize,
}

impl TileInfo {
    /// Splits the frame into `tile_columns` x `tile_rows` tiles of whole
    /// superblocks, as evenly as possible.
    pub fn uniform(
        rows4x4: usize,
        columns4x4: usize,
        superblock_size4: usize,
        tile_columns: usize,
        tile_rows: usize,
    ) -> Result<TileInfo> {
        fn starts(size4: usize, superblock_size4: usize, count: usize) -> Result<Vec<usize>> {
            let superblocks = size4.div_ceil(superblock_size4);
            if count == 0 || count > superblocks {
                return Err(Error::InvalidTileLayout("more tiles than superblocks"));
            }
            let per_tile = superblocks.div_ceil(count);
            let mut starts: Vec<usize> = (0..count)
                .map(|i| (i * per_tile * superblock_size4).min(size4))
                .collect();
            starts.push(size4);
            if starts.windows(2).any(|w| w[0] >= w[1]) {
                return Err(Error::InvalidTileLayout("empty tile"));
            }
            Ok(starts)
        }
        Ok(TileInfo {
            tile_columns,
            tile_rows,
            column_start: starts(columns4x4, superblock_size4, tile_columns)?,
            row_start: starts(rows4x4, superblock_size4, tile_rows)?,
            context_update_id: 0,
        })
    }

    pub fn num_tiles(&self) -> usize {
        self.tile_columns * self.tile_rows
    }

    fn validate(&self, rows4x4: usize, columns4x4: usize, superblock_size4: usize) -> Result<()> {
        let check = |starts: &[usize], count: usize, size4: usize| {
            if count == 0 || starts.len() != count + 1 || starts[count] != size4 {
                return Err(Error::InvalidTileLayout("tile starts do not cover the frame"));
            }
            if starts.windows(2).any(|w| w[0] >= w[1]) {
                return Err(Error::InvalidTileLayout("tile starts are not increasing"));
            }
            if starts[..count].iter().any(|s| s % superblock_size4 != 0) {
                return Err(Error::InvalidTileLayout("tile start not superblock aligned"));
            }
            Ok(())
        };
        check(&self.column_start, self.tile_columns, columns4x4)?;
        check(&self.row_start, self.tile_rows, rows4x4)?;
        if self.context_update_id >= self.num_tiles() {
            return Err(Error::InvalidTileLayout("context update tile out of range"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QuantizerParameters {
    pub base_index: u8,
    /// DC and AC deltas per plane.
    pub delta_dc: [i8; MAX_PLANES],
    pub delta_ac: [i8; MAX_PLANES],
    pub use_matrix: bool,
    pub matrix_level: [u8; MAX_PLANES],
}

impl Default for QuantizerParameters {
    fn default() -> Self {
        QuantizerParameters {
            base_index: 100,
            delta_dc: [0; MAX_PLANES],
            delta_ac: [0; MAX_PLANES],
            use_matrix: false,
            matrix_level: [NO_QUANTIZER_MATRIX_LEVEL; MAX_PLANES],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Segmentation {
    pub enabled: bool,
    pub update_map: bool,
    pub temporal_update: bool,
    /// Segment id is read before the skip flag.
    pub segment_id_pre_skip: bool,
    pub last_active_segment_id: u8,
    pub feature_enabled: [[bool; NUM_SEGMENT_FEATURES]; MAX_SEGMENTS],
    pub feature_data: [[i16; NUM_SEGMENT_FEATURES]; MAX_SEGMENTS],
}

impl Segmentation {
    pub fn feature_active(&self, segment_id: u8, feature: SegmentFeature) -> bool {
        self.enabled && self.feature_enabled[segment_id as usize][feature as usize]
    }

    pub fn feature_data(&self, segment_id: u8, feature: SegmentFeature) -> i16 {
        self.feature_data[segment_id as usize][feature as usize]
    }

    /// Quantizer index of `segment_id` given the running base index.
    pub fn qindex(&self, segment_id: u8, base_index: i32) -> i32 {
        if self.feature_active(segment_id, SegmentFeature::Quantizer) {
            let data = self.feature_data(segment_id, SegmentFeature::Quantizer) as i32;
            clip3(0, MAX_QUANTIZER_INDEX, base_index + data)
        } else {
            base_index
        }
    }
}

/// Block-level delta q or delta lf signalling.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DeltaParameters {
    pub present: bool,
    /// Log2 of the delta resolution.
    pub scale: u8,
    /// One loop filter delta per level slot (delta lf only).
    pub multi: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoopFilterParameters {
    /// Y vertical, Y horizontal, U, V.
    pub level: [u8; FRAME_LF_COUNT],
    pub delta_enabled: bool,
    /// Indexed by reference frame, intra first.
    pub ref_deltas: [i8; NUM_INTER_REFERENCE_FRAMES + 1],
    pub mode_deltas: [i8; 2],
}

impl Default for LoopFilterParameters {
    fn default() -> Self {
        LoopFilterParameters {
            level: [0; FRAME_LF_COUNT],
            delta_enabled: true,
            ref_deltas: [1, 0, 0, 0, -1, 0, -1, -1],
            mode_deltas: [0; 2],
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FrameHeader {
    pub frame_type: FrameType,
    pub width: usize,
    pub height: usize,
    pub upscaled_width: usize,
    pub rows4x4: usize,
    pub columns4x4: usize,
    pub order_hint: u8,
    pub allow_screen_content_tools: bool,
    pub allow_intrabc: bool,
    pub allow_high_precision_mv: bool,
    pub force_integer_mv: bool,
    pub disable_cdf_update: bool,
    pub enable_frame_end_update_cdf: bool,
    pub interpolation_filter: InterpolationFilter,
    pub reference_mode_select: bool,
    pub reduced_tx_set: bool,
    pub tx_mode: TxMode,
    /// Reference slot used by each of LAST..ALTREF.
    pub reference_frame_index: [usize; NUM_INTER_REFERENCE_FRAMES],
    pub tile_info: TileInfo,
    pub quantizer: QuantizerParameters,
    pub segmentation: Segmentation,
    pub delta_q: DeltaParameters,
    pub delta_lf: DeltaParameters,
    pub loop_filter: LoopFilterParameters,
    pub cdef_bits: u8,
}

impl FrameHeader {
    /// Key frame header with a single tile and default parameters.
    pub fn key_frame(width: usize, height: usize, sequence: &SequenceHeader) -> Result<Self> {
        let rows4x4 = height.div_ceil(8) * 2;
        let columns4x4 = width.div_ceil(8) * 2;
        Ok(FrameHeader {
            frame_type: FrameType::Key,
            width,
            height,
            upscaled_width: width,
            rows4x4,
            columns4x4,
            order_hint: 0,
            allow_screen_content_tools: false,
            allow_intrabc: false,
            allow_high_precision_mv: false,
            force_integer_mv: false,
            disable_cdf_update: false,
            enable_frame_end_update_cdf: true,
            interpolation_filter: InterpolationFilter::EightTap,
            reference_mode_select: false,
            reduced_tx_set: false,
            tx_mode: TxMode::Select,
            reference_frame_index: [0; NUM_INTER_REFERENCE_FRAMES],
            tile_info: TileInfo::uniform(rows4x4, columns4x4, sequence.superblock_size4(), 1, 1)?,
            quantizer: QuantizerParameters::default(),
            segmentation: Segmentation::default(),
            delta_q: DeltaParameters::default(),
            delta_lf: DeltaParameters::default(),
            loop_filter: LoopFilterParameters::default(),
            cdef_bits: 0,
        })
    }

    /// Intra frames always code integer motion vectors.
    pub fn integer_mv(&self) -> bool {
        self.force_integer_mv || self.frame_type.is_intra()
    }

    pub fn is_lossless(&self, segment_id: u8) -> bool {
        let q = &self.quantizer;
        self.segmentation.qindex(segment_id, q.base_index as i32) == 0
            && q.delta_dc.iter().all(|&d| d == 0)
            && q.delta_ac.iter().all(|&d| d == 0)
    }

    /// Every segment is lossless.
    pub fn coded_lossless(&self) -> bool {
        (0..MAX_SEGMENTS as u8).all(|segment| self.is_lossless(segment))
    }

    pub fn validate(&self, sequence: &SequenceHeader) -> Result<()> {
        sequence.validate()?;
        if self.width == 0 || self.height == 0 || self.width > 65536 || self.height > 65536 {
            return Err(Error::ImageSizeTooLarge(self.width, self.height));
        }
        if self.rows4x4 < self.height.div_ceil(4) || self.columns4x4 < self.width.div_ceil(4) {
            return Err(Error::InvalidTileLayout("4x4 grid smaller than the frame"));
        }
        self.tile_info
            .validate(self.rows4x4, self.columns4x4, sequence.superblock_size4())
    }
}

/// Constant quantizer data supplied by the caller.
pub trait QuantizerTables: Send + Sync + std::fmt::Debug {
    fn dc_q(&self, qindex: u8, bit_depth: u8) -> i32;
    fn ac_q(&self, qindex: u8, bit_depth: u8) -> i32;
    /// Weights of the (32-clamped) `tx_size`, one per coefficient, or `None`
    /// when the level has no matrix.
    fn matrix(&self, level: u8, plane_type: PlaneType, tx_size: TransformSize) -> Option<&[u8]>;
}

/// Quantizer of one frame: tables plus the header deltas.
#[derive(Clone, Copy)]
pub struct Quantizer<'a> {
    tables: &'a dyn QuantizerTables,
    parameters: &'a QuantizerParameters,
    bit_depth: u8,
}

impl<'a> Quantizer<'a> {
    pub fn new(
        tables: &'a dyn QuantizerTables,
        parameters: &'a QuantizerParameters,
        bit_depth: u8,
    ) -> Self {
        Quantizer {
            tables,
            parameters,
            bit_depth,
        }
    }

    fn index(qindex: i32, delta: i8) -> u8 {
        clip3(0, MAX_QUANTIZER_INDEX, qindex + delta as i32) as u8
    }

    pub fn dc(&self, plane: usize, qindex: i32) -> i32 {
        let index = Self::index(qindex, self.parameters.delta_dc[plane]);
        self.tables.dc_q(index, self.bit_depth)
    }

    pub fn ac(&self, plane: usize, qindex: i32) -> i32 {
        let index = Self::index(qindex, self.parameters.delta_ac[plane]);
        self.tables.ac_q(index, self.bit_depth)
    }
}
