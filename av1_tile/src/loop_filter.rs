// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Deblocking edge masks produced by the tile decoder for the frame-level
//! loop filter.

use std::sync::{Mutex, MutexGuard};

use crate::{
    constants::{
        FRAME_LF_COUNT, MAX_LOOP_FILTER_VALUE, MAX_PLANES, PredictionMode, ReferenceFrameType,
        SegmentFeature,
    },
    error::Result,
    headers::{FrameHeader, SequenceHeader},
    util::{clip3, lock, tracing_wrappers::*},
};

/// 4x4 blocks along one edge of a mask unit.
pub const NUM_4X4_IN_MASK_UNIT: usize = 16;
pub const NUM_TRANSFORM_SIZE_IDS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopFilterType {
    /// Filters across vertical edges.
    Vertical = 0,
    Horizontal = 1,
}

/// Transform size class of an edge: 4, 8, or 16 and larger.
pub fn transform_size_id(log2_a: usize, log2_b: usize) -> usize {
    (log2_a - 2).min(log2_b - 2).min(2)
}

/// Edge masks of one 64x64 unit of the frame.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopFilterMaskUnit {
    pub left: [[[u64; 4]; NUM_TRANSFORM_SIZE_IDS]; MAX_PLANES],
    pub top: [[[u64; 4]; NUM_TRANSFORM_SIZE_IDS]; MAX_PLANES],
    pub level: [[[u8; NUM_4X4_IN_MASK_UNIT * NUM_4X4_IN_MASK_UNIT]; 2]; MAX_PLANES],
}

impl Default for LoopFilterMaskUnit {
    fn default() -> Self {
        LoopFilterMaskUnit {
            left: [[[0; 4]; NUM_TRANSFORM_SIZE_IDS]; MAX_PLANES],
            top: [[[0; 4]; NUM_TRANSFORM_SIZE_IDS]; MAX_PLANES],
            level: [[[0; NUM_4X4_IN_MASK_UNIT * NUM_4X4_IN_MASK_UNIT]; 2]; MAX_PLANES],
        }
    }
}

impl LoopFilterMaskUnit {
    /// Bit of the 4x4 block at row `r`, column `c` (both within the unit) in
    /// the word selected by `index(r)`.
    pub fn shift(r: usize, c: usize) -> usize {
        ((r & 3) << 4) | c
    }

    pub fn index(r: usize) -> usize {
        r >> 2
    }

    pub fn level_offset(r: usize, c: usize) -> usize {
        (r << 4) | c
    }

    pub fn set_left(&mut self, plane: usize, tx_size_id: usize, r: usize, c: usize) {
        self.left[plane][tx_size_id][Self::index(r)] |= 1u64 << Self::shift(r, c);
    }

    pub fn set_top(&mut self, plane: usize, tx_size_id: usize, r: usize, c: usize) {
        self.top[plane][tx_size_id][Self::index(r)] |= 1u64 << Self::shift(r, c);
    }

    pub fn set_level(
        &mut self,
        plane: usize,
        direction: LoopFilterType,
        r: usize,
        c: usize,
        level: u8,
    ) {
        self.level[plane][direction as usize][Self::level_offset(r, c)] = level;
    }

    pub fn is_left_set(&self, plane: usize, tx_size_id: usize, r: usize, c: usize) -> bool {
        self.left[plane][tx_size_id][Self::index(r)] & (1u64 << Self::shift(r, c)) != 0
    }

    pub fn is_top_set(&self, plane: usize, tx_size_id: usize, r: usize, c: usize) -> bool {
        self.top[plane][tx_size_id][Self::index(r)] & (1u64 << Self::shift(r, c)) != 0
    }
}

/// Masks of the whole frame. Units are locked individually so that tiles
/// and decode tasks can fill them concurrently.
#[derive(Debug)]
pub struct LoopFilterMask {
    units: Vec<Mutex<LoopFilterMaskUnit>>,
    units_per_row: usize,
    enabled: bool,
    /// Deblocking limits in 4x4 units per plane.
    row_limit: [usize; MAX_PLANES],
    column_limit: [usize; MAX_PLANES],
}

impl LoopFilterMask {
    pub fn new(sequence: &SequenceHeader, header: &FrameHeader) -> Result<Self> {
        let level = &header.loop_filter.level;
        let enabled = (level[0] != 0 || level[1] != 0)
            && !header.allow_intrabc
            && !header.coded_lossless();
        let units_per_row = header.columns4x4.div_ceil(NUM_4X4_IN_MASK_UNIT);
        let num_units = if enabled {
            units_per_row * header.rows4x4.div_ceil(NUM_4X4_IN_MASK_UNIT)
        } else {
            0
        };
        let mut units = Vec::new();
        units.try_reserve(num_units)?;
        units.resize_with(num_units, Default::default);
        let mut row_limit = [0; MAX_PLANES];
        let mut column_limit = [0; MAX_PLANES];
        for plane in 0..sequence.num_planes() {
            let (ssx, ssy) = sequence.subsampling(plane);
            let height = (header.height + ssy as usize) >> ssy;
            let width = (header.width + ssx as usize) >> ssx;
            row_limit[plane] = header.rows4x4.min(height.div_ceil(4) << ssy);
            column_limit[plane] = header.columns4x4.min(width.div_ceil(4) << ssx);
        }
        debug!(enabled, num_units, "loop filter mask");
        Ok(LoopFilterMask {
            units,
            units_per_row,
            enabled,
            row_limit,
            column_limit,
        })
    }

    /// Whether the frame is deblocked at all.
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn row_limit(&self, plane: usize) -> usize {
        self.row_limit[plane]
    }

    pub fn column_limit(&self, plane: usize) -> usize {
        self.column_limit[plane]
    }

    pub fn unit_id(&self, row4x4: usize, column4x4: usize) -> usize {
        (row4x4 / NUM_4X4_IN_MASK_UNIT) * self.units_per_row + column4x4 / NUM_4X4_IN_MASK_UNIT
    }

    pub fn num_units(&self) -> usize {
        self.units.len()
    }

    pub fn lock_unit(&self, unit_id: usize) -> MutexGuard<'_, LoopFilterMaskUnit> {
        lock(&self.units[unit_id])
    }
}

/// 1 for inter modes that carry a motion vector delta.
pub fn mode_id(mode: PredictionMode) -> usize {
    match mode {
        PredictionMode::NearestMv | PredictionMode::GlobalMv | PredictionMode::GlobalGlobalMv => 0,
        mode if mode.is_inter() => 1,
        _ => 0,
    }
}

/// Filter strength of slot `slot` for a block.
pub fn deblock_filter_level(
    header: &FrameHeader,
    segment_id: u8,
    slot: usize,
    reference_frame: ReferenceFrameType,
    mode_id: usize,
    delta_lf: &[i8; FRAME_LF_COUNT],
) -> u8 {
    let loop_filter = &header.loop_filter;
    let mut level = loop_filter.level[slot] as i32;
    if header.delta_lf.present {
        let delta = delta_lf[if header.delta_lf.multi { slot } else { 0 }] as i32;
        level = clip3(0, MAX_LOOP_FILTER_VALUE, level + delta);
    }
    const FEATURES: [SegmentFeature; FRAME_LF_COUNT] = [
        SegmentFeature::LoopFilterYVertical,
        SegmentFeature::LoopFilterYHorizontal,
        SegmentFeature::LoopFilterU,
        SegmentFeature::LoopFilterV,
    ];
    let segmentation = &header.segmentation;
    if segmentation.feature_active(segment_id, FEATURES[slot]) {
        let data = segmentation.feature_data(segment_id, FEATURES[slot]) as i32;
        level = clip3(0, MAX_LOOP_FILTER_VALUE, level + data);
    }
    if loop_filter.delta_enabled {
        let shift = level >> 5;
        let reference = reference_frame.max(ReferenceFrameType::Intra) as usize;
        level += (loop_filter.ref_deltas[reference] as i32) << shift;
        if reference_frame.is_inter() {
            level += (loop_filter.mode_deltas[mode_id] as i32) << shift;
        }
        level = clip3(0, MAX_LOOP_FILTER_VALUE, level);
    }
    level as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    fn header(level: [u8; FRAME_LF_COUNT]) -> Result<(SequenceHeader, FrameHeader)> {
        let sequence = SequenceHeader::default();
        let mut header = FrameHeader::key_frame(200, 100, &sequence)?;
        header.loop_filter.level = level;
        Ok((sequence, header))
    }

    #[test]
    fn mask_geometry() -> Result<()> {
        let (sequence, header) = header([10, 10, 5, 5])?;
        let mask = LoopFilterMask::new(&sequence, &header)?;
        assert!(mask.enabled());
        // 200x100 is 50x26 4x4 blocks (rounded to 8x8).
        assert_eq!(mask.num_units(), 4 * 2);
        assert_eq!(mask.unit_id(17, 33), 4 + 2);
        assert_eq!(mask.column_limit(0), 50);
        assert_eq!(mask.row_limit(1), 26);
        let disabled = LoopFilterMask::new(&sequence, &self::header([0, 0, 5, 5])?.1)?;
        assert!(!disabled.enabled());
        assert_eq!(disabled.num_units(), 0);
        Ok(())
    }

    #[test]
    fn unit_bits() {
        let mut unit = LoopFilterMaskUnit::default();
        unit.set_left(1, 2, 5, 9);
        assert_eq!(unit.left[1][2][1], 1 << (16 + 9));
        assert!(unit.is_left_set(1, 2, 5, 9));
        assert!(!unit.is_top_set(1, 2, 5, 9));
        unit.set_level(0, LoopFilterType::Horizontal, 15, 15, 7);
        assert_eq!(unit.level[0][1][255], 7);
        assert_eq!(transform_size_id(5, 3), 1);
        assert_eq!(transform_size_id(6, 6), 2);
    }

    #[test]
    fn levels_with_deltas() -> Result<()> {
        let (_, mut header) = header([40, 20, 10, 10])?;
        let intra = ReferenceFrameType::Intra;
        // Intra ref delta is +1, scaled by 2 above level 32.
        assert_eq!(deblock_filter_level(&header, 0, 0, intra, 0, &[0; 4]), 42);
        assert_eq!(deblock_filter_level(&header, 0, 1, intra, 0, &[0; 4]), 21);
        header.loop_filter.mode_deltas = [0, -3];
        let golden = ReferenceFrameType::Golden;
        assert_eq!(deblock_filter_level(&header, 0, 2, golden, 1, &[0; 4]), 6);
        header.delta_lf.present = true;
        assert_eq!(deblock_filter_level(&header, 0, 2, golden, 0, &[-20, 0, 0, 0]), 0);
        header.delta_lf.multi = true;
        assert_eq!(deblock_filter_level(&header, 0, 2, golden, 0, &[-20, 0, 60, 0]), 61);
        Ok(())
    }
}
