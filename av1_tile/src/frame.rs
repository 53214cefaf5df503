// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Frame-level inputs shared by all tiles, and the state tiles produce.

use std::{
    fmt::Debug,
    sync::{Arc, Mutex, RwLock},
};

use crate::{
    block_parameters::BlockParametersHolder,
    constants::{NUM_REFERENCE_FRAME_SLOTS, ReferenceFrameType, TransformSize},
    dsp::Dsp,
    error::{Error, Result},
    frame_buffer::{FrameBuffer, PlaneBuffer},
    headers::{FrameHeader, Quantizer, QuantizerTables, SequenceHeader},
    loop_filter::LoopFilterMask,
    symbol_context::SymbolDecoderContext,
    util::{Array2D, lock, tracing_wrappers::*},
};

/// Motion vector in 1/8 pixel units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MotionVector {
    pub row: i32,
    pub column: i32,
}

impl MotionVector {
    pub const ZERO: MotionVector = MotionVector { row: 0, column: 0 };

    pub fn new(row: i32, column: i32) -> Self {
        MotionVector { row, column }
    }

    pub fn is_zero(self) -> bool {
        self == Self::ZERO
    }
}

impl std::ops::Add for MotionVector {
    type Output = MotionVector;

    fn add(self, other: MotionVector) -> MotionVector {
        MotionVector::new(self.row + other.row, self.column + other.column)
    }
}

pub const MAX_REF_MV_STACK_SIZE: usize = 8;
const REF_CAT_LEVEL: u32 = 640;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CandidateMv {
    pub mv: [MotionVector; 2],
    pub weight: u32,
}

/// Reference MV candidates of one block, as built by a
/// `MotionVectorPredictor`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MvStack {
    pub candidates: [CandidateMv; MAX_REF_MV_STACK_SIZE],
    pub count: usize,
    pub new_mv_context: usize,
    pub reference_mv_context: usize,
    pub zero_mv_context: usize,
    pub global_mv: [MotionVector; 2],
}

impl MvStack {
    /// Context of the DRL flag choosing between candidates `index` and
    /// `index + 1`.
    pub fn drl_context(&self, index: usize) -> usize {
        let weight = |i: usize| self.candidates.get(i).map_or(0, |c| c.weight);
        match (weight(index) >= REF_CAT_LEVEL, weight(index + 1) >= REF_CAT_LEVEL) {
            (true, true) => 0,
            (true, false) => 1,
            _ => 2,
        }
    }
}

/// Block position and references for which the MV stack is requested.
#[derive(Debug, Clone, Copy)]
pub struct MvStackRequest<'a> {
    pub row4x4: usize,
    pub column4x4: usize,
    pub width4: usize,
    pub height4: usize,
    pub reference_frame: [ReferenceFrameType; 2],
    pub is_compound: bool,
    pub frame: &'a FrameContext,
    pub block_parameters: &'a BlockParametersHolder,
}

/// Builds reference MV stacks. Implemented outside the tile decoder.
pub trait MotionVectorPredictor: Send + Sync + Debug {
    fn find_mv_stack(&self, request: &MvStackRequest<'_>) -> MvStack;
}

/// Predictor with no spatial or temporal candidates and identity global
/// motion.
#[derive(Debug, Default)]
pub struct ZeroMvPredictor;

impl MotionVectorPredictor for ZeroMvPredictor {
    fn find_mv_stack(&self, _request: &MvStackRequest<'_>) -> MvStack {
        MvStack::default()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceFrame {
    pub planes: Vec<PlaneBuffer>,
    pub upscaled_width: usize,
    pub frame_width: usize,
    pub frame_height: usize,
    pub order_hint: u8,
}

impl ReferenceFrame {
    /// Snapshot of a decoded frame for use as a reference.
    pub fn from_frame_buffer(
        buffer: &FrameBuffer,
        header: &FrameHeader,
    ) -> Result<ReferenceFrame> {
        Ok(ReferenceFrame {
            planes: buffer.snapshot()?,
            upscaled_width: header.upscaled_width,
            frame_width: header.width,
            frame_height: header.height,
            order_hint: header.order_hint,
        })
    }
}

/// Segment id of every 4x4 block.
pub type SegmentationMap = Array2D<u8>;

/// Projected motion of the frame, stored per 8x8 block for use by later
/// frames.
#[derive(Debug, Clone, PartialEq)]
pub struct MotionField {
    pub reference_frame: Array2D<ReferenceFrameType>,
    pub mv: Array2D<MotionVector>,
}

impl MotionField {
    pub fn new(rows4x4: usize, columns4x4: usize) -> Result<Self> {
        let (rows, columns) = (rows4x4.div_ceil(2), columns4x4.div_ceil(2));
        Ok(MotionField {
            reference_frame: Array2D::new_filled(rows, columns, ReferenceFrameType::None)?,
            mv: Array2D::new(rows, columns)?,
        })
    }
}

/// Everything about the frame that stays fixed while its tiles decode.
#[derive(Debug)]
pub struct FrameContext {
    pub sequence_header: SequenceHeader,
    pub frame_header: FrameHeader,
    pub quantizer_tables: Arc<dyn QuantizerTables>,
    /// Indexed by reference slot.
    pub reference_frames: [Option<Arc<ReferenceFrame>>; NUM_REFERENCE_FRAME_SLOTS],
    pub previous_segment_ids: Option<Arc<SegmentationMap>>,
    pub motion_vector_predictor: Arc<dyn MotionVectorPredictor>,
    pub dsp: Dsp,
}

impl FrameContext {
    pub fn new(
        sequence_header: SequenceHeader,
        frame_header: FrameHeader,
        quantizer_tables: Arc<dyn QuantizerTables>,
    ) -> Result<Self> {
        frame_header.validate(&sequence_header)?;
        Ok(FrameContext {
            sequence_header,
            frame_header,
            quantizer_tables,
            reference_frames: Default::default(),
            previous_segment_ids: None,
            motion_vector_predictor: Arc::new(ZeroMvPredictor),
            dsp: Dsp::portable(),
        })
    }

    pub fn quantizer(&self) -> Quantizer<'_> {
        Quantizer::new(
            self.quantizer_tables.as_ref(),
            &self.frame_header.quantizer,
            self.sequence_header.bit_depth,
        )
    }

    /// The frame referenced as `reference` (LAST..ALTREF).
    pub fn reference_frame(&self, reference: ReferenceFrameType) -> Result<&ReferenceFrame> {
        let index = (reference as i8 - 1) as usize;
        let slot = *self
            .frame_header
            .reference_frame_index
            .get(index)
            .ok_or(Error::MissingReferenceFrame(index))?;
        self.reference_frames
            .get(slot)
            .and_then(|frame| frame.as_deref())
            .ok_or(Error::MissingReferenceFrame(slot))
    }

    /// Signed distance between two order hints.
    pub fn relative_distance(&self, a: u8, b: u8) -> i32 {
        if !self.sequence_header.enable_order_hint {
            return 0;
        }
        let bits = self.sequence_header.order_hint_bits as i32;
        let diff = a as i32 - b as i32;
        let m = 1 << (bits - 1);
        (diff & (m - 1)) - (diff & m)
    }
}

/// Outputs of the tile decoder for one frame. Tiles of the frame write to it
/// concurrently; every field is either internally synchronized or behind a
/// lock.
#[derive(Debug)]
pub struct FrameState {
    pub frame_buffer: FrameBuffer,
    pub block_parameters: BlockParametersHolder,
    /// Transform size of every luma 4x4 block.
    pub inter_transform_sizes: RwLock<Array2D<TransformSize>>,
    /// CDEF index per 64x64 block, -1 when not coded.
    pub cdef_index: Mutex<Array2D<i8>>,
    pub segmentation_map: Mutex<SegmentationMap>,
    pub motion_field: Mutex<MotionField>,
    pub loop_filter_mask: LoopFilterMask,
    /// Final CDFs of the context-update tile, counters cleared.
    pub saved_symbol_context: Mutex<Option<Box<SymbolDecoderContext>>>,
}

impl FrameState {
    #[instrument(level = "debug", skip_all, err)]
    pub fn new(frame: &FrameContext) -> Result<Self> {
        let header = &frame.frame_header;
        let (rows4x4, columns4x4) = (header.rows4x4, header.columns4x4);
        let mut segmentation_map = SegmentationMap::new(rows4x4, columns4x4)?;
        if header.segmentation.enabled && !header.segmentation.update_map {
            if let Some(previous) = &frame.previous_segment_ids {
                if previous.rows() == rows4x4 && previous.columns() == columns4x4 {
                    segmentation_map = SegmentationMap::clone(previous);
                }
            }
        }
        Ok(FrameState {
            frame_buffer: FrameBuffer::new(&frame.sequence_header, header)?,
            block_parameters: BlockParametersHolder::new(rows4x4, columns4x4)?,
            inter_transform_sizes: RwLock::new(Array2D::new(rows4x4, columns4x4)?),
            cdef_index: Mutex::new(Array2D::new_filled(
                rows4x4.div_ceil(16),
                columns4x4.div_ceil(16),
                -1,
            )?),
            segmentation_map: Mutex::new(segmentation_map),
            motion_field: Mutex::new(MotionField::new(rows4x4, columns4x4)?),
            loop_filter_mask: LoopFilterMask::new(&frame.sequence_header, header)?,
            saved_symbol_context: Mutex::new(None),
        })
    }

    pub fn take_saved_symbol_context(&self) -> Option<Box<SymbolDecoderContext>> {
        lock(&self.saved_symbol_context).take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::FlatQuantizer;
    use test_log::test;

    #[test]
    fn relative_distance_wraps() -> Result<()> {
        let sequence = SequenceHeader::default();
        let header = FrameHeader::key_frame(64, 64, &sequence)?;
        let frame = FrameContext::new(sequence, header, Arc::new(FlatQuantizer::default()))?;
        assert_eq!(frame.relative_distance(3, 5), -2);
        assert_eq!(frame.relative_distance(1, 127), 2);
        assert_eq!(frame.relative_distance(127, 1), -2);
        Ok(())
    }

    #[test]
    fn missing_reference_is_an_error() -> Result<()> {
        let sequence = SequenceHeader::default();
        let header = FrameHeader::key_frame(64, 64, &sequence)?;
        let frame = FrameContext::new(sequence, header, Arc::new(FlatQuantizer::default()))?;
        assert!(matches!(
            frame.reference_frame(ReferenceFrameType::Golden),
            Err(Error::MissingReferenceFrame(0))
        ));
        Ok(())
    }

    #[test]
    fn drl_context_from_weights() {
        let mut stack = MvStack::default();
        stack.candidates[0].weight = 700;
        stack.candidates[1].weight = 640;
        stack.candidates[2].weight = 10;
        assert_eq!(stack.drl_context(0), 0);
        assert_eq!(stack.drl_context(1), 1);
        assert_eq!(stack.drl_context(2), 2);
    }
}
