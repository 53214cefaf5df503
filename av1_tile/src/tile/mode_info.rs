// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Mode info syntax: segment id, skip, CDEF index, quantizer and loop filter
//! deltas, intra modes, reference frames, inter modes and motion vectors.
//! Palettes live in `palette`.

use std::sync::Arc;

use super::{Block, motion_vector::is_mv_valid, palette::palette_allowed, parser::Parser};
use crate::{
    block_parameters::{BlockParameters, PredictionParameters},
    constants::{
        BlockSize, FRAME_LF_COUNT, FilterIntraPredictor, InterpolationFilter,
        MAX_LOOP_FILTER_VALUE, MAX_QUANTIZER_INDEX, PredictionMode, ReferenceFrameType,
        SegmentFeature,
    },
    error::{Error, Result},
    frame::{MotionVector, MvStack, MvStackRequest},
    util::{clip3, lock},
};

const DELTA_SMALL: usize = 3;
const MAX_ANGLE_DELTA: i8 = 3;
const INTRA_BLOCK_COPY_DELAY_PIXELS: i32 = 256;
const COMPOUND_MODE_CONTEXT_MAP: [[usize; 5]; 3] = [[0, 1, 1, 1, 1], [1, 2, 3, 4, 4], [4, 4, 5, 6, 7]];

/// Parameters of the blocks above and to the left, when inside the tile.
struct Neighbours {
    above: Option<Arc<BlockParameters>>,
    left: Option<Arc<BlockParameters>>,
}

impl Neighbours {
    fn iter(&self) -> impl Iterator<Item = &BlockParameters> {
        self.above.iter().chain(self.left.iter()).map(|bp| bp.as_ref())
    }

    /// How often `reference` is used by the neighbours.
    fn count(&self, reference: ReferenceFrameType) -> usize {
        self.iter()
            .map(|bp| bp.reference_frame.iter().filter(|&&r| r == reference).count())
            .sum()
    }

    fn count_any(&self, references: &[ReferenceFrameType]) -> usize {
        references.iter().map(|&r| self.count(r)).sum()
    }
}

fn count_context(first: usize, second: usize) -> usize {
    match first.cmp(&second) {
        std::cmp::Ordering::Less => 0,
        std::cmp::Ordering::Equal => 1,
        std::cmp::Ordering::Greater => 2,
    }
}

fn is_intra(bp: &BlockParameters) -> bool {
    !bp.reference_frame[0].is_inter()
}

fn is_single(bp: &BlockParameters) -> bool {
    !bp.reference_frame[1].is_inter()
}

fn same_direction(a: ReferenceFrameType, b: ReferenceFrameType) -> bool {
    a.is_backward() == b.is_backward()
}

/// Inverse of the segment id remapping around the predicted id.
fn neg_deinterleave(diff: i32, reference: i32, max: i32) -> i32 {
    if reference == 0 {
        return diff;
    }
    if reference >= max - 1 {
        return max - diff - 1;
    }
    let interleaved = |diff: i32| {
        if diff & 1 != 0 {
            reference + ((diff + 1) >> 1)
        } else {
            reference - (diff >> 1)
        }
    };
    if 2 * reference < max {
        if diff <= 2 * reference {
            return interleaved(diff);
        }
        diff
    } else {
        if diff <= 2 * (max - reference - 1) {
            return interleaved(diff);
        }
        max - (diff + 1)
    }
}

/// Rounds a predicted motion vector to the precision of the frame.
pub(super) fn lower_mv_precision(
    mv: MotionVector,
    allow_high_precision: bool,
    integer: bool,
) -> MotionVector {
    if allow_high_precision && !integer {
        return mv;
    }
    let lower = |value: i32| {
        if integer {
            let rounded = ((value.abs() + 3) >> 3) << 3;
            if value > 0 { rounded } else { -rounded }
        } else if value & 1 != 0 {
            value + if value > 0 { -1 } else { 1 }
        } else {
            value
        }
    };
    MotionVector::new(lower(mv.row), lower(mv.column))
}

impl Parser<'_> {
    pub(super) fn read_mode_info(
        &mut self,
        block: &Block,
        bp: &mut BlockParameters,
        prediction: &mut PredictionParameters,
    ) -> Result<()> {
        let holder = &self.shared.state.block_parameters;
        let neighbours = Neighbours {
            above: block.top_available[0]
                .then(|| holder.find(block.row4x4 - 1, block.column4x4))
                .flatten(),
            left: block.left_available[0]
                .then(|| holder.find(block.row4x4, block.column4x4 - 1))
                .flatten(),
        };
        if self.shared.header().frame_type.is_intra() {
            self.read_intra_frame_mode_info(block, bp, prediction, &neighbours)
        } else {
            self.read_inter_frame_mode_info(block, bp, prediction, &neighbours)
        }
    }

    fn read_intra_frame_mode_info(
        &mut self,
        block: &Block,
        bp: &mut BlockParameters,
        prediction: &mut PredictionParameters,
        neighbours: &Neighbours,
    ) -> Result<()> {
        let shared = self.shared.clone();
        let header = shared.header();
        let segmentation = &header.segmentation;
        if segmentation.segment_id_pre_skip {
            self.read_intra_segment_id(block, bp);
        }
        self.read_skip(bp, neighbours);
        if !segmentation.segment_id_pre_skip {
            self.read_intra_segment_id(block, bp);
        }
        self.read_cdef(block, bp);
        self.read_deltas(block, bp);
        self.read_deltas = false;
        bp.reference_frame = [ReferenceFrameType::Intra, ReferenceFrameType::None];
        prediction.use_intra_block_copy =
            header.allow_intrabc && self.reader.read_bool(&mut self.context.intra_block_copy);
        if prediction.use_intra_block_copy {
            bp.is_inter = true;
            bp.y_mode = PredictionMode::Dc;
            bp.uv_mode = PredictionMode::Dc;
            bp.interpolation_filter = [InterpolationFilter::Bilinear; 2];
            self.find_mv_stack(block, bp, prediction);
            return self.assign_mv(block, bp, prediction);
        }
        bp.is_inter = false;
        let above_mode = neighbours.above.as_ref().map_or(PredictionMode::Dc, |n| n.y_mode);
        let left_mode = neighbours.left.as_ref().map_or(PredictionMode::Dc, |n| n.y_mode);
        let cdf = &mut self.context.intra_frame_y_mode[above_mode.intra_mode_context()]
            [left_mode.intra_mode_context()];
        bp.y_mode = PredictionMode::try_from(self.reader.read_symbol(cdf) as u8)?;
        self.read_intra_angle_and_uv(block, bp, prediction, neighbours)
    }

    fn read_inter_frame_mode_info(
        &mut self,
        block: &Block,
        bp: &mut BlockParameters,
        prediction: &mut PredictionParameters,
        neighbours: &Neighbours,
    ) -> Result<()> {
        let shared = self.shared.clone();
        let header = shared.header();
        self.read_inter_segment_id(block, bp, true);
        self.read_skip(bp, neighbours);
        if !header.segmentation.segment_id_pre_skip {
            self.read_inter_segment_id(block, bp, false);
        }
        self.read_cdef(block, bp);
        self.read_deltas(block, bp);
        self.read_deltas = false;
        self.read_is_inter(bp, neighbours);
        if bp.is_inter {
            self.read_inter_block_mode_info(block, bp, prediction, neighbours)
        } else {
            bp.reference_frame = [ReferenceFrameType::Intra, ReferenceFrameType::None];
            let cdf = &mut self.context.y_mode[block.size.size_group()];
            bp.y_mode = PredictionMode::try_from(self.reader.read_symbol(cdf) as u8)?;
            self.read_intra_angle_and_uv(block, bp, prediction, neighbours)
        }
    }

    /// Segment id predicted from the already coded neighbours, with the
    /// context of the segment id symbol.
    fn spatial_segment_id(&self, block: &Block) -> (u8, usize) {
        let map = lock(&self.shared.state.segmentation_map);
        let (row, column) = (block.row4x4, block.column4x4);
        let (top, left) = (block.top_available[0], block.left_available[0]);
        let at = |r: usize, c: usize| map.get(r, c).map_or(-1, |&id| id as i32);
        let above = if top { at(row - 1, column) } else { -1 };
        let left_id = if left { at(row, column - 1) } else { -1 };
        let above_left = if top && left { at(row - 1, column - 1) } else { -1 };
        let predicted = if above == -1 {
            left_id.max(0)
        } else if left_id == -1 {
            above
        } else if above_left == above {
            above
        } else {
            left_id
        };
        let context = if above_left < 0 {
            0
        } else if above_left == above && above_left == left_id {
            2
        } else if above_left == above || above_left == left_id || above == left_id {
            1
        } else {
            0
        };
        (predicted as u8, context)
    }

    fn read_segment_id(&mut self, block: &Block, bp: &mut BlockParameters) {
        let (predicted, context) = self.spatial_segment_id(block);
        if bp.skip {
            bp.segment_id = predicted;
            return;
        }
        let last_active = self.shared.header().segmentation.last_active_segment_id as i32;
        let symbol = self
            .reader
            .read_symbol(&mut self.context.segment_id[context]) as i32;
        let id = neg_deinterleave(symbol, predicted as i32, last_active + 1);
        bp.segment_id = clip3(0, last_active, id) as u8;
    }

    fn read_intra_segment_id(&mut self, block: &Block, bp: &mut BlockParameters) {
        if self.shared.header().segmentation.enabled {
            self.read_segment_id(block, bp);
        } else {
            bp.segment_id = 0;
        }
    }

    /// Smallest segment id of the previous frame over the block.
    fn temporal_segment_id(&self, block: &Block) -> u8 {
        let Some(previous) = &self.shared.frame.previous_segment_ids else {
            return 0;
        };
        let row_end = (block.row4x4 + block.size.height4()).min(previous.rows());
        let column_end = (block.column4x4 + block.size.width4()).min(previous.columns());
        (block.row4x4..row_end)
            .flat_map(|r| (block.column4x4..column_end).map(move |c| (r, c)))
            .filter_map(|(r, c)| previous.get(r, c).copied())
            .min()
            .unwrap_or(0)
    }

    fn set_segment_id_predicted(&mut self, block: &Block, predicted: bool) {
        let end = (block.column4x4 + block.size.width4()).min(self.segment_id_predicted_above.len());
        self.segment_id_predicted_above[block.column4x4.min(end)..end].fill(predicted);
        let end = (block.row4x4 + block.size.height4()).min(self.segment_id_predicted_left.len());
        self.segment_id_predicted_left[block.row4x4.min(end)..end].fill(predicted);
    }

    fn read_inter_segment_id(&mut self, block: &Block, bp: &mut BlockParameters, pre_skip: bool) {
        let shared = self.shared.clone();
        let segmentation = &shared.header().segmentation;
        if !segmentation.enabled {
            bp.segment_id = 0;
            return;
        }
        let predicted = self.temporal_segment_id(block);
        if !segmentation.update_map {
            bp.segment_id = predicted;
            return;
        }
        if pre_skip && !segmentation.segment_id_pre_skip {
            bp.segment_id = 0;
            return;
        }
        if !pre_skip && bp.skip {
            self.set_segment_id_predicted(block, false);
            self.read_segment_id(block, bp);
            return;
        }
        if segmentation.temporal_update {
            let context = self.segment_id_predicted_left[block.row4x4] as usize
                + self.segment_id_predicted_above[block.column4x4] as usize;
            let use_predicted = self
                .reader
                .read_bool(&mut self.context.segment_id_predicted[context]);
            if use_predicted {
                bp.segment_id = predicted;
            } else {
                self.read_segment_id(block, bp);
            }
            self.set_segment_id_predicted(block, use_predicted);
        } else {
            self.read_segment_id(block, bp);
        }
    }

    fn read_skip(&mut self, bp: &mut BlockParameters, neighbours: &Neighbours) {
        let segmentation = &self.shared.header().segmentation;
        if segmentation.segment_id_pre_skip
            && segmentation.feature_active(bp.segment_id, SegmentFeature::Skip)
        {
            bp.skip = true;
            return;
        }
        let context = neighbours.iter().filter(|n| n.skip).count();
        bp.skip = self.reader.read_bool(&mut self.context.skip[context]);
    }

    /// Reads the CDEF index of the 64x64 block containing `block` the first
    /// time a non-skipped block of it is coded.
    fn read_cdef(&mut self, block: &Block, bp: &BlockParameters) {
        let shared = self.shared.clone();
        let header = shared.header();
        if bp.skip
            || header.coded_lossless()
            || !shared.sequence().enable_cdef
            || header.allow_intrabc
        {
            return;
        }
        let mut cdef = lock(&shared.state.cdef_index);
        let (row, column) = (block.row4x4 >> 4, block.column4x4 >> 4);
        if cdef.get(row, column) != Some(&-1) {
            return;
        }
        let index = self.reader.read_literal(header.cdef_bits as u32) as i8;
        let rows = block.size.height4().div_ceil(16);
        let columns = block.size.width4().div_ceil(16);
        for r in row..row + rows {
            for c in column..column + columns {
                if let Some(cell) = cdef.get_mut(r, c) {
                    *cell = index;
                }
            }
        }
    }

    /// Reads `DELTA_SMALL` or more as an escaped literal.
    fn read_delta_magnitude(&mut self, symbol: usize) -> i32 {
        if symbol < DELTA_SMALL {
            return symbol as i32;
        }
        let bits = self.reader.read_literal(3) + 1;
        let value = self.reader.read_literal(bits);
        (value + (1 << bits) + 1) as i32
    }

    fn read_deltas(&mut self, block: &Block, bp: &BlockParameters) {
        let shared = self.shared.clone();
        let header = shared.header();
        if !self.read_deltas || (block.size == shared.geometry.superblock_size && bp.skip) {
            return;
        }
        let symbol = self.reader.read_symbol(&mut self.context.delta_q);
        let magnitude = self.read_delta_magnitude(symbol);
        if magnitude != 0 {
            let delta = if self.reader.read_bit() { -magnitude } else { magnitude };
            self.current_qindex = clip3(
                1,
                MAX_QUANTIZER_INDEX,
                self.current_qindex + (delta << header.delta_q.scale),
            );
        }
        if !header.delta_lf.present {
            return;
        }
        let count = match (header.delta_lf.multi, shared.sequence().monochrome) {
            (false, _) => 1,
            (true, true) => FRAME_LF_COUNT - 2,
            (true, false) => FRAME_LF_COUNT,
        };
        for i in 0..count {
            let symbol = if header.delta_lf.multi {
                self.reader.read_symbol(&mut self.context.delta_lf_multi[i])
            } else {
                self.reader.read_symbol(&mut self.context.delta_lf)
            };
            let magnitude = self.read_delta_magnitude(symbol);
            if magnitude != 0 {
                let delta = if self.reader.read_bit() { -magnitude } else { magnitude };
                self.delta_lf[i] = clip3(
                    -MAX_LOOP_FILTER_VALUE,
                    MAX_LOOP_FILTER_VALUE,
                    self.delta_lf[i] as i32 + (delta << header.delta_lf.scale),
                ) as i8;
            }
        }
    }

    fn read_is_inter(&mut self, bp: &mut BlockParameters, neighbours: &Neighbours) {
        let segmentation = &self.shared.header().segmentation;
        if segmentation.feature_active(bp.segment_id, SegmentFeature::ReferenceFrame) {
            bp.is_inter = segmentation.feature_data(bp.segment_id, SegmentFeature::ReferenceFrame)
                != ReferenceFrameType::Intra as i16;
            return;
        }
        if segmentation.feature_active(bp.segment_id, SegmentFeature::GlobalMv) {
            bp.is_inter = true;
            return;
        }
        let context = match (&neighbours.above, &neighbours.left) {
            (Some(above), Some(left)) => match (is_intra(above), is_intra(left)) {
                (true, true) => 3,
                (false, false) => 0,
                _ => 1,
            },
            (Some(n), None) | (None, Some(n)) => 2 * is_intra(n) as usize,
            (None, None) => 0,
        };
        bp.is_inter = self.reader.read_bool(&mut self.context.is_inter[context]);
    }

    fn use_angle_delta(block: &Block, mode: PredictionMode) -> bool {
        block.size >= BlockSize::Block8x8 && mode.is_directional()
    }

    fn read_angle_delta(&mut self, mode: PredictionMode) -> i8 {
        let index = mode as usize - PredictionMode::Vertical as usize;
        let symbol = self.reader.read_symbol(&mut self.context.angle_delta[index]);
        symbol as i8 - MAX_ANGLE_DELTA
    }

    fn cfl_allowed(&self, block: &Block, bp: &BlockParameters) -> bool {
        if self.shared.header().is_lossless(bp.segment_id) {
            block.residual_size[1] == BlockSize::Block4x4
        } else {
            block.size.width().max(block.size.height()) <= 32
        }
    }

    fn read_cfl_alphas(&mut self, prediction: &mut PredictionParameters) {
        let signs = self.reader.read_symbol(&mut self.context.cfl_alpha_signs) + 1;
        let (sign_u, sign_v) = (signs / 3, signs % 3);
        let mut read_alpha = |sign: usize, other: usize| -> i8 {
            if sign == 0 {
                return 0;
            }
            let context = (sign - 1) * 3 + other;
            let alpha = 1 + self.reader.read_symbol(&mut self.context.cfl_alpha[context]) as i8;
            if sign == 1 { -alpha } else { alpha }
        };
        prediction.cfl_alpha_u = read_alpha(sign_u, sign_v);
        prediction.cfl_alpha_v = read_alpha(sign_v, sign_u);
    }

    /// Luma angle, chroma mode and angle, palette and filter intra of an
    /// intra block.
    fn read_intra_angle_and_uv(
        &mut self,
        block: &Block,
        bp: &mut BlockParameters,
        prediction: &mut PredictionParameters,
        neighbours: &Neighbours,
    ) -> Result<()> {
        if Self::use_angle_delta(block, bp.y_mode) {
            prediction.angle_delta[0] = self.read_angle_delta(bp.y_mode);
        }
        if block.has_chroma {
            let y_mode = bp.y_mode as usize;
            let symbol = if self.cfl_allowed(block, bp) {
                self.reader
                    .read_symbol(&mut self.context.uv_mode_cfl_allowed[y_mode])
            } else {
                self.reader
                    .read_symbol(&mut self.context.uv_mode_cfl_not_allowed[y_mode])
            };
            bp.uv_mode = PredictionMode::try_from(symbol as u8)?;
            if bp.uv_mode == PredictionMode::ChromaFromLuma {
                self.read_cfl_alphas(prediction);
            }
            if Self::use_angle_delta(block, bp.uv_mode) {
                prediction.angle_delta[1] = self.read_angle_delta(bp.uv_mode);
            }
        } else {
            bp.uv_mode = PredictionMode::Dc;
        }
        if self.shared.header().allow_screen_content_tools && palette_allowed(block.size) {
            self.read_palette_mode_info(
                block,
                bp,
                neighbours.above.as_deref(),
                neighbours.left.as_deref(),
            );
        }
        prediction.use_filter_intra = self.shared.sequence().enable_filter_intra
            && bp.y_mode == PredictionMode::Dc
            && bp.palette.size[0] == 0
            && block.size.width().max(block.size.height()) <= 32
            && self
                .reader
                .read_bool(&mut self.context.use_filter_intra[block.size as usize]);
        if prediction.use_filter_intra {
            let symbol = self.reader.read_symbol(&mut self.context.filter_intra_mode);
            prediction.filter_intra_mode = FilterIntraPredictor::try_from(symbol as u8)?;
        }
        Ok(())
    }

    fn find_mv_stack(
        &self,
        block: &Block,
        bp: &BlockParameters,
        prediction: &mut PredictionParameters,
    ) {
        let frame = &self.shared.frame;
        let request = MvStackRequest {
            row4x4: block.row4x4,
            column4x4: block.column4x4,
            width4: block.size.width4(),
            height4: block.size.height4(),
            reference_frame: bp.reference_frame,
            is_compound: bp.is_compound(),
            frame,
            block_parameters: &self.shared.state.block_parameters,
        };
        prediction.mv_stack = frame.motion_vector_predictor.find_mv_stack(&request);
    }

    fn read_inter_block_mode_info(
        &mut self,
        block: &Block,
        bp: &mut BlockParameters,
        prediction: &mut PredictionParameters,
        neighbours: &Neighbours,
    ) -> Result<()> {
        self.read_reference_frames(block, bp, neighbours);
        let is_compound = bp.is_compound();
        self.find_mv_stack(block, bp, prediction);
        let stack = &prediction.mv_stack;
        let segmentation = &self.shared.header().segmentation;
        bp.y_mode = if segmentation.feature_active(bp.segment_id, SegmentFeature::Skip)
            || segmentation.feature_active(bp.segment_id, SegmentFeature::GlobalMv)
        {
            PredictionMode::GlobalMv
        } else if is_compound {
            let context = COMPOUND_MODE_CONTEXT_MAP[(stack.reference_mv_context >> 1).min(2)]
                [stack.new_mv_context.min(4)];
            let symbol = self
                .reader
                .read_symbol(&mut self.context.compound_prediction_mode[context]);
            PredictionMode::try_from(PredictionMode::NearestNearestMv as u8 + symbol as u8)?
        } else if !self
            .reader
            .read_bool(&mut self.context.new_mv[stack.new_mv_context.min(5)])
        {
            PredictionMode::NewMv
        } else if !self
            .reader
            .read_bool(&mut self.context.zero_mv[stack.zero_mv_context.min(1)])
        {
            PredictionMode::GlobalMv
        } else if !self
            .reader
            .read_bool(&mut self.context.reference_mv[stack.reference_mv_context.min(5)])
        {
            PredictionMode::NearestMv
        } else {
            PredictionMode::NearMv
        };
        prediction.ref_mv_index = self.read_drl(bp.y_mode, &prediction.mv_stack);
        self.assign_mv(block, bp, prediction)?;
        self.read_interpolation_filter(block, bp, neighbours);
        Ok(())
    }

    /// Index of the MV stack candidate used by NEWMV and NEARMV modes.
    fn read_drl(&mut self, mode: PredictionMode, stack: &MvStack) -> usize {
        let has_near = matches!(
            mode,
            PredictionMode::NearMv
                | PredictionMode::NearNearMv
                | PredictionMode::NearNewMv
                | PredictionMode::NewNearMv
        );
        let range = if matches!(mode, PredictionMode::NewMv | PredictionMode::NewNewMv) {
            0..2
        } else if has_near {
            1..3
        } else {
            return 0;
        };
        let mut index = range.start;
        for i in range {
            if stack.count <= i + 1 {
                break;
            }
            let context = stack.drl_context(i);
            if !self.reader.read_bool(&mut self.context.drl[context]) {
                return i;
            }
            index = i + 1;
        }
        index
    }

    fn read_reference_frames(
        &mut self,
        block: &Block,
        bp: &mut BlockParameters,
        neighbours: &Neighbours,
    ) {
        use ReferenceFrameType::*;
        let shared = self.shared.clone();
        let header = shared.header();
        let segmentation = &header.segmentation;
        if segmentation.feature_active(bp.segment_id, SegmentFeature::ReferenceFrame) {
            let data = segmentation.feature_data(bp.segment_id, SegmentFeature::ReferenceFrame);
            bp.reference_frame = [ReferenceFrameType::from_index(data.max(0) as usize), None];
            return;
        }
        if segmentation.feature_active(bp.segment_id, SegmentFeature::Skip)
            || segmentation.feature_active(bp.segment_id, SegmentFeature::GlobalMv)
        {
            bp.reference_frame = [Last, None];
            return;
        }
        let compound = header.reference_mode_select
            && block.size.width4().min(block.size.height4()) >= 2
            && {
                let context = self.compound_reference_context(neighbours);
                self.reader
                    .read_bool(&mut self.context.use_compound_reference[context])
            };
        let n = neighbours;
        let fwd_bwd = count_context(
            n.count_any(&[Last, Last2, Last3, Golden]),
            n.count_any(&[Backward, Alternate2, Alternate]),
        );
        let last_last2 = count_context(n.count(Last), n.count(Last2));
        let last3_golden = count_context(n.count(Last3), n.count(Golden));
        let last12_last3golden = count_context(
            n.count_any(&[Last, Last2]),
            n.count_any(&[Last3, Golden]),
        );
        let bwd_alt2 = count_context(n.count(Backward), n.count(Alternate2));
        let bwdalt2_alt = count_context(n.count_any(&[Backward, Alternate2]), n.count(Alternate));
        if !compound {
            let cdfs = &mut self.context.single_reference;
            let reference = if self.reader.read_bool(&mut cdfs[fwd_bwd][0]) {
                if self.reader.read_bool(&mut cdfs[bwdalt2_alt][1]) {
                    Alternate
                } else if self.reader.read_bool(&mut cdfs[bwd_alt2][5]) {
                    Alternate2
                } else {
                    Backward
                }
            } else if self.reader.read_bool(&mut cdfs[last12_last3golden][2]) {
                if self.reader.read_bool(&mut cdfs[last3_golden][4]) {
                    Golden
                } else {
                    Last3
                }
            } else if self.reader.read_bool(&mut cdfs[last_last2][3]) {
                Last2
            } else {
                Last
            };
            bp.reference_frame = [reference, None];
            return;
        }
        let context = self.compound_reference_type_context(neighbours);
        let bidirectional = self
            .reader
            .read_bool(&mut self.context.compound_reference_type[context]);
        if !bidirectional {
            let cdfs = &mut self.context.unidirectional_compound_reference;
            let last2_last3golden = count_context(n.count(Last2), n.count_any(&[Last3, Golden]));
            bp.reference_frame = if self.reader.read_bool(&mut cdfs[fwd_bwd][0]) {
                [Backward, Alternate]
            } else if !self.reader.read_bool(&mut cdfs[last2_last3golden][1]) {
                [Last, Last2]
            } else if self.reader.read_bool(&mut cdfs[last3_golden][2]) {
                [Last, Golden]
            } else {
                [Last, Last3]
            };
            return;
        }
        let cdfs = &mut self.context.compound_reference;
        let forward = if !self.reader.read_bool(&mut cdfs[last12_last3golden][0]) {
            if self.reader.read_bool(&mut cdfs[last_last2][1]) { Last2 } else { Last }
        } else if self.reader.read_bool(&mut cdfs[last3_golden][2]) {
            Golden
        } else {
            Last3
        };
        let cdfs = &mut self.context.compound_backward_reference;
        let backward = if self.reader.read_bool(&mut cdfs[bwdalt2_alt][0]) {
            Alternate
        } else if self.reader.read_bool(&mut cdfs[bwd_alt2][1]) {
            Alternate2
        } else {
            Backward
        };
        bp.reference_frame = [forward, backward];
    }

    fn compound_reference_context(&self, neighbours: &Neighbours) -> usize {
        let backward = |bp: &BlockParameters| bp.reference_frame[0].is_backward() as usize;
        match (&neighbours.above, &neighbours.left) {
            (Some(above), Some(left)) => match (is_single(above), is_single(left)) {
                (true, true) => backward(above) ^ backward(left),
                (true, false) => 2 + (backward(above) | is_intra(above) as usize),
                (false, true) => 2 + (backward(left) | is_intra(left) as usize),
                (false, false) => 4,
            },
            (Some(n), None) | (None, Some(n)) => {
                if is_single(n) {
                    backward(n)
                } else {
                    3
                }
            }
            (None, None) => 1,
        }
    }

    fn compound_reference_type_context(&self, neighbours: &Neighbours) -> usize {
        let compound_inter = |n: &Option<Arc<BlockParameters>>| {
            n.as_ref().is_some_and(|bp| !is_intra(bp) && !is_single(bp))
        };
        let unidirectional = |n: &Option<Arc<BlockParameters>>| {
            compound_inter(n)
                && n.as_ref().is_some_and(|bp| {
                    same_direction(bp.reference_frame[0], bp.reference_frame[1])
                })
        };
        let (above, left) = (&neighbours.above, &neighbours.left);
        let (above_compound, left_compound) = (compound_inter(above), compound_inter(left));
        let (above_uni, left_uni) = (unidirectional(above), unidirectional(left));
        match (above, left) {
            (Some(a), Some(l)) if !is_intra(a) && !is_intra(l) => {
                let same = same_direction(a.reference_frame[0], l.reference_frame[0]) as usize;
                match (above_compound, left_compound) {
                    (false, false) => 1 + 2 * same,
                    (false, true) => {
                        if left_uni {
                            3 + same
                        } else {
                            1
                        }
                    }
                    (true, false) => {
                        if above_uni {
                            3 + same
                        } else {
                            1
                        }
                    }
                    (true, true) => match (above_uni, left_uni) {
                        (false, false) => 0,
                        (true, true) => {
                            3 + ((a.reference_frame[0] == ReferenceFrameType::Backward)
                                == (l.reference_frame[0] == ReferenceFrameType::Backward))
                                as usize
                        }
                        _ => 2,
                    },
                }
            }
            (Some(_), Some(_)) => {
                if above_compound {
                    1 + 2 * above_uni as usize
                } else if left_compound {
                    1 + 2 * left_uni as usize
                } else {
                    2
                }
            }
            _ => {
                if above_compound {
                    4 * above_uni as usize
                } else if left_compound {
                    4 * left_uni as usize
                } else {
                    2
                }
            }
        }
    }

    /// Sets the motion vectors of the block from the MV stack, reading the
    /// differences of NEWMV predictions.
    pub(super) fn assign_mv(
        &mut self,
        block: &Block,
        bp: &mut BlockParameters,
        prediction: &PredictionParameters,
    ) -> Result<()> {
        let shared = self.shared.clone();
        let header = shared.header();
        let stack = &prediction.mv_stack;
        let integer = header.integer_mv();
        let high_precision = header.allow_high_precision_mv;
        let lower = |mv| lower_mv_precision(mv, high_precision, integer);
        let modes = if prediction.use_intra_block_copy {
            [PredictionMode::NewMv; 2]
        } else {
            bp.y_mode.compound_to_single()
        };
        for i in 0..1 + bp.is_compound() as usize {
            let predicted = if prediction.use_intra_block_copy {
                let mut mv = lower(stack.candidates[0].mv[0]);
                if mv.is_zero() {
                    mv = lower(stack.candidates[1].mv[0]);
                }
                if mv.is_zero() {
                    let superblock_size4 = shared.geometry.superblock_size4 as i32;
                    mv = if (block.row4x4 as i32) - superblock_size4
                        < shared.geometry.row4x4_start as i32
                    {
                        MotionVector::new(
                            0,
                            -(superblock_size4 * 4 + INTRA_BLOCK_COPY_DELAY_PIXELS) * 8,
                        )
                    } else {
                        MotionVector::new(-(superblock_size4 * 4 * 8), 0)
                    };
                }
                mv
            } else if modes[i] == PredictionMode::GlobalMv {
                lower(stack.global_mv[i])
            } else {
                let index = if modes[i] == PredictionMode::NearestMv
                    || (modes[i] == PredictionMode::NewMv && stack.count <= 1)
                {
                    0
                } else {
                    prediction.ref_mv_index
                };
                lower(stack.candidates[index.min(stack.candidates.len() - 1)].mv[i])
            };
            bp.mv[i] = if modes[i] == PredictionMode::NewMv {
                let context = prediction.use_intra_block_copy as usize;
                predicted + self.read_mv(context)
            } else {
                predicted
            };
        }
        if !is_mv_valid(&shared, block, bp, prediction.use_intra_block_copy) {
            return Err(Error::InvalidMotionVector(bp.mv[0].row, bp.mv[0].column));
        }
        Ok(())
    }

    fn read_interpolation_filter(
        &mut self,
        block: &Block,
        bp: &mut BlockParameters,
        neighbours: &Neighbours,
    ) {
        let shared = self.shared.clone();
        let header = shared.header();
        if header.interpolation_filter != InterpolationFilter::Switchable {
            bp.interpolation_filter = [header.interpolation_filter; 2];
            return;
        }
        // Global motion is always the identity, so global modes of large
        // blocks never need a filter.
        let large = block.size.width().min(block.size.height()) >= 8;
        let needs_filter = !(large
            && matches!(
                bp.y_mode,
                PredictionMode::GlobalMv | PredictionMode::GlobalGlobalMv
            ));
        let directions = if shared.sequence().enable_dual_filter { 2 } else { 1 };
        for direction in 0..directions {
            bp.interpolation_filter[direction] = if needs_filter {
                let context = self.interpolation_filter_context(bp, neighbours, direction);
                let symbol = self
                    .reader
                    .read_symbol(&mut self.context.interpolation_filter[context]);
                InterpolationFilter::try_from(symbol as u8).unwrap_or_default()
            } else {
                InterpolationFilter::EightTap
            };
        }
        if directions == 1 {
            bp.interpolation_filter[1] = bp.interpolation_filter[0];
        }
    }

    fn interpolation_filter_context(
        &self,
        bp: &BlockParameters,
        neighbours: &Neighbours,
        direction: usize,
    ) -> usize {
        const UNKNOWN: usize = 3;
        let filter_type = |n: &Option<Arc<BlockParameters>>| {
            n.as_ref()
                .filter(|n| n.reference_frame.contains(&bp.reference_frame[0]))
                .map_or(UNKNOWN, |n| n.interpolation_filter[direction] as usize)
        };
        let (left, above) = (filter_type(&neighbours.left), filter_type(&neighbours.above));
        let base = ((direction & 1) * 2 + bp.is_compound() as usize) * 4;
        base + if left == above {
            left
        } else if left == UNKNOWN {
            above
        } else if above == UNKNOWN {
            left
        } else {
            UNKNOWN
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn deinterleave_segment_ids() {
        // Without a prediction the symbol is the id.
        assert_eq!(neg_deinterleave(5, 0, 8), 5);
        // Alternates around the predicted id.
        let ids: Vec<i32> = (0..8).map(|d| neg_deinterleave(d, 3, 8)).collect();
        assert_eq!(ids, [3, 4, 2, 5, 1, 6, 0, 7]);
        // Predicted id at the top of the range counts down.
        assert_eq!(neg_deinterleave(0, 7, 8), 7);
        assert_eq!(neg_deinterleave(2, 7, 8), 5);
        // Predicted id in the upper half.
        let ids: Vec<i32> = (0..8).map(|d| neg_deinterleave(d, 5, 8)).collect();
        assert_eq!(ids, [5, 6, 4, 7, 3, 2, 1, 0]);
    }

    #[test]
    fn lowered_precision() {
        let mv = MotionVector::new(13, -13);
        assert_eq!(lower_mv_precision(mv, true, false), mv);
        assert_eq!(lower_mv_precision(mv, false, false), MotionVector::new(12, -12));
        assert_eq!(lower_mv_precision(mv, false, true), MotionVector::new(16, -16));
        assert_eq!(
            lower_mv_precision(MotionVector::new(11, -4), true, true),
            MotionVector::new(8, 0)
        );
    }

    #[test]
    fn reference_count_contexts() {
        assert_eq!(count_context(0, 2), 0);
        assert_eq!(count_context(1, 1), 1);
        assert_eq!(count_context(2, 0), 2);
        let neighbours = Neighbours {
            above: Some(Arc::new(BlockParameters {
                reference_frame: [ReferenceFrameType::Last, ReferenceFrameType::Alternate],
                is_inter: true,
                ..Default::default()
            })),
            left: Some(Arc::new(BlockParameters {
                reference_frame: [ReferenceFrameType::Last, ReferenceFrameType::None],
                is_inter: true,
                ..Default::default()
            })),
        };
        assert_eq!(neighbours.count(ReferenceFrameType::Last), 2);
        assert_eq!(
            neighbours.count_any(&[ReferenceFrameType::Backward, ReferenceFrameType::Alternate]),
            1
        );
    }
}
