// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

use super::{Block, TileShared, TransformBlock, decoder::Decoder};
use crate::{
    block_parameters::{BlockParameters, PredictionParameters},
    constants::{PLANE_U, PLANE_Y, PlaneType, PredictionMode, ReferenceFrameType},
    dsp::{IntraEdges, ScaledPosition},
    error::{Error, Result},
    frame::MotionVector,
    util::tracing_wrappers::*,
};

/// Fractional bits of the sub-pixel positions in motion vectors scaled to a
/// plane.
const SUB_PIXEL_BITS: u32 = 4;
/// Fractional bits of the positions passed to the convolution.
const SCALE_SUB_PIXEL_BITS: u32 = 10;
/// Fractional bits of the reference scale factor.
const REFERENCE_SCALE_SHIFT: u32 = 14;

fn right_shift_with_rounding_signed(value: i64, bits: u32) -> i64 {
    let rounding = 1 << bits >> 1;
    if value >= 0 {
        (value + rounding) >> bits
    } else {
        -((-value + rounding) >> bits)
    }
}

/// Frame dimensions used to scale motion vectors into a reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct ScaleDimensions {
    pub reference_width: usize,
    pub reference_height: usize,
    pub width: usize,
    pub height: usize,
}

/// Position in the reference plane predicting the plane pixel (`x`, `y`)
/// displaced by `mv`, and the step between neighbouring pixels.
pub(super) fn scale_motion_vector(
    mv: MotionVector,
    x: usize,
    y: usize,
    subsampling: (u8, u8),
    dimensions: ScaleDimensions,
) -> ScaledPosition {
    let (ssx, ssy) = subsampling;
    let orig_x = ((x as i64) << SUB_PIXEL_BITS) + ((2 * mv.column as i64) >> ssx);
    let orig_y = ((y as i64) << SUB_PIXEL_BITS) + ((2 * mv.row as i64) >> ssy);
    if dimensions.reference_width == dimensions.width
        && dimensions.reference_height == dimensions.height
    {
        let shift = SCALE_SUB_PIXEL_BITS - SUB_PIXEL_BITS;
        return ScaledPosition {
            x: orig_x << shift,
            y: orig_y << shift,
            step_x: 1 << SCALE_SUB_PIXEL_BITS,
            step_y: 1 << SCALE_SUB_PIXEL_BITS,
        };
    }
    let scale = |reference: usize, current: usize| {
        let (reference, current) = (reference as i64, current.max(1) as i64);
        ((reference << REFERENCE_SCALE_SHIFT) + current / 2) / current
    };
    let scale_x = scale(dimensions.reference_width, dimensions.width);
    let scale_y = scale(dimensions.reference_height, dimensions.height);
    let half_sample = 1 << (SUB_PIXEL_BITS - 1);
    let start = |orig: i64, scale: i64| {
        let base = (orig + half_sample) * scale - (half_sample << REFERENCE_SCALE_SHIFT);
        right_shift_with_rounding_signed(
            base,
            REFERENCE_SCALE_SHIFT + SUB_PIXEL_BITS - SCALE_SUB_PIXEL_BITS,
        )
    };
    let step_shift = REFERENCE_SCALE_SHIFT - SCALE_SUB_PIXEL_BITS;
    ScaledPosition {
        x: start(orig_x, scale_x),
        y: start(orig_y, scale_y),
        step_x: right_shift_with_rounding_signed(scale_x, step_shift),
        step_y: right_shift_with_rounding_signed(scale_y, step_shift),
    }
}

impl Decoder {
    /// Predicts the intra transform block `tb` from the reconstructed pixels
    /// around it.
    pub(super) fn predict_intra(
        &mut self,
        shared: &TileShared,
        block: &Block,
        bp: &BlockParameters,
        prediction: &PredictionParameters,
        tb: &TransformBlock,
    ) -> Result<()> {
        let sequence = shared.sequence();
        let header = shared.header();
        let plane = tb.plane;
        let (ssx, ssy) = sequence.subsampling(plane);
        let frame_plane = shared.state.frame_buffer.plane(plane);
        let bit_depth = shared.state.frame_buffer.bit_depth();
        let (x, y) = (tb.start_x, tb.start_y);
        let (width, height) = (tb.tx_size.width(), tb.tx_size.height());
        let plane_type = PlaneType::from_plane(plane) as usize;
        if bp.palette.size[plane_type] > 0 {
            let map = &prediction.color_index_map[plane_type];
            // Chroma of a sub-8x8 area starts at the even 4x4 position.
            let block_x = ((block.column4x4 * 4) >> ssx) & !3;
            let block_y = ((block.row4x4 * 4) >> ssy) & !3;
            let offset = (y - block_y) * map.stride + x - block_x;
            let dst = &mut self.pixels[..width * height];
            (shared.frame.dsp.palette_predictor)(
                bp.palette.colors(plane),
                &map.indices[offset..],
                map.stride,
                dst,
                width,
                width,
                height,
            );
            frame_plane.write_region(x, y, width, height, dst, width);
            if plane == PLANE_Y {
                self.max_luma_width = x + width;
                self.max_luma_height = y + height;
            }
            return Ok(());
        }
        let max_x = ((header.columns4x4 * 4) >> ssx) - 1;
        let max_y = ((header.rows4x4 * 4) >> ssy) - 1;

        let (sub_row, sub_column) = Self::superblock_offset4(shared, tb);
        let decoded = &self.block_decoded[plane];
        let has_top = !tb.on_top_edge || block.top_available[plane];
        let has_left = !tb.on_left_edge || block.left_available[plane];
        let has_top_right = decoded[sub_row][sub_column + tb.tx_size.width4() + 1];
        let has_bottom_left = decoded[sub_row + tb.tx_size.height4() + 1][sub_column];

        let edge_length = width + height;
        let (max_luma_width, max_luma_height) = (self.max_luma_width, self.max_luma_height);
        let Decoder {
            pixels,
            top_edge,
            left_edge,
            luma,
            cfl_ac,
            ..
        } = &mut *self;
        let top = &mut top_edge[..edge_length];
        let left = &mut left_edge[..edge_length];
        let mid = 1u16 << (bit_depth - 1);
        let mut corner = [0u16; 1];
        if has_top {
            let limit = max_x.min(x + if has_top_right { 2 * width } else { width } - 1);
            let available = (limit + 1 - x).min(edge_length);
            frame_plane.read_region(x, y - 1, available, 1, top, edge_length);
            let last = top[available - 1];
            top[available..].fill(last);
        } else if has_left {
            frame_plane.read_region(x - 1, y, 1, 1, &mut corner, 1);
            top.fill(corner[0]);
        } else {
            top.fill(mid - 1);
        }
        if has_left {
            let limit = max_y.min(y + if has_bottom_left { 2 * height } else { height } - 1);
            let available = (limit + 1 - y).min(edge_length);
            frame_plane.read_region(x - 1, y, 1, available, left, 1);
            let last = left[available - 1];
            left[available..].fill(last);
        } else if has_top {
            frame_plane.read_region(x, y - 1, 1, 1, &mut corner, 1);
            left.fill(corner[0]);
        } else {
            left.fill(mid + 1);
        }
        let top_left = match (has_top, has_left) {
            (true, true) => {
                frame_plane.read_region(x - 1, y - 1, 1, 1, &mut corner, 1);
                corner[0]
            }
            (true, false) => top[0],
            (false, true) => left[0],
            (false, false) => mid,
        };
        let edges = IntraEdges {
            top,
            left,
            top_left,
            has_top,
            has_left,
        };

        let dst = &mut pixels[..width * height];
        let dsp = &shared.frame.dsp;
        let mode = if plane == PLANE_Y {
            bp.y_mode
        } else {
            bp.uv_mode
        };
        if plane == PLANE_Y && prediction.use_filter_intra {
            (dsp.filter_intra_predictor)(
                prediction.filter_intra_mode,
                &edges,
                dst,
                width,
                width,
                height,
                bit_depth,
            );
        } else {
            let angle_delta = prediction.angle_delta[plane_type];
            (dsp.intra_predictor)(
                mode,
                angle_delta as i32,
                &edges,
                dst,
                width,
                width,
                height,
                bit_depth,
            );
        }
        if mode == PredictionMode::ChromaFromLuma && plane != PLANE_Y {
            let luma_plane = shared.state.frame_buffer.plane(PLANE_Y);
            let (luma_x, luma_y) = (x << ssx, y << ssy);
            let (luma_width, luma_height) = (width << ssx, height << ssy);
            luma_plane.read_region(
                luma_x,
                luma_y,
                luma_width,
                luma_height,
                &mut luma[..luma_width * luma_height],
                luma_width,
            );
            // Only luma reconstructed for this block is used.
            let valid_width = max_luma_width.saturating_sub(luma_x).clamp(1, luma_width);
            let valid_height = max_luma_height.saturating_sub(luma_y).clamp(1, luma_height);
            (dsp.cfl_subsampler)(
                luma,
                luma_width,
                valid_width,
                valid_height,
                ssx,
                ssy,
                width,
                height,
                cfl_ac,
            );
            let alpha = if plane == PLANE_U {
                prediction.cfl_alpha_u
            } else {
                prediction.cfl_alpha_v
            };
            (dsp.cfl_predictor)(cfl_ac, alpha, dst, width, width, height, bit_depth);
        }
        frame_plane.write_region(x, y, width, height, dst, width);
        if plane == PLANE_Y {
            self.max_luma_width = x + width;
            self.max_luma_height = y + height;
        }
        Ok(())
    }

    /// Inter prediction of all planes of `block`. Intra blocks are predicted
    /// per transform block instead.
    pub(super) fn compute_prediction(
        &mut self,
        shared: &TileShared,
        block: &Block,
        bp: &BlockParameters,
        _prediction: &PredictionParameters,
    ) -> Result<()> {
        if !bp.is_inter {
            return Ok(());
        }
        let sequence = shared.sequence();
        let holder = &shared.state.block_parameters;
        for plane in 0..block.num_planes(sequence) {
            let (ssx, ssy) = sequence.subsampling(plane);
            let plane_size = block.plane_size(plane);
            let (block_width, block_height) = (plane_size.width(), plane_size.height());
            let base_x = (block.column4x4 >> ssx) * 4;
            let base_y = (block.row4x4 >> ssy) * 4;
            let mut candidate_row = block.row4x4;
            let mut candidate_column = block.column4x4;
            let mut some_use_intra = bp.reference_frame[0] == ReferenceFrameType::Intra;
            if !some_use_intra && plane != PLANE_Y {
                // Chroma of sub-8x8 blocks is predicted with the parameters
                // of every luma block it covers.
                candidate_row = (candidate_row >> ssy) << ssy;
                candidate_column = (candidate_column >> ssx) << ssx;
                let uses_intra = |row, column| -> Result<bool> {
                    Ok(holder.get(row, column)?.reference_frame[0] == ReferenceFrameType::Intra)
                };
                if candidate_row != block.row4x4 {
                    some_use_intra = uses_intra(candidate_row, block.column4x4)?;
                    if !some_use_intra && candidate_column != block.column4x4 {
                        some_use_intra = uses_intra(candidate_row, candidate_column)?;
                    }
                }
                if !some_use_intra && candidate_column != block.column4x4 {
                    some_use_intra = uses_intra(block.row4x4, candidate_column)?;
                }
            }
            let (prediction_width, prediction_height) = if some_use_intra {
                candidate_row = block.row4x4;
                candidate_column = block.column4x4;
                (block_width, block_height)
            } else {
                (block.size.width() >> ssx, block.size.height() >> ssy)
            };
            for (r, y) in (0..block_height).step_by(prediction_height).enumerate() {
                for (c, x) in (0..block_width).step_by(prediction_width).enumerate() {
                    let candidate = if some_use_intra {
                        None
                    } else {
                        Some(holder.get(candidate_row + r, candidate_column + c)?)
                    };
                    let parameters = candidate.as_deref().unwrap_or(bp);
                    self.predict_inter(
                        shared,
                        parameters,
                        plane,
                        base_x + x,
                        base_y + y,
                        prediction_width,
                        prediction_height,
                    )?;
                }
            }
        }
        Ok(())
    }

    /// Predicts one `width` x `height` piece of `plane` at (`x`, `y`) from
    /// the references of `bp`, averaging the two predictions of compound
    /// blocks.
    #[allow(clippy::too_many_arguments)]
    fn predict_inter(
        &mut self,
        shared: &TileShared,
        bp: &BlockParameters,
        plane: usize,
        x: usize,
        y: usize,
        width: usize,
        height: usize,
    ) -> Result<()> {
        let header = shared.header();
        let subsampling = shared.sequence().subsampling(plane);
        let frame_plane = shared.state.frame_buffer.plane(plane);
        let area = width * height;
        let count = 1 + bp.is_compound() as usize;
        for i in 0..count {
            let mv = bp.mv[i];
            let dst = if i == 0 {
                &mut self.pixels[..area]
            } else {
                &mut self.second_prediction[..area]
            };
            if bp.reference_frame[i] == ReferenceFrameType::Intra {
                // Intra block copy vectors are whole pixels in luma; chroma
                // halves are rounded down.
                let source_x = (x as i64 + ((mv.column as i64) >> (3 + subsampling.0))).max(0);
                let source_y = (y as i64 + ((mv.row as i64) >> (3 + subsampling.1))).max(0);
                frame_plane.read_region(
                    source_x as usize,
                    source_y as usize,
                    width,
                    height,
                    dst,
                    width,
                );
                continue;
            }
            let reference = shared.frame.reference_frame(bp.reference_frame[i])?;
            let dimensions = ScaleDimensions {
                reference_width: reference.upscaled_width,
                reference_height: reference.frame_height,
                width: header.width,
                height: header.height,
            };
            let position = scale_motion_vector(mv, x, y, subsampling, dimensions);
            trace!(plane, x, y, ?position, "inter prediction");
            let source = reference
                .planes
                .get(plane)
                .ok_or(Error::MissingReferenceFrame(plane))?;
            (shared.frame.dsp.convolve)(source, position, width, height, dst, width);
        }
        if count == 2 {
            let first = self.pixels[..area].to_vec();
            (shared.frame.dsp.average)(
                &first,
                &self.second_prediction[..area],
                &mut self.pixels[..area],
            );
        }
        frame_plane.write_region(x, y, width, height, &self.pixels[..area], width);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    const SAME: ScaleDimensions = ScaleDimensions {
        reference_width: 64,
        reference_height: 64,
        width: 64,
        height: 64,
    };

    #[test]
    fn unscaled_vectors_shift_whole_pixels() {
        let position = scale_motion_vector(MotionVector::new(8, 16), 16, 8, (0, 0), SAME);
        assert_eq!(position.x, 18 << 10);
        assert_eq!(position.y, 9 << 10);
        assert_eq!((position.step_x, position.step_y), (1 << 10, 1 << 10));
    }

    #[test]
    fn chroma_vectors_are_halved() {
        // A quarter luma pixel is an eighth of a chroma pixel.
        let position = scale_motion_vector(MotionVector::new(0, 2), 4, 0, (1, 1), SAME);
        assert_eq!(position.x, (4 << 10) + 128);
        assert_eq!(position.y, 0);
    }

    #[test]
    fn downscaled_reference_keeps_pixel_centers() {
        let dimensions = ScaleDimensions {
            reference_width: 128,
            reference_height: 64,
            ..SAME
        };
        let position = scale_motion_vector(MotionVector::ZERO, 16, 8, (0, 0), dimensions);
        // Pixel 16 of the frame covers 32.5 of the twice as wide reference.
        assert_eq!(position.x, 32 * 1024 + 512);
        assert_eq!(position.step_x, 2048);
        assert_eq!(position.y, 8 << 10);
        assert_eq!(position.step_y, 1024);
    }
}
