// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

use super::{Block, TileShared};
use crate::{
    block_parameters::BlockParameters,
    constants::{BlockSize, PLANE_Y},
    error::Result,
    loop_filter::{LoopFilterType, NUM_4X4_IN_MASK_UNIT, transform_size_id},
    util::{align_down_to_subsampling, read_lock},
};

/// Slot of `deblock_filter_level` per plane and edge direction.
const DEBLOCK_FILTER_LEVEL_INDEX: [[usize; 2]; 3] = [[0, 1], [2, 2], [3, 3]];

/// Records the deblocking edges of `block` in the frame's loop filter masks.
pub(super) fn build_bit_mask(
    shared: &TileShared,
    block: &Block,
    bp: &BlockParameters,
) -> Result<()> {
    if !shared.state.loop_filter_mask.enabled() {
        return Ok(());
    }
    if block.size <= BlockSize::Block64x64 {
        return build_bit_mask_unit(
            shared,
            bp,
            block.row4x4,
            block.column4x4,
            block.size,
            (true, true),
        );
    }
    for y in (0..block.size.height4()).step_by(16) {
        for x in (0..block.size.width4()).step_by(16) {
            build_bit_mask_unit(
                shared,
                bp,
                block.row4x4 + y,
                block.column4x4 + x,
                BlockSize::Block64x64,
                (x == 0, y == 0),
            )?;
        }
    }
    Ok(())
}

/// Edges of the part of `block` at (`row4x4`, `column4x4`) of at most 64x64.
/// `block_border` tells whether its left (top) side is the block's.
fn build_bit_mask_unit(
    shared: &TileShared,
    bp: &BlockParameters,
    row4x4: usize,
    column4x4: usize,
    size: BlockSize,
    block_border: (bool, bool),
) -> Result<()> {
    let sequence = shared.sequence();
    let header = shared.header();
    let geometry = &shared.geometry;
    let masks = &shared.state.loop_filter_mask;
    let holder = &shared.state.block_parameters;
    let skip = bp.skip && bp.is_inter;
    let sizes = read_lock(&shared.state.inter_transform_sizes);
    let mut unit = masks.lock_unit(masks.unit_id(row4x4, column4x4));
    let unit_mask = NUM_4X4_IN_MASK_UNIT - 1;

    for plane in 0..sequence.num_planes() {
        if plane > PLANE_Y && header.loop_filter.level[plane + 1] == 0 {
            continue;
        }
        let (ssx, ssy) = sequence.subsampling(plane);
        let column_limit = (column4x4 + size.width4()).min(masks.column_limit(plane));
        let row_limit = (row4x4 + size.height4()).min(masks.row_limit(plane));
        let row_start = align_down_to_subsampling(row4x4, ssy);
        let column_start = align_down_to_subsampling(column4x4, ssx);
        if row_start >= row_limit || column_start >= column_limit {
            continue;
        }
        let vertical_step = 1 << ssy;
        let horizontal_step = 1 << ssx;
        let plane_bp = holder.get(row_start, column_start)?;
        let [vertical_index, horizontal_index] = DEBLOCK_FILTER_LEVEL_INDEX[plane];
        let transform_size = |bp: &BlockParameters, row: usize, column: usize| {
            if plane == PLANE_Y {
                sizes[row][column]
            } else {
                bp.uv_transform_size
            }
        };

        // Vertical edges.
        let tile_column = align_down_to_subsampling(geometry.column4x4_start, ssx);
        let vertical_level = plane_bp.deblock_filter_level[vertical_index];
        for row in (row_start..row_limit).step_by(vertical_step) {
            let mut column = column_start;
            while column < column_limit {
                let tx_size = transform_size(&plane_bp, row, column);
                let next = column + (tx_size.width4() << ssx);
                let is_border = column == column_start && block_border.0;
                if column == tile_column || (skip && !is_border) {
                    column = next;
                    continue;
                }
                let left = holder.get(row, column - horizontal_step)?;
                let left_level = if is_border {
                    left.deblock_filter_level[vertical_index]
                } else {
                    vertical_level
                };
                if vertical_level != 0 || left_level != 0 {
                    let left_size = transform_size(&left, row, column - horizontal_step);
                    let id = transform_size_id(tx_size.width_log2(), left_size.width_log2());
                    let (r, c) = (row & unit_mask, column & unit_mask);
                    unit.set_left(plane, id, r, c);
                    let level = if vertical_level == 0 {
                        left_level
                    } else {
                        vertical_level
                    };
                    unit.set_level(plane, LoopFilterType::Vertical, r, c, level);
                }
                column = next;
            }
        }

        // Horizontal edges.
        let tile_row = align_down_to_subsampling(geometry.row4x4_start, ssy);
        let horizontal_level = plane_bp.deblock_filter_level[horizontal_index];
        for column in (column_start..column_limit).step_by(horizontal_step) {
            let mut row = row_start;
            while row < row_limit {
                let tx_size = transform_size(&plane_bp, row, column);
                let next = row + (tx_size.height4() << ssy);
                let is_border = row == row_start && block_border.1;
                if row == tile_row || (skip && !is_border) {
                    row = next;
                    continue;
                }
                let top = holder.get(row - vertical_step, column)?;
                let top_level = if is_border {
                    top.deblock_filter_level[horizontal_index]
                } else {
                    horizontal_level
                };
                if horizontal_level != 0 || top_level != 0 {
                    let top_size = transform_size(&top, row - vertical_step, column);
                    let id = transform_size_id(tx_size.height_log2(), top_size.height_log2());
                    let (r, c) = (row & unit_mask, column & unit_mask);
                    unit.set_top(plane, id, r, c);
                    let level = if horizontal_level == 0 {
                        top_level
                    } else {
                        horizontal_level
                    };
                    unit.set_level(plane, LoopFilterType::Horizontal, r, c, level);
                }
                row = next;
            }
        }
    }
    Ok(())
}
