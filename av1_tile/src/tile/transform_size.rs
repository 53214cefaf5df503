// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

use super::{Block, parser::Parser};
use crate::{
    block_parameters::BlockParameters,
    constants::{BlockSize, TransformSize, TxMode},
    error::Result,
    util::{Array2D, Stack, read_lock, write_lock},
};

const MAX_VARIABLE_TRANSFORM_DEPTH: usize = 2;
const VARIABLE_TRANSFORM_STACK_SIZE: usize = 16;

impl Parser<'_> {
    /// Reads the luma transform size of `block` and records it per 4x4
    /// block. Inter blocks with a selectable transform size code a split tree
    /// per maximum-size transform.
    pub(super) fn read_block_transform_size(
        &mut self,
        block: &Block,
        bp: &mut BlockParameters,
    ) -> Result<()> {
        let shared = self.shared.clone();
        let header = shared.header();
        let lossless = header.is_lossless(bp.segment_id);
        if header.tx_mode == TxMode::Select
            && block.size > BlockSize::Block4x4
            && bp.is_inter
            && !bp.skip
            && !lossless
        {
            let max_size = block.size.max_rect_transform_size();
            let rows = block.row4x4..block.row4x4 + block.size.height4();
            for row in rows.step_by(max_size.height4()) {
                let columns = block.column4x4..block.column4x4 + block.size.width4();
                for column in columns.step_by(max_size.width4()) {
                    bp.transform_size = self.read_variable_transform_size(block, row, column)?;
                }
            }
            return Ok(());
        }
        bp.transform_size = if lossless {
            TransformSize::Tx4x4
        } else {
            self.read_transform_size(block, !bp.skip || !bp.is_inter)
        };
        write_lock(&shared.state.inter_transform_sizes).fill_region(
            block.row4x4,
            block.column4x4,
            block.size.height4(),
            block.size.width4(),
            bp.transform_size,
        );
        Ok(())
    }

    /// Width of the transform above (`row`, `column`), 64 outside the tile.
    fn above_transform_width(
        &self,
        block: &Block,
        sizes: &Array2D<TransformSize>,
        row: usize,
        column: usize,
    ) -> usize {
        if row == block.row4x4 {
            if !block.top_available[0] {
                return 64;
            }
            let holder = &self.shared.state.block_parameters;
            if let Some(above) = holder.find(row - 1, column) {
                if above.skip && above.is_inter {
                    return above.size.width();
                }
            }
        }
        sizes
            .get(row - 1, column)
            .map_or(64, |tx_size| tx_size.width())
    }

    /// Height of the transform left of (`row`, `column`), 64 outside the
    /// tile.
    fn left_transform_height(
        &self,
        block: &Block,
        sizes: &Array2D<TransformSize>,
        row: usize,
        column: usize,
    ) -> usize {
        if column == block.column4x4 {
            if !block.left_available[0] {
                return 64;
            }
            let holder = &self.shared.state.block_parameters;
            if let Some(left) = holder.find(row, column - 1) {
                if left.skip && left.is_inter {
                    return left.size.height();
                }
            }
        }
        sizes
            .get(row, column - 1)
            .map_or(64, |tx_size| tx_size.height())
    }

    /// Uniform transform size of the block: the largest one, lowered by the
    /// coded depth when selectable.
    fn read_transform_size(&mut self, block: &Block, allow_select: bool) -> TransformSize {
        let max_size = block.size.max_rect_transform_size();
        if block.size == BlockSize::Block4x4
            || !allow_select
            || self.shared.header().tx_mode != TxMode::Select
        {
            return max_size;
        }
        let context = self.transform_depth_context(block, max_size);
        let max_depth = block.size.max_transform_depth();
        let depth = if max_depth > 1 {
            let cdf = &mut self.context.tx_depth[max_depth - 2][context];
            self.reader.read_symbol(cdf)
        } else {
            let cdf = &mut self.context.tx_depth_8x8[context];
            self.reader.read_symbol(cdf)
        };
        (0..depth).fold(max_size, |size, _| size.split())
    }

    fn transform_depth_context(&self, block: &Block, max_size: TransformSize) -> usize {
        let holder = &self.shared.state.block_parameters;
        let sizes = read_lock(&self.shared.state.inter_transform_sizes);
        let (row, column) = (block.row4x4, block.column4x4);
        let above_width = if block.top_available[0] {
            match holder.find(row - 1, column) {
                Some(above) if above.is_inter => above.size.width(),
                _ => self.above_transform_width(block, &sizes, row, column),
            }
        } else {
            0
        };
        let left_height = if block.left_available[0] {
            match holder.find(row, column - 1) {
                Some(left) if left.is_inter => left.size.height(),
                _ => self.left_transform_height(block, &sizes, row, column),
            }
        } else {
            0
        };
        (above_width >= max_size.width()) as usize + (left_height >= max_size.height()) as usize
    }

    fn transform_split_context(
        &self,
        block: &Block,
        row: usize,
        column: usize,
        tx_size: TransformSize,
    ) -> usize {
        let (above, left) = {
            let sizes = read_lock(&self.shared.state.inter_transform_sizes);
            (
                self.above_transform_width(block, &sizes, row, column) < tx_size.width(),
                self.left_transform_height(block, &sizes, row, column) < tx_size.height(),
            )
        };
        let size = block.size.width().max(block.size.height()).min(64);
        // Square transform sizes are indexed 0 (4x4) to 4 (64x64).
        let max_square = size.trailing_zeros() as usize - 2;
        let square_up = tx_size.square_max_index();
        (square_up != max_square) as usize * 3 + (4 - max_square) * 6 + above as usize + left as usize
    }

    /// Reads the split tree of one maximum-size transform at (`row`,
    /// `column`) and returns the size of its last leaf.
    fn read_variable_transform_size(
        &mut self,
        block: &Block,
        row: usize,
        column: usize,
    ) -> Result<TransformSize> {
        let shared = self.shared.clone();
        let header = shared.header();
        let max_size = block.size.max_rect_transform_size();
        let mut last = max_size;
        let mut stack =
            Stack::<(usize, usize, TransformSize, usize), VARIABLE_TRANSFORM_STACK_SIZE>::new();
        stack.push((row, column, max_size, 0))?;
        while let Some((row, column, tx_size, depth)) = stack.pop() {
            if row >= header.rows4x4 || column >= header.columns4x4 {
                continue;
            }
            let split = tx_size != TransformSize::Tx4x4
                && depth != MAX_VARIABLE_TRANSFORM_DEPTH
                && {
                    let context = self.transform_split_context(block, row, column, tx_size);
                    self.reader.read_bool(&mut self.context.tx_split[context])
                };
            if !split {
                write_lock(&shared.state.inter_transform_sizes).fill_region(
                    row,
                    column,
                    tx_size.height4(),
                    tx_size.width4(),
                    tx_size,
                );
                last = tx_size;
                continue;
            }
            let sub_size = tx_size.split();
            // Children are pushed last to first.
            let rows = (0..tx_size.height4()).step_by(sub_size.height4());
            let columns = (0..tx_size.width4()).step_by(sub_size.width4());
            let mut children = Stack::<(usize, usize), 4>::new();
            for i in rows {
                for j in columns.clone() {
                    children.push((row + i, column + j))?;
                }
            }
            while let Some((child_row, child_column)) = children.pop() {
                stack.push((child_row, child_column, sub_size, depth + 1))?;
            }
        }
        Ok(last)
    }
}
