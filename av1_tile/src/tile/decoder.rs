// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Reconstruction of parsed blocks: prediction, inverse transform and the
//! per-superblock record of which 4x4 blocks are already decoded.

use super::{
    Block, ParsedSuperBlock, TileShared, TransformBlock, bit_mask::build_bit_mask,
    collect_transform_blocks, parser::DFS_STACK_SIZE,
};
use crate::{
    block_parameters::{BlockParameters, ParameterTree, PredictionParameters},
    constants::{MAX_PLANES, Partition, TransformType},
    error::{Error, Result},
    headers::SequenceHeader,
    residual_buffer::ResidualBuffer,
    util::{Stack, new_filled_vec, tracing_wrappers::*},
};

/// Superblock size in 4x4 units plus one row (column) on each side.
pub(super) const BLOCK_DECODED_STRIDE: usize = 32 + 2;

/// Largest block edge in pixels.
const MAX_BLOCK_SIZE: usize = 128;
/// Largest transform edge in pixels.
const MAX_TRANSFORM_SIZE: usize = 64;

/// Scratch state of a thread reconstructing superblocks of a tile. Pooled in
/// the tile and reused between superblocks.
#[derive(Debug)]
pub(crate) struct Decoder {
    /// Per plane, whether each 4x4 block of the current superblock is
    /// reconstructed. Index 0 stands for the row (column) before the
    /// superblock.
    pub(super) block_decoded: [[[bool; BLOCK_DECODED_STRIDE]; BLOCK_DECODED_STRIDE]; MAX_PLANES],
    /// Right and bottom edge of the luma reconstructed for the current
    /// block, in pixels. Bounds the luma used by chroma-from-luma.
    pub(super) max_luma_width: usize,
    pub(super) max_luma_height: usize,
    pub(super) pixels: Vec<u16>,
    pub(super) second_prediction: Vec<u16>,
    pub(super) top_edge: Vec<u16>,
    pub(super) left_edge: Vec<u16>,
    pub(super) luma: Vec<u16>,
    pub(super) cfl_ac: Vec<i32>,
    transform_blocks: Vec<TransformBlock>,
}

impl Decoder {
    pub(super) fn new(sequence: &SequenceHeader) -> Result<Decoder> {
        let pixels = MAX_BLOCK_SIZE * MAX_BLOCK_SIZE;
        let edge = 2 * MAX_TRANSFORM_SIZE;
        let chroma = MAX_TRANSFORM_SIZE >> sequence.subsampling_x.min(sequence.subsampling_y);
        Ok(Decoder {
            block_decoded: [[[false; BLOCK_DECODED_STRIDE]; BLOCK_DECODED_STRIDE]; MAX_PLANES],
            max_luma_width: 0,
            max_luma_height: 0,
            pixels: new_filled_vec(pixels, 0)?,
            second_prediction: new_filled_vec(pixels, 0)?,
            top_edge: new_filled_vec(edge, 0)?,
            left_edge: new_filled_vec(edge, 0)?,
            luma: new_filled_vec(MAX_TRANSFORM_SIZE * MAX_TRANSFORM_SIZE, 0)?,
            cfl_ac: new_filled_vec(chroma * chroma, 0)?,
            transform_blocks: vec![],
        })
    }

    /// Resets the decoded map for the superblock at (`row4x4`,
    /// `column4x4`). The row above and the column to the left count as
    /// decoded where they lie inside the tile.
    pub(super) fn clear_block_decoded(
        &mut self,
        shared: &TileShared,
        row4x4: usize,
        column4x4: usize,
    ) {
        let sequence = shared.sequence();
        let geometry = &shared.geometry;
        let superblock_size4 = geometry.superblock_size4;
        for plane in 0..sequence.num_planes() {
            let (ssx, ssy) = sequence.subsampling(plane);
            let decoded = &mut self.block_decoded[plane];
            for row in decoded.iter_mut() {
                row.fill(false);
            }
            let width4 = (geometry.column4x4_end - column4x4) >> ssx;
            let height4 = (geometry.row4x4_end - row4x4) >> ssy;
            let top = ((superblock_size4 >> ssx) + 1).min(width4) + 1;
            decoded[0][..top.min(BLOCK_DECODED_STRIDE)].fill(true);
            let left = (superblock_size4 >> ssy).min(height4) + 1;
            for row in decoded.iter_mut().take(left) {
                row[0] = true;
            }
        }
    }

    /// 4x4 position of a transform block within its superblock, in the
    /// units of its plane.
    pub(super) fn superblock_offset4(
        shared: &TileShared,
        tb: &TransformBlock,
    ) -> (usize, usize) {
        let (ssx, ssy) = shared.sequence().subsampling(tb.plane);
        let mask = shared.geometry.superblock_size4 - 1;
        let row4x4 = (tb.start_y << ssy) >> 2;
        let column4x4 = (tb.start_x << ssx) >> 2;
        ((row4x4 & mask) >> ssy, (column4x4 & mask) >> ssx)
    }

    pub(super) fn mark_decoded(&mut self, shared: &TileShared, tb: &TransformBlock) {
        let (row, column) = Self::superblock_offset4(shared, tb);
        let (width4, height4) = (tb.tx_size.width4(), tb.tx_size.height4());
        let decoded = &mut self.block_decoded[tb.plane];
        for cells in decoded.iter_mut().skip(row + 1).take(height4) {
            let end = (column + 1 + width4).min(BLOCK_DECODED_STRIDE);
            cells[(column + 1).min(end)..end].fill(true);
        }
    }

    /// Adds the inverse transform of `coefficients` to the prediction of
    /// `tb`. Nothing is coded when `eob` is 0.
    pub(super) fn reconstruct(
        &mut self,
        shared: &TileShared,
        bp: &BlockParameters,
        tb: &TransformBlock,
        tx_type: TransformType,
        eob: u16,
        coefficients: &mut [i32],
    ) {
        if eob == 0 {
            return;
        }
        let state = &shared.state;
        let plane = state.frame_buffer.plane(tb.plane);
        let (width, height) = (tb.tx_size.width(), tb.tx_size.height());
        let pixels = &mut self.pixels[..width * height];
        plane.read_region(tb.start_x, tb.start_y, width, height, pixels, width);
        (shared.frame.dsp.inverse_transform_add)(
            tx_type,
            tb.tx_size,
            shared.header().is_lossless(bp.segment_id),
            coefficients,
            eob as usize,
            pixels,
            width,
            state.frame_buffer.bit_depth(),
        );
        plane.write_region(tb.start_x, tb.start_y, width, height, pixels, width);
    }

    /// Decode pass of split mode: reconstructs the blocks of a parsed
    /// superblock in coding order, consuming its residual.
    #[instrument(level = "trace", skip_all, err)]
    pub(super) fn decode_superblock(
        &mut self,
        shared: &TileShared,
        superblock: &mut ParsedSuperBlock,
    ) -> Result<()> {
        let ParsedSuperBlock { tree, residual } = superblock;
        let root = tree.node(tree.root());
        trace!(row4x4 = root.row4x4, column4x4 = root.column4x4, "decode superblock");
        self.clear_block_decoded(shared, root.row4x4, root.column4x4);
        let mut cursor = 0;
        let mut stack = Stack::<usize, DFS_STACK_SIZE>::new();
        stack.push(tree.root())?;
        while let Some(index) = stack.pop() {
            let node = tree.node(index);
            let (partition, is_leaf) = (node.partition, node.leaf.is_some());
            let (children, num_children) = (node.children, node.num_children);
            match partition {
                _ if is_leaf => {
                    self.decode_leaf(shared, tree, index, residual, &mut cursor)?;
                }
                Partition::Split => {
                    for &child in tree.children(index).iter().rev() {
                        stack.push(child)?;
                    }
                }
                _ => {
                    for &child in &children[..num_children] {
                        self.decode_leaf(shared, tree, child, residual, &mut cursor)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn decode_leaf(
        &mut self,
        shared: &TileShared,
        tree: &mut ParameterTree,
        index: usize,
        residual: &mut ResidualBuffer,
        cursor: &mut usize,
    ) -> Result<()> {
        let node = tree.node_mut(index);
        let Some(leaf) = node.leaf.as_mut() else {
            return Ok(());
        };
        let block = Block::new(
            &shared.geometry,
            shared.sequence(),
            node.row4x4,
            node.column4x4,
            node.size,
        )?;
        let bp = leaf.parameters.clone();
        let prediction = leaf.prediction.take().unwrap_or_default();
        self.compute_prediction(shared, &block, &bp, &prediction)?;
        let mut transform_blocks = std::mem::take(&mut self.transform_blocks);
        let result = collect_transform_blocks(shared, &block, &bp, &mut transform_blocks).and_then(
            |()| {
                self.decode_transform_blocks(
                    shared,
                    &block,
                    &bp,
                    &prediction,
                    &transform_blocks,
                    residual,
                    cursor,
                )
            },
        );
        self.transform_blocks = transform_blocks;
        result?;
        if !shared.build_bit_mask_when_parsing {
            build_bit_mask(shared, &block, &bp)?;
        }
        shared.store_motion_field(&block, &bp);
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn decode_transform_blocks(
        &mut self,
        shared: &TileShared,
        block: &Block,
        bp: &BlockParameters,
        prediction: &PredictionParameters,
        transform_blocks: &[TransformBlock],
        residual: &mut ResidualBuffer,
        cursor: &mut usize,
    ) -> Result<()> {
        for tb in transform_blocks {
            if !bp.is_inter {
                self.predict_intra(shared, block, bp, prediction, tb)?;
            }
            if !bp.skip {
                let parameters = residual.queue.pop().ok_or(Error::ResidualUnderflow)?;
                if parameters.eob > 0 {
                    let area = tb.tx_size.area();
                    let coefficients = residual
                        .coefficients
                        .get_mut(*cursor..*cursor + area)
                        .ok_or(Error::ResidualUnderflow)?;
                    self.reconstruct(
                        shared,
                        bp,
                        tb,
                        parameters.tx_type,
                        parameters.eob,
                        coefficients,
                    );
                    *cursor += area;
                }
            }
            self.mark_decoded(shared, tb);
        }
        Ok(())
    }
}
