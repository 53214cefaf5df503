// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

use std::sync::Arc;

use super::{
    Block, ParsedSuperBlock, TileShared, TransformBlock, bit_mask::build_bit_mask,
    collect_transform_blocks, decoder::Decoder, entropy_context::EntropyContext,
    entropy_context::EntropyContextDirection,
};
use crate::{
    block_parameters::{BlockParameters, ParameterLeaf, ParameterTree, PredictionParameters},
    constants::{BlockSize, FRAME_LF_COUNT, Partition, TransformSize, TransformType},
    error::Result,
    loop_filter::{deblock_filter_level, mode_id},
    residual_buffer::ResidualBuffer,
    symbol_context::SymbolDecoderContext,
    symbol_reader::SymbolReader,
    util::{Stack, lock, new_filled_vec, tracing_wrappers::*},
};

/// Five split levels from 128x128 down to 4x4, three pending siblings each,
/// plus the node being expanded.
pub(super) const DFS_STACK_SIZE: usize = 16;

/// Width and height of the largest block in 4x4 units.
pub(super) const MAX_BLOCK_SIZE4: usize = 32;

/// Largest transform block edge after clamping to 32, plus the padding the
/// coefficient contexts read past the last row and column.
pub(super) const QUANTIZED_STRIDE: usize = 32 + 4;

/// Where the coefficients read for a transform block go.
pub(super) enum ResidualSink<'s> {
    /// Reconstruct each transform block right after reading it.
    Decode(&'s mut Decoder),
    /// Keep the coefficients for the decode pass.
    Store(&'s mut ResidualBuffer),
}

/// Symbol level state of one tile. Owns the arithmetic decoder and the
/// adaptive CDFs, so parsing is strictly sequential.
pub(crate) struct Parser<'a> {
    pub(super) shared: Arc<TileShared>,
    pub(super) reader: SymbolReader<'a>,
    pub(super) context: Box<SymbolDecoderContext>,
    pub(super) entropy: EntropyContext,
    /// Luma transform type per 4x4 unit of the current block.
    pub(super) transform_types: [[TransformType; MAX_BLOCK_SIZE4]; MAX_BLOCK_SIZE4],
    /// Base quantizer index after the delta q of the current superblock.
    pub(super) current_qindex: i32,
    pub(super) delta_lf: [i8; FRAME_LF_COUNT],
    /// Set at the start of each superblock; deltas are only coded with its
    /// first block.
    pub(super) read_deltas: bool,
    /// Prediction parameters reused between blocks in single-threaded mode.
    prediction: Box<PredictionParameters>,
    coefficients: Vec<i32>,
    pub(super) quantized: Vec<u8>,
    transform_blocks: Vec<TransformBlock>,
    /// Segment id prediction flags of the blocks above, per 4x4 column, and
    /// to the left, per 4x4 row.
    pub(super) segment_id_predicted_above: Vec<bool>,
    pub(super) segment_id_predicted_left: Vec<bool>,
}

impl<'a> Parser<'a> {
    pub(super) fn new(
        shared: Arc<TileShared>,
        reader: SymbolReader<'a>,
        context: &SymbolDecoderContext,
    ) -> Result<Self> {
        let sequence = shared.sequence();
        let header = shared.header();
        let subsampling = [
            sequence.subsampling(0),
            sequence.subsampling(1),
            sequence.subsampling(2),
        ];
        let entropy = EntropyContext::new(header.columns4x4, header.rows4x4, subsampling)?;
        let segment_id_predicted_above = new_filled_vec(header.columns4x4, false)?;
        let segment_id_predicted_left = new_filled_vec(header.rows4x4, false)?;
        let current_qindex = header.quantizer.base_index as i32;
        Ok(Parser {
            reader,
            context: Box::new(context.clone()),
            entropy,
            transform_types: [[TransformType::DctDct; MAX_BLOCK_SIZE4]; MAX_BLOCK_SIZE4],
            current_qindex,
            delta_lf: [0; FRAME_LF_COUNT],
            read_deltas: false,
            prediction: Box::default(),
            coefficients: new_filled_vec(64 * 64, 0)?,
            quantized: new_filled_vec(QUANTIZED_STRIDE * QUANTIZED_STRIDE, 0)?,
            transform_blocks: vec![],
            segment_id_predicted_above,
            segment_id_predicted_left,
            shared,
        })
    }

    pub(super) fn symbol_context(&self) -> &SymbolDecoderContext {
        &self.context
    }

    /// Parses one superblock and reconstructs every block as it goes.
    pub(super) fn parse_and_decode_superblock(
        &mut self,
        row4x4: usize,
        column4x4: usize,
        decoder: &mut Decoder,
    ) -> Result<()> {
        trace!(row4x4, column4x4, "parse and decode superblock");
        self.start_superblock(row4x4, column4x4);
        decoder.clear_block_decoded(&self.shared, row4x4, column4x4);
        let mut tree = ParameterTree::new(row4x4, column4x4, self.shared.geometry.superblock_size);
        self.process_partition(&mut tree, &mut ResidualSink::Decode(decoder))
    }

    /// Parses one superblock, keeping its blocks and coefficients for the
    /// decode pass.
    pub(super) fn parse_superblock(
        &mut self,
        row4x4: usize,
        column4x4: usize,
    ) -> Result<ParsedSuperBlock> {
        trace!(row4x4, column4x4, "parse superblock");
        self.start_superblock(row4x4, column4x4);
        let mut residual = self.shared.residual_pool.get()?;
        let mut tree = ParameterTree::new(row4x4, column4x4, self.shared.geometry.superblock_size);
        match self.process_partition(&mut tree, &mut ResidualSink::Store(&mut residual)) {
            Ok(()) => Ok(ParsedSuperBlock { tree, residual }),
            Err(err) => {
                self.shared.residual_pool.release(residual);
                Err(err)
            }
        }
    }

    fn start_superblock(&mut self, row4x4: usize, column4x4: usize) {
        self.read_deltas = self.shared.header().delta_q.present;
        self.reset_cdef(row4x4, column4x4);
    }

    /// Marks the CDEF indices of the superblock's 64x64 blocks as not coded.
    fn reset_cdef(&mut self, row4x4: usize, column4x4: usize) {
        if !self.shared.sequence().enable_cdef {
            return;
        }
        let superblock_size4 = self.shared.geometry.superblock_size4;
        let mut cdef = lock(&self.shared.state.cdef_index);
        for y in (row4x4..row4x4 + superblock_size4).step_by(16) {
            for x in (column4x4..column4x4 + superblock_size4).step_by(16) {
                if let Some(index) = cdef.get_mut(y >> 4, x >> 4) {
                    *index = -1;
                }
            }
        }
    }

    /// Walks the partition tree depth first, reading each node's partition
    /// and parsing the blocks in coding order.
    fn process_partition(
        &mut self,
        tree: &mut ParameterTree,
        sink: &mut ResidualSink<'_>,
    ) -> Result<()> {
        let (rows4x4, columns4x4) = {
            let header = self.shared.header();
            (header.rows4x4, header.columns4x4)
        };
        let mut stack = Stack::<usize, DFS_STACK_SIZE>::new();
        stack.push(tree.root())?;
        while let Some(index) = stack.pop() {
            let node = tree.node(index);
            let (row4x4, column4x4, size) = (node.row4x4, node.column4x4, node.size);
            if row4x4 >= rows4x4 || column4x4 >= columns4x4 {
                continue;
            }
            let partition = self.read_partition(row4x4, column4x4, size)?;
            tree.set_partition(index, partition)?;
            match partition {
                Partition::None => {
                    tree.node_mut(index).leaf = self.process_block(row4x4, column4x4, size, sink)?;
                }
                Partition::Split => {
                    for &child in tree.children(index).iter().rev() {
                        stack.push(child)?;
                    }
                }
                _ => {
                    for i in 0..tree.node(index).num_children {
                        let child = tree.node(index).children[i];
                        let node = tree.node(child);
                        let (row4x4, column4x4, size) = (node.row4x4, node.column4x4, node.size);
                        tree.node_mut(child).leaf =
                            self.process_block(row4x4, column4x4, size, sink)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn read_partition(
        &mut self,
        row4x4: usize,
        column4x4: usize,
        size: BlockSize,
    ) -> Result<Partition> {
        if size == BlockSize::Block4x4 {
            return Ok(Partition::None);
        }
        let header = self.shared.header();
        let half4 = size.width4() >> 1;
        let has_rows = row4x4 + half4 < header.rows4x4;
        let has_columns = column4x4 + half4 < header.columns4x4;
        if !has_rows && !has_columns {
            return Ok(Partition::Split);
        }
        let context = self.partition_context(row4x4, column4x4, size);
        if has_rows && has_columns {
            let cdfs = &mut self.context;
            let symbol = match size {
                BlockSize::Block8x8 => self.reader.read_symbol(&mut cdfs.partition_w8[context]),
                BlockSize::Block16x16 => self.reader.read_symbol(&mut cdfs.partition_w16[context]),
                BlockSize::Block32x32 => self.reader.read_symbol(&mut cdfs.partition_w32[context]),
                BlockSize::Block64x64 => self.reader.read_symbol(&mut cdfs.partition_w64[context]),
                _ => self.reader.read_symbol(&mut cdfs.partition_w128[context]),
            };
            return Partition::try_from(symbol as u8);
        }
        // Only the partitions splitting along the frame edge are possible.
        // Their probabilities are gathered into a binary choice.
        let (gathered, fallback) = if has_columns {
            (
                [
                    Partition::Vertical,
                    Partition::Split,
                    Partition::HorizontalWithTopSplit,
                    Partition::VerticalWithLeftSplit,
                    Partition::VerticalWithRightSplit,
                    Partition::Vertical4,
                ],
                Partition::Horizontal,
            )
        } else {
            (
                [
                    Partition::Horizontal,
                    Partition::Split,
                    Partition::HorizontalWithTopSplit,
                    Partition::HorizontalWithBottomSplit,
                    Partition::VerticalWithLeftSplit,
                    Partition::Horizontal4,
                ],
                Partition::Vertical,
            )
        };
        let cdfs = &self.context;
        let cdf: &[u16] = match size {
            BlockSize::Block8x8 => &cdfs.partition_w8[context],
            BlockSize::Block16x16 => &cdfs.partition_w16[context],
            BlockSize::Block32x32 => &cdfs.partition_w32[context],
            BlockSize::Block64x64 => &cdfs.partition_w64[context],
            _ => &cdfs.partition_w128[context],
        };
        let num_symbols = cdf.len() - 1;
        let probability: u32 = gathered
            .iter()
            .map(|&p| p as usize)
            .filter(|&s| s < num_symbols)
            .map(|s| (cdf[s] - if s > 0 { cdf[s - 1] } else { 0 }) as u32)
            .sum();
        let probability = probability.clamp(1, 32767) as u16;
        Ok(if self.reader.read_bool_with_probability(probability) {
            Partition::Split
        } else {
            fallback
        })
    }

    /// Whether the neighbours above and to the left are narrower (shorter)
    /// than the block.
    fn partition_context(&self, row4x4: usize, column4x4: usize, size: BlockSize) -> usize {
        let geometry = &self.shared.geometry;
        let holder = &self.shared.state.block_parameters;
        let above = row4x4 > geometry.row4x4_start
            && holder
                .find(row4x4 - 1, column4x4)
                .is_some_and(|bp| bp.size.width_log2() < size.width_log2());
        let left = column4x4 > geometry.column4x4_start
            && holder
                .find(row4x4, column4x4 - 1)
                .is_some_and(|bp| bp.size.height_log2() < size.height_log2());
        (left as usize) * 2 + above as usize
    }

    /// Parses one coding block, and reconstructs it when decoding directly.
    /// Returns the leaf to keep in the partition tree in split mode.
    fn process_block(
        &mut self,
        row4x4: usize,
        column4x4: usize,
        size: BlockSize,
        sink: &mut ResidualSink<'_>,
    ) -> Result<Option<ParameterLeaf>> {
        let shared = self.shared.clone();
        let header = shared.header();
        if row4x4 >= header.rows4x4 || column4x4 >= header.columns4x4 {
            return Ok(None);
        }
        let block = Block::new(&shared.geometry, shared.sequence(), row4x4, column4x4, size)?;
        let mut prediction = match sink {
            ResidualSink::Decode(_) => std::mem::take(&mut self.prediction),
            ResidualSink::Store(_) => Box::default(),
        };
        *prediction = PredictionParameters::default();
        let mut bp = BlockParameters {
            size,
            ..Default::default()
        };
        self.read_mode_info(&block, &mut bp, &mut prediction)?;
        self.populate_deblock_filter_level(&mut bp);
        self.read_palette_tokens(&block, &bp, &mut prediction)?;
        self.read_block_transform_size(&block, &mut bp)?;
        bp.uv_transform_size = if header.is_lossless(bp.segment_id) {
            TransformSize::Tx4x4
        } else {
            block.residual_size[1].uv_transform_size()
        };
        if bp.skip {
            self.reset_entropy_context(&block);
        }
        let bp = Arc::new(bp);
        shared.state.block_parameters.fill(row4x4, column4x4, &bp);
        let segmentation = &header.segmentation;
        if segmentation.enabled && segmentation.update_map {
            lock(&shared.state.segmentation_map).fill_region(
                row4x4,
                column4x4,
                size.height4(),
                size.width4(),
                bp.segment_id,
            );
        }
        if let ResidualSink::Decode(decoder) = sink {
            decoder.compute_prediction(&shared, &block, &bp, &prediction)?;
        }
        self.read_residual(&block, &bp, &prediction, sink)?;
        let leaf = match sink {
            ResidualSink::Decode(_) => {
                build_bit_mask(&shared, &block, &bp)?;
                shared.store_motion_field(&block, &bp);
                self.prediction = prediction;
                None
            }
            ResidualSink::Store(_) => {
                if shared.build_bit_mask_when_parsing {
                    build_bit_mask(&shared, &block, &bp)?;
                }
                Some(ParameterLeaf {
                    parameters: bp,
                    prediction: Some(prediction),
                })
            }
        };
        Ok(leaf)
    }

    fn populate_deblock_filter_level(&self, bp: &mut BlockParameters) {
        if !self.shared.state.loop_filter_mask.enabled() {
            return;
        }
        let header = self.shared.header();
        let mode = mode_id(bp.y_mode);
        for (slot, level) in bp.deblock_filter_level.iter_mut().enumerate() {
            *level = deblock_filter_level(
                header,
                bp.segment_id,
                slot,
                bp.reference_frame[0],
                mode,
                &self.delta_lf,
            );
        }
    }

    /// Clears the coefficient contexts along a skipped block.
    fn reset_entropy_context(&mut self, block: &Block) {
        let sequence = self.shared.sequence();
        for plane in 0..block.num_planes(sequence) {
            let (ssx, ssy) = sequence.subsampling(plane);
            let start_x = block.column4x4 >> ssx;
            let end_x = (block.column4x4 + block.size.width4()) >> ssx;
            let start_y = block.row4x4 >> ssy;
            let end_y = (block.row4x4 + block.size.height4()) >> ssy;
            self.entropy
                .clear(EntropyContextDirection::Top, plane, start_x, end_x - start_x);
            self.entropy
                .clear(EntropyContextDirection::Left, plane, start_y, end_y - start_y);
        }
    }

    /// Reads the coefficients of every transform block of `block`, handing
    /// them to `sink`. Intra prediction of each transform block happens
    /// right before its residual is added.
    fn read_residual(
        &mut self,
        block: &Block,
        bp: &BlockParameters,
        prediction: &PredictionParameters,
        sink: &mut ResidualSink<'_>,
    ) -> Result<()> {
        let shared = self.shared.clone();
        let mut transform_blocks = std::mem::take(&mut self.transform_blocks);
        collect_transform_blocks(&shared, block, bp, &mut transform_blocks)?;
        let result = self.read_transform_blocks(block, bp, prediction, sink, &transform_blocks);
        self.transform_blocks = transform_blocks;
        result
    }

    fn read_transform_blocks(
        &mut self,
        block: &Block,
        bp: &BlockParameters,
        prediction: &PredictionParameters,
        sink: &mut ResidualSink<'_>,
        transform_blocks: &[TransformBlock],
    ) -> Result<()> {
        let shared = self.shared.clone();
        for tb in transform_blocks {
            match sink {
                ResidualSink::Decode(decoder) => {
                    if !bp.is_inter {
                        decoder.predict_intra(&shared, block, bp, prediction, tb)?;
                    }
                    if !bp.skip {
                        let mut coefficients = std::mem::take(&mut self.coefficients);
                        let read =
                            self.read_coefficients(block, bp, prediction, tb, &mut coefficients);
                        let result = read.map(|(eob, tx_type)| {
                            decoder.reconstruct(&shared, bp, tb, tx_type, eob, &mut coefficients)
                        });
                        self.coefficients = coefficients;
                        result?;
                    }
                    decoder.mark_decoded(&shared, tb);
                }
                ResidualSink::Store(buffer) => {
                    if bp.skip {
                        continue;
                    }
                    let start = buffer.coefficients.len();
                    buffer.coefficients.try_reserve(tb.tx_size.area())?;
                    buffer.coefficients.resize(start + tb.tx_size.area(), 0);
                    let (eob, tx_type) = self.read_coefficients(
                        block,
                        bp,
                        prediction,
                        tb,
                        &mut buffer.coefficients[start..],
                    )?;
                    if eob == 0 {
                        buffer.coefficients.truncate(start);
                    }
                    buffer.queue.push(eob, tx_type);
                }
            }
        }
        Ok(())
    }
}
