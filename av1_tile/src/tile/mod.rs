// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Decoding of one tile.
//!
//! Superblocks are visited in raster order. Without a task queue every block
//! is parsed and reconstructed right away. With one, the calling thread only
//! parses: each parsed superblock is handed to a [`Wavefront`] and
//! reconstructed on the queue once its left and top-right neighbours are
//! done.

use std::sync::{Arc, Mutex};

use crate::{
    block_parameters::{BlockParameters, ParameterTree},
    constants::{BlockSize, MAX_PLANES, PLANE_Y, PlaneType, ReferenceFrameType, TransformSize},
    error::{Error, Result},
    frame::{FrameContext, FrameState, MotionVector},
    headers::{FrameHeader, SequenceHeader},
    residual_buffer::{ResidualBuffer, ResidualBufferPool},
    symbol_context::SymbolDecoderContext,
    symbol_reader::SymbolReader,
    threading::{TaskQueue, Wavefront, WavefrontJob},
    util::{BlockingCounterWithStatus, Stack, lock, read_lock, tracing_wrappers::*},
};

mod bit_mask;
mod decoder;
mod entropy_context;
mod mode_info;
mod motion_vector;
mod palette;
mod parser;
mod prediction;
mod residual;
mod transform_size;

#[cfg(test)]
mod tests;

use decoder::Decoder;
pub use entropy_context::{EntropyContext, EntropyContextDirection};
use parser::Parser;
pub use residual::dequantize;

/// Position of a tile in the frame, in 4x4 units, and its superblock grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileGeometry {
    pub row: usize,
    pub column: usize,
    pub row4x4_start: usize,
    pub row4x4_end: usize,
    pub column4x4_start: usize,
    pub column4x4_end: usize,
    pub superblock_size: BlockSize,
    pub superblock_size4: usize,
    pub superblock_rows: usize,
    pub superblock_columns: usize,
    /// Superblock columns a row must trail the row above by, in split mode.
    pub intra_block_copy_lag: usize,
}

impl TileGeometry {
    pub fn new(number: usize, sequence: &SequenceHeader, header: &FrameHeader) -> Result<Self> {
        let info = &header.tile_info;
        if number >= info.num_tiles() {
            return Err(Error::InvalidTileLayout("tile number out of range"));
        }
        let (row, column) = (number / info.tile_columns, number % info.tile_columns);
        let bounds = |starts: &[usize], index: usize, limit: usize| -> Result<(usize, usize)> {
            match (starts.get(index), starts.get(index + 1)) {
                (Some(&start), Some(&end)) if start < end.min(limit) => Ok((start, end.min(limit))),
                _ => Err(Error::InvalidTileLayout("tile outside of the frame")),
            }
        };
        let (row4x4_start, row4x4_end) = bounds(&info.row_start, row, header.rows4x4)?;
        let (column4x4_start, column4x4_end) =
            bounds(&info.column_start, column, header.columns4x4)?;
        let superblock_size4 = sequence.superblock_size4();
        let superblock_size = if sequence.use_128x128_superblock {
            BlockSize::Block128x128
        } else {
            BlockSize::Block64x64
        };
        let intra_block_copy_lag = match (header.allow_intrabc, sequence.use_128x128_superblock) {
            (false, _) => 1,
            (true, true) => 3,
            (true, false) => 5,
        };
        Ok(TileGeometry {
            row,
            column,
            row4x4_start,
            row4x4_end,
            column4x4_start,
            column4x4_end,
            superblock_size,
            superblock_size4,
            superblock_rows: (row4x4_end - row4x4_start).div_ceil(superblock_size4),
            superblock_columns: (column4x4_end - column4x4_start).div_ceil(superblock_size4),
            intra_block_copy_lag,
        })
    }

    pub fn num_superblocks(&self) -> usize {
        self.superblock_rows * self.superblock_columns
    }

    /// Top-left 4x4 position of superblock (`row`, `column`) of the tile.
    pub fn superblock_position(&self, row: usize, column: usize) -> (usize, usize) {
        (
            self.row4x4_start + row * self.superblock_size4,
            self.column4x4_start + column * self.superblock_size4,
        )
    }
}

/// A coding block about to be parsed or decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    pub row4x4: usize,
    pub column4x4: usize,
    pub size: BlockSize,
    /// Whether chroma is coded with this block. Sub-8x8 blocks carry the
    /// chroma of their 8x8 area in the last (bottom-right) block only.
    pub has_chroma: bool,
    /// Block size in the luma and the chroma planes.
    pub residual_size: [BlockSize; 2],
    /// Availability of the neighbours above and to the left, per plane.
    pub top_available: [bool; MAX_PLANES],
    pub left_available: [bool; MAX_PLANES],
}

impl Block {
    pub fn new(
        geometry: &TileGeometry,
        sequence: &SequenceHeader,
        row4x4: usize,
        column4x4: usize,
        size: BlockSize,
    ) -> Result<Self> {
        let (ssx, ssy) = (sequence.subsampling_x, sequence.subsampling_y);
        let (width4, height4) = (size.width4(), size.height4());
        let has_chroma = sequence.num_planes() > 1
            && (ssx == 0 || column4x4 & 1 == 1 || width4 > 1)
            && (ssy == 0 || row4x4 & 1 == 1 || height4 > 1);
        let uv_size = if sequence.num_planes() > 1 {
            size.subsampled(ssx, ssy)
                .ok_or(Error::InvalidPlaneResidualSize(size, ssx, ssy))?
        } else {
            size
        };
        let top = row4x4 > geometry.row4x4_start;
        let left = column4x4 > geometry.column4x4_start;
        // A chroma block of a sub-8x8 area starts at the even 4x4 position.
        let chroma_row = if ssy == 1 && height4 == 1 { row4x4 & !1 } else { row4x4 };
        let chroma_column = if ssx == 1 && width4 == 1 { column4x4 & !1 } else { column4x4 };
        let chroma_top = has_chroma && chroma_row > geometry.row4x4_start;
        let chroma_left = has_chroma && chroma_column > geometry.column4x4_start;
        Ok(Block {
            row4x4,
            column4x4,
            size,
            has_chroma,
            residual_size: [size, uv_size],
            top_available: [top, chroma_top, chroma_top],
            left_available: [left, chroma_left, chroma_left],
        })
    }

    pub fn num_planes(&self, sequence: &SequenceHeader) -> usize {
        if self.has_chroma { sequence.num_planes() } else { 1 }
    }

    pub fn plane_size(&self, plane: usize) -> BlockSize {
        self.residual_size[PlaneType::from_plane(plane) as usize]
    }
}

/// One transform block of a coding block, in coding order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransformBlock {
    pub plane: usize,
    /// Top-left corner in pixels of the plane.
    pub start_x: usize,
    pub start_y: usize,
    pub tx_size: TransformSize,
    /// Whether the transform block touches the left (top) edge of its coding
    /// block, where intra edge availability follows the block's neighbours.
    pub on_left_edge: bool,
    pub on_top_edge: bool,
}

const TRANSFORM_TREE_STACK_SIZE: usize = 16;

/// Lists the transform blocks of `block` in coding order. Blocks wider or
/// taller than 64 are coded in 64x64 chunks, each chunk with luma first.
/// Transform blocks starting outside the frame are skipped.
pub(crate) fn collect_transform_blocks(
    shared: &TileShared,
    block: &Block,
    bp: &BlockParameters,
    out: &mut Vec<TransformBlock>,
) -> Result<()> {
    out.clear();
    let sequence = shared.sequence();
    let header = shared.header();
    let lossless = header.is_lossless(bp.segment_id);
    let width_chunks = (block.size.width4() >> 4).max(1);
    let height_chunks = (block.size.height4() >> 4).max(1);
    let chunk_size = if width_chunks > 1 || height_chunks > 1 {
        BlockSize::Block64x64
    } else {
        block.size
    };
    for chunk_y in 0..height_chunks {
        for chunk_x in 0..width_chunks {
            let row_chunk4x4 = block.row4x4 + (chunk_y << 4);
            let column_chunk4x4 = block.column4x4 + (chunk_x << 4);
            for plane in 0..block.num_planes(sequence) {
                let (ssx, ssy) = sequence.subsampling(plane);
                let plane_size = chunk_size
                    .subsampled(ssx, ssy)
                    .ok_or(Error::InvalidPlaneResidualSize(chunk_size, ssx, ssy))?;
                let max_x = (header.columns4x4 * 4) >> ssx;
                let max_y = (header.rows4x4 * 4) >> ssy;
                if plane == PLANE_Y && bp.is_inter && !lossless {
                    let base_x = (column_chunk4x4 >> ssx) * 4;
                    let base_y = (row_chunk4x4 >> ssy) * 4;
                    collect_transform_tree(shared, base_x, base_y, plane_size, out)?;
                    continue;
                }
                let tx_size = if plane == PLANE_Y {
                    bp.transform_size
                } else {
                    bp.uv_transform_size
                };
                let base_x = (block.column4x4 >> ssx) * 4;
                let base_y = (block.row4x4 >> ssy) * 4;
                let (step_x, step_y) = (tx_size.width4(), tx_size.height4());
                for y in (0..plane_size.height4()).step_by(step_y) {
                    for x in (0..plane_size.width4()).step_by(step_x) {
                        let x = x + ((chunk_x << 4) >> ssx);
                        let y = y + ((chunk_y << 4) >> ssy);
                        let (start_x, start_y) = (base_x + 4 * x, base_y + 4 * y);
                        if start_x >= max_x || start_y >= max_y {
                            continue;
                        }
                        out.push(TransformBlock {
                            plane,
                            start_x,
                            start_y,
                            tx_size,
                            on_left_edge: x == 0,
                            on_top_edge: y == 0,
                        });
                    }
                }
            }
        }
    }
    Ok(())
}

/// Luma transform blocks of an inter block, following the transform sizes
/// recorded while parsing.
fn collect_transform_tree(
    shared: &TileShared,
    start_x: usize,
    start_y: usize,
    plane_size: BlockSize,
    out: &mut Vec<TransformBlock>,
) -> Result<()> {
    let header = shared.header();
    let (max_x, max_y) = (header.columns4x4 * 4, header.rows4x4 * 4);
    let sizes = read_lock(&shared.state.inter_transform_sizes);
    let mut stack = Stack::<(usize, usize, usize, usize), TRANSFORM_TREE_STACK_SIZE>::new();
    stack.push((start_x, start_y, plane_size.width(), plane_size.height()))?;
    while let Some((x, y, width, height)) = stack.pop() {
        if x >= max_x || y >= max_y {
            continue;
        }
        let tx_size = sizes[y >> 2][x >> 2];
        if width <= tx_size.width() && height <= tx_size.height() {
            let tx_size = TransformSize::from_dimensions(width, height)
                .ok_or(Error::InvalidTransformSize(width, height))?;
            out.push(TransformBlock {
                plane: PLANE_Y,
                start_x: x,
                start_y: y,
                tx_size,
                on_left_edge: true,
                on_top_edge: true,
            });
            continue;
        }
        // Children are pushed last to first.
        let (half_width, half_height) = (width / 2, height / 2);
        if width > height {
            stack.push((x + half_width, y, half_width, height))?;
            stack.push((x, y, half_width, height))?;
        } else if width < height {
            stack.push((x, y + half_height, width, half_height))?;
            stack.push((x, y, width, half_height))?;
        } else {
            stack.push((x + half_width, y + half_height, half_width, half_height))?;
            stack.push((x, y + half_height, half_width, half_height))?;
            stack.push((x + half_width, y, half_width, half_height))?;
            stack.push((x, y, half_width, half_height))?;
        }
    }
    Ok(())
}

/// A superblock parsed in split mode, waiting to be decoded.
#[derive(Debug)]
pub(crate) struct ParsedSuperBlock {
    pub tree: ParameterTree,
    pub residual: ResidualBuffer,
}

/// State of a tile shared between its parser and its decode tasks.
#[derive(Debug)]
pub(crate) struct TileShared {
    pub number: usize,
    pub frame: Arc<FrameContext>,
    pub state: Arc<FrameState>,
    pub geometry: TileGeometry,
    /// Parsed superblocks handed from the parser to decode tasks, in raster
    /// order. Empty in single-threaded mode.
    pub superblocks: Vec<Mutex<Option<ParsedSuperBlock>>>,
    pub residual_pool: ResidualBufferPool,
    decoders: Mutex<Vec<Decoder>>,
    pub build_bit_mask_when_parsing: bool,
}

impl TileShared {
    pub fn sequence(&self) -> &SequenceHeader {
        &self.frame.sequence_header
    }

    pub fn header(&self) -> &FrameHeader {
        &self.frame.frame_header
    }

    fn take_decoder(&self) -> Result<Decoder> {
        match lock(&self.decoders).pop() {
            Some(decoder) => Ok(decoder),
            None => Decoder::new(self.sequence()),
        }
    }

    fn return_decoder(&self, decoder: Decoder) {
        lock(&self.decoders).push(decoder);
    }

    /// Records the motion of `bp` at 8x8 granularity for later frames.
    fn store_motion_field(&self, block: &Block, bp: &BlockParameters) {
        const REFERENCE_MV_LIMIT: i32 = (1 << 12) - 1;
        let header = self.header();
        let mut stored = (ReferenceFrameType::None, MotionVector::ZERO);
        for i in (0..2).rev() {
            let reference = bp.reference_frame[i];
            let mv = bp.mv[i];
            if !reference.is_inter()
                || mv.row.abs() > REFERENCE_MV_LIMIT
                || mv.column.abs() > REFERENCE_MV_LIMIT
            {
                continue;
            }
            let Ok(frame) = self.frame.reference_frame(reference) else {
                continue;
            };
            if self
                .frame
                .relative_distance(frame.order_hint, header.order_hint)
                < 0
            {
                stored = (reference, mv);
                break;
            }
        }
        let row_end = (block.row4x4 + block.size.height4()).min(header.rows4x4);
        let column_start = block.column4x4 | 1;
        let column_end = (block.column4x4 + block.size.width4()).min(header.columns4x4);
        if column_start >= column_end {
            return;
        }
        let mut field = lock(&self.state.motion_field);
        for row in ((block.row4x4 | 1)..row_end).step_by(2) {
            for column in (column_start..column_end).step_by(2) {
                if let Some(reference) = field.reference_frame.get_mut(row / 2, column / 2) {
                    *reference = stored.0;
                }
                if stored.0.is_inter() {
                    if let Some(mv) = field.mv.get_mut(row / 2, column / 2) {
                        *mv = stored.1;
                    }
                }
            }
        }
    }
}

/// Runs the decode pass of split mode for each superblock the wavefront
/// releases.
struct SuperBlockDecodeJob {
    shared: Arc<TileShared>,
    counter: Arc<BlockingCounterWithStatus>,
}

impl SuperBlockDecodeJob {
    fn decode(&self, row: usize, column: usize) -> Result<()> {
        let shared = &self.shared;
        let index = row * shared.geometry.superblock_columns + column;
        let mut superblock = lock(&shared.superblocks[index])
            .take()
            .ok_or(Error::InvalidTileLayout("superblock decoded before it was parsed"))?;
        let mut decoder = shared.take_decoder()?;
        let result = decoder.decode_superblock(shared, &mut superblock);
        shared.return_decoder(decoder);
        shared.residual_pool.release(superblock.residual);
        result
    }
}

impl WavefrontJob for SuperBlockDecodeJob {
    fn run(&self, row: usize, column: usize) -> bool {
        match self.decode(row, column) {
            Ok(()) => true,
            Err(_err) => {
                warn!(tile = self.shared.number, row, column, error = %_err, "superblock decode failed");
                false
            }
        }
    }

    fn complete(&self, success: bool) {
        debug!(tile = self.shared.number, success, "tile decode tasks done");
        self.counter.decrement(success);
    }
}

/// Decoder of one tile.
pub struct Tile<'a> {
    shared: Arc<TileShared>,
    parser: Parser<'a>,
    queue: Option<Arc<dyn TaskQueue>>,
}

impl<'a> Tile<'a> {
    /// Prepares tile `number` of the frame. `data` is the tile's payload and
    /// `context` the CDFs it starts from. When `queue` is given and the tile
    /// is wide enough, reconstruction runs on the queue while this thread
    /// parses. `build_bit_mask_when_parsing` builds the deblocking masks on
    /// the parsing thread instead of in the decode tasks.
    pub fn new(
        number: usize,
        frame: Arc<FrameContext>,
        state: Arc<FrameState>,
        data: &'a [u8],
        context: &SymbolDecoderContext,
        queue: Option<Arc<dyn TaskQueue>>,
        build_bit_mask_when_parsing: bool,
    ) -> Result<Self> {
        let reader = SymbolReader::new(data, !frame.frame_header.disable_cdf_update);
        Self::with_reader(
            number,
            frame,
            state,
            reader,
            context,
            queue,
            build_bit_mask_when_parsing,
        )
    }

    pub(crate) fn with_reader(
        number: usize,
        frame: Arc<FrameContext>,
        state: Arc<FrameState>,
        reader: SymbolReader<'a>,
        context: &SymbolDecoderContext,
        queue: Option<Arc<dyn TaskQueue>>,
        build_bit_mask_when_parsing: bool,
    ) -> Result<Self> {
        let geometry = TileGeometry::new(number, &frame.sequence_header, &frame.frame_header)?;
        let split = queue.is_some() && geometry.superblock_columns > geometry.intra_block_copy_lag;
        let mut superblocks = Vec::new();
        if split {
            superblocks.try_reserve(geometry.num_superblocks())?;
            superblocks.resize_with(geometry.num_superblocks(), Default::default);
        }
        let shared = Arc::new(TileShared {
            number,
            residual_pool: ResidualBufferPool::new(&frame.sequence_header),
            frame,
            state,
            geometry,
            superblocks,
            decoders: Mutex::new(vec![]),
            build_bit_mask_when_parsing,
        });
        let parser = Parser::new(shared.clone(), reader, context)?;
        Ok(Tile {
            shared,
            parser,
            queue: queue.filter(|_| split),
        })
    }

    pub fn number(&self) -> usize {
        self.shared.number
    }

    pub fn geometry(&self) -> &TileGeometry {
        &self.shared.geometry
    }

    /// Whether parsing and reconstruction run as separate passes.
    pub fn uses_split_decoding(&self) -> bool {
        self.queue.is_some()
    }

    /// Decodes the whole tile. `counter` is decremented exactly once, with
    /// the tile's final status; in split mode this may happen after this
    /// function returns, once the last decode task finished.
    #[instrument(level = "debug", skip_all, err)]
    pub fn decode(mut self, counter: &Arc<BlockingCounterWithStatus>) -> Result<()> {
        debug!(
            tile = self.shared.number,
            split = self.queue.is_some(),
            "decoding tile"
        );
        match self.queue.take() {
            Some(queue) => self.decode_split(queue, counter),
            None => {
                let result = self.decode_single();
                if result.is_ok() {
                    self.save_symbol_context();
                }
                counter.decrement(result.is_ok());
                result
            }
        }
    }

    fn decode_single(&mut self) -> Result<()> {
        let geometry = self.shared.geometry;
        let mut decoder = self.shared.take_decoder()?;
        for row in 0..geometry.superblock_rows {
            for column in 0..geometry.superblock_columns {
                let (row4x4, column4x4) = geometry.superblock_position(row, column);
                self.parser
                    .parse_and_decode_superblock(row4x4, column4x4, &mut decoder)?;
            }
        }
        Ok(())
    }

    fn decode_split(
        mut self,
        queue: Arc<dyn TaskQueue>,
        counter: &Arc<BlockingCounterWithStatus>,
    ) -> Result<()> {
        let geometry = self.shared.geometry;
        let job = SuperBlockDecodeJob {
            shared: self.shared.clone(),
            counter: counter.clone(),
        };
        let wavefront = match Wavefront::new(
            geometry.superblock_rows,
            geometry.superblock_columns,
            geometry.intra_block_copy_lag,
            job,
            queue,
        ) {
            Ok(wavefront) => wavefront,
            Err(err) => {
                counter.decrement(false);
                return Err(err);
            }
        };
        let mut result = Ok(());
        'parse: for row in 0..geometry.superblock_rows {
            for column in 0..geometry.superblock_columns {
                let (row4x4, column4x4) = geometry.superblock_position(row, column);
                match self.parser.parse_superblock(row4x4, column4x4) {
                    Ok(superblock) => {
                        let index = row * geometry.superblock_columns + column;
                        *lock(&self.shared.superblocks[index]) = Some(superblock);
                        if !wavefront.mark_parsed(row, column) {
                            break 'parse;
                        }
                    }
                    Err(err) => {
                        wavefront.abort();
                        result = Err(err);
                        break 'parse;
                    }
                }
            }
        }
        let aborted = wavefront.is_aborted();
        if result.is_ok() && !aborted {
            self.save_symbol_context();
        }
        wavefront.finish_producer();
        match result {
            Ok(()) if aborted => Err(Error::TileDecodeFailed(self.shared.number)),
            result => result,
        }
    }

    /// Keeps the final CDFs when this tile feeds the next frame's context.
    fn save_symbol_context(&self) {
        let header = self.shared.header();
        if header.enable_frame_end_update_cdf
            && self.shared.number == header.tile_info.context_update_id
        {
            debug!(tile = self.shared.number, "saving symbol context");
            *lock(&self.shared.state.saved_symbol_context) =
                Some(self.parser.symbol_context().snapshot_for_next_frame());
        }
    }
}
