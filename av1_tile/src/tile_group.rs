// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Decoding of all tiles of a frame.

use std::{
    ops::Range,
    sync::{Arc, Mutex},
};

use crate::{
    error::{Error, Result},
    frame::{FrameContext, FrameState},
    symbol_context::SymbolDecoderContext,
    threading::TaskQueue,
    tile::Tile,
    util::{BlockingCounterWithStatus, lock, tracing_wrappers::*},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileDecoderOptions {
    /// Worker threads of the pool; 0 lets the pool pick one per core.
    pub num_threads: usize,
    /// Decode every tile on the calling thread, parsing and reconstructing
    /// each superblock in one pass.
    pub force_single_threaded: bool,
    /// Build the deblocking masks while parsing instead of in the
    /// reconstruction tasks.
    pub build_bit_mask_on_main_thread: bool,
}

impl Default for TileDecoderOptions {
    fn default() -> Self {
        Self {
            num_threads: 0,
            force_single_threaded: false,
            build_bit_mask_on_main_thread: true,
        }
    }
}

enum Executor {
    CallingThread,
    /// Superblock reconstruction runs on the queue; tiles are parsed one
    /// after the other on the calling thread.
    Queue(Arc<dyn TaskQueue>),
    /// Tiles are decoded in parallel on the pool. A frame with a single tile
    /// uses the pool for superblock reconstruction instead.
    #[cfg(feature = "parallel")]
    Pool(Arc<rayon::ThreadPool>),
}

/// Decodes the tile groups of frames with a fixed threading setup.
pub struct TileGroupDecoder {
    options: TileDecoderOptions,
    executor: Executor,
}

impl std::fmt::Debug for TileGroupDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let executor = match &self.executor {
            Executor::CallingThread => "calling thread",
            Executor::Queue(_) => "task queue",
            #[cfg(feature = "parallel")]
            Executor::Pool(_) => "thread pool",
        };
        f.debug_struct("TileGroupDecoder")
            .field("options", &self.options)
            .field("executor", &executor)
            .finish()
    }
}

impl TileGroupDecoder {
    pub fn new(options: TileDecoderOptions) -> Result<Self> {
        if options.force_single_threaded {
            return Ok(Self {
                options,
                executor: Executor::CallingThread,
            });
        }
        #[cfg(feature = "parallel")]
        {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(options.num_threads)
                .thread_name(|i| format!("av1-tile-{i}"))
                .build()
                .map_err(|err| Error::ThreadPoolCreation(err.to_string()))?;
            debug!(threads = pool.current_num_threads(), "created tile thread pool");
            Ok(Self {
                options,
                executor: Executor::Pool(Arc::new(pool)),
            })
        }
        #[cfg(not(feature = "parallel"))]
        Ok(Self {
            options,
            executor: Executor::CallingThread,
        })
    }

    /// Reconstructs superblocks on `queue` instead of an owned pool.
    pub fn with_queue(options: TileDecoderOptions, queue: Arc<dyn TaskQueue>) -> Self {
        let executor = if options.force_single_threaded {
            Executor::CallingThread
        } else {
            Executor::Queue(queue)
        };
        Self { options, executor }
    }

    pub fn options(&self) -> &TileDecoderOptions {
        &self.options
    }

    /// Decodes every tile of the frame. `tile_ranges` are the payload of each
    /// tile within `data`, in tile order, and `context` the CDFs every tile
    /// starts from. Returns once all tiles and their reconstruction tasks
    /// finished; the error reports how many tiles failed.
    #[instrument(level = "debug", skip_all, err)]
    pub fn decode_frame(
        &self,
        frame: Arc<FrameContext>,
        context: &SymbolDecoderContext,
        data: &[u8],
        tile_ranges: &[Range<usize>],
    ) -> Result<Arc<FrameState>> {
        let num_tiles = frame.frame_header.tile_info.num_tiles();
        if tile_ranges.len() != num_tiles {
            return Err(Error::InvalidTileLayout(
                "tile ranges do not match the tile info",
            ));
        }
        let payloads = tile_ranges
            .iter()
            .enumerate()
            .map(|(number, range)| {
                data.get(range.clone()).ok_or(Error::TileDataOutOfBounds(
                    number,
                    range.start,
                    range.end,
                    data.len(),
                ))
            })
            .collect::<Result<Vec<_>>>()?;
        let state = Arc::new(FrameState::new(&frame)?);
        debug!(num_tiles, "decoding tile group");

        let counter = Arc::new(BlockingCounterWithStatus::new(num_tiles));
        let failures = Mutex::new(0usize);
        let decode_tile = |number: usize, queue: Option<Arc<dyn TaskQueue>>| {
            let result = Tile::new(
                number,
                frame.clone(),
                state.clone(),
                payloads[number],
                context,
                queue,
                self.options.build_bit_mask_on_main_thread,
            );
            let result = match result {
                Ok(tile) => tile.decode(&counter),
                Err(err) => {
                    counter.decrement(false);
                    Err(err)
                }
            };
            if let Err(_err) = result {
                warn!(tile = number, error = %_err, "tile decode failed");
                *lock(&failures) += 1;
            }
        };
        match &self.executor {
            Executor::CallingThread => (0..num_tiles).for_each(|number| decode_tile(number, None)),
            Executor::Queue(queue) => {
                (0..num_tiles).for_each(|number| decode_tile(number, Some(queue.clone())))
            }
            #[cfg(feature = "parallel")]
            Executor::Pool(pool) if num_tiles == 1 => {
                let queue: Arc<dyn TaskQueue> = pool.clone();
                decode_tile(0, Some(queue));
            }
            #[cfg(feature = "parallel")]
            Executor::Pool(pool) => pool.scope(|scope| {
                let decode_tile = &decode_tile;
                for number in 0..num_tiles {
                    scope.spawn(move |_| decode_tile(number, None));
                }
            }),
        }

        let success = counter.wait();
        let failed = *lock(&failures);
        // Failures of reconstruction tasks only show in the counter.
        let failed = if success { failed } else { failed.max(1) };
        if failed > 0 {
            return Err(Error::FrameDecodeFailed(failed, num_tiles));
        }
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;
    use crate::{
        frame_buffer::PlaneBuffer,
        headers::{FrameHeader, SequenceHeader, TileInfo},
        symbol_reader::SymbolReader,
        test_util::{FlatQuantizer, ScriptedSymbols, zeros},
        threading::test_queues::InlineQueue,
    };

    fn frame(width: usize, height: usize, tile_columns: usize) -> Result<Arc<FrameContext>> {
        let sequence = SequenceHeader::default();
        let mut header = FrameHeader::key_frame(width, height, &sequence)?;
        header.tile_info = TileInfo::uniform(
            header.rows4x4,
            header.columns4x4,
            sequence.superblock_size4(),
            tile_columns,
            1,
        )?;
        header.tile_info.context_update_id = tile_columns - 1;
        Ok(Arc::new(FrameContext::new(
            sequence,
            header,
            Arc::new(FlatQuantizer::default()),
        )?))
    }

    /// Encodes every tile of `frame` with all-zero symbols.
    fn encode_tiles(frame: &Arc<FrameContext>) -> Result<(Vec<u8>, Vec<Range<usize>>)> {
        let mut data = vec![];
        let mut ranges = vec![];
        for number in 0..frame.frame_header.tile_info.num_tiles() {
            let state = Arc::new(FrameState::new(frame)?);
            let (script, writer) = ScriptedSymbols::new(zeros());
            let tile = Tile::with_reader(
                number,
                frame.clone(),
                state,
                SymbolReader::scripted(script, true),
                &SymbolDecoderContext::default(),
                None,
                true,
            )?;
            tile.decode(&Arc::new(BlockingCounterWithStatus::new(1)))?;
            let bytes = std::mem::take(&mut *lock(&writer)).finish();
            let start = data.len();
            data.extend_from_slice(&bytes);
            ranges.push(start..data.len());
        }
        Ok((data, ranges))
    }

    fn decode(
        decoder: &TileGroupDecoder,
        frame: &Arc<FrameContext>,
        data: &[u8],
        ranges: &[Range<usize>],
    ) -> Result<(Vec<PlaneBuffer>, Option<Box<SymbolDecoderContext>>)> {
        let state = decoder.decode_frame(
            frame.clone(),
            &SymbolDecoderContext::default(),
            data,
            ranges,
        )?;
        Ok((state.frame_buffer.snapshot()?, state.take_saved_symbol_context()))
    }

    fn single_threaded() -> TileDecoderOptions {
        TileDecoderOptions {
            force_single_threaded: true,
            ..Default::default()
        }
    }

    #[test]
    fn rejects_bad_tile_ranges() -> Result<()> {
        let frame = frame(128, 64, 2)?;
        let decoder = TileGroupDecoder::new(single_threaded())?;
        let context = SymbolDecoderContext::default();
        let data = [0u8; 16];
        assert!(matches!(
            decoder.decode_frame(frame.clone(), &context, &data, &[0..16]),
            Err(Error::InvalidTileLayout(_))
        ));
        assert!(matches!(
            decoder.decode_frame(frame, &context, &data, &[0..8, 8..32]),
            Err(Error::TileDataOutOfBounds(1, 8, 32, 16))
        ));
        Ok(())
    }

    #[test]
    fn queue_and_calling_thread_agree() -> Result<()> {
        let frame = frame(256, 64, 2)?;
        let (data, ranges) = encode_tiles(&frame)?;
        let reference = decode(
            &TileGroupDecoder::new(single_threaded())?,
            &frame,
            &data,
            &ranges,
        )?;
        assert!(reference.1.is_some());

        let queued = TileGroupDecoder::with_queue(Default::default(), Arc::new(InlineQueue));
        assert_eq!(decode(&queued, &frame, &data, &ranges)?, reference);
        Ok(())
    }

    #[cfg(feature = "parallel")]
    #[test]
    fn thread_pool_matches_calling_thread() -> Result<()> {
        let pool = TileGroupDecoder::new(TileDecoderOptions {
            num_threads: 4,
            ..Default::default()
        })?;
        for tile_columns in [1, 3] {
            let frame = frame(192, 128, tile_columns)?;
            let (data, ranges) = encode_tiles(&frame)?;
            let reference = decode(
                &TileGroupDecoder::new(single_threaded())?,
                &frame,
                &data,
                &ranges,
            )?;
            assert_eq!(decode(&pool, &frame, &data, &ranges)?, reference);
        }
        Ok(())
    }
}
