// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

use std::sync::Arc;

use rand::{Rng, SeedableRng};
use rand_xorshift::XorShiftRng;
use test_log::test;

use super::{
    Block, Tile, entropy_context::EntropyContextDirection, motion_vector::is_mv_valid,
};
use crate::{
    block_parameters::BlockParameters,
    constants::{BlockSize, FrameType, PredictionMode, ReferenceFrameType},
    error::{Error, Result},
    frame::{FrameContext, FrameState, MotionVector, ReferenceFrame},
    frame_buffer::PlaneBuffer,
    headers::{FrameHeader, SequenceHeader},
    symbol_context::SymbolDecoderContext,
    symbol_reader::SymbolReader,
    test_util::{FlatQuantizer, ScriptedSymbols, SymbolPolicy, SymbolWriter, zeros},
    threading::{
        TaskQueue,
        test_queues::{DeferredQueue, InlineQueue},
    },
    util::{BlockingCounterWithStatus, lock},
};

fn key_frame(width: usize, height: usize, loop_filter: bool) -> Result<Arc<FrameContext>> {
    key_frame_with(SequenceHeader::default(), width, height, loop_filter)
}

fn key_frame_with(
    sequence: SequenceHeader,
    width: usize,
    height: usize,
    loop_filter: bool,
) -> Result<Arc<FrameContext>> {
    let mut header = FrameHeader::key_frame(width, height, &sequence)?;
    if loop_filter {
        header.loop_filter.level = [10, 12, 6, 6];
    }
    Ok(Arc::new(FrameContext::new(
        sequence,
        header,
        Arc::new(FlatQuantizer::default()),
    )?))
}

fn random_policy(seed: u64) -> SymbolPolicy {
    let mut rng = XorShiftRng::seed_from_u64(seed);
    Box::new(move |request| rng.random_range(0..request.num_symbols))
}

struct Decoded {
    state: Arc<FrameState>,
    writer: SymbolWriter,
}

/// Decodes tile 0 of `frame` with symbols drawn from `policy`.
fn decode_scripted(
    frame: &Arc<FrameContext>,
    policy: SymbolPolicy,
    queue: Option<Arc<dyn TaskQueue>>,
    build_bit_mask_when_parsing: bool,
) -> Result<Decoded> {
    let state = Arc::new(FrameState::new(frame)?);
    let (script, writer) = ScriptedSymbols::new(policy);
    let tile = Tile::with_reader(
        0,
        frame.clone(),
        state.clone(),
        SymbolReader::scripted(script, true),
        &SymbolDecoderContext::default(),
        queue,
        build_bit_mask_when_parsing,
    )?;
    let counter = Arc::new(BlockingCounterWithStatus::new(1));
    tile.decode(&counter)?;
    assert!(counter.wait());
    let writer = std::mem::take(&mut *lock(&writer));
    Ok(Decoded { state, writer })
}

fn pixels(state: &FrameState) -> Result<Vec<PlaneBuffer>> {
    state.frame_buffer.snapshot()
}

fn block_parameters(frame: &FrameContext, state: &FrameState) -> Vec<Option<BlockParameters>> {
    let header = &frame.frame_header;
    let mut all = vec![];
    for row in 0..header.rows4x4 {
        for column in 0..header.columns4x4 {
            all.push(
                state
                    .block_parameters
                    .find(row, column)
                    .map(|bp| (*bp).clone()),
            );
        }
    }
    all
}

#[test]
fn zero_symbols_decode_one_block() -> Result<()> {
    let frame = key_frame(64, 64, false)?;
    let decoded = decode_scripted(&frame, zeros(), None, true)?;
    let bp = decoded.state.block_parameters.get(15, 15)?;
    assert_eq!(bp.size, BlockSize::Block64x64);
    assert_eq!(bp.y_mode, PredictionMode::Dc);
    assert!(!bp.skip);
    assert!(!bp.is_inter);

    let saved = decoded
        .state
        .take_saved_symbol_context()
        .expect("tile 0 updates the context");
    assert!(saved.skip.iter().all(|cdf| cdf[2] == 0));
    assert!(saved.partition_w64.iter().all(|cdf| cdf[10] == 0));
    assert!(decoded.state.take_saved_symbol_context().is_none());
    Ok(())
}

#[test]
fn skipped_block_keeps_coefficient_cdfs() -> Result<()> {
    let frame = key_frame(64, 64, false)?;
    let mut first_flag = true;
    let policy: SymbolPolicy = Box::new(move |request| {
        if request.adaptive && request.num_symbols == 2 && first_flag {
            first_flag = false;
            1
        } else {
            0
        }
    });
    let decoded = decode_scripted(&frame, policy, None, true)?;
    assert!(decoded.state.block_parameters.get(0, 0)?.skip);

    // Without residual, DC prediction of the first block is mid-grey.
    for plane in pixels(&decoded.state)? {
        assert!(plane.data.iter().all(|&pixel| pixel == 128));
    }

    let saved = decoded
        .state
        .take_saved_symbol_context()
        .expect("tile 0 updates the context");
    let initial = SymbolDecoderContext::default();
    assert_eq!(saved.all_zero, initial.all_zero);
    assert_eq!(saved.eob_pt_1024, initial.eob_pt_1024);
    assert_eq!(saved.coeff_base_eob, initial.coeff_base_eob);
    assert_eq!(saved.coeff_base, initial.coeff_base);
    assert_eq!(saved.dc_sign, initial.dc_sign);
    assert_ne!(saved.skip, initial.skip);
    Ok(())
}

#[test]
fn split_decoding_matches_single_pass() -> Result<()> {
    for seed in 0..4 {
        let frame = key_frame(192, 128, true)?;
        let single = decode_scripted(&frame, random_policy(seed), None, true)?;

        let inline: Arc<dyn TaskQueue> = Arc::new(InlineQueue);
        let split = decode_scripted(&frame, random_policy(seed), Some(inline), false)?;
        assert_eq!(pixels(&single.state)?, pixels(&split.state)?);
        assert_eq!(
            block_parameters(&frame, &single.state),
            block_parameters(&frame, &split.state)
        );
        assert_eq!(
            single.state.take_saved_symbol_context(),
            split.state.take_saved_symbol_context()
        );
    }
    Ok(())
}

#[test]
fn deferred_decode_tasks_finish_the_tile() -> Result<()> {
    let frame = key_frame(192, 128, false)?;
    let single = decode_scripted(&frame, random_policy(7), None, true)?;

    let queue = Arc::new(DeferredQueue::default());
    let state = Arc::new(FrameState::new(&frame)?);
    let (script, _writer) = ScriptedSymbols::new(random_policy(7));
    let tile = Tile::with_reader(
        0,
        frame.clone(),
        state.clone(),
        SymbolReader::scripted(script, true),
        &SymbolDecoderContext::default(),
        Some(queue.clone()),
        true,
    )?;
    assert!(tile.uses_split_decoding());
    let counter = Arc::new(BlockingCounterWithStatus::new(1));
    tile.decode(&counter)?;
    // Only the first superblock can run before anything is decoded.
    assert_eq!(queue.len(), 1);
    queue.run_all();
    assert!(counter.wait());
    assert_eq!(pixels(&single.state)?, pixels(&state)?);
    Ok(())
}

#[test]
fn scripted_symbols_replay_through_arithmetic_decoder() -> Result<()> {
    let frame = key_frame(128, 64, true)?;
    let scripted = decode_scripted(&frame, random_policy(3), None, true)?;
    let data = scripted.writer.finish();

    let state = Arc::new(FrameState::new(&frame)?);
    let tile = Tile::new(
        0,
        frame.clone(),
        state.clone(),
        &data,
        &SymbolDecoderContext::default(),
        None,
        true,
    )?;
    let counter = Arc::new(BlockingCounterWithStatus::new(1));
    tile.decode(&counter)?;
    assert!(counter.wait());
    assert_eq!(pixels(&scripted.state)?, pixels(&state)?);
    assert_eq!(
        block_parameters(&frame, &scripted.state),
        block_parameters(&frame, &state)
    );
    Ok(())
}

#[test]
fn zero_motion_inter_block_copies_reference() -> Result<()> {
    let key = key_frame(64, 64, false)?;
    let decoded = decode_scripted(&key, random_policy(11), None, true)?;
    let reference =
        ReferenceFrame::from_frame_buffer(&decoded.state.frame_buffer, &key.frame_header)?;

    let sequence = SequenceHeader::default();
    let mut header = FrameHeader::key_frame(64, 64, &sequence)?;
    header.frame_type = FrameType::Inter;
    header.order_hint = 1;
    let mut inter = FrameContext::new(sequence, header, Arc::new(FlatQuantizer::default()))?;
    inter.reference_frames[0] = Some(Arc::new(reference.clone()));
    let inter = Arc::new(inter);

    // Skip, then an inter block; every other symbol is 0: LAST, NEWMV with a
    // zero difference.
    let mut flags = 0;
    let policy: SymbolPolicy = Box::new(move |request| {
        if request.adaptive && request.num_symbols == 2 && flags < 2 {
            flags += 1;
            1
        } else {
            0
        }
    });
    let decoded = decode_scripted(&inter, policy, None, true)?;
    let bp = decoded.state.block_parameters.get(0, 0)?;
    assert!(bp.is_inter);
    assert!(bp.skip);
    assert_eq!(bp.size, BlockSize::Block64x64);
    assert_eq!(bp.reference_frame[0], ReferenceFrameType::Last);
    assert_eq!(bp.y_mode, PredictionMode::NewMv);
    assert!(bp.mv[0].is_zero());
    assert_eq!(pixels(&decoded.state)?, reference.planes);
    Ok(())
}

#[test]
fn single_pass_without_queue() -> Result<()> {
    let frame = key_frame(192, 64, false)?;
    let state = Arc::new(FrameState::new(&frame)?);
    let (script, _writer) = ScriptedSymbols::new(zeros());
    let tile = Tile::with_reader(
        0,
        frame,
        state,
        SymbolReader::scripted(script, true),
        &SymbolDecoderContext::default(),
        None,
        true,
    )?;
    assert!(!tile.uses_split_decoding());
    assert_eq!(tile.geometry().superblock_columns, 3);
    Ok(())
}

#[test]
fn one_superblock_column_never_splits() -> Result<()> {
    let frame = key_frame(64, 128, false)?;
    let state = Arc::new(FrameState::new(&frame)?);
    let (script, _writer) = ScriptedSymbols::new(zeros());
    let queue: Arc<dyn TaskQueue> = Arc::new(InlineQueue);
    let tile = Tile::with_reader(
        0,
        frame,
        state,
        SymbolReader::scripted(script, true),
        &SymbolDecoderContext::default(),
        Some(queue),
        true,
    )?;
    assert!(!tile.uses_split_decoding());
    Ok(())
}

#[test]
fn tile_number_out_of_range() -> Result<()> {
    let frame = key_frame(64, 64, false)?;
    let state = Arc::new(FrameState::new(&frame)?);
    let (script, _writer) = ScriptedSymbols::new(zeros());
    let tile = Tile::with_reader(
        1,
        frame,
        state,
        SymbolReader::scripted(script, true),
        &SymbolDecoderContext::default(),
        None,
        true,
    );
    assert!(tile.is_err());
    Ok(())
}

/// Every block skipped; 10-symbol requests (the 16x16 to 64x64 partitions)
/// follow `partitions` and then read 0.
fn partition_policy(partitions: &[usize]) -> SymbolPolicy {
    let mut partitions = partitions.to_vec().into_iter();
    Box::new(move |request| match (request.adaptive, request.num_symbols) {
        (true, 2) => 1,
        (true, 10) => partitions.next().unwrap_or(0),
        _ => 0,
    })
}

#[test]
fn rectangular_transforms_with_top_right_and_bottom_left() -> Result<()> {
    let frame = key_frame(128, 64, false)?;
    // Superblock 0 whole, superblock 1 split into a vertical, a whole, a
    // horizontal and a whole 32x32.
    let partitions = [0, 3, 2, 0, 1, 0];
    let single = decode_scripted(&frame, partition_policy(&partitions), None, true)?;
    let holder = &single.state.block_parameters;
    // Bottom-left of this one is the already decoded superblock 0.
    assert_eq!(holder.get(0, 16)?.size, BlockSize::Block16x32);
    assert_eq!(holder.get(0, 20)?.size, BlockSize::Block16x32);
    assert_eq!(holder.get(0, 24)?.size, BlockSize::Block32x32);
    // Top-right of this one is the 32x32 at (0, 24).
    assert_eq!(holder.get(8, 16)?.size, BlockSize::Block32x16);
    assert_eq!(holder.get(12, 16)?.size, BlockSize::Block32x16);

    let inline: Arc<dyn TaskQueue> = Arc::new(InlineQueue);
    let split = decode_scripted(&frame, partition_policy(&partitions), Some(inline), false)?;
    assert_eq!(pixels(&single.state)?, pixels(&split.state)?);
    assert_eq!(
        block_parameters(&frame, &single.state),
        block_parameters(&frame, &split.state)
    );
    Ok(())
}

/// Splits every partition down to 4x4 and skips every block.
fn split_everything() -> SymbolPolicy {
    Box::new(|request| match (request.adaptive, request.num_symbols) {
        (true, 2) => 1,
        // 8x8, 128x128 and the other partition sizes.
        (true, 4 | 8 | 10) => 3,
        _ => 0,
    })
}

#[test]
fn fully_split_128x128_superblocks() -> Result<()> {
    let sequence = SequenceHeader {
        use_128x128_superblock: true,
        ..SequenceHeader::default()
    };
    let frame = key_frame_with(sequence, 256, 128, false)?;
    let single = decode_scripted(&frame, split_everything(), None, true)?;
    let blocks = block_parameters(&frame, &single.state);
    assert_eq!(blocks.len(), 32 * 64);
    assert!(
        blocks
            .iter()
            .all(|bp| bp.as_ref().map(|bp| bp.size) == Some(BlockSize::Block4x4))
    );

    let inline: Arc<dyn TaskQueue> = Arc::new(InlineQueue);
    let split = decode_scripted(&frame, split_everything(), Some(inline), false)?;
    assert_eq!(pixels(&single.state)?, pixels(&split.state)?);
    assert_eq!(blocks, block_parameters(&frame, &split.state));
    Ok(())
}

#[test]
fn overlong_golomb_prefix_fails_the_tile() -> Result<()> {
    let frame = key_frame(64, 64, false)?;
    // One 64x64 block split into 16x16 transforms. The first coefficient
    // saturates the base and range levels, and the Golomb prefix never ends.
    let policy: SymbolPolicy = Box::new(|request| match (request.adaptive, request.num_symbols) {
        (true, 3 | 4) => request.num_symbols - 1,
        _ => 0,
    });
    let state = Arc::new(FrameState::new(&frame)?);
    let (script, _writer) = ScriptedSymbols::new(policy);
    let tile = Tile::with_reader(
        0,
        frame.clone(),
        state.clone(),
        SymbolReader::scripted(script, true),
        &SymbolDecoderContext::default(),
        None,
        true,
    )?;
    let counter = Arc::new(BlockingCounterWithStatus::new(1));
    let result = tile.decode(&counter);
    assert!(matches!(result, Err(Error::InvalidGolombLength(21))));
    // Exactly one failed decrement; a second one would trip the counter.
    assert!(!counter.wait());
    assert!(state.take_saved_symbol_context().is_none());
    Ok(())
}

#[test]
fn motion_vector_component_range() -> Result<()> {
    let frame = key_frame(64, 64, false)?;
    let state = Arc::new(FrameState::new(&frame)?);
    let (script, _writer) = ScriptedSymbols::new(zeros());
    let tile = Tile::with_reader(
        0,
        frame,
        state,
        SymbolReader::scripted(script, true),
        &SymbolDecoderContext::default(),
        None,
        true,
    )?;
    let shared = &tile.shared;
    let block = Block::new(&shared.geometry, shared.sequence(), 0, 0, BlockSize::Block8x8)?;
    let mut bp = BlockParameters {
        size: BlockSize::Block8x8,
        is_inter: true,
        reference_frame: [ReferenceFrameType::Last, ReferenceFrameType::None],
        ..BlockParameters::default()
    };
    let limit = 1 << 14;
    let cases = [
        (MotionVector::new(limit - 1, 0), true),
        (MotionVector::new(0, limit - 1), true),
        (MotionVector::new(-(limit - 1), -(limit - 1)), true),
        (MotionVector::new(limit, 0), false),
        (MotionVector::new(0, limit), false),
        (MotionVector::new(-limit, 0), false),
        (MotionVector::new(0, -limit), false),
    ];
    for (mv, valid) in cases {
        bp.mv[0] = mv;
        assert_eq!(is_mv_valid(shared, &block, &bp, false), valid, "{mv:?}");
    }

    // The second vector only counts for compound prediction.
    bp.mv = [MotionVector::ZERO, MotionVector::new(-limit, 0)];
    assert!(is_mv_valid(shared, &block, &bp, false));
    bp.reference_frame[1] = ReferenceFrameType::Golden;
    assert!(!is_mv_valid(shared, &block, &bp, false));
    Ok(())
}

#[test]
fn skipped_block_clears_entropy_contexts() -> Result<()> {
    let frame = key_frame(128, 64, false)?;
    let state = Arc::new(FrameState::new(&frame)?);
    // All zero symbols code one non-skipped 64x64 block whose transforms each
    // hold a single positive coefficient.
    let (script, _writer) = ScriptedSymbols::new(zeros());
    let mut tile = Tile::with_reader(
        0,
        frame.clone(),
        state.clone(),
        SymbolReader::scripted(script, true),
        &SymbolDecoderContext::default(),
        None,
        true,
    )?;
    let mut decoder = tile.shared.take_decoder()?;
    tile.parser
        .parse_and_decode_superblock(0, 0, &mut decoder)?;
    assert!(!state.block_parameters.get(0, 0)?.skip);

    let sequence = &frame.sequence_header;
    let (top, left) = (EntropyContextDirection::Top, EntropyContextDirection::Left);
    for plane in 0..sequence.num_planes() {
        let (ssx, ssy) = sequence.subsampling(plane);
        let entropy = &tile.parser.entropy;
        assert!(entropy.levels(left, plane, 0, 16 >> ssy).iter().all(|&l| l == 1));
        assert!(entropy.dc_categories(left, plane, 0, 16 >> ssy).iter().all(|&c| c == 1));
        assert!(entropy.levels(top, plane, 0, 16 >> ssx).iter().all(|&l| l == 1));
    }

    let mut first_flag = true;
    let skip_first: SymbolPolicy = Box::new(move |request| {
        if request.adaptive && request.num_symbols == 2 && first_flag {
            first_flag = false;
            1
        } else {
            0
        }
    });
    let (script, _writer) = ScriptedSymbols::new(skip_first);
    tile.parser.reader = SymbolReader::scripted(script, true);
    tile.parser
        .parse_and_decode_superblock(0, 16, &mut decoder)?;
    assert!(state.block_parameters.get(0, 16)?.skip);

    for plane in 0..sequence.num_planes() {
        let (ssx, ssy) = sequence.subsampling(plane);
        let (x4, width4, height4) = (16 >> ssx, 16 >> ssx, 16 >> ssy);
        let entropy = &tile.parser.entropy;
        assert!(entropy.levels(left, plane, 0, height4).iter().all(|&l| l == 0));
        assert!(entropy.dc_categories(left, plane, 0, height4).iter().all(|&c| c == 0));
        assert!(entropy.levels(top, plane, x4, width4).iter().all(|&l| l == 0));
        assert!(entropy.dc_categories(top, plane, x4, width4).iter().all(|&c| c == 0));
        // Columns of the first superblock keep their contexts.
        assert!(entropy.levels(top, plane, 0, width4).iter().all(|&l| l == 1));
    }
    Ok(())
}

/// Two skipped 64x64 palette blocks with three colors per plane. The second
/// takes colors from the cache built from the first.
fn palette_policy() -> SymbolPolicy {
    let mut bits = vec![];
    let mut push = |value: usize, count: usize| {
        bits.extend((0..count).rev().map(|i| (value >> i) & 1));
    };
    // First block. Luma 40, then deltas of 20 and 10.
    push(40, 8);
    push(0, 2);
    push(19, 5);
    push(9, 5);
    // U 100, then deltas of 10 and 0.
    push(100, 8);
    push(0, 2);
    push(10, 5);
    push(0, 5);
    // V 150, then deltas of -5 and 0.
    push(1, 1);
    push(0, 2);
    push(150, 8);
    push(5, 4);
    push(1, 1);
    push(0, 4);
    // Maps start at luma index 2 and chroma index 0.
    push(0b11, 2);
    push(0, 1);

    // Second block. Luma reuses 40 and 70 and adds 200.
    push(0b101, 3);
    push(200, 8);
    // U reuses 110 and adds 30 and 34.
    push(0b01, 2);
    push(30, 8);
    push(0, 2);
    push(4, 5);
    // V literals.
    push(0, 1);
    push(10, 8);
    push(20, 8);
    push(30, 8);
    // Maps start at luma index 0 and chroma index 1.
    push(0, 1);
    push(0b10, 2);

    let mut bits = bits.into_iter();
    Box::new(move |request| match (request.adaptive, request.num_symbols) {
        (false, _) => bits.next().unwrap_or(0),
        // Skip and both palette flags.
        (true, 2) => 1,
        // Palette sizes of 3.
        (true, 7) => 1,
        _ => 0,
    })
}

#[test]
fn palette_blocks_share_colors_through_the_cache() -> Result<()> {
    let sequence = SequenceHeader::default();
    let mut header = FrameHeader::key_frame(128, 64, &sequence)?;
    header.allow_screen_content_tools = true;
    let frame = Arc::new(FrameContext::new(
        sequence,
        header,
        Arc::new(FlatQuantizer::default()),
    )?);
    let single = decode_scripted(&frame, palette_policy(), None, true)?;

    let first = single.state.block_parameters.get(0, 0)?;
    assert_eq!(first.size, BlockSize::Block64x64);
    assert_eq!(first.palette.size, [3, 3]);
    assert_eq!(first.palette.colors(0), &[40, 60, 70]);
    assert_eq!(first.palette.colors(1), &[100, 110, 110]);
    assert_eq!(first.palette.colors(2), &[150, 145, 145]);
    let second = single.state.block_parameters.get(0, 16)?;
    assert_eq!(second.palette.colors(0), &[40, 70, 200]);
    assert_eq!(second.palette.colors(1), &[30, 34, 110]);
    assert_eq!(second.palette.colors(2), &[10, 20, 30]);

    let planes = pixels(&single.state)?;
    let expected = [(70, 40), (100, 34), (150, 20)];
    for (plane, (left, right)) in planes.iter().zip(expected) {
        let half = plane.width / 2;
        for row in plane.data.chunks(plane.width) {
            assert!(row[..half].iter().all(|&pixel| pixel == left));
            assert!(row[half..].iter().all(|&pixel| pixel == right));
        }
    }

    let inline: Arc<dyn TaskQueue> = Arc::new(InlineQueue);
    let split = decode_scripted(&frame, palette_policy(), Some(inline), false)?;
    assert_eq!(planes, pixels(&split.state)?);
    Ok(())
}
