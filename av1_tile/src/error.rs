// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

use std::collections::TryReserveError;

use thiserror::Error;

use crate::constants::{BlockSize, Partition};

#[derive(Error, Debug)]
pub enum Error {
    // Stream corruption.
    #[error("Invalid golomb code: length prefix {0} exceeds 20 bits")]
    InvalidGolombLength(u32),
    #[error("Invalid partition {1:?} for block size {0:?}")]
    InvalidPartition(BlockSize, Partition),
    #[error("Block size {0:?} has no residual size with subsampling {1}x{2}")]
    InvalidPlaneResidualSize(BlockSize, u8, u8),
    #[error("Invalid transform size {0}x{1}")]
    InvalidTransformSize(usize, usize),
    #[error("Invalid motion vector ({0}, {1})")]
    InvalidMotionVector(i32, i32),
    #[error("Invalid enum value {0} for {1}")]
    InvalidEnum(u32, &'static str),
    #[error("Residual of superblock exhausted before its last transform block")]
    ResidualUnderflow,
    #[error("Reference frame {0} is not available")]
    MissingReferenceFrame(usize),
    #[error("Tree walk needs more than {0} stack entries")]
    StackOverflow(usize),
    // Caller supplied parameters.
    #[error("Invalid tile layout: {0}")]
    InvalidTileLayout(&'static str),
    #[error("Tile {0} payload range {1}..{2} exceeds {3} bytes of data")]
    TileDataOutOfBounds(usize, usize, usize, usize),
    #[error("Unsupported bit depth {0}")]
    UnsupportedBitDepth(u8),
    #[error("Unsupported subsampling {0}x{1}")]
    UnsupportedSubsampling(u8, u8),
    #[error("Image size too large: {0}x{1}")]
    ImageSizeTooLarge(usize, usize),
    // Resources and threading.
    #[error("Out of memory: {0}")]
    OutOfMemory(#[from] TryReserveError),
    #[error("Could not create thread pool: {0}")]
    ThreadPoolCreation(String),
    #[error("Decoding of tile {0} failed")]
    TileDecodeFailed(usize),
    #[error("{0} of {1} tiles failed to decode")]
    FrameDecodeFailed(usize, usize),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
