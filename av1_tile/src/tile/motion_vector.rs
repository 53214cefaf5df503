// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

use super::{Block, TileShared, parser::Parser};
use crate::{
    block_parameters::BlockParameters, constants::MotionVectorJoint, frame::MotionVector,
};

const MV_CLASS0_SIZE: i32 = 2;
const MV_COMPONENT_LIMIT: i32 = 1 << 14;
/// Superblock columns an intra block copy source must trail the current
/// block by.
const INTRA_BLOCK_COPY_DELAY_64X64_BLOCKS: i32 = 4;

impl Parser<'_> {
    /// Reads a motion vector difference. `context` is 1 for intra block copy.
    pub(super) fn read_mv(&mut self, context: usize) -> MotionVector {
        let symbol = self.reader.read_symbol(&mut self.context.mv_joint[context]);
        let joint = MotionVectorJoint::try_from(symbol as u8).unwrap_or_default();
        let row = if joint.has_row() {
            self.read_mv_component(context, 0)
        } else {
            0
        };
        let column = if joint.has_column() {
            self.read_mv_component(context, 1)
        } else {
            0
        };
        MotionVector::new(row, column)
    }

    fn read_mv_component(&mut self, context: usize, component: usize) -> i32 {
        let header = self.shared.header();
        let integer = header.integer_mv();
        let high_precision = header.allow_high_precision_mv && !integer;
        let cdf = &mut self.context;
        let negative = self.reader.read_bool(&mut cdf.mv_sign[context][component]);
        let class = self.reader.read_symbol(&mut cdf.mv_class[context][component]);
        let magnitude = if class == 0 {
            let bit = self
                .reader
                .read_bool(&mut cdf.mv_class0_bit[context][component]) as usize;
            let fraction = if integer {
                3
            } else {
                self.reader
                    .read_symbol(&mut cdf.mv_class0_fraction[context][component][bit])
            };
            let hp = if high_precision {
                self.reader
                    .read_bool(&mut cdf.mv_class0_high_precision[context][component])
                    as usize
            } else {
                1
            };
            (((bit << 3) | (fraction << 1) | hp) + 1) as i32
        } else {
            let mut integer_part = 0;
            for i in 0..class {
                let bit = self.reader.read_bool(&mut cdf.mv_bit[context][component][i]);
                integer_part |= (bit as usize) << i;
            }
            let fraction = if integer {
                3
            } else {
                self.reader
                    .read_symbol(&mut cdf.mv_fraction[context][component])
            };
            let hp = if high_precision {
                self.reader
                    .read_bool(&mut cdf.mv_high_precision[context][component]) as usize
            } else {
                1
            };
            (MV_CLASS0_SIZE << (class + 2))
                + (((integer_part << 3) | (fraction << 1) | hp) + 1) as i32
        };
        if negative { -magnitude } else { magnitude }
    }
}

/// Tile bounds and block position an intra block copy vector is checked
/// against, in pixels.
#[derive(Debug, Clone, Copy)]
struct CopyRegion {
    tile_top: i32,
    tile_left: i32,
    tile_bottom: i32,
    tile_right: i32,
    tile_columns4x4: i32,
    use_128x128_superblock: bool,
}

impl CopyRegion {
    fn source_valid(
        &self,
        y: i32,
        x: i32,
        width: i32,
        height: i32,
        mv: MotionVector,
        chroma_offset: (bool, bool),
    ) -> bool {
        if mv.row & 7 != 0 || mv.column & 7 != 0 {
            return false;
        }
        let mut top = y + (mv.row >> 3);
        let mut left = x + (mv.column >> 3);
        let bottom = top + height;
        let right = left + width;
        if chroma_offset.0 {
            left -= 4;
        }
        if chroma_offset.1 {
            top -= 4;
        }
        if top < self.tile_top
            || left < self.tile_left
            || bottom > self.tile_bottom
            || right > self.tile_right
        {
            return false;
        }
        let superblock_log2 = 6 + self.use_128x128_superblock as i32;
        let active_row = y >> superblock_log2;
        let active_column = x >> 6;
        let source_row = (bottom - 1) >> superblock_log2;
        let source_column = (right - 1) >> 6;
        if source_row > active_row {
            return false;
        }
        let blocks_per_row = ((self.tile_columns4x4 - 1) >> 4) + 1;
        let active = active_row * blocks_per_row + active_column;
        let source = source_row * blocks_per_row + source_column;
        if source >= active - INTRA_BLOCK_COPY_DELAY_64X64_BLOCKS {
            return false;
        }
        // Keep the source decodable by a wavefront lagging this many
        // superblock columns per row.
        let gradient =
            1 + INTRA_BLOCK_COPY_DELAY_64X64_BLOCKS + self.use_128x128_superblock as i32;
        let wavefront_offset = gradient * (active_row - source_row);
        source_column < active_column - INTRA_BLOCK_COPY_DELAY_64X64_BLOCKS + wavefront_offset
    }
}

/// Checks the motion vectors of `bp` against the component range and, for
/// intra block copy, against the area that is already decoded.
pub(super) fn is_mv_valid(
    shared: &TileShared,
    block: &Block,
    bp: &BlockParameters,
    use_intra_block_copy: bool,
) -> bool {
    let count = 1 + bp.is_compound() as usize;
    if bp.mv[..count]
        .iter()
        .any(|mv| mv.row.abs() >= MV_COMPONENT_LIMIT || mv.column.abs() >= MV_COMPONENT_LIMIT)
    {
        return false;
    }
    if !use_intra_block_copy {
        return true;
    }
    let sequence = shared.sequence();
    let geometry = &shared.geometry;
    let region = CopyRegion {
        tile_top: 4 * geometry.row4x4_start as i32,
        tile_left: 4 * geometry.column4x4_start as i32,
        tile_bottom: 4 * geometry.row4x4_end as i32,
        tile_right: 4 * geometry.column4x4_end as i32,
        tile_columns4x4: (geometry.column4x4_end - geometry.column4x4_start) as i32,
        use_128x128_superblock: sequence.use_128x128_superblock,
    };
    let (width, height) = (block.size.width() as i32, block.size.height() as i32);
    let chroma_offset = (
        block.has_chroma && width < 8 && sequence.subsampling_x != 0,
        block.has_chroma && height < 8 && sequence.subsampling_y != 0,
    );
    region.source_valid(
        4 * block.row4x4 as i32,
        4 * block.column4x4 as i32,
        width,
        height,
        bp.mv[0],
        chroma_offset,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    fn region(columns4x4: i32) -> CopyRegion {
        CopyRegion {
            tile_top: 0,
            tile_left: 0,
            tile_bottom: 512,
            tile_right: 4 * columns4x4,
            tile_columns4x4: columns4x4,
            use_128x128_superblock: false,
        }
    }

    #[test]
    fn fractional_vectors_are_invalid() {
        let region = region(128);
        let mv = MotionVector::new(-64 * 8 + 4, 0);
        assert!(!region.source_valid(128, 0, 8, 8, mv, (false, false)));
    }

    #[test]
    fn source_must_lie_inside_the_tile() {
        let region = region(128);
        assert!(!region.source_valid(0, 0, 8, 8, MotionVector::new(-8, 0), (false, false)));
        // Chroma of a 4x4 block reaches 4 pixels further left.
        let mv = MotionVector::new(-128 * 8, 0);
        assert!(region.source_valid(128, 4, 4, 4, mv, (false, false)));
        assert!(!region.source_valid(128, 0, 4, 4, mv, (true, false)));
    }

    #[test]
    fn source_must_trail_by_the_delay() {
        let region = region(128);
        // Same superblock row, 4 blocks of 64 to the left is too close.
        let mv = MotionVector::new(0, -256 * 8);
        assert!(!region.source_valid(0, 256, 8, 8, mv, (false, false)));
        // Five blocks to the left is far enough.
        let mv = MotionVector::new(0, -320 * 8);
        assert!(region.source_valid(0, 320, 8, 8, mv, (false, false)));
        // One superblock row up, the wavefront allows sources further right.
        let mv = MotionVector::new(-64 * 8, 0);
        assert!(region.source_valid(64, 0, 8, 8, mv, (false, false)));
    }

    #[test]
    fn source_below_is_invalid() {
        let region = region(128);
        let mv = MotionVector::new(64 * 8, -320 * 8);
        assert!(!region.source_valid(0, 320, 8, 8, mv, (false, false)));
    }
}
