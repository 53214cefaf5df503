// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

use crate::{
    constants::MAX_PLANES,
    error::Result,
    util::new_filled_vec,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntropyContextDirection {
    Top = 0,
    Left = 1,
}

/// Coefficient level and DC sign category of the transform blocks bordering
/// the next block, per 4x4 column (top) and row (left) of each plane.
#[derive(Debug)]
pub struct EntropyContext {
    levels: [[Vec<u8>; MAX_PLANES]; 2],
    dc_categories: [[Vec<i8>; MAX_PLANES]; 2],
    /// Number of valid entries per direction and plane.
    limits: [[usize; MAX_PLANES]; 2],
}

impl EntropyContext {
    /// Sized for a frame of `columns4x4` x `rows4x4` luma 4x4 blocks.
    pub fn new(
        columns4x4: usize,
        rows4x4: usize,
        subsampling: [(u8, u8); MAX_PLANES],
    ) -> Result<Self> {
        let mut limits = [[0; MAX_PLANES]; 2];
        for (plane, &(ssx, ssy)) in subsampling.iter().enumerate() {
            limits[0][plane] = columns4x4.div_ceil(1 << ssx);
            limits[1][plane] = rows4x4.div_ceil(1 << ssy);
        }
        let levels = [
            [
                new_filled_vec(limits[0][0], 0)?,
                new_filled_vec(limits[0][1], 0)?,
                new_filled_vec(limits[0][2], 0)?,
            ],
            [
                new_filled_vec(limits[1][0], 0)?,
                new_filled_vec(limits[1][1], 0)?,
                new_filled_vec(limits[1][2], 0)?,
            ],
        ];
        let dc_categories = [
            [
                new_filled_vec(limits[0][0], 0)?,
                new_filled_vec(limits[0][1], 0)?,
                new_filled_vec(limits[0][2], 0)?,
            ],
            [
                new_filled_vec(limits[1][0], 0)?,
                new_filled_vec(limits[1][1], 0)?,
                new_filled_vec(limits[1][2], 0)?,
            ],
        ];
        Ok(EntropyContext {
            levels,
            dc_categories,
            limits,
        })
    }

    fn range(
        &self,
        direction: EntropyContextDirection,
        plane: usize,
        start: usize,
        count: usize,
    ) -> std::ops::Range<usize> {
        let limit = self.limits[direction as usize][plane];
        let start = start.min(limit);
        start..(start + count).min(limit)
    }

    /// Levels of `count` entries from `start`, clipped to the frame.
    pub fn levels(
        &self,
        direction: EntropyContextDirection,
        plane: usize,
        start: usize,
        count: usize,
    ) -> &[u8] {
        let range = self.range(direction, plane, start, count);
        &self.levels[direction as usize][plane][range]
    }

    pub fn dc_categories(
        &self,
        direction: EntropyContextDirection,
        plane: usize,
        start: usize,
        count: usize,
    ) -> &[i8] {
        let range = self.range(direction, plane, start, count);
        &self.dc_categories[direction as usize][plane][range]
    }

    pub fn set(
        &mut self,
        direction: EntropyContextDirection,
        plane: usize,
        start: usize,
        count: usize,
        level: u8,
        dc_category: i8,
    ) {
        let range = self.range(direction, plane, start, count);
        self.levels[direction as usize][plane][range.clone()].fill(level);
        self.dc_categories[direction as usize][plane][range].fill(dc_category);
    }

    pub fn clear(
        &mut self,
        direction: EntropyContextDirection,
        plane: usize,
        start: usize,
        count: usize,
    ) {
        self.set(direction, plane, start, count, 0, 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn ranges_are_clipped_per_plane() -> Result<()> {
        let mut context = EntropyContext::new(10, 6, [(0, 0), (1, 1), (1, 1)])?;
        context.set(EntropyContextDirection::Top, 0, 8, 4, 3, -1);
        assert_eq!(context.levels(EntropyContextDirection::Top, 0, 6, 8), [0, 0, 3, 3]);
        assert_eq!(context.dc_categories(EntropyContextDirection::Top, 0, 9, 1), [-1]);
        context.set(EntropyContextDirection::Left, 1, 1, 8, 4, 1);
        assert_eq!(context.levels(EntropyContextDirection::Left, 1, 0, 8), [0, 4, 4]);
        context.clear(EntropyContextDirection::Left, 1, 2, 1);
        assert_eq!(context.levels(EntropyContextDirection::Left, 1, 0, 3), [0, 4, 0]);
        assert!(context.levels(EntropyContextDirection::Left, 2, 5, 2).is_empty());
        Ok(())
    }
}
