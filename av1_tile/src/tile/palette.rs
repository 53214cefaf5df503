// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Palette mode info and color index maps of screen content blocks.

use super::{Block, parser::Parser};
use crate::{
    block_parameters::{BlockParameters, ColorIndexMap, PaletteModeInfo, PredictionParameters},
    constants::{BlockSize, MAX_PALETTE_SIZE, PLANE_U, PLANE_V, PLANE_Y, PlaneType, PredictionMode},
    error::Result,
    util::{ceil_log2, new_filled_vec},
};

/// Neighbours looked at for the color context: left, above-left, above.
const PALETTE_NUM_NEIGHBORS: usize = 3;
const PALETTE_COLOR_HASH_MULTIPLIERS: [usize; PALETTE_NUM_NEIGHBORS] = [1, 2, 2];
/// Color context per hash. Hashes 0, 1, 3 and 4 cannot occur.
const PALETTE_COLOR_CONTEXT: [usize; 9] = [0, 0, 0, 0, 0, 4, 3, 2, 1];

/// Whether blocks of `size` may code a palette.
pub(super) fn palette_allowed(size: BlockSize) -> bool {
    !matches!(
        size,
        BlockSize::Block4x4 | BlockSize::Block4x8 | BlockSize::Block8x4
    ) && size.width() <= 64
        && size.height() <= 64
}

/// Merges two ascending palettes into `cache`, dropping duplicates. Returns
/// the number of colors written.
fn merge_palette_cache(
    above: &[u16],
    left: &[u16],
    cache: &mut [u16; 2 * MAX_PALETTE_SIZE],
) -> usize {
    let mut count = 0;
    let mut push = |color: u16| {
        if count == 0 || cache[count - 1] != color {
            cache[count] = color;
            count += 1;
        }
    };
    let (mut a, mut l) = (0, 0);
    while a < above.len() && l < left.len() {
        if left[l] < above[a] {
            push(left[l]);
            l += 1;
        } else {
            if left[l] == above[a] {
                l += 1;
            }
            push(above[a]);
            a += 1;
        }
    }
    above[a..].iter().chain(&left[l..]).for_each(|&color| push(color));
    count
}

/// Color context of the index at (`row`, `column`) and the order in which
/// the `n` palette entries are ranked by the already coded neighbours.
fn color_context(
    map: &[u8],
    stride: usize,
    row: usize,
    column: usize,
    n: usize,
) -> (usize, [u8; MAX_PALETTE_SIZE]) {
    let mut scores = [0usize; MAX_PALETTE_SIZE];
    let mut order: [u8; MAX_PALETTE_SIZE] = std::array::from_fn(|i| i as u8);
    if column > 0 {
        scores[map[row * stride + column - 1] as usize] += 2;
    }
    if row > 0 && column > 0 {
        scores[map[(row - 1) * stride + column - 1] as usize] += 1;
    }
    if row > 0 {
        scores[map[(row - 1) * stride + column] as usize] += 2;
    }
    for i in 0..PALETTE_NUM_NEIGHBORS {
        let mut best = i;
        for j in i + 1..n {
            if scores[j] > scores[best] {
                best = j;
            }
        }
        if best != i {
            // Move the best entry to `i`, keeping the others in order.
            scores[i..=best].rotate_right(1);
            order[i..=best].rotate_right(1);
        }
    }
    let hash: usize = scores
        .iter()
        .zip(PALETTE_COLOR_HASH_MULTIPLIERS)
        .map(|(score, multiplier)| score * multiplier)
        .sum();
    (PALETTE_COLOR_CONTEXT[hash], order)
}

impl Parser<'_> {
    /// Reads the palette sizes and colors of an intra block. Called after
    /// the luma and chroma modes.
    pub(super) fn read_palette_mode_info(
        &mut self,
        block: &Block,
        bp: &mut BlockParameters,
        above: Option<&BlockParameters>,
        left: Option<&BlockParameters>,
    ) {
        let size_context = block.size.width_log2() + block.size.height_log2() - 6;
        let mut palette = PaletteModeInfo::default();
        if bp.y_mode == PredictionMode::Dc {
            let context = [above, left]
                .iter()
                .flatten()
                .filter(|n| n.palette.size[0] > 0)
                .count();
            let has_palette = self
                .reader
                .read_bool(&mut self.context.palette_y_mode[size_context][context]);
            if has_palette {
                let size = self
                    .reader
                    .read_symbol(&mut self.context.palette_y_size[size_context])
                    + 2;
                palette.size[0] = size as u8;
                self.read_ascending_colors(block, PLANE_Y, size, above, left, &mut palette);
            }
        }
        if block.has_chroma && bp.uv_mode == PredictionMode::Dc {
            let context = (palette.size[0] > 0) as usize;
            let has_palette = self
                .reader
                .read_bool(&mut self.context.palette_uv_mode[context]);
            if has_palette {
                let size = self
                    .reader
                    .read_symbol(&mut self.context.palette_uv_size[size_context])
                    + 2;
                palette.size[1] = size as u8;
                self.read_ascending_colors(block, PLANE_U, size, above, left, &mut palette);
                self.read_v_colors(size, &mut palette.colors[PLANE_V]);
            }
        }
        bp.palette = palette;
    }

    /// Luma or U colors: reused cache entries, then a literal and ascending
    /// deltas.
    fn read_ascending_colors(
        &mut self,
        block: &Block,
        plane: usize,
        size: usize,
        above: Option<&BlockParameters>,
        left: Option<&BlockParameters>,
        palette: &mut PaletteModeInfo,
    ) {
        let bit_depth = self.shared.sequence().bit_depth as u32;
        // Palettes above are only reused within the same 64 pixel row.
        let above = above
            .filter(|_| block.row4x4 % 16 != 0)
            .map_or(&[][..], |n| n.palette.colors(plane));
        let left = left.map_or(&[][..], |n| n.palette.colors(plane));
        let mut cache = [0; 2 * MAX_PALETTE_SIZE];
        let cached = merge_palette_cache(above, left, &mut cache);

        let colors = &mut palette.colors[plane];
        let mut count = 0;
        for &color in &cache[..cached] {
            if count == size {
                break;
            }
            if self.reader.read_bit() {
                colors[count] = color;
                count += 1;
            }
        }
        if count < size {
            colors[count] = self.reader.read_literal(bit_depth) as u16;
            count += 1;
        }
        if count < size {
            // Luma deltas are at least 1, U deltas may be 0.
            let luma = (plane == PLANE_Y) as u32;
            let max = (1u32 << bit_depth) - 1;
            let mut bits = bit_depth - 3 + self.reader.read_literal(2);
            while count < size {
                let delta = self.reader.read_literal(bits) + luma;
                let color = (colors[count - 1] as u32 + delta).min(max);
                colors[count] = color as u16;
                count += 1;
                let range = (1 << bit_depth) - color - luma;
                bits = bits.min(ceil_log2(range));
            }
        }
        colors[..size].sort_unstable();
    }

    /// V colors: literals, or signed deltas that wrap around the sample
    /// range.
    fn read_v_colors(&mut self, size: usize, colors: &mut [u16; MAX_PALETTE_SIZE]) {
        let bit_depth = self.shared.sequence().bit_depth as u32;
        if !self.reader.read_bit() {
            for color in &mut colors[..size] {
                *color = self.reader.read_literal(bit_depth) as u16;
            }
            return;
        }
        let max = 1i32 << bit_depth;
        let bits = bit_depth - 4 + self.reader.read_literal(2);
        colors[0] = self.reader.read_literal(bit_depth) as u16;
        for i in 1..size {
            let mut delta = self.reader.read_literal(bits) as i32;
            if delta != 0 && self.reader.read_bit() {
                delta = -delta;
            }
            let mut value = colors[i - 1] as i32 + delta;
            if value < 0 {
                value += max;
            }
            if value >= max {
                value -= max;
            }
            colors[i] = value.clamp(0, max - 1) as u16;
        }
    }

    /// Reads the color index maps of the planes that use a palette.
    pub(super) fn read_palette_tokens(
        &mut self,
        block: &Block,
        bp: &BlockParameters,
        prediction: &mut PredictionParameters,
    ) -> Result<()> {
        let shared = self.shared.clone();
        let header = shared.header();
        let (width, height) = (block.size.width(), block.size.height());
        let onscreen_width = width.min((header.columns4x4 - block.column4x4) * 4);
        let onscreen_height = height.min((header.rows4x4 - block.row4x4) * 4);
        let size = bp.palette.size;
        if size[0] > 0 {
            prediction.color_index_map[PlaneType::Y as usize] = self.read_color_index_map(
                PlaneType::Y,
                size[0] as usize,
                (width, height),
                (onscreen_width, onscreen_height),
            )?;
        }
        if size[1] > 0 {
            let (ssx, ssy) = shared.sequence().subsampling(PLANE_U);
            let (mut width, mut height) = (width >> ssx, height >> ssy);
            let (mut onscreen_width, mut onscreen_height) =
                (onscreen_width >> ssx, onscreen_height >> ssy);
            // Chroma of 4xN and Nx4 blocks covers the 8 luma pixels.
            if width < 4 {
                width += 2;
                onscreen_width += 2;
            }
            if height < 4 {
                height += 2;
                onscreen_height += 2;
            }
            prediction.color_index_map[PlaneType::Uv as usize] = self.read_color_index_map(
                PlaneType::Uv,
                size[1] as usize,
                (width, height),
                (onscreen_width, onscreen_height),
            )?;
        }
        Ok(())
    }

    /// Reads the visible part of a map in anti-diagonal order and repeats
    /// its last column and row over the rest of the block.
    fn read_color_index_map(
        &mut self,
        plane_type: PlaneType,
        n: usize,
        (width, height): (usize, usize),
        (onscreen_width, onscreen_height): (usize, usize),
    ) -> Result<ColorIndexMap> {
        let mut indices = new_filled_vec(width * height, 0u8)?;
        indices[0] = self.reader.read_non_symmetric(n as u32) as u8;
        for i in 1..onscreen_width + onscreen_height - 1 {
            let first = (i + 1).saturating_sub(onscreen_height);
            for j in (first..=i.min(onscreen_width - 1)).rev() {
                let (row, column) = (i - j, j);
                let (context, order) = color_context(&indices, width, row, column, n);
                let symbol = self.read_color_index(plane_type, n, context);
                indices[row * width + column] = order[symbol];
            }
        }
        for row in indices.chunks_mut(width).take(onscreen_height) {
            let last = row[onscreen_width - 1];
            row[onscreen_width..].fill(last);
        }
        if onscreen_height < height {
            let (visible, hidden) = indices.split_at_mut(onscreen_height * width);
            let last = &visible[(onscreen_height - 1) * width..];
            for row in hidden.chunks_mut(width) {
                row.copy_from_slice(last);
            }
        }
        Ok(ColorIndexMap {
            stride: width,
            indices,
        })
    }

    fn read_color_index(&mut self, plane_type: PlaneType, n: usize, context: usize) -> usize {
        let p = plane_type as usize;
        let cdfs = &mut self.context;
        match n {
            2 => self.reader.read_symbol(&mut cdfs.palette_color_2[p][context]),
            3 => self.reader.read_symbol(&mut cdfs.palette_color_3[p][context]),
            4 => self.reader.read_symbol(&mut cdfs.palette_color_4[p][context]),
            5 => self.reader.read_symbol(&mut cdfs.palette_color_5[p][context]),
            6 => self.reader.read_symbol(&mut cdfs.palette_color_6[p][context]),
            7 => self.reader.read_symbol(&mut cdfs.palette_color_7[p][context]),
            _ => self.reader.read_symbol(&mut cdfs.palette_color_8[p][context]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn allowed_block_sizes() {
        assert!(!palette_allowed(BlockSize::Block4x4));
        assert!(!palette_allowed(BlockSize::Block8x4));
        assert!(palette_allowed(BlockSize::Block8x8));
        assert!(palette_allowed(BlockSize::Block4x16));
        assert!(palette_allowed(BlockSize::Block64x64));
        assert!(!palette_allowed(BlockSize::Block64x128));
    }

    #[test]
    fn cache_merges_without_duplicates() {
        let mut cache = [0; 2 * MAX_PALETTE_SIZE];
        let count = merge_palette_cache(&[10, 20, 30], &[5, 20, 20, 40], &mut cache);
        assert_eq!(&cache[..count], &[5, 10, 20, 30, 40]);
        let count = merge_palette_cache(&[], &[7, 9], &mut cache);
        assert_eq!(&cache[..count], &[7, 9]);
        let count = merge_palette_cache(&[], &[], &mut cache);
        assert_eq!(count, 0);
    }

    #[test]
    fn color_contexts_rank_neighbours() {
        // 2x2 map being coded at (1, 1).
        let map = |left: u8, above_left: u8, above: u8| [above_left, above, left, 0];

        // Only a left neighbour.
        let (context, order) = color_context(&[3, 0], 2, 0, 1, 4);
        assert_eq!(context, 0);
        assert_eq!(&order[..4], &[3, 0, 1, 2]);

        // All three agree.
        let (context, order) = color_context(&map(2, 2, 2), 2, 1, 1, 3);
        assert_eq!(context, 4);
        assert_eq!(&order[..3], &[2, 0, 1]);

        // Left and above agree.
        let (context, order) = color_context(&map(1, 0, 1), 2, 1, 1, 3);
        assert_eq!(context, 3);
        assert_eq!(&order[..3], &[1, 0, 2]);

        // Above-left sides with one of them.
        let (context, order) = color_context(&map(2, 1, 1), 2, 1, 1, 3);
        assert_eq!(context, 2);
        assert_eq!(&order[..3], &[1, 2, 0]);

        // All different; ties keep the lower entry first.
        let (context, order) = color_context(&map(2, 0, 1), 2, 1, 1, 4);
        assert_eq!(context, 1);
        assert_eq!(&order[..4], &[1, 2, 0, 3]);
    }
}
