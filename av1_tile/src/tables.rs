// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

use std::sync::OnceLock;

use crate::constants::{NUM_TRANSFORM_SIZES, TransformClass, TransformSize};

/// All-zero context of a luma transform smaller than its block, indexed by
/// the maximum top and left coefficient levels.
pub const ALL_ZERO_CONTEXTS_BY_TOP_LEFT: [[u8; 5]; 5] = [
    [1, 2, 2, 2, 3],
    [2, 4, 4, 4, 5],
    [2, 4, 4, 4, 5],
    [2, 4, 4, 4, 5],
    [3, 5, 5, 5, 6],
];

#[rustfmt::skip]
pub const COEFF_BASE_CONTEXT_OFFSET: [[[u8; 5]; 5]; NUM_TRANSFORM_SIZES] = [
    [[0, 1, 6, 6, 0], [1, 6, 6, 21, 0], [6, 6, 21, 21, 0], [6, 21, 21, 21, 0],
     [0, 0, 0, 0, 0]],
    [[0, 11, 11, 11, 0], [11, 11, 11, 11, 0], [6, 6, 21, 21, 0],
     [6, 21, 21, 21, 0], [21, 21, 21, 21, 0]],
    [[0, 11, 11, 11, 0], [11, 11, 11, 11, 0], [6, 6, 21, 21, 0],
     [6, 21, 21, 21, 0], [21, 21, 21, 21, 0]],
    [[0, 16, 6, 6, 21], [16, 16, 6, 21, 21], [16, 16, 21, 21, 21],
     [16, 16, 21, 21, 21], [0, 0, 0, 0, 0]],
    [[0, 1, 6, 6, 21], [1, 6, 6, 21, 21], [6, 6, 21, 21, 21],
     [6, 21, 21, 21, 21], [21, 21, 21, 21, 21]],
    [[0, 11, 11, 11, 11], [11, 11, 11, 11, 11], [6, 6, 21, 21, 21],
     [6, 21, 21, 21, 21], [21, 21, 21, 21, 21]],
    [[0, 11, 11, 11, 11], [11, 11, 11, 11, 11], [6, 6, 21, 21, 21],
     [6, 21, 21, 21, 21], [21, 21, 21, 21, 21]],
    [[0, 16, 6, 6, 21], [16, 16, 6, 21, 21], [16, 16, 21, 21, 21],
     [16, 16, 21, 21, 21], [0, 0, 0, 0, 0]],
    [[0, 16, 6, 6, 21], [16, 16, 6, 21, 21], [16, 16, 21, 21, 21],
     [16, 16, 21, 21, 21], [16, 16, 21, 21, 21]],
    [[0, 1, 6, 6, 21], [1, 6, 6, 21, 21], [6, 6, 21, 21, 21],
     [6, 21, 21, 21, 21], [21, 21, 21, 21, 21]],
    [[0, 11, 11, 11, 11], [11, 11, 11, 11, 11], [6, 6, 21, 21, 21],
     [6, 21, 21, 21, 21], [21, 21, 21, 21, 21]],
    [[0, 11, 11, 11, 11], [11, 11, 11, 11, 11], [6, 6, 21, 21, 21],
     [6, 21, 21, 21, 21], [21, 21, 21, 21, 21]],
    [[0, 16, 6, 6, 21], [16, 16, 6, 21, 21], [16, 16, 21, 21, 21],
     [16, 16, 21, 21, 21], [16, 16, 21, 21, 21]],
    [[0, 16, 6, 6, 21], [16, 16, 6, 21, 21], [16, 16, 21, 21, 21],
     [16, 16, 21, 21, 21], [16, 16, 21, 21, 21]],
    [[0, 1, 6, 6, 21], [1, 6, 6, 21, 21], [6, 6, 21, 21, 21],
     [6, 21, 21, 21, 21], [21, 21, 21, 21, 21]],
    [[0, 11, 11, 11, 11], [11, 11, 11, 11, 11], [6, 6, 21, 21, 21],
     [6, 21, 21, 21, 21], [21, 21, 21, 21, 21]],
    [[0, 16, 6, 6, 21], [16, 16, 6, 21, 21], [16, 16, 21, 21, 21],
     [16, 16, 21, 21, 21], [16, 16, 21, 21, 21]],
    [[0, 16, 6, 6, 21], [16, 16, 6, 21, 21], [16, 16, 21, 21, 21],
     [16, 16, 21, 21, 21], [16, 16, 21, 21, 21]],
    [[0, 1, 6, 6, 21], [1, 6, 6, 21, 21], [6, 6, 21, 21, 21],
     [6, 21, 21, 21, 21], [21, 21, 21, 21, 21]],
];

/// Base context of one-dimensional transform classes, by position along the
/// transform direction.
pub const COEFF_BASE_POSITION_CONTEXT_OFFSET: [u8; 3] = [26, 31, 36];

/// Deblocking level slot for [plane][vertical = 0 / horizontal = 1].
pub const DEBLOCK_FILTER_LEVEL_INDEX: [[usize; 2]; 3] = [[0, 1], [2, 2], [3, 3]];

fn diagonal_scan(width: usize, height: usize) -> Vec<u16> {
    let mut scan = Vec::with_capacity(width * height);
    for diagonal in 0..(width + height - 1) {
        // Square blocks zig-zag; rectangular ones keep one direction.
        let rows_ascending = if width == height {
            diagonal % 2 == 1
        } else {
            width < height
        };
        let first_row = diagonal.saturating_sub(width - 1);
        let last_row = diagonal.min(height - 1);
        let mut push = |row: usize| {
            let column = diagonal - row;
            scan.push((row * width + column) as u16);
        };
        if rows_ascending {
            (first_row..=last_row).for_each(&mut push);
        } else {
            (first_row..=last_row).rev().for_each(&mut push);
        }
    }
    scan
}

fn row_scan(width: usize, height: usize) -> Vec<u16> {
    (0..(width * height) as u16).collect()
}

fn column_scan(width: usize, height: usize) -> Vec<u16> {
    let mut scan = Vec::with_capacity(width * height);
    for column in 0..width {
        for row in 0..height {
            scan.push((row * width + column) as u16);
        }
    }
    scan
}

fn class_index(class: TransformClass) -> usize {
    match class {
        TransformClass::TwoD => 0,
        TransformClass::Horizontal => 1,
        TransformClass::Vertical => 2,
    }
}

/// Coefficient scan order for an (adjusted) transform size and class.
/// Positions are `row * width + column`.
pub fn scan(tx_size: TransformSize, class: TransformClass) -> &'static [u16] {
    static SCANS: OnceLock<Vec<Vec<u16>>> = OnceLock::new();
    let scans = SCANS.get_or_init(|| {
        let mut scans = Vec::with_capacity(NUM_TRANSFORM_SIZES * 3);
        for size in TransformSize::ALL {
            let (w, h) = (size.width().min(32), size.height().min(32));
            scans.push(diagonal_scan(w, h));
            scans.push(column_scan(w, h));
            scans.push(row_scan(w, h));
        }
        scans
    });
    &scans[tx_size.adjusted() as usize * 3 + class_index(class)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn square_zig_zag() {
        assert_eq!(
            scan(TransformSize::Tx4x4, TransformClass::TwoD),
            [0, 1, 4, 8, 5, 2, 3, 6, 9, 12, 13, 10, 7, 11, 14, 15]
        );
    }

    #[test]
    fn rectangular_diagonals() {
        // 8 wide, 4 tall: every diagonal walks up.
        assert_eq!(
            &scan(TransformSize::Tx8x4, TransformClass::TwoD)[..6],
            [0, 8, 1, 16, 9, 2]
        );
        // 4 wide, 8 tall: every diagonal walks down.
        assert_eq!(
            &scan(TransformSize::Tx4x8, TransformClass::TwoD)[..6],
            [0, 1, 4, 2, 5, 8]
        );
    }

    #[test]
    fn scans_are_permutations() {
        for size in TransformSize::ALL {
            for class in [
                TransformClass::TwoD,
                TransformClass::Horizontal,
                TransformClass::Vertical,
            ] {
                let mut positions = scan(size, class).to_vec();
                let area = size.adjusted().area();
                assert_eq!(positions.len(), area);
                positions.sort_unstable();
                assert!(positions.iter().enumerate().all(|(i, &p)| p as usize == i));
            }
        }
    }

    #[test]
    fn column_scan_for_horizontal_class() {
        assert_eq!(
            &scan(TransformSize::Tx4x4, TransformClass::Horizontal)[..5],
            [0, 4, 8, 12, 1]
        );
        assert_eq!(
            &scan(TransformSize::Tx4x4, TransformClass::Vertical)[..5],
            [0, 1, 2, 3, 4]
        );
    }
}
