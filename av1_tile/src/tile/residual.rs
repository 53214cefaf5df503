// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Coefficient syntax of one transform block and its dequantization.

use super::{
    Block, TransformBlock,
    entropy_context::EntropyContextDirection,
    parser::{MAX_BLOCK_SIZE4, Parser},
};
use crate::{
    block_parameters::{BlockParameters, PredictionParameters},
    constants::{
        NO_QUANTIZER_MATRIX_LEVEL, PLANE_Y, PlaneType, TransformClass, TransformSet,
        TransformSize, TransformType,
    },
    error::{Error, Result},
    tables::{
        ALL_ZERO_CONTEXTS_BY_TOP_LEFT, COEFF_BASE_CONTEXT_OFFSET,
        COEFF_BASE_POSITION_CONTEXT_OFFSET, scan,
    },
    util::right_shift_with_rounding,
};

/// Levels above this are coded with `coeff_base_range` symbols.
const NUM_BASE_LEVELS: u32 = 2;
/// Levels above this carry a Golomb coded remainder.
const MAX_RANGE_LEVEL: u32 = 14;
const MAX_GOLOMB_LENGTH: u32 = 20;
const COEFF_BASE_RANGE_MAX_ITERATIONS: usize = 4;
const COEFF_BASE_RANGE_CONTEXT_CLAMP: u8 = 12;
const QUANTIZED_PADDING: usize = 4;

/// Dequantizes a coefficient level. The result lies in
/// `[-(max + 1), max]` with `max = (1 << (7 + bit_depth)) - 1`.
pub fn dequantize(level: u32, sign: bool, q: i32, shift: u32, bit_depth: u8) -> i32 {
    let max = (1i32 << (7 + bit_depth)) - 1;
    let value = ((q as i64 * (level & 0xfffff) as i64) & 0xffffff) as i32 >> shift;
    let sign = sign as i32;
    (value - sign).min(max) ^ -sign
}

/// Index into the padded level buffer of scan position `pos`.
fn padded_index(pos: usize, width_log2: usize) -> usize {
    pos + QUANTIZED_PADDING * (pos >> width_log2)
}

fn coeff_base_eob_context(tx_size: TransformSize, index: usize) -> usize {
    if index == 0 {
        return 0;
    }
    let adjusted = tx_size.adjusted();
    let area = adjusted.height() << adjusted.width_log2();
    if index <= area / 8 {
        1
    } else if index <= area / 4 {
        2
    } else {
        3
    }
}

/// Neighbourhood reads of the level buffer around one position.
struct LevelNeighbours<'q> {
    levels: &'q [u8],
    index: usize,
    stride: usize,
}

impl LevelNeighbours<'_> {
    fn at(&self, row: usize, column: usize) -> u8 {
        self.levels[self.index + row * self.stride + column]
    }

    fn sum_clamped(&self, offsets: &[(usize, usize)], clamp: u8) -> usize {
        offsets
            .iter()
            .map(|&(r, c)| self.at(r, c).min(clamp) as usize)
            .sum()
    }
}

fn coeff_base_context(
    levels: &[u8],
    tx_size: TransformSize,
    class: TransformClass,
    width_log2: usize,
    pos: usize,
) -> usize {
    let width = 1 << width_log2;
    let neighbours = LevelNeighbours {
        levels,
        index: padded_index(pos, width_log2),
        stride: width + QUANTIZED_PADDING,
    };
    let (row, column) = (pos >> width_log2, pos & (width - 1));
    match class {
        TransformClass::TwoD => {
            if pos == 0 {
                return 0;
            }
            let sum = neighbours.sum_clamped(&[(0, 1), (1, 0), (1, 1), (0, 2), (2, 0)], 3);
            ((1 + sum) / 2).min(4)
                + COEFF_BASE_CONTEXT_OFFSET[tx_size as usize][row.min(4)][column.min(4)] as usize
        }
        TransformClass::Horizontal => {
            let sum = neighbours.sum_clamped(&[(0, 1), (1, 0), (0, 2), (0, 3), (0, 4)], 3);
            ((1 + sum) / 2).min(4) + COEFF_BASE_POSITION_CONTEXT_OFFSET[column.min(2)] as usize
        }
        TransformClass::Vertical => {
            let sum = neighbours.sum_clamped(&[(0, 1), (1, 0), (2, 0), (3, 0), (4, 0)], 3);
            ((1 + sum) / 2).min(4) + COEFF_BASE_POSITION_CONTEXT_OFFSET[row.min(2)] as usize
        }
    }
}

fn coeff_base_range_context(
    levels: &[u8],
    class: TransformClass,
    width_log2: usize,
    pos: usize,
) -> usize {
    let width = 1 << width_log2;
    let neighbours = LevelNeighbours {
        levels,
        index: padded_index(pos, width_log2),
        stride: width + QUANTIZED_PADDING,
    };
    let (row, column) = (pos >> width_log2, pos & (width - 1));
    let (offsets, near) = match class {
        TransformClass::TwoD => ([(0, 1), (1, 0), (1, 1)], (row | column) < 2),
        TransformClass::Horizontal => ([(0, 1), (1, 0), (0, 2)], column == 0),
        TransformClass::Vertical => ([(0, 1), (1, 0), (2, 0)], row == 0),
    };
    let context = ((1 + neighbours.sum_clamped(&offsets, COEFF_BASE_RANGE_CONTEXT_CLAMP)) / 2).min(6);
    if pos == 0 {
        context
    } else if near {
        context + 7
    } else {
        context + 14
    }
}

/// Range context of the last coefficient, whose neighbours are all zero.
fn coeff_base_range_context_eob(class: TransformClass, width_log2: usize, pos: usize) -> usize {
    if pos == 0 {
        return 0;
    }
    let (row, column) = (pos >> width_log2, pos & ((1 << width_log2) - 1));
    let near = match class {
        TransformClass::TwoD => (row | column) < 2,
        TransformClass::Horizontal => column == 0,
        TransformClass::Vertical => row == 0,
    };
    if near { 7 } else { 14 }
}

impl Parser<'_> {
    /// Reads the coefficients of `tb` into `out`, dequantized and laid out
    /// as a `width x height` array. Returns the end of block and the
    /// transform type; an eob of 0 means the block has no residual.
    pub(super) fn read_coefficients(
        &mut self,
        block: &Block,
        bp: &BlockParameters,
        prediction: &PredictionParameters,
        tb: &TransformBlock,
        out: &mut [i32],
    ) -> Result<(u16, TransformType)> {
        let plane = tb.plane;
        let tx_size = tb.tx_size;
        let (x4, y4) = (tb.start_x >> 2, tb.start_y >> 2);
        let (w4, h4) = (tx_size.width4(), tx_size.height4());
        let tx_context = tx_size.context();
        let context = self.all_zero_context(block, plane, tx_size, x4, y4);
        let all_zero = self
            .reader
            .read_bool(&mut self.context.all_zero[tx_context][context]);
        if all_zero {
            if plane == PLANE_Y {
                self.set_transform_type(block, x4, y4, w4, h4, TransformType::DctDct);
            }
            self.set_entropy_contexts(plane, x4, y4, w4, h4, 0, 0);
            return Ok((0, TransformType::DctDct));
        }
        let area = tx_size.area();
        out[..area].fill(0);
        if plane == PLANE_Y {
            self.read_transform_type(block, bp, prediction, x4, y4, tx_size);
        }
        let tx_type = self.compute_transform_type(block, bp, plane, tx_size, x4, y4);
        let class = tx_type.class();
        let plane_type = PlaneType::from_plane(plane) as usize;
        let eob = self.read_eob(tx_size, plane_type, class);

        let adjusted = tx_size.adjusted();
        let width_log2 = adjusted.width_log2();
        let padded_width = adjusted.width() + QUANTIZED_PADDING;
        let padded_height = adjusted.height() + QUANTIZED_PADDING;
        let mut levels = std::mem::take(&mut self.quantized);
        levels[..padded_width * padded_height].fill(0);
        let scan = scan(tx_size, class);
        let range_context = tx_context.min(3);

        // The last coefficient is non-zero by construction.
        let pos = scan[eob - 1] as usize;
        let context = coeff_base_eob_context(tx_size, eob - 1);
        let mut level = 1 + self
            .reader
            .read_symbol(&mut self.context.coeff_base_eob[tx_context][plane_type][context])
            as u32;
        if level > NUM_BASE_LEVELS {
            let context = coeff_base_range_context_eob(class, width_log2, pos);
            level += self.read_coeff_base_range(range_context, plane_type, context);
        }
        levels[padded_index(pos, width_log2)] = level as u8;

        for i in (0..eob - 1).rev() {
            let pos = scan[i] as usize;
            let context = coeff_base_context(&levels, tx_size, class, width_log2, pos);
            let mut level = self
                .reader
                .read_symbol(&mut self.context.coeff_base[tx_context][plane_type][context])
                as u32;
            if level > NUM_BASE_LEVELS {
                let context = coeff_base_range_context(&levels, class, width_log2, pos);
                level += self.read_coeff_base_range(range_context, plane_type, context);
            }
            levels[padded_index(pos, width_log2)] = level as u8;
        }

        let result = self.read_signs_and_dequantize(
            bp, plane, tx_size, tx_type, x4, y4, &levels, scan, eob, out,
        );
        self.quantized = levels;
        let (coefficient_level, dc_category) = result?;
        self.set_entropy_contexts(
            plane,
            x4,
            y4,
            w4,
            h4,
            coefficient_level.min(4) as u8,
            dc_category,
        );
        Ok((eob as u16, tx_type))
    }

    fn read_eob(&mut self, tx_size: TransformSize, plane_type: usize, class: TransformClass) -> usize {
        let context = (class != TransformClass::TwoD) as usize;
        let cdfs = &mut self.context;
        let symbol = match tx_size.eob_multi_size() {
            0 => self.reader.read_symbol(&mut cdfs.eob_pt_16[plane_type][context]),
            1 => self.reader.read_symbol(&mut cdfs.eob_pt_32[plane_type][context]),
            2 => self.reader.read_symbol(&mut cdfs.eob_pt_64[plane_type][context]),
            3 => self.reader.read_symbol(&mut cdfs.eob_pt_128[plane_type][context]),
            4 => self.reader.read_symbol(&mut cdfs.eob_pt_256[plane_type][context]),
            5 => self.reader.read_symbol(&mut cdfs.eob_pt_512[plane_type]),
            _ => self.reader.read_symbol(&mut cdfs.eob_pt_1024[plane_type]),
        };
        let eob_pt = symbol + 1;
        if eob_pt < 2 {
            return eob_pt;
        }
        let mut eob = (1 << (eob_pt - 2)) + 1;
        if eob_pt >= 3 {
            let extra = self.reader.read_bool(
                &mut self.context.eob_extra[tx_size.context()][plane_type][eob_pt - 3],
            );
            if extra {
                eob += 1 << (eob_pt - 3);
            }
            for i in 1..eob_pt - 2 {
                if self.reader.read_bit() {
                    eob += 1 << (eob_pt - i - 3);
                }
            }
        }
        eob
    }

    fn read_coeff_base_range(&mut self, range_context: usize, plane_type: usize, context: usize) -> u32 {
        let mut level = 0;
        for _ in 0..COEFF_BASE_RANGE_MAX_ITERATIONS {
            let cdf = &mut self.context.coeff_base_range[range_context][plane_type][context];
            let range = self.reader.read_symbol(cdf) as u32;
            level += range;
            if range < 3 {
                break;
            }
        }
        level
    }

    /// Reads the signs and Golomb remainders in scan order and writes the
    /// dequantized values. Returns the sum of levels and the DC category.
    #[allow(clippy::too_many_arguments)]
    fn read_signs_and_dequantize(
        &mut self,
        bp: &BlockParameters,
        plane: usize,
        tx_size: TransformSize,
        tx_type: TransformType,
        x4: usize,
        y4: usize,
        levels: &[u8],
        scan: &[u16],
        eob: usize,
        out: &mut [i32],
    ) -> Result<(u32, i8)> {
        let shared = self.shared.clone();
        let header = shared.header();
        let bit_depth = shared.sequence().bit_depth;
        let plane_type = PlaneType::from_plane(plane);
        let lossless = header.is_lossless(bp.segment_id);
        let qindex = header.segmentation.qindex(bp.segment_id, self.current_qindex);
        let quantizer = shared.frame.quantizer();
        let (dc_q, ac_q) = (quantizer.dc(plane, qindex), quantizer.ac(plane, qindex));
        let matrix_level = header.quantizer.matrix_level[plane];
        let matrix = if header.quantizer.use_matrix
            && (tx_type as u8) < TransformType::IdentityIdentity as u8
            && !lossless
            && matrix_level < NO_QUANTIZER_MATRIX_LEVEL
        {
            shared
                .frame
                .quantizer_tables
                .matrix(matrix_level, plane_type, tx_size.adjusted())
        } else {
            None
        };
        let shift = tx_size.quantization_shift();
        let width_log2 = tx_size.adjusted().width_log2();
        let wide = tx_size.width() == 64;
        let mut coefficient_level = 0u32;
        let mut dc_category = 0i8;
        for (i, &pos) in scan[..eob].iter().enumerate() {
            let pos = pos as usize;
            let mut level = levels[padded_index(pos, width_log2)] as u32;
            if level == 0 {
                continue;
            }
            let sign = if i == 0 {
                let context = self.dc_sign_context(plane, x4, y4, tx_size);
                self.reader
                    .read_bool(&mut self.context.dc_sign[plane_type as usize][context])
            } else {
                self.reader.read_bit()
            };
            if level > MAX_RANGE_LEVEL {
                level += self.read_golomb()?;
            }
            if i == 0 {
                dc_category = if sign { -1 } else { 1 };
            }
            level &= 0xfffff;
            coefficient_level += level;
            let mut q = if i == 0 { dc_q } else { ac_q };
            if let Some(weight) = matrix.and_then(|m| m.get(pos)) {
                q = right_shift_with_rounding(q * *weight as i32, 5);
            }
            let index = if wide { (pos >> 5) * 64 + (pos & 31) } else { pos };
            out[index] = dequantize(level, sign, q, shift, bit_depth);
        }
        Ok((coefficient_level, dc_category))
    }

    /// Remainder of a level past the coded range: `x - 1` where `x` has a
    /// unary coded bit length.
    fn read_golomb(&mut self) -> Result<u32> {
        let mut length = 0;
        loop {
            length += 1;
            if length > MAX_GOLOMB_LENGTH {
                return Err(Error::InvalidGolombLength(length));
            }
            if self.reader.read_bit() {
                break;
            }
        }
        let mut x = 1u32;
        for _ in 0..length - 1 {
            x = (x << 1) | self.reader.read_bit() as u32;
        }
        Ok(x - 1)
    }

    fn dc_sign_context(&self, plane: usize, x4: usize, y4: usize, tx_size: TransformSize) -> usize {
        let top: i32 = self
            .entropy
            .dc_categories(EntropyContextDirection::Top, plane, x4, tx_size.width4())
            .iter()
            .map(|&c| c as i32)
            .sum();
        let left: i32 = self
            .entropy
            .dc_categories(EntropyContextDirection::Left, plane, y4, tx_size.height4())
            .iter()
            .map(|&c| c as i32)
            .sum();
        match (top + left).signum() {
            -1 => 1,
            1 => 2,
            _ => 0,
        }
    }

    fn all_zero_context(
        &self,
        block: &Block,
        plane: usize,
        tx_size: TransformSize,
        x4: usize,
        y4: usize,
    ) -> usize {
        let plane_size = block.plane_size(plane);
        let top_levels =
            self.entropy
                .levels(EntropyContextDirection::Top, plane, x4, tx_size.width4());
        let left_levels =
            self.entropy
                .levels(EntropyContextDirection::Left, plane, y4, tx_size.height4());
        if plane == PLANE_Y {
            if plane_size.width() == tx_size.width() && plane_size.height() == tx_size.height() {
                return 0;
            }
            let top = top_levels.iter().copied().max().unwrap_or(0).min(4);
            let left = left_levels.iter().copied().max().unwrap_or(0).min(4);
            return ALL_ZERO_CONTEXTS_BY_TOP_LEFT[top as usize][left as usize] as usize;
        }
        let top_categories =
            self.entropy
                .dc_categories(EntropyContextDirection::Top, plane, x4, tx_size.width4());
        let left_categories =
            self.entropy
                .dc_categories(EntropyContextDirection::Left, plane, y4, tx_size.height4());
        let top = top_levels.iter().any(|&l| l != 0) || top_categories.iter().any(|&c| c != 0);
        let left = left_levels.iter().any(|&l| l != 0) || left_categories.iter().any(|&c| c != 0);
        let larger_block = plane_size.width() * plane_size.height() > tx_size.area();
        7 + top as usize + left as usize + 3 * larger_block as usize
    }

    #[allow(clippy::too_many_arguments)]
    fn set_entropy_contexts(
        &mut self,
        plane: usize,
        x4: usize,
        y4: usize,
        w4: usize,
        h4: usize,
        level: u8,
        dc_category: i8,
    ) {
        self.entropy
            .set(EntropyContextDirection::Top, plane, x4, w4, level, dc_category);
        self.entropy
            .set(EntropyContextDirection::Left, plane, y4, h4, level, dc_category);
    }

    fn set_transform_type(
        &mut self,
        block: &Block,
        x4: usize,
        y4: usize,
        w4: usize,
        h4: usize,
        tx_type: TransformType,
    ) {
        let (row, column) = (y4 - block.row4x4, x4 - block.column4x4);
        for types in self.transform_types.iter_mut().skip(row).take(h4) {
            let end = (column + w4).min(MAX_BLOCK_SIZE4);
            types[column.min(end)..end].fill(tx_type);
        }
    }

    fn read_transform_type(
        &mut self,
        block: &Block,
        bp: &BlockParameters,
        prediction: &PredictionParameters,
        x4: usize,
        y4: usize,
        tx_size: TransformSize,
    ) {
        let header = self.shared.header();
        let set = TransformSet::new(tx_size, bp.is_inter, header.reduced_tx_set);
        let qindex = header
            .segmentation
            .qindex(bp.segment_id, header.quantizer.base_index as i32);
        let mut tx_type = TransformType::DctDct;
        if set != TransformSet::DctOnly && qindex > 0 {
            let size = tx_size.square_min_index();
            let cdfs = &mut self.context;
            let symbol = if bp.is_inter {
                match set {
                    TransformSet::Inter1 => self.reader.read_symbol(&mut cdfs.inter_tx_type_set1[size]),
                    TransformSet::Inter2 => self.reader.read_symbol(&mut cdfs.inter_tx_type_set2[size]),
                    _ => self.reader.read_symbol(&mut cdfs.inter_tx_type_set3[size]),
                }
            } else {
                let direction = if prediction.use_filter_intra {
                    prediction.filter_intra_mode.intra_predictor()
                } else {
                    bp.y_mode
                } as usize;
                match set {
                    TransformSet::Intra1 => {
                        self.reader
                            .read_symbol(&mut cdfs.intra_tx_type_set1[size][direction])
                    }
                    _ => self
                        .reader
                        .read_symbol(&mut cdfs.intra_tx_type_set2[size][direction]),
                }
            };
            tx_type = set.transform_type(symbol);
        }
        self.set_transform_type(block, x4, y4, tx_size.width4(), tx_size.height4(), tx_type);
    }

    /// Transform type of a transform block at (`x4`, `y4`) of `plane`.
    pub(super) fn compute_transform_type(
        &self,
        block: &Block,
        bp: &BlockParameters,
        plane: usize,
        tx_size: TransformSize,
        x4: usize,
        y4: usize,
    ) -> TransformType {
        let header = self.shared.header();
        if header.is_lossless(bp.segment_id) || tx_size.square_max_index() == 4 {
            return TransformType::DctDct;
        }
        if plane == PLANE_Y {
            return self.transform_types[y4 - block.row4x4][x4 - block.column4x4];
        }
        let set = TransformSet::new(tx_size, bp.is_inter, header.reduced_tx_set);
        let tx_type = if bp.is_inter {
            let (ssx, ssy) = self.shared.sequence().subsampling(plane);
            let x = block.column4x4.max(x4 << ssx) - block.column4x4;
            let y = block.row4x4.max(y4 << ssy) - block.row4x4;
            self.transform_types[y.min(MAX_BLOCK_SIZE4 - 1)][x.min(MAX_BLOCK_SIZE4 - 1)]
        } else {
            bp.uv_mode.transform_type()
        };
        if set.contains(tx_type) {
            tx_type
        } else {
            TransformType::DctDct
        }
    }
}
