// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Pixel kernels, called through a table of function pointers so that
//! callers can substitute optimized versions.

use std::fmt::Debug;

use crate::{
    constants::{FilterIntraPredictor, PredictionMode, TransformSize, TransformType},
    frame_buffer::PlaneBuffer,
};

mod portable;
mod transform;

/// Neighbouring pixels of a block to be intra predicted. Unavailable edges
/// are already filled with their substitutes; the flags only select the DC
/// averaging.
#[derive(Debug, Clone, Copy)]
pub struct IntraEdges<'a> {
    /// Row above the block, extended to the right (`width + height` values).
    pub top: &'a [u16],
    /// Column left of the block, extended downwards (`width + height`
    /// values).
    pub left: &'a [u16],
    pub top_left: u16,
    pub has_top: bool,
    pub has_left: bool,
}

/// Position of a block in a reference plane and the sampling step, in 1/1024
/// pixel units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScaledPosition {
    pub x: i64,
    pub y: i64,
    pub step_x: i64,
    pub step_y: i64,
}

pub type IntraPredictorFn = fn(
    mode: PredictionMode,
    angle_delta: i32,
    edges: &IntraEdges<'_>,
    dst: &mut [u16],
    stride: usize,
    width: usize,
    height: usize,
    bit_depth: u8,
);

pub type FilterIntraPredictorFn = fn(
    mode: FilterIntraPredictor,
    edges: &IntraEdges<'_>,
    dst: &mut [u16],
    stride: usize,
    width: usize,
    height: usize,
    bit_depth: u8,
);

/// Computes the zero-mean luma contribution of a `width` x `height` chroma
/// block. Luma samples beyond `luma_width` x `luma_height` repeat the last
/// row or column.
pub type CflSubsamplerFn = fn(
    luma: &[u16],
    luma_stride: usize,
    luma_width: usize,
    luma_height: usize,
    subsampling_x: u8,
    subsampling_y: u8,
    width: usize,
    height: usize,
    ac: &mut [i32],
);

/// Adds `alpha` times the luma contribution to the DC prediction in `dst`.
pub type CflPredictorFn = fn(
    ac: &[i32],
    alpha: i8,
    dst: &mut [u16],
    stride: usize,
    width: usize,
    height: usize,
    bit_depth: u8,
);

/// Writes `palette[index]` for each entry of the `width` x `height` window of
/// `color_map`.
pub type PalettePredictorFn = fn(
    palette: &[u16],
    color_map: &[u8],
    map_stride: usize,
    dst: &mut [u16],
    stride: usize,
    width: usize,
    height: usize,
);

/// Inverse transforms `coefficients` (row-major, `tx_size` width) and adds
/// the residual to `dst`. `coefficients` may be used as scratch.
pub type InverseTransformAddFn = fn(
    tx_type: TransformType,
    tx_size: TransformSize,
    lossless: bool,
    coefficients: &mut [i32],
    eob: usize,
    dst: &mut [u16],
    stride: usize,
    bit_depth: u8,
);

pub type ConvolveFn = fn(
    reference: &PlaneBuffer,
    position: ScaledPosition,
    width: usize,
    height: usize,
    dst: &mut [u16],
    stride: usize,
);

/// Rounded average of two predictions.
pub type AverageFn = fn(first: &[u16], second: &[u16], dst: &mut [u16]);

#[derive(Clone, Copy)]
pub struct Dsp {
    pub intra_predictor: IntraPredictorFn,
    pub filter_intra_predictor: FilterIntraPredictorFn,
    pub cfl_subsampler: CflSubsamplerFn,
    pub cfl_predictor: CflPredictorFn,
    pub palette_predictor: PalettePredictorFn,
    pub inverse_transform_add: InverseTransformAddFn,
    pub convolve: ConvolveFn,
    pub average: AverageFn,
}

impl Debug for Dsp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Dsp")
    }
}

impl Dsp {
    /// Straightforward kernels. Not bit-exact AV1.
    pub fn portable() -> Dsp {
        Dsp {
            intra_predictor: portable::intra_predictor,
            filter_intra_predictor: portable::filter_intra_predictor,
            cfl_subsampler: portable::cfl_subsampler,
            cfl_predictor: portable::cfl_predictor,
            palette_predictor: portable::palette_predictor,
            inverse_transform_add: transform::inverse_transform_add,
            convolve: portable::convolve,
            average: portable::average,
        }
    }
}

impl Default for Dsp {
    fn default() -> Self {
        Self::portable()
    }
}
