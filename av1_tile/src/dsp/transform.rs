// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Separable inverse transforms evaluated in double precision. Coefficients
//! are eight times the orthonormal transform of the residual.

use std::f64::consts::PI;
use std::sync::OnceLock;

use crate::constants::{Transform1D, TransformSize, TransformType};

const COEFFICIENT_SCALE: f64 = 8.0;
// Sizes 4, 8, 16, 32 and 64.
const NUM_LENGTHS: usize = 5;

fn length_index(n: usize) -> usize {
    n.trailing_zeros() as usize - 2
}

fn dct_sample(n: usize, k: usize, i: usize) -> f64 {
    let alpha = if k == 0 {
        (1.0 / n as f64).sqrt()
    } else {
        (2.0 / n as f64).sqrt()
    };
    alpha * (PI * (2 * i + 1) as f64 * k as f64 / (2 * n) as f64).cos()
}

fn adst_sample(n: usize, k: usize, i: usize) -> f64 {
    (2.0 / n as f64).sqrt() * (PI * (2 * i + 1) as f64 * (2 * k + 1) as f64 / (4 * n) as f64).sin()
}

/// Orthonormal basis of a kernel, `basis[k * n + i]` being sample `i` of
/// frequency `k`.
fn basis(kernel: Transform1D, n: usize) -> &'static [f64] {
    static DCT: OnceLock<[Vec<f64>; NUM_LENGTHS]> = OnceLock::new();
    static ADST: OnceLock<[Vec<f64>; NUM_LENGTHS]> = OnceLock::new();
    let (tables, sample) = match kernel {
        Transform1D::Adst | Transform1D::FlipAdst => {
            (&ADST, adst_sample as fn(usize, usize, usize) -> f64)
        }
        _ => (&DCT, dct_sample as fn(usize, usize, usize) -> f64),
    };
    let tables = tables.get_or_init(|| {
        array_init::array_init(|index| {
            let n = 4 << index;
            (0..n * n).map(|j| sample(n, j / n, j % n)).collect()
        })
    });
    &tables[length_index(n)]
}

/// Inverse of one kernel over `n` samples spaced `step` apart in `data`.
fn inverse_1d(kernel: Transform1D, data: &mut [f64], start: usize, step: usize, n: usize) {
    if kernel == Transform1D::Identity {
        return;
    }
    let matrix = basis(kernel, n);
    let mut out = [0.0f64; 64];
    for k in 0..n {
        let coefficient = data[start + k * step];
        if coefficient == 0.0 {
            continue;
        }
        for (i, value) in out[..n].iter_mut().enumerate() {
            *value += coefficient * matrix[k * n + i];
        }
    }
    if kernel == Transform1D::FlipAdst {
        out[..n].reverse();
    }
    for (i, value) in out[..n].iter().enumerate() {
        data[start + i * step] = *value;
    }
}

fn inverse_walsh_hadamard(coefficients: &mut [i32]) {
    fn pass(values: &mut [i32], start: usize, step: usize, shift: u32) {
        let mut a = values[start] >> shift;
        let mut c = values[start + step] >> shift;
        let mut d = values[start + 2 * step] >> shift;
        let mut b = values[start + 3 * step] >> shift;
        a += c;
        d -= b;
        let e = (a - d) >> 1;
        b = e - b;
        c = e - c;
        a -= b;
        d += c;
        values[start] = a;
        values[start + step] = b;
        values[start + 2 * step] = c;
        values[start + 3 * step] = d;
    }
    for row in 0..4 {
        pass(coefficients, row * 4, 1, 2);
    }
    for column in 0..4 {
        pass(coefficients, column, 4, 0);
    }
}

fn add_clipped(
    residual: impl Fn(usize, usize) -> i32,
    w: usize,
    h: usize,
    dst: &mut [u16],
    stride: usize,
    bit_depth: u8,
) {
    let max = (1i32 << bit_depth) - 1;
    for y in 0..h {
        for (x, pixel) in dst[y * stride..y * stride + w].iter_mut().enumerate() {
            *pixel = (*pixel as i32 + residual(x, y)).clamp(0, max) as u16;
        }
    }
}

pub fn inverse_transform_add(
    tx_type: TransformType,
    tx_size: TransformSize,
    lossless: bool,
    coefficients: &mut [i32],
    eob: usize,
    dst: &mut [u16],
    stride: usize,
    bit_depth: u8,
) {
    if eob == 0 {
        return;
    }
    let (w, h) = (tx_size.width(), tx_size.height());
    if lossless {
        debug_assert_eq!(tx_size, TransformSize::Tx4x4);
        inverse_walsh_hadamard(coefficients);
        add_clipped(|x, y| coefficients[y * 4 + x], 4, 4, dst, stride, bit_depth);
        return;
    }
    let (column_kernel, row_kernel) = tx_type.kernels();
    let mut block: Vec<f64> = coefficients[..w * h].iter().map(|&c| c as f64).collect();
    for y in 0..h {
        inverse_1d(row_kernel, &mut block, y * w, 1, w);
    }
    for x in 0..w {
        inverse_1d(column_kernel, &mut block, x, w, h);
    }
    add_clipped(
        |x, y| (block[y * w + x] / COEFFICIENT_SCALE).round() as i32,
        w,
        h,
        dst,
        stride,
        bit_depth,
    );
}
