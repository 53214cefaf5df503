// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

use super::{IntraEdges, ScaledPosition};
use crate::{
    constants::{FilterIntraPredictor, PredictionMode},
    frame_buffer::PlaneBuffer,
};

const ANGLE_STEP: i32 = 3;

fn max_value(bit_depth: u8) -> i32 {
    (1 << bit_depth) - 1
}

fn fill(
    dst: &mut [u16],
    stride: usize,
    width: usize,
    height: usize,
    f: impl Fn(usize, usize) -> i32,
    bit_depth: u8,
) {
    let max = max_value(bit_depth);
    for y in 0..height {
        for (x, pixel) in dst[y * stride..y * stride + width].iter_mut().enumerate() {
            *pixel = f(x, y).clamp(0, max) as u16;
        }
    }
}

fn dc_value(edges: &IntraEdges<'_>, width: usize, height: usize, bit_depth: u8) -> i32 {
    let top: i32 = edges.top[..width].iter().map(|&p| p as i32).sum();
    let left: i32 = edges.left[..height].iter().map(|&p| p as i32).sum();
    match (edges.has_top, edges.has_left) {
        (true, true) => {
            let count = (width + height) as i32;
            (top + left + count / 2) / count
        }
        (true, false) => (top + width as i32 / 2) / width as i32,
        (false, true) => (left + height as i32 / 2) / height as i32,
        (false, false) => 1 << (bit_depth - 1),
    }
}

// Value of an edge at fractional position `pos`, where -1 is the corner.
fn edge_sample(edge: &[u16], top_left: u16, pos: f64) -> f64 {
    let at = |i: isize| -> f64 {
        if i < 0 {
            top_left as f64
        } else {
            edge[(i as usize).min(edge.len() - 1)] as f64
        }
    };
    let base = pos.floor();
    let frac = pos - base;
    let base = base as isize;
    at(base) * (1.0 - frac) + at(base + 1) * frac
}

fn directional(
    angle: i32,
    edges: &IntraEdges<'_>,
    dst: &mut [u16],
    stride: usize,
    width: usize,
    height: usize,
    bit_depth: u8,
) {
    let radians = (angle as f64).to_radians();
    // Direction from a pixel towards its source, y pointing down.
    let (dx, dy) = (radians.cos(), -radians.sin());
    fill(
        dst,
        stride,
        width,
        height,
        |x, y| {
            let (x, y) = (x as f64, y as f64);
            let to_top = if dy < -1e-9 { (y + 1.0) / -dy } else { f64::INFINITY };
            let to_left = if dx < -1e-9 { (x + 1.0) / -dx } else { f64::INFINITY };
            let value = if to_top <= to_left {
                edge_sample(edges.top, edges.top_left, (x + to_top * dx).max(-1.0))
            } else {
                edge_sample(edges.left, edges.top_left, (y + to_left * dy).max(-1.0))
            };
            value.round() as i32
        },
        bit_depth,
    );
}

fn smooth(
    mode: PredictionMode,
    edges: &IntraEdges<'_>,
    dst: &mut [u16],
    stride: usize,
    width: usize,
    height: usize,
    bit_depth: u8,
) {
    let bottom = edges.left[height - 1] as i32;
    let right = edges.top[width - 1] as i32;
    let vertical = |x: usize, y: usize| {
        let weight = (height - y) as i32;
        (edges.top[x] as i32 * weight + bottom * (height as i32 - weight), height as i32)
    };
    let horizontal = |x: usize, y: usize| {
        let weight = (width - x) as i32;
        (edges.left[y] as i32 * weight + right * (width as i32 - weight), width as i32)
    };
    fill(
        dst,
        stride,
        width,
        height,
        |x, y| match mode {
            PredictionMode::SmoothVertical => {
                let (sum, scale) = vertical(x, y);
                (sum + scale / 2) / scale
            }
            PredictionMode::SmoothHorizontal => {
                let (sum, scale) = horizontal(x, y);
                (sum + scale / 2) / scale
            }
            _ => {
                let (v, v_scale) = vertical(x, y);
                let (h, h_scale) = horizontal(x, y);
                let scale = 2 * v_scale * h_scale;
                (v * h_scale + h * v_scale + scale / 2) / scale
            }
        },
        bit_depth,
    );
}

fn paeth(edges: &IntraEdges<'_>, x: usize, y: usize) -> i32 {
    let top = edges.top[x] as i32;
    let left = edges.left[y] as i32;
    let top_left = edges.top_left as i32;
    let base = top + left - top_left;
    let (p_left, p_top, p_top_left) = (
        (base - left).abs(),
        (base - top).abs(),
        (base - top_left).abs(),
    );
    if p_left <= p_top && p_left <= p_top_left {
        left
    } else if p_top <= p_top_left {
        top
    } else {
        top_left
    }
}

pub fn intra_predictor(
    mode: PredictionMode,
    angle_delta: i32,
    edges: &IntraEdges<'_>,
    dst: &mut [u16],
    stride: usize,
    width: usize,
    height: usize,
    bit_depth: u8,
) {
    match mode {
        PredictionMode::Dc | PredictionMode::ChromaFromLuma => {
            let dc = dc_value(edges, width, height, bit_depth);
            fill(dst, stride, width, height, |_, _| dc, bit_depth);
        }
        PredictionMode::Paeth => fill(
            dst,
            stride,
            width,
            height,
            |x, y| paeth(edges, x, y),
            bit_depth,
        ),
        PredictionMode::Smooth
        | PredictionMode::SmoothVertical
        | PredictionMode::SmoothHorizontal => {
            smooth(mode, edges, dst, stride, width, height, bit_depth)
        }
        _ => {
            let angle = mode.base_angle() + angle_delta * ANGLE_STEP;
            match angle {
                90 => fill(dst, stride, width, height, |x, _| edges.top[x] as i32, bit_depth),
                180 => fill(dst, stride, width, height, |_, y| edges.left[y] as i32, bit_depth),
                _ => directional(angle, edges, dst, stride, width, height, bit_depth),
            }
        }
    }
}

pub fn filter_intra_predictor(
    mode: FilterIntraPredictor,
    edges: &IntraEdges<'_>,
    dst: &mut [u16],
    stride: usize,
    width: usize,
    height: usize,
    bit_depth: u8,
) {
    let mode = match mode {
        FilterIntraPredictor::Paeth => PredictionMode::Paeth,
        other => other.intra_predictor(),
    };
    intra_predictor(mode, 0, edges, dst, stride, width, height, bit_depth);
}

pub fn cfl_subsampler(
    luma: &[u16],
    luma_stride: usize,
    luma_width: usize,
    luma_height: usize,
    subsampling_x: u8,
    subsampling_y: u8,
    width: usize,
    height: usize,
    ac: &mut [i32],
) {
    // Sums are scaled to eight times the luma value.
    let shift = 3 - subsampling_x - subsampling_y;
    for y in 0..height {
        for x in 0..width {
            let mut sum = 0;
            for dy in 0..=subsampling_y as usize {
                for dx in 0..=subsampling_x as usize {
                    let ly = ((y << subsampling_y) + dy).min(luma_height - 1);
                    let lx = ((x << subsampling_x) + dx).min(luma_width - 1);
                    sum += luma[ly * luma_stride + lx] as i32;
                }
            }
            ac[y * width + x] = sum << shift;
        }
    }
    let count = (width * height) as i32;
    let average = (ac[..width * height].iter().sum::<i32>() + count / 2) / count;
    for value in ac[..width * height].iter_mut() {
        *value -= average;
    }
}

pub fn cfl_predictor(
    ac: &[i32],
    alpha: i8,
    dst: &mut [u16],
    stride: usize,
    width: usize,
    height: usize,
    bit_depth: u8,
) {
    let max = max_value(bit_depth);
    for y in 0..height {
        for (x, pixel) in dst[y * stride..y * stride + width].iter_mut().enumerate() {
            let scaled = alpha as i32 * ac[y * width + x];
            let offset = if scaled < 0 {
                -((-scaled + 32) >> 6)
            } else {
                (scaled + 32) >> 6
            };
            *pixel = (*pixel as i32 + offset).clamp(0, max) as u16;
        }
    }
}

pub fn palette_predictor(
    palette: &[u16],
    color_map: &[u8],
    map_stride: usize,
    dst: &mut [u16],
    stride: usize,
    width: usize,
    height: usize,
) {
    for (row, indices) in dst
        .chunks_mut(stride)
        .zip(color_map.chunks(map_stride))
        .take(height)
    {
        for (pixel, &index) in row[..width].iter_mut().zip(&indices[..width]) {
            *pixel = palette[index as usize];
        }
    }
}

pub fn convolve(
    reference: &PlaneBuffer,
    position: ScaledPosition,
    width: usize,
    height: usize,
    dst: &mut [u16],
    stride: usize,
) {
    const BITS: u32 = 10;
    const ONE: i64 = 1 << BITS;
    for y in 0..height {
        let py = position.y + y as i64 * position.step_y;
        let (iy, fy) = ((py >> BITS) as isize, py & (ONE - 1));
        for x in 0..width {
            let px = position.x + x as i64 * position.step_x;
            let (ix, fx) = ((px >> BITS) as isize, px & (ONE - 1));
            let sample = |dx: isize, dy: isize| reference.pixel_clamped(ix + dx, iy + dy) as i64;
            let top = sample(0, 0) * (ONE - fx) + sample(1, 0) * fx;
            let bottom = sample(0, 1) * (ONE - fx) + sample(1, 1) * fx;
            let value = (top * (ONE - fy) + bottom * fy + (1 << (2 * BITS - 1))) >> (2 * BITS);
            dst[y * stride + x] = value as u16;
        }
    }
}

pub fn average(first: &[u16], second: &[u16], dst: &mut [u16]) {
    for ((out, &a), &b) in dst.iter_mut().zip(first).zip(second) {
        *out = ((a as u32 + b as u32 + 1) >> 1) as u16;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    fn edges<'a>(top: &'a [u16], left: &'a [u16], top_left: u16) -> IntraEdges<'a> {
        IntraEdges {
            top,
            left,
            top_left,
            has_top: true,
            has_left: true,
        }
    }

    #[test]
    fn palette_maps_a_window_of_indices() {
        let palette = [5u16, 60, 255];
        // 4x2 map, predicting its right 2x2 window.
        let map = [0u8, 0, 1, 2, 2, 2, 0, 1];
        let mut dst = [9u16; 6];
        palette_predictor(&palette, &map[2..], 4, &mut dst, 3, 2, 2);
        assert_eq!(dst, [60, 255, 9, 5, 60, 9]);
    }

    #[test]
    fn dc_uses_available_edges() {
        let top = [10u16; 8];
        let left = [30u16; 8];
        let mut dst = [0u16; 16];
        let mut e = edges(&top, &left, 0);
        intra_predictor(PredictionMode::Dc, 0, &e, &mut dst, 4, 4, 4, 8);
        assert!(dst.iter().all(|&p| p == 20));
        e.has_left = false;
        intra_predictor(PredictionMode::Dc, 0, &e, &mut dst, 4, 4, 4, 8);
        assert!(dst.iter().all(|&p| p == 10));
        e.has_top = false;
        intra_predictor(PredictionMode::Dc, 0, &e, &mut dst, 4, 4, 4, 10);
        assert!(dst.iter().all(|&p| p == 512));
    }

    #[test]
    fn vertical_and_horizontal_copy_edges() {
        let top: Vec<u16> = (0..8).collect();
        let left: Vec<u16> = (100..108).collect();
        let e = edges(&top, &left, 50);
        let mut dst = [0u16; 16];
        intra_predictor(PredictionMode::Vertical, 0, &e, &mut dst, 4, 4, 4, 8);
        assert_eq!(&dst[12..16], &[0, 1, 2, 3]);
        intra_predictor(PredictionMode::Horizontal, 0, &e, &mut dst, 4, 4, 4, 8);
        assert_eq!(&dst[8..12], &[102; 4]);
    }

    #[test]
    fn d45_reads_top_right() {
        let top: Vec<u16> = (0..8).map(|v| v * 10).collect();
        let left = [0u16; 8];
        let e = edges(&top, &left, 0);
        let mut dst = [0u16; 16];
        intra_predictor(PredictionMode::D45, 0, &e, &mut dst, 4, 4, 4, 8);
        // Pixel (x, y) projects onto top[x + y + 1].
        assert_eq!(dst[0], 10);
        assert_eq!(dst[4 + 1], 30);
        assert_eq!(dst[12 + 3], 70);
    }

    #[test]
    fn paeth_picks_closest() {
        let top = [100u16; 4];
        let left = [20u16; 4];
        let e = edges(&top, &left, 100);
        let mut dst = [0u16; 4];
        intra_predictor(PredictionMode::Paeth, 0, &e, &mut dst, 2, 2, 2, 8);
        assert_eq!(dst, [20; 4]);
    }

    #[test]
    fn cfl_is_zero_mean() {
        let luma: Vec<u16> = (0..64).map(|v| (v * 3) as u16).collect();
        let mut ac = [0i32; 16];
        cfl_subsampler(&luma, 8, 8, 8, 1, 1, 4, 4, &mut ac);
        assert!(ac.iter().sum::<i32>().abs() < 16);
        assert!(ac[15] > ac[0]);
        let mut dst = [128u16; 16];
        cfl_predictor(&ac, 0, &mut dst, 4, 4, 4, 8);
        assert_eq!(dst, [128; 16]);
    }

    #[test]
    fn convolve_integer_and_half_positions() {
        let mut plane = PlaneBuffer::new(4, 1, 0).unwrap();
        plane.data.copy_from_slice(&[0, 100, 200, 40]);
        let mut dst = [0u16; 3];
        let full = ScaledPosition {
            x: 1 << 10,
            y: 0,
            step_x: 1 << 10,
            step_y: 1 << 10,
        };
        convolve(&plane, full, 3, 1, &mut dst, 3);
        assert_eq!(dst, [100, 200, 40]);
        let half = ScaledPosition { x: 512, ..full };
        convolve(&plane, half, 3, 1, &mut dst, 3);
        assert_eq!(dst, [50, 150, 120]);
    }

    #[test]
    fn average_rounds_up() {
        let mut dst = [0u16; 2];
        average(&[1, 10], &[2, 20], &mut dst);
        assert_eq!(dst, [2, 15]);
    }
}
