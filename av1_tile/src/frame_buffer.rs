// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

use std::sync::Mutex;

use crate::{
    error::{Error, Result},
    headers::{FrameHeader, SequenceHeader},
    util::{lock, new_filled_vec, tracing_wrappers::*},
};

/// One plane of pixels in a plain buffer. Used for reference frames and
/// snapshots of the frame being decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaneBuffer {
    pub width: usize,
    pub height: usize,
    pub data: Vec<u16>,
}

impl PlaneBuffer {
    pub fn new(width: usize, height: usize, value: u16) -> Result<Self> {
        Ok(PlaneBuffer {
            width,
            height,
            data: new_filled_vec(width * height, value)?,
        })
    }

    pub fn row(&self, y: usize) -> &[u16] {
        &self.data[y * self.width..(y + 1) * self.width]
    }

    /// Pixel at (`x`, `y`) with coordinates clamped to the plane.
    pub fn pixel_clamped(&self, x: isize, y: isize) -> u16 {
        let x = x.clamp(0, self.width as isize - 1) as usize;
        let y = y.clamp(0, self.height as isize - 1) as usize;
        self.data[y * self.width + x]
    }
}

/// A plane of the frame being decoded, split into horizontal stripes of one
/// superblock row each. Every stripe has its own lock and no caller holds
/// two stripe locks at once.
#[derive(Debug)]
pub struct FramePlane {
    width: usize,
    height: usize,
    stride: usize,
    stripe_height: usize,
    stripes: Vec<Mutex<Vec<u16>>>,
}

impl FramePlane {
    fn new(
        width: usize,
        height: usize,
        stride: usize,
        allocated_height: usize,
        stripe_height: usize,
        value: u16,
    ) -> Result<Self> {
        let num_stripes = allocated_height.div_ceil(stripe_height);
        let mut stripes = Vec::new();
        stripes.try_reserve(num_stripes)?;
        for _ in 0..num_stripes {
            stripes.push(Mutex::new(new_filled_vec(stride * stripe_height, value)?));
        }
        Ok(FramePlane {
            width,
            height,
            stride,
            stripe_height,
            stripes,
        })
    }

    /// Visible width.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Visible height.
    pub fn height(&self) -> usize {
        self.height
    }

    /// Width of the allocated area, a multiple of the superblock size.
    pub fn allocated_width(&self) -> usize {
        self.stride
    }

    pub fn allocated_height(&self) -> usize {
        self.stripes.len() * self.stripe_height
    }

    // Visits the stripe pieces of rows `y..y + height`, one lock at a time.
    fn for_each_stripe(
        &self,
        y: usize,
        height: usize,
        mut f: impl FnMut(&mut [u16], usize, usize, usize),
    ) {
        let end = (y + height).min(self.allocated_height());
        let mut row = y;
        while row < end {
            let index = row / self.stripe_height;
            let stripe_start = index * self.stripe_height;
            let rows = (end - row).min(stripe_start + self.stripe_height - row);
            let mut stripe = lock(&self.stripes[index]);
            f(&mut stripe, row - stripe_start, row - y, rows);
            row += rows;
        }
    }

    /// Copies the `width` x `height` region at (`x`, `y`) into `out`, clipped
    /// to the allocated area.
    pub fn read_region(
        &self,
        x: usize,
        y: usize,
        width: usize,
        height: usize,
        out: &mut [u16],
        out_stride: usize,
    ) {
        let width = width.min(self.stride.saturating_sub(x));
        if width == 0 {
            return;
        }
        let stride = self.stride;
        self.for_each_stripe(y, height, |stripe, stripe_row, out_row, rows| {
            for r in 0..rows {
                let src = (stripe_row + r) * stride + x;
                let dst = (out_row + r) * out_stride;
                out[dst..dst + width].copy_from_slice(&stripe[src..src + width]);
            }
        });
    }

    /// Writes `src` to the `width` x `height` region at (`x`, `y`), clipped to
    /// the allocated area.
    pub fn write_region(
        &self,
        x: usize,
        y: usize,
        width: usize,
        height: usize,
        src: &[u16],
        src_stride: usize,
    ) {
        let width = width.min(self.stride.saturating_sub(x));
        if width == 0 {
            return;
        }
        let stride = self.stride;
        self.for_each_stripe(y, height, |stripe, stripe_row, src_row, rows| {
            for r in 0..rows {
                let dst = (stripe_row + r) * stride + x;
                let from = (src_row + r) * src_stride;
                stripe[dst..dst + width].copy_from_slice(&src[from..from + width]);
            }
        });
    }

    /// Copies the visible area.
    pub fn snapshot(&self) -> Result<PlaneBuffer> {
        let mut plane = PlaneBuffer::new(self.width, self.height, 0)?;
        self.read_region(0, 0, self.width, self.height, &mut plane.data, self.width);
        Ok(plane)
    }
}

/// Pixels of the frame being reconstructed.
#[derive(Debug)]
pub struct FrameBuffer {
    planes: Vec<FramePlane>,
    bit_depth: u8,
}

impl FrameBuffer {
    /// Allocates all planes filled with mid-grey.
    pub fn new(sequence: &SequenceHeader, frame: &FrameHeader) -> Result<Self> {
        let superblock = sequence.superblock_size();
        let aligned_width = (frame.columns4x4 * 4).next_multiple_of(superblock);
        let aligned_height = (frame.rows4x4 * 4).next_multiple_of(superblock);
        if aligned_width.checked_mul(aligned_height).is_none_or(|a| a > 1 << 32) {
            return Err(Error::ImageSizeTooLarge(frame.width, frame.height));
        }
        let grey = 1u16 << (sequence.bit_depth - 1);
        let mut planes = Vec::with_capacity(sequence.num_planes());
        for plane in 0..sequence.num_planes() {
            let (ssx, ssy) = sequence.subsampling(plane);
            planes.push(FramePlane::new(
                (frame.width + ssx as usize) >> ssx,
                (frame.height + ssy as usize) >> ssy,
                aligned_width >> ssx,
                aligned_height >> ssy,
                superblock >> ssy,
                grey,
            )?);
        }
        debug!(aligned_width, aligned_height, "allocated frame buffer");
        Ok(FrameBuffer {
            planes,
            bit_depth: sequence.bit_depth,
        })
    }

    pub fn plane(&self, plane: usize) -> &FramePlane {
        &self.planes[plane]
    }

    pub fn num_planes(&self) -> usize {
        self.planes.len()
    }

    pub fn bit_depth(&self) -> u8 {
        self.bit_depth
    }

    /// Copies the visible area of every plane.
    pub fn snapshot(&self) -> Result<Vec<PlaneBuffer>> {
        self.planes.iter().map(FramePlane::snapshot).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    fn buffer(width: usize, height: usize) -> Result<FrameBuffer> {
        let sequence = SequenceHeader::default();
        let header = FrameHeader::key_frame(width, height, &sequence)?;
        FrameBuffer::new(&sequence, &header)
    }

    #[test]
    fn planes_are_superblock_aligned() -> Result<()> {
        let frame = buffer(100, 70)?;
        assert_eq!(frame.num_planes(), 3);
        assert_eq!(frame.plane(0).allocated_width(), 128);
        assert_eq!(frame.plane(0).allocated_height(), 128);
        assert_eq!(frame.plane(1).allocated_width(), 64);
        assert_eq!(frame.plane(1).width(), 50);
        assert_eq!(frame.plane(2).height(), 35);
        Ok(())
    }

    #[test]
    fn regions_cross_stripes() -> Result<()> {
        let frame = buffer(128, 128)?;
        let plane = frame.plane(0);
        let src: Vec<u16> = (0..8 * 20).map(|v| v as u16).collect();
        // Rows 56..76 span the first two stripes.
        plane.write_region(10, 56, 8, 20, &src, 8);
        let mut out = vec![0u16; 8 * 20];
        plane.read_region(10, 56, 8, 20, &mut out, 8);
        assert_eq!(out, src);
        let snapshot = plane.snapshot()?;
        assert_eq!(snapshot.row(64)[10], 64);
        assert_eq!(snapshot.row(0)[0], 128);
        assert_eq!(snapshot.pixel_clamped(-5, 57), 128);
        assert_eq!(snapshot.pixel_clamped(11, 56), 1);
        Ok(())
    }
}
