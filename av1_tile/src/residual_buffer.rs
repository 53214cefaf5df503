// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Storage handing parsed coefficients from the parse pass to the decode
//! pass of a superblock.

use std::collections::VecDeque;
use std::sync::Mutex;

use crate::{
    constants::TransformType,
    error::Result,
    headers::SequenceHeader,
    util::{TryWithCapacity, lock},
};

/// What decode needs to reconstruct one transform block besides its
/// coefficients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransformParameters {
    pub eob: u16,
    pub tx_type: TransformType,
}

/// FIFO of transform parameters, pushed in parse order and popped in the
/// same order by decode.
#[derive(Debug, Default)]
pub struct TransformParameterQueue {
    entries: VecDeque<TransformParameters>,
}

impl TransformParameterQueue {
    pub fn push(&mut self, eob: u16, tx_type: TransformType) {
        self.entries.push_back(TransformParameters { eob, tx_type });
    }

    pub fn pop(&mut self) -> Option<TransformParameters> {
        self.entries.pop_front()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Dequantized coefficients of every transform block of one superblock with
/// a non-zero eob, packed back to back.
#[derive(Debug, Default)]
pub struct ResidualBuffer {
    pub coefficients: Vec<i32>,
    pub queue: TransformParameterQueue,
}

impl ResidualBuffer {
    fn with_capacity(capacity: usize) -> Result<Self> {
        Ok(ResidualBuffer {
            coefficients: Vec::try_with_capacity(capacity)?,
            queue: TransformParameterQueue::default(),
        })
    }

    pub fn clear(&mut self) {
        self.coefficients.clear();
        self.queue.clear();
    }
}

/// Recycles residual buffers between superblocks. A buffer has exactly one
/// owner at a time: it is taken for parse, moves with the parsed superblock
/// to decode, and is released afterwards.
#[derive(Debug)]
pub struct ResidualBufferPool {
    free: Mutex<Vec<ResidualBuffer>>,
    capacity: usize,
}

impl ResidualBufferPool {
    pub fn new(sequence: &SequenceHeader) -> Self {
        let luma = sequence.superblock_size() * sequence.superblock_size();
        let chroma = if sequence.num_planes() > 1 {
            2 * (luma >> (sequence.subsampling_x + sequence.subsampling_y))
        } else {
            0
        };
        ResidualBufferPool {
            free: Mutex::new(vec![]),
            capacity: luma + chroma,
        }
    }

    /// Coefficients a superblock can hold at most.
    #[cfg(test)]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn get(&self) -> Result<ResidualBuffer> {
        match lock(&self.free).pop() {
            Some(buffer) => Ok(buffer),
            None => ResidualBuffer::with_capacity(self.capacity),
        }
    }

    pub fn release(&self, mut buffer: ResidualBuffer) {
        buffer.clear();
        lock(&self.free).push(buffer);
    }

    #[cfg(test)]
    pub fn num_free(&self) -> usize {
        lock(&self.free).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn queue_is_fifo() {
        let mut queue = TransformParameterQueue::default();
        queue.push(3, TransformType::AdstDct);
        queue.push(0, TransformType::DctDct);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop().map(|p| p.eob), Some(3));
        assert_eq!(
            queue.pop(),
            Some(TransformParameters {
                eob: 0,
                tx_type: TransformType::DctDct
            })
        );
        assert!(queue.pop().is_none());
    }

    #[test]
    fn pool_recycles_cleared_buffers() -> Result<()> {
        let pool = ResidualBufferPool::new(&SequenceHeader::default());
        assert_eq!(pool.capacity(), 64 * 64 * 3 / 2);
        let mut buffer = pool.get()?;
        buffer.coefficients.extend([1, 2, 3]);
        buffer.queue.push(3, TransformType::DctDct);
        pool.release(buffer);
        assert_eq!(pool.num_free(), 1);
        let buffer = pool.get()?;
        assert!(buffer.coefficients.is_empty() && buffer.queue.is_empty());
        assert!(buffer.coefficients.capacity() >= pool.capacity());
        assert_eq!(pool.num_free(), 0);
        Ok(())
    }
}
