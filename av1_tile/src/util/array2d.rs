// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

use std::ops::{Index, IndexMut};

use crate::error::Result;

use super::new_filled_vec;

/// Row-major 2D array. `array[row]` yields a row slice.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Array2D<T> {
    rows: usize,
    columns: usize,
    data: Vec<T>,
}

impl<T: Clone> Array2D<T> {
    pub fn new_filled(rows: usize, columns: usize, value: T) -> Result<Self> {
        Ok(Self {
            rows,
            columns,
            data: new_filled_vec(rows * columns, value)?,
        })
    }

    /// Sets the `width` x `height` region at (`row`, `column`) to `value`,
    /// clipped to the array bounds.
    pub fn fill_region(&mut self, row: usize, column: usize, height: usize, width: usize, value: T) {
        let row_end = (row + height).min(self.rows);
        let column_end = (column + width).min(self.columns);
        if column >= column_end {
            return;
        }
        for r in row..row_end {
            self[r][column..column_end].fill(value.clone());
        }
    }

    pub fn fill(&mut self, value: T) {
        self.data.fill(value);
    }
}

impl<T: Clone + Default> Array2D<T> {
    pub fn new(rows: usize, columns: usize) -> Result<Self> {
        Self::new_filled(rows, columns, T::default())
    }
}

impl<T> Array2D<T> {
    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn columns(&self) -> usize {
        self.columns
    }

    pub fn get(&self, row: usize, column: usize) -> Option<&T> {
        if row >= self.rows || column >= self.columns {
            return None;
        }
        self.data.get(row * self.columns + column)
    }

    pub fn get_mut(&mut self, row: usize, column: usize) -> Option<&mut T> {
        if row >= self.rows || column >= self.columns {
            return None;
        }
        self.data.get_mut(row * self.columns + column)
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }
}

impl<T> Index<usize> for Array2D<T> {
    type Output = [T];

    fn index(&self, row: usize) -> &[T] {
        &self.data[row * self.columns..(row + 1) * self.columns]
    }
}

impl<T> IndexMut<usize> for Array2D<T> {
    fn index_mut(&mut self, row: usize) -> &mut [T] {
        &mut self.data[row * self.columns..(row + 1) * self.columns]
    }
}
