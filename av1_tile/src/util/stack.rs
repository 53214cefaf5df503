// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

use crate::error::{Error, Result};

/// Fixed-capacity LIFO used for the heap-free tree walks.
#[derive(Debug)]
pub struct Stack<T: Copy + Default, const N: usize> {
    elements: [T; N],
    len: usize,
}

impl<T: Copy + Default, const N: usize> Default for Stack<T, N> {
    fn default() -> Self {
        Self {
            elements: [T::default(); N],
            len: 0,
        }
    }
}

impl<T: Copy + Default, const N: usize> Stack<T, N> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, value: T) -> Result<()> {
        let slot = self
            .elements
            .get_mut(self.len)
            .ok_or(Error::StackOverflow(N))?;
        *slot = value;
        self.len += 1;
        Ok(())
    }

    pub fn pop(&mut self) -> Option<T> {
        if self.len == 0 {
            return None;
        }
        self.len -= 1;
        Some(self.elements[self.len])
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn len(&self) -> usize {
        self.len
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn lifo() -> Result<()> {
        let mut stack = Stack::<u8, 4>::new();
        stack.push(1)?;
        stack.push(2)?;
        stack.push(3)?;
        assert_eq!(stack.len(), 3);
        assert_eq!(stack.pop(), Some(3));
        assert_eq!(stack.pop(), Some(2));
        assert_eq!(stack.pop(), Some(1));
        assert_eq!(stack.pop(), None);
        assert!(stack.is_empty());
        Ok(())
    }

    #[test]
    fn full_stack_rejects_push() -> Result<()> {
        let mut stack = Stack::<u8, 2>::new();
        stack.push(1)?;
        stack.push(2)?;
        assert!(matches!(stack.push(3), Err(Error::StackOverflow(2))));
        assert_eq!(stack.len(), 2);
        assert_eq!(stack.pop(), Some(2));
        Ok(())
    }
}
