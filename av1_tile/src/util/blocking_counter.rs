// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

use std::sync::{Condvar, Mutex};

use super::lock;

#[derive(Debug)]
struct CounterState {
    count: usize,
    status: bool,
}

/// Counts down to zero while accumulating a success flag. `wait()` blocks
/// until the count reaches zero and returns whether every decrement reported
/// success.
#[derive(Debug)]
pub struct BlockingCounterWithStatus {
    state: Mutex<CounterState>,
    zero: Condvar,
}

impl BlockingCounterWithStatus {
    pub fn new(count: usize) -> Self {
        Self {
            state: Mutex::new(CounterState {
                count,
                status: true,
            }),
            zero: Condvar::new(),
        }
    }

    pub fn decrement(&self, status: bool) {
        let mut state = lock(&self.state);
        debug_assert!(state.count > 0);
        state.status &= status;
        state.count = state.count.saturating_sub(1);
        if state.count == 0 {
            self.zero.notify_all();
        }
    }

    pub fn wait(&self) -> bool {
        let mut state = lock(&self.state);
        while state.count > 0 {
            state = self
                .zero
                .wait(state)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
        }
        state.status
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread};

    use super::*;
    use test_log::test;

    #[test]
    fn waits_for_all_decrements() {
        let counter = Arc::new(BlockingCounterWithStatus::new(4));
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let counter = counter.clone();
                thread::spawn(move || counter.decrement(i != 2))
            })
            .collect();
        assert!(!counter.wait());
        for handle in handles {
            handle.join().unwrap();
        }
    }

    #[test]
    fn zero_count_does_not_block() {
        assert!(BlockingCounterWithStatus::new(0).wait());
    }
}
