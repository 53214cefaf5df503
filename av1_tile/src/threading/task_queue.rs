// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Executes tasks on some thread, in no particular order. Scheduling must not
/// run the task on the calling thread while the caller holds locks the task
/// needs; implementations that run inline are only suitable for tests.
pub trait TaskQueue: Send + Sync {
    fn schedule(&self, task: Task);
}

#[cfg(feature = "parallel")]
impl TaskQueue for rayon::ThreadPool {
    fn schedule(&self, task: Task) {
        self.spawn(task);
    }
}

#[cfg(test)]
pub(crate) mod test_queues {
    use std::sync::Mutex;

    use super::*;
    use crate::util::lock;

    /// Runs every task immediately on the scheduling thread.
    #[derive(Debug, Default)]
    pub struct InlineQueue;

    impl TaskQueue for InlineQueue {
        fn schedule(&self, task: Task) {
            task();
        }
    }

    /// Holds tasks until the test runs them, in an order of its choosing.
    #[derive(Default)]
    pub struct DeferredQueue {
        tasks: Mutex<Vec<Task>>,
    }

    impl DeferredQueue {
        pub fn len(&self) -> usize {
            lock(&self.tasks).len()
        }

        /// Runs the most recently scheduled task. Returns false when empty.
        pub fn run_last(&self) -> bool {
            let task = lock(&self.tasks).pop();
            match task {
                Some(task) => {
                    task();
                    true
                }
                None => false,
            }
        }

        /// Runs the oldest task. Returns false when empty.
        pub fn run_first(&self) -> bool {
            let task = {
                let mut tasks = lock(&self.tasks);
                if tasks.is_empty() {
                    None
                } else {
                    Some(tasks.remove(0))
                }
            };
            match task {
                Some(task) => {
                    task();
                    true
                }
                None => false,
            }
        }

        pub fn run_all(&self) {
            while self.run_first() {}
        }
    }

    impl TaskQueue for DeferredQueue {
        fn schedule(&self, task: Task) {
            lock(&self.tasks).push(task);
        }
    }
}
