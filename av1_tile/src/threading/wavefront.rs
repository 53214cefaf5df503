// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Wavefront scheduling of a grid of cells: a producer marks cells as
//! parsed in raster order, and a cell runs once its left neighbour and its
//! top-right neighbour `lag` columns ahead are done.

use std::sync::{Arc, Mutex};

use super::TaskQueue;
use crate::{
    error::Result,
    util::{Array2D, lock, tracing_wrappers::*},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SuperBlockState {
    #[default]
    None,
    Parsed,
    Scheduled,
    Decoded,
}

/// Work done per cell.
pub trait WavefrontJob: Send + Sync + 'static {
    /// Processes cell (`row`, `column`). Returns false on failure.
    fn run(&self, row: usize, column: usize) -> bool;

    /// Called exactly once, after the producer finished and every scheduled
    /// cell ran.
    fn complete(&self, success: bool);
}

#[derive(Debug)]
struct SchedulerState {
    cells: Array2D<SuperBlockState>,
    /// The producer plus every scheduled cell that has not finished.
    pending_jobs: usize,
    abort: bool,
}

impl SchedulerState {
    fn can_decode(&self, row: usize, column: usize, lag: usize) -> bool {
        if row >= self.cells.rows()
            || column >= self.cells.columns()
            || self.cells[row][column] != SuperBlockState::Parsed
        {
            return false;
        }
        let decoded = |r: usize, c: usize| self.cells[r][c] == SuperBlockState::Decoded;
        if row == 0 {
            return column == 0 || decoded(0, column - 1);
        }
        let top_right = (column + lag).min(self.cells.columns() - 1);
        decoded(row - 1, top_right) && (column == 0 || decoded(row, column - 1))
    }

    // Marks the cell scheduled if it may run now.
    fn try_schedule(&mut self, row: usize, column: usize, lag: usize) -> bool {
        if self.abort || !self.can_decode(row, column, lag) {
            return false;
        }
        self.cells[row][column] = SuperBlockState::Scheduled;
        self.pending_jobs += 1;
        true
    }

    // Drops one pending job. Returns the completion status when it was the
    // last one.
    fn finish_job(&mut self) -> Option<bool> {
        self.pending_jobs -= 1;
        (self.pending_jobs == 0).then_some(!self.abort)
    }
}

pub struct Wavefront<J: WavefrontJob> {
    state: Mutex<SchedulerState>,
    lag: usize,
    job: J,
    queue: Arc<dyn TaskQueue>,
}

impl<J: WavefrontJob> Wavefront<J> {
    /// Starts with one pending job, the producer.
    pub fn new(
        rows: usize,
        columns: usize,
        lag: usize,
        job: J,
        queue: Arc<dyn TaskQueue>,
    ) -> Result<Arc<Self>> {
        Ok(Arc::new(Wavefront {
            state: Mutex::new(SchedulerState {
                cells: Array2D::new(rows, columns)?,
                pending_jobs: 1,
                abort: false,
            }),
            lag,
            job,
            queue,
        }))
    }

    pub fn is_aborted(&self) -> bool {
        lock(&self.state).abort
    }

    pub fn state(&self, row: usize, column: usize) -> SuperBlockState {
        lock(&self.state).cells[row][column]
    }

    /// Records that the producer finished cell (`row`, `column`) and
    /// schedules it if its dependencies are met. Returns false if the
    /// wavefront was aborted, in which case the producer should stop.
    pub fn mark_parsed(self: &Arc<Self>, row: usize, column: usize) -> bool {
        let schedule = {
            let mut state = lock(&self.state);
            if state.abort {
                return false;
            }
            state.cells[row][column] = SuperBlockState::Parsed;
            state.try_schedule(row, column, self.lag)
        };
        if schedule {
            self.schedule(row, column);
        }
        true
    }

    /// Stops all further scheduling.
    pub fn abort(&self) {
        lock(&self.state).abort = true;
    }

    /// Ends the producer's job.
    pub fn finish_producer(&self) {
        let status = lock(&self.state).finish_job();
        if let Some(success) = status {
            self.job.complete(success);
        }
    }

    fn schedule(self: &Arc<Self>, row: usize, column: usize) {
        trace!(row, column, "scheduling cell");
        let this = self.clone();
        self.queue
            .schedule(Box::new(move || this.run_cell(row, column)));
    }

    fn run_cell(self: Arc<Self>, row: usize, column: usize) {
        let ok = self.job.run(row, column);
        let mut ready = [None; 2];
        let status = {
            let mut state = lock(&self.state);
            if ok {
                state.cells[row][column] = SuperBlockState::Decoded;
                let candidates = [(row + 1, column.saturating_sub(self.lag)), (row, column + 1)];
                for (slot, (r, c)) in ready.iter_mut().zip(candidates) {
                    if state.try_schedule(r, c, self.lag) {
                        *slot = Some((r, c));
                    }
                }
            } else {
                debug!(row, column, "cell failed, aborting");
                state.abort = true;
            }
            state.finish_job()
        };
        for (r, c) in ready.into_iter().flatten() {
            self.schedule(r, c);
        }
        if let Some(success) = status {
            self.job.complete(success);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::threading::test_queues::{DeferredQueue, InlineQueue};
    use rand::{Rng, SeedableRng};
    use test_log::test;

    #[derive(Default)]
    struct Recorder {
        order: Mutex<Vec<(usize, usize)>>,
        fail_at: Option<(usize, usize)>,
        completions: AtomicUsize,
        success: Mutex<Option<bool>>,
    }

    impl WavefrontJob for Arc<Recorder> {
        fn run(&self, row: usize, column: usize) -> bool {
            lock(&self.order).push((row, column));
            self.fail_at != Some((row, column))
        }

        fn complete(&self, success: bool) {
            self.completions.fetch_add(1, Ordering::SeqCst);
            *lock(&self.success) = Some(success);
        }
    }

    fn produce(wavefront: &Arc<Wavefront<Arc<Recorder>>>, rows: usize, columns: usize) {
        'parse: for r in 0..rows {
            for c in 0..columns {
                if !wavefront.mark_parsed(r, c) {
                    break 'parse;
                }
            }
        }
        wavefront.finish_producer();
    }

    fn check_dependencies(order: &[(usize, usize)], columns: usize, lag: usize) {
        for (i, &(r, c)) in order.iter().enumerate() {
            let done = &order[..i];
            if c > 0 {
                assert!(done.contains(&(r, c - 1)), "{:?} before left", (r, c));
            }
            if r > 0 {
                let top_right = (c + lag).min(columns - 1);
                assert!(done.contains(&(r - 1, top_right)), "{:?} before top right", (r, c));
            }
        }
    }

    #[test]
    fn inline_queue_decodes_every_cell_once() -> Result<()> {
        let recorder = Arc::new(Recorder::default());
        let wavefront = Wavefront::new(3, 5, 1, recorder.clone(), Arc::new(InlineQueue))?;
        produce(&wavefront, 3, 5);
        let order = lock(&recorder.order).clone();
        assert_eq!(order.len(), 15);
        check_dependencies(&order, 5, 1);
        assert_eq!(recorder.completions.load(Ordering::SeqCst), 1);
        assert_eq!(*lock(&recorder.success), Some(true));
        assert_eq!(wavefront.state(2, 4), SuperBlockState::Decoded);
        Ok(())
    }

    #[test]
    fn random_execution_order_respects_dependencies() {
        arbtest::arbtest(|u| {
            let rows = u.int_in_range(1..=5)?;
            let columns = u.int_in_range(1..=7)?;
            let lag = *u.choose(&[1usize, 3, 5])?;
            let seed: u64 = u.arbitrary()?;
            let mut rng = rand_xorshift::XorShiftRng::seed_from_u64(seed);
            let recorder = Arc::new(Recorder::default());
            let queue = Arc::new(DeferredQueue::default());
            let wavefront =
                Wavefront::new(rows, columns, lag, recorder.clone(), queue.clone()).unwrap();
            // Interleave parsing with running queued tasks.
            for r in 0..rows {
                for c in 0..columns {
                    assert!(wavefront.mark_parsed(r, c));
                    while queue.len() > 0 && rng.random_bool(0.5) {
                        if rng.random_bool(0.5) {
                            queue.run_first();
                        } else {
                            queue.run_last();
                        }
                    }
                }
            }
            wavefront.finish_producer();
            queue.run_all();
            let order = lock(&recorder.order).clone();
            assert_eq!(order.len(), rows * columns);
            check_dependencies(&order, columns, lag);
            assert_eq!(recorder.completions.load(Ordering::SeqCst), 1);
            assert_eq!(*lock(&recorder.success), Some(true));
            Ok(())
        });
    }

    #[test]
    fn failure_stops_scheduling() -> Result<()> {
        let recorder = Arc::new(Recorder {
            fail_at: Some((1, 0)),
            ..Default::default()
        });
        let queue = Arc::new(DeferredQueue::default());
        let wavefront = Wavefront::new(3, 3, 1, recorder.clone(), queue.clone())?;
        for c in 0..3 {
            assert!(wavefront.mark_parsed(0, c));
            queue.run_all();
        }
        assert!(wavefront.mark_parsed(1, 0));
        queue.run_all();
        assert!(wavefront.is_aborted());
        assert!(!wavefront.mark_parsed(1, 1));
        wavefront.finish_producer();
        assert_eq!(queue.len(), 0);
        assert_eq!(lock(&recorder.order).len(), 4);
        assert_eq!(wavefront.state(1, 1), SuperBlockState::None);
        assert_eq!(recorder.completions.load(Ordering::SeqCst), 1);
        assert_eq!(*lock(&recorder.success), Some(false));
        Ok(())
    }

    #[test]
    fn completion_waits_for_running_cells() -> Result<()> {
        let recorder = Arc::new(Recorder::default());
        let queue = Arc::new(DeferredQueue::default());
        let wavefront = Wavefront::new(1, 2, 1, recorder.clone(), queue.clone())?;
        wavefront.mark_parsed(0, 0);
        wavefront.mark_parsed(0, 1);
        wavefront.finish_producer();
        assert_eq!(recorder.completions.load(Ordering::SeqCst), 0);
        queue.run_all();
        assert_eq!(recorder.completions.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[cfg(feature = "parallel")]
    #[test]
    fn rayon_pool_decodes_grid() -> Result<()> {
        use crate::util::BlockingCounterWithStatus;

        struct Counted {
            counter: Arc<BlockingCounterWithStatus>,
            runs: AtomicUsize,
        }

        impl WavefrontJob for Arc<Counted> {
            fn run(&self, _row: usize, _column: usize) -> bool {
                self.runs.fetch_add(1, Ordering::SeqCst);
                true
            }

            fn complete(&self, success: bool) {
                self.counter.decrement(success);
            }
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(4)
            .build()
            .unwrap();
        let counter = Arc::new(BlockingCounterWithStatus::new(1));
        let job = Arc::new(Counted {
            counter: counter.clone(),
            runs: AtomicUsize::new(0),
        });
        let wavefront = Wavefront::new(6, 9, 3, job.clone(), Arc::new(pool))?;
        for r in 0..6 {
            for c in 0..9 {
                wavefront.mark_parsed(r, c);
            }
        }
        wavefront.finish_producer();
        assert!(counter.wait());
        assert_eq!(job.runs.load(Ordering::SeqCst), 54);
        Ok(())
    }
}
