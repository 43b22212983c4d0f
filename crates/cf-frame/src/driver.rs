//! Partition-parallel pipeline execution.
//!
//! Each partition runs the whole pipeline against a private [`Accumulator`]
//! on a rayon pool. Partition results are merged afterwards by the caller's
//! thread in partition order, so the output does not depend on scheduling.

use std::ops::Range;
use std::sync::{Arc, OnceLock};

use rayon::prelude::*;

use cf_core::{Error, Event, Result};

use crate::output::PipelineResult;
use crate::pipeline::{Accumulator, Pipeline};

/// A disjoint slice of a dataset that can be read from the start any number
/// of times.
pub trait Partition: Send + Sync {
    /// Label used in diagnostics.
    fn label(&self) -> String;

    /// Open the partition and stream its events from the beginning.
    ///
    /// An `Err` item aborts the current attempt; the driver may then reopen
    /// the partition and start over.
    fn events(&self) -> Result<Box<dyn Iterator<Item = Result<Event>> + '_>>;
}

/// In-memory partition.
#[derive(Debug, Clone)]
pub struct VecPartition {
    label: String,
    events: Vec<Event>,
}

impl VecPartition {
    /// Partition over owned events.
    pub fn new(label: impl Into<String>, events: Vec<Event>) -> Self {
        Self { label: label.into(), events }
    }

    /// Number of events held.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// `true` if no events are held.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl Partition for VecPartition {
    fn label(&self) -> String {
        self.label.clone()
    }

    fn events(&self) -> Result<Box<dyn Iterator<Item = Result<Event>> + '_>> {
        Ok(Box::new(self.events.iter().cloned().map(Ok)))
    }
}

/// Split `n_rows` into at most `parts` contiguous, non-empty ranges whose
/// lengths differ by at most one.
pub fn split_rows(n_rows: usize, parts: usize) -> Vec<Range<usize>> {
    let parts = parts.clamp(1, n_rows.max(1));
    let base = n_rows / parts;
    let extra = n_rows % parts;
    let mut out = Vec::with_capacity(parts);
    let mut start = 0;
    for i in 0..parts {
        let len = base + usize::from(i < extra);
        out.push(start..start + len);
        start += len;
    }
    out
}

/// Runs a [`Pipeline`] over partitions.
///
/// The worker pool is built on the first run and reused by later runs and
/// by clones.
#[derive(Debug, Clone)]
pub struct Driver {
    workers: usize,
    max_retries: usize,
    pool: Arc<OnceLock<rayon::ThreadPool>>,
}

impl Default for Driver {
    fn default() -> Self {
        Self::new(1)
    }
}

impl Driver {
    /// Driver using `workers` threads (at least one).
    pub fn new(workers: usize) -> Self {
        Self { workers: workers.max(1), max_retries: 2, pool: Arc::default() }
    }

    /// How many times a failed partition is re-read from the start.
    pub fn max_retries(mut self, n: usize) -> Self {
        self.max_retries = n;
        self
    }

    /// Worker thread count.
    pub fn workers(&self) -> usize {
        self.workers
    }

    fn pool(&self) -> Result<&rayon::ThreadPool> {
        if let Some(pool) = self.pool.get() {
            return Ok(pool);
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .build()
            .map_err(|e| Error::Config(format!("cannot build worker pool: {e}")))?;
        Ok(self.pool.get_or_init(|| pool))
    }

    /// Run `pipeline` over every partition and merge the results.
    ///
    /// Fails if any partition still fails after its retries; nothing is
    /// returned for the other partitions in that case.
    pub fn run<P: Partition>(&self, pipeline: &Pipeline, partitions: &[P]) -> Result<PipelineResult> {
        let accs: Vec<Accumulator> = self.pool()?.install(|| {
            partitions
                .par_iter()
                .map(|p| self.run_partition(pipeline, p))
                .collect::<Result<Vec<_>>>()
        })?;

        let mut total = pipeline.accumulator();
        for acc in &accs {
            total.merge(acc)?;
        }
        log::debug!(
            "merged {} partition(s): {} processed, {} passed, {} dropped",
            accs.len(),
            total.events_processed,
            total.events_passed,
            total.events_dropped
        );
        Ok(total.into_result())
    }

    fn run_partition<P: Partition>(&self, pipeline: &Pipeline, partition: &P) -> Result<Accumulator> {
        let label = partition.label();
        let attempts = self.max_retries + 1;
        let mut last_err = None;

        for attempt in 1..=attempts {
            match run_once(pipeline, partition, &label) {
                Ok(acc) => {
                    log::debug!(
                        "partition '{label}' done on attempt {attempt}: {} events, {} passed",
                        acc.events_processed,
                        acc.events_passed
                    );
                    return Ok(acc);
                }
                Err(e) => {
                    log::warn!("partition '{label}' attempt {attempt}/{attempts} failed: {e}");
                    last_err = Some(e);
                }
            }
        }

        Err(Error::Partition {
            partition: label,
            attempts,
            message: last_err.map(|e| e.to_string()).unwrap_or_default(),
        })
    }
}

fn run_once<P: Partition>(pipeline: &Pipeline, partition: &P, label: &str) -> Result<Accumulator> {
    let mut acc = pipeline.accumulator();
    for (i, item) in partition.events()?.enumerate() {
        let event = item?;
        if let Err(e) = pipeline.run_event(&event, &mut acc) {
            log::warn!("partition '{label}': dropping event {i}: {e}");
        }
    }
    Ok(acc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::histogram::Axis;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn events(n: usize) -> Vec<Event> {
        (0..n).map(|i| Event::new().with_scalar("x", (i % 7) as f64)).collect()
    }

    fn pipeline() -> Pipeline {
        Pipeline::builder()
            .define_expr("weight", "x < 6 ? 1.0 : 0.5")
            .weight_sum("weight")
            .filter_expr("x >= 2")
            .histo1d_weighted("x", Axis::new(7, 0.0, 7.0), "x", "weight")
            .build()
            .unwrap()
    }

    /// Fails the first `fail_first` openings part-way through.
    struct Flaky {
        events: Vec<Event>,
        fail_first: usize,
        opened: AtomicUsize,
    }

    impl Partition for Flaky {
        fn label(&self) -> String {
            "flaky".into()
        }

        fn events(&self) -> Result<Box<dyn Iterator<Item = Result<Event>> + '_>> {
            let n = self.opened.fetch_add(1, Ordering::SeqCst);
            let fail = n < self.fail_first;
            Ok(Box::new(self.events.iter().enumerate().map(move |(i, e)| {
                if fail && i == 3 {
                    Err(Error::Validation("truncated read".into()))
                } else {
                    Ok(e.clone())
                }
            })))
        }
    }

    #[test]
    fn split_rows_balanced() {
        assert_eq!(split_rows(10, 3), vec![0..4, 4..7, 7..10]);
        assert_eq!(split_rows(2, 5), vec![0..1, 1..2]);
        assert_eq!(split_rows(0, 4), vec![0..0]);
        assert_eq!(split_rows(5, 0), vec![0..5]);
    }

    #[test]
    fn result_independent_of_partitioning() {
        let all = events(100);
        let p = pipeline();
        let single = Driver::new(1).run(&p, &[VecPartition::new("all", all.clone())]).unwrap();

        let parts: Vec<VecPartition> = split_rows(all.len(), 4)
            .into_iter()
            .enumerate()
            .map(|(i, r)| VecPartition::new(format!("part{i}"), all[r].to_vec()))
            .collect();
        let split = Driver::new(4).run(&p, &parts).unwrap();

        assert_eq!(single, split);
        assert_eq!(split.events_processed, 100);
        // 14 events at x = 6 carry weight 0.5.
        assert_eq!(split.weight_sum, 86.0 + 14.0 * 0.5);
    }

    #[test]
    fn flaky_partition_is_retried_from_scratch() {
        let flaky = Flaky { events: events(10), fail_first: 2, opened: AtomicUsize::new(0) };
        let r = Driver::new(1).max_retries(2).run(&pipeline(), &[flaky]).unwrap();
        // No double counting from the aborted attempts.
        assert_eq!(r.events_processed, 10);
    }

    #[test]
    fn partition_failure_after_retries() {
        let flaky = Flaky { events: events(10), fail_first: usize::MAX, opened: AtomicUsize::new(0) };
        let err = Driver::new(2).max_retries(1).run(&pipeline(), &[flaky]).unwrap_err();
        match err {
            Error::Partition { partition, attempts, message } => {
                assert_eq!(partition, "flaky");
                assert_eq!(attempts, 2);
                assert!(message.contains("truncated read"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn dropped_events_are_counted_not_fatal() {
        let mut evs = events(5);
        evs.push(Event::new());
        let r = Driver::new(2).run(&pipeline(), &[VecPartition::new("p", evs)]).unwrap();
        assert_eq!(r.events_dropped, 1);
        assert_eq!(r.events_processed, 5);
    }

    #[test]
    fn pool_is_built_once_and_shared_by_clones() {
        let driver = Driver::new(3);
        let copy = driver.clone();
        let parts = [VecPartition::new("p", events(20))];
        let a = driver.run(&pipeline(), &parts).unwrap();
        let b = copy.run(&pipeline(), &parts).unwrap();
        assert_eq!(a, b);

        let pool = driver.pool.get().unwrap();
        assert!(std::ptr::eq(pool, copy.pool.get().unwrap()));
        assert_eq!(pool.current_num_threads(), 3);
    }
}
