// SPDX-License-Identifier: MIT

//! Worker selection strategies.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::SelectorKind;
use crate::job_engine::executor::JobExecutor;
use crate::job_engine::lock;

/// Picks the worker a new background job goes to.
///
/// `workers` is never empty. The returned index must be below `workers.len()`.
pub trait WorkerSelector: Send + Sync {
    fn choose(&self, workers: &[JobExecutor]) -> usize;
}

/// Uniform random placement. No shared state unless seeded.
pub struct RandomSelector {
    seeded: Option<Mutex<StdRng>>,
}

impl RandomSelector {
    /// Uses the calling thread's own generator, so submitters never contend.
    pub fn new() -> Self {
        Self { seeded: None }
    }

    /// Reproducible sequence, shared by all submitters.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            seeded: Some(Mutex::new(StdRng::seed_from_u64(seed))),
        }
    }
}

impl Default for RandomSelector {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerSelector for RandomSelector {
    fn choose(&self, workers: &[JobExecutor]) -> usize {
        match &self.seeded {
            Some(rng) => lock(rng).random_range(0..workers.len()),
            None => rand::rng().random_range(0..workers.len()),
        }
    }
}

#[derive(Default)]
pub struct RoundRobinSelector {
    next: AtomicUsize,
}

impl RoundRobinSelector {
    pub fn new() -> Self {
        Self::default()
    }
}

impl WorkerSelector for RoundRobinSelector {
    fn choose(&self, workers: &[JobExecutor]) -> usize {
        self.next.fetch_add(1, Ordering::Relaxed) % workers.len()
    }
}

/// Shortest queue wins; ties go to the lowest index.
#[derive(Debug, Default)]
pub struct LeastLoadedSelector;

impl WorkerSelector for LeastLoadedSelector {
    fn choose(&self, workers: &[JobExecutor]) -> usize {
        workers
            .iter()
            .enumerate()
            .min_by_key(|(_, w)| w.pending())
            .map(|(index, _)| index)
            .unwrap_or(0)
    }
}

pub fn selector_for(kind: SelectorKind, seed: Option<u64>) -> Box<dyn WorkerSelector> {
    match kind {
        SelectorKind::Random => match seed {
            Some(seed) => Box::new(RandomSelector::with_seed(seed)),
            None => Box::new(RandomSelector::new()),
        },
        SelectorKind::RoundRobin => Box::new(RoundRobinSelector::new()),
        SelectorKind::LeastLoaded => Box::new(LeastLoadedSelector),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job_engine::job::{Job, JobId};
    use crate::log_sink::NoopSink;
    use std::sync::Arc;
    use std::thread;

    // Foreground executors never run anything on their own, which makes their
    // queue depth stable for the duration of a test.
    fn idle_executors(n: usize) -> Vec<JobExecutor> {
        (0..n)
            .map(|i| {
                JobExecutor::foreground(format!("fg-{i}"), thread::current().id(), Arc::new(NoopSink))
            })
            .collect()
    }

    #[test]
    fn test_round_robin_cycles() {
        let workers = idle_executors(3);
        let selector = RoundRobinSelector::new();
        let picks: Vec<_> = (0..7).map(|_| selector.choose(&workers)).collect();
        assert_eq!(picks, vec![0, 1, 2, 0, 1, 2, 0]);
    }

    #[test]
    fn test_seeded_random_is_reproducible() {
        let workers = idle_executors(5);
        let a = RandomSelector::with_seed(99);
        let b = RandomSelector::with_seed(99);
        let picks_a: Vec<_> = (0..50).map(|_| a.choose(&workers)).collect();
        let picks_b: Vec<_> = (0..50).map(|_| b.choose(&workers)).collect();
        assert_eq!(picks_a, picks_b);
        assert!(picks_a.iter().all(|&i| i < workers.len()));
    }

    #[test]
    fn test_random_covers_every_worker() {
        let workers = idle_executors(4);
        let selector = RandomSelector::new();
        let mut hits = [0usize; 4];
        for _ in 0..4000 {
            hits[selector.choose(&workers)] += 1;
        }
        // roughly 1000 each; anything under 700 would point at a skewed pick
        assert!(hits.iter().all(|&h| h > 700), "skewed distribution: {hits:?}");
    }

    #[test]
    fn test_least_loaded_prefers_short_queue() {
        let workers = idle_executors(3);
        for (index, depth) in [(0usize, 2u64), (1, 0), (2, 1)] {
            for n in 0..depth {
                workers[index]
                    .enqueue(Job::new(JobId(n), "filler", || Ok(())))
                    .unwrap();
            }
        }
        assert_eq!(LeastLoadedSelector.choose(&workers), 1);
    }

    #[test]
    fn test_selector_for_kind() {
        let workers = idle_executors(2);
        let rr = selector_for(SelectorKind::RoundRobin, None);
        assert_eq!(rr.choose(&workers), 0);
        assert_eq!(rr.choose(&workers), 1);
        let random = selector_for(SelectorKind::Random, Some(1));
        assert!(random.choose(&workers) < 2);
    }
}
