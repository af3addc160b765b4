// SPDX-License-Identifier: MIT

//! # Design: Worker Pool + Pumped Foreground Executor
//!
//! ## Overview
//! Jobs are closures that run off the submitting thread. There are N + 1
//! places a job can run:
//!
//! - N workers, each an OS thread draining its own FIFO queue.
//! - One foreground executor without a thread. Its queue is only drained
//!   when the foreground thread calls `pump` (once per frame), for work that
//!   must stay on that thread.
//!
//! A `WorkerSelector` decides which worker receives a background job
//! (uniformly random by default). Every job is registered under a
//! generational `JobHandle`; the handle is a lookup key, not an owner.
//!
//! ```text
//!         +--------------------------------------+
//!         |     JobEngine::submit(affinity)      |
//!         +----------+---------------------------+
//!                    |                     |
//!          selector  v                     v
//!         +----------+-----------+  +------------------+
//!         |  worker queues (N)   |  | foreground queue |
//!         +----+------+----+-----+  +------------------+
//!              |           |               |
//!         +----v----+  +---v----+      +---v-----------+
//!         | thread 0|  |thread 1|      | pump() on the |
//!         |  loop() |  | loop() |      | owner thread  |
//!         +---------+  +--------+      +---------------+
//! ```
//!
//! Shutdown: every executor stops accepting jobs, queued jobs run until the
//! drain timeout, the rest are cancelled, worker threads are joined.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

pub mod engine;
pub mod executor;
pub mod global;
pub mod job;
pub mod registry;
pub mod selector;

// Job bodies run outside every lock and their panics are caught, so a
// poisoned lock only means some unrelated thread died mid-update of plain
// data. Keep going with the inner value.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn wait<'a, T>(cvar: &Condvar, guard: MutexGuard<'a, T>) -> MutexGuard<'a, T> {
    cvar.wait(guard).unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn wait_timeout<'a, T>(
    cvar: &Condvar,
    guard: MutexGuard<'a, T>,
    timeout: Duration,
) -> MutexGuard<'a, T> {
    match cvar.wait_timeout(guard, timeout) {
        Ok((guard, _)) => guard,
        Err(poisoned) => poisoned.into_inner().0,
    }
}
