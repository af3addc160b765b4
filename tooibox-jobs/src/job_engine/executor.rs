// SPDX-License-Identifier: MIT

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Instant;

use crate::error::{usage_error, EngineError, Result};
use crate::job_engine::job::{Job, JobId, JobStatus};
use crate::job_engine::{lock, wait};
use crate::log_sink::{LogSink, Severity};

const CATEGORY: &str = "JobExecutor";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorKind {
    /// Owns a thread that drains the queue on its own.
    Worker,
    /// Owns no thread; drained by [`JobExecutor::pump`] on its owner thread.
    Foreground,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorState {
    Idle,
    Running,
    ShuttingDown,
    Stopped,
}

/// What a worker did after shutdown was requested.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainStats {
    /// Jobs run between the shutdown request and the executor stopping.
    pub drained: usize,
    /// Jobs discarded because the drain deadline passed.
    pub cancelled: usize,
}

impl std::ops::AddAssign for DrainStats {
    fn add_assign(&mut self, other: Self) {
        self.drained += other.drained;
        self.cancelled += other.cancelled;
    }
}

struct Queue {
    jobs: VecDeque<Job>,
    state: ExecutorState,
    drain_deadline: Option<Instant>,
    /// Set while the foreground executor runs a pumped batch.
    pumping: bool,
}

struct Shared {
    name: String,
    queue: Mutex<Queue>,
    wake: Condvar,
    sink: Arc<dyn LogSink>,
    executed: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
}

impl Shared {
    fn new(name: String, sink: Arc<dyn LogSink>) -> Self {
        Self {
            name,
            queue: Mutex::new(Queue {
                jobs: VecDeque::new(),
                state: ExecutorState::Idle,
                drain_deadline: None,
                pumping: false,
            }),
            wake: Condvar::new(),
            sink,
            executed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            cancelled: AtomicU64::new(0),
        }
    }

    fn run_job(&self, job: Job) -> JobStatus {
        let id = job.id();
        let completion = job.completion();
        let status = job.run();
        match status {
            JobStatus::Completed => {
                self.executed.fetch_add(1, Ordering::Relaxed);
            }
            JobStatus::Failed => {
                self.executed.fetch_add(1, Ordering::Relaxed);
                self.failed.fetch_add(1, Ordering::Relaxed);
                let reason = completion.failure_message().unwrap_or_default();
                self.sink.log(
                    &format!("{id} ({}) failed on {}: {reason}", completion.desc(), self.name),
                    CATEGORY,
                    Severity::Warning,
                );
            }
            JobStatus::Cancelled => {
                self.cancelled.fetch_add(1, Ordering::Relaxed);
            }
            JobStatus::Pending | JobStatus::Running => {}
        }
        status
    }

    fn discard(&self, jobs: impl IntoIterator<Item = Job>) -> usize {
        let mut discarded = 0;
        for job in jobs {
            if job.cancel() {
                discarded += 1;
            }
        }
        self.cancelled.fetch_add(discarded as u64, Ordering::Relaxed);
        if discarded > 0 {
            self.sink.log(
                &format!("{}: discarded {discarded} queued jobs at shutdown", self.name),
                CATEGORY,
                Severity::Warning,
            );
        }
        discarded
    }
}

/// What a worker does after looking at its queue.
enum Next {
    Run { job: Job, draining: bool },
    Exit(Vec<Job>),
}

/// An execution context owning one FIFO queue of jobs.
///
/// Any thread may enqueue. Exactly one thread ever takes jobs out and runs
/// them: the executor's own thread for workers, the owner thread for the
/// foreground executor. The queue lock is held for push/pop only, never while
/// a job runs.
pub struct JobExecutor {
    shared: Arc<Shared>,
    kind: ExecutorKind,
    owner: Option<ThreadId>,
    thread: Mutex<Option<JoinHandle<DrainStats>>>,
}

impl JobExecutor {
    /// Starts a worker with a dedicated thread named `name`.
    pub fn spawn_worker(name: impl Into<String>, sink: Arc<dyn LogSink>) -> std::io::Result<Self> {
        let shared = Arc::new(Shared::new(name.into(), sink));
        let shared_for_thread = shared.clone();
        let handle = thread::Builder::new()
            .name(shared.name.clone())
            .spawn(move || worker_loop(shared_for_thread))?;
        Ok(Self {
            shared,
            kind: ExecutorKind::Worker,
            owner: None,
            thread: Mutex::new(Some(handle)),
        })
    }

    /// Creates a foreground executor that may only be pumped from `owner`.
    pub fn foreground(name: impl Into<String>, owner: ThreadId, sink: Arc<dyn LogSink>) -> Self {
        Self {
            shared: Arc::new(Shared::new(name.into(), sink)),
            kind: ExecutorKind::Foreground,
            owner: Some(owner),
            thread: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn kind(&self) -> ExecutorKind {
        self.kind
    }

    pub fn state(&self) -> ExecutorState {
        lock(&self.shared.queue).state
    }

    /// Jobs waiting in the queue (not counting one that is running).
    pub fn pending(&self) -> usize {
        lock(&self.shared.queue).jobs.len()
    }

    /// Jobs whose body ran, successfully or not.
    pub fn executed(&self) -> u64 {
        self.shared.executed.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.shared.failed.load(Ordering::Relaxed)
    }

    pub fn cancelled(&self) -> u64 {
        self.shared.cancelled.load(Ordering::Relaxed)
    }

    /// True on the thread that is allowed to pump this executor.
    pub fn is_owner_thread(&self) -> bool {
        self.owner == Some(thread::current().id())
    }

    /// True while a pumped batch is running, i.e. when called from inside a
    /// foreground job.
    pub fn is_pumping(&self) -> bool {
        lock(&self.shared.queue).pumping
    }

    /// Appends a job to the queue. A worker is woken; the foreground
    /// executor just keeps the job for the next pump.
    pub fn enqueue(&self, job: Job) -> Result<()> {
        let mut queue = lock(&self.shared.queue);
        if matches!(
            queue.state,
            ExecutorState::ShuttingDown | ExecutorState::Stopped
        ) {
            drop(queue);
            job.cancel();
            return Err(usage_error(
                self.shared.sink.as_ref(),
                CATEGORY,
                EngineError::ExecutorStopped(self.shared.name.clone()),
            ));
        }
        queue.jobs.push_back(job);
        drop(queue);
        if self.kind == ExecutorKind::Worker {
            self.shared.wake.notify_one();
        }
        Ok(())
    }

    /// Runs every job queued at the time of the call, in order, on the
    /// calling thread. Jobs enqueued meanwhile wait for the next pump.
    ///
    /// Pumps do not nest: called from inside a foreground job this returns
    /// `Ok(0)` and leaves the queue for the next top-level pump.
    ///
    /// Returns the number of jobs taken from the queue.
    pub fn pump(&self) -> Result<usize> {
        if self.kind != ExecutorKind::Foreground || !self.is_owner_thread() {
            return Err(usage_error(
                self.shared.sink.as_ref(),
                CATEGORY,
                EngineError::WrongThread {
                    executor: self.shared.name.clone(),
                },
            ));
        }

        let batch = {
            let mut queue = lock(&self.shared.queue);
            if queue.pumping {
                drop(queue);
                self.shared.sink.log(
                    &format!("{}: nested pump ignored", self.shared.name),
                    CATEGORY,
                    Severity::Debug,
                );
                return Ok(0);
            }
            if queue.jobs.is_empty() || queue.state == ExecutorState::Stopped {
                return Ok(0);
            }
            if queue.state == ExecutorState::Idle {
                queue.state = ExecutorState::Running;
            }
            queue.pumping = true;
            std::mem::take(&mut queue.jobs)
        };

        let count = batch.len();
        for job in batch {
            self.shared.run_job(job);
        }

        let mut queue = lock(&self.shared.queue);
        queue.pumping = false;
        if queue.state == ExecutorState::Running {
            queue.state = ExecutorState::Idle;
        }
        Ok(count)
    }

    /// Removes a job that is still queued and marks it cancelled.
    ///
    /// Returns false if the job is not in the queue anymore, e.g. because the
    /// executor already took it; it will then run normally.
    pub fn cancel(&self, id: JobId) -> bool {
        let job = {
            let mut queue = lock(&self.shared.queue);
            match queue.jobs.iter().position(|job| job.id() == id) {
                Some(pos) => queue.jobs.remove(pos),
                None => None,
            }
        };
        match job {
            Some(job) => {
                let cancelled = job.cancel();
                if cancelled {
                    self.shared.cancelled.fetch_add(1, Ordering::Relaxed);
                }
                cancelled
            }
            None => false,
        }
    }

    /// Stops accepting jobs. Already queued jobs are still run until
    /// `drain_deadline`, then discarded.
    pub fn request_shutdown(&self, drain_deadline: Instant) {
        let mut queue = lock(&self.shared.queue);
        if queue.state != ExecutorState::Stopped {
            queue.state = ExecutorState::ShuttingDown;
            queue.drain_deadline = Some(drain_deadline);
        }
        drop(queue);
        self.shared.wake.notify_all();
    }

    /// Waits for a worker thread to exit after [`JobExecutor::request_shutdown`].
    ///
    /// On the foreground executor this drains the queue instead: on the owner
    /// thread jobs run until the deadline, from any other thread (or from
    /// inside a foreground job) they are discarded.
    pub fn join(&self) -> DrainStats {
        match self.kind {
            ExecutorKind::Worker => self.join_worker(),
            ExecutorKind::Foreground => self.finish_foreground(),
        }
    }

    fn join_worker(&self) -> DrainStats {
        let Some(handle) = lock(&self.thread).take() else {
            return DrainStats::default();
        };
        if handle.thread().id() == thread::current().id() {
            // a job on this worker dropped the last engine reference
            self.shared.sink.log(
                &format!("{} cannot join itself, leaving it detached", self.shared.name),
                CATEGORY,
                Severity::Warning,
            );
            return DrainStats::default();
        }
        match handle.join() {
            Ok(stats) => stats,
            Err(_) => {
                self.shared.sink.log(
                    &format!("{} thread panicked", self.shared.name),
                    CATEGORY,
                    Severity::Error,
                );
                DrainStats::default()
            }
        }
    }

    fn finish_foreground(&self) -> DrainStats {
        let mut stats = DrainStats::default();
        let drain_here = self.is_owner_thread() && !self.is_pumping();
        loop {
            let job = {
                let mut queue = lock(&self.shared.queue);
                let expired = queue
                    .drain_deadline
                    .is_some_and(|deadline| Instant::now() >= deadline);
                if !drain_here || expired {
                    let rest: Vec<Job> = queue.jobs.drain(..).collect();
                    drop(queue);
                    stats.cancelled += self.shared.discard(rest);
                    break;
                }
                queue.jobs.pop_front()
            };
            match job {
                Some(job) => {
                    self.shared.run_job(job);
                    stats.drained += 1;
                }
                None => break,
            }
        }
        lock(&self.shared.queue).state = ExecutorState::Stopped;
        stats
    }
}

impl Drop for JobExecutor {
    fn drop(&mut self) {
        if self.kind == ExecutorKind::Worker && lock(&self.thread).is_some() {
            self.request_shutdown(Instant::now());
            self.join_worker();
        }
    }
}

impl fmt::Debug for JobExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobExecutor")
            .field("name", &self.shared.name)
            .field("kind", &self.kind)
            .field("state", &self.state())
            .field("pending", &self.pending())
            .finish()
    }
}

/// Body of a worker thread: sleep while the queue is empty, otherwise run
/// the oldest job. Returns once shutdown was requested and the queue is
/// drained or the drain deadline has passed.
fn worker_loop(shared: Arc<Shared>) -> DrainStats {
    shared.sink.log(
        &format!("{} started", shared.name),
        CATEGORY,
        Severity::Debug,
    );
    let mut stats = DrainStats::default();
    loop {
        let next = {
            let mut queue = lock(&shared.queue);
            loop {
                if queue.state == ExecutorState::ShuttingDown {
                    let expired = queue
                        .drain_deadline
                        .is_some_and(|deadline| Instant::now() >= deadline);
                    if expired {
                        break Next::Exit(queue.jobs.drain(..).collect());
                    }
                    match queue.jobs.pop_front() {
                        Some(job) => break Next::Run { job, draining: true },
                        None => break Next::Exit(Vec::new()),
                    }
                }
                if let Some(job) = queue.jobs.pop_front() {
                    queue.state = ExecutorState::Running;
                    break Next::Run { job, draining: false };
                }
                queue.state = ExecutorState::Idle;
                queue = wait(&shared.wake, queue);
            }
        };

        match next {
            Next::Run { job, draining } => {
                shared.run_job(job);
                if draining {
                    stats.drained += 1;
                }
            }
            Next::Exit(rest) => {
                stats.cancelled += shared.discard(rest);
                break;
            }
        }
    }
    lock(&shared.queue).state = ExecutorState::Stopped;
    shared.sink.log(
        &format!(
            "{} stopped ({} drained, {} discarded)",
            shared.name, stats.drained, stats.cancelled
        ),
        CATEGORY,
        Severity::Debug,
    );
    stats
}
