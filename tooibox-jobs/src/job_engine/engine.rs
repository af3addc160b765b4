// SPDX-License-Identifier: MIT

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use crate::config::EngineConfig;
use crate::error::{usage_error, EngineError, Result};
use crate::job_engine::executor::{DrainStats, JobExecutor};
use crate::job_engine::job::{Affinity, Completion, Job, JobId, JobOutcome, JobStatus};
use crate::job_engine::registry::{JobHandle, JobRegistry, Placement};
use crate::job_engine::selector::{selector_for, RandomSelector, WorkerSelector};
use crate::log_sink::{LogCrateSink, LogSink, Severity};

const CATEGORY: &str = "JobEngine";

/// Summary of [`JobEngine::shutdown`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Jobs that were still queued at shutdown and ran during the drain.
    pub drained: usize,
    /// Jobs discarded because the drain timed out (or could not run).
    pub cancelled: usize,
    /// Registry entries dropped by the final clear.
    pub reclaimed: usize,
}

/// A resolved handle: read access to a job's status without owning it.
#[derive(Debug, Clone)]
pub struct JobRef {
    handle: JobHandle,
    completion: Arc<Completion>,
    placement: Placement,
}

impl JobRef {
    pub fn handle(&self) -> JobHandle {
        self.handle
    }

    pub fn id(&self) -> JobId {
        self.completion.id()
    }

    pub fn desc(&self) -> &str {
        self.completion.desc()
    }

    pub fn placement(&self) -> Placement {
        self.placement
    }

    pub fn status(&self) -> JobStatus {
        self.completion.status()
    }

    pub fn is_done(&self) -> bool {
        self.completion.is_done()
    }
}

impl JobHandle {
    /// Looks the job up in `engine`. `None` for the invalid handle and for
    /// jobs whose slot has been reclaimed.
    pub fn resolve(self, engine: &JobEngine) -> Option<JobRef> {
        engine.resolve(self)
    }
}

pub struct EngineBuilder {
    config: EngineConfig,
    sink: Arc<dyn LogSink>,
    selector: Option<Box<dyn WorkerSelector>>,
    foreground_thread: Option<ThreadId>,
    #[cfg(test)]
    fail_spawn_after: Option<usize>,
}

impl EngineBuilder {
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Overrides the strategy named in the config.
    pub fn selector(mut self, selector: Box<dyn WorkerSelector>) -> Self {
        self.selector = Some(selector);
        self
    }

    /// Thread allowed to pump the foreground executor. Defaults to the
    /// thread calling [`EngineBuilder::build`].
    pub fn foreground_thread(mut self, thread: ThreadId) -> Self {
        self.foreground_thread = Some(thread);
        self
    }

    #[cfg(test)]
    pub(crate) fn fail_spawn_after(mut self, n: usize) -> Self {
        self.fail_spawn_after = Some(n);
        self
    }

    #[cfg(test)]
    fn simulated_spawn_failure(&self, index: usize) -> Option<std::io::Error> {
        self.fail_spawn_after
            .filter(|&n| index >= n)
            .map(|_| std::io::Error::new(std::io::ErrorKind::WouldBlock, "simulated thread exhaustion"))
    }

    #[cfg(not(test))]
    fn simulated_spawn_failure(&self, _index: usize) -> Option<std::io::Error> {
        None
    }

    fn spawn_worker(&self, index: usize) -> std::io::Result<JobExecutor> {
        if let Some(e) = self.simulated_spawn_failure(index) {
            return Err(e);
        }
        JobExecutor::spawn_worker(
            format!("{}-{index}", self.config.thread_name_prefix),
            self.sink.clone(),
        )
    }

    pub fn build(self) -> Result<JobEngine> {
        self.config.validate()?;
        let desired = self.config.resolved_workers();
        let required = self.config.min_workers.min(desired);

        let mut workers = Vec::with_capacity(desired);
        for index in 0..desired {
            match self.spawn_worker(index) {
                Ok(worker) => workers.push(worker),
                Err(e) if workers.len() >= required => {
                    self.sink.log(
                        &format!(
                            "started only {} of {desired} workers ({e}), continuing with {}",
                            workers.len(),
                            workers.len()
                        ),
                        CATEGORY,
                        Severity::Warning,
                    );
                    break;
                }
                Err(e) => {
                    let spawned = workers.len();
                    let now = Instant::now();
                    for worker in &workers {
                        worker.request_shutdown(now);
                    }
                    for worker in &workers {
                        worker.join();
                    }
                    self.sink.log(
                        &format!("cannot start job engine: {e}"),
                        CATEGORY,
                        Severity::Error,
                    );
                    return Err(EngineError::ThreadSpawn {
                        spawned,
                        required,
                        source: e,
                    });
                }
            }
        }

        let owner = self
            .foreground_thread
            .unwrap_or_else(|| thread::current().id());
        let foreground = JobExecutor::foreground("foreground", owner, self.sink.clone());
        let selector = self
            .selector
            .unwrap_or_else(|| selector_for(self.config.selector, self.config.seed));
        let random = match self.config.seed {
            Some(seed) => RandomSelector::with_seed(seed),
            None => RandomSelector::new(),
        };

        self.sink.log(
            &format!(
                "job engine started with {} workers ({:?} placement)",
                workers.len(),
                self.config.selector
            ),
            CATEGORY,
            Severity::Info,
        );

        Ok(JobEngine {
            config: self.config,
            workers,
            foreground,
            selector,
            random,
            registry: JobRegistry::new(),
            sink: self.sink,
            next_id: AtomicU64::new(1),
            shut_down: AtomicBool::new(false),
        })
    }
}

/// A fixed pool of worker executors plus one foreground executor.
///
/// Background jobs are spread over the workers by a [`WorkerSelector`];
/// foreground jobs wait until the foreground thread calls
/// [`JobEngine::pump_foreground`]. Every submitted job is tracked in a
/// registry under the [`JobHandle`] returned to the caller.
pub struct JobEngine {
    config: EngineConfig,
    workers: Vec<JobExecutor>,
    foreground: JobExecutor,
    selector: Box<dyn WorkerSelector>,
    random: RandomSelector,
    registry: JobRegistry,
    sink: Arc<dyn LogSink>,
    next_id: AtomicU64,
    shut_down: AtomicBool,
}

impl JobEngine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder {
            config: EngineConfig::default(),
            sink: Arc::new(LogCrateSink),
            selector: None,
            foreground_thread: None,
            #[cfg(test)]
            fail_spawn_after: None,
        }
    }

    /// Builds an engine whose foreground thread is the calling thread.
    pub fn new(config: EngineConfig) -> Result<Self> {
        Self::builder().config(config).build()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub fn workers(&self) -> &[JobExecutor] {
        &self.workers
    }

    /// A worker picked uniformly at random.
    pub fn random_worker(&self) -> &JobExecutor {
        &self.workers[self.random.choose(&self.workers)]
    }

    /// The worker the configured strategy would place the next job on.
    pub fn select_worker(&self) -> (usize, &JobExecutor) {
        let index = self.selector.choose(&self.workers).min(self.workers.len() - 1);
        (index, &self.workers[index])
    }

    pub fn foreground_executor(&self) -> &JobExecutor {
        &self.foreground
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    pub fn submit<F, T>(&self, affinity: Affinity, f: F) -> Result<JobHandle>
    where
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.submit_named("", affinity, f)
    }

    /// Queues `f` and returns a handle to track it.
    ///
    /// The job stays in the registry until its result is taken with
    /// [`JobEngine::take_result`] or the handle is passed to
    /// [`JobEngine::release`]. Callers that do neither should set
    /// `reclaim_grace_ms`; without it unclaimed results are only dropped at
    /// shutdown.
    pub fn submit_named<F, T>(
        &self,
        desc: impl Into<String>,
        affinity: Affinity,
        f: F,
    ) -> Result<JobHandle>
    where
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        if self.is_shut_down() {
            return Err(usage_error(
                self.sink.as_ref(),
                CATEGORY,
                EngineError::AlreadyShutDown,
            ));
        }
        let id = JobId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let job = Job::new(id, desc, f);
        let (placement, executor) = match affinity {
            Affinity::Worker => {
                let (index, worker) = self.select_worker();
                (Placement::Worker(index), worker)
            }
            Affinity::Foreground => (Placement::Foreground, &self.foreground),
        };

        // registered first, so the handle is valid even if the job finishes
        // before this call returns
        let handle = self.registry.insert(job.completion(), placement);
        if let Err(e) = executor.enqueue(job) {
            self.registry.remove(handle);
            return Err(e);
        }
        self.sink.log(
            &format!("{id} queued on {}", executor.name()),
            CATEGORY,
            Severity::Debug,
        );
        Ok(handle)
    }

    pub fn resolve(&self, handle: JobHandle) -> Option<JobRef> {
        self.registry.get(handle).map(|entry| JobRef {
            handle,
            completion: entry.completion,
            placement: entry.placement,
        })
    }

    pub fn status(&self, handle: JobHandle) -> Result<JobStatus> {
        self.resolve(handle)
            .map(|job| job.status())
            .ok_or(EngineError::NotFound(handle))
    }

    pub fn is_done(&self, handle: JobHandle) -> Result<bool> {
        self.status(handle).map(JobStatus::is_terminal)
    }

    /// Blocks until the job is finished.
    ///
    /// Called on the foreground thread for a foreground job, this pumps the
    /// foreground executor first, since nothing else would ever run the job.
    /// From inside a foreground job that pump cannot happen, so waiting there
    /// on an unfinished foreground job is a usage error.
    ///
    /// Waiting on the foreground thread for a worker job that in turn waits on
    /// a foreground job never returns: the foreground job only runs on the
    /// next pump. Use [`JobEngine::wait_timeout`] and pump in between.
    pub fn wait(&self, handle: JobHandle) -> Result<JobStatus> {
        let job = self.resolve(handle).ok_or(EngineError::NotFound(handle))?;
        if self.pump_if_waiting_on_self(&job)? {
            return Err(usage_error(
                self.sink.as_ref(),
                CATEGORY,
                EngineError::WaitInsidePump(handle),
            ));
        }
        Ok(job.completion.wait())
    }

    /// Like [`JobEngine::wait`], `Ok(None)` if the job is still unfinished
    /// after `timeout`.
    ///
    /// Inside a foreground job no pump happens, so a queued foreground job
    /// just times out.
    pub fn wait_timeout(&self, handle: JobHandle, timeout: Duration) -> Result<Option<JobStatus>> {
        let job = self.resolve(handle).ok_or(EngineError::NotFound(handle))?;
        self.pump_if_waiting_on_self(&job)?;
        Ok(job.completion.wait_timeout(timeout))
    }

    // Returns true if the job still needs a pump that cannot run because the
    // caller is itself a foreground job.
    fn pump_if_waiting_on_self(&self, job: &JobRef) -> Result<bool> {
        if job.placement != Placement::Foreground
            || job.is_done()
            || !self.foreground.is_owner_thread()
        {
            return Ok(false);
        }
        if self.foreground.is_pumping() {
            return Ok(true);
        }
        self.foreground.pump()?;
        Ok(false)
    }

    /// Hands out the job's outcome and reclaims its slot, so this succeeds at
    /// most once per handle. Calling it before the job is done is a usage
    /// error.
    pub fn take_result(&self, handle: JobHandle) -> Result<JobOutcome> {
        let job = self.resolve(handle).ok_or(EngineError::NotFound(handle))?;
        if !job.is_done() {
            return Err(usage_error(
                self.sink.as_ref(),
                CATEGORY,
                EngineError::NotDone(handle),
            ));
        }
        let entry = self
            .registry
            .remove(handle)
            .ok_or(EngineError::NotFound(handle))?;
        entry
            .completion
            .take_outcome()
            .ok_or(EngineError::NotFound(handle))
    }

    /// Typed shorthand for [`JobEngine::take_result`].
    pub fn take_value<T: 'static>(&self, handle: JobHandle) -> anyhow::Result<T> {
        self.take_result(handle)?.into_result()
    }

    /// Forgets the job. It still runs if it is queued; its result is dropped.
    pub fn release(&self, handle: JobHandle) -> bool {
        self.registry.remove(handle).is_some()
    }

    /// Best-effort cancellation of a queued job.
    ///
    /// Returns `Ok(false)` if the job is already running or finished.
    pub fn cancel(&self, handle: JobHandle) -> Result<bool> {
        let job = self.resolve(handle).ok_or(EngineError::NotFound(handle))?;
        let executor = match job.placement {
            Placement::Worker(index) => &self.workers[index],
            Placement::Foreground => &self.foreground,
        };
        let cancelled = executor.cancel(job.id());
        if cancelled {
            self.sink.log(
                &format!("{} cancelled", job.id()),
                CATEGORY,
                Severity::Debug,
            );
        }
        Ok(cancelled)
    }

    /// Runs the queued foreground jobs. Call once per frame from the
    /// foreground thread.
    pub fn pump_foreground(&self) -> Result<usize> {
        let ran = self.foreground.pump()?;
        if self.config.reclaim_grace().is_some() {
            self.collect_garbage();
        }
        Ok(ran)
    }

    /// Reclaims finished jobs older than the configured grace period.
    pub fn collect_garbage(&self) -> usize {
        let Some(grace) = self.config.reclaim_grace() else {
            return 0;
        };
        let reclaimed = self.registry.remove_expired(grace, Instant::now());
        if reclaimed > 0 {
            self.sink.log(
                &format!("reclaimed {reclaimed} unclaimed job results"),
                CATEGORY,
                Severity::Debug,
            );
        }
        reclaimed
    }

    /// Jobs currently tracked by the registry.
    pub fn tracked_jobs(&self) -> usize {
        self.registry.len()
    }

    /// Stops every executor and clears the registry.
    ///
    /// Queued jobs keep running until the drain timeout expires; whatever is
    /// left then is cancelled. Foreground jobs are only drained when this is
    /// called on the foreground thread. Calling it again returns an empty
    /// report.
    pub fn shutdown(&self) -> ShutdownReport {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return ShutdownReport::default();
        }
        let deadline = Instant::now() + self.config.drain_timeout();
        for worker in &self.workers {
            worker.request_shutdown(deadline);
        }
        self.foreground.request_shutdown(deadline);

        let mut stats = DrainStats::default();
        for worker in &self.workers {
            stats += worker.join();
        }
        stats += self.foreground.join();
        let reclaimed = self.registry.clear();

        let report = ShutdownReport {
            drained: stats.drained,
            cancelled: stats.cancelled,
            reclaimed,
        };
        self.sink.log(
            &format!(
                "job engine stopped: {} drained, {} cancelled, {} handles released",
                report.drained, report.cancelled, report.reclaimed
            ),
            CATEGORY,
            Severity::Info,
        );
        report
    }
}

impl Drop for JobEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for JobEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobEngine")
            .field("workers", &self.workers.len())
            .field("tracked_jobs", &self.registry.len())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}
