// SPDX-License-Identifier: MIT

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::error::EngineError;
use crate::job_engine::{lock, wait, wait_timeout};

/// Type-erased value produced by a job body.
pub type JobOutput = Box<dyn Any + Send>;

type JobBody = Box<dyn FnOnce() -> anyhow::Result<JobOutput> + Send + 'static>;

/// Where a job should run.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum Affinity {
    /// Any background worker, picked by the engine's selector.
    Worker,
    /// The foreground executor; the job runs during the next pump.
    Foreground,
}

/// Sequence number assigned at submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job-{}", self.0)
    }
}

#[derive(Clone, Debug, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

/// Why a job did not produce a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobFailure {
    pub message: String,
    /// The body panicked rather than returning an error.
    pub panicked: bool,
}

impl fmt::Display for JobFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.panicked {
            write!(f, "job panicked: {}", self.message)
        } else {
            write!(f, "job failed: {}", self.message)
        }
    }
}

impl std::error::Error for JobFailure {}

pub enum JobOutcome {
    Completed(JobOutput),
    Failed(JobFailure),
    Cancelled,
}

impl JobOutcome {
    pub fn status(&self) -> JobStatus {
        match self {
            JobOutcome::Completed(_) => JobStatus::Completed,
            JobOutcome::Failed(_) => JobStatus::Failed,
            JobOutcome::Cancelled => JobStatus::Cancelled,
        }
    }

    pub fn failure(&self) -> Option<&JobFailure> {
        match self {
            JobOutcome::Failed(failure) => Some(failure),
            _ => None,
        }
    }

    /// Unpacks the job's value as `T`.
    pub fn into_result<T: 'static>(self) -> anyhow::Result<T> {
        match self {
            JobOutcome::Completed(value) => value
                .downcast::<T>()
                .map(|v| *v)
                .map_err(|_| {
                    EngineError::ResultType {
                        expected: std::any::type_name::<T>(),
                    }
                    .into()
                }),
            JobOutcome::Failed(failure) => Err(failure.into()),
            JobOutcome::Cancelled => Err(anyhow::anyhow!("job was cancelled")),
        }
    }
}

impl fmt::Debug for JobOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobOutcome::Completed(_) => f.write_str("Completed(..)"),
            JobOutcome::Failed(failure) => f.debug_tuple("Failed").field(failure).finish(),
            JobOutcome::Cancelled => f.write_str("Cancelled"),
        }
    }
}

struct CompletionState {
    status: JobStatus,
    outcome: Option<JobOutcome>,
    finished_at: Option<Instant>,
}

/// The part of a job that outlives its body: status and result, shared
/// between the executor that runs the job and whoever holds its handle.
pub struct Completion {
    id: JobId,
    desc: String,
    state: Mutex<CompletionState>,
    changed: Condvar,
}

impl Completion {
    fn new(id: JobId, desc: String) -> Self {
        Self {
            id,
            desc,
            state: Mutex::new(CompletionState {
                status: JobStatus::Pending,
                outcome: None,
                finished_at: None,
            }),
            changed: Condvar::new(),
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn desc(&self) -> &str {
        &self.desc
    }

    pub fn status(&self) -> JobStatus {
        lock(&self.state).status
    }

    pub fn is_done(&self) -> bool {
        self.status().is_terminal()
    }

    pub(crate) fn finished_at(&self) -> Option<Instant> {
        lock(&self.state).finished_at
    }

    pub(crate) fn failure_message(&self) -> Option<String> {
        lock(&self.state)
            .outcome
            .as_ref()
            .and_then(JobOutcome::failure)
            .map(|f| f.message.clone())
    }

    /// Blocks until the job reaches a terminal state.
    pub fn wait(&self) -> JobStatus {
        let mut state = lock(&self.state);
        while !state.status.is_terminal() {
            state = wait(&self.changed, state);
        }
        state.status
    }

    /// Like [`Completion::wait`], but gives up after `timeout`. Returns `None`
    /// if the job is still unfinished by then.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<JobStatus> {
        let deadline = Instant::now() + timeout;
        let mut state = lock(&self.state);
        while !state.status.is_terminal() {
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            state = wait_timeout(&self.changed, state, deadline - now);
        }
        Some(state.status)
    }

    /// Removes the outcome. `None` if the job is unfinished or the outcome
    /// was already taken.
    pub fn take_outcome(&self) -> Option<JobOutcome> {
        let mut state = lock(&self.state);
        if !state.status.is_terminal() {
            return None;
        }
        state.outcome.take()
    }

    /// Pending -> Running. Returns false if the job is no longer pending.
    fn start(&self) -> bool {
        let mut state = lock(&self.state);
        if state.status != JobStatus::Pending {
            return false;
        }
        state.status = JobStatus::Running;
        true
    }

    fn finish(&self, outcome: JobOutcome) {
        let mut state = lock(&self.state);
        state.status = outcome.status();
        state.outcome = Some(outcome);
        state.finished_at = Some(Instant::now());
        self.changed.notify_all();
    }

    /// Pending -> Cancelled. No-op once the job has started.
    pub(crate) fn cancel(&self) -> bool {
        let mut state = lock(&self.state);
        if state.status != JobStatus::Pending {
            return false;
        }
        state.status = JobStatus::Cancelled;
        state.outcome = Some(JobOutcome::Cancelled);
        state.finished_at = Some(Instant::now());
        self.changed.notify_all();
        true
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("id", &self.id)
            .field("desc", &self.desc)
            .field("status", &self.status())
            .finish()
    }
}

/// A unit of deferred work.
///
/// The body runs at most once: [`Job::run`] consumes the job. Status and
/// result live in a shared [`Completion`] so they can be observed from other
/// threads while and after the executor runs the body.
pub struct Job {
    body: JobBody,
    completion: Arc<Completion>,
}

impl Job {
    pub fn new<F, T>(id: JobId, desc: impl Into<String>, f: F) -> Self
    where
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        Self {
            body: Box::new(move || f().map(|v| Box::new(v) as JobOutput)),
            completion: Arc::new(Completion::new(id, desc.into())),
        }
    }

    pub fn id(&self) -> JobId {
        self.completion.id
    }

    pub fn desc(&self) -> &str {
        &self.completion.desc
    }

    pub fn completion(&self) -> Arc<Completion> {
        self.completion.clone()
    }

    pub fn is_done(&self) -> bool {
        self.completion.is_done()
    }

    pub fn take_result(&self) -> Option<JobOutcome> {
        self.completion.take_outcome()
    }

    pub(crate) fn cancel(&self) -> bool {
        self.completion.cancel()
    }

    /// Runs the body on the calling thread and records the outcome.
    ///
    /// Errors and panics in the body become [`JobOutcome::Failed`]; they never
    /// unwind into the caller. A cancelled job is skipped.
    pub fn run(self) -> JobStatus {
        let Job { body, completion } = self;
        if !completion.start() {
            return completion.status();
        }

        let outcome = match panic::catch_unwind(AssertUnwindSafe(body)) {
            Ok(Ok(value)) => JobOutcome::Completed(value),
            Ok(Err(err)) => JobOutcome::Failed(JobFailure {
                message: format!("{err:#}"),
                panicked: false,
            }),
            Err(payload) => JobOutcome::Failed(JobFailure {
                message: panic_message(payload.as_ref()),
                panicked: true,
            }),
        };
        let status = outcome.status();
        completion.finish(outcome);
        status
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id())
            .field("desc", &self.desc())
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
