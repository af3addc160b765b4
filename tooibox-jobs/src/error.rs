// SPDX-License-Identifier: MIT

use thiserror::Error;

use crate::job_engine::registry::JobHandle;

#[derive(Debug, Error)]
pub enum EngineError {
    /// The handle is invalid or its slot has already been reclaimed.
    #[error("job {0:?} not found (invalid or already reclaimed)")]
    NotFound(JobHandle),

    #[error("job {0:?} has not finished yet")]
    NotDone(JobHandle),

    /// A foreground job waited on another foreground job that can only run
    /// on a later pump.
    #[error("job {0:?} cannot run until the current foreground pump returns")]
    WaitInsidePump(JobHandle),

    #[error("executor {0} is shut down and does not accept jobs")]
    ExecutorStopped(String),

    #[error("executor {executor} may only be pumped from its foreground thread")]
    WrongThread { executor: String },

    #[error("could only start {spawned} worker threads, at least {required} are required")]
    ThreadSpawn {
        spawned: usize,
        required: usize,
        #[source]
        source: std::io::Error,
    },

    #[error("the job engine has already been shut down")]
    AlreadyShutDown,

    #[error("invalid engine configuration: {0}")]
    Config(String),

    #[error("job result is not of type {expected}")]
    ResultType { expected: &'static str },
}

pub type Result<T> = std::result::Result<T, EngineError>;

/// Reports a programmer error. Debug builds panic on the spot; release builds
/// log it and hand the error back to the caller.
///
/// Must not be called while holding any engine lock.
pub(crate) fn usage_error(
    sink: &dyn crate::log_sink::LogSink,
    category: &str,
    err: EngineError,
) -> EngineError {
    sink.log(
        &format!("usage error: {err}"),
        category,
        crate::log_sink::Severity::Error,
    );
    if cfg!(debug_assertions) {
        panic!("usage error: {err}");
    }
    err
}
