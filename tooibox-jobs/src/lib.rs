// SPDX-License-Identifier: MIT
//
// tooibox-jobs: in-process job engine for a frame-driven application.
//
// - Background jobs run on a fixed pool of worker threads.
// - Foreground jobs run on the main thread whenever it pumps the foreground
//   executor, for work that must not leave that thread.

pub mod config;
pub mod error;
pub mod handle;
pub mod job_engine;
pub mod log_sink;

pub use config::{EngineConfig, SelectorKind};
pub use error::{EngineError, Result};
pub use handle::Handle;
pub use job_engine::engine::{EngineBuilder, JobEngine, JobRef, ShutdownReport};
pub use job_engine::executor::{ExecutorKind, ExecutorState, JobExecutor};
pub use job_engine::job::{Affinity, Job, JobFailure, JobId, JobOutcome, JobStatus};
pub use job_engine::registry::{JobHandle, Placement};
pub use job_engine::selector::{
    LeastLoadedSelector, RandomSelector, RoundRobinSelector, WorkerSelector,
};
pub use log_sink::{LogCrateSink, LogSink, NoopSink, Severity};
