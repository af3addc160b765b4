// SPDX-License-Identifier: MIT

pub mod probes;
pub mod recording_sink;

use std::sync::Arc;

use tooibox_jobs::{EngineConfig, JobEngine, JobExecutor, NoopSink, WorkerSelector};

/// Engine with a fixed pool size and a silent sink.
pub fn quiet_engine(workers: usize) -> JobEngine {
    JobEngine::builder()
        .config(EngineConfig {
            workers: Some(workers),
            ..Default::default()
        })
        .sink(Arc::new(NoopSink))
        .build()
        .unwrap_or_else(|e| panic!("failed to build engine: {e}"))
}

/// Like [`quiet_engine`], with an explicit placement strategy.
pub fn engine_with_selector(workers: usize, selector: Box<dyn WorkerSelector>) -> JobEngine {
    JobEngine::builder()
        .config(EngineConfig {
            workers: Some(workers),
            ..Default::default()
        })
        .sink(Arc::new(NoopSink))
        .selector(selector)
        .build()
        .unwrap_or_else(|e| panic!("failed to build engine: {e}"))
}

/// Sends every background job to the same worker.
#[derive(Debug, Clone, Copy)]
pub struct PinnedSelector(pub usize);

impl WorkerSelector for PinnedSelector {
    fn choose(&self, workers: &[JobExecutor]) -> usize {
        self.0.min(workers.len() - 1)
    }
}
