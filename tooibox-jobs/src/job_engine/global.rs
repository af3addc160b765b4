// SPDX-License-Identifier: MIT

//! Optional process-wide engine.
//!
//! Code that can take an `Arc<JobEngine>` should. This is for call sites that
//! cannot be handed one. The engine is created on first use with the default
//! configuration, or installed up front with [`install`]. The thread that
//! creates it becomes the foreground thread.

use std::sync::{Arc, OnceLock};

use crate::config::EngineConfig;
use crate::error::Result;
use crate::job_engine::engine::{JobEngine, ShutdownReport};

static JOB_ENGINE: OnceLock<Arc<JobEngine>> = OnceLock::new();

/// Returns the process-wide engine, creating it if needed.
pub fn instance() -> Result<Arc<JobEngine>> {
    if let Some(engine) = JOB_ENGINE.get() {
        return Ok(engine.clone());
    }
    let engine = Arc::new(JobEngine::new(EngineConfig::default())?);
    // a racing thread may have won; the spare engine shuts down on drop
    Ok(JOB_ENGINE.get_or_init(|| engine).clone())
}

/// Installs `engine` as the process-wide engine. Hands it back if one is
/// already installed.
pub fn install(engine: JobEngine) -> std::result::Result<Arc<JobEngine>, Arc<JobEngine>> {
    let engine = Arc::new(engine);
    JOB_ENGINE.set(engine.clone()).map(|()| engine)
}

pub fn try_instance() -> Option<Arc<JobEngine>> {
    JOB_ENGINE.get().cloned()
}

/// Shuts the process-wide engine down. It stays installed, rejecting new
/// jobs, until the process exits.
pub fn shutdown_global() -> Option<ShutdownReport> {
    JOB_ENGINE.get().map(|engine| engine.shutdown())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job_engine::job::Affinity;

    // The only test touching the global, since it lives for the whole test
    // process.
    #[test]
    fn test_global_lifecycle() {
        let config = EngineConfig {
            workers: Some(2),
            ..Default::default()
        };
        let engine = JobEngine::new(config).unwrap();
        let installed = install(engine).unwrap();
        assert_eq!(installed.worker_count(), 2);

        let again = JobEngine::new(EngineConfig {
            workers: Some(1),
            ..Default::default()
        })
        .unwrap();
        assert!(install(again).is_err());

        let same = instance().unwrap();
        assert!(Arc::ptr_eq(&installed, &same));
        assert!(try_instance().is_some());

        let handle = same.submit(Affinity::Worker, || Ok(5)).unwrap();
        same.wait(handle).unwrap();
        assert_eq!(same.take_value::<i32>(handle).unwrap(), 5);

        assert!(shutdown_global().is_some());
        assert!(same.is_shut_down());
    }
}
