// SPDX-License-Identifier: MIT

use std::path::Path;
use std::time::Duration;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Lower clamp for a pool size derived from the hardware.
pub const MIN_WORKERS: usize = 1;
/// Upper clamp for any pool size.
pub const MAX_WORKERS: usize = 64;
/// Used when the number of hardware threads cannot be queried.
pub const FALLBACK_WORKERS: usize = 8;

/// How the engine picks a worker for a new background job.
#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum, Default, Serialize, Deserialize)]
#[clap(rename_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum SelectorKind {
    #[default]
    /// Uniformly random worker
    Random,
    /// Cycle through the workers in order
    RoundRobin,
    /// Worker with the fewest queued jobs
    LeastLoaded,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Explicit pool size. `None` derives it from the hardware.
    pub workers: Option<usize>,
    /// The engine refuses to start with fewer workers than this.
    pub min_workers: usize,
    pub drain_timeout_ms: u64,
    /// Completed jobs whose result nobody takes are reclaimed after this.
    pub reclaim_grace_ms: Option<u64>,
    pub selector: SelectorKind,
    pub seed: Option<u64>,
    pub thread_name_prefix: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: None,
            min_workers: MIN_WORKERS,
            drain_timeout_ms: 2000,
            reclaim_grace_ms: None,
            selector: SelectorKind::default(),
            seed: None,
            thread_name_prefix: "tooibox-worker".to_string(),
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: EngineConfig =
            serde_json::from_str(json).map_err(|e| EngineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == Some(0) {
            return Err(EngineError::Config("workers must be at least 1".into()));
        }
        if let Some(workers) = self.workers {
            if workers > MAX_WORKERS {
                return Err(EngineError::Config(format!(
                    "workers must not exceed {MAX_WORKERS}"
                )));
            }
        }
        if self.min_workers == 0 || self.min_workers > MAX_WORKERS {
            return Err(EngineError::Config(format!(
                "min_workers must be between 1 and {MAX_WORKERS}"
            )));
        }
        Ok(())
    }

    /// Number of workers the engine should try to start.
    pub fn resolved_workers(&self) -> usize {
        match self.workers {
            Some(n) => n,
            None => std::thread::available_parallelism()
                .map(|n| n.get().clamp(MIN_WORKERS, MAX_WORKERS))
                .unwrap_or(FALLBACK_WORKERS),
        }
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    pub fn reclaim_grace(&self) -> Option<Duration> {
        self.reclaim_grace_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_validate() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.selector, SelectorKind::Random);
        assert_eq!(config.drain_timeout(), Duration::from_secs(2));
        assert_eq!(config.reclaim_grace(), None);
    }

    #[test]
    fn test_resolved_workers_is_clamped() {
        let n = EngineConfig::default().resolved_workers();
        assert!((MIN_WORKERS..=MAX_WORKERS).contains(&n));

        let explicit = EngineConfig {
            workers: Some(3),
            ..Default::default()
        };
        assert_eq!(explicit.resolved_workers(), 3);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config =
            EngineConfig::from_json_str(r#"{ "workers": 4, "selector": "round-robin" }"#).unwrap();
        assert_eq!(config.workers, Some(4));
        assert_eq!(config.selector, SelectorKind::RoundRobin);
        assert_eq!(config.min_workers, MIN_WORKERS);
        assert_eq!(config.thread_name_prefix, "tooibox-worker");
    }

    #[test]
    fn test_invalid_json_is_rejected() {
        assert!(matches!(
            EngineConfig::from_json_str(r#"{ "workers": 0 }"#),
            Err(EngineError::Config(_))
        ));
        assert!(matches!(
            EngineConfig::from_json_str(r#"{ "unknown": true }"#),
            Err(EngineError::Config(_))
        ));
        assert!(matches!(
            EngineConfig::from_json_str(r#"{ "min_workers": 0 }"#),
            Err(EngineError::Config(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "drain_timeout_ms": 50, "seed": 7 }}"#).unwrap();
        let config = EngineConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.drain_timeout(), Duration::from_millis(50));
        assert_eq!(config.seed, Some(7));

        assert!(EngineConfig::from_json_file("/nonexistent/tooibox.json").is_err());
    }
}
