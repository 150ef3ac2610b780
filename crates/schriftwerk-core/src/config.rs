// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Engine configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SchriftwerkError};
use crate::types::{EngineVariant, RenderMode};

/// Upper bound on pool size. Higher counts run into per-worker memory limits
/// long before they stop paying off.
pub const MAX_WORKERS: usize = 6;

/// Words sampled per candidate font before evaluation stops.
pub const DEFAULT_SAMPLE_WORDS: u64 = 500;

/// Pages sampled when validating fonts against reference images.
pub const DEFAULT_SAMPLE_PAGES: usize = 5;

/// Persistent engine settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Whether page rendering may run inside pooled workers.
    pub render_mode: RenderMode,
    /// Cap on the number of workers in concurrent mode.
    pub max_workers: usize,
    /// Explicit worker count, overriding the parallelism-based default.
    pub worker_count: Option<usize>,
    /// Recognition languages loaded by `init_engine`.
    pub languages: Vec<String>,
    /// Recognition engine build to load.
    pub engine_variant: EngineVariant,
    /// Word budget per candidate font.
    pub sample_words: u64,
    /// Page budget for font validation.
    pub sample_pages: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            render_mode: RenderMode::Concurrent,
            max_workers: MAX_WORKERS,
            worker_count: None,
            languages: vec!["eng".to_string()],
            engine_variant: EngineVariant::Scribe,
            sample_words: DEFAULT_SAMPLE_WORDS,
            sample_pages: DEFAULT_SAMPLE_PAGES,
        }
    }
}

impl EngineConfig {
    /// Number of workers to spawn given the host's available parallelism.
    ///
    /// Inline mode always uses exactly one worker. Concurrent mode uses half
    /// the available cores, capped at `max_workers` and never below one.
    pub fn worker_count_for(&self, available_parallelism: usize) -> usize {
        let cap = self.max_workers.max(1);
        if self.render_mode == RenderMode::Inline {
            return 1;
        }
        match self.worker_count {
            Some(n) => n.clamp(1, cap),
            None => (available_parallelism / 2).clamp(1, cap),
        }
    }

    /// Worker count for the current host.
    pub fn worker_count(&self) -> usize {
        let parallelism = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        self.worker_count_for(parallelism)
    }

    /// Read a configuration file written by [`persist`](Self::persist).
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&data)?;
        config.validate()?;
        Ok(config)
    }

    /// Write this configuration as pretty-printed JSON.
    pub fn persist(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), json)?;
        Ok(())
    }

    /// Reject settings that would make evaluation meaningless.
    pub fn validate(&self) -> Result<()> {
        if self.max_workers == 0 {
            return Err(SchriftwerkError::Config("max_workers must be at least 1".into()));
        }
        if self.sample_pages == 0 {
            return Err(SchriftwerkError::Config("sample_pages must be at least 1".into()));
        }
        if self.languages.is_empty() {
            return Err(SchriftwerkError::Config("at least one language is required".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_engine_limits() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.max_workers, 6);
        assert_eq!(cfg.sample_words, 500);
        assert_eq!(cfg.sample_pages, 5);
        assert_eq!(cfg.languages, vec!["eng".to_string()]);
        assert!(cfg.worker_count.is_none());
    }

    #[test]
    fn concurrent_mode_uses_half_the_cores_capped_at_six() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.worker_count_for(8), 4);
        assert_eq!(cfg.worker_count_for(7), 3);
        assert_eq!(cfg.worker_count_for(32), 6);
    }

    #[test]
    fn single_core_still_gets_one_worker() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.worker_count_for(1), 1);
        assert_eq!(cfg.worker_count_for(0), 1);
    }

    #[test]
    fn inline_mode_uses_exactly_one_worker() {
        let cfg = EngineConfig {
            render_mode: RenderMode::Inline,
            worker_count: Some(4),
            ..Default::default()
        };
        assert_eq!(cfg.worker_count_for(16), 1);
    }

    #[test]
    fn explicit_worker_count_is_clamped() {
        let cfg = EngineConfig {
            worker_count: Some(20),
            ..Default::default()
        };
        assert_eq!(cfg.worker_count_for(2), 6);

        let cfg = EngineConfig {
            worker_count: Some(0),
            ..Default::default()
        };
        assert_eq!(cfg.worker_count_for(2), 1);
    }

    #[test]
    fn persist_then_load_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.json");
        let cfg = EngineConfig {
            render_mode: RenderMode::Inline,
            languages: vec!["eng".into(), "deu".into()],
            sample_words: 200,
            ..Default::default()
        };
        cfg.persist(&path).unwrap();
        assert_eq!(EngineConfig::load(&path).unwrap(), cfg);
    }

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.json");
        std::fs::write(&path, r#"{ "sample_pages": 2 }"#).unwrap();
        let cfg = EngineConfig::load(&path).unwrap();
        assert_eq!(cfg.sample_pages, 2);
        assert_eq!(cfg.max_workers, MAX_WORKERS);
    }

    #[test]
    fn zero_sample_pages_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.json");
        std::fs::write(&path, r#"{ "sample_pages": 0 }"#).unwrap();
        assert!(matches!(
            EngineConfig::load(&path),
            Err(SchriftwerkError::Config(_))
        ));
    }
}
