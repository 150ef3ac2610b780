// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for Schriftwerk.

use thiserror::Error;

/// Top-level error type for all Schriftwerk operations.
#[derive(Debug, Error)]
pub enum SchriftwerkError {
    // -- Scheduler / worker errors --
    #[error("job scheduler has not been initialised")]
    SchedulerNotInitialized,

    #[error("worker {worker} failed to initialise: {reason}")]
    WorkerInit { worker: usize, reason: String },

    #[error("worker {worker} failed `{operation}`: {message}")]
    Worker {
        worker: usize,
        operation: String,
        message: String,
    },

    #[error("worker {worker} exited before replying")]
    WorkerGone { worker: usize },

    #[error("worker {worker} was terminated")]
    WorkerTerminated { worker: usize },

    #[error("operation `{0}` is not supported by this worker backend")]
    Unsupported(String),

    #[error("`{operation}` returned an unexpected response: {got}")]
    UnexpectedResponse { operation: String, got: String },

    #[error("readiness gate failed: {0}")]
    GateFailed(String),

    #[error("recognition engine initialisation failed: {0}")]
    EngineInit(String),

    #[error("background task failed: {0}")]
    TaskJoin(String),

    // -- Font evaluation errors --
    #[error("invalid metric {value} for {family} on page {page}")]
    InvalidMetric {
        family: String,
        page: usize,
        value: f64,
    },

    #[error("no reference image for page {0}")]
    MissingImage(usize),

    #[error("font loading failed: {0}")]
    FontLoad(String),

    #[error("document metadata error: {0}")]
    Metadata(String),

    #[error("image processing failed: {0}")]
    ImageError(String),

    #[error("configuration error: {0}")]
    Config(String),

    // -- Storage / persistence --
    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, SchriftwerkError>;
