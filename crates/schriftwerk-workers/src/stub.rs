// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Scripted backend for tests, benches and machines without a recognition
// engine or renderer.
//
// Behaviour is driven by a `StubScript`: per-family page scores, which
// workers fail to start or to load an engine, and artificial delays. Every
// call is recorded in a shared `StubLog` so callers can assert on what was
// dispatched where.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use schriftwerk_core::error::{Result, SchriftwerkError};
use schriftwerk_core::types::{
    ActiveFontConfig, CatalogueKind, EvaluationResult, FontData, FontFamily, OcrPage,
    RecognitionOutput,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::backend::{EarlyReply, WorkerBackend};
use crate::protocol::{
    EvalPageFontJob, OptimizeFontJob, RecognizeJob, ReinitializeJob, WorkRequest, WorkResponse,
};

/// Per-word distance used when a family has no scripted score.
pub const DEFAULT_WORD_METRIC: f64 = 1.0;

/// Scripted behaviour shared by every stub worker of a pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StubScript {
    /// Per-word distance for each family rendered with its raw font.
    pub raw_metric: BTreeMap<FontFamily, f64>,
    /// Per-word distance for each family rendered with its optimized font.
    pub optimized_metric: BTreeMap<FontFamily, f64>,
    /// Families whose page comparison fails.
    pub fail_eval: BTreeSet<FontFamily>,
    /// Workers whose startup fails.
    pub fail_init: BTreeSet<usize>,
    /// Workers that cannot load a recognition engine.
    pub fail_reinit: BTreeSet<usize>,
    /// Whether `optimizeFont` produces adjusted fonts.
    pub optimize: bool,
    pub init_delay_ms: u64,
    pub job_delay_ms: u64,
}

impl Default for StubScript {
    fn default() -> Self {
        Self {
            raw_metric: BTreeMap::new(),
            optimized_metric: BTreeMap::new(),
            fail_eval: BTreeSet::new(),
            fail_init: BTreeSet::new(),
            fail_reinit: BTreeSet::new(),
            optimize: true,
            init_delay_ms: 0,
            job_delay_ms: 0,
        }
    }
}

/// One call observed by a stub worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRecord {
    pub worker: usize,
    pub operation: &'static str,
    /// Family for font operations.
    pub family: Option<FontFamily>,
    /// Requested languages for engine loads.
    pub languages: Vec<String>,
}

/// Call log shared by all stub workers of a pool.
#[derive(Debug, Clone, Default)]
pub struct StubLog(Arc<Mutex<Vec<CallRecord>>>);

impl StubLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, record: CallRecord) {
        self.0
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(record);
    }

    pub fn records(&self) -> Vec<CallRecord> {
        self.0
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Number of calls of `operation` across all workers.
    pub fn count(&self, operation: &str) -> usize {
        self.records()
            .iter()
            .filter(|r| r.operation == operation)
            .count()
    }

    /// Workers that received `operation`, in call order.
    pub fn workers_for(&self, operation: &str) -> Vec<usize> {
        self.records()
            .iter()
            .filter(|r| r.operation == operation)
            .map(|r| r.worker)
            .collect()
    }
}

/// Deterministic in-process worker backend.
pub struct StubBackend {
    worker: usize,
    script: Arc<StubScript>,
    log: StubLog,
    engine: Option<ReinitializeJob>,
    optimized_loaded: BTreeSet<FontFamily>,
    active: ActiveFontConfig,
}

impl StubBackend {
    pub fn new(worker: usize, script: Arc<StubScript>, log: StubLog) -> Self {
        Self {
            worker,
            script,
            log,
            engine: None,
            optimized_loaded: BTreeSet::new(),
            active: ActiveFontConfig::default(),
        }
    }

    async fn pause(&self) {
        if self.script.job_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.script.job_delay_ms)).await;
        }
    }

    fn record(&self, operation: &'static str, family: Option<FontFamily>) {
        self.log.push(CallRecord {
            worker: self.worker,
            operation,
            family,
            languages: Vec::new(),
        });
    }

    fn eval_page(&self, job: &EvalPageFontJob) -> Result<EvaluationResult> {
        if self.script.fail_eval.contains(&job.family) {
            return Err(SchriftwerkError::Worker {
                worker: self.worker,
                operation: "evalPageFont".into(),
                message: format!("cannot render {}", job.family),
            });
        }
        let wants_optimized = job.use_optimized || self.active.uses_optimized(job.family);
        let optimized = wants_optimized && self.optimized_loaded.contains(&job.family);
        let scores = if optimized {
            &self.script.optimized_metric
        } else {
            &self.script.raw_metric
        };
        let per_word = scores
            .get(&job.family)
            .copied()
            .unwrap_or(DEFAULT_WORD_METRIC);
        let words = job.page.word_count() as u64;
        Ok(EvaluationResult::new(per_word * words as f64, words))
    }

    fn optimize(&self, job: OptimizeFontJob) -> Option<FontData> {
        let has_metrics = job
            .metrics
            .normal
            .as_ref()
            .is_some_and(|normal| normal.obs > 0);
        if !self.script.optimize || !has_metrics {
            return None;
        }
        let mut source = job.font.source;
        source.extend_from_slice(b"+opt");
        Some(FontData {
            family: job.font.family,
            optimized: true,
            source,
        })
    }

    fn recognize(&self, job: &RecognizeJob) -> Result<RecognitionOutput> {
        if self.engine.is_none() {
            return Err(SchriftwerkError::EngineInit(format!(
                "worker {} has no recognition engine loaded",
                self.worker
            )));
        }
        Ok(RecognitionOutput {
            text: format!("page {}", job.image.page),
            confidence: 1.0,
            words: Vec::new(),
        })
    }
}

impl WorkerBackend for StubBackend {
    async fn init(&mut self) -> Result<()> {
        if self.script.init_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.script.init_delay_ms)).await;
        }
        if self.script.fail_init.contains(&self.worker) {
            return Err(SchriftwerkError::WorkerInit {
                worker: self.worker,
                reason: "scripted startup failure".into(),
            });
        }
        debug!(worker = self.worker, "stub worker ready");
        Ok(())
    }

    async fn call(&mut self, request: WorkRequest) -> Result<WorkResponse> {
        self.pause().await;
        match request {
            WorkRequest::EvalPageFont(job) => {
                self.record("evalPageFont", Some(job.family));
                self.eval_page(&job).map(WorkResponse::PageMetric)
            }
            WorkRequest::OptimizeFont(job) => {
                self.record("optimizeFont", Some(job.font.family));
                Ok(WorkResponse::OptimizedFont(self.optimize(job)))
            }
            WorkRequest::Recognize(job) => {
                self.record("recognize", None);
                self.recognize(&job).map(WorkResponse::Recognition)
            }
            WorkRequest::LoadFonts { kind, fonts } => {
                self.record("loadFonts", None);
                if kind != CatalogueKind::Raw {
                    self.optimized_loaded
                        .extend(fonts.iter().filter(|f| f.optimized).map(|f| f.family));
                }
                Ok(WorkResponse::Ack)
            }
            WorkRequest::SetFontActive(config) => {
                self.record("setFontActive", None);
                self.active = config;
                Ok(WorkResponse::Ack)
            }
            WorkRequest::Reinitialize(job) => {
                self.log.push(CallRecord {
                    worker: self.worker,
                    operation: "reinitialize",
                    family: None,
                    languages: job.languages.clone(),
                });
                if self.script.fail_reinit.contains(&self.worker) {
                    self.engine = None;
                    warn!(worker = self.worker, "scripted engine load failure");
                    return Err(SchriftwerkError::EngineInit(format!(
                        "worker {} could not load {:?}",
                        self.worker, job.languages
                    )));
                }
                self.engine = Some(job);
                Ok(WorkResponse::Ack)
            }
            other @ WorkRequest::RecognizeAndConvert(_) => {
                Err(SchriftwerkError::Unsupported(other.operation().into()))
            }
        }
    }

    async fn call_dual(&mut self, request: WorkRequest, early: EarlyReply) -> Result<WorkResponse> {
        self.pause().await;
        let operation = request.operation();
        let WorkRequest::RecognizeAndConvert(job) = request else {
            early.send(Err(SchriftwerkError::Unsupported(operation.into())));
            return Err(SchriftwerkError::Unsupported(operation.into()));
        };
        self.record("recognizeAndConvert", None);

        let recognition = match self.recognize(&job) {
            Ok(output) => output,
            Err(e) => {
                early.send(Err(SchriftwerkError::EngineInit(e.to_string())));
                return Err(e);
            }
        };
        early.send(Ok(WorkResponse::Recognition(recognition)));

        self.pause().await;
        let mut page = OcrPage::new(job.image.page);
        page.dims = job.image.dimensions();
        Ok(WorkResponse::ConvertedPage(page))
    }
}
