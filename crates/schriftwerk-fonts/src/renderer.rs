// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Page rendering capability.
//
// Where page comparison runs is decided once, when the renderer is built:
// `PooledRenderer` sends every comparison to the worker pool, `InlineRenderer`
// runs it on the calling task with a backend of its own.

use std::future::Future;

use schriftwerk_core::error::Result;
use schriftwerk_core::types::{ActiveFontConfig, CatalogueKind, EvaluationResult, FontSet, RenderMode};
use schriftwerk_workers::{EvalPageFontJob, JobScheduler, WorkRequest, WorkerBackend};
use tokio::sync::Mutex;
use tracing::debug;

/// Renders a page in a candidate font and scores it against the reference.
pub trait PageRenderer: Send + Sync {
    fn mode(&self) -> RenderMode;

    fn eval_page_font(
        &self,
        job: EvalPageFontJob,
    ) -> impl Future<Output = Result<EvaluationResult>> + Send;

    /// Register a font catalogue with the renderer itself. Pooled workers
    /// receive catalogues through the scheduler instead.
    fn load_fonts(
        &self,
        kind: CatalogueKind,
        fonts: &FontSet,
    ) -> impl Future<Output = Result<()>> + Send;

    fn set_font_active(&self, config: &ActiveFontConfig) -> impl Future<Output = Result<()>> + Send;
}

/// Comparisons run on pooled workers, several at once.
#[derive(Clone)]
pub struct PooledRenderer {
    scheduler: JobScheduler,
}

impl PooledRenderer {
    pub fn new(scheduler: JobScheduler) -> Self {
        Self { scheduler }
    }
}

impl PageRenderer for PooledRenderer {
    fn mode(&self) -> RenderMode {
        RenderMode::Concurrent
    }

    async fn eval_page_font(&self, job: EvalPageFontJob) -> Result<EvaluationResult> {
        self.scheduler.eval_page_font(job).await
    }

    async fn load_fonts(&self, _kind: CatalogueKind, _fonts: &FontSet) -> Result<()> {
        Ok(())
    }

    async fn set_font_active(&self, _config: &ActiveFontConfig) -> Result<()> {
        Ok(())
    }
}

/// Comparisons run in-process, one at a time.
pub struct InlineRenderer<B> {
    backend: Mutex<B>,
}

impl<B: WorkerBackend> InlineRenderer<B> {
    /// Prepare `backend` and wrap it.
    pub async fn start(mut backend: B) -> Result<Self> {
        backend.init().await?;
        debug!("inline renderer ready");
        Ok(Self {
            backend: Mutex::new(backend),
        })
    }
}

impl<B: WorkerBackend> PageRenderer for InlineRenderer<B> {
    fn mode(&self) -> RenderMode {
        RenderMode::Inline
    }

    async fn eval_page_font(&self, job: EvalPageFontJob) -> Result<EvaluationResult> {
        let request = WorkRequest::EvalPageFont(job);
        let op = request.operation();
        self.backend
            .lock()
            .await
            .call(request)
            .await?
            .into_page_metric(op)
    }

    async fn load_fonts(&self, kind: CatalogueKind, fonts: &FontSet) -> Result<()> {
        let request = WorkRequest::LoadFonts {
            kind,
            fonts: fonts.clone(),
        };
        let op = request.operation();
        self.backend.lock().await.call(request).await?.into_ack(op)
    }

    async fn set_font_active(&self, config: &ActiveFontConfig) -> Result<()> {
        let request = WorkRequest::SetFontActive(config.clone());
        let op = request.operation();
        self.backend.lock().await.call(request).await?.into_ack(op)
    }
}
