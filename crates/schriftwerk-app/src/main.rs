// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Schriftwerk: fixture-driven font selection runner.
//
// Entry point. Initialises logging, reads a fixture, brings up the worker pool
// and recognition engine, runs font selection and prints the outcome as JSON.
// With the `ocr` feature, recognition can run on a separate pool of `ocrs`
// workers while selection stays on the scripted pool.

mod fixture;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use schriftwerk_core::error::Result;
use schriftwerk_core::types::{OcrPage, RecognitionOutput};
use schriftwerk_fonts::{
    DocumentMetadata, FontContainer, FontSelector, ImageCache, InlineRenderer, MemoryImageCache,
    OptimizationOutcome, PageRenderer, PooledRenderer,
};
use schriftwerk_workers::{JobScheduler, RecognizeJob, StubBackend, StubLog, StubScript};
use serde::Serialize;
use tracing::{error, info, warn};

use fixture::{Fixture, RecognitionBackend};

/// Worker id given to the in-process renderer's backend, outside the pool's
/// range.
const INLINE_WORKER: usize = usize::MAX;

#[derive(Debug, Serialize)]
struct Report {
    metadata: DocumentMetadata,
    container: FontContainer,
    selection: OptimizationOutcome,
    engine_workers: usize,
    recognized: Vec<RecognizedPage>,
}

#[derive(Debug, Serialize)]
struct RecognizedPage {
    recognition: RecognitionOutput,
    converted: OcrPage,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let Some(path) = std::env::args_os().nth(1).map(PathBuf::from) else {
        eprintln!("usage: schriftwerk <fixture.json>");
        return ExitCode::from(2);
    };

    info!("Schriftwerk starting");

    let report = match run(&path).await {
        Ok(report) => report,
        Err(e) => {
            error!(error = %e, "font selection failed");
            return ExitCode::FAILURE;
        }
    };
    match serde_json::to_string_pretty(&report) {
        Ok(json) => {
            println!("{json}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "could not serialise report");
            ExitCode::FAILURE
        }
    }
}

async fn run(path: &Path) -> Result<Report> {
    let fixture = Fixture::load(path)?;
    let metadata = fixture.metadata()?;
    let images = fixture.image_cache()?;
    let script = Arc::new(fixture.script.clone());
    let log = StubLog::new();

    let scheduler = {
        let script = Arc::clone(&script);
        let log = log.clone();
        JobScheduler::new(fixture.engine.clone(), move |id| {
            Ok(StubBackend::new(id, Arc::clone(&script), log.clone()))
        })
    };

    let recognizer = recognition_pool(&fixture)?;
    let recognition = recognizer.as_ref().unwrap_or(&scheduler);

    let result = run_with_pool(
        &scheduler,
        recognition,
        &fixture,
        metadata,
        &images,
        script,
        log,
    )
    .await;
    scheduler.terminate();
    if let Some(recognizer) = &recognizer {
        recognizer.terminate();
    }
    result
}

/// Separate pool for recognition, when the fixture asks for one.
fn recognition_pool(fixture: &Fixture) -> Result<Option<JobScheduler>> {
    match fixture.backend {
        RecognitionBackend::Stub => Ok(None),
        #[cfg(feature = "ocr")]
        RecognitionBackend::Ocrs => {
            use schriftwerk_workers::ocr::{OcrModels, OcrsBackend};

            let models = match &fixture.models_dir {
                Some(dir) => OcrModels::from_dir(dir),
                None => OcrModels::default(),
            };
            if !models.available() {
                warn!(detection = %models.detection.display(), "ocrs models missing");
            }
            Ok(Some(JobScheduler::new(fixture.engine.clone(), move |id| {
                Ok(OcrsBackend::new(id, models.clone()))
            })))
        }
        #[cfg(not(feature = "ocr"))]
        RecognitionBackend::Ocrs => Err(schriftwerk_core::error::SchriftwerkError::Config(
            "the ocrs backend needs a build with the `ocr` feature".into(),
        )),
    }
}

async fn run_with_pool(
    scheduler: &JobScheduler,
    recognition: &JobScheduler,
    fixture: &Fixture,
    metadata: DocumentMetadata,
    images: &MemoryImageCache,
    script: Arc<StubScript>,
    log: StubLog,
) -> Result<Report> {
    scheduler.init().await?;
    recognition.init().await?;
    // Selection does not need the engine; recognition is skipped without it.
    let engine_ok = match recognition.init_engine(fixture.engine_params.clone()).await {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, "recognition engine unavailable");
            false
        }
    };
    info!(
        workers = scheduler.worker_count(),
        engine_workers = recognition.engine_worker_count(),
        mode = ?scheduler.render_mode(),
        backend = ?fixture.backend,
        "pool ready"
    );

    let mut container = FontContainer::new();
    metadata.apply_defaults(&mut container);

    let selection = if scheduler.render_mode().is_concurrent() {
        let renderer = PooledRenderer::new(scheduler.clone());
        select(scheduler, &renderer, images, fixture, &metadata, &mut container).await?
    } else {
        let backend = StubBackend::new(INLINE_WORKER, script, log);
        let renderer = InlineRenderer::start(backend).await?;
        select(scheduler, &renderer, images, fixture, &metadata, &mut container).await?
    };

    let recognized = if fixture.recognize && engine_ok {
        recognize_pages(recognition, images).await?
    } else {
        Vec::new()
    };

    Ok(Report {
        metadata,
        container,
        selection,
        engine_workers: recognition.engine_worker_count(),
        recognized,
    })
}

async fn select<R: PageRenderer, C: ImageCache>(
    scheduler: &JobScheduler,
    renderer: &R,
    images: &C,
    fixture: &Fixture,
    metadata: &DocumentMetadata,
    container: &mut FontContainer,
) -> Result<OptimizationOutcome> {
    let source = fixture.font_source();
    FontSelector::new(scheduler, renderer, images)
        .with_config(scheduler.config())
        .run(
            container,
            source.as_ref(),
            &fixture.pages,
            metadata.font_metrics.as_ref(),
        )
        .await
}

/// Recognise every reference page, taking the text as soon as it is ready
/// and the converted page when the worker finishes.
async fn recognize_pages(
    scheduler: &JobScheduler,
    images: &MemoryImageCache,
) -> Result<Vec<RecognizedPage>> {
    let mut pages = Vec::with_capacity(images.page_count());
    for page in 0..images.page_count() {
        let image = images.get_binary(page).await?;
        let reply = scheduler
            .recognize_and_convert(RecognizeJob {
                image,
                char_level: false,
            })
            .await?;
        let recognition = reply.primary.await?.into_recognition("recognizeAndConvert")?;
        info!(page, chars = recognition.text.len(), "page recognised");
        let converted = reply.secondary.await?.into_converted_page("recognizeAndConvert")?;
        pages.push(RecognizedPage {
            recognition,
            converted,
        });
    }
    Ok(pages)
}
