// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Recognition backend built on `ocrs`.
//
// Only available with the `ocr` feature. The engine needs two model files,
// `text-detection.rten` and `text-recognition.rten`, by default read from
// `$XDG_CACHE_HOME/ocrs` (where `ocrs-cli` downloads them).
//
// This backend recognises text. Page rendering and glyph optimization belong
// to a renderer backend, so those operations report `Unsupported`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::DynamicImage;
use ocrs::{ImageSource, OcrEngine, OcrEngineParams};
use rten::Model;
use schriftwerk_core::error::{Result, SchriftwerkError};
use schriftwerk_core::types::{OcrPage, OcrWord, RecognitionOutput};
use tracing::{debug, info, instrument};

use crate::backend::{EarlyReply, WorkerBackend};
use crate::protocol::{RecognizeJob, ReinitializeJob, WorkRequest, WorkResponse};

const DETECTION_MODEL_FILENAME: &str = "text-detection.rten";
const RECOGNITION_MODEL_FILENAME: &str = "text-recognition.rten";

fn default_model_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CACHE_HOME") {
        PathBuf::from(xdg).join("ocrs")
    } else if let Ok(home) = std::env::var("HOME") {
        PathBuf::from(home).join(".cache").join("ocrs")
    } else {
        PathBuf::from("ocrs-models")
    }
}

/// Model locations for [`OcrsBackend`].
#[derive(Debug, Clone)]
pub struct OcrModels {
    pub detection: PathBuf,
    pub recognition: PathBuf,
}

impl Default for OcrModels {
    fn default() -> Self {
        Self::from_dir(default_model_dir())
    }
}

impl OcrModels {
    pub fn from_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            detection: dir.join(DETECTION_MODEL_FILENAME),
            recognition: dir.join(RECOGNITION_MODEL_FILENAME),
        }
    }

    pub fn available(&self) -> bool {
        self.detection.exists() && self.recognition.exists()
    }

    #[instrument(skip_all, fields(detection = %self.detection.display()))]
    fn load(&self) -> Result<OcrEngine> {
        if !self.available() {
            return Err(SchriftwerkError::EngineInit(format!(
                "OCR models not found in {}; run `ocrs-cli` once to download them",
                self.detection
                    .parent()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default()
            )));
        }
        let detection_model = Model::load_file(&self.detection).map_err(|err| {
            SchriftwerkError::EngineInit(format!(
                "failed to load detection model from {}: {err}",
                self.detection.display()
            ))
        })?;
        let recognition_model = Model::load_file(&self.recognition).map_err(|err| {
            SchriftwerkError::EngineInit(format!(
                "failed to load recognition model from {}: {err}",
                self.recognition.display()
            ))
        })?;
        let engine = OcrEngine::new(OcrEngineParams {
            detection_model: Some(detection_model),
            recognition_model: Some(recognition_model),
            ..Default::default()
        })
        .map_err(|err| SchriftwerkError::EngineInit(format!("failed to initialise OCR engine: {err}")))?;
        info!("OCR engine loaded");
        Ok(engine)
    }
}

/// Worker backend that runs `ocrs` on page images.
pub struct OcrsBackend {
    worker: usize,
    models: OcrModels,
    engine: Option<Arc<OcrEngine>>,
}

impl OcrsBackend {
    pub fn new(worker: usize, models: OcrModels) -> Self {
        Self {
            worker,
            models,
            engine: None,
        }
    }

    async fn reinitialize(&mut self, job: ReinitializeJob) -> Result<()> {
        // ocrs ships a single Latin-script model; language lists only select it.
        if !job.languages.iter().any(|l| l == "eng") {
            return Err(SchriftwerkError::EngineInit(format!(
                "languages {:?} are not supported by the ocrs models",
                job.languages
            )));
        }
        let models = self.models.clone();
        let engine = tokio::task::spawn_blocking(move || models.load())
            .await
            .map_err(|e| SchriftwerkError::TaskJoin(e.to_string()))??;
        self.engine = Some(Arc::new(engine));
        debug!(worker = self.worker, "engine reloaded");
        Ok(())
    }

    async fn recognize(&self, job: &RecognizeJob) -> Result<RecognitionOutput> {
        let engine = self.engine.clone().ok_or_else(|| {
            SchriftwerkError::EngineInit(format!(
                "worker {} has no recognition engine loaded",
                self.worker
            ))
        })?;
        let image = Arc::clone(&job.image.image);
        tokio::task::spawn_blocking(move || run_ocr(&engine, &image))
            .await
            .map_err(|e| SchriftwerkError::TaskJoin(e.to_string()))?
    }
}

fn run_ocr(engine: &OcrEngine, image: &image::GrayImage) -> Result<RecognitionOutput> {
    let rgb = DynamicImage::ImageLuma8(image.clone()).to_rgb8();
    let (width, height) = rgb.dimensions();
    let source = ImageSource::from_bytes(rgb.as_raw(), (width, height)).map_err(|err| {
        SchriftwerkError::ImageError(format!("failed to create image source ({width}x{height}): {err}"))
    })?;
    let input = engine
        .prepare_input(source)
        .map_err(|err| SchriftwerkError::ImageError(format!("OCR preprocessing failed: {err}")))?;

    let word_rects = engine
        .detect_words(&input)
        .map_err(|err| SchriftwerkError::EngineInit(format!("word detection failed: {err}")))?;
    let line_rects = engine.find_text_lines(&input, &word_rects);
    let lines = engine
        .recognize_text(&input, &line_rects)
        .map_err(|err| SchriftwerkError::EngineInit(format!("line recognition failed: {err}")))?;

    let mut text = String::new();
    let mut words = Vec::new();
    for line in lines.iter().flatten() {
        let line = line.to_string();
        if line.trim().is_empty() {
            continue;
        }
        words.extend(line.split_whitespace().map(|w| OcrWord {
            text: w.to_string(),
            bbox: Default::default(),
            conf: 0.0,
        }));
        text.push_str(&line);
        text.push('\n');
    }
    debug!(words = words.len(), "recognition complete");

    Ok(RecognitionOutput {
        text,
        confidence: 0.0,
        words,
    })
}

impl WorkerBackend for OcrsBackend {
    async fn init(&mut self) -> Result<()> {
        // The engine is loaded on demand by `reinitialize`.
        Ok(())
    }

    async fn call(&mut self, request: WorkRequest) -> Result<WorkResponse> {
        match request {
            WorkRequest::Recognize(job) => self.recognize(&job).await.map(WorkResponse::Recognition),
            WorkRequest::Reinitialize(job) => self.reinitialize(job).await.map(|()| WorkResponse::Ack),
            // Fonts only matter to renderers.
            WorkRequest::LoadFonts { .. } | WorkRequest::SetFontActive(_) => Ok(WorkResponse::Ack),
            other => Err(SchriftwerkError::Unsupported(other.operation().into())),
        }
    }

    async fn call_dual(&mut self, request: WorkRequest, early: EarlyReply) -> Result<WorkResponse> {
        let operation = request.operation();
        let WorkRequest::RecognizeAndConvert(job) = request else {
            early.send(Err(SchriftwerkError::Unsupported(operation.into())));
            return Err(SchriftwerkError::Unsupported(operation.into()));
        };
        let recognition = self.recognize(&job).await;
        let words = match &recognition {
            Ok(output) => output.words.clone(),
            Err(e) => {
                let message = e.to_string();
                early.send(recognition.map(WorkResponse::Recognition));
                return Err(SchriftwerkError::EngineInit(message));
            }
        };
        early.send(recognition.map(WorkResponse::Recognition));

        let mut page = OcrPage::new(job.image.page);
        page.dims = job.image.dimensions();
        page.words = words;
        Ok(WorkResponse::ConvertedPage(page))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn models_resolve_inside_directory() {
        let models = OcrModels::from_dir("/tmp/models");
        assert_eq!(models.detection, PathBuf::from("/tmp/models/text-detection.rten"));
        assert_eq!(models.recognition, PathBuf::from("/tmp/models/text-recognition.rten"));
    }

    #[tokio::test]
    async fn missing_models_fail_engine_load() {
        let dir = std::env::temp_dir().join("schriftwerk-no-models");
        let mut backend = OcrsBackend::new(0, OcrModels::from_dir(dir));
        let err = backend
            .call(WorkRequest::Reinitialize(ReinitializeJob {
                languages: vec!["eng".into()],
                variant: schriftwerk_core::types::EngineVariant::Scribe,
            }))
            .await
            .unwrap_err();
        assert!(matches!(err, SchriftwerkError::EngineInit(_)));
    }
}
