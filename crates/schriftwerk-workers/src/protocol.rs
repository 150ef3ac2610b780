// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Message protocol between the scheduler and its workers.
//
// Every request travels in an envelope tagged with a request id. Replies are
// keyed by a correlation id: the request id plus a slot. Single-result
// operations reply on the primary slot only; dual-result operations reply
// on both, at independent times. Request id 0 is reserved for the worker's
// startup readiness reply.

use std::fmt;

use schriftwerk_core::error::{Result, SchriftwerkError};
use schriftwerk_core::types::{
    ActiveFontConfig, CatalogueKind, EngineVariant, EvaluationResult, FontData, FontFamily,
    FontMetricsFamily, FontSet, OcrPage, RecognitionOutput, ReferenceImage,
};

/// Compare one page rendered in a candidate font against its reference image.
#[derive(Debug, Clone)]
pub struct EvalPageFontJob {
    pub family: FontFamily,
    pub page: OcrPage,
    pub image: ReferenceImage,
    /// Render with the optimized variant instead of the raw font.
    pub use_optimized: bool,
}

/// Adjust one family's glyphs using measured document metrics.
#[derive(Debug, Clone)]
pub struct OptimizeFontJob {
    pub font: FontData,
    pub metrics: FontMetricsFamily,
}

/// Run text recognition on a page image.
#[derive(Debug, Clone)]
pub struct RecognizeJob {
    pub image: ReferenceImage,
    /// Request character-level output in addition to words.
    pub char_level: bool,
}

/// Load a (possibly different) recognition engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReinitializeJob {
    pub languages: Vec<String>,
    pub variant: EngineVariant,
}

/// Operations a worker exposes.
#[derive(Debug, Clone)]
pub enum WorkRequest {
    EvalPageFont(EvalPageFontJob),
    OptimizeFont(OptimizeFontJob),
    Recognize(RecognizeJob),
    /// Dual result: the recognition output first, the converted page later.
    RecognizeAndConvert(RecognizeJob),
    LoadFonts { kind: CatalogueKind, fonts: FontSet },
    SetFontActive(ActiveFontConfig),
    Reinitialize(ReinitializeJob),
}

impl WorkRequest {
    /// Stable operation name, used in logs and errors.
    pub fn operation(&self) -> &'static str {
        match self {
            Self::EvalPageFont(_) => "evalPageFont",
            Self::OptimizeFont(_) => "optimizeFont",
            Self::Recognize(_) => "recognize",
            Self::RecognizeAndConvert(_) => "recognizeAndConvert",
            Self::LoadFonts { .. } => "loadFonts",
            Self::SetFontActive(_) => "setFontActive",
            Self::Reinitialize(_) => "reinitialize",
        }
    }

    /// Whether the operation needs a loaded recognition engine.
    pub fn requires_engine(&self) -> bool {
        matches!(self, Self::Recognize(_) | Self::RecognizeAndConvert(_))
    }

    /// Whether the operation replies on both slots.
    pub fn is_dual(&self) -> bool {
        matches!(self, Self::RecognizeAndConvert(_))
    }
}

/// Worker replies.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkResponse {
    Ready,
    Ack,
    PageMetric(EvaluationResult),
    /// `None` when the metrics were too sparse to adjust anything.
    OptimizedFont(Option<FontData>),
    Recognition(RecognitionOutput),
    ConvertedPage(OcrPage),
}

impl WorkResponse {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::Ack => "ack",
            Self::PageMetric(_) => "page-metric",
            Self::OptimizedFont(_) => "optimized-font",
            Self::Recognition(_) => "recognition",
            Self::ConvertedPage(_) => "converted-page",
        }
    }

    fn unexpected(self, operation: &str) -> SchriftwerkError {
        SchriftwerkError::UnexpectedResponse {
            operation: operation.to_string(),
            got: self.kind().to_string(),
        }
    }

    pub fn into_ack(self, operation: &str) -> Result<()> {
        match self {
            Self::Ack | Self::Ready => Ok(()),
            other => Err(other.unexpected(operation)),
        }
    }

    pub fn into_page_metric(self, operation: &str) -> Result<EvaluationResult> {
        match self {
            Self::PageMetric(result) => Ok(result),
            other => Err(other.unexpected(operation)),
        }
    }

    pub fn into_optimized_font(self, operation: &str) -> Result<Option<FontData>> {
        match self {
            Self::OptimizedFont(font) => Ok(font),
            other => Err(other.unexpected(operation)),
        }
    }

    pub fn into_recognition(self, operation: &str) -> Result<RecognitionOutput> {
        match self {
            Self::Recognition(output) => Ok(output),
            other => Err(other.unexpected(operation)),
        }
    }

    pub fn into_converted_page(self, operation: &str) -> Result<OcrPage> {
        match self {
            Self::ConvertedPage(page) => Ok(page),
            other => Err(other.unexpected(operation)),
        }
    }
}

/// Which reply of a request a completion belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReplySlot {
    Primary,
    Secondary,
}

/// Key of one pending completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CorrelationId {
    pub request: u64,
    pub slot: ReplySlot,
}

impl CorrelationId {
    /// Reserved id for the startup readiness reply.
    pub const READY: CorrelationId = CorrelationId {
        request: 0,
        slot: ReplySlot::Primary,
    };

    pub fn primary(request: u64) -> Self {
        Self {
            request,
            slot: ReplySlot::Primary,
        }
    }

    pub fn secondary(request: u64) -> Self {
        Self {
            request,
            slot: ReplySlot::Secondary,
        }
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.slot {
            ReplySlot::Primary => write!(f, "{}", self.request),
            ReplySlot::Secondary => write!(f, "{}b", self.request),
        }
    }
}

/// Scheduler → worker message.
#[derive(Debug)]
pub(crate) struct Envelope {
    pub request_id: u64,
    pub request: WorkRequest,
}

/// Worker → scheduler message.
#[derive(Debug)]
pub(crate) struct Reply {
    pub id: CorrelationId,
    pub result: Result<WorkResponse>,
}
