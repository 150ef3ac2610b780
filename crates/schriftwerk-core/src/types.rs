// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types shared by the worker pool and the font engine.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use image::{DynamicImage, GrayImage, Luma};
use serde::{Deserialize, Serialize};

use crate::error::SchriftwerkError;

/// Where page rendering is allowed to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderMode {
    /// Rendering runs inside pooled workers; candidate fonts are evaluated
    /// in parallel.
    Concurrent,
    /// The rendering backend cannot leave the main task. One worker, and
    /// page comparisons run in-process one after another.
    Inline,
}

impl RenderMode {
    pub fn is_concurrent(&self) -> bool {
        matches!(self, Self::Concurrent)
    }
}

/// Recognition engine build loaded into the workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineVariant {
    /// Forked engine with character-level metrics (default).
    Scribe,
    /// Upstream engine without the extra outputs.
    Vanilla,
}

/// Parameters for (re)initialising the recognition engine on every worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineParams {
    /// Accept whatever engine is already loaded, without checking languages
    /// or variant.
    pub any_ok: bool,
    pub variant: EngineVariant,
    pub languages: Vec<String>,
}

impl Default for EngineParams {
    fn default() -> Self {
        Self {
            any_ok: true,
            variant: EngineVariant::Scribe,
            languages: vec!["eng".to_string()],
        }
    }
}

// ---------------------------------------------------------------------------
// Font catalogue
// ---------------------------------------------------------------------------

/// Broad typeface class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FontStyle {
    Sans,
    Serif,
}

impl FontStyle {
    /// Key under which document font metrics for this class are stored.
    pub fn metrics_key(&self) -> &'static str {
        match self {
            Self::Sans => "SansDefault",
            Self::Serif => "SerifDefault",
        }
    }

    /// Candidates of this class, in declaration order.
    pub fn candidates(&self) -> &'static [FontFamily] {
        match self {
            Self::Sans => &FontFamily::SANS,
            Self::Serif => &FontFamily::SERIF,
        }
    }

    /// Family used when nothing better has been established.
    pub fn fallback_default(&self) -> FontFamily {
        match self {
            Self::Sans => FontFamily::NimbusSans,
            Self::Serif => FontFamily::NimbusRomNo9L,
        }
    }
}

impl fmt::Display for FontStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sans => write!(f, "sans"),
            Self::Serif => write!(f, "serif"),
        }
    }
}

/// Built-in candidate font families.
///
/// Variant order is the declaration order of the catalogue and is used to
/// break ties during selection (first declared wins). `Ord` follows it, so
/// ordered maps keyed by family iterate in catalogue order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FontFamily {
    Carlito,
    NimbusSans,
    Century,
    Palatino,
    Garamond,
    NimbusRomNo9L,
}

impl FontFamily {
    pub const SANS: [FontFamily; 2] = [Self::Carlito, Self::NimbusSans];
    pub const SERIF: [FontFamily; 4] = [
        Self::Century,
        Self::Palatino,
        Self::Garamond,
        Self::NimbusRomNo9L,
    ];
    pub const ALL: [FontFamily; 6] = [
        Self::Carlito,
        Self::NimbusSans,
        Self::Century,
        Self::Palatino,
        Self::Garamond,
        Self::NimbusRomNo9L,
    ];

    pub fn style(&self) -> FontStyle {
        match self {
            Self::Carlito | Self::NimbusSans => FontStyle::Sans,
            _ => FontStyle::Serif,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Carlito => "Carlito",
            Self::NimbusSans => "NimbusSans",
            Self::Century => "Century",
            Self::Palatino => "Palatino",
            Self::Garamond => "Garamond",
            Self::NimbusRomNo9L => "NimbusRomNo9L",
        }
    }
}

impl fmt::Display for FontFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FontFamily {
    type Err = SchriftwerkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|family| family.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| SchriftwerkError::FontLoad(format!("unknown font family: {s}")))
    }
}

/// Which version of the catalogue a font set represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CatalogueKind {
    /// Stock built-in fonts.
    Raw,
    /// Output of the optimization step, before validation.
    OptimizedInitial,
    /// Validated catalogue: optimized where it helped, raw elsewhere.
    Optimized,
}

/// One font family's file data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FontData {
    pub family: FontFamily,
    /// `true` when glyph shapes were adjusted using document metrics.
    pub optimized: bool,
    pub source: Vec<u8>,
}

impl FontData {
    pub fn raw(family: FontFamily, source: Vec<u8>) -> Self {
        Self {
            family,
            optimized: false,
            source,
        }
    }
}

/// A catalogue of fonts keyed by family.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FontSet(BTreeMap<FontFamily, FontData>);

impl FontSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, font: FontData) {
        self.0.insert(font.family, font);
    }

    pub fn get(&self, family: FontFamily) -> Option<&FontData> {
        self.0.get(&family)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn families(&self) -> impl Iterator<Item = FontFamily> + '_ {
        self.0.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FontData> {
        self.0.values()
    }

    /// Replace every family of `style` with its entry in `other`.
    pub fn replace_style_from(&mut self, style: FontStyle, other: &FontSet) {
        for family in style.candidates() {
            match other.get(*family) {
                Some(font) => self.insert(font.clone()),
                None => {
                    self.0.remove(family);
                }
            }
        }
    }

    /// Layer `overlay` on top of `self`: families present in the overlay win.
    pub fn overlaid_with(&self, overlay: &FontSet) -> FontSet {
        let mut merged = self.clone();
        for font in overlay.iter() {
            merged.insert(font.clone());
        }
        merged
    }
}

impl FromIterator<FontData> for FontSet {
    fn from_iter<I: IntoIterator<Item = FontData>>(iter: I) -> Self {
        let mut set = FontSet::new();
        for font in iter {
            set.insert(font);
        }
        set
    }
}

/// Font configuration published to every worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveFontConfig {
    pub sans_default: FontFamily,
    pub serif_default: FontFamily,
    /// Families currently rendered with their optimized variant.
    pub optimized: BTreeMap<FontFamily, bool>,
}

impl Default for ActiveFontConfig {
    fn default() -> Self {
        Self {
            sans_default: FontStyle::Sans.fallback_default(),
            serif_default: FontStyle::Serif.fallback_default(),
            optimized: FontFamily::ALL.into_iter().map(|f| (f, false)).collect(),
        }
    }
}

impl ActiveFontConfig {
    pub fn default_for(&self, style: FontStyle) -> FontFamily {
        match style {
            FontStyle::Sans => self.sans_default,
            FontStyle::Serif => self.serif_default,
        }
    }

    pub fn uses_optimized(&self, family: FontFamily) -> bool {
        self.optimized.get(&family).copied().unwrap_or(false)
    }
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

/// Cumulative comparison score for one font over a set of pages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    /// Sum of per-word visual distances. Lower is better.
    pub metric_total: f64,
    /// Number of words compared.
    pub words_total: u64,
}

impl EvaluationResult {
    pub fn new(metric_total: f64, words_total: u64) -> Self {
        Self {
            metric_total,
            words_total,
        }
    }

    /// Mean distance per word, or `None` when nothing was sampled.
    pub fn average(&self) -> Option<f64> {
        (self.words_total > 0).then(|| self.metric_total / self.words_total as f64)
    }

    pub fn accumulate(&mut self, page: EvaluationResult) {
        self.metric_total += page.metric_total;
        self.words_total += page.words_total;
    }
}

// ---------------------------------------------------------------------------
// Pages and images
// ---------------------------------------------------------------------------

/// Axis-aligned box in page pixel coordinates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub left: f64,
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
}

/// One recognised word.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrWord {
    pub text: String,
    #[serde(default)]
    pub bbox: BBox,
    #[serde(default)]
    pub conf: f32,
}

/// Recognised content of one page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrPage {
    /// Zero-based page number, also the image-cache key.
    pub index: usize,
    #[serde(default)]
    pub dims: (u32, u32),
    /// Skew angle in degrees.
    #[serde(default)]
    pub angle: f64,
    #[serde(default)]
    pub words: Vec<OcrWord>,
}

impl OcrPage {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            dims: (0, 0),
            angle: 0.0,
            words: Vec::new(),
        }
    }

    pub fn word_count(&self) -> usize {
        self.words.len()
    }
}

/// Rasterised page used as ground truth when comparing fonts.
///
/// The pixel buffer is immutable once created, so clones handed to workers
/// share it.
#[derive(Debug, Clone)]
pub struct ReferenceImage {
    pub page: usize,
    pub image: Arc<GrayImage>,
}

impl ReferenceImage {
    pub fn from_dynamic(page: usize, image: &DynamicImage) -> Self {
        Self {
            page,
            image: Arc::new(image.to_luma8()),
        }
    }

    /// White page of the given size.
    pub fn blank(page: usize, width: u32, height: u32) -> Self {
        Self {
            page,
            image: Arc::new(GrayImage::from_pixel(width, height, Luma([255u8]))),
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }
}

// ---------------------------------------------------------------------------
// Document font metrics
// ---------------------------------------------------------------------------

/// Glyph measurements for one face, collected from character-level OCR.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FontMetricsFont {
    pub width: BTreeMap<String, f64>,
    pub height: BTreeMap<String, f64>,
    pub desc: BTreeMap<String, f64>,
    pub advance: BTreeMap<String, f64>,
    pub kerning: BTreeMap<String, f64>,
    /// Number of observations behind these measurements.
    pub obs: u64,
}

/// Measurements for every face of one family.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FontMetricsFamily {
    pub normal: Option<FontMetricsFont>,
    pub italic: Option<FontMetricsFont>,
    pub bold: Option<FontMetricsFont>,
    #[serde(alias = "small-caps")]
    pub small_caps: Option<FontMetricsFont>,
}

/// Document font metrics keyed by family or class name (`SansDefault`,
/// `SerifDefault`).
pub type FontMetricsSet = BTreeMap<String, FontMetricsFamily>;

// ---------------------------------------------------------------------------
// Recognition
// ---------------------------------------------------------------------------

/// Text recognised from a page image.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecognitionOutput {
    pub text: String,
    pub confidence: f32,
    #[serde(default)]
    pub words: Vec<OcrWord>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalogue_has_two_sans_and_four_serif() {
        assert_eq!(FontStyle::Sans.candidates().len(), 2);
        assert_eq!(FontStyle::Serif.candidates().len(), 4);
        assert!(FontFamily::SANS.iter().all(|f| f.style() == FontStyle::Sans));
        assert!(FontFamily::SERIF.iter().all(|f| f.style() == FontStyle::Serif));
    }

    #[test]
    fn family_order_is_declaration_order() {
        let mut sorted = FontFamily::ALL;
        sorted.sort();
        assert_eq!(sorted, FontFamily::ALL);
    }

    #[test]
    fn family_parses_case_insensitively() {
        assert_eq!("garamond".parse::<FontFamily>().unwrap(), FontFamily::Garamond);
        assert_eq!(" NimbusSans ".parse::<FontFamily>().unwrap(), FontFamily::NimbusSans);
        assert!("Comic Sans".parse::<FontFamily>().is_err());
    }

    #[test]
    fn average_is_undefined_without_words() {
        assert_eq!(EvaluationResult::default().average(), None);
        assert_eq!(EvaluationResult::new(3.0, 4).average(), Some(0.75));
    }

    #[test]
    fn accumulate_adds_both_totals() {
        let mut total = EvaluationResult::default();
        total.accumulate(EvaluationResult::new(1.5, 3));
        total.accumulate(EvaluationResult::new(0.5, 2));
        assert_eq!(total, EvaluationResult::new(2.0, 5));
    }

    #[test]
    fn replace_style_only_touches_that_style() {
        let raw: FontSet = FontFamily::ALL
            .into_iter()
            .map(|f| FontData::raw(f, vec![0]))
            .collect();
        let mut opt: FontSet = FontFamily::ALL
            .into_iter()
            .map(|f| FontData {
                family: f,
                optimized: true,
                source: vec![1],
            })
            .collect();

        opt.replace_style_from(FontStyle::Serif, &raw);

        assert!(opt.get(FontFamily::Carlito).unwrap().optimized);
        assert!(!opt.get(FontFamily::Garamond).unwrap().optimized);
        assert!(!opt.get(FontFamily::NimbusRomNo9L).unwrap().optimized);
    }

    #[test]
    fn overlay_keeps_base_entries_missing_from_overlay() {
        let raw: FontSet = FontFamily::ALL
            .into_iter()
            .map(|f| FontData::raw(f, vec![0]))
            .collect();
        let overlay: FontSet = [FontData {
            family: FontFamily::Century,
            optimized: true,
            source: vec![1],
        }]
        .into_iter()
        .collect();

        let merged = raw.overlaid_with(&overlay);
        assert_eq!(merged.len(), 6);
        assert!(merged.get(FontFamily::Century).unwrap().optimized);
        assert!(!merged.get(FontFamily::Palatino).unwrap().optimized);
    }

    #[test]
    fn metrics_accept_legacy_small_caps_key() {
        let json = r#"{ "SerifDefault": { "normal": { "obs": 12 }, "small-caps": { "obs": 3 } } }"#;
        let set: FontMetricsSet = serde_json::from_str(json).unwrap();
        let family = &set["SerifDefault"];
        assert_eq!(family.normal.as_ref().unwrap().obs, 12);
        assert_eq!(family.small_caps.as_ref().unwrap().obs, 3);
    }

    #[test]
    fn active_config_serializes_family_keys_as_names() {
        let json = serde_json::to_string(&ActiveFontConfig::default()).unwrap();
        assert!(json.contains("\"NimbusRomNo9L\":false"));
    }
}
