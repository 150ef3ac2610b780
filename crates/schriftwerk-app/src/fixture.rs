// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Run description read from a JSON file.
//
// A fixture names everything one selection run needs: engine settings, the
// scripted worker behaviour, recognised pages, reference scans (or a count of
// blank pages), document meta tags and where the built-in fonts live. It also
// picks the recognition backend. Relative paths are resolved against the
// fixture's own directory.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use schriftwerk_core::config::EngineConfig;
use schriftwerk_core::error::Result;
use schriftwerk_core::types::{EngineParams, FontData, FontFamily, FontSet, OcrPage};
use schriftwerk_fonts::{DirFontSource, DocumentMetadata, FontSource, MemoryImageCache};
use schriftwerk_workers::StubScript;
use serde::Deserialize;
use tracing::{debug, info};

/// Side length of generated blank pages when the fixture gives none.
const DEFAULT_BLANK_SIZE: (u32, u32) = (64, 64);

/// Which workers run recognition after selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecognitionBackend {
    /// The scripted pool that also renders.
    #[default]
    Stub,
    /// A separate pool of `ocrs` workers. Needs the `ocr` feature.
    Ocrs,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Fixture {
    /// Inline engine settings.
    pub engine: EngineConfig,
    /// Engine settings file; takes precedence over `engine`.
    pub engine_config: Option<PathBuf>,
    pub engine_params: EngineParams,
    pub script: StubScript,
    pub pages: Vec<OcrPage>,
    /// Reference scans, one per page in order.
    pub images: Vec<PathBuf>,
    /// Blank reference pages to generate when there are no scans.
    pub blank_pages: usize,
    pub blank_size: (u32, u32),
    /// Meta tags as already extracted `name -> content` pairs.
    pub meta: BTreeMap<String, String>,
    /// Document header to read meta tags from; takes precedence over `meta`.
    pub header: Option<PathBuf>,
    /// Directory with `<Family>.woff` files. Placeholder fonts otherwise.
    pub fonts_dir: Option<PathBuf>,
    /// Run recognition on every reference page after selection.
    pub recognize: bool,
    pub backend: RecognitionBackend,
    /// Directory holding the `ocrs` models. The ocrs cache directory otherwise.
    pub models_dir: Option<PathBuf>,
}

impl Default for Fixture {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            engine_config: None,
            engine_params: EngineParams::default(),
            script: StubScript::default(),
            pages: Vec::new(),
            images: Vec::new(),
            blank_pages: 0,
            blank_size: DEFAULT_BLANK_SIZE,
            meta: BTreeMap::new(),
            header: None,
            fonts_dir: None,
            recognize: false,
            backend: RecognitionBackend::Stub,
            models_dir: None,
        }
    }
}

impl Fixture {
    /// Read and resolve a fixture file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path)?;
        let mut fixture: Self = serde_json::from_str(&data)?;
        if let Some(base) = path.parent() {
            fixture.resolve_paths(base);
        }
        if let Some(config) = &fixture.engine_config {
            fixture.engine = EngineConfig::load(config)?;
        }
        fixture.engine.validate()?;
        info!(
            fixture = %path.display(),
            pages = fixture.pages.len(),
            images = fixture.images.len(),
            blank_pages = fixture.blank_pages,
            "fixture loaded"
        );
        Ok(fixture)
    }

    fn resolve_paths(&mut self, base: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        self.images.iter_mut().for_each(resolve);
        self.engine_config.iter_mut().for_each(resolve);
        self.header.iter_mut().for_each(resolve);
        self.fonts_dir.iter_mut().for_each(resolve);
        self.models_dir.iter_mut().for_each(resolve);
    }

    pub fn metadata(&self) -> Result<DocumentMetadata> {
        match &self.header {
            Some(path) => DocumentMetadata::from_hocr_header(&std::fs::read_to_string(path)?),
            None => DocumentMetadata::from_meta_tags(&self.meta),
        }
    }

    /// Reference scans if any are listed, else generated blank pages, else
    /// nothing to compare against.
    pub fn image_cache(&self) -> Result<MemoryImageCache> {
        if !self.images.is_empty() {
            return MemoryImageCache::open(&self.images);
        }
        let (width, height) = self.blank_size;
        debug!(count = self.blank_pages, width, height, "using blank reference pages");
        Ok(MemoryImageCache::blank(self.blank_pages, width, height))
    }

    pub fn font_source(&self) -> Box<dyn FontSource> {
        match &self.fonts_dir {
            Some(dir) => Box::new(DirFontSource::new(dir)),
            None => Box::new(placeholder_fonts()),
        }
    }
}

/// Stand-in catalogue for runs against scripted workers, which never look
/// inside the font data.
pub fn placeholder_fonts() -> FontSet {
    FontFamily::ALL
        .into_iter()
        .map(|family| FontData::raw(family, family.name().as_bytes().to_vec()))
        .collect()
}
