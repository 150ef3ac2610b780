// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Font catalogues and default-family state for one document.

use std::path::{Path, PathBuf};

use schriftwerk_core::error::{Result, SchriftwerkError};
use schriftwerk_core::types::{
    ActiveFontConfig, CatalogueKind, FontData, FontFamily, FontMetricsSet, FontSet, FontStyle,
};
use serde::Serialize;
use tracing::{debug, info};

/// Provider of the built-in raw fonts.
pub trait FontSource: Send + Sync {
    fn load(&self) -> Result<FontSet>;
}

impl FontSource for FontSet {
    fn load(&self) -> Result<FontSet> {
        Ok(self.clone())
    }
}

/// Reads `<dir>/<Family>.woff` for every catalogue family.
#[derive(Debug, Clone)]
pub struct DirFontSource {
    dir: PathBuf,
}

impl DirFontSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, family: FontFamily) -> PathBuf {
        self.dir.join(format!("{}.woff", family.name()))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl FontSource for DirFontSource {
    fn load(&self) -> Result<FontSet> {
        FontFamily::ALL
            .into_iter()
            .map(|family| {
                let path = self.path_for(family);
                let source = std::fs::read(&path).map_err(|e| {
                    SchriftwerkError::FontLoad(format!("{}: {e}", path.display()))
                })?;
                Ok(FontData::raw(family, source))
            })
            .collect()
    }
}

/// Build the final optimized catalogue: the initial optimized fonts, with every
/// family of a style that did not win reverted to its raw font.
pub fn finalize_catalogue(
    initial: &FontSet,
    raw: &FontSet,
    sans_optimized: bool,
    serif_optimized: bool,
) -> FontSet {
    let mut finished = initial.clone();
    if !sans_optimized {
        finished.replace_style_from(FontStyle::Sans, raw);
    }
    if !serif_optimized {
        finished.replace_style_from(FontStyle::Serif, raw);
    }
    finished
}

/// Raw, initial-optimized and final-optimized catalogues plus the defaults
/// that decide which family renders each style.
#[derive(Debug, Clone, Serialize)]
pub struct FontContainer {
    #[serde(skip)]
    pub raw: FontSet,
    #[serde(skip)]
    pub opt_initial: FontSet,
    #[serde(skip)]
    pub opt: FontSet,
    pub active_kind: CatalogueKind,
    pub sans_default: FontFamily,
    pub serif_default: FontFamily,
    /// Style used for text with no font information.
    pub default_style: FontStyle,
}

impl Default for FontContainer {
    fn default() -> Self {
        Self {
            raw: FontSet::new(),
            opt_initial: FontSet::new(),
            opt: FontSet::new(),
            active_kind: CatalogueKind::Raw,
            sans_default: FontStyle::Sans.fallback_default(),
            serif_default: FontStyle::Serif.fallback_default(),
            default_style: FontStyle::Serif,
        }
    }
}

impl FontContainer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the built-in fonts unless they are already present.
    pub fn load_builtins(&mut self, source: &dyn FontSource) -> Result<&FontSet> {
        if self.raw.is_empty() {
            self.raw = source.load()?;
            info!(fonts = self.raw.len(), "built-in fonts loaded");
        }
        Ok(&self.raw)
    }

    /// Drop both optimized catalogues and render with raw fonts again.
    pub fn clear_optimized(&mut self) {
        self.opt_initial = FontSet::new();
        self.opt = FontSet::new();
        self.active_kind = CatalogueKind::Raw;
    }

    pub fn catalogue(&self, kind: CatalogueKind) -> &FontSet {
        match kind {
            CatalogueKind::Raw => &self.raw,
            CatalogueKind::OptimizedInitial => &self.opt_initial,
            CatalogueKind::Optimized => &self.opt,
        }
    }

    /// Catalogue currently used for rendering. Falls back to raw when the
    /// selected catalogue is empty.
    pub fn active_catalogue(&self) -> &FontSet {
        let selected = self.catalogue(self.active_kind);
        if selected.is_empty() { &self.raw } else { selected }
    }

    pub fn default_for(&self, style: FontStyle) -> FontFamily {
        match style {
            FontStyle::Sans => self.sans_default,
            FontStyle::Serif => self.serif_default,
        }
    }

    /// Set the default family of `family`'s own style.
    pub fn set_default(&mut self, family: FontFamily) {
        match family.style() {
            FontStyle::Sans => self.sans_default = family,
            FontStyle::Serif => self.serif_default = family,
        }
        debug!(family = %family, style = %family.style(), "default family set");
    }

    /// Pick the default style from whichever class the document metrics saw
    /// more often. Ties keep serif.
    pub fn set_default_style_auto(&mut self, metrics: &FontMetricsSet) {
        let observations = |style: FontStyle| {
            metrics
                .get(style.metrics_key())
                .and_then(|family| family.normal.as_ref())
                .map_or(0, |normal| normal.obs)
        };
        self.default_style = if observations(FontStyle::Sans) > observations(FontStyle::Serif) {
            FontStyle::Sans
        } else {
            FontStyle::Serif
        };
        debug!(style = %self.default_style, "default style chosen from metrics");
    }

    /// Configuration published to renderers. A family counts as optimized
    /// when the active catalogue holds its optimized variant.
    pub fn active_config(&self) -> ActiveFontConfig {
        let active = self.active_catalogue();
        ActiveFontConfig {
            sans_default: self.sans_default,
            serif_default: self.serif_default,
            optimized: FontFamily::ALL
                .into_iter()
                .map(|family| (family, active.get(family).is_some_and(|f| f.optimized)))
                .collect(),
        }
    }

    /// Configuration with every family that has an initial optimized variant
    /// switched on, used while validating the optimized catalogue.
    pub fn trial_config(&self) -> ActiveFontConfig {
        let mut config = self.active_config();
        for font in self.opt_initial.iter().filter(|f| f.optimized) {
            config.optimized.insert(font.family, true);
        }
        config
    }
}
