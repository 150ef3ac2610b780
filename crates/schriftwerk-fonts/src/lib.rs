// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Schriftwerk: document font matching.
//
// Holds the raw and glyph-optimized font catalogues, scores candidate fonts
// by rendering sampled pages against their scans, and decides per style
// which family (raw or optimized) the document is rendered with.

pub mod container;
pub mod evaluate;
pub mod image_cache;
pub mod metadata;
pub mod optimize;
pub mod renderer;
pub mod select;

pub use container::{DirFontSource, FontContainer, FontSource, finalize_catalogue};
pub use evaluate::{FontEvaluation, FontEvaluator, min_key, select_min};
pub use image_cache::{ImageCache, InputModes, MemoryImageCache};
pub use metadata::DocumentMetadata;
pub use optimize::optimize_catalogue;
pub use renderer::{InlineRenderer, PageRenderer, PooledRenderer};
pub use select::{FontSelector, OptimizationOutcome, Stage, StyleDecision};
