// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Settings embedded in previously exported documents.
//
// Exports carry their font metrics, layout and chosen defaults as
// `<meta name=".." content="..">` tags in the document header, with JSON
// values quote-escaped as `&quot;`.

use std::collections::BTreeMap;

use schriftwerk_core::error::{Result, SchriftwerkError};
use schriftwerk_core::types::{FontFamily, FontMetricsSet, FontStyle};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::container::FontContainer;

/// Value of the `ocr-system` tag written by this engine's own exports.
pub const OWN_OCR_SYSTEM: &str = "scribeocr";

/// Settings recovered from document meta tags. Absent tags stay `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DocumentMetadata {
    pub ocr_system: Option<String>,
    pub font_metrics: Option<FontMetricsSet>,
    pub layout: Option<Value>,
    pub layout_data_table: Option<Value>,
    pub enable_opt: Option<bool>,
    pub default_font: Option<FontStyle>,
    pub sans_font: Option<FontFamily>,
    pub serif_font: Option<FontFamily>,
}

impl DocumentMetadata {
    /// Interpret already extracted `name -> content` pairs.
    pub fn from_meta_tags(tags: &BTreeMap<String, String>) -> Result<Self> {
        let get = |name: &str| tags.get(name).map(String::as_str).filter(|s| !s.is_empty());

        let metadata = Self {
            ocr_system: get("ocr-system").map(str::to_string),
            font_metrics: get("font-metrics").map(parse_font_metrics).transpose()?,
            layout: get("layout").map(|s| parse_json("layout", s)).transpose()?,
            layout_data_table: get("layout-data-table")
                .map(|s| parse_json("layout-data-table", s))
                .transpose()?,
            enable_opt: get("enable-opt").map(parse_bool).transpose()?,
            default_font: get("default-font").map(parse_style).transpose()?,
            sans_font: get("sans-font").map(|s| parse_family(s, FontStyle::Sans)).transpose()?,
            serif_font: get("serif-font")
                .map(|s| parse_family(s, FontStyle::Serif))
                .transpose()?,
        };
        debug!(
            metrics = metadata.font_metrics.is_some(),
            enable_opt = ?metadata.enable_opt,
            "document metadata read"
        );
        Ok(metadata)
    }

    /// Read the meta tags of a document header.
    pub fn from_hocr_header(header: &str) -> Result<Self> {
        Self::from_meta_tags(&meta_tags(header))
    }

    /// Whether the document was exported by this engine.
    pub fn is_own_export(&self) -> bool {
        self.ocr_system.as_deref() == Some(OWN_OCR_SYSTEM)
    }

    /// Seed the container with the defaults this document was exported with.
    pub fn apply_defaults(&self, container: &mut FontContainer) {
        if let Some(style) = self.default_font {
            container.default_style = style;
        }
        for family in [self.sans_font, self.serif_font].into_iter().flatten() {
            container.set_default(family);
        }
    }
}

/// Extract `name -> content` from every `<meta name=.. content=..>` tag. The
/// first tag of a name wins; `&quot;` is unescaped.
pub fn meta_tags(header: &str) -> BTreeMap<String, String> {
    // ASCII lowercasing keeps byte offsets aligned with `header`.
    let lower = header.to_ascii_lowercase();
    let mut tags = BTreeMap::new();
    let mut cursor = 0;

    while let Some(found) = lower[cursor..].find("<meta name=") {
        let start = cursor + found + "<meta name=".len();
        cursor = start;
        let Some((name, after_name)) = quoted(header, start) else {
            continue;
        };
        let Some(content_at) = lower[after_name..].find("content=") else {
            continue;
        };
        let value_at = after_name + content_at + "content=".len();
        let Some(quote) = header[value_at..].chars().next().filter(|c| is_quote(*c)) else {
            continue;
        };
        let body = &header[value_at + 1..];
        let Some(end) = content_end(body, quote) else {
            continue;
        };
        tags.entry(name.to_string())
            .or_insert_with(|| body[..end].replace("&quot;", "\""));
        cursor = value_at + 1 + end;
    }
    tags
}

fn is_quote(c: char) -> bool {
    c == '"' || c == '\''
}

/// Quoted attribute value at `at`, and the offset just past its closing quote.
fn quoted(text: &str, at: usize) -> Option<(&str, usize)> {
    let quote = text[at..].chars().next().filter(|c| is_quote(*c))?;
    let value_start = at + 1;
    let len = text[value_start..].find(quote)?;
    Some((&text[value_start..value_start + len], value_start + len + 1))
}

/// Content runs to the first closing quote that ends the tag, so values may
/// contain the other quote character and stray `>`.
fn content_end(body: &str, quote: char) -> Option<usize> {
    body.match_indices(quote).map(|(i, _)| i).find(|&i| {
        let tail = body[i + 1..].trim_start();
        tail.strip_prefix('/').unwrap_or(tail).starts_with('>')
    })
}

fn parse_json(tag: &str, raw: &str) -> Result<Value> {
    serde_json::from_str(raw).map_err(|e| SchriftwerkError::Metadata(format!("{tag}: {e}")))
}

/// Font metrics, accepting the older `small-caps` key. When both spellings
/// are present the current one wins.
fn parse_font_metrics(raw: &str) -> Result<FontMetricsSet> {
    let mut value = parse_json("font-metrics", raw)?;
    if let Some(families) = value.as_object_mut() {
        for family in families.values_mut().filter_map(Value::as_object_mut) {
            if family.contains_key("smallCaps") {
                family.remove("small-caps");
            }
        }
    }
    serde_json::from_value(value).map_err(|e| SchriftwerkError::Metadata(format!("font-metrics: {e}")))
}

fn parse_bool(raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" => Ok(true),
        "false" => Ok(false),
        other => Err(SchriftwerkError::Metadata(format!("enable-opt: not a boolean: {other}"))),
    }
}

fn parse_style(raw: &str) -> Result<FontStyle> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "sans" | "sansdefault" => Ok(FontStyle::Sans),
        "serif" | "serifdefault" => Ok(FontStyle::Serif),
        other => Err(SchriftwerkError::Metadata(format!("default-font: unknown style: {other}"))),
    }
}

fn parse_family(raw: &str, style: FontStyle) -> Result<FontFamily> {
    let family: FontFamily = raw
        .parse()
        .map_err(|e| SchriftwerkError::Metadata(format!("{style}-font: {e}")))?;
    if family.style() != style {
        return Err(SchriftwerkError::Metadata(format!(
            "{style}-font: {family} is a {} family",
            family.style()
        )));
    }
    Ok(family)
}
