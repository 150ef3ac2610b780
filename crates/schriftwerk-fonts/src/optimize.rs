// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Glyph optimization of the built-in catalogue.

use schriftwerk_core::error::{Result, SchriftwerkError};
use schriftwerk_core::types::{FontFamily, FontMetricsFamily, FontMetricsSet, FontSet};
use schriftwerk_workers::{JobScheduler, OptimizeFontJob};
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

/// Metrics that apply to `family`: its own entry if the document has one,
/// otherwise the entry for its style class.
pub fn metrics_for(metrics: &FontMetricsSet, family: FontFamily) -> Option<&FontMetricsFamily> {
    metrics
        .get(family.name())
        .or_else(|| metrics.get(family.style().metrics_key()))
}

/// Optimize every raw family that has metrics, one job per family, all at
/// once. Families that fail or come back unchanged are left out; an empty
/// result means optimization produced nothing usable.
#[instrument(skip_all, fields(families = raw.len()))]
pub async fn optimize_catalogue(
    scheduler: JobScheduler,
    raw: FontSet,
    metrics: FontMetricsSet,
) -> Result<FontSet> {
    let mut jobs = JoinSet::new();
    for font in raw.iter() {
        let Some(family_metrics) = metrics_for(&metrics, font.family) else {
            debug!(family = %font.family, "no metrics; skipping");
            continue;
        };
        let job = OptimizeFontJob {
            font: font.clone(),
            metrics: family_metrics.clone(),
        };
        let scheduler = scheduler.clone();
        let family = font.family;
        jobs.spawn(async move { (family, scheduler.optimize_font(job).await) });
    }

    let mut optimized = FontSet::new();
    while let Some(joined) = jobs.join_next().await {
        let (family, outcome) = joined.map_err(|e| SchriftwerkError::TaskJoin(e.to_string()))?;
        match outcome {
            Ok(Some(font)) => optimized.insert(font),
            Ok(None) => debug!(family = %family, "optimization left font unchanged"),
            Err(e) => warn!(family = %family, error = %e, "font optimization failed"),
        }
    }

    info!(optimized = optimized.len(), "font optimization finished");
    Ok(optimized)
}
