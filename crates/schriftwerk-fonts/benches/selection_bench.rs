// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Criterion benchmarks for the font selection hot paths in schriftwerk-fonts:
// per-style argmin over evaluation results and finalizing the optimized
// catalogue after a decision.

use std::collections::BTreeMap;

use criterion::{Criterion, black_box, criterion_group, criterion_main};

use schriftwerk_core::types::{EvaluationResult, FontData, FontFamily, FontSet, FontStyle};
use schriftwerk_fonts::{finalize_catalogue, min_key, select_min};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// Results for all six candidates with distinct averages and one unsampled
/// serif family.
fn results() -> BTreeMap<FontFamily, EvaluationResult> {
    FontFamily::ALL
        .into_iter()
        .enumerate()
        .map(|(i, family)| {
            let words = if family == FontFamily::Garamond { 0 } else { 480 + i as u64 };
            (family, EvaluationResult::new(words as f64 * (1.0 - i as f64 * 0.05), words))
        })
        .collect()
}

/// Catalogue of 64 KiB fonts, roughly the size of the built-in WOFF files.
fn catalogue(optimized: bool) -> FontSet {
    FontFamily::ALL
        .into_iter()
        .map(|family| FontData {
            family,
            optimized,
            source: vec![0u8; 64 * 1024],
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Benchmarks
// ---------------------------------------------------------------------------

fn bench_select_min(c: &mut Criterion) {
    let results = results();

    c.bench_function("select_min (both styles)", |b| {
        b.iter(|| {
            black_box(select_min(black_box(&results), FontStyle::Sans));
            black_box(select_min(black_box(&results), FontStyle::Serif));
        });
    });

    // Wider candidate lists than the catalogue, to see how the scan scales.
    let wide: Vec<(usize, EvaluationResult)> = (0..1_000)
        .map(|i| (i, EvaluationResult::new((i % 97) as f64 + 1.0, 10)))
        .collect();
    c.bench_function("min_key (1000 candidates)", |b| {
        b.iter(|| black_box(min_key(black_box(wide.iter().copied()))));
    });
}

/// Reverting one style to raw clones the whole initial catalogue, so this is
/// dominated by font payload size.
fn bench_finalize_catalogue(c: &mut Criterion) {
    let initial = catalogue(true);
    let raw = catalogue(false);

    c.bench_function("finalize_catalogue (serif wins, 6 x 64 KiB)", |b| {
        b.iter(|| black_box(finalize_catalogue(black_box(&initial), &raw, false, true)));
    });
}

criterion_group!(benches, bench_select_min, bench_finalize_catalogue);
criterion_main!(benches);
