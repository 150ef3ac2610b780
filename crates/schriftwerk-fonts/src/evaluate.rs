// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Candidate font scoring.
//
// Each candidate family is rendered over a sample of pages and compared with
// the reference images. Pages are visited in input order until the word
// budget is exceeded; the page that crosses the budget is still counted.

use std::collections::BTreeMap;

use schriftwerk_core::config::DEFAULT_SAMPLE_WORDS;
use schriftwerk_core::error::{Result, SchriftwerkError};
use schriftwerk_core::types::{EvaluationResult, FontFamily, FontStyle, OcrPage};
use schriftwerk_workers::EvalPageFontJob;
use serde::Serialize;
use tracing::{debug, instrument, warn};

use crate::image_cache::ImageCache;
use crate::renderer::PageRenderer;

/// Key with the lowest average among entries that sampled any words.
/// Ties go to the earliest entry.
pub fn min_key<K: Copy>(entries: impl IntoIterator<Item = (K, EvaluationResult)>) -> Option<K> {
    let mut best: Option<(K, f64)> = None;
    for (key, result) in entries {
        let Some(average) = result.average() else {
            continue;
        };
        if best.is_none_or(|(_, lowest)| average < lowest) {
            best = Some((key, average));
        }
    }
    best.map(|(key, _)| key)
}

/// Best candidate of `style` in `results`, or `None` when no candidate of
/// that style sampled any words.
pub fn select_min(
    results: &BTreeMap<FontFamily, EvaluationResult>,
    style: FontStyle,
) -> Option<FontFamily> {
    min_key(
        style
            .candidates()
            .iter()
            .filter_map(|family| results.get(family).map(|r| (*family, *r))),
    )
}

/// Scores for every candidate over one page sample.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FontEvaluation {
    pub results: BTreeMap<FontFamily, EvaluationResult>,
    /// Candidates whose evaluation failed, with the reason. They are scored
    /// as having sampled nothing.
    pub failed: BTreeMap<FontFamily, String>,
    pub min_sans: Option<FontFamily>,
    pub min_serif: Option<FontFamily>,
}

impl FontEvaluation {
    pub fn from_results(
        results: BTreeMap<FontFamily, EvaluationResult>,
        failed: BTreeMap<FontFamily, String>,
    ) -> Self {
        let min_sans = select_min(&results, FontStyle::Sans);
        let min_serif = select_min(&results, FontStyle::Serif);
        Self {
            results,
            failed,
            min_sans,
            min_serif,
        }
    }

    pub fn average(&self, family: FontFamily) -> Option<f64> {
        self.results.get(&family).and_then(EvaluationResult::average)
    }

    pub fn min_for(&self, style: FontStyle) -> Option<FontFamily> {
        match style {
            FontStyle::Sans => self.min_sans,
            FontStyle::Serif => self.min_serif,
        }
    }

    /// Average of the best candidate of `style`.
    pub fn best_average(&self, style: FontStyle) -> Option<f64> {
        self.min_for(style).and_then(|family| self.average(family))
    }
}

/// Drives page comparisons for candidate fonts.
pub struct FontEvaluator<'a, R, C> {
    renderer: &'a R,
    images: &'a C,
    sample_words: u64,
}

impl<'a, R: PageRenderer, C: ImageCache> FontEvaluator<'a, R, C> {
    pub fn new(renderer: &'a R, images: &'a C) -> Self {
        Self {
            renderer,
            images,
            sample_words: DEFAULT_SAMPLE_WORDS,
        }
    }

    pub fn with_sample_words(mut self, sample_words: u64) -> Self {
        self.sample_words = sample_words;
        self
    }

    /// Score `family` over `pages`, in order, until more than the word
    /// budget has been compared.
    #[instrument(skip(self, pages), fields(pages = pages.len()))]
    pub async fn eval_pages_font(
        &self,
        family: FontFamily,
        pages: &[OcrPage],
        use_optimized: bool,
    ) -> Result<EvaluationResult> {
        let mut total = EvaluationResult::default();
        for page in pages {
            if total.words_total > self.sample_words {
                break;
            }
            let image = self.images.get_binary(page.index).await?;
            let result = self
                .renderer
                .eval_page_font(EvalPageFontJob {
                    family,
                    page: page.clone(),
                    image,
                    use_optimized,
                })
                .await?;
            if !result.metric_total.is_finite() || result.metric_total < 0.0 {
                return Err(SchriftwerkError::InvalidMetric {
                    family: family.to_string(),
                    page: page.index,
                    value: result.metric_total,
                });
            }
            total.accumulate(result);
        }
        debug!(
            words_total = total.words_total,
            metric_total = total.metric_total,
            "family evaluated"
        );
        Ok(total)
    }

    /// Score all six candidates and pick the best of each style.
    pub async fn evaluate_fonts(&self, pages: &[OcrPage], use_optimized: bool) -> FontEvaluation {
        let outcomes: Vec<(FontFamily, Result<EvaluationResult>)> =
            if self.renderer.mode().is_concurrent() {
                let [a, b, c, d, e, f] = FontFamily::ALL;
                let (ra, rb, rc, rd, re, rf) = tokio::join!(
                    self.eval_pages_font(a, pages, use_optimized),
                    self.eval_pages_font(b, pages, use_optimized),
                    self.eval_pages_font(c, pages, use_optimized),
                    self.eval_pages_font(d, pages, use_optimized),
                    self.eval_pages_font(e, pages, use_optimized),
                    self.eval_pages_font(f, pages, use_optimized),
                );
                vec![(a, ra), (b, rb), (c, rc), (d, rd), (e, re), (f, rf)]
            } else {
                let mut outcomes = Vec::with_capacity(FontFamily::ALL.len());
                for family in FontFamily::ALL {
                    outcomes.push((family, self.eval_pages_font(family, pages, use_optimized).await));
                }
                outcomes
            };

        let mut results = BTreeMap::new();
        let mut failed = BTreeMap::new();
        for (family, outcome) in outcomes {
            match outcome {
                Ok(result) => {
                    results.insert(family, result);
                }
                Err(e) => {
                    warn!(family = %family, error = %e, "candidate evaluation failed");
                    failed.insert(family, e.to_string());
                    results.insert(family, EvaluationResult::default());
                }
            }
        }

        let evaluation = FontEvaluation::from_results(results, failed);
        debug!(
            use_optimized,
            min_sans = ?evaluation.min_sans,
            min_serif = ?evaluation.min_serif,
            "candidates evaluated"
        );
        evaluation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image_cache::MemoryImageCache;
    use crate::renderer::{InlineRenderer, PooledRenderer};
    use schriftwerk_core::config::EngineConfig;
    use schriftwerk_core::types::OcrWord;
    use schriftwerk_workers::{JobScheduler, StubBackend, StubLog, StubScript};
    use std::collections::BTreeSet;
    use std::sync::Arc;

    fn page(index: usize, words: usize) -> OcrPage {
        let mut page = OcrPage::new(index);
        page.words = (0..words)
            .map(|i| OcrWord {
                text: format!("w{i}"),
                bbox: Default::default(),
                conf: 90.0,
            })
            .collect();
        page
    }

    async fn inline(script: StubScript) -> (InlineRenderer<StubBackend>, StubLog) {
        let log = StubLog::new();
        let renderer = InlineRenderer::start(StubBackend::new(0, Arc::new(script), log.clone()))
            .await
            .unwrap();
        (renderer, log)
    }

    #[test]
    fn argmin_picks_lowest_average() {
        let results = [
            ("A", EvaluationResult::new(12.0, 10)),
            ("B", EvaluationResult::new(9.0, 10)),
            ("C", EvaluationResult::new(9.5, 10)),
        ];
        assert_eq!(min_key(results), Some("B"));
    }

    #[test]
    fn argmin_ignores_unsampled_candidates() {
        let results = [
            ("A", EvaluationResult::new(0.0, 0)),
            ("B", EvaluationResult::new(50.0, 5)),
            ("C", EvaluationResult::default()),
        ];
        assert_eq!(min_key(results), Some("B"));
        assert_eq!(min_key([("A", EvaluationResult::default())]), None);
    }

    #[test]
    fn ties_go_to_first_declared() {
        let results: BTreeMap<_, _> = [
            (FontFamily::Century, EvaluationResult::new(4.0, 4)),
            (FontFamily::Palatino, EvaluationResult::new(2.0, 2)),
            (FontFamily::Garamond, EvaluationResult::new(2.0, 2)),
        ]
        .into_iter()
        .collect();
        assert_eq!(select_min(&results, FontStyle::Serif), Some(FontFamily::Century));
    }

    #[test]
    fn single_sampled_serif_wins_regardless_of_score() {
        let results: BTreeMap<_, _> = [
            (FontFamily::Century, EvaluationResult::default()),
            (FontFamily::Palatino, EvaluationResult::default()),
            (FontFamily::Garamond, EvaluationResult::new(1000.0, 3)),
            (FontFamily::NimbusRomNo9L, EvaluationResult::default()),
        ]
        .into_iter()
        .collect();
        assert_eq!(select_min(&results, FontStyle::Serif), Some(FontFamily::Garamond));
        assert_eq!(select_min(&results, FontStyle::Sans), None);
    }

    #[tokio::test]
    async fn sampling_stops_after_crossing_the_word_budget() {
        let (renderer, log) = inline(StubScript::default()).await;
        let images = MemoryImageCache::blank(5, 8, 8);
        let pages: Vec<OcrPage> = (0..5).map(|i| page(i, 4)).collect();

        let evaluator = FontEvaluator::new(&renderer, &images).with_sample_words(10);
        let result = evaluator
            .eval_pages_font(FontFamily::Carlito, &pages, false)
            .await
            .unwrap();

        assert_eq!(result.words_total, 12);
        assert_eq!(log.count("evalPageFont"), 3);
    }

    #[tokio::test]
    async fn pages_are_visited_in_input_order() {
        let (renderer, _) = inline(StubScript::default()).await;
        let images = MemoryImageCache::blank(3, 8, 8);
        // `cache` only holds page 0; reaching page 2 would fail.
        let pages = vec![page(0, 20), page(2, 1)];
        let cache = MemoryImageCache::blank(1, 8, 8);

        let evaluator = FontEvaluator::new(&renderer, &cache).with_sample_words(10);
        let result = evaluator
            .eval_pages_font(FontFamily::Carlito, &pages, false)
            .await
            .unwrap();
        assert_eq!(result.words_total, 20);

        let evaluator = FontEvaluator::new(&renderer, &images).with_sample_words(100);
        let reversed = vec![page(2, 1), page(0, 20)];
        let result = evaluator
            .eval_pages_font(FontFamily::Carlito, &reversed, false)
            .await
            .unwrap();
        assert_eq!(result.words_total, 21);
    }

    #[tokio::test]
    async fn negative_metric_is_rejected() {
        let script = StubScript {
            raw_metric: [(FontFamily::Century, -1.0)].into_iter().collect(),
            ..Default::default()
        };
        let (renderer, _) = inline(script).await;
        let images = MemoryImageCache::blank(1, 8, 8);

        let err = FontEvaluator::new(&renderer, &images)
            .eval_pages_font(FontFamily::Century, &[page(0, 3)], false)
            .await
            .unwrap_err();
        assert!(matches!(err, SchriftwerkError::InvalidMetric { page: 0, .. }));
    }

    #[tokio::test]
    async fn failed_candidate_is_excluded() {
        let script = StubScript {
            raw_metric: [(FontFamily::Carlito, 0.1), (FontFamily::NimbusSans, 0.5)]
                .into_iter()
                .collect(),
            fail_eval: BTreeSet::from([FontFamily::Carlito]),
            ..Default::default()
        };
        let (renderer, _) = inline(script).await;
        let images = MemoryImageCache::blank(2, 8, 8);
        let pages = vec![page(0, 5), page(1, 5)];

        let evaluation = FontEvaluator::new(&renderer, &images)
            .evaluate_fonts(&pages, false)
            .await;
        assert!(evaluation.failed.contains_key(&FontFamily::Carlito));
        assert_eq!(evaluation.min_sans, Some(FontFamily::NimbusSans));
        assert_eq!(evaluation.average(FontFamily::Carlito), None);
    }

    #[tokio::test]
    async fn pooled_evaluation_covers_all_candidates() {
        let log = StubLog::new();
        let script = Arc::new(StubScript {
            raw_metric: [
                (FontFamily::Carlito, 1.2),
                (FontFamily::NimbusSans, 0.9),
                (FontFamily::Century, 0.7),
                (FontFamily::Palatino, 0.6),
                (FontFamily::Garamond, 0.8),
                (FontFamily::NimbusRomNo9L, 0.95),
            ]
            .into_iter()
            .collect(),
            ..Default::default()
        });
        let factory_log = log.clone();
        let scheduler = JobScheduler::new(
            EngineConfig {
                worker_count: Some(3),
                ..Default::default()
            },
            move |id| Ok(StubBackend::new(id, Arc::clone(&script), factory_log.clone())),
        );
        scheduler.init().await.unwrap();
        let renderer = PooledRenderer::new(scheduler.clone());
        let images = MemoryImageCache::blank(2, 8, 8);
        let pages = vec![page(0, 4), page(1, 4)];

        let evaluation = FontEvaluator::new(&renderer, &images)
            .evaluate_fonts(&pages, false)
            .await;

        assert_eq!(evaluation.min_sans, Some(FontFamily::NimbusSans));
        assert_eq!(evaluation.min_serif, Some(FontFamily::Palatino));
        assert_eq!(evaluation.results.len(), 6);
        assert_eq!(log.count("evalPageFont"), 12);
        scheduler.terminate();
    }
}
