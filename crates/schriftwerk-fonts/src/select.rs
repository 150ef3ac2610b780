// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Font optimization policy.
//
// Decides, per style, which candidate family becomes the default and whether
// its glyph-optimized variant is used. Optimized fonts are only kept for a
// style when they score strictly better than the raw fonts on the sampled
// pages; without reference images the optimized fonts are adopted as they
// are, and without metrics only raw fonts are evaluated.
//
// Flow: load built-ins, start optimization alongside the raw evaluation,
// evaluate the optimized catalogue when there is one, select, publish.

use chrono::{DateTime, Utc};
use schriftwerk_core::config::{DEFAULT_SAMPLE_PAGES, DEFAULT_SAMPLE_WORDS, EngineConfig};
use schriftwerk_core::error::Result;
use schriftwerk_core::types::{
    ActiveFontConfig, CatalogueKind, FontFamily, FontMetricsSet, FontSet, FontStyle, OcrPage,
};
use schriftwerk_workers::JobScheduler;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::container::{FontContainer, FontSource, finalize_catalogue};
use crate::evaluate::{FontEvaluation, FontEvaluator};
use crate::image_cache::ImageCache;
use crate::optimize::optimize_catalogue;
use crate::renderer::PageRenderer;

/// Steps of one selection run, in the order they can occur.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    LoadBuiltins,
    OptimizeAsync,
    EvaluateRaw,
    EvaluateOptimized,
    Select,
    Publish,
    Done,
}

/// Outcome for one style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", content = "family", rename_all = "snake_case")]
pub enum StyleDecision {
    /// The optimized variant of this family scored strictly better.
    Optimized(FontFamily),
    /// The raw variant of this family was kept.
    Raw(FontFamily),
    /// No candidate of the style sampled any words; defaults untouched.
    NoDecision,
    /// No evaluation ran.
    Unchanged,
}

impl StyleDecision {
    pub fn family(&self) -> Option<FontFamily> {
        match self {
            Self::Optimized(family) | Self::Raw(family) => Some(*family),
            Self::NoDecision | Self::Unchanged => None,
        }
    }

    pub fn is_optimized(&self) -> bool {
        matches!(self, Self::Optimized(_))
    }
}

/// Pick raw or optimized for `style`. Optimized needs a strictly lower
/// average than the best raw candidate.
pub fn decide(
    style: FontStyle,
    raw: &FontEvaluation,
    optimized: Option<&FontEvaluation>,
) -> StyleDecision {
    let (Some(raw_family), Some(raw_average)) = (raw.min_for(style), raw.best_average(style))
    else {
        return StyleDecision::NoDecision;
    };
    let Some(optimized) = optimized else {
        return StyleDecision::Raw(raw_family);
    };
    match (optimized.min_for(style), optimized.best_average(style)) {
        (Some(family), Some(average)) if average < raw_average => StyleDecision::Optimized(family),
        _ => StyleDecision::Raw(raw_family),
    }
}

/// Result of one selection run.
#[derive(Debug, Clone, Serialize)]
pub struct OptimizationOutcome {
    /// Whether either style ended up on optimized fonts.
    pub enable_opt: bool,
    pub sans: StyleDecision,
    pub serif: StyleDecision,
    pub eval_raw: Option<FontEvaluation>,
    pub eval_opt: Option<FontEvaluation>,
    pub active_kind: CatalogueKind,
    /// Configuration published to every worker.
    pub active: ActiveFontConfig,
    pub stages: Vec<Stage>,
    pub finished_at: DateTime<Utc>,
}

/// Runs the optimization policy against one document.
pub struct FontSelector<'a, R, C> {
    scheduler: &'a JobScheduler,
    renderer: &'a R,
    images: &'a C,
    sample_pages: usize,
    sample_words: u64,
}

impl<'a, R: PageRenderer, C: ImageCache> FontSelector<'a, R, C> {
    pub fn new(scheduler: &'a JobScheduler, renderer: &'a R, images: &'a C) -> Self {
        Self {
            scheduler,
            renderer,
            images,
            sample_pages: DEFAULT_SAMPLE_PAGES,
            sample_words: DEFAULT_SAMPLE_WORDS,
        }
    }

    /// Take sampling limits from `config`.
    pub fn with_config(mut self, config: &EngineConfig) -> Self {
        self.sample_pages = config.sample_pages;
        self.sample_words = config.sample_words;
        self
    }

    async fn register(&self, kind: CatalogueKind, fonts: &FontSet) -> Result<()> {
        self.scheduler.load_fonts(kind, fonts.clone()).await?;
        self.renderer.load_fonts(kind, fonts).await
    }

    async fn publish(&self, config: &ActiveFontConfig) -> Result<()> {
        self.scheduler.set_font_active(config.clone()).await?;
        self.renderer.set_font_active(config).await
    }

    /// Choose default fonts for `pages` and publish the result.
    ///
    /// `metrics` are the document's measured glyph metrics, if any. The
    /// container's defaults are only changed for styles that were decided.
    #[instrument(skip_all, fields(pages = pages.len(), metrics = metrics.is_some()))]
    pub async fn run(
        &self,
        container: &mut FontContainer,
        source: &dyn FontSource,
        pages: &[OcrPage],
        metrics: Option<&FontMetricsSet>,
    ) -> Result<OptimizationOutcome> {
        let mut stages = vec![Stage::LoadBuiltins];
        let raw = container.load_builtins(source)?.clone();
        // Optimized catalogues from an earlier run are never carried over.
        container.clear_optimized();
        self.register(CatalogueKind::Raw, &raw).await?;

        let metrics = metrics.filter(|m| !m.is_empty());
        let mut optimization = None;
        if let Some(metrics) = metrics {
            container.set_default_style_auto(metrics);
            stages.push(Stage::OptimizeAsync);
            optimization = Some(tokio::spawn(optimize_catalogue(
                self.scheduler.clone(),
                raw.clone(),
                metrics.clone(),
            )));
        }

        let mut sans = StyleDecision::Unchanged;
        let mut serif = StyleDecision::Unchanged;
        let mut eval_raw = None;
        let mut eval_opt = None;

        if !self.images.input_modes().has_reference() {
            if let Some(task) = optimization.take() {
                let initial = settle(task).await;
                debug!(fonts = initial.len(), "no reference images; adopting optimized fonts");
                container.opt = initial.clone();
                container.opt_initial = initial;
                if !container.opt.is_empty() {
                    container.active_kind = CatalogueKind::Optimized;
                }
            }
        } else {
            let sample_len = pages
                .len()
                .min(self.images.page_count())
                .min(self.sample_pages);
            let sample = &pages[..sample_len];
            let evaluator =
                FontEvaluator::new(self.renderer, self.images).with_sample_words(self.sample_words);

            // In-process rendering needs every font registered up front.
            let mut initial = None;
            if !self.renderer.mode().is_concurrent() {
                if let Some(task) = optimization.take() {
                    initial = Some(settle(task).await);
                }
            }

            stages.push(Stage::EvaluateRaw);
            let raw_eval = evaluator.evaluate_fonts(sample, false).await;

            if let Some(task) = optimization.take() {
                initial = Some(settle(task).await);
            }

            let opt_eval = match initial.filter(|set| !set.is_empty()) {
                Some(initial) => {
                    container.opt_initial = initial;
                    self.register(CatalogueKind::OptimizedInitial, &container.opt_initial)
                        .await?;
                    self.publish(&container.trial_config()).await?;
                    stages.push(Stage::EvaluateOptimized);
                    Some(evaluator.evaluate_fonts(sample, true).await)
                }
                None => None,
            };

            stages.push(Stage::Select);
            sans = decide(FontStyle::Sans, &raw_eval, opt_eval.as_ref());
            serif = decide(FontStyle::Serif, &raw_eval, opt_eval.as_ref());
            for family in [sans, serif].iter().filter_map(StyleDecision::family) {
                container.set_default(family);
            }
            if opt_eval.is_some() {
                container.opt = finalize_catalogue(
                    &container.opt_initial,
                    &container.raw,
                    sans.is_optimized(),
                    serif.is_optimized(),
                );
            }
            container.active_kind = if sans.is_optimized() || serif.is_optimized() {
                CatalogueKind::Optimized
            } else {
                CatalogueKind::Raw
            };
            eval_raw = Some(raw_eval);
            eval_opt = opt_eval;
        }

        stages.push(Stage::Publish);
        if !container.opt.is_empty() {
            self.register(CatalogueKind::Optimized, &container.opt).await?;
        }
        let active = container.active_config();
        self.publish(&active).await?;
        stages.push(Stage::Done);

        let enable_opt = sans.is_optimized() || serif.is_optimized();
        info!(
            enable_opt,
            sans = ?sans,
            serif = ?serif,
            sans_default = %active.sans_default,
            serif_default = %active.serif_default,
            "font selection finished"
        );

        Ok(OptimizationOutcome {
            enable_opt,
            sans,
            serif,
            eval_raw,
            eval_opt,
            active_kind: container.active_kind,
            active,
            stages,
            finished_at: Utc::now(),
        })
    }
}

/// Wait for the optimization task. Failure means no usable output.
async fn settle(task: JoinHandle<Result<FontSet>>) -> FontSet {
    match task.await {
        Ok(Ok(fonts)) => fonts,
        Ok(Err(e)) => {
            warn!(error = %e, "font optimization failed");
            FontSet::new()
        }
        Err(e) => {
            warn!(error = %e, "font optimization task did not finish");
            FontSet::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image_cache::MemoryImageCache;
    use crate::renderer::{InlineRenderer, PooledRenderer};
    use schriftwerk_core::types::{
        EvaluationResult, FontData, FontMetricsFamily, FontMetricsFont, OcrWord, RenderMode,
    };
    use schriftwerk_workers::{StubBackend, StubLog, StubScript};
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn builtins() -> FontSet {
        FontFamily::ALL
            .into_iter()
            .map(|f| FontData::raw(f, f.name().as_bytes().to_vec()))
            .collect()
    }

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

    fn metrics() -> FontMetricsSet {
        let observed = FontMetricsFamily {
            normal: Some(FontMetricsFont {
                obs: 50,
                ..Default::default()
            }),
            ..Default::default()
        };
        [
            ("SansDefault".to_string(), observed.clone()),
            ("SerifDefault".to_string(), observed),
        ]
        .into_iter()
        .collect()
    }

    fn per_word(scores: &[(FontFamily, f64)]) -> BTreeMap<FontFamily, f64> {
        scores.iter().copied().collect()
    }

    async fn pool(script: Arc<StubScript>, log: &StubLog, mode: RenderMode) -> JobScheduler {
        let factory_log = log.clone();
        let scheduler = JobScheduler::new(
            EngineConfig {
                render_mode: mode,
                worker_count: Some(2),
                ..Default::default()
            },
            move |id| Ok(StubBackend::new(id, Arc::clone(&script), factory_log.clone())),
        );
        scheduler.init().await.unwrap();
        scheduler
    }

    async fn run_pooled(
        script: StubScript,
        images: MemoryImageCache,
        pages: &[OcrPage],
        metrics: Option<&FontMetricsSet>,
        container: &mut FontContainer,
    ) -> (OptimizationOutcome, StubLog) {
        let log = StubLog::new();
        let scheduler = pool(Arc::new(script), &log, RenderMode::Concurrent).await;
        let renderer = PooledRenderer::new(scheduler.clone());
        let outcome = FontSelector::new(&scheduler, &renderer, &images)
            .run(container, &builtins(), pages, metrics)
            .await
            .unwrap();
        scheduler.terminate();
        (outcome, log)
    }

    fn evaluation(scores: &[(FontFamily, f64)]) -> FontEvaluation {
        FontEvaluation::from_results(
            scores
                .iter()
                .map(|(f, avg)| (*f, EvaluationResult::new(avg * 10.0, 10)))
                .collect(),
            BTreeMap::new(),
        )
    }

    #[test]
    fn optimized_needs_strict_improvement() {
        let raw = evaluation(&[(FontFamily::Carlito, 0.8), (FontFamily::NimbusSans, 0.9)]);
        let equal = evaluation(&[(FontFamily::Carlito, 0.8), (FontFamily::NimbusSans, 0.9)]);
        assert_eq!(
            decide(FontStyle::Sans, &raw, Some(&equal)),
            StyleDecision::Raw(FontFamily::Carlito)
        );

        let better = evaluation(&[(FontFamily::Carlito, 0.85), (FontFamily::NimbusSans, 0.7)]);
        assert_eq!(
            decide(FontStyle::Sans, &raw, Some(&better)),
            StyleDecision::Optimized(FontFamily::NimbusSans)
        );
    }

    #[test]
    fn unsampled_raw_style_is_no_decision() {
        let raw = evaluation(&[(FontFamily::Carlito, 0.8)]);
        let opt = evaluation(&[(FontFamily::Century, 0.1)]);
        assert_eq!(decide(FontStyle::Serif, &raw, Some(&opt)), StyleDecision::NoDecision);
        assert_eq!(
            decide(FontStyle::Sans, &raw, Some(&opt)),
            StyleDecision::Raw(FontFamily::Carlito)
        );
    }

    #[tokio::test]
    async fn equal_scores_keep_raw_fonts() {
        let mut container = FontContainer::new();
        let pages: Vec<_> = (0..3).map(|i| page(i, 4)).collect();
        let (outcome, _) = run_pooled(
            StubScript::default(),
            MemoryImageCache::blank(3, 8, 8),
            &pages,
            Some(&metrics()),
            &mut container,
        )
        .await;

        assert!(!outcome.enable_opt);
        assert_eq!(outcome.sans, StyleDecision::Raw(FontFamily::Carlito));
        assert_eq!(outcome.serif, StyleDecision::Raw(FontFamily::Century));
        assert_eq!(outcome.active_kind, CatalogueKind::Raw);
        assert!(container.opt.iter().all(|f| !f.optimized));
        assert_eq!(container.opt_initial.len(), 6);
    }

    #[tokio::test]
    async fn better_optimized_serif_is_enabled_alone() {
        let script = StubScript {
            raw_metric: per_word(&[(FontFamily::Palatino, 0.9)]),
            optimized_metric: per_word(&[
                (FontFamily::Century, 0.5),
                (FontFamily::Palatino, 0.4),
                (FontFamily::Garamond, 0.5),
                (FontFamily::NimbusRomNo9L, 0.5),
            ]),
            ..Default::default()
        };
        let mut container = FontContainer::new();
        let pages: Vec<_> = (0..2).map(|i| page(i, 5)).collect();
        let (outcome, log) = run_pooled(
            script,
            MemoryImageCache::blank(2, 8, 8),
            &pages,
            Some(&metrics()),
            &mut container,
        )
        .await;

        assert!(outcome.enable_opt);
        assert_eq!(outcome.serif, StyleDecision::Optimized(FontFamily::Palatino));
        assert_eq!(outcome.sans, StyleDecision::Raw(FontFamily::Carlito));
        assert_eq!(container.serif_default, FontFamily::Palatino);
        assert!(outcome.active.uses_optimized(FontFamily::Palatino));
        assert!(!outcome.active.uses_optimized(FontFamily::Carlito));
        assert!(!container.opt.get(FontFamily::NimbusSans).unwrap().optimized);
        assert_eq!(
            outcome.stages,
            vec![
                Stage::LoadBuiltins,
                Stage::OptimizeAsync,
                Stage::EvaluateRaw,
                Stage::EvaluateOptimized,
                Stage::Select,
                Stage::Publish,
                Stage::Done,
            ]
        );
        // Two evaluations of six candidates over two pages.
        assert_eq!(log.count("evalPageFont"), 24);
    }

    #[tokio::test]
    async fn without_images_optimized_fonts_are_adopted_unvalidated() {
        let mut container = FontContainer::new();
        let (outcome, log) = run_pooled(
            StubScript::default(),
            MemoryImageCache::empty(),
            &[page(0, 10)],
            Some(&metrics()),
            &mut container,
        )
        .await;

        assert_eq!(container.active_catalogue(), &container.opt_initial);
        assert_eq!(container.opt, container.opt_initial);
        assert_eq!(outcome.active_kind, CatalogueKind::Optimized);
        assert_eq!(outcome.sans, StyleDecision::Unchanged);
        assert!(!outcome.enable_opt);
        assert_eq!(log.count("evalPageFont"), 0);
        assert_eq!(log.count("optimizeFont"), 6);
    }

    #[tokio::test]
    async fn nothing_to_work_with_only_loads_builtins() {
        let mut container = FontContainer::new();
        container.set_default(FontFamily::Carlito);
        container.set_default(FontFamily::Garamond);

        let (outcome, log) = run_pooled(
            StubScript::default(),
            MemoryImageCache::empty(),
            &[page(0, 10)],
            None,
            &mut container,
        )
        .await;

        assert_eq!(container.sans_default, FontFamily::Carlito);
        assert_eq!(container.serif_default, FontFamily::Garamond);
        assert_eq!(container.raw.len(), 6);
        assert!(container.opt.is_empty());
        assert_eq!(log.count("loadFonts"), 2);
        assert_eq!(log.count("optimizeFont"), 0);
        assert_eq!(log.count("evalPageFont"), 0);
        assert_eq!(
            outcome.stages,
            vec![Stage::LoadBuiltins, Stage::Publish, Stage::Done]
        );
    }

    #[tokio::test]
    async fn images_without_metrics_pick_raw_defaults() {
        let script = StubScript {
            raw_metric: per_word(&[(FontFamily::Carlito, 1.2), (FontFamily::Garamond, 0.3)]),
            ..Default::default()
        };
        let mut container = FontContainer::new();
        let pages: Vec<_> = (0..8).map(|i| page(i, 2)).collect();
        let (outcome, log) = run_pooled(
            script,
            MemoryImageCache::blank(8, 8, 8),
            &pages,
            None,
            &mut container,
        )
        .await;

        assert_eq!(outcome.sans, StyleDecision::Raw(FontFamily::NimbusSans));
        assert_eq!(outcome.serif, StyleDecision::Raw(FontFamily::Garamond));
        assert!(outcome.eval_opt.is_none());
        // Sampling stops at five pages.
        assert_eq!(log.count("evalPageFont"), 6 * 5);
        assert_eq!(
            outcome.stages,
            vec![
                Stage::LoadBuiltins,
                Stage::EvaluateRaw,
                Stage::Select,
                Stage::Publish,
                Stage::Done,
            ]
        );
    }

    #[tokio::test]
    async fn wordless_pages_leave_defaults_alone() {
        let mut container = FontContainer::new();
        container.set_default(FontFamily::Carlito);
        let (outcome, _) = run_pooled(
            StubScript::default(),
            MemoryImageCache::blank(2, 8, 8),
            &[page(0, 0), page(1, 0)],
            Some(&metrics()),
            &mut container,
        )
        .await;

        assert_eq!(outcome.sans, StyleDecision::NoDecision);
        assert_eq!(outcome.serif, StyleDecision::NoDecision);
        assert_eq!(container.sans_default, FontFamily::Carlito);
        assert_eq!(container.serif_default, FontFamily::NimbusRomNo9L);
        assert!(!outcome.enable_opt);
    }

    #[tokio::test]
    async fn unusable_optimization_falls_back_to_raw_selection() {
        let script = StubScript {
            optimize: false,
            raw_metric: per_word(&[(FontFamily::NimbusRomNo9L, 0.2)]),
            ..Default::default()
        };
        let mut container = FontContainer::new();
        let (outcome, _) = run_pooled(
            script,
            MemoryImageCache::blank(1, 8, 8),
            &[page(0, 3)],
            Some(&metrics()),
            &mut container,
        )
        .await;

        assert!(outcome.eval_opt.is_none());
        assert!(!outcome.stages.contains(&Stage::EvaluateOptimized));
        assert_eq!(outcome.serif, StyleDecision::Raw(FontFamily::NimbusRomNo9L));
        assert!(container.opt.is_empty());
    }

    #[tokio::test]
    async fn rerun_without_optimized_fonts_drops_earlier_catalogues() {
        let mut container = FontContainer::new();
        let stale: FontSet = builtins()
            .iter()
            .map(|f| FontData {
                family: f.family,
                optimized: true,
                source: b"old".to_vec(),
            })
            .collect();
        container.opt_initial = stale.clone();
        container.opt = stale;
        container.active_kind = CatalogueKind::Optimized;

        let script = StubScript {
            optimize: false,
            ..Default::default()
        };
        let (outcome, log) = run_pooled(
            script,
            MemoryImageCache::blank(1, 8, 8),
            &[page(0, 3)],
            Some(&metrics()),
            &mut container,
        )
        .await;

        assert!(container.opt.is_empty());
        assert!(container.opt_initial.is_empty());
        assert_eq!(outcome.active_kind, CatalogueKind::Raw);
        assert!(!outcome.enable_opt);
        // Raw catalogue only, once per worker.
        assert_eq!(log.count("loadFonts"), 2);
        assert!(FontFamily::ALL
            .iter()
            .all(|f| !container.active_config().uses_optimized(*f)));
    }

    #[tokio::test]
    async fn inline_mode_renders_on_the_calling_task() {
        let log = StubLog::new();
        let script = Arc::new(StubScript {
            optimized_metric: per_word(&[(FontFamily::NimbusSans, 0.1)]),
            ..Default::default()
        });
        let scheduler = pool(Arc::clone(&script), &log, RenderMode::Inline).await;
        assert_eq!(scheduler.worker_count(), 1);
        let renderer = InlineRenderer::start(StubBackend::new(99, script, log.clone()))
            .await
            .unwrap();
        let images = MemoryImageCache::blank(2, 8, 8);
        let pages = vec![page(0, 3), page(1, 3)];
        let mut container = FontContainer::new();

        let outcome = FontSelector::new(&scheduler, &renderer, &images)
            .run(&mut container, &builtins(), &pages, Some(&metrics()))
            .await
            .unwrap();

        assert_eq!(outcome.sans, StyleDecision::Optimized(FontFamily::NimbusSans));
        assert!(log.workers_for("evalPageFont").iter().all(|w| *w == 99));
        assert!(log.workers_for("optimizeFont").iter().all(|w| *w == 0));
        scheduler.terminate();
    }
}
