// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Worker pool and job dispatch.
//
// The scheduler owns a fixed-size pool of workers and two readiness gates:
// `pool_ready`, resolved once every worker has started, and `engine_ready`,
// resolved once the recognition engine is loaded. Jobs go to the worker with
// the fewest in-flight requests.
//
// Initialisation sequences run in spawned tasks so a caller that gives up
// waiting can never strand a gate. A generation counter, bumped on every
// `terminate`, lets a sequence that outlived its pool notice and discard its
// results.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use schriftwerk_core::config::EngineConfig;
use schriftwerk_core::error::{Result, SchriftwerkError};
use schriftwerk_core::types::{
    ActiveFontConfig, CatalogueKind, EngineParams, EvaluationResult, FontData, FontSet,
    RecognitionOutput, RenderMode,
};
use tracing::{debug, info, instrument, trace, warn};

use crate::backend::WorkerBackend;
use crate::gate::Gate;
use crate::handle::{DualReply, WorkerHandle};
use crate::protocol::{
    EvalPageFontJob, OptimizeFontJob, RecognizeJob, ReinitializeJob, WorkRequest, WorkResponse,
};

type Spawner = Arc<dyn Fn(usize) -> Result<WorkerHandle> + Send + Sync>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Default)]
struct PoolState {
    generation: u64,
    workers: Vec<Arc<WorkerHandle>>,
    pool_ready: Option<Gate>,
    engine_ready: Option<Gate>,
    engine_params: Option<EngineParams>,
}

struct Inner {
    config: EngineConfig,
    spawner: Spawner,
    state: Mutex<PoolState>,
    cursor: AtomicUsize,
}

/// Shared handle to the worker pool. Clones refer to the same pool.
#[derive(Clone)]
pub struct JobScheduler {
    inner: Arc<Inner>,
}

impl JobScheduler {
    /// Create an idle scheduler. `factory` builds the backend for each worker
    /// slot; nothing is spawned until [`init`](Self::init).
    pub fn new<B, F>(config: EngineConfig, factory: F) -> Self
    where
        B: WorkerBackend,
        F: Fn(usize) -> Result<B> + Send + Sync + 'static,
    {
        let spawner: Spawner = Arc::new(move |id| factory(id).map(|b| WorkerHandle::spawn(id, b)));
        Self {
            inner: Arc::new(Inner {
                config,
                spawner,
                state: Mutex::new(PoolState::default()),
                cursor: AtomicUsize::new(0),
            }),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn render_mode(&self) -> RenderMode {
        self.inner.config.render_mode
    }

    /// Number of live workers (zero before `init` completes). Workers that
    /// crashed since are not counted.
    pub fn worker_count(&self) -> usize {
        lock(&self.inner.state)
            .workers
            .iter()
            .filter(|w| w.is_alive())
            .count()
    }

    /// Workers with a loaded recognition engine.
    pub fn engine_worker_count(&self) -> usize {
        lock(&self.inner.state)
            .workers
            .iter()
            .filter(|w| w.is_engine_ready())
            .count()
    }

    pub fn pool_ready(&self) -> Option<Gate> {
        lock(&self.inner.state).pool_ready.clone()
    }

    pub fn engine_ready(&self) -> Option<Gate> {
        lock(&self.inner.state).engine_ready.clone()
    }

    /// Parameters of the most recent engine initialisation.
    pub fn engine_params(&self) -> Option<EngineParams> {
        lock(&self.inner.state).engine_params.clone()
    }

    /// Total requests awaiting a reply across the pool.
    pub fn in_flight(&self) -> usize {
        lock(&self.inner.state)
            .workers
            .iter()
            .map(|w| w.in_flight())
            .sum()
    }

    // -- Lifecycle --

    /// Start the pool. Concurrent callers share one initialisation; calling
    /// again after success is a no-op.
    #[instrument(skip_all)]
    pub async fn init(&self) -> Result<()> {
        let gate = {
            let mut state = lock(&self.inner.state);
            let existing = state.pool_ready.clone().filter(|gate| !gate.is_failed());
            match existing {
                Some(gate) => gate,
                None => {
                    let gate = Gate::new();
                    state.pool_ready = Some(gate.clone());
                    tokio::spawn(build_pool(
                        Arc::clone(&self.inner),
                        state.generation,
                        gate.clone(),
                    ));
                    gate
                }
            }
        };
        gate.wait().await
    }

    /// Load the recognition engine on every worker.
    ///
    /// With `any_ok`, an engine that is loaded or loading is accepted as is.
    /// Otherwise a fresh load starts after any earlier one has settled.
    /// Worker 0 must succeed; other workers that fail are left without an
    /// engine and receive no recognition jobs.
    #[instrument(skip_all, fields(any_ok = params.any_ok, variant = ?params.variant))]
    pub async fn init_engine(&self, params: EngineParams) -> Result<()> {
        self.wait_pool().await?;

        let gate = {
            let mut state = lock(&self.inner.state);
            let reusable = state
                .engine_ready
                .as_ref()
                .filter(|gate| params.any_ok && !gate.is_failed())
                .cloned();
            match reusable {
                Some(gate) => {
                    debug!("reusing existing engine");
                    gate
                }
                None => {
                    let gate = Gate::new();
                    let previous = state.engine_ready.replace(gate.clone());
                    state.engine_params = Some(params.clone());
                    tokio::spawn(load_engine(
                        Arc::clone(&self.inner),
                        state.generation,
                        gate.clone(),
                        previous,
                        params,
                    ));
                    gate
                }
            }
        };

        gate.wait()
            .await
            .map_err(|e| SchriftwerkError::EngineInit(e.to_string()))
    }

    /// Release every worker, reject everything pending and reset both gates.
    /// The scheduler can be initialised again afterwards.
    pub fn terminate(&self) {
        let (workers, pool_ready, engine_ready) = {
            let mut state = lock(&self.inner.state);
            state.generation += 1;
            state.engine_params = None;
            (
                std::mem::take(&mut state.workers),
                state.pool_ready.take(),
                state.engine_ready.take(),
            )
        };

        for worker in &workers {
            worker.terminate();
        }
        for gate in pool_ready.into_iter().chain(engine_ready) {
            gate.fail("scheduler terminated");
        }
        info!(workers = workers.len(), "scheduler terminated");
    }

    // -- Dispatch --

    async fn wait_pool(&self) -> Result<()> {
        let gate = self
            .pool_ready()
            .ok_or(SchriftwerkError::SchedulerNotInitialized)?;
        gate.wait().await
    }

    /// Pick the worker for `request`, waiting for whichever gate it needs.
    async fn select(&self, request: &WorkRequest) -> Result<Arc<WorkerHandle>> {
        self.wait_pool().await?;
        if request.requires_engine() {
            let gate = self.engine_ready().ok_or_else(|| {
                SchriftwerkError::EngineInit("recognition engine not initialised".into())
            })?;
            gate.wait()
                .await
                .map_err(|e| SchriftwerkError::EngineInit(e.to_string()))?;
        }

        let workers = lock(&self.inner.state).workers.clone();
        let live: Vec<&Arc<WorkerHandle>> = workers.iter().filter(|w| w.is_alive()).collect();
        let eligible: Vec<&Arc<WorkerHandle>> = live
            .iter()
            .copied()
            .filter(|w| !request.requires_engine() || w.is_engine_ready())
            .collect();
        if eligible.is_empty() {
            return Err(match (workers.first(), live.is_empty()) {
                (None, _) => SchriftwerkError::SchedulerNotInitialized,
                (Some(first), true) => SchriftwerkError::WorkerGone { worker: first.id() },
                (Some(_), false) => {
                    SchriftwerkError::EngineInit("no worker has a recognition engine".into())
                }
            });
        }

        let start = self.inner.cursor.fetch_add(1, Ordering::Relaxed);
        let n = eligible.len();
        let chosen = (0..n)
            .map(|k| eligible[(start + k) % n])
            .min_by_key(|w| w.in_flight())
            .ok_or(SchriftwerkError::SchedulerNotInitialized)?;
        Ok(Arc::clone(chosen))
    }

    /// Run one single-result operation on the least-loaded worker.
    pub async fn dispatch(&self, request: WorkRequest) -> Result<WorkResponse> {
        let worker = self.select(&request).await?;
        trace!(worker = worker.id(), operation = request.operation(), "dispatch");
        worker.dispatch(request)?.await
    }

    /// Run a dual-result operation; both halves can be awaited independently.
    pub async fn dispatch_dual(&self, request: WorkRequest) -> Result<DualReply> {
        let worker = self.select(&request).await?;
        trace!(worker = worker.id(), operation = request.operation(), "dispatch dual");
        worker.dispatch_dual(request)
    }

    /// Send `request` to every live worker and wait for all replies. Fails
    /// with the first error once every worker has answered.
    pub async fn broadcast(&self, request: WorkRequest) -> Result<Vec<WorkResponse>> {
        self.wait_pool().await?;
        let (workers, dead): (Vec<_>, Vec<_>) = lock(&self.inner.state)
            .workers
            .iter()
            .cloned()
            .partition(|w| w.is_alive());
        for worker in &dead {
            warn!(worker = worker.id(), operation = request.operation(), "skipping dead worker");
        }
        if workers.is_empty() {
            return Err(match dead.first() {
                Some(worker) => SchriftwerkError::WorkerGone { worker: worker.id() },
                None => SchriftwerkError::SchedulerNotInitialized,
            });
        }
        debug!(
            operation = request.operation(),
            workers = workers.len(),
            "broadcast"
        );

        let mut pending = Vec::with_capacity(workers.len());
        for worker in &workers {
            pending.push(worker.dispatch(request.clone()));
        }

        let mut responses = Vec::with_capacity(pending.len());
        let mut first_error = None;
        for reply in pending {
            let outcome = match reply {
                Ok(handle) => handle.await,
                Err(e) => Err(e),
            };
            match outcome {
                Ok(response) => responses.push(response),
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(responses),
        }
    }

    // -- Typed operations --

    pub async fn eval_page_font(&self, job: EvalPageFontJob) -> Result<EvaluationResult> {
        let request = WorkRequest::EvalPageFont(job);
        let op = request.operation();
        self.dispatch(request).await?.into_page_metric(op)
    }

    pub async fn optimize_font(&self, job: OptimizeFontJob) -> Result<Option<FontData>> {
        let request = WorkRequest::OptimizeFont(job);
        let op = request.operation();
        self.dispatch(request).await?.into_optimized_font(op)
    }

    pub async fn recognize(&self, job: RecognizeJob) -> Result<RecognitionOutput> {
        let request = WorkRequest::Recognize(job);
        let op = request.operation();
        self.dispatch(request).await?.into_recognition(op)
    }

    /// Recognition output arrives on `primary`, the converted page on
    /// `secondary`.
    pub async fn recognize_and_convert(&self, job: RecognizeJob) -> Result<DualReply> {
        self.dispatch_dual(WorkRequest::RecognizeAndConvert(job))
            .await
    }

    /// Register a font catalogue with every worker.
    pub async fn load_fonts(&self, kind: CatalogueKind, fonts: FontSet) -> Result<()> {
        let request = WorkRequest::LoadFonts { kind, fonts };
        let op = request.operation();
        for response in self.broadcast(request).await? {
            response.into_ack(op)?;
        }
        Ok(())
    }

    /// Publish the active font configuration to every worker.
    pub async fn set_font_active(&self, config: ActiveFontConfig) -> Result<()> {
        let request = WorkRequest::SetFontActive(config);
        let op = request.operation();
        for response in self.broadcast(request).await? {
            response.into_ack(op)?;
        }
        Ok(())
    }
}

/// Spawn the pool: worker 0 first, then the rest together.
async fn build_pool(inner: Arc<Inner>, generation: u64, gate: Gate) {
    let count = inner.config.worker_count();
    info!(workers = count, mode = ?inner.config.render_mode, "starting worker pool");

    let mut workers: Vec<Arc<WorkerHandle>> = Vec::with_capacity(count);
    let outcome = start_workers(&inner, count, &mut workers).await;

    if let Err(e) = outcome {
        warn!(error = %e, "worker pool failed to start");
        for worker in &workers {
            worker.terminate();
        }
        gate.fail(e.to_string());
        return;
    }

    let mut state = lock(&inner.state);
    if state.generation != generation {
        drop(state);
        debug!("pool finished starting after terminate; discarding");
        for worker in &workers {
            worker.terminate();
        }
        gate.fail("scheduler terminated during startup");
        return;
    }
    state.workers = workers;
    gate.open();
    info!(workers = count, "worker pool ready");
}

async fn start_workers(
    inner: &Inner,
    count: usize,
    workers: &mut Vec<Arc<WorkerHandle>>,
) -> Result<()> {
    let first = Arc::new((inner.spawner)(0)?);
    workers.push(Arc::clone(&first));
    first.wait_ready().await?;

    for id in 1..count {
        workers.push(Arc::new((inner.spawner)(id)?));
    }
    // The rest were all spawned before this point and start concurrently.
    for worker in workers.iter().skip(1) {
        worker.wait_ready().await?;
    }
    Ok(())
}

/// Reinitialise the recognition engine across the pool.
async fn load_engine(
    inner: Arc<Inner>,
    generation: u64,
    gate: Gate,
    previous: Option<Gate>,
    params: EngineParams,
) {
    if let Some(previous) = previous {
        // Only ordering matters here; the earlier outcome is its own callers'.
        let _ = previous.wait().await;
    }

    let workers = {
        let state = lock(&inner.state);
        if state.generation != generation {
            gate.fail("scheduler terminated");
            return;
        }
        state.workers.clone()
    };
    let Some((first, rest)) = workers.split_first() else {
        gate.fail("no workers to load an engine into");
        return;
    };

    let job = ReinitializeJob {
        languages: params.languages.clone(),
        variant: params.variant,
    };
    info!(languages = ?job.languages, variant = ?job.variant, "loading recognition engine");

    let primary = match first.dispatch(WorkRequest::Reinitialize(job.clone())) {
        Ok(reply) => reply.await.and_then(|r| r.into_ack("reinitialize")),
        Err(e) => Err(e),
    };
    if let Err(e) = primary {
        first.set_engine_ready(false);
        warn!(worker = first.id(), error = %e, "primary worker failed to load engine");
        gate.fail(e.to_string());
        return;
    }
    first.set_engine_ready(true);

    let pending: Vec<_> = rest
        .iter()
        .map(|worker| (worker, worker.dispatch(WorkRequest::Reinitialize(job.clone()))))
        .collect();
    let mut loaded = 1;
    for (worker, reply) in pending {
        let outcome = match reply {
            Ok(reply) => reply.await.and_then(|r| r.into_ack("reinitialize")),
            Err(e) => Err(e),
        };
        match outcome {
            Ok(()) => {
                worker.set_engine_ready(true);
                loaded += 1;
            }
            Err(e) => {
                worker.set_engine_ready(false);
                warn!(worker = worker.id(), error = %e, "worker left without recognition engine");
            }
        }
    }

    if lock(&inner.state).generation != generation {
        gate.fail("scheduler terminated");
        return;
    }
    gate.open();
    info!(loaded, total = workers.len(), "recognition engine ready");
}
