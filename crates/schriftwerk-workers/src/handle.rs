// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Handle to one isolated worker.
//
// Each worker is a pair of tasks: the worker loop, which owns the backend and
// processes requests in arrival order, and a router, which matches replies
// to pending completions by correlation id. The two sides share nothing but
// the channels between them.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};

use schriftwerk_core::error::{Result, SchriftwerkError};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::backend::{EarlyReply, WorkerBackend};
use crate::gate::Gate;
use crate::protocol::{CorrelationId, Envelope, Reply, WorkRequest, WorkResponse};

type Completion = oneshot::Sender<Result<WorkResponse>>;
type PendingTable = Arc<Mutex<HashMap<CorrelationId, Completion>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Awaitable result of one reply slot.
#[derive(Debug)]
pub struct ReplyHandle {
    worker: usize,
    id: CorrelationId,
    rx: oneshot::Receiver<Result<WorkResponse>>,
}

impl ReplyHandle {
    pub fn id(&self) -> CorrelationId {
        self.id
    }

    pub fn worker(&self) -> usize {
        self.worker
    }
}

impl Future for ReplyHandle {
    type Output = Result<WorkResponse>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let worker = self.worker;
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(SchriftwerkError::WorkerGone { worker })))
    }
}

/// Both halves of a dual-result request.
#[derive(Debug)]
pub struct DualReply {
    pub primary: ReplyHandle,
    pub secondary: ReplyHandle,
}

/// One worker slot in the pool.
pub struct WorkerHandle {
    id: usize,
    label: String,
    requests: Mutex<Option<mpsc::UnboundedSender<Envelope>>>,
    pending: PendingTable,
    next_request: AtomicU64,
    ready: Gate,
    alive: Arc<AtomicBool>,
    engine_ready: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerHandle {
    /// Start a worker around `backend`. Must be called inside a Tokio runtime.
    ///
    /// The worker begins initialising immediately; use
    /// [`wait_ready`](Self::wait_ready) before relying on it.
    pub fn spawn<B: WorkerBackend>(id: usize, backend: B) -> Self {
        let label = format!("worker-{id}-{}", &Uuid::new_v4().simple().to_string()[..8]);
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (reply_tx, reply_rx) = mpsc::unbounded_channel();
        let pending: PendingTable = Arc::new(Mutex::new(HashMap::new()));
        let ready = Gate::new();
        let alive = Arc::new(AtomicBool::new(true));

        let worker = tokio::spawn(run_worker(id, backend, request_rx, reply_tx));
        let router = tokio::spawn(route_replies(
            id,
            reply_rx,
            Arc::clone(&pending),
            ready.clone(),
            Arc::clone(&alive),
        ));

        debug!(worker = id, label = %label, "worker spawned");

        Self {
            id,
            label,
            requests: Mutex::new(Some(request_tx)),
            pending,
            next_request: AtomicU64::new(1),
            ready,
            alive,
            engine_ready: AtomicBool::new(false),
            tasks: Mutex::new(vec![worker, router]),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_ready(&self) -> bool {
        self.ready.is_open()
    }

    /// Wait for the worker's startup to finish.
    pub async fn wait_ready(&self) -> Result<()> {
        self.ready.wait().await.map_err(|e| SchriftwerkError::WorkerInit {
            worker: self.id,
            reason: e.to_string(),
        })
    }

    /// False once the worker loop has exited or the handle was terminated.
    /// A dead worker never answers again.
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Whether the recognition engine loaded successfully on this worker.
    pub fn is_engine_ready(&self) -> bool {
        self.is_alive() && self.engine_ready.load(Ordering::Acquire)
    }

    pub(crate) fn set_engine_ready(&self, ready: bool) {
        self.engine_ready.store(ready, Ordering::Release);
    }

    /// Number of completions still waiting for a reply.
    pub fn in_flight(&self) -> usize {
        lock(&self.pending).len()
    }

    /// Send a single-result request.
    pub fn dispatch(&self, request: WorkRequest) -> Result<ReplyHandle> {
        if request.is_dual() {
            // Dual requests reply twice and need both slots registered.
            return Err(SchriftwerkError::Unsupported(request.operation().into()));
        }
        let request_id = self.next_request.fetch_add(1, Ordering::Relaxed);
        let primary = self.register(CorrelationId::primary(request_id));
        self.send(request_id, request)?;
        Ok(primary)
    }

    /// Send a dual-result request; both slots are registered before sending.
    pub fn dispatch_dual(&self, request: WorkRequest) -> Result<DualReply> {
        if !request.is_dual() {
            return Err(SchriftwerkError::Unsupported(request.operation().into()));
        }
        let request_id = self.next_request.fetch_add(1, Ordering::Relaxed);
        let secondary = self.register(CorrelationId::secondary(request_id));
        let primary = self.register(CorrelationId::primary(request_id));
        self.send(request_id, request)?;
        Ok(DualReply { primary, secondary })
    }

    fn register(&self, id: CorrelationId) -> ReplyHandle {
        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(id, tx);
        ReplyHandle {
            worker: self.id,
            id,
            rx,
        }
    }

    fn send(&self, request_id: u64, request: WorkRequest) -> Result<()> {
        let operation = request.operation();
        let sent = match lock(&self.requests).as_ref() {
            Some(tx) => tx
                .send(Envelope {
                    request_id,
                    request,
                })
                .is_ok(),
            None => false,
        };
        if sent {
            trace!(worker = self.id, request_id, operation, "request sent");
            return Ok(());
        }

        let mut pending = lock(&self.pending);
        pending.remove(&CorrelationId::primary(request_id));
        pending.remove(&CorrelationId::secondary(request_id));
        Err(SchriftwerkError::WorkerGone { worker: self.id })
    }

    /// Stop the worker and reject everything still pending.
    pub fn terminate(&self) {
        self.alive.store(false, Ordering::Release);
        lock(&self.requests).take();
        for task in lock(&self.tasks).drain(..) {
            task.abort();
        }
        let orphaned: Vec<Completion> = lock(&self.pending).drain().map(|(_, tx)| tx).collect();
        if !orphaned.is_empty() {
            debug!(worker = self.id, orphaned = orphaned.len(), "rejecting pending requests");
        }
        for tx in orphaned {
            let _ = tx.send(Err(SchriftwerkError::WorkerTerminated { worker: self.id }));
        }
        self.ready.fail("worker terminated");
        self.set_engine_ready(false);
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.terminate();
    }
}

async fn run_worker<B: WorkerBackend>(
    id: usize,
    mut backend: B,
    mut requests: mpsc::UnboundedReceiver<Envelope>,
    replies: mpsc::UnboundedSender<Reply>,
) {
    let init = backend.init().await;
    let failed = init.is_err();
    let _ = replies.send(Reply {
        id: CorrelationId::READY,
        result: init.map(|()| WorkResponse::Ready),
    });
    if failed {
        return;
    }

    while let Some(Envelope {
        request_id,
        request,
    }) = requests.recv().await
    {
        let operation = request.operation();
        if request.is_dual() {
            let early = EarlyReply::new(
                CorrelationId::primary(request_id),
                id,
                operation,
                replies.clone(),
            );
            let result = backend.call_dual(request, early).await;
            let _ = replies.send(Reply {
                id: CorrelationId::secondary(request_id),
                result,
            });
        } else {
            let result = backend.call(request).await;
            let _ = replies.send(Reply {
                id: CorrelationId::primary(request_id),
                result,
            });
        }
    }

    debug!(worker = id, "worker request channel closed");
}

async fn route_replies(
    id: usize,
    mut replies: mpsc::UnboundedReceiver<Reply>,
    pending: PendingTable,
    ready: Gate,
    alive: Arc<AtomicBool>,
) {
    while let Some(Reply { id: key, result }) = replies.recv().await {
        if key == CorrelationId::READY {
            match result {
                Ok(_) => {
                    ready.open();
                }
                Err(e) => {
                    warn!(worker = id, error = %e, "worker failed to start");
                    ready.fail(e.to_string());
                }
            }
            continue;
        }

        let completion = lock(&pending).remove(&key);
        match completion {
            Some(tx) => {
                let _ = tx.send(result);
            }
            None => trace!(worker = id, correlation = %key, "reply without a waiter"),
        }
    }

    // The worker loop is gone (shutdown, failed start or panic). Marked dead
    // before waiters hear about it.
    alive.store(false, Ordering::Release);
    ready.fail("worker exited");
    let orphaned: Vec<Completion> = lock(&pending).drain().map(|(_, tx)| tx).collect();
    if !orphaned.is_empty() {
        warn!(worker = id, orphaned = orphaned.len(), "worker exited with requests in flight");
    }
    for tx in orphaned {
        let _ = tx.send(Err(SchriftwerkError::WorkerGone { worker: id }));
    }
}
