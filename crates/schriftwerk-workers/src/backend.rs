// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Worker-side operation surface.
//
// A backend is the code that actually recognises, renders and compares. It
// is owned by exactly one worker task and only ever sees one request at a
// time, so implementations can keep plain mutable state (loaded fonts,
// engine handle) without locking.

use std::future::Future;

use schriftwerk_core::error::{Result, SchriftwerkError};
use tokio::sync::mpsc;

use crate::protocol::{CorrelationId, Reply, WorkRequest, WorkResponse};

/// Implementation of the worker operations.
pub trait WorkerBackend: Send + 'static {
    /// Prepare the worker. Runs once, before the first request; a failure
    /// shuts the worker down.
    fn init(&mut self) -> impl Future<Output = Result<()>> + Send;

    /// Handle a single-result operation.
    fn call(&mut self, request: WorkRequest) -> impl Future<Output = Result<WorkResponse>> + Send;

    /// Handle a dual-result operation. The primary result goes through
    /// `early` as soon as it exists; the returned value is the secondary.
    fn call_dual(
        &mut self,
        request: WorkRequest,
        early: EarlyReply,
    ) -> impl Future<Output = Result<WorkResponse>> + Send {
        async move {
            let operation = request.operation().to_string();
            early.send(Err(SchriftwerkError::Unsupported(operation.clone())));
            Err(SchriftwerkError::Unsupported(operation))
        }
    }
}

/// Sender for the primary half of a dual-result operation.
///
/// Dropping it unsent rejects the primary slot, so a waiter is never left
/// hanging.
pub struct EarlyReply {
    id: CorrelationId,
    worker: usize,
    operation: &'static str,
    tx: Option<mpsc::UnboundedSender<Reply>>,
}

impl EarlyReply {
    pub(crate) fn new(
        id: CorrelationId,
        worker: usize,
        operation: &'static str,
        tx: mpsc::UnboundedSender<Reply>,
    ) -> Self {
        Self {
            id,
            worker,
            operation,
            tx: Some(tx),
        }
    }

    pub fn send(mut self, result: Result<WorkResponse>) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Reply {
                id: self.id,
                result,
            });
        }
    }
}

impl Drop for EarlyReply {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Reply {
                id: self.id,
                result: Err(SchriftwerkError::Worker {
                    worker: self.worker,
                    operation: self.operation.to_string(),
                    message: "primary result was never produced".into(),
                }),
            });
        }
    }
}
