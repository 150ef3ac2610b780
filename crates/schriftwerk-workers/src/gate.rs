// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// One-shot readiness latch.
//
// A gate starts pending and is resolved exactly once, either open or failed.
// Any number of tasks may wait on it, before or after resolution; later
// resolution attempts are ignored. Re-arming means replacing the gate.

use std::sync::Arc;

use schriftwerk_core::error::{Result, SchriftwerkError};
use tokio::sync::watch;

#[derive(Debug, Clone, PartialEq, Eq)]
enum GateState {
    Pending,
    Open,
    Failed(String),
}

/// Single-resolution readiness signal shared by cloning.
#[derive(Debug, Clone)]
pub struct Gate {
    state: Arc<watch::Sender<GateState>>,
}

impl Default for Gate {
    fn default() -> Self {
        Self::new()
    }
}

impl Gate {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(GateState::Pending);
        Self {
            state: Arc::new(tx),
        }
    }

    /// Resolve successfully. Returns `false` if the gate was already resolved.
    pub fn open(&self) -> bool {
        self.resolve(GateState::Open)
    }

    /// Resolve with a failure. Returns `false` if the gate was already resolved.
    pub fn fail(&self, reason: impl Into<String>) -> bool {
        self.resolve(GateState::Failed(reason.into()))
    }

    fn resolve(&self, next: GateState) -> bool {
        self.state.send_if_modified(|state| {
            if *state == GateState::Pending {
                *state = next;
                true
            } else {
                false
            }
        })
    }

    pub fn is_open(&self) -> bool {
        *self.state.borrow() == GateState::Open
    }

    pub fn is_resolved(&self) -> bool {
        *self.state.borrow() != GateState::Pending
    }

    pub fn is_failed(&self) -> bool {
        matches!(*self.state.borrow(), GateState::Failed(_))
    }

    /// Two handles are the same gate when they share one latch.
    pub fn same_as(&self, other: &Gate) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }

    /// Wait until the gate resolves.
    pub async fn wait(&self) -> Result<()> {
        let mut rx = self.state.subscribe();
        let state = rx
            .wait_for(|state| *state != GateState::Pending)
            .await
            .map_err(|_| SchriftwerkError::GateFailed("gate dropped while pending".into()))?;
        match &*state {
            GateState::Open => Ok(()),
            GateState::Failed(reason) => Err(SchriftwerkError::GateFailed(reason.clone())),
            GateState::Pending => Err(SchriftwerkError::GateFailed("gate still pending".into())),
        }
    }
}
