// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Schriftwerk: worker pool, readiness gates and job dispatch.
//
// Workers are isolated tasks that own a `WorkerBackend` and talk to the rest
// of the engine only through typed messages.

pub mod backend;
pub mod gate;
pub mod handle;
pub mod protocol;
pub mod scheduler;
pub mod stub;

#[cfg(feature = "ocr")]
pub mod ocr;

pub use backend::{EarlyReply, WorkerBackend};
pub use gate::Gate;
pub use handle::{DualReply, ReplyHandle, WorkerHandle};
pub use protocol::{
    CorrelationId, EvalPageFontJob, OptimizeFontJob, RecognizeJob, ReinitializeJob, ReplySlot,
    WorkRequest, WorkResponse,
};
pub use scheduler::JobScheduler;
pub use stub::{StubBackend, StubLog, StubScript};
