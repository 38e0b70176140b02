// SPDX-License-Identifier: Apache-2.0

//! Action runtime: submission, transactional commit, suspension
//! backoff, and worker bookkeeping (`spec.md` §4.3).

mod action;
mod batch;
mod module;
mod worker;

pub use action::{Action, ActionCounters, ActionState, SuspensionConfig};
pub use batch::{Batch, BatchElement, ElementState};
pub use module::{ActionModule, ActionResult};
pub use worker::{WorkerId, WorkerRegistry};
