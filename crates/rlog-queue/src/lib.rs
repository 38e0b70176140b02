// SPDX-License-Identifier: Apache-2.0

//! Bounded message queue with flow control and disk-assisted overflow
//! (`spec.md` §4.4).

mod disk;
mod queue;

pub use queue::{EnqueueOutcome, FlowClass, Queue, QueueConfig, Watermarks};
