// SPDX-License-Identifier: Apache-2.0

//! Router core entry point: wires the rate-limit, queue, and action
//! crates into one message-submission path (`spec.md` §1 OVERVIEW).

mod logging;
mod router;

pub use logging::init as init_logging;
pub use router::{Router, RouterConfig};

pub use rlog_action::{
    Action, ActionModule, ActionResult, ActionState, Batch, SuspensionConfig, WorkerId,
    WorkerRegistry,
};
pub use rlog_config::{EngineError, ProcessContext, Result};
pub use rlog_dynstats::{Bucket, BucketConfig};
pub use rlog_message::{Msg, Severity};
pub use rlog_percentile::PercentileBucket;
pub use rlog_queue::{EnqueueOutcome, Queue, QueueConfig, Watermarks};
pub use rlog_ratelimit::{MsgOutcome, PolicyRegistry, RatelimitInstance};
