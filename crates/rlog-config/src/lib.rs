// SPDX-License-Identifier: Apache-2.0

//! Process-wide context, structured errors, control-plane messages and
//! policy-file parsing shared by every other crate in the workspace.

mod context;
mod control;
mod error;
mod policy;

pub use context::ProcessContext;
pub use control::ControlMsg;
pub use error::{EngineError, Result};
pub use policy::{
    PerSourceDefault, PerSourceOverride, PerSourceOverrideEntry, PerSourcePolicyFile,
    PerSourcePolicyFileRaw, RateLimitPolicyFile,
};
