// SPDX-License-Identifier: Apache-2.0

//! Global token-bucket and per-source rate-limit engine (`spec.md`
//! §4.2), plus repeat-message compression (`spec.md` §3 "Rate-limit
//! instance").

mod instance;
mod key_template;
mod policy;

pub use instance::{MsgOutcome, RatelimitInstance};
pub use key_template::{sanitise_key, KeyTemplate};
pub use policy::{
    GlobalBucketConfig, PerSourceOutcome, PerSourcePolicy, PerSourceState, PerSourceStaticConfig,
    PolicyRegistry, SharedPolicy, DEFAULT_PER_SOURCE_MAX_STATES, DEFAULT_PER_SOURCE_TOPN,
};
