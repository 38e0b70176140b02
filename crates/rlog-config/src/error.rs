// SPDX-License-Identifier: Apache-2.0

//! Structured errors surfaced to callers (`spec.md` §6, §7).
//!
//! Hot-path call sites (classification, queueing) never propagate these
//! past the action runtime: every variant maps to either an admit, a
//! counted drop, or an action suspension before it reaches a caller
//! outside this workspace. Lifecycle call sites (policy load, HUP,
//! queue construction) propagate via `?` and are the only paths where
//! `EngineError` is meant to cross a thread boundary as a hard failure.

use std::path::PathBuf;

/// All errors the router core surfaces to callers, matching the codes
/// enumerated in `spec.md` §6.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Normal drop by any limiter (rate limit, queue discard mark, …).
    #[error("message discarded")]
    DiscardMsg,

    /// A named policy, bucket, or queue already exists where a unique
    /// name was required.
    #[error("duplicate name: {0}")]
    DuplicateName(String),

    /// Allocation failure on the hot path; treated as a soft, counted
    /// drop rather than propagated.
    #[error("out of memory")]
    OutOfMemory,

    /// A state-file write or disk-queue write failed.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A dynstats state file or disk-queue record failed to parse.
    #[error("JSON parse error in {path}: {source}")]
    JsonParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// A policy file failed to parse as YAML.
    #[error("YAML parse error in {path}: {source}")]
    YamlParse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// A referenced policy file does not exist.
    #[error("file not found: {0}")]
    FileNotFound(PathBuf),

    /// A configuration parameter failed validation.
    #[error("invalid configuration parameter: {0}")]
    ConfParamInvalid(String),

    /// The message was classified as rate-limited (global or per-source).
    #[error("rate limited")]
    RateLimited,

    /// The target action is currently suspended.
    #[error("action suspended")]
    Suspended,

    /// A lock could not be acquired without blocking; treated as a
    /// soft drop on the hot path.
    #[error("lock not immediately available")]
    NoEntry,
}

pub type Result<T> = std::result::Result<T, EngineError>;
