// SPDX-License-Identifier: Apache-2.0

//! Ambient logging setup. The router core emits its "begin to drop",
//! "messages lost", and dynstats/action-suspension diagnostics through
//! `tracing`; this wires a process-wide subscriber so they reach
//! stderr with a level controllable via `RUST_LOG`.

use tracing_subscriber::EnvFilter;

/// Installs a global `fmt` subscriber. Safe to call more than once;
/// only the first call takes effect.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
