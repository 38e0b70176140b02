// SPDX-License-Identifier: Apache-2.0

//! Control-plane messages, replacing the original's signal handlers
//! with an explicit queue (`spec.md` §9 design note: "a control-plane
//! command queue... carrying typed messages instead of a signal
//! handler mutating globals").
//!
//! A dedicated control thread receives OS signals (or, in tests, is
//! driven directly) and pushes one of these onto a queue that the
//! engine's supervisory loop drains between batches.

/// One control-plane event. Dispatched by the engine's supervisory
/// loop; never touches the hot per-message path directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMsg {
    /// `SIGHUP`: reopen the oversize-message log, reparse all
    /// reloadable policy files, reload `reloadOnHUP` lookup tables,
    /// and invoke per-module HUP handlers. Never restarts queues.
    Reload,
    /// `SIGTERM`, or `SIGINT` when `shutdown.enable.ctlc` is set: run
    /// the full two-phase shutdown.
    Shutdown,
    /// A policy file changed underneath a running policy; carries the
    /// policy name so the reload can be scoped instead of global.
    ReloadPolicy { name: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variants_are_distinguishable() {
        assert_ne!(ControlMsg::Reload, ControlMsg::Shutdown);
        assert_eq!(
            ControlMsg::ReloadPolicy {
                name: "auth".into()
            },
            ControlMsg::ReloadPolicy {
                name: "auth".into()
            }
        );
    }
}
