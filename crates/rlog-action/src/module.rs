// SPDX-License-Identifier: Apache-2.0

//! The seam a concrete output binding implements (`spec.md` §3 "Action",
//! §4.3 "Submission").

use rlog_message::Msg;

/// What a module's `doAction` call reported for one batch element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionResult {
    /// Commit this element now.
    Ok,
    /// Hold the element as `Submitted`; commit is deferred to
    /// `end_transaction` at batch end.
    DeferCommit,
    /// Every prior `Submitted` element in this batch becomes
    /// `Committed`; this element remains `Submitted`.
    PreviousCommitted,
    /// The action cannot currently make progress; enter `Susp`.
    Suspended,
    /// Permanent failure for this element only; it is marked
    /// `Discarded` and the message is logged.
    Fatal(String),
}

/// A configured output binding. Implementations own whatever state a
/// concrete destination needs (file handle, socket, HTTP client); the
/// action runtime only ever calls through this trait.
pub trait ActionModule: Send + Sync {
    /// Called once per batch before the first `do_action`, only when
    /// the action is transactional.
    fn begin_transaction(&self) -> ActionResult {
        ActionResult::Ok
    }

    /// Processes one message. Called once per non-committed batch
    /// element.
    fn do_action(&self, msg: &Msg) -> ActionResult;

    /// Called once per batch after the last element, only when the
    /// action is transactional and at least one element deferred its
    /// commit.
    fn end_transaction(&self) -> ActionResult {
        ActionResult::Ok
    }
}
