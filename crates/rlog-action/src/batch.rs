// SPDX-License-Identifier: Apache-2.0

//! A dequeued slice of messages handed to an action's `do_action`,
//! tracked element-by-element so a retry repeats only what failed
//! (`spec.md` §3 "Batch").

use rlog_message::Msg;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementState {
    New,
    Submitted,
    Committed,
    Discarded,
}

#[derive(Debug)]
pub struct BatchElement {
    pub msg: Msg,
    pub state: ElementState,
}

/// A batch owns its elements for the duration of `process_batch`; on
/// return, the caller re-enqueues anything still `New` or `Submitted`
/// (an at-least-once retry) and frees everything else.
#[derive(Debug)]
pub struct Batch {
    elements: Vec<BatchElement>,
}

impl Batch {
    #[must_use]
    pub fn from_messages(messages: Vec<Msg>) -> Self {
        Batch {
            elements: messages
                .into_iter()
                .map(|msg| BatchElement { msg, state: ElementState::New })
                .collect(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    #[must_use]
    pub fn elements(&self) -> &[BatchElement] {
        &self.elements
    }

    pub(crate) fn elements_mut(&mut self) -> &mut [BatchElement] {
        &mut self.elements
    }

    /// Elements still outstanding after a run (`New` or `Submitted`),
    /// in original order, for the caller to retain and retry.
    #[must_use]
    pub fn retained(self) -> Vec<Msg> {
        self.elements
            .into_iter()
            .filter(|e| matches!(e.state, ElementState::New | ElementState::Submitted))
            .map(|e| e.msg)
            .collect()
    }

    #[must_use]
    pub fn committed_count(&self) -> usize {
        self.elements
            .iter()
            .filter(|e| e.state == ElementState::Committed)
            .count()
    }

    #[must_use]
    pub fn discarded_count(&self) -> usize {
        self.elements
            .iter()
            .filter(|e| e.state == ElementState::Discarded)
            .count()
    }
}
