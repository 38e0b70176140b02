// SPDX-License-Identifier: Apache-2.0

//! The message record that flows through the router core, plus the
//! syslog severity scale used to classify it.
//!
//! A [`Msg`] is produced once by an input driver and is immutable
//! after parsing except for its processing flags; it is shared by
//! reference count (`Arc`) once handed to more than one action queue.

use std::sync::Arc;
use std::time::SystemTime;

/// Syslog severity, 0 (most severe) to 7 (least severe), RFC 5424 §6.2.1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Severity {
    Emergency = 0,
    Alert = 1,
    Critical = 2,
    Error = 3,
    Warning = 4,
    Notice = 5,
    Informational = 6,
    Debug = 7,
}

impl Severity {
    /// Builds a `Severity` from its numeric code, clamping out-of-range
    /// values to `Debug` (the least severe, matching the original
    /// engine's fail-open behaviour for malformed priority values).
    #[must_use]
    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => Severity::Emergency,
            1 => Severity::Alert,
            2 => Severity::Critical,
            3 => Severity::Error,
            4 => Severity::Warning,
            5 => Severity::Notice,
            6 => Severity::Informational,
            _ => Severity::Debug,
        }
    }

    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}

bitflags::bitflags! {
    /// Small processing-state flags carried alongside a message.
    ///
    /// Modelled after the original engine's `msgFlags` bitfield; only the
    /// bits this core actually inspects are named.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct MsgFlags: u8 {
        /// Set on messages an input driver has not yet run through the
        /// parser chain. `ratelimit::msg` may have to parse on demand
        /// when this bit is set and a severity-gated check is active.
        const NEEDS_PARSING = 0b0000_0001;
        /// Set once a rate-limit instance has classified this message,
        /// to guard against double-counting on retry paths.
        const RATE_CLASSIFIED = 0b0000_0010;
    }
}

/// The unit of work flowing through the router core.
///
/// Essential attributes only — everything parser- or driver-specific
/// (structured data beyond what repeat-compression and per-source
/// keying need) is out of scope per `spec.md` §1.
#[derive(Debug, Clone)]
pub struct Msg {
    inner: Arc<MsgInner>,
}

#[derive(Debug)]
struct MsgInner {
    body: Vec<u8>,
    severity: Severity,
    facility: u8,
    received_at: SystemTime,
    /// Seconds since the Unix epoch at which the message was generated,
    /// i.e. the time source the rate-limit engine uses unless
    /// `no_time_cache` forces a fresh `SystemTime::now()` read.
    generated_epoch_secs: u64,
    source_addr: String,
    source_id: String,
    hostname: String,
    app_name: String,
    proc_id: String,
    source_port: u16,
}

impl Msg {
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        body: impl Into<Vec<u8>>,
        severity: Severity,
        facility: u8,
        generated_epoch_secs: u64,
        source_addr: impl Into<String>,
        source_id: impl Into<String>,
        hostname: impl Into<String>,
        app_name: impl Into<String>,
        proc_id: impl Into<String>,
        source_port: u16,
    ) -> Self {
        Msg {
            inner: Arc::new(MsgInner {
                body: body.into(),
                severity,
                facility,
                received_at: SystemTime::now(),
                generated_epoch_secs,
                source_addr: source_addr.into(),
                source_id: source_id.into(),
                hostname: hostname.into(),
                app_name: app_name.into(),
                proc_id: proc_id.into(),
                source_port,
            }),
        }
    }

    #[must_use]
    pub fn body(&self) -> &[u8] {
        &self.inner.body
    }

    #[must_use]
    pub fn severity(&self) -> Severity {
        self.inner.severity
    }

    #[must_use]
    pub fn facility(&self) -> u8 {
        self.inner.facility
    }

    #[must_use]
    pub fn received_at(&self) -> SystemTime {
        self.inner.received_at
    }

    #[must_use]
    pub fn generated_epoch_secs(&self) -> u64 {
        self.inner.generated_epoch_secs
    }

    #[must_use]
    pub fn source_addr(&self) -> &str {
        &self.inner.source_addr
    }

    #[must_use]
    pub fn source_id(&self) -> &str {
        &self.inner.source_id
    }

    #[must_use]
    pub fn hostname(&self) -> &str {
        &self.inner.hostname
    }

    #[must_use]
    pub fn app_name(&self) -> &str {
        &self.inner.app_name
    }

    #[must_use]
    pub fn proc_id(&self) -> &str {
        &self.inner.proc_id
    }

    /// Originating UDP/TCP source port, used by the `%fromhost%:%fromhost-port%`
    /// and `%fromhost-ip%:%fromhost-port%` per-source key templates.
    #[must_use]
    pub fn source_port(&self) -> u16 {
        self.inner.source_port
    }

    /// Number of live references to this message, i.e. how many holders
    /// (action queues, the ratelimit instance's `pending_msg` slot)
    /// would need to release it before it is destructed.
    #[must_use]
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// Two messages are repeats of one another under `spec.md` §4.2's
    /// repeat-compression rule: body, hostname, proc id and app name are
    /// byte-equal.
    #[must_use]
    pub fn is_repeat_of(&self, other: &Msg) -> bool {
        self.inner.body == other.inner.body
            && self.inner.hostname == other.inner.hostname
            && self.inner.proc_id == other.inner.proc_id
            && self.inner.app_name == other.inner.app_name
    }

    /// Builds the `" message repeated N times: [<body, up to 800 bytes>]"`
    /// summary message described in `spec.md` §4.2, preserving this
    /// message's identity fields.
    #[must_use]
    pub fn with_repeated_body(&self, nsupp: u32) -> Msg {
        let truncated: Vec<u8> = self.inner.body.iter().take(800).copied().collect();
        let mut body = format!(" message repeated {nsupp} times: [").into_bytes();
        body.extend_from_slice(&truncated);
        body.push(b']');
        Msg {
            inner: Arc::new(MsgInner {
                body,
                severity: self.inner.severity,
                facility: self.inner.facility,
                received_at: self.inner.received_at,
                generated_epoch_secs: self.inner.generated_epoch_secs,
                source_addr: self.inner.source_addr.clone(),
                source_id: self.inner.source_id.clone(),
                hostname: self.inner.hostname.clone(),
                app_name: self.inner.app_name.clone(),
                proc_id: self.inner.proc_id.clone(),
                source_port: self.inner.source_port,
            }),
        }
    }
}

/// A batch of messages submitted to a ruleset in one call, used to
/// amortise locking across filter evaluation (`spec.md` glossary,
/// "Multi-submit").
#[derive(Debug, Default)]
pub struct MultiSubmit {
    pending: Vec<Msg>,
}

impl MultiSubmit {
    #[must_use]
    pub fn new() -> Self {
        MultiSubmit::default()
    }

    pub fn push(&mut self, msg: Msg) {
        self.pending.push(msg);
    }

    #[must_use]
    pub fn drain(&mut self) -> Vec<Msg> {
        std::mem::take(&mut self.pending)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(body: &str) -> Msg {
        Msg::new(
            body.as_bytes().to_vec(),
            Severity::Notice,
            1,
            0,
            "127.0.0.1",
            "src1",
            "host-a",
            "app-a",
            "123",
            514,
        )
    }

    #[test]
    fn severity_from_u8_clamps_out_of_range() {
        assert_eq!(Severity::from_u8(0), Severity::Emergency);
        assert_eq!(Severity::from_u8(7), Severity::Debug);
        assert_eq!(Severity::from_u8(200), Severity::Debug);
    }

    #[test]
    fn repeat_detection_matches_identity_fields() {
        let a = sample("hello");
        let b = sample("hello");
        assert!(a.is_repeat_of(&b));

        let c = Msg::new(
            b"hello".to_vec(),
            Severity::Notice,
            1,
            0,
            "127.0.0.1",
            "src1",
            "host-b",
            "app-a",
            "123",
            514,
        );
        assert!(!a.is_repeat_of(&c));
    }

    #[test]
    fn repeated_body_truncates_at_800_bytes() {
        let long = sample(&"x".repeat(2000));
        let rep = long.with_repeated_body(5);
        // " message repeated 5 times: [" + 800 x's + "]"
        assert!(rep.body().len() < 2000);
        assert!(rep.body().starts_with(b" message repeated 5 times: ["));
    }

    #[test]
    fn multi_submit_drains_in_order() {
        let mut ms = MultiSubmit::new();
        ms.push(sample("a"));
        ms.push(sample("b"));
        assert_eq!(ms.len(), 2);
        let drained = ms.drain();
        assert_eq!(drained[0].body(), b"a");
        assert_eq!(drained[1].body(), b"b");
        assert!(ms.is_empty());
    }
}
