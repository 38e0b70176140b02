// SPDX-License-Identifier: Apache-2.0

//! Per-source key derivation (`spec.md` §4.2, "Per-source").
//!
//! The four well-known template shapes are evaluated by direct field
//! access; anything else needs the full template evaluator, which is
//! out of scope here (`spec.md` §9 Open Questions) and is represented
//! as an opaque callback supplied by the surrounding system.

use std::sync::Arc;

use rlog_message::Msg;

/// How to derive a per-source state-table key from a message.
#[derive(Clone)]
pub enum KeyTemplate {
    /// `%fromhost%`
    FromHost,
    /// `%fromhost-ip%`
    FromHostIp,
    /// `%fromhost%:%fromhost-port%`
    FromHostPort,
    /// `%fromhost-ip%:%fromhost-port%`
    FromHostIpPort,
    /// Any other template shape, evaluated by a caller-supplied
    /// renderer backed by the (out-of-scope) template subsystem.
    Custom(Arc<dyn Fn(&Msg) -> String + Send + Sync>),
}

impl KeyTemplate {
    #[must_use]
    pub fn render(&self, msg: &Msg) -> String {
        match self {
            KeyTemplate::FromHost => msg.hostname().to_string(),
            KeyTemplate::FromHostIp => msg.source_addr().to_string(),
            KeyTemplate::FromHostPort => format!("{}:{}", msg.hostname(), msg.source_port()),
            KeyTemplate::FromHostIpPort => {
                format!("{}:{}", msg.source_addr(), msg.source_port())
            }
            KeyTemplate::Custom(render) => render(msg),
        }
    }
}

impl std::fmt::Debug for KeyTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyTemplate::FromHost => f.write_str("KeyTemplate::FromHost"),
            KeyTemplate::FromHostIp => f.write_str("KeyTemplate::FromHostIp"),
            KeyTemplate::FromHostPort => f.write_str("KeyTemplate::FromHostPort"),
            KeyTemplate::FromHostIpPort => f.write_str("KeyTemplate::FromHostIpPort"),
            KeyTemplate::Custom(_) => f.write_str("KeyTemplate::Custom(..)"),
        }
    }
}

/// Replaces characters that would be awkward in a counter name, used
/// for both per-source top-N counter names and dynstats-style file
/// names.
#[must_use]
pub fn sanitise_key(key: &str) -> String {
    key.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_msg() -> Msg {
        rlog_message::Msg::new(
            b"hi".to_vec(),
            rlog_message::Severity::Notice,
            1,
            0,
            "10.0.0.5",
            "src",
            "host-a",
            "app",
            "1",
            514,
        )
    }

    #[test]
    fn renders_well_known_shapes() {
        let msg = sample_msg();
        assert_eq!(KeyTemplate::FromHost.render(&msg), "host-a");
        assert_eq!(KeyTemplate::FromHostIp.render(&msg), "10.0.0.5");
        assert_eq!(KeyTemplate::FromHostPort.render(&msg), "host-a:514");
        assert_eq!(KeyTemplate::FromHostIpPort.render(&msg), "10.0.0.5:514");
    }

    #[test]
    fn custom_template_delegates_to_callback() {
        let msg = sample_msg();
        let tmpl = KeyTemplate::Custom(Arc::new(|m: &Msg| format!("custom:{}", m.proc_id())));
        assert_eq!(tmpl.render(&msg), "custom:1");
    }

    #[test]
    fn sanitise_key_replaces_non_word_characters() {
        assert_eq!(sanitise_key("10.0.0.5:514"), "10_0_0_5_514");
        assert_eq!(sanitise_key("host-a_1"), "host-a_1");
    }
}
