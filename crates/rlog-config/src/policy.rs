// SPDX-License-Identifier: Apache-2.0

//! Parsing for the two on-disk policy file formats consumed by the
//! rate-limit engine (`spec.md` §6): the global policy file
//! (`interval`/`burst`/`severity`) and the per-source policy file
//! (`default` + `overrides`).

use std::collections::BTreeMap;
use std::path::Path;

use schemars::JsonSchema;
use serde::Deserialize;

use crate::error::{EngineError, Result};

/// A YAML document is rejected past this nesting depth, independent of
/// the `overrides` count bound below. Guards against pathological or
/// hostile policy files before `serde_yaml` ever builds a typed value.
const MAX_YAML_DEPTH: usize = 8;

/// `overrides` lists longer than this are rejected outright rather
/// than silently truncated.
const MAX_OVERRIDES: usize = 10_000;

fn yaml_depth(value: &serde_yaml::Value) -> usize {
    match value {
        serde_yaml::Value::Mapping(map) => {
            1 + map.values().map(yaml_depth).max().unwrap_or(0)
        }
        serde_yaml::Value::Sequence(seq) => {
            1 + seq.iter().map(yaml_depth).max().unwrap_or(0)
        }
        _ => 0,
    }
}

fn parse_yaml_bounded<T: for<'de> Deserialize<'de>>(path: &Path, text: &str) -> Result<T> {
    let raw: serde_yaml::Value =
        serde_yaml::from_str(text).map_err(|source| EngineError::YamlParse {
            path: path.to_path_buf(),
            source,
        })?;
    if yaml_depth(&raw) > MAX_YAML_DEPTH {
        return Err(EngineError::ConfParamInvalid(format!(
            "{}: nesting exceeds {MAX_YAML_DEPTH} levels",
            path.display()
        )));
    }
    serde_yaml::from_value(raw).map_err(|source| EngineError::YamlParse {
        path: path.to_path_buf(),
        source,
    })
}

/// Global rate-limit policy file: `interval`, `burst`, `severity`.
/// Unknown keys are ignored (with a caller-side warning), matching the
/// original's tolerant reload behaviour.
#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct RateLimitPolicyFile {
    pub interval: Option<u64>,
    pub burst: Option<u32>,
    pub severity: Option<u8>,
}

impl RateLimitPolicyFile {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(EngineError::FileNotFound(path.to_path_buf()));
        }
        let text = std::fs::read_to_string(path).map_err(|source| EngineError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let file: Self = parse_yaml_bounded(path, &text)?;
        if let Some(sev) = file.severity {
            if sev > 7 {
                tracing::warn!(path = %path.display(), severity = sev, "rejecting out-of-range severity");
                return Err(EngineError::ConfParamInvalid(format!(
                    "severity {sev} out of range 0..=7"
                )));
            }
        }
        tracing::debug!(path = %path.display(), "loaded global rate-limit policy");
        Ok(file)
    }
}

/// Duration expressed either as a bare integer (seconds) or a string
/// with an explicit `s` suffix, matching the `<uint>[s]` grammar in
/// `spec.md` §6.
fn deserialize_seconds<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum SecondsForm {
        Number(u64),
        Text(String),
    }
    match SecondsForm::deserialize(deserializer)? {
        SecondsForm::Number(n) => Ok(n),
        SecondsForm::Text(s) => {
            let trimmed = s.strip_suffix('s').unwrap_or(&s);
            trimmed
                .parse::<u64>()
                .map_err(|_| serde::de::Error::custom(format!("invalid duration: {s:?}")))
        }
    }
}

fn deserialize_seconds_opt<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<u64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum SecondsForm {
        Number(u64),
        Text(String),
    }
    match Option::<SecondsForm>::deserialize(deserializer)? {
        None => Ok(None),
        Some(SecondsForm::Number(n)) => Ok(Some(n)),
        Some(SecondsForm::Text(s)) => {
            let trimmed = s.strip_suffix('s').unwrap_or(&s);
            trimmed
                .parse::<u64>()
                .map(Some)
                .map_err(|_| serde::de::Error::custom(format!("invalid duration: {s:?}")))
        }
    }
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct PerSourceDefault {
    pub max: u32,
    #[schemars(with = "String")]
    #[serde(deserialize_with = "deserialize_seconds")]
    pub window: u64,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct PerSourceOverrideEntry {
    pub key: String,
    pub max: Option<u32>,
    #[schemars(with = "Option<String>")]
    #[serde(default, deserialize_with = "deserialize_seconds_opt")]
    pub window: Option<u64>,
}

/// Per-source rate-limit policy file: required `default`, optional
/// bounded `overrides` list.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct PerSourcePolicyFileRaw {
    pub default: PerSourceDefault,
    #[serde(default)]
    pub overrides: Vec<PerSourceOverrideEntry>,
}

/// Validated, flattened form used by the rate-limit engine: defaults
/// plus an override map keyed by source key.
#[derive(Debug, Clone)]
pub struct PerSourcePolicyFile {
    pub default_max: u32,
    pub default_window_seconds: u64,
    pub overrides: BTreeMap<String, PerSourceOverride>,
}

#[derive(Debug, Clone, Copy)]
pub struct PerSourceOverride {
    pub max: Option<u32>,
    pub window_seconds: Option<u64>,
}

impl PerSourcePolicyFile {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(EngineError::FileNotFound(path.to_path_buf()));
        }
        let text = std::fs::read_to_string(path).map_err(|source| EngineError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let raw: PerSourcePolicyFileRaw = parse_yaml_bounded(path, &text)?;

        if raw.overrides.len() > MAX_OVERRIDES {
            tracing::warn!(
                path = %path.display(),
                count = raw.overrides.len(),
                bound = MAX_OVERRIDES,
                "rejecting per-source policy file with too many overrides"
            );
            return Err(EngineError::ConfParamInvalid(format!(
                "{}: {} overrides exceeds bound of {MAX_OVERRIDES}",
                path.display(),
                raw.overrides.len()
            )));
        }

        let mut overrides = BTreeMap::new();
        for entry in raw.overrides {
            let _ = overrides.insert(
                entry.key,
                PerSourceOverride {
                    max: entry.max,
                    window_seconds: entry.window,
                },
            );
        }

        tracing::debug!(path = %path.display(), overrides = overrides.len(), "loaded per-source rate-limit policy");
        Ok(PerSourcePolicyFile {
            default_max: raw.default.max,
            default_window_seconds: raw.default.window,
            overrides,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(contents: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().expect("create temp file");
        f.write_all(contents.as_bytes()).expect("write temp file");
        f
    }

    #[test]
    fn global_policy_parses_minimal_form() {
        let f = write_temp("interval: 10\nburst: 3\nseverity: 7\n");
        let parsed = RateLimitPolicyFile::load(f.path()).expect("parses");
        assert_eq!(parsed.interval, Some(10));
        assert_eq!(parsed.burst, Some(3));
        assert_eq!(parsed.severity, Some(7));
    }

    #[test]
    fn global_policy_rejects_bad_severity() {
        let f = write_temp("severity: 9\n");
        let err = RateLimitPolicyFile::load(f.path()).unwrap_err();
        assert!(matches!(err, EngineError::ConfParamInvalid(_)));
    }

    #[test]
    fn global_policy_ignores_unknown_keys() {
        let f = write_temp("interval: 5\nunknown_field: true\n");
        let parsed = RateLimitPolicyFile::load(f.path()).expect("parses");
        assert_eq!(parsed.interval, Some(5));
    }

    #[test]
    fn missing_file_reports_file_not_found() {
        let err = RateLimitPolicyFile::load(Path::new("/no/such/path.yaml")).unwrap_err();
        assert!(matches!(err, EngineError::FileNotFound(_)));
    }

    #[test]
    fn per_source_policy_parses_with_overrides() {
        let f = write_temp(
            "default:\n  max: 2\n  window: 60s\noverrides:\n  - key: \"10.0.0.1\"\n    max: 5\n    window: 120s\n",
        );
        let parsed = PerSourcePolicyFile::load(f.path()).expect("parses");
        assert_eq!(parsed.default_max, 2);
        assert_eq!(parsed.default_window_seconds, 60);
        let ov = parsed.overrides.get("10.0.0.1").expect("override present");
        assert_eq!(ov.max, Some(5));
        assert_eq!(ov.window_seconds, Some(120));
    }

    #[test]
    fn per_source_policy_accepts_bare_integer_window() {
        let f = write_temp("default:\n  max: 2\n  window: 60\n");
        let parsed = PerSourcePolicyFile::load(f.path()).expect("parses");
        assert_eq!(parsed.default_window_seconds, 60);
    }

    #[test]
    fn per_source_policy_rejects_missing_default_window() {
        let f = write_temp("default:\n  max: 2\n");
        let err = PerSourcePolicyFile::load(f.path()).unwrap_err();
        assert!(matches!(err, EngineError::YamlParse { .. }));
    }

    #[test]
    fn per_source_policy_rejects_too_many_overrides() {
        let mut doc = String::from("default:\n  max: 1\n  window: 1\noverrides:\n");
        for i in 0..10_001 {
            doc.push_str(&format!("  - key: \"k{i}\"\n    max: 1\n"));
        }
        let f = write_temp(&doc);
        let err = PerSourcePolicyFile::load(f.path()).unwrap_err();
        assert!(matches!(err, EngineError::ConfParamInvalid(_)));
    }

    #[test]
    fn yaml_depth_rejects_excessive_nesting() {
        let mut doc = String::from("default:\n  max: 1\n  window: 1\nextra: ");
        for _ in 0..MAX_YAML_DEPTH + 2 {
            doc.push_str("{a: ");
        }
        doc.push('1');
        for _ in 0..MAX_YAML_DEPTH + 2 {
            doc.push('}');
        }
        let f = write_temp(&doc);
        let err = PerSourcePolicyFile::load(f.path()).unwrap_err();
        assert!(matches!(err, EngineError::ConfParamInvalid(_)));
    }
}
