use std::collections::HashMap;

use toml::Value;
use tracing::{debug, warn};

use crate::merge::{get_path, set_path};

/// Prefix of environment variables read by [`collect_env_vars`].
pub const ENV_PREFIX: &str = "DROPZONE_";

#[derive(Clone, Copy)]
enum Kind {
    Str,
    Bool,
    Int,
}

/// Environment variable → config field mapping.
const ENV_FALLBACKS: &[(&str, &str, Kind)] = &[
    ("DROPZONE_INSTALL_ROOT", "deploy.install_root", Kind::Str),
    ("DROPZONE_HOT_DEPLOY", "deploy.hot_deploy", Kind::Bool),
    ("DROPZONE_DEBOUNCE_MS", "deploy.debounce_ms", Kind::Int),
    ("DROPZONE_LOG_LEVEL", "logging.level", Kind::Str),
];

/// Snapshot the `DROPZONE_*` variables of the current process.
#[must_use]
pub fn collect_env_vars() -> HashMap<String, String> {
    std::env::vars()
        .filter(|(k, _)| k.starts_with(ENV_PREFIX))
        .collect()
}

/// Apply environment fallbacks to fields that no config file has changed.
///
/// A field counts as unset when its merged value still equals the embedded
/// default. Returns the number of fields taken from the environment.
pub fn apply_env_fallbacks(
    merged: &mut Value,
    defaults: &Value,
    env_vars: &HashMap<String, String>,
) -> usize {
    let mut applied = 0usize;

    for &(var, path, kind) in ENV_FALLBACKS {
        let Some(raw) = env_vars.get(var) else {
            continue;
        };
        if get_path(merged, path) != get_path(defaults, path) {
            debug!(var, field = path, "config file value takes precedence over env var");
            continue;
        }

        let value = match kind {
            Kind::Str => Some(Value::String(raw.clone())),
            Kind::Bool => parse_bool(raw).map(Value::Boolean),
            Kind::Int => raw.trim().parse::<i64>().ok().map(Value::Integer),
        };
        match value {
            Some(value) => {
                set_path(merged, path, value);
                applied = applied.saturating_add(1);
            },
            None => warn!(var, value = %raw, "ignoring malformed environment variable"),
        }
    }

    applied
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> Value {
        toml::from_str("[deploy]\ninstall_root = \"deploy\"\nhot_deploy = true\ndebounce_ms = 1000\n[logging]\nlevel = \"info\"\n").unwrap()
    }

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    #[test]
    fn test_env_fills_unset_fields() {
        let defaults = defaults();
        let mut merged = defaults.clone();
        let applied = apply_env_fallbacks(
            &mut merged,
            &defaults,
            &env(&[
                ("DROPZONE_INSTALL_ROOT", "/srv/deploy"),
                ("DROPZONE_HOT_DEPLOY", "off"),
                ("DROPZONE_DEBOUNCE_MS", "250"),
            ]),
        );

        assert_eq!(applied, 3);
        assert_eq!(
            get_path(&merged, "deploy.install_root").and_then(Value::as_str),
            Some("/srv/deploy")
        );
        assert_eq!(
            get_path(&merged, "deploy.hot_deploy"),
            Some(&Value::Boolean(false))
        );
        assert_eq!(
            get_path(&merged, "deploy.debounce_ms"),
            Some(&Value::Integer(250))
        );
    }

    #[test]
    fn test_file_value_wins_over_env() {
        let defaults = defaults();
        let mut merged = defaults.clone();
        set_path(&mut merged, "logging.level", Value::String("warn".into()));

        let applied = apply_env_fallbacks(
            &mut merged,
            &defaults,
            &env(&[("DROPZONE_LOG_LEVEL", "trace")]),
        );

        assert_eq!(applied, 0);
        assert_eq!(
            get_path(&merged, "logging.level").and_then(Value::as_str),
            Some("warn")
        );
    }

    #[test]
    fn test_malformed_env_ignored() {
        let defaults = defaults();
        let mut merged = defaults.clone();
        let applied = apply_env_fallbacks(
            &mut merged,
            &defaults,
            &env(&[("DROPZONE_HOT_DEPLOY", "maybe")]),
        );
        assert_eq!(applied, 0);
        assert_eq!(
            get_path(&merged, "deploy.hot_deploy"),
            Some(&Value::Boolean(true))
        );
    }
}
