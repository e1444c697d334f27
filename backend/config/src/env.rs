//! `${VAR}` substitution on the string leaves of a raw config tree.
//!
//! Names are uppercase `[A-Z_][A-Z0-9_]*`. `$${VAR}` is written out as a
//! literal `${VAR}` and never looked up.

use std::collections::{BTreeSet, HashMap};

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::Value;

/// Group 1 is the escaping `$`, group 2 the variable name.
static REFERENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$(\$)?\{([A-Z_][A-Z0-9_]*)\}").unwrap());

#[derive(Debug, thiserror::Error)]
#[error("Missing env var \"{var_name}\" referenced at config path: {config_path}")]
pub struct MissingEnvVarError {
    pub var_name: String,
    pub config_path: String,
}

/// Substitute from the process environment. Unset and empty variables are
/// both errors.
pub fn resolve_env_vars(value: &Value) -> Result<Value, MissingEnvVarError> {
    resolve_with(value, &|name| std::env::var(name).ok())
}

/// Substitute from a fixed map.
pub fn resolve_env_vars_with(
    value: &Value,
    env: &HashMap<String, String>,
) -> Result<Value, MissingEnvVarError> {
    resolve_with(value, &|name| env.get(name).cloned())
}

fn resolve_with(
    value: &Value,
    lookup: &dyn Fn(&str) -> Option<String>,
) -> Result<Value, MissingEnvVarError> {
    let mut path = Vec::new();
    walk(value, lookup, &mut path)
}

fn walk(
    value: &Value,
    lookup: &dyn Fn(&str) -> Option<String>,
    path: &mut Vec<String>,
) -> Result<Value, MissingEnvVarError> {
    Ok(match value {
        Value::String(s) => Value::String(substitute(s, lookup, path)?),
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for (i, item) in items.iter().enumerate() {
                path.push(format!("[{i}]"));
                let resolved = walk(item, lookup, path);
                path.pop();
                out.push(resolved?);
            }
            Value::Array(out)
        }
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (key, item) in map {
                path.push(key.clone());
                let resolved = walk(item, lookup, path);
                path.pop();
                out.insert(key.clone(), resolved?);
            }
            Value::Object(out)
        }
        other => other.clone(),
    })
}

fn substitute(
    s: &str,
    lookup: &dyn Fn(&str) -> Option<String>,
    path: &[String],
) -> Result<String, MissingEnvVarError> {
    let mut missing = None;
    let replaced = REFERENCE.replace_all(s, |caps: &Captures| {
        let name = &caps[2];
        if caps.get(1).is_some() {
            return format!("${{{name}}}");
        }
        match lookup(name).filter(|v| !v.is_empty()) {
            Some(v) => v,
            None => {
                missing.get_or_insert_with(|| name.to_string());
                String::new()
            }
        }
    });
    match missing {
        Some(var_name) => Err(MissingEnvVarError {
            var_name,
            config_path: display_path(path),
        }),
        None => Ok(replaced.into_owned()),
    }
}

fn display_path(path: &[String]) -> String {
    let mut out = String::new();
    for segment in path {
        if !out.is_empty() && !segment.starts_with('[') {
            out.push('.');
        }
        out.push_str(segment);
    }
    out
}

/// Sorted, unique names of every unescaped reference, for `check-config`.
pub fn collect_referenced_vars(value: &Value) -> Vec<String> {
    fn visit(value: &Value, out: &mut BTreeSet<String>) {
        match value {
            Value::String(s) => out.extend(
                REFERENCE
                    .captures_iter(s)
                    .filter(|caps| caps.get(1).is_none())
                    .map(|caps| caps[2].to_string()),
            ),
            Value::Array(items) => items.iter().for_each(|v| visit(v, out)),
            Value::Object(map) => map.values().for_each(|v| visit(v, out)),
            _ => {}
        }
    }
    let mut names = BTreeSet::new();
    visit(value, &mut names);
    names.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn substitutes_handler_header() {
        let v = json!({"handlers": {"email_tasks": {"headers": {"authorization": "Bearer ${MAILER_TOKEN}"}}}});
        let env = env(&[("MAILER_TOKEN", "tok-123")]);
        let result = resolve_env_vars_with(&v, &env).unwrap();
        assert_eq!(
            result["handlers"]["email_tasks"]["headers"]["authorization"],
            "Bearer tok-123"
        );
    }

    #[test]
    fn error_on_missing_var_names_path() {
        let v = json!({"storage": {"dbPath": "${CADENCE_DB}"}});
        let err = resolve_env_vars_with(&v, &HashMap::new()).unwrap_err();
        assert_eq!(err.var_name, "CADENCE_DB");
        assert_eq!(err.config_path, "storage.dbPath");
    }

    #[test]
    fn empty_value_counts_as_missing() {
        let v = json!({"handlers": {"x": {"url": "${HOOK_URL}"}}});
        let err = resolve_env_vars_with(&v, &env(&[("HOOK_URL", "")])).unwrap_err();
        assert_eq!(err.config_path, "handlers.x.url");
    }

    #[test]
    fn array_paths_are_indexed() {
        let v = json!({"list": ["ok", "${GONE}"]});
        let err = resolve_env_vars_with(&v, &HashMap::new()).unwrap_err();
        assert_eq!(err.config_path, "list[1]");
    }

    #[test]
    fn escaped_reference_is_kept_literal() {
        let v = json!({"handlers": {"x": {"url": "https://example.com/$${NOT_A_VAR}/${HOST}"}}});
        let result = resolve_env_vars_with(&v, &env(&[("HOST", "h1")])).unwrap();
        assert_eq!(result["handlers"]["x"]["url"], "https://example.com/${NOT_A_VAR}/h1");
    }

    #[test]
    fn passthrough_non_string_leaves() {
        let v = json!({"queue": {"maxAttempts": 3, "jitter": false}, "scheduler": null});
        let result = resolve_env_vars_with(&v, &HashMap::new()).unwrap();
        assert_eq!(result, v);
    }

    #[test]
    fn collects_unescaped_references_only() {
        let v = json!({"a": "${FOO}", "b": {"c": ["${BAR}", "${FOO}", "$${SKIPPED}"]}});
        assert_eq!(collect_referenced_vars(&v), vec!["BAR".to_string(), "FOO".to_string()]);
    }
}
