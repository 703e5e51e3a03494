//! Environment variable substitution for configuration content.
//!
//! Supports `${VAR}` and `${VAR:-default}` patterns. Variables without a
//! default that are not set in the environment are a configuration error.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::env;
use switchboard_core::{Result, SwitchboardError};

static ENV_VAR_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}").expect("invalid regex pattern")
});

/// Substitute environment variables in a single string.
pub fn substitute_in_string(input: &str) -> Result<String> {
    let mut result = input.to_string();
    let mut missing = Vec::new();

    for cap in ENV_VAR_REGEX.captures_iter(input) {
        let full_match = &cap[0];
        let var_name = &cap[1];
        let default_value = cap.get(2).map(|m| m.as_str());

        match env::var(var_name) {
            Ok(value) => {
                result = result.replace(full_match, &value);
            }
            Err(_) => match default_value {
                Some(default) => {
                    result = result.replace(full_match, default);
                }
                None => missing.push(var_name.to_string()),
            },
        }
    }

    if !missing.is_empty() {
        missing.sort();
        missing.dedup();
        return Err(SwitchboardError::Config(format!(
            "missing required environment variables: {}",
            missing.join(", ")
        )));
    }

    Ok(result)
}

/// Recursively substitute environment variables in every string of a JSON
/// value.
pub fn substitute_env_vars(value: &mut Value) -> Result<()> {
    match value {
        Value::String(s) => {
            *s = substitute_in_string(s)?;
        }
        Value::Object(map) => {
            for (_, v) in map.iter_mut() {
                substitute_env_vars(v)?;
            }
        }
        Value::Array(arr) => {
            for v in arr.iter_mut() {
                substitute_env_vars(v)?;
            }
        }
        _ => {}
    }
    Ok(())
}
