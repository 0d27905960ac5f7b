// ABOUTME: Environment variable parsing utilities
// ABOUTME: Provides helpers for required, optional, boolean and list-valued variables

use crate::{ConfigError, ConfigResult};

/// Read a variable that must be present and non-blank
pub fn require_env(var_name: &str) -> ConfigResult<String> {
    match std::env::var(var_name) {
        Ok(value) if !value.trim().is_empty() => Ok(value.trim().to_string()),
        _ => Err(ConfigError::MissingVariable(var_name.to_string())),
    }
}

/// Read an optional variable, treating blank values as unset
pub fn optional_env(var_name: &str) -> Option<String> {
    std::env::var(var_name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Interpret common truthy spellings ("1", "true", "yes", "on")
pub fn env_flag(var_name: &str) -> bool {
    match optional_env(var_name) {
        Some(value) => matches!(
            value.to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        None => false,
    }
}

/// Split a comma-separated variable into trimmed, lowercase, non-empty items
pub fn env_list_or_default(var_name: &str, default: &str) -> Vec<String> {
    let raw = optional_env(var_name).unwrap_or_else(|| default.to_string());
    raw.split(',')
        .map(|item| item.trim().to_ascii_lowercase())
        .filter(|item| !item.is_empty())
        .collect()
}
