//! Typed environment-variable lookup used by the config loaders.

use std::str::FromStr;

use crate::error::CoreError;

/// Read `key` from the environment, falling back to `default` when unset.
///
/// A variable that is set but does not parse as `T` is a validation error
/// rather than a silent fallback, so typos in `.env` files are noticed.
pub fn parse_env_or<T>(key: &str, default: T) -> Result<T, CoreError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => parse_value(key, &raw),
        Err(_) => Ok(default),
    }
}

/// Read a string variable with a default.
pub fn string_env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T, CoreError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| CoreError::Validation(format!("{key} has invalid value {raw:?}: {e}")))
}

/// Reject zero for settings that are used as intervals or thresholds.
pub fn require_nonzero(key: &str, value: u64) -> Result<u64, CoreError> {
    if value == 0 {
        return Err(CoreError::Validation(format!("{key} must be greater than zero")));
    }
    Ok(value)
}
