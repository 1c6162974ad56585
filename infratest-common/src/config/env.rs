//! Environment variable parsing with type safety.
//!
//! Collects every malformed variable instead of stopping at the first, so a
//! misconfigured CI job reports all of its mistakes at once. Unset and empty
//! variables both fall back to the default.

use std::env;
use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error", "off"];

/// A malformed `INFRATEST_*` variable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvError {
    #[error("Invalid value for {var}: expected {expected}, got '{value}'")]
    InvalidValue {
        var: String,
        expected: &'static str,
        value: String,
    },

    #[error("Value out of range for {var}: {value} (valid: {min}..={max})")]
    OutOfRange {
        var: String,
        value: u64,
        min: u64,
        max: u64,
    },

    #[error("Invalid log level for {var}: {value}")]
    InvalidLogLevel { var: String, value: String },
}

/// Reads prefixed variables, falling back to defaults and recording every
/// malformed value.
pub struct EnvParser {
    prefix: &'static str,
    errors: Vec<EnvError>,
}

impl EnvParser {
    /// Parser for `INFRATEST_*` variables.
    pub fn new() -> Self {
        Self::with_prefix("INFRATEST_")
    }

    pub fn with_prefix(prefix: &'static str) -> Self {
        Self {
            prefix,
            errors: Vec::new(),
        }
    }

    pub fn errors(&self) -> &[EnvError] {
        &self.errors
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn take_errors(&mut self) -> Vec<EnvError> {
        std::mem::take(&mut self.errors)
    }

    /// Full variable name and its value, if set to something non-blank.
    fn lookup(&self, name: &str) -> Option<(String, String)> {
        let var = format!("{}{name}", self.prefix);
        match env::var(&var) {
            Ok(value) if !value.trim().is_empty() => Some((var, value)),
            _ => None,
        }
    }

    fn reject<T>(&mut self, error: EnvError, fallback: T) -> T {
        self.errors.push(error);
        fallback
    }

    pub fn get_string(&self, name: &str, default: &str) -> String {
        self.lookup(name)
            .map_or_else(|| default.to_string(), |(_, value)| value)
    }

    pub fn get_optional_string(&self, name: &str) -> Option<String> {
        self.lookup(name).map(|(_, value)| value)
    }

    /// Relative paths stay relative to the test process's working directory.
    pub fn get_path(&self, name: &str, default: PathBuf) -> PathBuf {
        self.lookup(name)
            .map_or(default, |(_, value)| PathBuf::from(value))
    }

    /// Accepts 1/true/yes/on and 0/false/no/off, case-insensitively.
    pub fn get_bool(&mut self, name: &str, default: bool) -> bool {
        let Some((var, value)) = self.lookup(name) else {
            return default;
        };
        match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => self.reject(
                EnvError::InvalidValue {
                    var,
                    expected: "boolean (true/false/1/0/yes/no)",
                    value,
                },
                default,
            ),
        }
    }

    pub fn get_u64_in(&mut self, name: &str, default: u64, range: RangeInclusive<u64>) -> u64 {
        let Some((var, value)) = self.lookup(name) else {
            return default;
        };
        match value.trim().parse::<u64>() {
            Ok(n) if range.contains(&n) => n,
            Ok(n) => self.reject(
                EnvError::OutOfRange {
                    var,
                    value: n,
                    min: *range.start(),
                    max: *range.end(),
                },
                default,
            ),
            Err(_) => self.reject(
                EnvError::InvalidValue {
                    var,
                    expected: "unsigned integer",
                    value,
                },
                default,
            ),
        }
    }

    /// Whole seconds within `range`.
    pub fn get_secs_in(
        &mut self,
        name: &str,
        default: Duration,
        range: RangeInclusive<u64>,
    ) -> Duration {
        Duration::from_secs(self.get_u64_in(name, default.as_secs(), range))
    }

    /// One of trace/debug/info/warn/error/off, lowercased.
    pub fn get_log_level(&mut self, name: &str, default: &str) -> String {
        let Some((var, value)) = self.lookup(name) else {
            return default.to_string();
        };
        let level = value.trim().to_ascii_lowercase();
        if LOG_LEVELS.contains(&level.as_str()) {
            level
        } else {
            self.reject(EnvError::InvalidLogLevel { var, value }, default.to_string())
        }
    }
}

impl Default for EnvParser {
    fn default() -> Self {
        Self::new()
    }
}
