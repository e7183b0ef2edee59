//! Environment variable parsing with type safety.
//!
//! Values that fail to parse are recorded and the caller's default is kept,
//! so every bad variable can be reported at once.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::cloud::CloudProvider;
use crate::logging::LogFormat;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnvError {
    #[error("Invalid value for {var}: expected {expected}, got '{value}'")]
    InvalidValue {
        var: String,
        expected: String,
        value: String,
    },

    #[error("Invalid duration for {var}: {value} (use forms like 30s, 10m, 1h)")]
    InvalidDuration { var: String, value: String },

    #[error("Value out of range for {var}: {value} (valid: {min}..={max})")]
    OutOfRange {
        var: String,
        value: String,
        min: String,
        max: String,
    },
}

type Lookup = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Type-safe reader for `WQA_*` variables.
pub struct EnvParser {
    prefix: &'static str,
    lookup: Lookup,
    errors: Vec<EnvError>,
}

impl EnvParser {
    /// Parser over the process environment with the `WQA_` prefix.
    pub fn new() -> Self {
        Self {
            prefix: "WQA_",
            lookup: Box::new(|name| std::env::var(name).ok()),
            errors: Vec::new(),
        }
    }

    /// Parser over a fixed set of variables instead of the process
    /// environment.
    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let vars: HashMap<String, String> = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self {
            prefix: "WQA_",
            lookup: Box::new(move |name| vars.get(name).cloned()),
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

    fn var_name(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    /// Raw value; unset and empty are both `None`.
    fn raw(&self, name: &str) -> Option<(String, String)> {
        let var = self.var_name(name);
        (self.lookup)(&var)
            .filter(|v| !v.trim().is_empty())
            .map(|v| (var, v))
    }

    pub fn get_string(&mut self, name: &str) -> Option<String> {
        self.raw(name).map(|(_, v)| v)
    }

    pub fn get_path(&mut self, name: &str) -> Option<PathBuf> {
        self.raw(name).map(|(_, v)| PathBuf::from(v))
    }

    /// Accepts 1/true/yes/on and 0/false/no/off.
    pub fn get_bool(&mut self, name: &str) -> Option<bool> {
        let (var, value) = self.raw(name)?;
        match value.to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" => Some(false),
            _ => {
                self.errors.push(EnvError::InvalidValue {
                    var,
                    expected: "boolean (true/false/1/0/yes/no)".to_string(),
                    value,
                });
                None
            }
        }
    }

    /// `humantime` duration no shorter than `min`.
    pub fn get_duration(&mut self, name: &str, min: Duration) -> Option<Duration> {
        let (var, value) = self.raw(name)?;
        match humantime::parse_duration(value.trim()) {
            Ok(d) if d >= min => Some(d),
            Ok(d) => {
                self.errors.push(EnvError::OutOfRange {
                    var,
                    value: humantime::format_duration(d).to_string(),
                    min: humantime::format_duration(min).to_string(),
                    max: "unbounded".to_string(),
                });
                None
            }
            Err(_) => {
                self.errors.push(EnvError::InvalidDuration { var, value });
                None
            }
        }
    }

    pub fn get_provider(&mut self, name: &str) -> Option<CloudProvider> {
        let (var, value) = self.raw(name)?;
        match value.parse() {
            Ok(provider) => Some(provider),
            Err(_) => {
                self.errors.push(EnvError::InvalidValue {
                    var,
                    expected: "cloud provider (azure)".to_string(),
                    value,
                });
                None
            }
        }
    }

    pub fn get_log_format(&mut self, name: &str) -> Option<LogFormat> {
        let (var, value) = self.raw(name)?;
        match value.parse() {
            Ok(format) => Some(format),
            Err(_) => {
                self.errors.push(EnvError::InvalidValue {
                    var,
                    expected: "log format (pretty, json)".to_string(),
                    value,
                });
                None
            }
        }
    }
}

impl Default for EnvParser {
    fn default() -> Self {
        Self::new()
    }
}
