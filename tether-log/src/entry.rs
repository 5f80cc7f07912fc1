//! Log entries

use chrono::{DateTime, Utc};
use std::fmt;
use tether_error::{Error, KeyValue};

/// Severity of an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
}

impl Level {
    /// Lowercase name, as written in log output
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One structured log record
#[derive(Debug, Clone)]
pub struct Entry {
    pub message: String,
    pub level: Level,
    pub parameters: Vec<KeyValue>,
    pub timestamp: DateTime<Utc>,
}

impl Entry {
    /// Entry stamped with the current time
    pub fn new(level: Level, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            level,
            parameters: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    /// Error-level entry for a structured error
    pub fn from_error(err: &Error) -> Self {
        Self::new(Level::Error, err.to_string()).with_parameters(err.params().iter().cloned())
    }

    /// Append one key/value
    pub fn with_parameter(mut self, key: impl Into<String>, value: impl fmt::Display) -> Self {
        self.parameters.push(KeyValue::new(key, value));
        self
    }

    /// Append key/values in order
    pub fn with_parameters<I>(mut self, kvs: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<KeyValue>,
    {
        self.parameters.extend(kvs.into_iter().map(Into::into));
        self
    }
}
