// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Structured log events as they arrive from the logging pipeline.
//!
//! An event carries a severity, a message template with `{Property}` holes, an ordered
//! property bag and an optional error text. Property values render the way structured
//! logging scalars do (strings quoted, embedded quotes escaped), which is what the label
//! router later cleans up before sending values to Loki.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Severity of a log event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogLevel {
    Verbose,
    Debug,
    Information,
    Warning,
    Error,
    Fatal,
}

impl LogLevel {
    /// Value of the synthetic `level` property sent to Loki.
    #[must_use]
    pub fn as_label(self) -> &'static str {
        match self {
            LogLevel::Verbose => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Information => "info",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
            LogLevel::Fatal => "critical",
        }
    }

    /// Short upper-case name used by the `{Level}` output template token.
    #[must_use]
    pub fn short_name(self) -> &'static str {
        match self {
            LogLevel::Verbose => "VRB",
            LogLevel::Debug => "DBG",
            LogLevel::Information => "INF",
            LogLevel::Warning => "WRN",
            LogLevel::Error => "ERR",
            LogLevel::Fatal => "FTL",
        }
    }
}

impl From<tracing::Level> for LogLevel {
    fn from(level: tracing::Level) -> Self {
        match level {
            tracing::Level::TRACE => LogLevel::Verbose,
            tracing::Level::DEBUG => LogLevel::Debug,
            tracing::Level::INFO => LogLevel::Information,
            tracing::Level::WARN => LogLevel::Warning,
            tracing::Level::ERROR => LogLevel::Error,
        }
    }
}

/// Value of an event property.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Null,
    Bool(bool),
    I64(i64),
    U64(u64),
    F64(f64),
    Str(String),
    Seq(Vec<PropertyValue>),
    Map(Vec<(String, PropertyValue)>),
}

impl PropertyValue {
    /// Renders strings without surrounding quotes, everything else like [`fmt::Display`].
    #[must_use]
    pub fn to_literal_string(&self) -> String {
        match self {
            PropertyValue::Str(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Null => write!(f, "null"),
            PropertyValue::Bool(b) => write!(f, "{b}"),
            PropertyValue::I64(n) => write!(f, "{n}"),
            PropertyValue::U64(n) => write!(f, "{n}"),
            PropertyValue::F64(n) => write!(f, "{n}"),
            // Only quotes are escaped, newlines stay literal
            PropertyValue::Str(s) => write!(f, "\"{}\"", s.replace('"', "\\\"")),
            PropertyValue::Seq(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            PropertyValue::Map(entries) => {
                write!(f, "{{")?;
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, " {key}: {value}")?;
                }
                write!(f, " }}")
            }
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::Str(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        PropertyValue::Str(value)
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        PropertyValue::Bool(value)
    }
}

impl From<i32> for PropertyValue {
    fn from(value: i32) -> Self {
        PropertyValue::I64(i64::from(value))
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        PropertyValue::I64(value)
    }
}

impl From<u16> for PropertyValue {
    fn from(value: u16) -> Self {
        PropertyValue::U64(u64::from(value))
    }
}

impl From<u64> for PropertyValue {
    fn from(value: u64) -> Self {
        PropertyValue::U64(value)
    }
}

impl From<f64> for PropertyValue {
    fn from(value: f64) -> Self {
        PropertyValue::F64(value)
    }
}

impl<T: Into<PropertyValue>> From<Option<T>> for PropertyValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(PropertyValue::Null, Into::into)
    }
}

impl<T: Into<PropertyValue>> From<Vec<T>> for PropertyValue {
    fn from(values: Vec<T>) -> Self {
        PropertyValue::Seq(values.into_iter().map(Into::into).collect())
    }
}

/// A single structured log event.
#[derive(Debug, Clone)]
pub struct LogEvent {
    pub timestamp: SystemTime,
    pub level: LogLevel,
    pub message_template: String,
    properties: Vec<(String, PropertyValue)>,
    pub exception: Option<String>,
}

impl LogEvent {
    #[must_use]
    pub fn new(level: LogLevel, message_template: impl Into<String>) -> Self {
        LogEvent {
            timestamp: SystemTime::now(),
            level,
            message_template: message_template.into(),
            properties: Vec::new(),
            exception: None,
        }
    }

    #[must_use]
    pub fn with_timestamp(mut self, timestamp: SystemTime) -> Self {
        self.timestamp = timestamp;
        self
    }

    #[must_use]
    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.add_or_update_property(name, value);
        self
    }

    #[must_use]
    pub fn with_exception(mut self, exception: impl Into<String>) -> Self {
        self.exception = Some(exception.into());
        self
    }

    /// Sets a property, replacing the value in place when the name is already present so
    /// the original insertion order is kept.
    pub fn add_or_update_property(&mut self, name: impl Into<String>, value: impl Into<PropertyValue>) {
        let name = name.into();
        let value = value.into();
        match self.properties.iter_mut().find(|(existing, _)| *existing == name) {
            Some((_, slot)) => *slot = value,
            None => self.properties.push((name, value)),
        }
    }

    #[must_use]
    pub fn property(&self, name: &str) -> Option<&PropertyValue> {
        self.properties
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, value)| value)
    }

    /// Properties in insertion order.
    pub fn properties(&self) -> impl Iterator<Item = (&str, &PropertyValue)> {
        self.properties
            .iter()
            .map(|(name, value)| (name.as_str(), value))
    }

    /// Milliseconds since the Unix epoch, negative for timestamps before it.
    #[must_use]
    pub fn unix_millis(&self) -> i128 {
        unix_millis(self.timestamp)
    }
}

fn unix_millis(timestamp: SystemTime) -> i128 {
    match timestamp.duration_since(UNIX_EPOCH) {
        Ok(elapsed) => elapsed.as_millis() as i128,
        Err(before) => -(before.duration().as_millis() as i128),
    }
}

/// Formats a timestamp as Loki expects it: nanoseconds since the Unix epoch, as a decimal
/// string. Precision is limited to milliseconds.
#[must_use]
pub fn unix_nanos_string(timestamp: SystemTime) -> String {
    (unix_millis(timestamp) * 1_000_000).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_level_labels() {
        assert_eq!(LogLevel::Verbose.as_label(), "trace");
        assert_eq!(LogLevel::Debug.as_label(), "debug");
        assert_eq!(LogLevel::Information.as_label(), "info");
        assert_eq!(LogLevel::Warning.as_label(), "warning");
        assert_eq!(LogLevel::Error.as_label(), "error");
        assert_eq!(LogLevel::Fatal.as_label(), "critical");
    }

    #[test]
    fn test_level_from_tracing() {
        assert_eq!(LogLevel::from(tracing::Level::TRACE), LogLevel::Verbose);
        assert_eq!(LogLevel::from(tracing::Level::INFO), LogLevel::Information);
        assert_eq!(LogLevel::from(tracing::Level::WARN), LogLevel::Warning);
    }

    #[test]
    fn test_string_values_are_quoted() {
        assert_eq!(PropertyValue::from("GET").to_string(), "\"GET\"");
        assert_eq!(
            PropertyValue::from("say \"hi\"").to_string(),
            "\"say \\\"hi\\\"\""
        );
        assert_eq!(PropertyValue::from("a\r\nb").to_string(), "\"a\r\nb\"");
        assert_eq!(PropertyValue::from("GET").to_literal_string(), "GET");
    }

    #[test]
    fn test_scalar_and_composite_rendering() {
        assert_eq!(PropertyValue::from(200_i32).to_string(), "200");
        assert_eq!(PropertyValue::from(true).to_string(), "true");
        assert_eq!(PropertyValue::from(None::<i64>).to_string(), "null");
        assert_eq!(PropertyValue::from(vec![1_i64, 2]).to_string(), "[1, 2]");
        let map = PropertyValue::Map(vec![
            ("id".to_string(), PropertyValue::from(7_i64)),
            ("name".to_string(), PropertyValue::from("x")),
        ]);
        assert_eq!(map.to_string(), "{ id: 7, name: \"x\" }");
    }

    #[test]
    fn test_add_or_update_keeps_order() {
        let event = LogEvent::new(LogLevel::Information, "m")
            .with_property("a", 1_i64)
            .with_property("b", 2_i64)
            .with_property("a", 3_i64);
        let names: Vec<_> = event.properties().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(event.property("a"), Some(&PropertyValue::I64(3)));
    }

    #[test]
    fn test_unix_nanos_drops_sub_millisecond_precision() {
        let ts = UNIX_EPOCH + Duration::from_nanos(1_700_000_000_123_456_789);
        assert_eq!(unix_nanos_string(ts), "1700000000123000000");
        assert_eq!(unix_nanos_string(UNIX_EPOCH), "0");
    }
}
