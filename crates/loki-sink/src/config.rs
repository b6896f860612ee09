// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::constants::{
    DEFAULT_BATCH_POSTING_LIMIT, DEFAULT_OUTPUT_TEMPLATE, DEFAULT_PERIOD, DEFAULT_TIMEOUT,
    PUSH_PATH,
};
use crate::errors::ConfigError;
use crate::label::{DefaultLabelProvider, FormatterStrategy, LogLabel};
use crate::template::MessageTemplateFormatter;
use std::env;
use std::time::Duration;

/// Authentication sent with every push request.
#[derive(Clone, PartialEq, Eq, Default)]
pub enum Credentials {
    #[default]
    NoAuth,
    Basic { username: String, password: String },
}

impl Credentials {
    /// Basic auth is used only when both the username and the password are non-blank.
    #[must_use]
    pub fn new(username: Option<&str>, password: Option<&str>) -> Self {
        match (username, password) {
            (Some(username), Some(password))
                if !username.trim().is_empty() && !password.trim().is_empty() =>
            {
                Credentials::Basic {
                    username: username.to_string(),
                    password: password.to_string(),
                }
            }
            _ => Credentials::NoAuth,
        }
    }
}

// Keep the password out of debug logs
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credentials::NoAuth => f.write_str("NoAuth"),
            Credentials::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .field("password", &"***")
                .finish(),
        }
    }
}

/// Joins the Loki base URL and the push path, tolerating a trailing `/` on the base URL.
#[must_use]
pub fn build_post_uri(url: &str) -> String {
    format!("{}{}", url.trim_end_matches('/'), PUSH_PATH)
}

/// Configuration of the Loki sink
#[derive(Debug, Clone)]
pub struct LokiSinkConfig {
    /// Base URL of the Loki server, without the push path
    pub url: String,
    pub credentials: Credentials,
    /// Maximum number of events in a single push
    pub batch_posting_limit: usize,
    /// Time between two periodic flushes
    pub period: Duration,
    /// Maximum number of queued events, unbounded when `None`
    pub queue_limit: Option<usize>,
    /// Labels attached to every stream
    pub labels: Vec<LogLabel>,
    /// Property names sent as labels, the built-in list when `None`
    pub properties_as_labels: Option<Vec<String>>,
    pub properties_to_append: Option<Vec<String>>,
    pub formatter_strategy: FormatterStrategy,
    pub output_template: String,
    /// Timeout of a single push request
    pub timeout: Duration,
}

impl Default for LokiSinkConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:3100".to_string(),
            credentials: Credentials::NoAuth,
            batch_posting_limit: DEFAULT_BATCH_POSTING_LIMIT,
            period: DEFAULT_PERIOD,
            queue_limit: None,
            labels: Vec::new(),
            properties_as_labels: None,
            properties_to_append: None,
            formatter_strategy: FormatterStrategy::default(),
            output_template: DEFAULT_OUTPUT_TEMPLATE.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl LokiSinkConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`LokiSinkConfig::from_env`], reading variables through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let url = lookup("LOKI_URL").unwrap_or(defaults.url);
        let credentials = Credentials::new(
            lookup("LOKI_USERNAME").as_deref(),
            lookup("LOKI_PASSWORD").as_deref(),
        );
        let batch_posting_limit = lookup("LOKI_BATCH_POSTING_LIMIT")
            .and_then(|val| val.trim().parse::<usize>().ok())
            .unwrap_or(defaults.batch_posting_limit);
        let period = lookup("LOKI_PERIOD_MS")
            .and_then(|val| val.trim().parse::<u64>().ok())
            .map_or(defaults.period, Duration::from_millis);
        let queue_limit = lookup("LOKI_QUEUE_LIMIT").and_then(|val| val.trim().parse::<usize>().ok());
        let labels = match lookup("LOKI_LABELS") {
            Some(val) => parse_labels(&val)?,
            None => defaults.labels,
        };
        let properties_as_labels = lookup("LOKI_PROPERTIES_AS_LABELS").map(|val| parse_list(&val));
        let properties_to_append = lookup("LOKI_PROPERTIES_TO_APPEND").map(|val| parse_list(&val));
        let formatter_strategy = match lookup("LOKI_FORMATTER_STRATEGY") {
            Some(val) => val.parse::<FormatterStrategy>()?,
            None => defaults.formatter_strategy,
        };
        let output_template = lookup("LOKI_OUTPUT_TEMPLATE").unwrap_or(defaults.output_template);
        let timeout = lookup("LOKI_TIMEOUT_MS")
            .and_then(|val| val.trim().parse::<u64>().ok())
            .map_or(defaults.timeout, Duration::from_millis);

        let config = Self {
            url,
            credentials,
            batch_posting_limit,
            period,
            queue_limit,
            labels,
            properties_as_labels,
            properties_to_append,
            formatter_strategy,
            output_template,
            timeout,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = self.url.trim();
        if url.is_empty() {
            return Err(ConfigError::Invalid("LOKI_URL cannot be empty".to_string()));
        }
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ConfigError::Invalid(format!(
                "LOKI_URL '{url}' must start with http:// or https://"
            )));
        }

        if self.batch_posting_limit == 0 {
            return Err(ConfigError::Invalid(
                "Batch posting limit must be greater than 0".to_string(),
            ));
        }

        if self.period.is_zero() {
            return Err(ConfigError::Invalid(
                "Flush period must be greater than 0".to_string(),
            ));
        }

        if self.queue_limit == Some(0) {
            return Err(ConfigError::Invalid(
                "Queue limit must be greater than 0".to_string(),
            ));
        }

        if let Some(label) = self.labels.iter().find(|label| label.key.trim().is_empty()) {
            return Err(ConfigError::Invalid(format!(
                "Label with value '{}' has an empty key",
                label.value
            )));
        }

        Ok(())
    }

    #[must_use]
    pub fn post_uri(&self) -> String {
        build_post_uri(&self.url)
    }

    #[must_use]
    pub fn label_provider(&self) -> DefaultLabelProvider {
        DefaultLabelProvider::new(
            Some(self.labels.clone()),
            self.properties_as_labels.clone(),
            self.properties_to_append.clone(),
            self.formatter_strategy,
        )
    }

    #[must_use]
    pub fn line_formatter(&self) -> MessageTemplateFormatter {
        MessageTemplateFormatter::new(&self.output_template)
    }
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(ToString::to_string)
        .collect()
}

/// Parses `k1=v1,k2=v2`.
fn parse_labels(value: &str) -> Result<Vec<LogLabel>, ConfigError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() => {
                Ok(LogLabel::new(key.trim(), value.trim()))
            }
            _ => Err(ConfigError::Invalid(format!(
                "Invalid label '{pair}', expected key=value"
            ))),
        })
        .collect()
}
