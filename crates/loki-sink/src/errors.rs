// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use reqwest::StatusCode;

/// Error produced while writing a formatted payload or record.
#[derive(Debug, thiserror::Error)]
pub enum FormatError {
    #[error("failed to write formatted output: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to serialize Loki content: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Error returned when the sink configuration is invalid.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Unknown formatter strategy: {0}")]
    UnknownStrategy(String),
}

/// Error returned when a payload could not be shipped to Loki.
#[derive(Debug, thiserror::Error)]
pub enum ShippingError {
    /// The payload was rejected before reaching the destination. Retrying won't help.
    #[error("Failed to prepare payload: {0}")]
    Payload(String),

    /// The destination answered with an error status or could not be reached.
    #[error("Failed to push to Loki ({0:?}): {1}")]
    Destination(Option<StatusCode>, String),
}

impl ShippingError {
    /// 4xx answers are permanent, everything else may succeed on a later attempt.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            ShippingError::Payload(_) => false,
            ShippingError::Destination(status, _) => {
                !status.is_some_and(|code| code.is_client_error())
            }
        }
    }
}
