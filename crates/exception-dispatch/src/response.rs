// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::exception::Exception;
use serde::{Deserialize, Serialize};

/// Error body returned by both boundaries.
///
/// ```json
/// {"message":"Internal server error.","stackTrace":"   0: service::handler\n..."}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub message: String,
    pub stack_trace: Option<String>,
}

impl ErrorResponse {
    #[must_use]
    pub fn new(message: impl Into<String>, stack_trace: Option<String>) -> Self {
        ErrorResponse {
            message: message.into(),
            stack_trace,
        }
    }

    /// Real message and stack trace of `exception`.
    #[must_use]
    pub fn from_exception(exception: &Exception) -> Self {
        ErrorResponse::new(
            exception.message(),
            exception.stack_trace().map(ToString::to_string),
        )
    }

    /// Fixed `message` with the stack trace of `exception`.
    #[must_use]
    pub fn with_message(message: impl Into<String>, exception: &Exception) -> Self {
        ErrorResponse::new(message, exception.stack_trace().map(ToString::to_string))
    }

    #[must_use]
    pub fn to_json_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }

    #[must_use]
    pub fn to_json(&self) -> String {
        self.to_json_value().to_string()
    }
}
