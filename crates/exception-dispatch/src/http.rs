// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! HTTP error boundary.
//!
//! ```rust,ignore
//! let filter = GlobalExceptionFilterBuilder::new()
//!     .add_default_exception_handlers()
//!     .add_exception_handler::<OrderNotFound, _>(|error, _| {
//!         ActionResult::json(StatusCode::NOT_FOUND, json!({ "message": error.to_string() }))
//!     })
//!     .build();
//!
//! // in the request handler
//! let response = filter.on_exception(&exception).into_response()?;
//! ```

use crate::exception::{Exception, InternalError, NotImplemented, UnauthorizedAccess};
use crate::registry::{ExceptionDispatchRegistry, UnhandledResponse};
use crate::response::ErrorResponse;
use hyper::{header, http, Response, StatusCode};
use std::error::Error;
use std::sync::Arc;
use tracing::error;

/// Status code and JSON body of an HTTP error response.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionResult {
    pub status: StatusCode,
    pub body: serde_json::Value,
}

impl ActionResult {
    #[must_use]
    pub fn json(status: StatusCode, body: serde_json::Value) -> Self {
        ActionResult { status, body }
    }

    #[must_use]
    pub fn error(status: StatusCode, response: &ErrorResponse) -> Self {
        ActionResult::json(status, response.to_json_value())
    }

    pub fn into_response(self) -> http::Result<Response<String>> {
        Response::builder()
            .status(self.status)
            .header(header::CONTENT_TYPE, "application/json")
            .body(self.body.to_string())
    }
}

impl UnhandledResponse for ActionResult {
    fn from_unhandled(exception: &Exception) -> Self {
        ActionResult::error(
            StatusCode::INTERNAL_SERVER_ERROR,
            &ErrorResponse::from_exception(exception),
        )
    }
}

#[derive(Debug, Default)]
pub struct GlobalExceptionFilterBuilder {
    registry: ExceptionDispatchRegistry<ActionResult>,
}

impl GlobalExceptionFilterBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the handlers for [`UnauthorizedAccess`] (401), [`NotImplemented`] (501) and
    /// [`InternalError`] (500). Each answers with a fixed message and the stack trace.
    #[must_use]
    pub fn add_default_exception_handlers(self) -> Self {
        self.add_exception_handler::<UnauthorizedAccess, _>(|_, exception| {
            ActionResult::error(
                StatusCode::UNAUTHORIZED,
                &ErrorResponse::with_message("Unauthorized Access.", exception),
            )
        })
        .add_exception_handler::<NotImplemented, _>(|_, exception| {
            ActionResult::error(
                StatusCode::NOT_IMPLEMENTED,
                &ErrorResponse::with_message("A server error occurred.", exception),
            )
        })
        .add_exception_handler::<InternalError, _>(|_, exception| {
            ActionResult::error(
                StatusCode::INTERNAL_SERVER_ERROR,
                &ErrorResponse::with_message("Internal server error.", exception),
            )
        })
    }

    /// Registers `handler` for errors of exactly type `T`. A type that already has a handler
    /// keeps it.
    #[must_use]
    pub fn add_exception_handler<T, F>(mut self, handler: F) -> Self
    where
        T: Error + Send + Sync + 'static,
        F: Fn(&T, &Exception) -> ActionResult + Send + Sync + 'static,
    {
        self.registry.register::<T, F>(handler);
        self
    }

    #[must_use]
    pub fn handler_count(&self) -> usize {
        self.registry.len()
    }

    #[must_use]
    pub fn build(self) -> Arc<GlobalExceptionFilter> {
        Arc::new(GlobalExceptionFilter {
            registry: self.registry,
        })
    }
}

/// Turns errors escaping a request handler into HTTP responses.
#[derive(Debug)]
pub struct GlobalExceptionFilter {
    registry: ExceptionDispatchRegistry<ActionResult>,
}

impl GlobalExceptionFilter {
    pub fn on_exception(&self, exception: &Exception) -> ActionResult {
        let result = self.registry.dispatch(exception);
        error!(
            "GlobalExceptionFilter | {} | {}",
            result.status.as_u16(),
            exception.message()
        );
        result
    }

    pub fn handle<E>(&self, error: E) -> ActionResult
    where
        E: Error + Send + Sync + 'static,
    {
        self.on_exception(&Exception::new(error))
    }

    #[must_use]
    pub fn registry(&self) -> &ExceptionDispatchRegistry<ActionResult> {
        &self.registry
    }
}
