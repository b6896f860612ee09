// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! gRPC error boundary. Statuses carry the [`ErrorResponse`] JSON as their message.

use crate::exception::{Exception, InternalError, NotImplemented, UnauthorizedAccess};
use crate::registry::{ExceptionDispatchRegistry, UnhandledResponse};
use crate::response::ErrorResponse;
use std::error::Error;
use std::future::Future;
use std::sync::Arc;
use tonic::{Code, Status};
use tracing::error;

impl UnhandledResponse for Status {
    fn from_unhandled(exception: &Exception) -> Self {
        Status::new(
            Code::Unknown,
            ErrorResponse::from_exception(exception).to_json(),
        )
    }
}

fn error_status(code: Code, message: &str, exception: &Exception) -> Status {
    Status::new(
        code,
        ErrorResponse::with_message(message, exception).to_json(),
    )
}

#[derive(Debug, Default)]
pub struct GrpcExceptionFilterBuilder {
    registry: ExceptionDispatchRegistry<Status>,
}

impl GrpcExceptionFilterBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn add_default_exception_handlers(self) -> Self {
        self.add_exception_handler::<UnauthorizedAccess, _>(|_, exception| {
            error_status(Code::Unauthenticated, "Unauthorized Access.", exception)
        })
        .add_exception_handler::<NotImplemented, _>(|_, exception| {
            error_status(Code::Unimplemented, "A server error occurred.", exception)
        })
        .add_exception_handler::<InternalError, _>(|_, exception| {
            error_status(Code::Unknown, "Internal server error.", exception)
        })
    }

    #[must_use]
    pub fn add_exception_handler<T, F>(mut self, handler: F) -> Self
    where
        T: Error + Send + Sync + 'static,
        F: Fn(&T, &Exception) -> Status + Send + Sync + 'static,
    {
        self.registry.register::<T, F>(handler);
        self
    }

    #[must_use]
    pub fn handler_count(&self) -> usize {
        self.registry.len()
    }

    #[must_use]
    pub fn build(self) -> Arc<GrpcExceptionInterceptor> {
        Arc::new(GrpcExceptionInterceptor {
            registry: self.registry,
        })
    }
}

/// Wraps service method bodies so that every error leaves as a [`Status`].
#[derive(Debug)]
pub struct GrpcExceptionInterceptor {
    registry: ExceptionDispatchRegistry<Status>,
}

impl GrpcExceptionInterceptor {
    pub fn to_status(&self, exception: &Exception) -> Status {
        self.registry.dispatch(exception)
    }

    /// Awaits `call`. A [`Status`] returned by the handler is passed through untouched, any
    /// other error goes through the registered handlers.
    pub async fn intercept<T, F>(&self, call: F) -> Result<T, Status>
    where
        F: Future<Output = Result<T, Exception>>,
    {
        match call.await {
            Ok(response) => Ok(response),
            Err(exception) => match exception.downcast::<Status>() {
                Ok(status) => {
                    error!(
                        "GrpcExceptionInterceptor | {:?} | {}",
                        status.code(),
                        status.message()
                    );
                    Err(status)
                }
                Err(exception) => {
                    error!("GrpcExceptionInterceptor | {}", exception.message());
                    Err(self.to_status(&exception))
                }
            },
        }
    }

    #[must_use]
    pub fn registry(&self) -> &ExceptionDispatchRegistry<Status> {
        &self.registry
    }
}
