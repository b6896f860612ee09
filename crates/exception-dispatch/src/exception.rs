// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Errors as they reach an error boundary.
//!
//! [`Exception`] wraps any error together with the stack trace captured where it was
//! converted. The concrete type of the wrapped error is what dispatch matches on.

use std::backtrace::{Backtrace, BacktraceStatus};
use std::error::Error;
use std::fmt;

type BoxedError = Box<dyn Error + Send + Sync + 'static>;

pub struct Exception {
    inner: BoxedError,
    stack_trace: Option<String>,
}

impl Exception {
    /// Wraps `error`, capturing a stack trace when `RUST_BACKTRACE` or `RUST_LIB_BACKTRACE`
    /// enables it.
    #[must_use]
    pub fn new<E>(error: E) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        Self::from_boxed(Box::new(error))
    }

    #[must_use]
    pub fn from_boxed(inner: BoxedError) -> Self {
        let backtrace = Backtrace::capture();
        let stack_trace = match backtrace.status() {
            BacktraceStatus::Captured => Some(backtrace.to_string()),
            _ => None,
        };
        Exception { inner, stack_trace }
    }

    #[must_use]
    pub fn with_stack_trace(mut self, stack_trace: impl Into<String>) -> Self {
        self.stack_trace = Some(stack_trace.into());
        self
    }

    #[must_use]
    pub fn message(&self) -> String {
        self.inner.to_string()
    }

    #[must_use]
    pub fn stack_trace(&self) -> Option<&str> {
        self.stack_trace.as_deref()
    }

    /// The wrapped error, if it is exactly a `T`.
    #[must_use]
    pub fn downcast_ref<T>(&self) -> Option<&T>
    where
        T: Error + 'static,
    {
        self.inner.downcast_ref::<T>()
    }

    #[must_use]
    pub fn is<T>(&self) -> bool
    where
        T: Error + 'static,
    {
        self.inner.is::<T>()
    }

    /// Takes the wrapped error out if it is exactly a `T`, otherwise gives the exception back.
    pub fn downcast<T>(self) -> Result<T, Self>
    where
        T: Error + Send + Sync + 'static,
    {
        match self.inner.downcast::<T>() {
            Ok(error) => Ok(*error),
            Err(inner) => Err(Exception {
                inner,
                stack_trace: self.stack_trace,
            }),
        }
    }
}

impl<E> From<E> for Exception
where
    E: Error + Send + Sync + 'static,
{
    fn from(error: E) -> Self {
        Exception::new(error)
    }
}

impl fmt::Debug for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Exception")
            .field("inner", &self.inner)
            .field("has_stack_trace", &self.stack_trace.is_some())
            .finish()
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner)
    }
}

/// The caller is not allowed to perform the operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct UnauthorizedAccess(pub String);

impl Default for UnauthorizedAccess {
    fn default() -> Self {
        UnauthorizedAccess("Attempted to perform an unauthorized operation.".to_string())
    }
}

/// The requested operation exists but has no implementation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct NotImplemented(pub String);

impl Default for NotImplemented {
    fn default() -> Self {
        NotImplemented("The method or operation is not implemented.".to_string())
    }
}

/// General purpose server-side failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct InternalError(pub String);

impl InternalError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        InternalError(message.into())
    }
}
