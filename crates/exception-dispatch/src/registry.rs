// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Type-keyed handler table shared by the HTTP and the gRPC boundaries.
//!
//! Handlers are matched on the exact type of the wrapped error: a handler registered for
//! [`crate::exception::InternalError`] does not catch an error type that merely wraps one.
//! Errors without a handler get the response built by [`UnhandledResponse`].
//!
//! The table is filled during startup and read-only afterwards, so it can be shared behind
//! an `Arc` without locking.

use crate::exception::Exception;
use std::any::{type_name, TypeId};
use std::error::Error;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::{debug, error};

/// Response produced when no handler matches.
pub trait UnhandledResponse {
    fn from_unhandled(exception: &Exception) -> Self;
}

type Handler<R> = Box<dyn Fn(&Exception) -> Option<R> + Send + Sync>;

struct HandlerEntry<R> {
    type_id: TypeId,
    type_name: &'static str,
    handler: Handler<R>,
}

pub struct ExceptionDispatchRegistry<R> {
    handlers: Vec<HandlerEntry<R>>,
}

impl<R> Default for ExceptionDispatchRegistry<R> {
    fn default() -> Self {
        ExceptionDispatchRegistry {
            handlers: Vec::new(),
        }
    }
}

impl<R> std::fmt::Debug for ExceptionDispatchRegistry<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.handlers.iter().map(|entry| entry.type_name))
            .finish()
    }
}

impl<R: UnhandledResponse> ExceptionDispatchRegistry<R> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for errors of exactly type `T`. The first registration for a type
    /// wins; later ones are ignored and `false` is returned.
    pub fn register<T, F>(&mut self, handler: F) -> bool
    where
        T: Error + Send + Sync + 'static,
        F: Fn(&T, &Exception) -> R + Send + Sync + 'static,
    {
        let type_id = TypeId::of::<T>();
        if self.handlers.iter().any(|entry| entry.type_id == type_id) {
            debug!("Handler for {} already registered, ignoring", type_name::<T>());
            return false;
        }

        self.handlers.push(HandlerEntry {
            type_id,
            type_name: type_name::<T>(),
            handler: Box::new(move |exception: &Exception| {
                exception
                    .downcast_ref::<T>()
                    .map(|error| handler(error, exception))
            }),
        });
        true
    }

    /// Builds the response for `exception`. Never fails: unmatched errors and handlers that
    /// panic both fall back to [`UnhandledResponse::from_unhandled`].
    pub fn dispatch(&self, exception: &Exception) -> R {
        for entry in &self.handlers {
            match catch_unwind(AssertUnwindSafe(|| (entry.handler)(exception))) {
                Ok(Some(response)) => return response,
                Ok(None) => {}
                Err(_) => {
                    error!(
                        "Handler for {} panicked, using the default response",
                        entry.type_name
                    );
                    return R::from_unhandled(exception);
                }
            }
        }
        R::from_unhandled(exception)
    }

    #[must_use]
    pub fn contains<T>(&self) -> bool
    where
        T: Error + 'static,
    {
        let type_id = TypeId::of::<T>();
        self.handlers.iter().any(|entry| entry.type_id == type_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
