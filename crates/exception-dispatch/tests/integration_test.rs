// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use exception_dispatch::exception::{Exception, InternalError, NotImplemented, UnauthorizedAccess};
use exception_dispatch::grpc::GrpcExceptionFilterBuilder;
use exception_dispatch::http::{ActionResult, GlobalExceptionFilterBuilder};
use exception_dispatch::response::ErrorResponse;
use hyper::StatusCode;
use serde_json::json;
use std::sync::Arc;
use tonic::Code;

#[derive(Debug, thiserror::Error)]
#[error("invoice {0} is locked")]
struct InvoiceLocked(u64);

#[test]
fn test_custom_handler_registers_one_entry() {
    let builder = GlobalExceptionFilterBuilder::new().add_exception_handler::<InvoiceLocked, _>(
        |error, _| ActionResult::json(StatusCode::CONFLICT, json!({ "message": error.to_string() })),
    );
    assert_eq!(builder.handler_count(), 1);

    let builder = builder.add_exception_handler::<InvoiceLocked, _>(|_, _| {
        ActionResult::json(StatusCode::GONE, json!({}))
    });
    assert_eq!(builder.handler_count(), 1);

    let result = builder.build().handle(InvoiceLocked(9));
    assert_eq!(result.status, StatusCode::CONFLICT);
}

#[test]
fn test_empty_registry_default_response_carries_message() {
    let filter = GlobalExceptionFilterBuilder::new().build();
    let result = filter.on_exception(
        &Exception::new(InternalError::new("socket closed")).with_stack_trace("at read"),
    );

    assert_eq!(result.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        result.body,
        json!({"message": "socket closed", "stackTrace": "at read"})
    );

    let status = GrpcExceptionFilterBuilder::new()
        .build()
        .to_status(&Exception::new(InternalError::new("socket closed")));
    assert_eq!(status.code(), Code::Unknown);
    let body: ErrorResponse = serde_json::from_str(status.message()).expect("json detail");
    assert_eq!(body.message, "socket closed");
}

#[test]
fn test_both_boundaries_agree_on_defaults() {
    let filter = GlobalExceptionFilterBuilder::new()
        .add_default_exception_handlers()
        .build();
    let interceptor = GrpcExceptionFilterBuilder::new()
        .add_default_exception_handlers()
        .build();

    let cases: Vec<(Exception, StatusCode, Code)> = vec![
        (
            Exception::new(UnauthorizedAccess::default()),
            StatusCode::UNAUTHORIZED,
            Code::Unauthenticated,
        ),
        (
            Exception::new(NotImplemented::default()),
            StatusCode::NOT_IMPLEMENTED,
            Code::Unimplemented,
        ),
        (
            Exception::new(InternalError::new("x")),
            StatusCode::INTERNAL_SERVER_ERROR,
            Code::Unknown,
        ),
    ];

    for (exception, status, code) in cases {
        let result = filter.on_exception(&exception);
        let grpc = interceptor.to_status(&exception);
        assert_eq!(result.status, status);
        assert_eq!(grpc.code(), code);
        let body: ErrorResponse = serde_json::from_str(grpc.message()).expect("json detail");
        assert_eq!(result.body["message"], body.message);
    }
}

#[tokio::test]
async fn test_shared_interceptor_across_tasks() {
    let interceptor = GrpcExceptionFilterBuilder::new()
        .add_default_exception_handlers()
        .build();

    let mut handles = Vec::new();
    for i in 0..8u64 {
        let interceptor = Arc::clone(&interceptor);
        handles.push(tokio::spawn(async move {
            interceptor
                .intercept(async move {
                    if i % 2 == 0 {
                        Err(Exception::new(UnauthorizedAccess::default()))
                    } else {
                        Err(Exception::new(InvoiceLocked(i)))
                    }
                })
                .await
                .map(|()| ())
        }));
    }

    for (i, handle) in handles.into_iter().enumerate() {
        let status = handle.await.expect("task").expect_err("error status");
        if i % 2 == 0 {
            assert_eq!(status.code(), Code::Unauthenticated);
        } else {
            assert_eq!(status.code(), Code::Unknown);
        }
    }
}
