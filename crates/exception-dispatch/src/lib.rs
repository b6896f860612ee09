// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Error boundaries translating errors into HTTP responses and gRPC statuses.
//!
//! Both boundaries are built once at startup through their builder and then shared by `Arc`.

#![deny(clippy::all)]
#![deny(clippy::unwrap_used)]
#![deny(unused_extern_crates)]

pub mod exception;
pub mod grpc;
pub mod http;
pub mod registry;
pub mod response;
