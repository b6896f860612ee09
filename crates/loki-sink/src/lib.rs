// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Loki sink for structured log events.
//!
//! Events are routed into Loki labels or line suffixes by a [`router::LabelRouter`],
//! grouped into streams sharing one exact label set and pushed in batches to
//! `<url>/loki/api/v1/push`.

#![deny(clippy::all)]
#![deny(clippy::unwrap_used)]
#![deny(unused_extern_crates)]

pub mod batch_formatter;
pub mod config;
pub mod constants;
pub mod content;
pub mod errors;
pub mod event;
pub mod flusher;
pub mod label;
pub mod layer;
pub mod router;
pub mod sink;
pub mod template;
pub mod text_formatter;
