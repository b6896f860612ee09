// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Defaults shared by the formatters, the sink and its configuration.

use std::time::Duration;

/// Path of the Loki push API, appended to the configured base URL.
pub const PUSH_PATH: &str = "/loki/api/v1/push";

/// Output template used to render the log line when none is configured.
pub const DEFAULT_OUTPUT_TEMPLATE: &str = "{Message:lj}{NewLine}{Exception}";

/// Name of the synthetic property carrying the event severity.
pub const LEVEL_PROPERTY: &str = "level";

/// Property names promoted to labels when the caller supplies no list.
pub const DEFAULT_PROPERTIES_AS_LABELS: [&str; 9] = [
    "level",
    "AppEnvironment",
    "Microservice",
    "Method",
    "RequestId",
    "StatusCode",
    "RequestPath",
    "X-Smon-Userspace-Id",
    "X-Trace-Event-Id",
];

/// Maximum number of events posted in a single batch.
pub const DEFAULT_BATCH_POSTING_LIMIT: usize = 1000;

/// Time between two periodic flushes of the sink queue.
pub const DEFAULT_PERIOD: Duration = Duration::from_secs(2);

/// Timeout of a single push request.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Number of attempts for a push that keeps failing with a temporary error.
pub const FLUSH_RETRY_COUNT: usize = 3;
