// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Shipping of formatted payloads to the Loki push API.
//!
//! A push succeeds on any 2xx answer. A 4xx answer means Loki will never accept the payload,
//! so it is dropped. A 5xx answer or a network failure is retried up to
//! [`FLUSH_RETRY_COUNT`] times, after which the payload is handed back to the caller.

use crate::config::{Credentials, LokiSinkConfig};
use crate::constants::FLUSH_RETRY_COUNT;
use crate::errors::ShippingError;
use reqwest::header::CONTENT_TYPE;
use std::time::{Duration, Instant};
use tracing::{debug, error};

/// Creates the HTTP client used for pushes.
pub fn build_client(timeout: Duration) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .timeout(timeout)
        .pool_idle_timeout(Duration::from_secs(270))
        .tcp_keepalive(Duration::from_secs(120))
        .build()
}

/// What became of a payload after [`Flusher::flush`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushOutcome {
    Delivered,
    /// Loki rejected the payload for good.
    Dropped,
    /// Delivery kept failing with temporary errors, the payload is handed back.
    Retry(Vec<u8>),
}

#[derive(Debug, Clone)]
pub struct Flusher {
    client: reqwest::Client,
    post_uri: String,
    credentials: Credentials,
    timeout: Duration,
}

impl Flusher {
    #[must_use]
    pub fn new(config: &LokiSinkConfig) -> Self {
        let client = match build_client(config.timeout) {
            Ok(client) => client,
            Err(e) => {
                error!("LOKI | Unable to build HTTP client, using defaults: {e}");
                reqwest::Client::new()
            }
        };
        Self::with_client(client, config)
    }

    #[must_use]
    pub fn with_client(client: reqwest::Client, config: &LokiSinkConfig) -> Self {
        Flusher {
            client,
            post_uri: config.post_uri(),
            credentials: config.credentials.clone(),
            timeout: config.timeout,
        }
    }

    #[must_use]
    pub fn post_uri(&self) -> &str {
        &self.post_uri
    }

    /// Sends `payload` once.
    pub async fn ship(&self, payload: &[u8]) -> Result<(), ShippingError> {
        if payload.is_empty() {
            return Err(ShippingError::Payload("empty payload".to_string()));
        }

        let mut request = self
            .client
            .post(&self.post_uri)
            .timeout(self.timeout)
            .header(CONTENT_TYPE, "application/json")
            .body(payload.to_vec());
        if let Credentials::Basic { username, password } = &self.credentials {
            request = request.basic_auth(username, Some(password));
        }

        let resp = request.send().await.map_err(|e| {
            ShippingError::Destination(e.status(), format!("Cannot reach {}: {e}", self.post_uri))
        })?;

        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let body = resp.text().await.unwrap_or_default();
        Err(ShippingError::Destination(Some(status), body))
    }

    /// Sends `payload`, retrying temporary failures.
    pub async fn flush(&self, payload: Vec<u8>) -> FlushOutcome {
        let mut attempts = 0;
        loop {
            let time = Instant::now();
            attempts += 1;
            match self.ship(&payload).await {
                Ok(()) => {
                    debug!(
                        "LOKI | Pushed {} bytes in {} ms",
                        payload.len(),
                        time.elapsed().as_millis()
                    );
                    return FlushOutcome::Delivered;
                }
                Err(e) if !e.is_retryable() => {
                    error!("LOKI | Payload dropped: {e}");
                    return FlushOutcome::Dropped;
                }
                Err(e) => {
                    if attempts >= FLUSH_RETRY_COUNT {
                        error!("LOKI | Failed to push after {attempts} attempts: {e}");
                        return FlushOutcome::Retry(payload);
                    }
                    debug!("LOKI | Push attempt {attempts} failed, retrying: {e}");
                }
            }
        }
    }
}
