// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Batching sink service.
//!
//! [`LokiSink`] owns the event queue and runs as a single task; producers talk to it through
//! a cloneable [`SinkHandle`]. The queue is flushed when it holds `batch_posting_limit`
//! events, when the period elapses, on an explicit flush and on shutdown or cancellation.
//!
//! With a queue limit, at most `queue_limit` events wait in the channel and at most
//! `queue_limit` in the queue. Events arriving while the channel is full are dropped by the
//! handle; the queue drops its oldest events.

use crate::batch_formatter::BatchFormatter;
use crate::config::LokiSinkConfig;
use crate::event::LogEvent;
use crate::flusher::{FlushOutcome, Flusher};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

#[derive(Debug)]
pub enum SinkCommand {
    Emit(Box<LogEvent>),
    /// Flush now and report how many events reached Loki.
    Flush(oneshot::Sender<usize>),
    Shutdown,
}

/// Events sent but not yet received by the service.
#[derive(Debug, Default)]
struct Backlog {
    limit: Option<usize>,
    in_flight: AtomicUsize,
    dropped: AtomicUsize,
}

impl Backlog {
    fn new(limit: Option<usize>) -> Self {
        Backlog {
            limit,
            ..Default::default()
        }
    }

    /// Reserves a slot for one event, `false` when the limit is reached.
    fn reserve(&self) -> bool {
        let previous = self.in_flight.fetch_add(1, Ordering::AcqRel);
        if self.limit.is_some_and(|limit| previous >= limit) {
            self.in_flight.fetch_sub(1, Ordering::AcqRel);
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        true
    }

    fn release(&self) {
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
    }

    fn take_dropped(&self) -> usize {
        self.dropped.swap(0, Ordering::Relaxed)
    }
}

#[derive(Clone, Debug)]
pub struct SinkHandle {
    tx: mpsc::UnboundedSender<SinkCommand>,
    backlog: Arc<Backlog>,
}

impl SinkHandle {
    pub(crate) fn new(tx: mpsc::UnboundedSender<SinkCommand>) -> Self {
        Self::with_backlog(tx, Arc::new(Backlog::default()))
    }

    fn with_backlog(tx: mpsc::UnboundedSender<SinkCommand>, backlog: Arc<Backlog>) -> Self {
        SinkHandle { tx, backlog }
    }

    /// Queues `event`. Once `queue_limit` events are waiting for the service the event is
    /// dropped and counted, which is not an error.
    pub fn emit(&self, event: LogEvent) -> Result<(), mpsc::error::SendError<SinkCommand>> {
        if !self.backlog.reserve() {
            return Ok(());
        }
        self.tx
            .send(SinkCommand::Emit(Box::new(event)))
            .inspect_err(|_| self.backlog.release())
    }

    pub async fn flush(&self) -> Result<usize, String> {
        let (response_tx, response_rx) = oneshot::channel();
        self.tx
            .send(SinkCommand::Flush(response_tx))
            .map_err(|e| format!("Failed to send flush command: {e}"))?;

        response_rx
            .await
            .map_err(|e| format!("Failed to receive flush response: {e}"))
    }

    /// Asks the service to flush what is queued and stop.
    pub fn shutdown(&self) -> Result<(), mpsc::error::SendError<SinkCommand>> {
        self.tx.send(SinkCommand::Shutdown)
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

pub struct LokiSink {
    formatter: BatchFormatter,
    flusher: Flusher,
    queue: VecDeque<LogEvent>,
    /// Payloads that failed with temporary errors, retried once on the next flush.
    pending: Vec<(Vec<u8>, usize)>,
    batch_posting_limit: usize,
    period: Duration,
    queue_limit: Option<usize>,
    dropped: usize,
    backlog: Arc<Backlog>,
    rx: mpsc::UnboundedReceiver<SinkCommand>,
    cancel: CancellationToken,
}

impl LokiSink {
    #[must_use]
    pub fn new(config: &LokiSinkConfig) -> (Self, SinkHandle) {
        let formatter = BatchFormatter::new(
            Arc::new(config.label_provider()),
            Arc::new(config.line_formatter()),
        );
        Self::with_parts(formatter, Flusher::new(config), config)
    }

    #[must_use]
    pub fn with_parts(
        formatter: BatchFormatter,
        flusher: Flusher,
        config: &LokiSinkConfig,
    ) -> (Self, SinkHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let backlog = Arc::new(Backlog::new(config.queue_limit));
        let sink = LokiSink {
            formatter,
            flusher,
            queue: VecDeque::new(),
            pending: Vec::new(),
            batch_posting_limit: config.batch_posting_limit.max(1),
            period: config.period,
            queue_limit: config.queue_limit,
            dropped: 0,
            backlog: Arc::clone(&backlog),
            rx,
            cancel: CancellationToken::new(),
        };
        (sink, SinkHandle::with_backlog(tx, backlog))
    }

    /// Token stopping the service; remaining events are flushed first.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn run(mut self) {
        debug!("LOKI | Sink started, pushing to {}", self.flusher.post_uri());

        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        interval.tick().await;

        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    debug!("LOKI | Sink cancelled");
                    break;
                }
                command = self.rx.recv() => match command {
                    Some(SinkCommand::Emit(event)) => {
                        self.receive(*event);
                        if self.queue.len() >= self.batch_posting_limit {
                            self.flush_queue().await;
                        }
                    }
                    Some(SinkCommand::Flush(response_tx)) => {
                        let delivered = self.flush_queue().await;
                        if response_tx.send(delivered).is_err() {
                            error!("LOKI | Failed to send flush response - receiver dropped");
                        }
                    }
                    Some(SinkCommand::Shutdown) | None => {
                        debug!("LOKI | Sink shutting down");
                        break;
                    }
                },
                _ = interval.tick() => {
                    self.flush_queue().await;
                }
            }
        }

        // Commands sent before the stop still count
        self.rx.close();
        let mut waiting = Vec::new();
        while let Ok(command) = self.rx.try_recv() {
            match command {
                SinkCommand::Emit(event) => self.receive(*event),
                SinkCommand::Flush(response_tx) => waiting.push(response_tx),
                SinkCommand::Shutdown => {}
            }
        }

        let delivered = self.flush_queue().await;
        for response_tx in waiting {
            if response_tx.send(delivered).is_err() {
                error!("LOKI | Failed to send flush response - receiver dropped");
            }
        }
    }

    fn receive(&mut self, event: LogEvent) {
        self.backlog.release();
        self.enqueue(event);
    }

    fn enqueue(&mut self, event: LogEvent) {
        self.queue.push_back(event);
        if let Some(limit) = self.queue_limit {
            while self.queue.len() > limit {
                self.queue.pop_front();
                self.dropped += 1;
            }
        }
    }

    /// Ships the queue in batches of at most `batch_posting_limit` events and returns how
    /// many events were delivered.
    async fn flush_queue(&mut self) -> usize {
        let rejected = self.backlog.take_dropped();
        if rejected > 0 {
            warn!("LOKI | Queue limit reached, dropped {rejected} incoming events");
        }
        if self.dropped > 0 {
            warn!(
                "LOKI | Queue limit reached, dropped {} oldest events",
                self.dropped
            );
            self.dropped = 0;
        }

        let mut delivered = 0;

        for (payload, count) in std::mem::take(&mut self.pending) {
            match self.flusher.flush(payload).await {
                FlushOutcome::Delivered => delivered += count,
                FlushOutcome::Dropped => {}
                FlushOutcome::Retry(_) => {
                    error!("LOKI | Giving up on a batch of {count} events");
                }
            }
        }

        while !self.queue.is_empty() {
            let size = self.queue.len().min(self.batch_posting_limit);
            let batch: Vec<LogEvent> = self.queue.drain(..size).collect();

            let mut payload = Vec::new();
            if let Err(e) = self.formatter.format(&batch, &mut payload) {
                error!("LOKI | Failed to format a batch of {size} events: {e}");
                continue;
            }

            match self.flusher.flush(payload).await {
                FlushOutcome::Delivered => delivered += size,
                FlushOutcome::Dropped => {}
                FlushOutcome::Retry(payload) => self.pending.push((payload, size)),
            }
        }

        delivered
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::event::LogLevel;
    use mockito::Matcher;
    use tracing_test::traced_test;

    fn config_for(server: &mockito::ServerGuard) -> LokiSinkConfig {
        LokiSinkConfig {
            url: server.url(),
            period: Duration::from_secs(3600),
            timeout: Duration::from_secs(2),
            ..Default::default()
        }
    }

    fn spawn(config: &LokiSinkConfig) -> (SinkHandle, tokio::task::JoinHandle<()>) {
        let (sink, handle) = LokiSink::new(config);
        let task = tokio::spawn(sink.run());
        (handle, task)
    }

    fn event(message: &str) -> LogEvent {
        LogEvent::new(LogLevel::Information, message)
    }

    #[tokio::test]
    async fn test_flush_ships_queued_events() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/loki/api/v1/push")
            .match_body(Matcher::Regex("first.*second.*third".to_string()))
            .with_status(204)
            .expect(1)
            .create_async()
            .await;

        let (handle, _task) = spawn(&config_for(&server));
        for message in ["first", "second", "third"] {
            handle.emit(event(message)).unwrap();
        }

        assert_eq!(handle.flush().await.unwrap(), 3);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_flush_with_empty_queue_sends_nothing() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/loki/api/v1/push")
            .expect(0)
            .create_async()
            .await;

        let (handle, _task) = spawn(&config_for(&server));
        assert_eq!(handle.flush().await.unwrap(), 0);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_batch_posting_limit_triggers_flush() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/loki/api/v1/push")
            .with_status(204)
            .expect(3)
            .create_async()
            .await;

        let config = LokiSinkConfig {
            batch_posting_limit: 2,
            ..config_for(&server)
        };
        let (handle, _task) = spawn(&config);
        for i in 0..5 {
            handle.emit(event(&format!("m{i}"))).unwrap();
        }

        // Two full batches went out on their own, one event is left
        assert_eq!(handle.flush().await.unwrap(), 1);
        mock.assert_async().await;
    }

    #[tokio::test]
    #[traced_test]
    async fn test_queue_limit_bounds_events_waiting_for_the_service() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/loki/api/v1/push")
            .match_body(Matcher::AllOf(vec![
                Matcher::Regex("m0".to_string()),
                Matcher::Regex("m1".to_string()),
            ]))
            .with_status(204)
            .expect(1)
            .create_async()
            .await;

        let config = LokiSinkConfig {
            queue_limit: Some(2),
            ..config_for(&server)
        };
        let (sink, handle) = LokiSink::new(&config);

        // The service is not running yet, so nothing leaves the channel
        for i in 0..5 {
            handle.emit(event(&format!("m{i}"))).unwrap();
        }
        assert_eq!(handle.backlog.in_flight.load(Ordering::Acquire), 2);

        let _task = tokio::spawn(sink.run());
        assert_eq!(handle.flush().await.unwrap(), 2);
        assert_eq!(handle.backlog.in_flight.load(Ordering::Acquire), 0);
        mock.assert_async().await;
        assert!(logs_contain("dropped 3 incoming events"));
    }

    #[test]
    fn test_queue_limit_drops_oldest_queued_events() {
        let config = LokiSinkConfig {
            queue_limit: Some(2),
            ..Default::default()
        };
        let (mut sink, _handle) = LokiSink::new(&config);
        for i in 0..5 {
            sink.enqueue(event(&format!("m{i}")));
        }

        let kept: Vec<_> = sink
            .queue
            .iter()
            .map(|event| event.message_template.clone())
            .collect();
        assert_eq!(kept, vec!["m3", "m4"]);
        assert_eq!(sink.dropped, 3);
    }

    #[tokio::test]
    async fn test_shutdown_flushes_remaining_events() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/loki/api/v1/push")
            .with_status(204)
            .expect(1)
            .create_async()
            .await;

        let (handle, task) = spawn(&config_for(&server));
        handle.emit(event("last words")).unwrap();
        handle.shutdown().unwrap();
        task.await.unwrap();

        mock.assert_async().await;
        assert!(handle.is_closed());
    }

    #[tokio::test]
    async fn test_cancellation_flushes_remaining_events() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/loki/api/v1/push")
            .with_status(204)
            .expect(2)
            .create_async()
            .await;

        let (sink, handle) = LokiSink::new(&config_for(&server));
        let token = sink.cancellation_token();
        handle.emit(event("queued before start")).unwrap();
        let task = tokio::spawn(sink.run());

        assert_eq!(handle.flush().await.unwrap(), 1);
        handle.emit(event("queued after flush")).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();
        task.await.unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_cancellation_ships_events_still_in_the_channel() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/loki/api/v1/push")
            .match_body(Matcher::Regex("fatal last words".to_string()))
            .with_status(204)
            .expect(1)
            .create_async()
            .await;

        let (sink, handle) = LokiSink::new(&config_for(&server));
        let token = sink.cancellation_token();
        let task = tokio::spawn(sink.run());

        handle.emit(event("fatal last words")).unwrap();
        token.cancel();
        task.await.unwrap();

        mock.assert_async().await;
        assert!(handle.emit(event("too late")).is_err());
    }

    #[tokio::test]
    async fn test_flush_sent_with_shutdown_is_answered() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/loki/api/v1/push")
            .with_status(204)
            .expect(1)
            .create_async()
            .await;

        let (sink, handle) = LokiSink::new(&config_for(&server));
        handle.emit(event("one")).unwrap();
        handle.emit(event("two")).unwrap();
        handle.shutdown().unwrap();
        let flush = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.flush().await })
        };
        // Let the flush command reach the channel behind the shutdown
        tokio::task::yield_now().await;

        sink.run().await;
        assert_eq!(flush.await.unwrap().unwrap(), 2);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_period_triggers_flush() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/loki/api/v1/push")
            .with_status(204)
            .expect(1)
            .create_async()
            .await;

        let config = LokiSinkConfig {
            period: Duration::from_millis(50),
            ..config_for(&server)
        };
        let (handle, _task) = spawn(&config);
        handle.emit(event("tick")).unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;

        mock.assert_async().await;
        assert_eq!(handle.flush().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_temporary_failure_is_retried_on_next_flush() {
        let mut server = mockito::Server::new_async().await;
        let failing = server
            .mock("POST", "/loki/api/v1/push")
            .with_status(503)
            .expect(crate::constants::FLUSH_RETRY_COUNT)
            .create_async()
            .await;

        let (handle, _task) = spawn(&config_for(&server));
        handle.emit(event("flaky")).unwrap();
        assert_eq!(handle.flush().await.unwrap(), 0);
        failing.assert_async().await;
        failing.remove_async().await;

        let ok = server
            .mock("POST", "/loki/api/v1/push")
            .with_status(204)
            .expect(1)
            .create_async()
            .await;
        assert_eq!(handle.flush().await.unwrap(), 1);
        ok.assert_async().await;
    }
}
