// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! `tracing` integration.
//!
//! [`LokiLayer`] turns every `tracing` event into a [`LogEvent`] and hands it to a running
//! sink. Fields of the enclosing spans become properties too, root span first, so a
//! `RequestId` recorded on a request span ends up on every event logged inside it. Event
//! fields win over span fields with the same name.
//!
//! ```rust,ignore
//! use tracing_subscriber::prelude::*;
//!
//! let (sink, handle) = LokiSink::new(&LokiSinkConfig::from_env()?);
//! tokio::spawn(sink.run());
//! tracing_subscriber::registry().with(LokiLayer::new(handle)).init();
//! ```

use crate::event::{LogEvent, LogLevel, PropertyValue};
use crate::sink::SinkHandle;
use std::fmt;
use tracing_core::field::{Field, Visit};
use tracing_core::span::{Attributes, Id, Record};
use tracing_core::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::registry::LookupSpan;

/// Targets whose events would feed back into the sink while it ships.
const DEFAULT_IGNORED_TARGETS: [&str; 5] = ["loki_sink", "reqwest", "hyper", "hyper_util", "h2"];

#[derive(Debug, Default)]
struct FieldVisitor {
    message: Option<String>,
    exception: Option<String>,
    properties: Vec<(String, PropertyValue)>,
}

impl FieldVisitor {
    fn push(&mut self, field: &Field, value: PropertyValue) {
        let name = field.name();
        // Metadata added by tracing-log
        if name.starts_with("log.") {
            return;
        }
        match self.properties.iter_mut().find(|(existing, _)| existing == name) {
            Some((_, slot)) => *slot = value,
            None => self.properties.push((name.to_string(), value)),
        }
    }
}

impl Visit for FieldVisitor {
    fn record_f64(&mut self, field: &Field, value: f64) {
        self.push(field, PropertyValue::F64(value));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.push(field, PropertyValue::I64(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.push(field, PropertyValue::U64(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.push(field, PropertyValue::Bool(value));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        } else {
            self.push(field, PropertyValue::Str(value.to_string()));
        }
    }

    fn record_error(&mut self, _field: &Field, value: &(dyn std::error::Error + 'static)) {
        let mut text = value.to_string();
        let mut source = value.source();
        while let Some(cause) = source {
            text.push_str(&format!(": {cause}"));
            source = cause.source();
        }
        self.exception = Some(text);
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = Some(format!("{value:?}"));
        } else {
            self.push(field, PropertyValue::Str(format!("{value:?}")));
        }
    }
}

/// Span fields kept in the span extensions.
#[derive(Debug, Default)]
struct SpanProperties(Vec<(String, PropertyValue)>);

/// `tracing-subscriber` layer forwarding events to a [`crate::sink::LokiSink`].
///
/// Events are dropped once the sink has stopped; logging never fails the caller.
#[derive(Debug, Clone)]
pub struct LokiLayer {
    handle: SinkHandle,
    ignored_targets: Vec<String>,
}

impl LokiLayer {
    #[must_use]
    pub fn new(handle: SinkHandle) -> Self {
        LokiLayer {
            handle,
            ignored_targets: DEFAULT_IGNORED_TARGETS
                .iter()
                .map(ToString::to_string)
                .collect(),
        }
    }

    /// Replaces the list of target prefixes whose events are not forwarded.
    #[must_use]
    pub fn with_ignored_targets<I, T>(mut self, targets: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.ignored_targets = targets.into_iter().map(Into::into).collect();
        self
    }

    fn is_ignored(&self, target: &str) -> bool {
        self.ignored_targets
            .iter()
            .any(|prefix| target.starts_with(prefix.as_str()))
    }
}

/// The `tracing` message is already rendered, its braces are literal text.
fn escape_braces(message: &str) -> String {
    message.replace('{', "{{").replace('}', "}}")
}

impl<S> Layer<S> for LokiLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else {
            return;
        };
        let mut visitor = FieldVisitor::default();
        attrs.record(&mut visitor);
        span.extensions_mut()
            .insert(SpanProperties(visitor.properties));
    }

    fn on_record(&self, id: &Id, values: &Record<'_>, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else {
            return;
        };
        let mut extensions = span.extensions_mut();
        let Some(SpanProperties(properties)) = extensions.get_mut::<SpanProperties>() else {
            return;
        };
        let mut visitor = FieldVisitor {
            properties: std::mem::take(properties),
            ..Default::default()
        };
        values.record(&mut visitor);
        *properties = visitor.properties;
    }

    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if self.is_ignored(metadata.target()) {
            return;
        }

        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        let message = visitor.message.as_deref().map(escape_braces).unwrap_or_default();
        let mut log_event = LogEvent::new(LogLevel::from(*metadata.level()), message);

        if let Some(scope) = ctx.event_scope(event) {
            for span in scope.from_root() {
                if let Some(SpanProperties(properties)) = span.extensions().get::<SpanProperties>() {
                    for (name, value) in properties {
                        log_event.add_or_update_property(name.clone(), value.clone());
                    }
                }
            }
        }
        for (name, value) in visitor.properties {
            log_event.add_or_update_property(name, value);
        }
        log_event.exception = visitor.exception;

        // The sink is gone, nothing left to do with the event
        let _ = self.handle.emit(log_event);
    }
}
