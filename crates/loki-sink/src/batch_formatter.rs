// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Batch formatting: a flush worth of events becomes one Loki push payload.
//!
//! Events are sorted by timestamp, routed through the shared [`LabelRouter`] and coalesced
//! into streams by grouping key. The same grouping is available for the per-event records
//! written by [`crate::text_formatter::TextFormatter`], so labels can be computed when an
//! event is logged and grouping deferred to flush time.

use crate::content::{LokiContent, StreamGrouper, TempEntry};
use crate::errors::FormatError;
use crate::event::LogEvent;
use crate::label::{DefaultLabelProvider, LabelProvider};
use crate::router::{LabelRouter, RoutedEntry};
use crate::template::{LineFormatter, MessageTemplateFormatter};
use std::io::Write;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct BatchFormatter {
    router: LabelRouter,
    line_formatter: Arc<dyn LineFormatter>,
}

impl Default for BatchFormatter {
    fn default() -> Self {
        BatchFormatter::new(
            Arc::new(DefaultLabelProvider::default()),
            Arc::new(MessageTemplateFormatter::default()),
        )
    }
}

impl BatchFormatter {
    pub fn new(provider: Arc<dyn LabelProvider>, line_formatter: Arc<dyn LineFormatter>) -> Self {
        BatchFormatter {
            router: LabelRouter::new(provider),
            line_formatter,
        }
    }

    #[must_use]
    pub fn label_provider(&self) -> &dyn LabelProvider {
        self.router.provider()
    }

    /// Routes and groups `events`, oldest first. Events with equal timestamps keep their
    /// relative order.
    #[must_use]
    pub fn group_events(&self, events: &[LogEvent]) -> LokiContent {
        let mut ordered: Vec<&LogEvent> = events.iter().collect();
        ordered.sort_by_key(|event| event.timestamp);

        let mut grouper = StreamGrouper::default();
        for event in ordered {
            let line = self.line_formatter.format_line(event);
            grouper.push(self.router.route(event, line));
        }
        grouper.into_content()
    }

    /// Writes the push payload for `events`. Nothing is written for an empty batch.
    pub fn format<W: Write>(&self, events: &[LogEvent], output: &mut W) -> Result<(), FormatError> {
        if events.is_empty() {
            return Ok(());
        }
        let content = self.group_events(events);
        write_content(&content, output)
    }

    /// Groups serialized [`TempEntry`] records. Records that cannot be decoded, or whose
    /// timestamp is not a number, are skipped.
    #[must_use]
    pub fn group_records<I, S>(&self, records: I) -> LokiContent
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut entries: Vec<(i128, TempEntry)> = Vec::new();
        let mut skipped = 0usize;
        for record in records {
            let record = record.as_ref();
            if record.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<TempEntry>(record) {
                Ok(entry) => match entry.ts.parse::<i128>() {
                    Ok(ts) => entries.push((ts, entry)),
                    Err(_) => skipped += 1,
                },
                Err(e) => {
                    debug!("LOKI | Skipping malformed record: {e}");
                    skipped += 1;
                }
            }
        }
        if skipped > 0 {
            warn!("LOKI | Skipped {skipped} malformed log records");
        }

        entries.sort_by_key(|(ts, _)| *ts);

        let mut grouper = StreamGrouper::default();
        for (_, entry) in entries {
            grouper.push(RoutedEntry::from(entry));
        }
        grouper.into_content()
    }

    /// Writes the push payload for serialized records. Nothing is written when no record
    /// could be decoded.
    pub fn format_records<W, I, S>(&self, records: I, output: &mut W) -> Result<(), FormatError>
    where
        W: Write,
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let content = self.group_records(records);
        write_content(&content, output)
    }
}

fn write_content<W: Write>(content: &LokiContent, output: &mut W) -> Result<(), FormatError> {
    if content.streams.is_empty() {
        return Ok(());
    }
    serde_json::to_writer(&mut *output, content)?;
    output.flush()?;
    Ok(())
}
