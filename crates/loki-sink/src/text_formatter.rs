// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::content::TempEntry;
use crate::errors::FormatError;
use crate::event::LogEvent;
use crate::label::LabelProvider;
use crate::router::LabelRouter;
use crate::template::LineFormatter;
use std::io::Write;
use std::sync::Arc;

/// Formats one event at a time into a [`TempEntry`] record, leaving the grouping into
/// streams to [`crate::batch_formatter::BatchFormatter::format_records`].
#[derive(Clone)]
pub struct TextFormatter {
    router: LabelRouter,
    line_formatter: Arc<dyn LineFormatter>,
}

impl TextFormatter {
    pub fn new(provider: Arc<dyn LabelProvider>, line_formatter: Arc<dyn LineFormatter>) -> Self {
        TextFormatter {
            router: LabelRouter::new(provider),
            line_formatter,
        }
    }

    #[must_use]
    pub fn label_provider(&self) -> &dyn LabelProvider {
        self.router.provider()
    }

    #[must_use]
    pub fn to_entry(&self, event: &LogEvent) -> TempEntry {
        let line = self.line_formatter.format_line(event);
        TempEntry::from(self.router.route(event, line))
    }

    pub fn format<W: Write>(&self, event: &LogEvent, output: &mut W) -> Result<(), FormatError> {
        serde_json::to_writer(output, &self.to_entry(event))?;
        Ok(())
    }

    pub fn format_to_string(&self, event: &LogEvent) -> Result<String, FormatError> {
        Ok(serde_json::to_string(&self.to_entry(event))?)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::event::LogLevel;
    use crate::label::{DefaultLabelProvider, LogLabel};
    use crate::template::MessageTemplateFormatter;
    use std::time::{Duration, UNIX_EPOCH};

    #[test]
    fn test_format_writes_record() {
        let formatter = TextFormatter::new(
            Arc::new(DefaultLabelProvider::default().with_properties_as_labels(["level", "RequestId"])),
            Arc::new(MessageTemplateFormatter::new("{Message:lj}")),
        );
        let event = LogEvent::new(LogLevel::Information, "handled")
            .with_timestamp(UNIX_EPOCH + Duration::from_millis(3))
            .with_property("RequestId", "abc123")
            .with_property("Method", "GET");

        let mut out = Vec::new();
        formatter.format(&event, &mut out).unwrap();
        let record: TempEntry = serde_json::from_slice(&out).unwrap();

        assert_eq!(record.ts, "3000000");
        assert_eq!(record.line, "handled Method=GET");
        assert_eq!(
            record.labels,
            vec![LogLabel::new("RequestId", "abc123"), LogLabel::new("level", "info")]
        );
    }
}
