// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Loki push payload model and the grouping of entries into streams.
//!
//! ```json
//! {"streams":[{"stream":{"level":"info"},"values":[["1700000000000000000","line"]]}]}
//! ```

use crate::label::LogLabel;
use crate::router::RoutedEntry;
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Entries sharing one exact label set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentStream {
    #[serde(rename = "stream")]
    labels: BTreeMap<String, String>,
    #[serde(rename = "values")]
    entries: Vec<[String; 2]>,
}

impl ContentStream {
    /// Later labels overwrite earlier ones with the same key.
    pub fn add_label(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.labels.insert(key.into(), value.into());
    }

    pub fn add_entry(&mut self, timestamp: String, line: String) {
        self.entries.push([timestamp, line]);
    }

    #[must_use]
    pub fn labels(&self) -> &BTreeMap<String, String> {
        &self.labels
    }

    #[must_use]
    pub fn entries(&self) -> &[[String; 2]] {
        &self.entries
    }
}

/// Body of a push request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LokiContent {
    pub streams: Vec<ContentStream>,
}

/// Per-event record written by the text formatter and grouped at flush time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TempEntry {
    pub ts: String,
    pub line: String,
    pub labels: Vec<LogLabel>,
}

impl From<RoutedEntry> for TempEntry {
    fn from(entry: RoutedEntry) -> Self {
        TempEntry {
            ts: entry.timestamp,
            line: entry.line,
            labels: entry.labels,
        }
    }
}

impl From<TempEntry> for RoutedEntry {
    fn from(entry: TempEntry) -> Self {
        RoutedEntry {
            timestamp: entry.ts,
            line: entry.line,
            labels: entry.labels,
        }
    }
}

/// Coalesces routed entries into streams sharing one exact label set. Streams keep the
/// order in which their label set was first seen; one grouper serves exactly one flush.
///
/// Streams are indexed by the label map itself rather than by
/// [`crate::router::grouping_key`], whose text form is ambiguous for values containing
/// `,` or `=`.
#[derive(Debug, Default)]
pub struct StreamGrouper {
    index: HashMap<BTreeMap<String, String>, usize>,
    streams: Vec<ContentStream>,
}

impl StreamGrouper {
    pub fn push(&mut self, entry: RoutedEntry) {
        let mut labels = BTreeMap::new();
        for label in entry.labels {
            labels.insert(label.key, label.value);
        }

        let position = match self.index.get(&labels) {
            Some(position) => *position,
            None => {
                self.streams.push(ContentStream {
                    labels: labels.clone(),
                    entries: Vec::new(),
                });
                self.index.insert(labels, self.streams.len() - 1);
                self.streams.len() - 1
            }
        };
        self.streams[position].add_entry(entry.timestamp, entry.line);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    /// Number of distinct streams seen so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.streams.len()
    }

    #[must_use]
    pub fn into_content(self) -> LokiContent {
        LokiContent {
            streams: self.streams,
        }
    }
}
