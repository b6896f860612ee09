// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Labels and the policy that decides which event properties become labels.

use crate::constants::DEFAULT_PROPERTIES_AS_LABELS;
use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// One Loki label dimension.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LogLabel {
    pub key: String,
    pub value: String,
}

impl LogLabel {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        LogLabel {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Policy deciding what happens to the properties of an event.
///
/// The strategy is fixed for the lifetime of a formatter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FormatterStrategy {
    /// Every property becomes a label.
    AllPropertiesAsLabels,
    /// Listed properties become labels, the others are dropped.
    SpecificPropertiesAsLabelsAndRestDiscarded,
    /// Listed properties become labels, the others are appended to the line.
    #[default]
    SpecificPropertiesAsLabelsAndRestAppended,
    /// Listed properties become labels, properties from the append list are appended to the
    /// line, the others are dropped.
    SpecificPropertiesAsLabelsOrAppended,
}

impl FromStr for FormatterStrategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "AllPropertiesAsLabels" => Ok(Self::AllPropertiesAsLabels),
            "SpecificPropertiesAsLabelsAndRestDiscarded" => {
                Ok(Self::SpecificPropertiesAsLabelsAndRestDiscarded)
            }
            "SpecificPropertiesAsLabelsAndRestAppended" => {
                Ok(Self::SpecificPropertiesAsLabelsAndRestAppended)
            }
            "SpecificPropertiesAsLabelsOrAppended" => Ok(Self::SpecificPropertiesAsLabelsOrAppended),
            other => Err(ConfigError::UnknownStrategy(other.to_string())),
        }
    }
}

/// Source of the global labels and of the routing policy.
pub trait LabelProvider: Send + Sync {
    /// Labels attached to every event.
    fn labels(&self) -> &[LogLabel];

    /// Property names sent as labels.
    fn properties_as_labels(&self) -> &[String];

    /// Property names appended to the line under
    /// [`FormatterStrategy::SpecificPropertiesAsLabelsOrAppended`].
    fn properties_to_append(&self) -> &[String];

    fn formatter_strategy(&self) -> FormatterStrategy;
}

/// Label provider backed by plain lists, with the service-wide label names as defaults.
#[derive(Debug, Clone)]
pub struct DefaultLabelProvider {
    labels: Vec<LogLabel>,
    properties_as_labels: Vec<String>,
    properties_to_append: Vec<String>,
    formatter_strategy: FormatterStrategy,
}

impl Default for DefaultLabelProvider {
    fn default() -> Self {
        DefaultLabelProvider {
            labels: Vec::new(),
            properties_as_labels: DEFAULT_PROPERTIES_AS_LABELS
                .iter()
                .map(ToString::to_string)
                .collect(),
            properties_to_append: Vec::new(),
            formatter_strategy: FormatterStrategy::default(),
        }
    }
}

impl DefaultLabelProvider {
    #[must_use]
    pub fn new(
        labels: Option<Vec<LogLabel>>,
        properties_as_labels: Option<Vec<String>>,
        properties_to_append: Option<Vec<String>>,
        formatter_strategy: FormatterStrategy,
    ) -> Self {
        let defaults = Self::default();
        DefaultLabelProvider {
            labels: labels.unwrap_or(defaults.labels),
            properties_as_labels: properties_as_labels.unwrap_or(defaults.properties_as_labels),
            properties_to_append: properties_to_append.unwrap_or(defaults.properties_to_append),
            formatter_strategy,
        }
    }

    #[must_use]
    pub fn with_labels(mut self, labels: Vec<LogLabel>) -> Self {
        self.labels = labels;
        self
    }

    #[must_use]
    pub fn with_properties_as_labels<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.properties_as_labels = names.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_properties_to_append<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.properties_to_append = names.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_formatter_strategy(mut self, formatter_strategy: FormatterStrategy) -> Self {
        self.formatter_strategy = formatter_strategy;
        self
    }
}

impl LabelProvider for DefaultLabelProvider {
    fn labels(&self) -> &[LogLabel] {
        &self.labels
    }

    fn properties_as_labels(&self) -> &[String] {
        &self.properties_as_labels
    }

    fn properties_to_append(&self) -> &[String] {
        &self.properties_to_append
    }

    fn formatter_strategy(&self) -> FormatterStrategy {
        self.formatter_strategy
    }
}
