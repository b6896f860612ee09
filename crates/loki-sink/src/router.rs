// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Label routing shared by the batch and the text formatter.
//!
//! Every property of an event, starting with the synthetic `level` property, is either sent
//! as a label, appended to the rendered line as ` name=value`, or discarded, according to
//! the [`FormatterStrategy`] of the label provider. Both formatters go through
//! [`LabelRouter::route`] so they always agree on labels and grouping keys.

use crate::constants::LEVEL_PROPERTY;
use crate::event::{unix_nanos_string, LogEvent};
use crate::label::{FormatterStrategy, LabelProvider, LogLabel};
use hashbrown::HashSet;
use lazy_static::lazy_static;
use regex::Regex;
use std::sync::Arc;

lazy_static! {
    // A single quoted token without whitespace, e.g. "GET"
    static ref QUOTED_TOKEN_REGEX: Regex =
        Regex::new(r#"^"(\S+)"$"#).expect("failed creating regex");
}

/// What to do with one event property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleAction {
    Discard,
    SendAsLabel,
    AppendToMessage,
}

/// An event after routing: its Loki timestamp, final line and sorted label set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutedEntry {
    pub timestamp: String,
    pub line: String,
    pub labels: Vec<LogLabel>,
}

impl RoutedEntry {
    #[must_use]
    pub fn grouping_key(&self) -> String {
        grouping_key(&self.labels)
    }
}

/// Builds the key identifying a stream: labels ordered by key and joined as
/// `k1=v1,k2=v2`. Labels sharing a key keep their relative order.
#[must_use]
pub fn grouping_key(labels: &[LogLabel]) -> String {
    let mut sorted: Vec<&LogLabel> = labels.iter().collect();
    sorted.sort_by(|a, b| a.key.cmp(&b.key));
    sorted
        .iter()
        .map(|label| format!("{}={}", label.key, label.value))
        .collect::<Vec<_>>()
        .join(",")
}

/// Policy engine turning event properties into labels and line suffixes.
#[derive(Clone)]
pub struct LabelRouter {
    provider: Arc<dyn LabelProvider>,
    strategy: FormatterStrategy,
    label_names: HashSet<String>,
    append_names: HashSet<String>,
}

impl std::fmt::Debug for LabelRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LabelRouter")
            .field("strategy", &self.strategy)
            .field("label_names", &self.label_names)
            .field("append_names", &self.append_names)
            .finish_non_exhaustive()
    }
}

impl LabelRouter {
    pub fn new(provider: Arc<dyn LabelProvider>) -> Self {
        let strategy = provider.formatter_strategy();
        let label_names = provider.properties_as_labels().iter().cloned().collect();
        let append_names = provider.properties_to_append().iter().cloned().collect();
        LabelRouter {
            provider,
            strategy,
            label_names,
            append_names,
        }
    }

    #[must_use]
    pub fn provider(&self) -> &dyn LabelProvider {
        self.provider.as_ref()
    }

    #[must_use]
    pub fn action_for(&self, property_name: &str) -> HandleAction {
        let is_label = self.label_names.contains(property_name);
        match self.strategy {
            FormatterStrategy::AllPropertiesAsLabels => HandleAction::SendAsLabel,
            FormatterStrategy::SpecificPropertiesAsLabelsAndRestDiscarded => {
                if is_label {
                    HandleAction::SendAsLabel
                } else {
                    HandleAction::Discard
                }
            }
            FormatterStrategy::SpecificPropertiesAsLabelsAndRestAppended => {
                if is_label {
                    HandleAction::SendAsLabel
                } else {
                    HandleAction::AppendToMessage
                }
            }
            FormatterStrategy::SpecificPropertiesAsLabelsOrAppended => {
                if is_label {
                    HandleAction::SendAsLabel
                } else if self.append_names.contains(property_name) {
                    HandleAction::AppendToMessage
                } else {
                    HandleAction::Discard
                }
            }
        }
    }

    /// Routes the `level` and every property of `event`. `rendered` is the line produced
    /// by the line formatter; appended properties are added to it.
    #[must_use]
    pub fn route(&self, event: &LogEvent, rendered: String) -> RoutedEntry {
        let mut labels = self.provider.labels().to_vec();
        let mut line = rendered;

        self.handle_property(LEVEL_PROPERTY, event.level.as_label(), &mut labels, &mut line);
        for (name, value) in event.properties() {
            self.handle_property(name, &value.to_string(), &mut labels, &mut line);
        }

        // Same order for the same label set, so Loki always hits the same chunk
        labels.sort_by(|a, b| a.key.cmp(&b.key));

        RoutedEntry {
            timestamp: unix_nanos_string(event.timestamp),
            line: normalize_newlines(&line),
            labels,
        }
    }

    fn handle_property(&self, name: &str, value: &str, labels: &mut Vec<LogLabel>, line: &mut String) {
        // Loki rejects \r\n
        let value = normalize_newlines(value);

        match self.action_for(name) {
            HandleAction::Discard => {}
            HandleAction::SendAsLabel => {
                labels.push(LogLabel::new(name, sanitize_label_value(&value)));
            }
            HandleAction::AppendToMessage => {
                line.push(' ');
                line.push_str(name);
                line.push('=');
                line.push_str(&unquote_value(&value));
            }
        }
    }
}

#[must_use]
pub fn normalize_newlines(value: &str) -> String {
    value.replace("\r\n", "\n")
}

/// Loki answers "bad request" to label values containing quotes or backslashes.
#[must_use]
pub fn sanitize_label_value(value: &str) -> String {
    value.replace('"', "").replace('\\', "/")
}

/// Removes the quotes around a single quoted token and resolves its escape sequences.
/// Anything else, including tokens with invalid escapes, is returned unchanged.
#[must_use]
pub fn unquote_value(value: &str) -> String {
    QUOTED_TOKEN_REGEX
        .captures(value)
        .and_then(|captures| captures.get(1))
        .and_then(|token| unescape(token.as_str()))
        .unwrap_or_else(|| value.to_string())
}

fn unescape(value: &str) -> Option<String> {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        let escaped = chars.next()?;
        match escaped {
            'n' => out.push('\n'),
            'r' => out.push('\r'),
            't' => out.push('\t'),
            'f' => out.push('\u{0c}'),
            'v' => out.push('\u{0b}'),
            'a' => out.push('\u{07}'),
            'e' => out.push('\u{1b}'),
            'b' => out.push('\u{08}'),
            '0'..='7' => out.push(read_octal(escaped, &mut chars)),
            'c' => out.push(read_control(chars.next()?)?),
            'u' => out.push(read_hex(&mut chars, 4)?),
            'x' => out.push(read_hex(&mut chars, 2)?),
            other if !other.is_alphanumeric() => out.push(other),
            _ => return None,
        }
    }
    Some(out)
}

/// Up to three octal digits, the first one already consumed. Only the low byte is kept.
fn read_octal(first: char, chars: &mut std::str::Chars<'_>) -> char {
    let mut value = first.to_digit(8).unwrap_or(0);
    for _ in 0..2 {
        match chars.clone().next().and_then(|c| c.to_digit(8)) {
            Some(digit) => {
                value = value * 8 + digit;
                chars.next();
            }
            None => break,
        }
    }
    char::from(u8::try_from(value & 0xff).unwrap_or(0))
}

/// `\cX`: the control character for letter or symbol `X`, e.g. `\cJ` is a line feed.
fn read_control(c: char) -> Option<char> {
    let code = u32::from(c.to_ascii_uppercase()).checked_sub(u32::from('@'))?;
    if code < 0x20 {
        char::from_u32(code)
    } else {
        None
    }
}

fn read_hex(chars: &mut std::str::Chars<'_>, digits: usize) -> Option<char> {
    let hex: String = chars.by_ref().take(digits).collect();
    if hex.len() != digits {
        return None;
    }
    u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::event::LogLevel;
    use crate::label::DefaultLabelProvider;

    fn router(provider: DefaultLabelProvider) -> LabelRouter {
        LabelRouter::new(Arc::new(provider))
    }

    #[test]
    fn test_actions_per_strategy() {
        let base = DefaultLabelProvider::default()
            .with_properties_as_labels(["RequestId"])
            .with_properties_to_append(["UserId"]);

        let all = router(base.clone().with_formatter_strategy(FormatterStrategy::AllPropertiesAsLabels));
        assert_eq!(all.action_for("Anything"), HandleAction::SendAsLabel);

        let discarded = router(
            base.clone()
                .with_formatter_strategy(FormatterStrategy::SpecificPropertiesAsLabelsAndRestDiscarded),
        );
        assert_eq!(discarded.action_for("RequestId"), HandleAction::SendAsLabel);
        assert_eq!(discarded.action_for("UserId"), HandleAction::Discard);

        let appended = router(
            base.clone()
                .with_formatter_strategy(FormatterStrategy::SpecificPropertiesAsLabelsAndRestAppended),
        );
        assert_eq!(appended.action_for("RequestId"), HandleAction::SendAsLabel);
        assert_eq!(appended.action_for("Other"), HandleAction::AppendToMessage);

        let or_appended = router(
            base.with_formatter_strategy(FormatterStrategy::SpecificPropertiesAsLabelsOrAppended),
        );
        assert_eq!(or_appended.action_for("RequestId"), HandleAction::SendAsLabel);
        assert_eq!(or_appended.action_for("UserId"), HandleAction::AppendToMessage);
        assert_eq!(or_appended.action_for("Other"), HandleAction::Discard);
    }

    #[test]
    fn test_route_labels_and_appended_properties() {
        let router = router(DefaultLabelProvider::default().with_properties_as_labels(["level", "RequestId"]));
        let event = LogEvent::new(LogLevel::Information, "")
            .with_property("RequestId", "abc123")
            .with_property("Method", "GET");

        let entry = router.route(&event, "Request handled".to_string());

        assert_eq!(
            entry.labels,
            vec![LogLabel::new("RequestId", "abc123"), LogLabel::new("level", "info")]
        );
        assert_eq!(entry.line, "Request handled Method=GET");
        assert_eq!(entry.grouping_key(), "RequestId=abc123,level=info");
    }

    #[test]
    fn test_global_labels_are_included() {
        let router = router(
            DefaultLabelProvider::default()
                .with_labels(vec![LogLabel::new("app", "orders")])
                .with_properties_as_labels(["level"]),
        );
        let entry = router.route(&LogEvent::new(LogLevel::Error, "boom"), "boom".to_string());
        assert_eq!(entry.grouping_key(), "app=orders,level=error");
    }

    #[test]
    fn test_label_values_are_sanitized() {
        let router = router(DefaultLabelProvider::default().with_properties_as_labels(["RequestPath"]));
        let event = LogEvent::new(LogLevel::Debug, "")
            .with_property("RequestPath", "C:\\temp\\logs");
        let entry = router.route(&event, String::new());
        let path = entry.labels.iter().find(|l| l.key == "RequestPath").unwrap();
        assert_eq!(path.value, "C:/temp/logs");
        assert_eq!(sanitize_label_value("\"quoted\""), "quoted");
    }

    #[test]
    fn test_crlf_is_normalized_in_labels_and_line() {
        let router = router(DefaultLabelProvider::default().with_properties_as_labels(["Label"]));
        let event = LogEvent::new(LogLevel::Warning, "")
            .with_property("Label", "one\r\ntwo")
            .with_property("Note", "a b\r\nc");
        let entry = router.route(&event, "first\r\nsecond".to_string());
        let label = entry.labels.iter().find(|l| l.key == "Label").unwrap();
        assert_eq!(label.value, "one\ntwo");
        assert!(!entry.line.contains('\r'));
        assert_eq!(entry.line, "first\nsecond level=warning Note=\"a b\nc\"");
    }

    #[test]
    fn test_discarded_level_never_becomes_label() {
        let router = router(
            DefaultLabelProvider::default()
                .with_properties_as_labels(Vec::<String>::new())
                .with_formatter_strategy(FormatterStrategy::SpecificPropertiesAsLabelsAndRestDiscarded),
        );
        let entry = router.route(&LogEvent::new(LogLevel::Fatal, "x"), "x".to_string());
        assert!(entry.labels.is_empty());
        assert_eq!(entry.line, "x");
    }

    #[test]
    fn test_route_labels_or_appended() {
        let router = router(
            DefaultLabelProvider::default()
                .with_properties_as_labels(["RequestId"])
                .with_properties_to_append(["UserId"])
                .with_formatter_strategy(FormatterStrategy::SpecificPropertiesAsLabelsOrAppended),
        );
        let event = LogEvent::new(LogLevel::Error, "")
            .with_property("RequestId", "r9")
            .with_property("UserId", "u1")
            .with_property("Secret", "hunter2");

        let entry = router.route(&event, "login failed".to_string());

        assert_eq!(entry.labels, vec![LogLabel::new("RequestId", "r9")]);
        assert_eq!(entry.line, "login failed UserId=u1");
        assert!(!entry.line.contains("Secret"));
        assert!(!entry.line.contains("level"));
    }

    #[test]
    fn test_unquote_value() {
        assert_eq!(unquote_value("\"GET\""), "GET");
        assert_eq!(unquote_value("\"a\\\"b\""), "a\"b");
        assert_eq!(unquote_value("\"tab\\there\""), "tab\there");
        assert_eq!(unquote_value("\"\\u0041BC\""), "ABC");
        assert_eq!(unquote_value("\"a\\bz\""), "a\u{08}z");
        assert_eq!(unquote_value("\"\\101\\0x\""), "A\u{0}x");
        assert_eq!(unquote_value("\"\\cJ\\cm\""), "\n\r");
        assert_eq!(unquote_value("\"\\c1\""), "\"\\c1\"");
        // Whitespace inside the quotes keeps the value as is
        assert_eq!(unquote_value("\"two words\""), "\"two words\"");
        // Invalid escape keeps the value as is
        assert_eq!(unquote_value("\"bad\\q\""), "\"bad\\q\"");
        assert_eq!(unquote_value("42"), "42");
    }

    #[test]
    fn test_grouping_key_is_order_independent() {
        let a = vec![LogLabel::new("b", "2"), LogLabel::new("a", "1")];
        let b = vec![LogLabel::new("a", "1"), LogLabel::new("b", "2")];
        assert_eq!(grouping_key(&a), grouping_key(&b));
        assert_eq!(grouping_key(&a), "a=1,b=2");
        assert_eq!(grouping_key(&[]), "");
    }
}
