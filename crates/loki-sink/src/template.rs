// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Rendering of the log line before labels are routed.
//!
//! The default formatter follows an output template such as
//! `{Message:lj}{NewLine}{Exception}`. `{Message}` renders the event's own message template
//! with its `{Property}` holes filled in; the `l` format renders strings without quotes.

use crate::event::LogEvent;

/// Turns an event into the text of its log line.
pub trait LineFormatter: Send + Sync {
    fn format_line(&self, event: &LogEvent) -> String;
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Text(String),
    Hole { name: String, format: Option<String> },
}

impl Token {
    fn literal(format: Option<&str>) -> bool {
        format.is_some_and(|f| f.contains('l'))
    }
}

fn parse_template(template: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut text = String::new();
    let mut chars = template.char_indices().peekable();

    while let Some((start, c)) = chars.next() {
        match c {
            '{' if chars.peek().map(|(_, next)| *next) == Some('{') => {
                chars.next();
                text.push('{');
            }
            '}' if chars.peek().map(|(_, next)| *next) == Some('}') => {
                chars.next();
                text.push('}');
            }
            '{' => {
                let Some(end) = template[start..].find('}').map(|offset| start + offset) else {
                    // Unclosed hole, keep the rest as text
                    text.push_str(&template[start..]);
                    break;
                };
                let inner = &template[start + 1..end];
                let inner = inner.trim_start_matches(['@', '$']);
                let (name, format) = match inner.split_once(':') {
                    Some((name, format)) => (name, Some(format.to_string())),
                    None => (inner, None),
                };
                if !text.is_empty() {
                    tokens.push(Token::Text(std::mem::take(&mut text)));
                }
                tokens.push(Token::Hole {
                    name: name.to_string(),
                    format,
                });
                while chars.peek().is_some_and(|(index, _)| *index <= end) {
                    chars.next();
                }
            }
            other => text.push(other),
        }
    }
    if !text.is_empty() {
        tokens.push(Token::Text(text));
    }
    tokens
}

fn push_hole(out: &mut String, name: &str, format: Option<&str>) {
    out.push('{');
    out.push_str(name);
    if let Some(format) = format {
        out.push(':');
        out.push_str(format);
    }
    out.push('}');
}

/// Fills the holes of the event's message template with its property values. Holes without
/// a matching property are kept as written.
#[must_use]
pub fn render_message(event: &LogEvent, literal: bool) -> String {
    let mut out = String::with_capacity(event.message_template.len());
    for token in parse_template(&event.message_template) {
        match token {
            Token::Text(text) => out.push_str(&text),
            Token::Hole { name, format } => match event.property(&name) {
                Some(value) if literal || Token::literal(format.as_deref()) => {
                    out.push_str(&value.to_literal_string());
                }
                Some(value) => out.push_str(&value.to_string()),
                None => push_hole(&mut out, &name, format.as_deref()),
            },
        }
    }
    out
}

/// Line formatter driven by an output template.
#[derive(Debug, Clone)]
pub struct MessageTemplateFormatter {
    tokens: Vec<Token>,
}

impl MessageTemplateFormatter {
    #[must_use]
    pub fn new(output_template: &str) -> Self {
        MessageTemplateFormatter {
            tokens: parse_template(output_template),
        }
    }
}

impl Default for MessageTemplateFormatter {
    fn default() -> Self {
        MessageTemplateFormatter::new(crate::constants::DEFAULT_OUTPUT_TEMPLATE)
    }
}

impl LineFormatter for MessageTemplateFormatter {
    fn format_line(&self, event: &LogEvent) -> String {
        let mut out = String::new();
        for token in &self.tokens {
            match token {
                Token::Text(text) => out.push_str(text),
                Token::Hole { name, format } => {
                    let format = format.as_deref();
                    match name.as_str() {
                        "Message" => out.push_str(&render_message(event, Token::literal(format))),
                        "NewLine" => out.push('\n'),
                        "Exception" => {
                            if let Some(exception) = &event.exception {
                                out.push_str(exception);
                                out.push('\n');
                            }
                        }
                        "Level" => match format {
                            Some(f) if f.starts_with('u') => out.push_str(event.level.short_name()),
                            Some(f) if f.starts_with('w') => {
                                out.push_str(&event.level.short_name().to_lowercase());
                            }
                            _ => out.push_str(&format!("{:?}", event.level)),
                        },
                        "Timestamp" => out.push_str(&event.unix_millis().to_string()),
                        property => match event.property(property) {
                            Some(value) if Token::literal(format) => {
                                out.push_str(&value.to_literal_string());
                            }
                            Some(value) => out.push_str(&value.to_string()),
                            None => push_hole(&mut out, property, format),
                        },
                    }
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::LogLevel;

    #[test]
    fn test_parse_template() {
        assert_eq!(
            parse_template("a {B:lj} {{c}}"),
            vec![
                Token::Text("a ".to_string()),
                Token::Hole {
                    name: "B".to_string(),
                    format: Some("lj".to_string())
                },
                Token::Text(" {c}".to_string()),
            ]
        );
        assert_eq!(
            parse_template("open {hole"),
            vec![Token::Text("open {hole".to_string())]
        );
    }

    #[test]
    fn test_render_message() {
        let event = LogEvent::new(LogLevel::Information, "User {UserId} called {@Method} {Missing}")
            .with_property("UserId", 42_i64)
            .with_property("Method", "GET");
        assert_eq!(render_message(&event, true), "User 42 called GET {Missing}");
        assert_eq!(render_message(&event, false), "User 42 called \"GET\" {Missing}");
    }

    #[test]
    fn test_default_output_template() {
        let formatter = MessageTemplateFormatter::default();
        let event = LogEvent::new(LogLevel::Error, "Failed {Path}")
            .with_property("Path", "/orders")
            .with_exception("timeout");
        assert_eq!(formatter.format_line(&event), "Failed /orders\ntimeout\n");

        let event = LogEvent::new(LogLevel::Information, "Done");
        assert_eq!(formatter.format_line(&event), "Done\n");
    }

    #[test]
    fn test_level_and_property_tokens() {
        let formatter = MessageTemplateFormatter::new("[{Level:u3}] {Level} {RequestId} {Message}");
        let event = LogEvent::new(LogLevel::Warning, "slow").with_property("RequestId", "r1");
        assert_eq!(formatter.format_line(&event), "[WRN] Warning \"r1\" slow");

        let formatter = MessageTemplateFormatter::new("{Message} {Tenant:l}");
        assert_eq!(formatter.format_line(&event), "slow {Tenant:l}");
    }
}
