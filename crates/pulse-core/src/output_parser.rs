//! Resolves raw agent output into a single candidate payload.
//!
//! Output is scanned with a fixed priority across *all* lines, so a metadata
//! event wins even when it arrives after a completion event:
//!
//! 1. metadata carrying result keys
//! 2. `completion_result` content with an embedded JSON object
//! 3. non-reasoning `say` content with an embedded JSON object
//! 4. the remaining free text, scanned as one blob
//!
//! Text channels (2-4) are checked for echoes first. An echoed candidate is
//! skipped; if nothing else yields a payload the call fails with
//! [`AgentError::EchoDetected`].

use crate::echo::EchoGuard;
use pulse_adapters::{AgentEvent, extract_json_object, parse_events};
use pulse_proto::AgentError;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use tracing::debug;

/// The channel a payload was extracted from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadSource {
    Metadata,
    CompletionResult,
    Say,
    RawText,
}

impl fmt::Display for PayloadSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Metadata => "metadata",
            Self::CompletionResult => "completion_result",
            Self::Say => "say",
            Self::RawText => "raw_text",
        })
    }
}

/// A value believed to be the agent's answer.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedPayload {
    pub value: Value,
    pub source: PayloadSource,
}

#[derive(Debug, Clone, Default)]
pub struct OutputParser {
    echo: EchoGuard,
}

impl OutputParser {
    pub fn new(echo: EchoGuard) -> Self {
        Self { echo }
    }

    /// Picks the payload out of `raw` for a request made with `prompt`.
    pub fn resolve(&self, raw: &str, prompt: &str) -> Result<ExtractedPayload, AgentError> {
        let cleaned = strip_ansi_escapes::strip_str(raw);
        let events: Vec<AgentEvent> = parse_events(&cleaned).collect();

        if let Some(fields) = events.iter().find_map(|event| match event {
            AgentEvent::Metadata { fields } => Some(fields),
            _ => None,
        }) {
            return Ok(found(Value::Object(fields.clone()), PayloadSource::Metadata));
        }

        let mut echo_seen = false;

        let completions = events.iter().filter_map(|event| match event {
            AgentEvent::CompletionResult { content } => Some(content.as_str()),
            _ => None,
        });
        if let Some(payload) =
            self.first_embedded(completions, prompt, PayloadSource::CompletionResult, &mut echo_seen)
        {
            return Ok(payload);
        }

        let says = events.iter().filter_map(|event| match event {
            AgentEvent::Say { content, .. } if !event.is_reasoning() => Some(content.as_str()),
            _ => None,
        });
        if let Some(payload) = self.first_embedded(says, prompt, PayloadSource::Say, &mut echo_seen) {
            return Ok(payload);
        }

        let blob = events
            .iter()
            .filter_map(|event| match event {
                AgentEvent::Unrecognized { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n");
        if let Some(payload) = self.first_embedded(
            std::iter::once(blob.as_str()),
            prompt,
            PayloadSource::RawText,
            &mut echo_seen,
        ) {
            return Ok(payload);
        }

        if echo_seen {
            return Err(AgentError::EchoDetected);
        }

        Err(AgentError::Parse(if events.is_empty() {
            "agent produced no output".to_string()
        } else {
            format!("no JSON object in {} output lines", events.len())
        }))
    }

    fn first_embedded<'a>(
        &self,
        candidates: impl Iterator<Item = &'a str>,
        prompt: &str,
        source: PayloadSource,
        echo_seen: &mut bool,
    ) -> Option<ExtractedPayload> {
        for content in candidates {
            if content.trim().is_empty() {
                continue;
            }
            if self.echo.is_echo(content, prompt) {
                debug!(source = %source, "Skipping echoed candidate");
                *echo_seen = true;
                continue;
            }
            if let Some(object) = extract_json_object(content) {
                return Some(found(Value::Object(object), source));
            }
        }
        None
    }
}

fn found(value: Value, source: PayloadSource) -> ExtractedPayload {
    debug!(source = %source, "Resolved agent payload");
    ExtractedPayload { value, source }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const PROMPT: &str = "Analyze these headlines and answer in JSON";

    fn resolve(raw: &str) -> Result<ExtractedPayload, AgentError> {
        OutputParser::default().resolve(raw, PROMPT)
    }

    #[test]
    fn test_metadata_wins_over_earlier_completion() {
        let raw = concat!(
            r#"{"type":"completion_result","content":"{\"sentiment\":\"BEARISH\"}"}"#,
            "\n",
            r#"{"type":"say","say":"text","metadata":{"sentiment":"BULLISH","score":60}}"#,
            "\n",
        );

        let payload = resolve(raw).unwrap();

        assert_eq!(payload.source, PayloadSource::Metadata);
        assert_eq!(payload.value["sentiment"], "BULLISH");
    }

    #[test]
    fn test_completion_wins_over_say_and_text() {
        let raw = concat!(
            r#"{"sentiment":"NEUTRAL"}"#,
            "\n",
            r#"{"type":"say","say":"text","content":"{\"sentiment\":\"BEARISH\"}"}"#,
            "\n",
            r#"{"type":"completion_result","content":"Final: {\"sentiment\":\"BULLISH\"}"}"#,
            "\n",
        );

        let payload = resolve(raw).unwrap();

        assert_eq!(payload.source, PayloadSource::CompletionResult);
        assert_eq!(payload.value, json!({"sentiment": "BULLISH"}));
    }

    #[test]
    fn test_reasoning_is_never_selected() {
        let raw = r#"{"type":"say","say":"reasoning","content":"{\"sentiment\":\"BULLISH\",\"score\":90}"}"#;
        assert!(matches!(resolve(raw), Err(AgentError::Parse(_))));
    }

    #[test]
    fn test_say_text_is_used_when_no_completion() {
        let raw = concat!(
            r#"{"type":"say","say":"reasoning","content":"{\"score\":1}"}"#,
            "\n",
            r#"{"type":"say","say":"text","content":"Result {\"score\":2}"}"#,
        );
        let payload = resolve(raw).unwrap();
        assert_eq!(payload.source, PayloadSource::Say);
        assert_eq!(payload.value["score"], 2);
    }

    #[test]
    fn test_raw_text_fallback_spans_lines_and_strips_ansi() {
        let raw = "\x1b[32mAnalysis complete\x1b[0m\n{\n  \"sentiment\": \"bearish\",\n  \"score\": -20\n}\n";

        let payload = resolve(raw).unwrap();

        assert_eq!(payload.source, PayloadSource::RawText);
        assert_eq!(payload.value["score"], -20);
    }

    #[test]
    fn test_known_json_events_are_excluded_from_blob() {
        // Typed lines are events, not free text, even when the type is unknown.
        let raw = r#"{"type":"api_req_started","score":5}"#;
        assert!(matches!(resolve(raw), Err(AgentError::Parse(_))));
    }

    #[test]
    fn test_bare_json_answer_is_raw_text() {
        let raw = "Loading...\n{\"sentiment\":\"BULLISH\",\"score\":15}\n";
        let payload = resolve(raw).unwrap();
        assert_eq!(payload.source, PayloadSource::RawText);
        assert_eq!(payload.value["score"], 15);
    }

    #[test]
    fn test_echo_without_other_payload_is_detected() {
        let raw = format!(
            "{}\n",
            json!({"type": "completion_result", "content": PROMPT})
        );
        assert!(matches!(resolve(&raw), Err(AgentError::EchoDetected)));

        let placeholder = r#"{"type":"say","say":"text","content":"Peu tu recrire ta question ?"}"#;
        assert!(matches!(resolve(placeholder), Err(AgentError::EchoDetected)));
    }

    #[test]
    fn test_echoed_candidate_is_skipped_for_later_payload() {
        let raw = format!(
            "{}\n{}\n",
            json!({"type": "completion_result", "content": PROMPT}),
            json!({"type": "say", "say": "text", "content": "{\"sentiment\":\"BULLISH\"}"}),
        );

        let payload = resolve(&raw).unwrap();

        assert_eq!(payload.source, PayloadSource::Say);
    }

    #[test]
    fn test_metadata_is_exempt_from_echo_check() {
        let raw = format!(
            "{}\n",
            json!({"type": "say", "content": PROMPT, "metadata": {"sentiment": "BEARISH"}})
        );
        assert_eq!(resolve(&raw).unwrap().source, PayloadSource::Metadata);
    }

    #[test]
    fn test_empty_output_is_parse_error() {
        match resolve("\n  \n") {
            Err(AgentError::Parse(msg)) => assert!(msg.contains("no output")),
            other => panic!("Expected Parse error, got {other:?}"),
        }
    }
}
