//! Agent event types for classifying NDJSON output.
//!
//! Agents invoked in JSON mode emit newline-delimited JSON events interleaved
//! with free-form text. Each line is classified exactly once into an
//! [`AgentEvent`]; lines that are not JSON degrade to
//! [`AgentEvent::Unrecognized`] instead of aborting the scan.

use serde::Deserialize;
use serde_json::{Map, Value};

/// Metadata keys that mark a metadata object as carrying the analysis.
pub const EXPECTED_RESULT_KEYS: [&str; 3] = ["sentiment", "score", "catalysts"];

/// `say` sub-kind carrying intermediate reasoning, never a final answer.
pub const REASONING_SAY_KIND: &str = "reasoning";

const COMPLETION_RESULT_TYPE: &str = "completion_result";
const SAY_TYPE: &str = "say";
/// Final event of `claude --output-format json`, answer in `result`.
const RESULT_TYPE: &str = "result";

/// One classified line of agent output.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    /// An event whose `metadata` object carries at least one expected result key.
    Metadata { fields: Map<String, Value> },

    /// `type: "completion_result"` with its text content (or a Claude
    /// `type: "result"` event with its `result` text).
    CompletionResult { content: String },

    /// `type: "say"` narrative output; `kind` is the `say` sub-kind.
    Say { kind: String, content: String },

    /// Well-formed JSON event of a shape we do not consume (progress, api
    /// request bookkeeping, etc.).
    Other,

    /// Free text, banners, partial lines, and JSON objects that are not
    /// events (no `type`), such as a bare answer printed on one line.
    Unrecognized { text: String },
}

/// The fields of a JSON event line we care about.
#[derive(Debug, Default, Deserialize)]
struct WireEvent {
    #[serde(rename = "type", default)]
    event_type: Option<String>,
    #[serde(default)]
    say: Option<String>,
    #[serde(default)]
    content: Option<Value>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    metadata: Option<Value>,
}

impl AgentEvent {
    /// Classifies a single line. Returns `None` for blank lines.
    pub fn classify(line: &str) -> Option<Self> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return None;
        }

        let object = match serde_json::from_str::<Value>(trimmed) {
            Ok(Value::Object(object)) => object,
            Ok(_) | Err(_) => {
                return Some(Self::Unrecognized {
                    text: trimmed.to_string(),
                });
            }
        };

        let wire = match serde_json::from_value::<WireEvent>(Value::Object(object)) {
            Ok(wire) => wire,
            Err(e) => {
                tracing::debug!("Skipping JSON event with unexpected field types: {}", e);
                return Some(Self::Other);
            }
        };

        if let Some(Value::Object(fields)) = wire.metadata
            && EXPECTED_RESULT_KEYS.iter().any(|k| fields.contains_key(*k))
        {
            return Some(Self::Metadata { fields });
        }

        let Some(event_type) = wire.event_type.as_deref() else {
            return Some(Self::Unrecognized {
                text: trimmed.to_string(),
            });
        };

        let content = if event_type == RESULT_TYPE {
            wire.result.as_ref()
        } else {
            wire.content.as_ref()
        }
        .and_then(Value::as_str)
        .map(str::to_string);

        match (event_type, content) {
            (COMPLETION_RESULT_TYPE | RESULT_TYPE, Some(content)) => {
                Some(Self::CompletionResult { content })
            }
            (SAY_TYPE, Some(content)) => Some(Self::Say {
                kind: wire.say.unwrap_or_default(),
                content,
            }),
            _ => Some(Self::Other),
        }
    }

    /// Whether this is intermediate reasoning that must never be a payload.
    pub fn is_reasoning(&self) -> bool {
        matches!(self, Self::Say { kind, .. } if kind == REASONING_SAY_KIND)
    }
}

/// Lazily classifies every non-blank line of `output`.
///
/// The iterator borrows `output`, so calling this again restarts the sequence.
pub fn parse_events(output: &str) -> impl Iterator<Item = AgentEvent> + '_ {
    output.lines().filter_map(AgentEvent::classify)
}

/// Finds the first balanced `{...}` span in `text` that parses as a JSON
/// object.
///
/// Brace matching is string-aware so braces inside JSON strings do not end
/// the span early. Spans that balance but fail to parse (decorative braces in
/// prose) are skipped and the scan resumes at the next opening brace.
pub fn extract_json_object(text: &str) -> Option<Map<String, Value>> {
    let bytes = text.as_bytes();
    let mut start = 0;

    while let Some(offset) = text[start..].find('{') {
        let open = start + offset;
        if let Some(close) = matching_brace(bytes, open)
            && let Ok(Value::Object(object)) = serde_json::from_str::<Value>(&text[open..=close])
        {
            return Some(object);
        }
        start = open + 1;
    }

    None
}

/// Index of the `}` closing the `{` at `open`, if the span balances.
fn matching_brace(bytes: &[u8], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(open) {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_metadata_event() {
        let line = r#"{"type":"say","say":"text","metadata":{"sentiment":"BULLISH","score":40}}"#;
        match AgentEvent::classify(line).unwrap() {
            AgentEvent::Metadata { fields } => {
                assert_eq!(fields["sentiment"], "BULLISH");
                assert_eq!(fields["score"], 40);
            }
            other => panic!("Expected Metadata event, got {other:?}"),
        }
    }

    #[test]
    fn test_metadata_without_expected_keys_falls_through_to_type() {
        let line = r#"{"type":"completion_result","content":"done","metadata":{"cost":0.1}}"#;
        assert_eq!(
            AgentEvent::classify(line),
            Some(AgentEvent::CompletionResult {
                content: "done".to_string()
            })
        );
    }

    #[test]
    fn test_classify_say_and_reasoning() {
        let text = AgentEvent::classify(r#"{"type":"say","say":"text","content":"hi"}"#).unwrap();
        assert!(!text.is_reasoning());

        let reasoning =
            AgentEvent::classify(r#"{"type":"say","say":"reasoning","content":"{\"a\":1}"}"#)
                .unwrap();
        assert!(reasoning.is_reasoning());
    }

    #[test]
    fn test_unknown_json_is_other_and_text_is_unrecognized() {
        assert_eq!(
            AgentEvent::classify(r#"{"type":"api_req_started","content":"x"}"#),
            Some(AgentEvent::Other)
        );
        assert_eq!(
            AgentEvent::classify(r#"{"type":"say","content":{"nested":true}}"#),
            Some(AgentEvent::Other)
        );
        assert_eq!(
            AgentEvent::classify("Loading model..."),
            Some(AgentEvent::Unrecognized {
                text: "Loading model...".to_string()
            })
        );
        assert_eq!(
            AgentEvent::classify("[1, 2, 3]"),
            Some(AgentEvent::Unrecognized {
                text: "[1, 2, 3]".to_string()
            })
        );
    }

    #[test]
    fn test_untyped_object_is_free_text() {
        let line = r#"{"sentiment":"BEARISH","score":-10}"#;
        assert_eq!(
            AgentEvent::classify(line),
            Some(AgentEvent::Unrecognized {
                text: line.to_string()
            })
        );
    }

    #[test]
    fn test_claude_result_event_is_completion() {
        let line = r#"{"type":"result","subtype":"success","result":"{\"score\":3}"}"#;
        assert_eq!(
            AgentEvent::classify(line),
            Some(AgentEvent::CompletionResult {
                content: r#"{"score":3}"#.to_string()
            })
        );
    }

    #[test]
    fn test_blank_lines_are_skipped() {
        assert!(AgentEvent::classify("").is_none());
        assert!(AgentEvent::classify("   \t").is_none());
        let events: Vec<_> = parse_events("\n\nplain\n\n").collect();
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_parse_events_is_restartable() {
        let output = "{\"type\":\"say\",\"say\":\"text\",\"content\":\"a\"}\nnoise\n";
        let first: Vec<_> = parse_events(output).collect();
        let second: Vec<_> = parse_events(output).collect();
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
    }

    #[test]
    fn test_extract_json_object_from_prose() {
        let text = r#"Here is the analysis: {"sentiment":"BEARISH","score":-30} hope it helps"#;
        let object = extract_json_object(text).unwrap();
        assert_eq!(object["sentiment"], "BEARISH");
    }

    #[test]
    fn test_extract_json_object_handles_nesting_and_strings() {
        let text = r#"{"summary":"brace } inside","meta":{"n":1}} trailing }"#;
        let object = extract_json_object(text).unwrap();
        assert_eq!(object["summary"], "brace } inside");
        assert_eq!(object["meta"]["n"], 1);
    }

    #[test]
    fn test_extract_json_object_skips_decorative_braces() {
        let text = r#"Use {placeholders} freely. Result: {"score": 12}"#;
        let object = extract_json_object(text).unwrap();
        assert_eq!(object["score"], 12);
    }

    #[test]
    fn test_extract_json_object_none_when_absent() {
        assert!(extract_json_object("no json here").is_none());
        assert!(extract_json_object("{ unterminated").is_none());
    }
}
