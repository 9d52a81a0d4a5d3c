//! Normalizes an extracted payload into a [`ValidatedResult`].

use pulse_proto::{AgentError, NO_SUMMARY, RiskLevel, Sentiment, ValidatedResult};
use serde_json::{Map, Value};
use tracing::debug;

/// Default number of catalysts kept from a payload.
pub const MAX_CATALYSTS: usize = 5;

/// Schema check with defaulting.
///
/// Every missing or invalid field is replaced by its default and marks the
/// result `degraded`. Only a payload that is not a keyed structure at all is
/// rejected.
#[derive(Debug, Clone)]
pub struct ResultValidator {
    max_catalysts: usize,
}

impl Default for ResultValidator {
    fn default() -> Self {
        Self::new(MAX_CATALYSTS)
    }
}

impl ResultValidator {
    pub fn new(max_catalysts: usize) -> Self {
        Self { max_catalysts }
    }

    pub fn normalize(&self, payload: &Value) -> Result<ValidatedResult, AgentError> {
        let fields = match payload {
            Value::Object(fields) if !fields.is_empty() => fields,
            Value::Object(_) => return Err(AgentError::InvalidPayload("empty object".to_string())),
            other => {
                return Err(AgentError::InvalidPayload(format!(
                    "expected an object, got {}",
                    json_type(other)
                )));
            }
        };

        let mut defaulted = Vec::new();

        let sentiment = field_str(fields, "sentiment")
            .and_then(|s| s.parse::<Sentiment>().ok())
            .unwrap_or_else(|| {
                defaulted.push("sentiment");
                Sentiment::default()
            });

        let score = fields.get("score").and_then(Value::as_f64).unwrap_or_else(|| {
            defaulted.push("score");
            0.0
        });

        let risk_level = field_str(fields, "risk_level")
            .and_then(|s| s.parse::<RiskLevel>().ok())
            .unwrap_or_else(|| {
                defaulted.push("risk_level");
                RiskLevel::default()
            });

        let catalysts = match fields.get("catalysts") {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .take(self.max_catalysts)
                .map(str::to_string)
                .collect(),
            _ => {
                defaulted.push("catalysts");
                Vec::new()
            }
        };

        let summary = field_str(fields, "summary")
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map_or_else(
                || {
                    defaulted.push("summary");
                    NO_SUMMARY.to_string()
                },
                str::to_string,
            );

        let degraded = !defaulted.is_empty();
        if degraded {
            debug!(fields = ?defaulted, "Substituted defaults for missing or invalid fields");
        }

        Ok(ValidatedResult {
            sentiment,
            score,
            risk_level,
            catalysts,
            summary,
            degraded,
        })
    }
}

fn field_str<'a>(fields: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    fields.get(key).and_then(Value::as_str)
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
