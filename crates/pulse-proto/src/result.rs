//! Strictly-typed sentiment result returned to callers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Summary used when the agent did not provide one.
pub const NO_SUMMARY: &str = "No summary available";

/// Market direction reported by the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Sentiment {
    Bullish,
    Bearish,
    #[default]
    Neutral,
}

impl FromStr for Sentiment {
    type Err = ();

    /// Case-insensitive; surrounding whitespace is ignored.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "BULLISH" => Ok(Self::Bullish),
            "BEARISH" => Ok(Self::Bearish),
            "NEUTRAL" => Ok(Self::Neutral),
            _ => Err(()),
        }
    }
}

impl fmt::Display for Sentiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Bullish => "BULLISH",
            Self::Bearish => "BEARISH",
            Self::Neutral => "NEUTRAL",
        })
    }
}

/// Risk assessment reported by the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Low,
    #[default]
    Medium,
    High,
}

impl FromStr for RiskLevel {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "LOW" => Ok(Self::Low),
            "MEDIUM" => Ok(Self::Medium),
            "HIGH" => Ok(Self::High),
            _ => Err(()),
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
        })
    }
}

/// The only value returned to callers on success.
///
/// `degraded` is set when one or more fields were missing or invalid in the
/// agent's payload and defaults were substituted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatedResult {
    pub sentiment: Sentiment,
    pub score: f64,
    pub risk_level: RiskLevel,
    pub catalysts: Vec<String>,
    pub summary: String,
    pub degraded: bool,
}

impl Default for ValidatedResult {
    fn default() -> Self {
        Self {
            sentiment: Sentiment::default(),
            score: 0.0,
            risk_level: RiskLevel::default(),
            catalysts: Vec::new(),
            summary: NO_SUMMARY.to_string(),
            degraded: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentiment_parses_case_insensitively() {
        assert_eq!("bullish".parse::<Sentiment>(), Ok(Sentiment::Bullish));
        assert_eq!(" Bearish ".parse::<Sentiment>(), Ok(Sentiment::Bearish));
        assert!("bull".parse::<Sentiment>().is_err());
    }

    #[test]
    fn test_risk_level_parses_case_insensitively() {
        assert_eq!("high".parse::<RiskLevel>(), Ok(RiskLevel::High));
        assert!("extreme".parse::<RiskLevel>().is_err());
    }

    #[test]
    fn test_result_serializes_uppercase_enums() {
        let result = ValidatedResult {
            sentiment: Sentiment::Bearish,
            score: -42.0,
            risk_level: RiskLevel::High,
            catalysts: vec!["Fed".to_string()],
            summary: "Hawkish tone".to_string(),
            degraded: false,
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["sentiment"], "BEARISH");
        assert_eq!(json["risk_level"], "HIGH");
        assert_eq!(json["degraded"], false);
    }
}
