//! Configuration for the Pulse invocation layer.
//!
//! A configuration is resolved in layers: built-in defaults (or a named
//! profile), then any keys present in a YAML file. Keys absent from the file
//! keep the value of the layer below, so a file only needs to name what it
//! changes.

use pulse_adapters::{AgentBackend, InvokerConfig};
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

const MIB: usize = 1024 * 1024;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("unknown profile `{0}` (expected development, testing, staging or production)")]
    UnknownProfile(String),

    #[error("invalid configuration:\n  - {}", .0.join("\n  - "))]
    Invalid(Vec<String>),
}

/// Named deployment profiles with tuned defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    Development,
    Testing,
    Staging,
    Production,
}

impl Profile {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Testing => "testing",
            Self::Staging => "staging",
            Self::Production => "production",
        }
    }

    /// Defaults for this profile.
    pub fn config(self) -> PulseConfig {
        let base = PulseConfig {
            profile: Some(self),
            ..PulseConfig::default()
        };

        match self {
            Self::Development => PulseConfig {
                timeout_ms: 60_000,
                max_retries: 2,
                base_delay_ms: 500,
                rate_limit_ms: 50,
                ..base
            },
            Self::Testing => PulseConfig {
                timeout_ms: 5_000,
                max_retries: 1,
                base_delay_ms: 100,
                rate_limit_ms: 10,
                circuit_breaker: CircuitBreakerConfig {
                    failure_threshold: 2,
                    reset_timeout_ms: 5_000,
                    ..CircuitBreakerConfig::default()
                },
                ..base
            },
            Self::Staging => PulseConfig {
                timeout_ms: 120_000,
                circuit_breaker: CircuitBreakerConfig {
                    failure_threshold: 5,
                    reset_timeout_ms: 120_000,
                    ..CircuitBreakerConfig::default()
                },
                ..base
            },
            Self::Production => base,
        }
    }
}

impl FromStr for Profile {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "development" | "dev" => Ok(Self::Development),
            "testing" | "test" => Ok(Self::Testing),
            "staging" => Ok(Self::Staging),
            "production" | "prod" => Ok(Self::Production),
            other => Err(ConfigError::UnknownProfile(other.to_string())),
        }
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Circuit breaker thresholds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// Time after the last failure before a trial call is admitted.
    pub reset_timeout_ms: u64,
    /// Trial calls admitted while half-open.
    pub half_open_max_trials: u32,
    /// Whether output overflows count toward opening the circuit.
    pub count_buffer_overflow: bool,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            reset_timeout_ms: 60_000,
            half_open_max_trials: 1,
            count_buffer_overflow: true,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }
}

/// Echo detection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EchoConfig {
    /// Placeholder phrases an agent emits instead of an answer.
    pub phrases: Vec<String>,
    /// Also treat content starting with this many prompt characters as an echo.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefix_chars: Option<usize>,
}

impl Default for EchoConfig {
    fn default() -> Self {
        Self {
            phrases: vec!["peu tu recrie".to_string(), "peu tu recrire".to_string()],
            prefix_chars: None,
        }
    }
}

/// The agent CLI to invoke.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub command: String,
    pub args: Vec<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        let backend = AgentBackend::kilocode();
        Self {
            command: backend.command,
            args: backend.args,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PulseConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<Profile>,

    /// Hard deadline for one agent run.
    pub timeout_ms: u64,
    /// Attempts after the first.
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Minimum spacing between dispatches; 0 disables limiting.
    pub rate_limit_ms: u64,
    /// Ceiling on captured stdout bytes per run.
    pub max_buffer_size: usize,
    pub max_concurrent_requests: usize,
    /// Prompts longer than this many characters are piped from a temp file.
    pub large_prompt_threshold: usize,

    pub circuit_breaker: CircuitBreakerConfig,
    pub echo: EchoConfig,
    pub agent: AgentConfig,
}

impl Default for PulseConfig {
    fn default() -> Self {
        Self {
            profile: None,
            timeout_ms: 300_000,
            max_retries: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            rate_limit_ms: 100,
            max_buffer_size: 10 * MIB,
            max_concurrent_requests: 10,
            large_prompt_threshold: pulse_proto::DEFAULT_LARGE_PROMPT_THRESHOLD,
            circuit_breaker: CircuitBreakerConfig::default(),
            echo: EchoConfig::default(),
            agent: AgentConfig::default(),
        }
    }
}

impl PulseConfig {
    /// Parses YAML over the defaults of `profile`.
    ///
    /// `profile` wins over a `profile:` key in the document; with neither,
    /// the plain defaults are the base layer.
    pub fn from_yaml(yaml: &str, profile: Option<Profile>) -> Result<Self, ConfigError> {
        let overlay: Value = serde_yaml::from_str(yaml)?;

        let profile = match profile {
            Some(profile) => Some(profile),
            None => match overlay.get("profile").and_then(Value::as_str) {
                Some(name) => Some(name.parse()?),
                None => None,
            },
        };

        let base = profile.map_or_else(Self::default, Profile::config);
        let mut merged = serde_yaml::to_value(&base)?;
        merge_yaml(&mut merged, overlay);

        let mut config: Self = serde_yaml::from_value(merged)?;
        config.profile = profile;
        Ok(config)
    }

    /// Reads and parses a YAML file. See [`PulseConfig::from_yaml`].
    pub fn from_file(path: &Path, profile: Option<Profile>) -> Result<Self, ConfigError> {
        let yaml = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&yaml, profile)
    }

    /// Serializes the effective configuration.
    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Checks every field against its allowed range.
    ///
    /// Returns non-fatal warnings on success.
    pub fn validate(&self) -> Result<Vec<String>, ConfigError> {
        let mut errors = Vec::new();
        let breaker = &self.circuit_breaker;

        check_range(&mut errors, "timeout_ms", self.timeout_ms, 1_000, 600_000);
        check_range(&mut errors, "max_retries", self.max_retries, 0, 10);
        check_range(&mut errors, "base_delay_ms", self.base_delay_ms, 100, 10_000);
        check_range(&mut errors, "max_delay_ms", self.max_delay_ms, 1_000, 300_000);
        check_range(&mut errors, "rate_limit_ms", self.rate_limit_ms, 0, 10_000);
        check_range(&mut errors, "max_buffer_size", self.max_buffer_size, 1024, 100 * MIB);
        check_range(
            &mut errors,
            "max_concurrent_requests",
            self.max_concurrent_requests,
            1,
            100,
        );
        check_range(
            &mut errors,
            "circuit_breaker.failure_threshold",
            breaker.failure_threshold,
            1,
            20,
        );
        check_range(
            &mut errors,
            "circuit_breaker.reset_timeout_ms",
            breaker.reset_timeout_ms,
            5_000,
            600_000,
        );
        check_range(
            &mut errors,
            "circuit_breaker.half_open_max_trials",
            breaker.half_open_max_trials,
            1,
            10,
        );

        if self.base_delay_ms > self.max_delay_ms {
            errors.push(format!(
                "base_delay_ms ({}) must not exceed max_delay_ms ({})",
                self.base_delay_ms, self.max_delay_ms
            ));
        }
        if self.large_prompt_threshold == 0 {
            errors.push("large_prompt_threshold must be at least 1".to_string());
        }
        if self.agent.command.trim().is_empty() {
            errors.push("agent.command must not be empty".to_string());
        }

        if !errors.is_empty() {
            return Err(ConfigError::Invalid(errors));
        }

        let mut warnings = Vec::new();
        let total_timeout = self
            .timeout_ms
            .saturating_mul(u64::from(self.max_retries) + 1);
        if total_timeout > 600_000 {
            warnings.push(format!(
                "Maximum total timeout ({}s) exceeds 10 minutes",
                total_timeout / 1000
            ));
        }
        if self.rate_limit_ms > 0 && self.rate_limit_ms < 10 {
            warnings.push("Very aggressive rate limiting may impact performance".to_string());
        }
        if self.max_buffer_size < MIB {
            warnings.push("Small buffer size may truncate large responses".to_string());
        }

        Ok(warnings)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn rate_limit(&self) -> Duration {
        Duration::from_millis(self.rate_limit_ms)
    }

    /// The agent backend described by `agent` and `large_prompt_threshold`.
    pub fn backend(&self) -> AgentBackend {
        AgentBackend::custom(&self.agent.command, self.agent.args.iter().cloned())
            .with_large_prompt_threshold(self.large_prompt_threshold)
    }

    pub fn invoker_config(&self) -> InvokerConfig {
        InvokerConfig {
            timeout: self.timeout(),
            max_buffer_size: self.max_buffer_size,
        }
    }
}

fn check_range<T>(errors: &mut Vec<String>, field: &str, value: T, min: T, max: T)
where
    T: PartialOrd + fmt::Display,
{
    if value < min || value > max {
        errors.push(format!("{field} = {value} is outside {min}..={max}"));
    }
}

/// Recursively overlays `overlay` onto `base`. Mappings merge key by key;
/// any other value replaces the base value. Explicit nulls are ignored.
fn merge_yaml(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (_, Value::Null) => {}
        (Value::Mapping(base), Value::Mapping(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge_yaml(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_are_valid() {
        let config = PulseConfig::default();
        assert_eq!(config.timeout_ms, 300_000);
        assert_eq!(config.circuit_breaker.failure_threshold, 3);
        assert_eq!(config.agent.command, "kilocode");

        // 300s x 4 attempts
        let warnings = config.validate().unwrap();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("10 minutes"));
    }

    #[test]
    fn test_every_profile_validates() {
        for profile in [
            Profile::Development,
            Profile::Testing,
            Profile::Staging,
            Profile::Production,
        ] {
            let config = profile.config();
            assert_eq!(config.profile, Some(profile));
            config
                .validate()
                .unwrap_or_else(|e| panic!("{profile} profile invalid: {e}"));
        }
    }

    #[test]
    fn test_yaml_overlays_profile_defaults() {
        let yaml = r"
profile: testing
max_retries: 0
circuit_breaker:
  failure_threshold: 7
agent:
  command: claude
";
        let config = PulseConfig::from_yaml(yaml, None).unwrap();

        assert_eq!(config.profile, Some(Profile::Testing));
        assert_eq!(config.max_retries, 0);
        // From the testing profile
        assert_eq!(config.timeout_ms, 5_000);
        assert_eq!(config.circuit_breaker.reset_timeout_ms, 5_000);
        // Nested override keeps sibling keys
        assert_eq!(config.circuit_breaker.failure_threshold, 7);
        assert!(config.circuit_breaker.count_buffer_overflow);
        assert_eq!(config.agent.command, "claude");
        assert_eq!(config.agent.args, vec!["-m", "ask", "--auto", "--json"]);
    }

    #[test]
    fn test_explicit_profile_overrides_document() {
        let config = PulseConfig::from_yaml("profile: testing\n", Some(Profile::Staging)).unwrap();
        assert_eq!(config.profile, Some(Profile::Staging));
        assert_eq!(config.timeout_ms, 120_000);
    }

    #[test]
    fn test_empty_yaml_yields_defaults() {
        let config = PulseConfig::from_yaml("", None).unwrap();
        assert_eq!(config, PulseConfig::default());
    }

    #[test]
    fn test_unknown_profile_is_rejected() {
        let err = PulseConfig::from_yaml("profile: chaos\n", None).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownProfile(ref name) if name == "chaos"));
    }

    #[test]
    fn test_validate_collects_every_violation() {
        let config = PulseConfig {
            timeout_ms: 10,
            max_retries: 11,
            base_delay_ms: 5_000,
            max_delay_ms: 1_000,
            ..PulseConfig::default()
        };

        match config.validate().unwrap_err() {
            ConfigError::Invalid(errors) => {
                assert_eq!(errors.len(), 3, "{errors:?}");
                assert!(errors[0].starts_with("timeout_ms"));
                assert!(errors[1].starts_with("max_retries"));
                assert!(errors[2].contains("must not exceed"));
            }
            other => panic!("Expected Invalid, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_warnings() {
        let config = PulseConfig {
            timeout_ms: 10_000,
            rate_limit_ms: 5,
            max_buffer_size: 4096,
            ..PulseConfig::default()
        };
        let warnings = config.validate().unwrap();
        assert_eq!(warnings.len(), 2);

        let disabled = PulseConfig {
            timeout_ms: 10_000,
            rate_limit_ms: 0,
            ..PulseConfig::default()
        };
        assert!(disabled.validate().unwrap().is_empty());
    }

    #[test]
    fn test_from_file_and_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pulse.yml");
        let expected = Profile::Development.config();
        std::fs::write(&path, expected.to_yaml().unwrap()).unwrap();

        let loaded = PulseConfig::from_file(&path, None).unwrap();
        assert_eq!(loaded, expected);

        let missing = PulseConfig::from_file(&dir.path().join("nope.yml"), None).unwrap_err();
        assert!(matches!(missing, ConfigError::Io { .. }));
    }

    #[test]
    fn test_backend_and_invoker_config() {
        let config = PulseConfig {
            large_prompt_threshold: 42,
            timeout_ms: 2_000,
            ..PulseConfig::default()
        };
        let backend = config.backend();
        assert_eq!(backend.command, "kilocode");
        assert_eq!(backend.large_prompt_threshold, 42);
        assert_eq!(config.invoker_config().timeout, Duration::from_secs(2));
    }
}
