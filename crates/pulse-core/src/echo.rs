//! Detection of agents that answer with the prompt instead of an analysis.

use crate::config::EchoConfig;

/// Recognizes echoed prompts and placeholder replies.
#[derive(Debug, Clone)]
pub struct EchoGuard {
    phrases: Vec<String>,
    prefix_chars: Option<usize>,
}

impl Default for EchoGuard {
    fn default() -> Self {
        Self::new(&EchoConfig::default())
    }
}

impl EchoGuard {
    pub fn new(config: &EchoConfig) -> Self {
        Self {
            phrases: config
                .phrases
                .iter()
                .map(|p| normalize(p))
                .filter(|p| !p.is_empty())
                .collect(),
            prefix_chars: config.prefix_chars.filter(|n| *n > 0),
        }
    }

    /// Whether `content` is an echo of `prompt` or a known placeholder.
    ///
    /// Comparison ignores case, surrounding whitespace and whitespace runs.
    pub fn is_echo(&self, content: &str, prompt: &str) -> bool {
        let content = normalize(content);
        if content.is_empty() {
            return false;
        }

        if self.phrases.iter().any(|p| content.contains(p.as_str())) {
            return true;
        }

        let prompt = normalize(prompt);
        if prompt.is_empty() {
            return false;
        }
        if content == prompt {
            return true;
        }

        match self.prefix_chars {
            Some(n) => {
                let prefix: String = prompt.chars().take(n).collect();
                // Prompts shorter than the prefix only match exactly (above).
                prefix.chars().count() == n && content.starts_with(&prefix)
            }
            None => false,
        }
    }
}

fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_echo_after_normalization() {
        let guard = EchoGuard::default();
        assert!(guard.is_echo(
            "  Analyze   the ES futures\nnews ",
            "analyze the es futures news"
        ));
        assert!(!guard.is_echo(
            r#"{"sentiment":"BULLISH"}"#,
            "analyze the es futures news"
        ));
    }

    #[test]
    fn test_placeholder_phrases() {
        let guard = EchoGuard::default();
        assert!(guard.is_echo("Peu tu recrire le texte ?", "anything"));
        assert!(guard.is_echo("bon, peu   tu RECRIE ça", "anything"));
    }

    #[test]
    fn test_custom_phrases_replace_defaults() {
        let guard = EchoGuard::new(&EchoConfig {
            phrases: vec!["Please provide the article".to_string(), "   ".to_string()],
            prefix_chars: None,
        });
        assert!(guard.is_echo("please provide the ARTICLE text", "p"));
        assert!(!guard.is_echo("peu tu recrire", "p"));
    }

    #[test]
    fn test_prefix_mode() {
        let guard = EchoGuard::new(&EchoConfig {
            phrases: Vec::new(),
            prefix_chars: Some(20),
        });
        let prompt = "Analyze the following market headlines and respond in JSON";

        assert!(guard.is_echo("Analyze the following market... (truncated)", prompt));
        assert!(!guard.is_echo("Analyze the market", prompt));
        // Short prompts never match by prefix
        assert!(!guard.is_echo("hi there", "hi"));
    }

    #[test]
    fn test_empty_inputs_are_not_echoes() {
        let guard = EchoGuard::default();
        assert!(!guard.is_echo("", ""));
        assert!(!guard.is_echo("   ", "prompt"));
        assert!(!guard.is_echo("some answer", ""));
    }
}
