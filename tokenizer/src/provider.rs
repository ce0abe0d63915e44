use std::fmt;

use crate::{Encoding, TokenizerError};

const SUPPORTED_PROVIDERS: &[&str] = &["anthropic", "openai", "gemini"];

/// Provider family a model name resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Provider {
    #[default]
    Anthropic,
    OpenAI,
    Gemini,
}

impl Provider {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Anthropic => "anthropic",
            Provider::OpenAI => "openai",
            Provider::Gemini => "gemini",
        }
    }

    /// Encoding used to approximate this provider's tokenizer.
    #[must_use]
    pub fn encoding(&self) -> Encoding {
        match self {
            Provider::Anthropic | Provider::OpenAI => Encoding::Cl100kBase,
            Provider::Gemini => Encoding::O200kBase,
        }
    }

    /// Case-insensitive. Also accepts a few common aliases.
    pub fn parse(s: &str) -> Result<Self, TokenizerError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "anthropic" | "claude" => Ok(Provider::Anthropic),
            "openai" | "gpt" => Ok(Provider::OpenAI),
            "gemini" | "google" => Ok(Provider::Gemini),
            "" => Err(TokenizerError::EmptyModelName),
            _ => Err(TokenizerError::UnsupportedProvider {
                provider: s.trim().to_string(),
            }),
        }
    }

    #[must_use]
    pub fn all() -> &'static [Provider] {
        &[Provider::Anthropic, Provider::OpenAI, Provider::Gemini]
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[must_use]
pub fn supported_providers() -> &'static [&'static str] {
    SUPPORTED_PROVIDERS
}

#[must_use]
pub fn is_provider_supported(provider: &str) -> bool {
    Provider::parse(provider).is_ok()
}

#[cfg(test)]
mod tests {
    use super::{Provider, is_provider_supported, supported_providers};
    use crate::{Encoding, TokenizerError};

    #[test]
    fn parse_is_case_insensitive() {
        assert_eq!(Provider::parse("OpenAI").unwrap(), Provider::OpenAI);
        assert_eq!(Provider::parse("ANTHROPIC").unwrap(), Provider::Anthropic);
        assert_eq!(Provider::parse(" Gemini ").unwrap(), Provider::Gemini);
        assert_eq!(Provider::parse("claude").unwrap(), Provider::Anthropic);
    }

    #[test]
    fn parse_rejects_unknown() {
        assert!(matches!(
            Provider::parse("unknown-provider"),
            Err(TokenizerError::UnsupportedProvider { .. })
        ));
        assert_eq!(Provider::parse(""), Err(TokenizerError::EmptyModelName));
    }

    #[test]
    fn supported_list_matches_parse() {
        for name in supported_providers() {
            assert!(is_provider_supported(name));
            assert_eq!(Provider::parse(name).unwrap().as_str(), *name);
        }
        assert!(!is_provider_supported("mistral"));
        assert!(!is_provider_supported(""));
    }

    #[test]
    fn encodings_per_family() {
        assert_eq!(Provider::OpenAI.encoding(), Encoding::Cl100kBase);
        assert_eq!(Provider::Anthropic.encoding(), Encoding::Cl100kBase);
        assert_eq!(Provider::Gemini.encoding(), Encoding::O200kBase);
        assert_eq!(Provider::all().len(), supported_providers().len());
    }
}
