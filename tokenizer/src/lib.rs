//! Token counting for ctx.
//!
//! A [`Tokenizer`] counts tokens for one provider/model. Building one is
//! expensive (vocabulary load), so callers normally go through a
//! [`TokenizerCache`], which constructs at most one instance per model name and
//! hands out shared references.
//!
//! Counts are **approximate** for providers with proprietary tokenizers:
//!
//! - **Anthropic**: counted with `cl100k_base`; real counts may vary by ~5-10%
//! - **OpenAI**: `cl100k_base`
//! - **Gemini**: counted offline with `o200k_base`; real counts may vary by ~10-20%,
//!   more for non-English text and code
//!
//! Token ceilings are a safety heuristic, so this accuracy is sufficient.

mod cache;
mod provider;
mod tiktoken;

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

pub use cache::TokenizerCache;
pub use provider::{Provider, is_provider_supported, supported_providers};
pub use tiktoken::{Encoding, TiktokenTokenizer};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenizerError {
    #[error("model name cannot be empty")]
    EmptyModelName,
    #[error("unsupported provider: {provider} (supported: {})", supported_providers().join(", "))]
    UnsupportedProvider { provider: String },
    #[error("failed to load {encoding} encoding for {model}: {message}")]
    Encoding {
        model: String,
        encoding: Encoding,
        message: String,
    },
    #[error("failed to count tokens with {model}: {message}")]
    Count { model: String, message: String },
}

/// Counts tokens in text for one named model/provider.
///
/// Implementations are stateless from the caller's point of view and must be
/// usable from many threads at once without external locking.
pub trait Tokenizer: Send + Sync + fmt::Debug {
    fn count_tokens(&self, text: &str) -> Result<usize, TokenizerError>;

    fn model_name(&self) -> &str;
}

/// A tokenizer shared between invocations.
pub type SharedTokenizer = Arc<dyn Tokenizer>;

/// Builds a tokenizer for a model name. Used by [`TokenizerCache`] on a miss.
pub trait TokenizerFactory: Send + Sync {
    fn create_tokenizer(&self, model_name: &str) -> Result<SharedTokenizer, TokenizerError>;
}

/// Resolves provider names (case-insensitive) to tiktoken encodings.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultTokenizerFactory;

impl TokenizerFactory for DefaultTokenizerFactory {
    fn create_tokenizer(&self, model_name: &str) -> Result<SharedTokenizer, TokenizerError> {
        if model_name.trim().is_empty() {
            return Err(TokenizerError::EmptyModelName);
        }
        let provider = Provider::parse(model_name)?;
        let tokenizer = TiktokenTokenizer::new(model_name, provider.encoding())?;
        Ok(Arc::new(tokenizer))
    }
}

/// Build a tokenizer without going through a cache.
pub fn new_tokenizer(model_name: &str) -> Result<SharedTokenizer, TokenizerError> {
    DefaultTokenizerFactory.create_tokenizer(model_name)
}
