//! tiktoken-backed tokenizers.

use std::fmt;

use tiktoken_rs::{CoreBPE, cl100k_base, o200k_base};

use crate::{Tokenizer, TokenizerError};

/// BPE vocabulary used for counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Encoding {
    Cl100kBase,
    O200kBase,
}

impl Encoding {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Encoding::Cl100kBase => "cl100k_base",
            Encoding::O200kBase => "o200k_base",
        }
    }

    fn load(self) -> Result<CoreBPE, String> {
        let loaded = match self {
            Encoding::Cl100kBase => cl100k_base(),
            Encoding::O200kBase => o200k_base(),
        };
        loaded.map_err(|e| e.to_string())
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Approximate token counter over one tiktoken encoding.
///
/// Construction loads the full vocabulary; share instances through
/// [`crate::TokenizerCache`] rather than building one per call.
pub struct TiktokenTokenizer {
    encoder: CoreBPE,
    encoding: Encoding,
    model_name: String,
}

impl fmt::Debug for TiktokenTokenizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TiktokenTokenizer")
            .field("encoder", &"<CoreBPE>")
            .field("encoding", &self.encoding)
            .field("model_name", &self.model_name)
            .finish()
    }
}

impl TiktokenTokenizer {
    pub fn new(model_name: impl Into<String>, encoding: Encoding) -> Result<Self, TokenizerError> {
        let model_name = model_name.into();
        let encoder = encoding.load().map_err(|message| {
            tracing::error!(model = %model_name, %encoding, "Failed to load tiktoken encoding: {message}");
            TokenizerError::Encoding {
                model: model_name.clone(),
                encoding,
                message,
            }
        })?;
        tracing::debug!(model = %model_name, %encoding, "Tokenizer constructed");
        Ok(Self {
            encoder,
            encoding,
            model_name,
        })
    }

    #[must_use]
    pub fn encoding(&self) -> Encoding {
        self.encoding
    }
}

impl Tokenizer for TiktokenTokenizer {
    fn count_tokens(&self, text: &str) -> Result<usize, TokenizerError> {
        Ok(self.encoder.encode_ordinary(text).len())
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}
