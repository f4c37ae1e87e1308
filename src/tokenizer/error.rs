//! Errors produced when encoding or decoding with the vocabulary.

use std::fmt;

/// Errors produced by the tokenizer module.
///
/// # Variants
///
/// - **UnknownToken**: A character outside the vocabulary was encountered
///   during encode. The vocabulary is fixed once built; unseen characters are
///   fatal rather than mapped to a fallback.
/// - **InvalidId**: A token id with no character form was passed to decode:
///   out of range, or the reserved sentinel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenizerError {
    /// A character not in the vocabulary was encountered during encode.
    UnknownToken(char),

    /// A token id without a character form was passed to decode.
    InvalidId(usize),
}

impl fmt::Display for TokenizerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenizerError::UnknownToken(c) => write!(f, "tokenizer: unknown character {c:?}"),
            TokenizerError::InvalidId(id) => write!(f, "tokenizer: invalid token id {id}"),
        }
    }
}

impl std::error::Error for TokenizerError {}
