//! Errors produced when loading or validating the training corpus.

use std::fmt;

/// Errors produced by the corpus loading module.
///
/// # Variants
///
/// - **Io**: The file could not be read (missing, unreadable, not UTF-8).
/// - **EmptyCorpus**: The file was read but yields no documents.
/// - **EmptyDocument**: A line was empty after trimming; every line must be
///   one non-empty training example.
#[derive(Debug)]
pub enum CorpusError {
    /// I/O error while reading the input file.
    Io(std::io::Error),

    /// The input file yields no non-empty lines.
    EmptyCorpus,

    /// A line was empty after trimming.
    EmptyDocument,
}

impl fmt::Display for CorpusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CorpusError::Io(e) => write!(f, "corpus io: {e}"),
            CorpusError::EmptyCorpus => write!(f, "corpus: input file has no documents"),
            CorpusError::EmptyDocument => write!(f, "corpus: empty line in input"),
        }
    }
}

impl std::error::Error for CorpusError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CorpusError::Io(e) => Some(e),
            CorpusError::EmptyCorpus | CorpusError::EmptyDocument => None,
        }
    }
}

impl From<std::io::Error> for CorpusError {
    fn from(e: std::io::Error) -> Self {
        CorpusError::Io(e)
    }
}
