//! Corpus loading: one non-empty text line per training document.
//!
//! A [`Corpus`] is a validated, non-empty list of [`Document`]s. Shuffling is
//! the driver's responsibility (with a seeded RNG); loading itself is
//! deterministic and keeps file order.

mod error;

use std::fmt;
use std::fs;
use std::path::Path;

pub use error::CorpusError;

/// One training example: a single non-empty, trimmed line of the corpus.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Document(String);

impl Document {
    /// Creates a [`Document`] from a line (trimmed).
    ///
    /// # Errors
    ///
    /// Returns [`CorpusError::EmptyDocument`] when `line` is empty or only
    /// whitespace.
    pub fn new(line: &str) -> Result<Self, CorpusError> {
        let s = line.trim();
        if s.is_empty() {
            return Err(CorpusError::EmptyDocument);
        }
        Ok(Document(s.to_string()))
    }

    /// Returns the document text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A non-empty collection of training documents.
#[derive(Clone, Debug)]
pub struct Corpus(Vec<Document>);

impl Corpus {
    /// Builds a [`Corpus`] from pre-validated documents.
    ///
    /// # Errors
    ///
    /// Returns [`CorpusError::EmptyCorpus`] when `docs` is empty.
    pub fn new(docs: Vec<Document>) -> Result<Self, CorpusError> {
        if docs.is_empty() {
            return Err(CorpusError::EmptyCorpus);
        }
        Ok(Corpus(docs))
    }

    /// Reads a corpus from a UTF-8 file, one document per line.
    ///
    /// # Errors
    ///
    /// - [`CorpusError::Io`] when the path cannot be read.
    /// - [`CorpusError::EmptyDocument`] when a line trims to nothing.
    /// - [`CorpusError::EmptyCorpus`] when the file has no lines.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CorpusError> {
        let content = fs::read_to_string(path.as_ref())?;
        let docs: Result<Vec<Document>, CorpusError> =
            content.lines().map(Document::new).collect();
        Corpus::new(docs?)
    }

    /// Number of documents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always `false` for a constructed corpus; present for completeness.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The documents, in file order.
    #[must_use]
    pub fn documents(&self) -> &[Document] {
        &self.0
    }

    /// The document texts as string slices.
    #[must_use]
    pub fn lines(&self) -> Vec<&str> {
        self.0.iter().map(Document::as_str).collect()
    }
}
