//! Errors produced when saving or loading weight files.

use std::fmt;
use std::path::PathBuf;

/// Errors produced by the weights module.
///
/// # Variants
///
/// - **NotFound**: The weight file does not exist. Raised before any engine
///   work begins.
/// - **Io**: Any other I/O failure while reading or writing.
/// - **BadMagic**: The file does not start with the `GPT1` magic.
/// - **UnsupportedVersion**: The format version byte is not one this build
///   understands.
/// - **UnknownQuant**: The quantization byte names no known codec. This is
///   an explicit error; a file with an unknown codec never yields empty
///   tensors.
/// - **BadSettings**: The embedded settings JSON failed to parse.
/// - **MissingTensor**: The index lacks a tensor the settings require.
/// - **ShapeMismatch**: A tensor's recorded dimensions disagree with the
///   settings.
/// - **Truncated**: The file ended before the declared data did.
#[derive(Debug)]
pub enum WeightsError {
    /// The weight file does not exist.
    NotFound(PathBuf),

    /// I/O failure while reading or writing.
    Io(std::io::Error),

    /// The magic bytes do not identify a weight file.
    BadMagic([u8; 4]),

    /// The version byte is not supported.
    UnsupportedVersion(u8),

    /// The quantization byte names no known codec.
    UnknownQuant(u8),

    /// The settings metadata could not be parsed.
    BadSettings(serde_json::Error),

    /// A required tensor is absent from the file index.
    MissingTensor(String),

    /// A tensor's dimensions disagree with the settings.
    ShapeMismatch {
        /// Tensor name.
        name: String,
        /// Dimensions the settings imply.
        expected: Vec<usize>,
        /// Dimensions recorded in the file.
        found: Vec<usize>,
    },

    /// The file ended before the declared data did.
    Truncated,
}

impl fmt::Display for WeightsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WeightsError::NotFound(p) => write!(f, "weights: file not found: {}", p.display()),
            WeightsError::Io(e) => write!(f, "weights io: {e}"),
            WeightsError::BadMagic(m) => write!(f, "weights: bad magic {m:?}"),
            WeightsError::UnsupportedVersion(v) => {
                write!(f, "weights: unsupported format version {v}")
            }
            WeightsError::UnknownQuant(q) => {
                write!(f, "weights: unknown quantization type {q}")
            }
            WeightsError::BadSettings(e) => write!(f, "weights: bad settings metadata: {e}"),
            WeightsError::MissingTensor(name) => write!(f, "weights: missing tensor {name:?}"),
            WeightsError::ShapeMismatch {
                name,
                expected,
                found,
            } => write!(
                f,
                "weights: tensor {name:?} has shape {found:?}, expected {expected:?}"
            ),
            WeightsError::Truncated => write!(f, "weights: file is truncated"),
        }
    }
}

impl std::error::Error for WeightsError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            WeightsError::Io(e) => Some(e),
            WeightsError::BadSettings(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for WeightsError {
    fn from(e: std::io::Error) -> Self {
        WeightsError::Io(e)
    }
}
