//! Error taxonomy for the schema interpreter and its orchestration layer.
//!
//! Structural errors abort a traversal; CRC mismatches never do (they are
//! surfaced as flags instead, see [`crate::decoder::DecodeOutcome`]).

use std::fmt;
use std::io;

/// Where in the schema traversal an error occurred, for diagnostics.
#[derive(Clone, Debug, Default)]
pub struct FieldPath(pub Vec<String>);

impl FieldPath {
    pub fn push(&self, name: &str) -> Self {
        let mut v = self.0.clone();
        v.push(name.to_string());
        Self(v)
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("."))
    }
}

#[derive(Debug)]
pub enum CodecError {
    /// Input buffer shorter than a resolved length required.
    Truncated {
        path: FieldPath,
        offset: usize,
        needed: usize,
        available: usize,
    },
    /// Schema node missing required attributes, unknown data_type, or an
    /// arithmetic expression with an unresolved operand.
    SchemaError { path: FieldPath, message: String },
    /// String bytes failed to decode for the declared encoding, or a
    /// timestamp was malformed.
    DecodeError { path: FieldPath, message: String },
    /// A vendor-defined sub-traversal would exceed its declared length.
    Bounds { path: FieldPath, message: String },
    /// Filesystem read/write failure.
    Io(io::Error),
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated {
                path,
                offset,
                needed,
                available,
            } => write!(
                f,
                "TRUNCATED at {path} (offset 0x{offset:x}): need {needed} bytes, {available} available"
            ),
            Self::SchemaError { path, message } => {
                write!(f, "SCHEMA_ERROR at {path}: {message}")
            }
            Self::DecodeError { path, message } => {
                write!(f, "DECODE_ERROR at {path}: {message}")
            }
            Self::Bounds { path, message } => write!(f, "BOUNDS at {path}: {message}"),
            Self::Io(e) => write!(f, "IO_ERROR: {e}"),
        }
    }
}

impl std::error::Error for CodecError {}

impl From<io::Error> for CodecError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}
