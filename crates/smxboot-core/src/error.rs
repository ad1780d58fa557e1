//! Error types for smxboot-core

use std::path::PathBuf;

use thiserror::Error;

/// Coarse error classification, useful for callers that only care about
/// which stage of document processing failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Unknown, missing, or mistyped key inside a segment or header definition
    Schema,
    /// A reference names a segment that does not exist (or has the wrong kind)
    Reference,
    /// Malformed document structure or script command
    Parse,
    /// A referenced file is missing or unreadable
    Io,
}

/// Errors raised while parsing documents, validating segments, loading
/// payloads, or resolving scripts.
#[derive(Debug, Error)]
pub enum Error {
    /// Segment definition contains a key that is not part of its schema
    #[error("{segment}: unsupported property \"{field}\"")]
    UnknownKey { segment: String, field: String },

    /// Segment definition is missing a required key
    #[error("{segment}: required property \"{field}\" is not defined")]
    MissingKey { segment: String, field: String },

    /// Segment property has the wrong type or an unparsable value
    #[error("{segment}/{field}: {reason}")]
    InvalidValue {
        segment: String,
        field: String,
        reason: String,
    },

    /// A script command or composed segment references an unknown segment
    #[error("segment \"{name}\" does not exist in the document")]
    SegmentNotFound { name: String },

    /// Two segments share the same (name, kind) pair
    #[error("segment \"{name}\" is declared more than once")]
    DuplicateSegment { name: String },

    /// Document structure is malformed (missing section, bad composite key,
    /// unsupported platform, ...)
    #[error("parse error: {0}")]
    Parse(String),

    /// Script command text is malformed
    #[error("script \"{script}\", command \"{command}\": {reason}")]
    Command {
        script: String,
        command: String,
        reason: String,
    },

    /// A path did not resolve against the document base directory or the
    /// working directory
    #[error("path \"{0}\" does not exist")]
    PathNotFound(PathBuf),

    /// Reading a referenced file failed
    #[error("failed to read \"{path}\": {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A binary codec rejected its input
    #[error("{context}: {reason}")]
    Codec { context: String, reason: String },

    /// Operation requires a state the object is not in (e.g. resolving a
    /// script before the document was loaded)
    #[error("invalid state: {0}")]
    State(String),
}

impl Error {
    /// Map this error onto the coarse taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::UnknownKey { .. }
            | Error::MissingKey { .. }
            | Error::InvalidValue { .. }
            | Error::DuplicateSegment { .. } => ErrorKind::Schema,
            Error::SegmentNotFound { .. } => ErrorKind::Reference,
            Error::Parse(_) | Error::Command { .. } | Error::Codec { .. } | Error::State(_) => {
                ErrorKind::Parse
            }
            Error::PathNotFound(_) | Error::Io { .. } => ErrorKind::Io,
        }
    }
}

/// Result type alias using the core Error type
pub type Result<T> = std::result::Result<T, Error>;
