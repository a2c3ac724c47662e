//! Error types for metadata validation, parsing and file access.

use std::path::PathBuf;
use thiserror::Error;

/// Metadata failed schema validation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Missing required field '{field}'")]
    MissingField { field: &'static str },

    #[error("Invalid id format in '{field}': {value:?}")]
    InvalidIdFormat { field: &'static str, value: String },

    #[error("Invalid value for '{field}': {value:?}")]
    InvalidEnumValue { field: &'static str, value: String },

    #[error("Field '{field}' must be {expected}")]
    InvalidFieldType {
        field: &'static str,
        expected: &'static str,
    },

    #[error("Document {id} declares type '{declared}' but its id implies '{implied}'")]
    InconsistentType {
        id: String,
        declared: String,
        implied: String,
    },
}

/// Content could not be turned into a parsed document.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("No metadata block found (expected a leading '---' delimited block)")]
    NoMetadataBlock,

    #[error("Metadata block contains no fields")]
    EmptyMetadata,

    #[error("Malformed metadata: {message}")]
    MetadataSyntax { message: String },

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// Why a document file could not be read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileAccessCause {
    NotFound,
    PermissionDenied,
    TimedOut,
    Io(String),
}

impl std::fmt::Display for FileAccessCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileAccessCause::NotFound => f.write_str("not found"),
            FileAccessCause::PermissionDenied => f.write_str("permission denied"),
            FileAccessCause::TimedOut => f.write_str("read timed out"),
            FileAccessCause::Io(msg) => f.write_str(msg),
        }
    }
}

impl From<&std::io::Error> for FileAccessCause {
    fn from(e: &std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::NotFound => FileAccessCause::NotFound,
            std::io::ErrorKind::PermissionDenied => FileAccessCause::PermissionDenied,
            std::io::ErrorKind::TimedOut => FileAccessCause::TimedOut,
            _ => FileAccessCause::Io(e.to_string()),
        }
    }
}

/// Errors from reading and parsing a document file.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DocumentError {
    #[error("Cannot read {path}: {cause}")]
    FileAccess {
        path: PathBuf,
        cause: FileAccessCause,
    },

    #[error(transparent)]
    Parse(#[from] ParseError),
}

impl DocumentError {
    pub fn file_access(path: impl Into<PathBuf>, err: &std::io::Error) -> Self {
        DocumentError::FileAccess {
            path: path.into(),
            cause: FileAccessCause::from(err),
        }
    }
}

/// Result type for document parsing operations.
pub type DocumentResult<T> = Result<T, DocumentError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_io_error_kinds_map_to_causes() {
        let cases = [
            (io::ErrorKind::NotFound, FileAccessCause::NotFound),
            (io::ErrorKind::PermissionDenied, FileAccessCause::PermissionDenied),
            (io::ErrorKind::TimedOut, FileAccessCause::TimedOut),
        ];
        for (kind, expected) in cases {
            let err = DocumentError::file_access("/specs/E01/spec.md", &io::Error::from(kind));
            assert_eq!(
                err,
                DocumentError::FileAccess {
                    path: PathBuf::from("/specs/E01/spec.md"),
                    cause: expected,
                }
            );
        }

        let other = io::Error::other("disk on fire");
        assert_eq!(
            FileAccessCause::from(&other),
            FileAccessCause::Io("disk on fire".to_string())
        );
    }

    #[test]
    fn test_permission_denied_message() {
        let err = DocumentError::file_access(
            "/specs/E01/spec.md",
            &io::Error::from(io::ErrorKind::PermissionDenied),
        );
        assert_eq!(
            err.to_string(),
            "Cannot read /specs/E01/spec.md: permission denied"
        );
    }
}
