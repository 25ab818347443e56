//! Error types for the high-level API.

use std::fmt;
use std::path::PathBuf;

use h5composites_format::error::FormatError;

use crate::dtype::DType;
use crate::printing::display;

/// Errors that can occur when using the high-level API.
#[derive(Debug)]
pub enum Error {
    /// I/O error from the filesystem.
    Io(std::io::Error),
    /// Low-level format parsing or serialization error.
    Format(FormatError),
    /// A file that should be created already exists.
    FileExists(PathBuf),
    /// The file was opened read-only.
    ReadOnly(PathBuf),
    /// No object with the given name exists in a group.
    NotFound(String),
    /// The named object exists but is of another kind.
    WrongObjectType {
        /// Name of the object.
        name: String,
        /// The kind that was requested.
        expected: &'static str,
    },
    /// Data of one type cannot be converted to another.
    InvalidConversion {
        /// Source datatype.
        src: DType,
        /// Target datatype.
        tgt: DType,
    },
    /// A datatype does not support the requested operation.
    DType(String),
    /// Misuse of a type register.
    Register(String),
    /// Objects could not be merged.
    Merge(String),
    /// A reader or writer was used in a state that does not allow it.
    InvalidState(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {e}"),
            Error::Format(e) => write!(f, "HDF5 format error: {e}"),
            Error::FileExists(path) => write!(f, "File {} already exists", path.display()),
            Error::ReadOnly(path) => write!(f, "File {} is open read-only", path.display()),
            Error::NotFound(name) => write!(f, "No object named '{name}'"),
            Error::WrongObjectType { name, expected } => {
                write!(f, "Object '{name}' is not a {expected}")
            }
            Error::InvalidConversion { src, tgt } => {
                write!(f, "{} -> {}", display(src), display(tgt))
            }
            Error::DType(msg)
            | Error::Register(msg)
            | Error::Merge(msg)
            | Error::InvalidState(msg) => f.write_str(msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Format(e) => Some(e),
            _ => None,
        }
    }
}

impl From<FormatError> for Error {
    fn from(e: FormatError) -> Self {
        Error::Format(e)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

/// Shorthand used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversion_error_names_both_types() {
        let err = Error::InvalidConversion {
            src: DType::native_f64(),
            tgt: DType::fixed_string(4),
        };
        assert_eq!(err.to_string(), "f64 -> string[4]");
    }

    #[test]
    fn format_errors_keep_their_source() {
        use std::error::Error as _;
        let err = Error::from(FormatError::SignatureNotFound);
        assert!(err.source().is_some());
        assert!(err.to_string().starts_with("HDF5 format error"));
    }
}
