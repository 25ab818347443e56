//! Error types for HDF5 format parsing and serialization.

#[cfg(not(feature = "std"))]
use alloc::string::String;

use core::fmt;

/// Errors that can occur while reading or writing HDF5 binary structures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    /// The HDF5 magic signature was not found at any valid offset.
    SignatureNotFound,
    /// The superblock version is not supported.
    UnsupportedSuperblockVersion(u8),
    /// Unexpected end of data.
    UnexpectedEof {
        /// Number of bytes expected.
        expected: usize,
        /// Number of bytes actually available.
        available: usize,
    },
    /// Invalid offset size (must be 2, 4, or 8).
    InvalidOffsetSize(u8),
    /// Invalid length size (must be 2, 4, or 8).
    InvalidLengthSize(u8),
    /// Jenkins lookup3 checksum mismatch.
    ChecksumMismatch {
        /// The checksum stored in the file.
        expected: u32,
        /// The checksum we computed.
        computed: u32,
    },
    /// Unknown datatype class.
    InvalidDatatypeClass(u8),
    /// Unsupported version for a datatype class.
    InvalidDatatypeVersion {
        /// Datatype class id.
        class: u8,
        /// Version found in the message.
        version: u8,
    },
    /// Unknown string padding value.
    InvalidStringPadding(u8),
    /// Unknown character set value.
    InvalidCharacterSet(u8),
    /// Unsupported dataspace message version.
    InvalidDataspaceVersion(u8),
    /// Invalid object header signature.
    InvalidObjectHeaderSignature,
    /// Invalid object header version.
    InvalidObjectHeaderVersion(u8),
    /// Unsupported link message version.
    InvalidLinkVersion(u8),
    /// Unknown link type.
    InvalidLinkType(u8),
    /// Unsupported attribute message version.
    InvalidAttributeVersion(u8),
    /// Unsupported data layout message version.
    InvalidLayoutVersion(u8),
    /// Unknown data layout class.
    InvalidLayoutClass(u8),
    /// B-tree node does not start with "TREE".
    InvalidBTreeSignature,
    /// B-tree node of an unexpected type.
    InvalidBTreeNodeType(u8),
    /// Global heap collection does not start with "GCOL".
    InvalidGlobalHeapSignature,
    /// Unsupported global heap version.
    InvalidGlobalHeapVersion(u8),
    /// A global heap ID points at an object that does not exist.
    GlobalHeapObjectNotFound {
        /// Address of the collection.
        collection: u64,
        /// Object index inside the collection.
        index: u32,
    },
    /// The file uses a feature this crate does not implement.
    UnsupportedFeature(&'static str),
    /// A buffer has the wrong number of bytes for its datatype and shape.
    DataSizeMismatch {
        /// Number of bytes required.
        expected: usize,
        /// Number of bytes supplied.
        actual: usize,
    },
    /// No object exists at the given path.
    ObjectNotFound(String),
    /// An object already exists at the given path.
    ObjectExists(String),
    /// A variable-length slot references a heap entry that does not exist.
    InvalidVlenReference(u64),
    /// A dataspace selection lies outside the extent of the dataset.
    SelectionOutOfBounds,
    /// A dataset cannot be extended beyond its maximum dimensions.
    ExtentExceedsMaximum,
    /// A name or string is not valid UTF-8.
    InvalidUtf8,
}

impl fmt::Display for FormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormatError::SignatureNotFound => {
                write!(f, "HDF5 signature not found at any valid offset")
            }
            FormatError::UnsupportedSuperblockVersion(v) => {
                write!(f, "unsupported superblock version: {v}")
            }
            FormatError::UnexpectedEof {
                expected,
                available,
            } => {
                write!(f, "unexpected EOF: need {expected} bytes, have {available}")
            }
            FormatError::InvalidOffsetSize(s) => {
                write!(f, "invalid offset size: {s} (must be 2, 4, or 8)")
            }
            FormatError::InvalidLengthSize(s) => {
                write!(f, "invalid length size: {s} (must be 2, 4, or 8)")
            }
            FormatError::ChecksumMismatch { expected, computed } => {
                write!(
                    f,
                    "checksum mismatch: expected {expected:#010x}, computed {computed:#010x}"
                )
            }
            FormatError::InvalidDatatypeClass(c) => write!(f, "invalid datatype class: {c}"),
            FormatError::InvalidDatatypeVersion { class, version } => {
                write!(f, "invalid version {version} for datatype class {class}")
            }
            FormatError::InvalidStringPadding(p) => write!(f, "invalid string padding: {p}"),
            FormatError::InvalidCharacterSet(c) => write!(f, "invalid character set: {c}"),
            FormatError::InvalidDataspaceVersion(v) => {
                write!(f, "invalid dataspace version: {v}")
            }
            FormatError::InvalidObjectHeaderSignature => {
                write!(f, "invalid object header signature")
            }
            FormatError::InvalidObjectHeaderVersion(v) => {
                write!(f, "invalid object header version: {v}")
            }
            FormatError::InvalidLinkVersion(v) => write!(f, "invalid link message version: {v}"),
            FormatError::InvalidLinkType(t) => write!(f, "invalid link type: {t}"),
            FormatError::InvalidAttributeVersion(v) => {
                write!(f, "invalid attribute message version: {v}")
            }
            FormatError::InvalidLayoutVersion(v) => write!(f, "invalid data layout version: {v}"),
            FormatError::InvalidLayoutClass(c) => write!(f, "invalid data layout class: {c}"),
            FormatError::InvalidBTreeSignature => write!(f, "invalid B-tree node signature"),
            FormatError::InvalidBTreeNodeType(t) => write!(f, "unexpected B-tree node type: {t}"),
            FormatError::InvalidGlobalHeapSignature => {
                write!(f, "invalid global heap collection signature")
            }
            FormatError::InvalidGlobalHeapVersion(v) => {
                write!(f, "invalid global heap version: {v}")
            }
            FormatError::GlobalHeapObjectNotFound { collection, index } => {
                write!(
                    f,
                    "global heap object {index} not found in collection at {collection:#x}"
                )
            }
            FormatError::UnsupportedFeature(what) => write!(f, "unsupported feature: {what}"),
            FormatError::DataSizeMismatch { expected, actual } => {
                write!(f, "data size mismatch: expected {expected} bytes, got {actual}")
            }
            FormatError::ObjectNotFound(path) => write!(f, "object not found: {path}"),
            FormatError::ObjectExists(path) => write!(f, "object already exists: {path}"),
            FormatError::InvalidVlenReference(idx) => {
                write!(f, "variable-length slot references missing heap entry {idx}")
            }
            FormatError::SelectionOutOfBounds => {
                write!(f, "selection lies outside the dataset extent")
            }
            FormatError::ExtentExceedsMaximum => {
                write!(f, "requested extent exceeds the maximum dimensions")
            }
            FormatError::InvalidUtf8 => write!(f, "invalid UTF-8 in name or string"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for FormatError {}
