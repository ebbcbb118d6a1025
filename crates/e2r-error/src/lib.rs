#![forbid(unsafe_code)]
//! Error types for e2read.
//!
//! # Error Taxonomy
//!
//! e2read uses a two-layer error model:
//!
//! | Layer | Type | Crate | Purpose |
//! |-------|------|-------|---------|
//! | Parsing | `ParseError`, `AddressError` | `e2r-types` | Format violations and unaddressable inode/block numbers found while decoding bytes |
//! | Runtime | `E2rError` | `e2r-error` (this crate) | User-facing errors for the CLI and API consumers |
//!
//! `e2r-error` does not depend on `e2r-types`. The conversions into
//! `E2rError` are implemented in `e2r-core`, which depends on both crates.
//!
//! ## Classes
//!
//! Every variant belongs to exactly one [`ErrorClass`]:
//!
//! | Class | Variants | Meaning |
//! |-------|----------|---------|
//! | `Io` | `Io` | The image could not be read |
//! | `Format` | `Format`, `Corruption`, `InvalidGeometry`, `UnsupportedFeature` | The bytes do not describe a valid ext2 structure |
//! | `Address` | `Address` | An inode, group or block number falls outside the filesystem |
//! | `Lookup` | `NotFound`, `NotDirectory`, `IsDirectory`, `NotSymlink` | A name or path cannot be resolved as requested |
//!
//! None of these are retried. Decoders return the error to the caller and
//! never produce a partial result.
//!
//! ## errno Mapping
//!
//! | Variant | errno |
//! |---------|-------|
//! | `Io` | raw OS error, else `EIO` |
//! | `Corruption` | `EIO` |
//! | `Format` / `InvalidGeometry` / `Address` | `EINVAL` |
//! | `UnsupportedFeature` | `EOPNOTSUPP` |
//! | `NotFound` | `ENOENT` |
//! | `NotDirectory` | `ENOTDIR` |
//! | `IsDirectory` | `EISDIR` |
//! | `NotSymlink` | `EINVAL` |

use thiserror::Error;

/// Unified error type for all e2read operations.
#[derive(Debug, Error)]
pub enum E2rError {
    /// Operating system I/O error (wraps `std::io::Error`).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid metadata found at a known block while walking the image.
    #[error("corrupt metadata at block {block}: {detail}")]
    Corruption { block: u64, detail: String },

    /// The image structure is not valid ext2 (bad magic, truncated record,
    /// malformed directory record).
    #[error("invalid on-disk format: {0}")]
    Format(String),

    /// An inode, group or block number cannot be mapped into the image.
    #[error("address out of range: {0}")]
    Address(String),

    /// Superblock geometry is numerically invalid.
    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),

    /// The image requires a feature a read-only ext2 decoder cannot honour.
    #[error("unsupported feature: {0}")]
    UnsupportedFeature(String),

    /// Name or path component not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// A path component is not a directory.
    #[error("not a directory")]
    NotDirectory,

    /// Attempted a file operation on a directory.
    #[error("is a directory")]
    IsDirectory,

    /// Attempted to read a link target from a non-symlink inode.
    #[error("not a symbolic link")]
    NotSymlink,
}

/// Coarse grouping of [`E2rError`] variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Io,
    Format,
    Address,
    Lookup,
}

impl E2rError {
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Io(_) => ErrorClass::Io,
            Self::Corruption { .. }
            | Self::Format(_)
            | Self::InvalidGeometry(_)
            | Self::UnsupportedFeature(_) => ErrorClass::Format,
            Self::Address(_) => ErrorClass::Address,
            Self::NotFound(_) | Self::NotDirectory | Self::IsDirectory | Self::NotSymlink => {
                ErrorClass::Lookup
            }
        }
    }

    /// Convert this error into a POSIX errno.
    ///
    /// The mapping is exhaustive. Adding a variant without an errno is a
    /// compile error.
    #[must_use]
    pub fn to_errno(&self) -> libc::c_int {
        match self {
            Self::Io(err) => err.raw_os_error().unwrap_or(libc::EIO),
            Self::Corruption { .. } => libc::EIO,
            Self::Format(_) | Self::InvalidGeometry(_) | Self::Address(_) | Self::NotSymlink => {
                libc::EINVAL
            }
            Self::UnsupportedFeature(_) => libc::EOPNOTSUPP,
            Self::NotFound(_) => libc::ENOENT,
            Self::NotDirectory => libc::ENOTDIR,
            Self::IsDirectory => libc::EISDIR,
        }
    }
}

/// Result alias using `E2rError`.
pub type Result<T> = std::result::Result<T, E2rError>;
