//! Error types for runfiles discovery, manifest parsing, and lookup.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// A specialized [`std::result::Result`] type for runfiles operations.
pub type Result<T> = std::result::Result<T, RunfilesError>;

/// The error type for runfiles discovery, manifest parsing, and lookup.
#[derive(Debug, Error)]
pub enum RunfilesError {
    /// None of the discovery mechanisms produced a runfiles location.
    #[error("no runfiles found")]
    NoRunfiles,

    /// A lookup went through a default-constructed handle that never
    /// discovered a runfiles location.
    #[error("uninitialized Runfiles object")]
    Uninitialized,

    /// The lookup path was empty.
    #[error("runfiles path may not be empty")]
    EmptyPath,

    /// The lookup path contains a `..` segment.
    #[error(r#"runfiles path {0:?} must not contain ".." segments"#)]
    DotDotSegment(String),

    /// The lookup path contains a `.` segment.
    #[error(r#"runfiles path {0:?} must not contain "." segments"#)]
    DotSegment(String),

    /// The lookup path contains consecutive slashes.
    #[error(r#"runfiles path {0:?} must not contain "//""#)]
    EmptySegment(String),

    /// The lookup path starts with a backslash but carries no drive letter,
    /// which is ambiguously absolute on backslash-rooted filesystems.
    #[error("runfiles path {0:?} is absolute without a drive letter")]
    AbsoluteWithoutDrive(String),

    /// A repo mapping manifest line did not have three comma-separated
    /// fields.
    #[error("bad repo mapping line {line:?} in file {}", .path.display())]
    InvalidRepoMapping { path: PathBuf, line: String },

    /// A runfiles manifest line had an empty runfile path.
    #[error("bad runfiles manifest line {line:?} in file {}", .path.display())]
    InvalidManifest { path: PathBuf, line: String },

    /// The runfile is not listed by the active discovery strategy.
    #[error("runfile {name}: not found")]
    NotFound { name: String },

    /// The runfile is declared, but intentionally absent from the
    /// filesystem. Callers that treat such runfiles as optional can detect
    /// this case with [`RunfilesError::is_empty_runfile`].
    #[error("runfile {name}: empty runfile")]
    EmptyRunfile { name: String },

    /// An I/O failure while reading a manifest or opening a runfile.
    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl RunfilesError {
    /// Whether a lookup failed because the runfiles manifest maps the path
    /// to an intentionally empty runfile, as opposed to not listing it at
    /// all.
    pub fn is_empty_runfile(&self) -> bool {
        matches!(self, RunfilesError::EmptyRunfile { .. })
    }
}
