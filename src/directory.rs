//! Directory-backed runfiles: logical paths resolve by joining onto the
//! runfiles root.

use std::path::PathBuf;

use crate::Resolution;

/// A runfiles directory, usually a Bazel-materialized symlink forest.
/// Resolution is a pure join; whether the joined path exists is the
/// caller's concern.
#[derive(Debug)]
pub(crate) struct Directory {
    root: PathBuf,
}

impl Directory {
    pub(crate) fn new(root: PathBuf) -> Directory {
        Directory { root }
    }

    pub(crate) fn resolve(&self, path: &str) -> Resolution {
        Resolution::Path(self.root.join(path))
    }
}
