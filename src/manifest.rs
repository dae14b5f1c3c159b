//! Manifest-backed runfiles: logical paths resolve through an in-memory
//! index parsed once at construction.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Result, RunfilesError};
use crate::Resolution;

/// Runfiles listed in a manifest file, one `logicalPath physicalPath` entry
/// per line. An empty physical path marks a runfile that is declared but
/// intentionally absent from the filesystem.
#[derive(Debug)]
pub(crate) struct Manifest {
    pub(crate) index: HashMap<String, String>,
}

impl Manifest {
    /// Parses the manifest at `path`. Every line must carry a non-empty
    /// logical path; the first space separates it from the physical path,
    /// which may itself contain spaces or be missing entirely.
    pub(crate) fn parse(path: &Path) -> Result<Manifest> {
        let contents = fs::read_to_string(path).map_err(|source| RunfilesError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let mut index = HashMap::new();
        for line in contents.lines() {
            let (logical, physical) = match line.split_once(' ') {
                Some(split) => split,
                // A line without a space lists a runfile with no physical
                // location, same as a trailing space would.
                None => (line, ""),
            };
            if logical.is_empty() {
                return Err(RunfilesError::InvalidManifest {
                    path: path.to_path_buf(),
                    line: line.to_owned(),
                });
            }
            index.insert(logical.to_owned(), physical.to_owned());
        }

        debug!(
            "parsed {} runfiles manifest entries from {}",
            index.len(),
            path.display()
        );
        Ok(Manifest { index })
    }

    /// Resolves a normalized logical path against the index.
    ///
    /// A runfile that lies under a directory which is itself a runfile is
    /// only listed through that directory, so ancestors are consulted on an
    /// exact miss and the remainder is re-joined onto the ancestor's
    /// physical location.
    pub(crate) fn resolve(&self, path: &str) -> Resolution {
        if let Some(physical) = self.index.get(path) {
            return resolution_for(physical);
        }
        let mut prefix = path;
        while let Some(cut) = prefix.rfind('/') {
            prefix = &prefix[..cut];
            if let Some(physical) = self.index.get(prefix) {
                if physical.is_empty() {
                    return Resolution::Empty;
                }
                // The remainder keeps its leading slash.
                return Resolution::Path(PathBuf::from(format!(
                    "{physical}{}",
                    &path[prefix.len()..]
                )));
            }
        }
        Resolution::NotFound
    }
}

fn resolution_for(physical: &str) -> Resolution {
    if physical.is_empty() {
        Resolution::Empty
    } else {
        Resolution::Path(PathBuf::from(physical))
    }
}
