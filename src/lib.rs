//! Runfiles lookup for Bazel-built binaries and tests.
//!
//! USAGE:
//!
//! 1. Depend on this runfiles library from your build rule:
//!
//!    ```python
//!    rust_binary(
//!        name = "my_binary",
//!        ...
//!        data = ["//path/to/my/data.txt"],
//!        deps = ["//tools/runfiles"],
//!    )
//!    ```
//!
//! 2. Create a [`Runfiles`] handle and look up runfile paths:
//!
//!    ```ignore
//!    use runfiles::{rlocation, Runfiles};
//!
//!    let r = Runfiles::create()?;
//!    let path = rlocation!(r, "my_workspace/path/to/my/data.txt")?;
//!    let data = std::fs::read_to_string(path)?;
//!    ```
//!
//! Discovery works uniformly across build actions, `bazel test`, and
//! `bazel run`: an explicit [`Builder`] option wins, then the
//! `RUNFILES_MANIFEST_FILE`, `RUNFILES_DIR`, and `JAVA_RUNFILES`
//! environment variables, then the conventional `<program>.runfiles_manifest`
//! and `<program>.runfiles` locations next to the running binary. Pass
//! [`Runfiles::env`] to subprocesses so they discover the same runfiles.
//!
//! The environment is read once, when a handle is built; later changes are
//! not observed. Handles are immutable, cheap to clone, and safe to share
//! across threads without synchronization.

mod directory;
mod error;
mod manifest;
mod repo_mapping;

use std::borrow::Cow;
use std::env;
use std::ffi::OsString;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::directory::Directory;
use crate::manifest::Manifest;
use crate::repo_mapping::RepoMapping;

pub use crate::error::{Result, RunfilesError};

const MANIFEST_FILE_VAR: &str = "RUNFILES_MANIFEST_FILE";
const DIRECTORY_VAR: &str = "RUNFILES_DIR";
const LEGACY_DIRECTORY_VAR: &str = "JAVA_RUNFILES";

// Runfiles-root-relative name under which Bazel materializes the repo
// mapping manifest of the main repository.
const REPO_MAPPING_RLOCATION: &str = "_repo_mapping";

/// Sentinel canonical repository name meaning "no rewriting requested". It
/// never appears as a source repository in any repo mapping, so lookups
/// made in its context treat every leading path segment as canonical.
pub const NO_SOURCE_REPO: &str = "_not_a_valid_repository_name";

/// Expands to the canonical name of the repository containing the calling
/// crate, as stamped by the build system at compile time, or
/// [`NO_SOURCE_REPO`] when the crate is built outside Bazel.
#[macro_export]
macro_rules! current_repository {
    () => {
        option_env!("REPOSITORY_NAME").unwrap_or($crate::NO_SOURCE_REPO)
    };
}

/// Looks up a runfile in the repository mapping context of the calling
/// crate's own repository, so apparent repository names in `path` resolve
/// the same way they do in the caller's build files.
///
/// ```ignore
/// use runfiles::{rlocation, Runfiles};
///
/// let r = Runfiles::create()?;
/// let path = rlocation!(r, "my_dep_workspace/file/to/load.txt")?;
/// ```
#[macro_export]
macro_rules! rlocation {
    ($r:expr, $path:expr) => {
        $r.rlocation_from($path, $crate::current_repository!())
    };
}

/// Outcome of resolving a logical path against a backing strategy, before
/// the originally requested name is attached to any failure.
#[derive(Debug)]
pub(crate) enum Resolution {
    Path(PathBuf),
    /// Listed with an explicitly empty physical path: declared, but
    /// intentionally absent from the filesystem.
    Empty,
    NotFound,
}

/// The discovery strategy backing a handle. A closed set: runfiles are
/// either indexed by a manifest file or laid out under a directory root.
#[derive(Debug)]
enum Backing {
    Manifest(Manifest),
    Directory(Directory),
}

impl Backing {
    fn resolve(&self, path: &str) -> Resolution {
        match self {
            Backing::Manifest(manifest) => manifest.resolve(path),
            Backing::Directory(directory) => directory.resolve(path),
        }
    }
}

/// Access to Bazel runfiles.
///
/// Obtain a handle with [`Runfiles::create`] or [`Runfiles::builder`]. The
/// default handle has no backing and fails every lookup with
/// [`RunfilesError::Uninitialized`].
#[derive(Debug, Clone, Default)]
pub struct Runfiles {
    backing: Option<Arc<Backing>>,
    repo_mapping: Arc<RepoMapping>,
    env: Vec<(OsString, OsString)>,
    source_repo: String,
}

impl Runfiles {
    /// Creates a handle using the standard discovery process. Equivalent to
    /// `Runfiles::builder().build()`.
    pub fn create() -> Result<Runfiles> {
        Builder::default().build()
    }

    /// Returns a [`Builder`] for customizing discovery.
    pub fn builder() -> Builder {
        Builder::default()
    }

    /// Returns the path of the runfile with the given runfiles-root-relative
    /// name, rewriting an apparent repository name in the first path segment
    /// through this handle's repository mapping context.
    ///
    /// `path` must be normalized: slash-separated, with no `.` or `..`
    /// segments and no repeated slashes. An absolute `path` is returned
    /// unchanged. The returned path is not checked for existence; with
    /// directory-backed runfiles a lookup of any well-formed name succeeds.
    ///
    /// Fails with an error satisfying [`RunfilesError::is_empty_runfile`]
    /// when the runfiles manifest maps `path` to an intentionally empty
    /// runfile, and with [`RunfilesError::NotFound`] when the manifest does
    /// not list `path` at all.
    pub fn rlocation(&self, path: &str) -> Result<PathBuf> {
        self.rlocation_from(path, &self.source_repo)
    }

    /// Like [`Runfiles::rlocation`], but resolves apparent repository names
    /// through the mapping of the given source repository instead of this
    /// handle's own context. Usually invoked through the [`rlocation!`]
    /// macro, which supplies the calling crate's repository.
    pub fn rlocation_from(&self, path: &str, source_repo: &str) -> Result<PathBuf> {
        let Some(backing) = self.backing.as_deref() else {
            return Err(RunfilesError::Uninitialized);
        };
        validate_path(path)?;
        if Path::new(path).is_absolute() {
            return Ok(PathBuf::from(path));
        }

        let mapped: Cow<str> = match path.split_once('/') {
            Some((head, rest)) => match self.repo_mapping.get(source_repo, head) {
                Some(target) => Cow::Owned(format!("{target}/{rest}")),
                // Not in the mapping: the first segment is taken to be a
                // canonical repository name already, so paths that need no
                // rewriting resolve unchanged.
                None => Cow::Borrowed(path),
            },
            // A single segment never names a runfile inside a repository.
            None => Cow::Borrowed(path),
        };

        match backing.resolve(&mapped) {
            Resolution::Path(resolved) => Ok(resolved),
            Resolution::Empty => Err(RunfilesError::EmptyRunfile {
                name: path.to_owned(),
            }),
            Resolution::NotFound => Err(RunfilesError::NotFound {
                name: path.to_owned(),
            }),
        }
    }

    /// Opens the runfile with the given runfiles-root-relative name.
    ///
    /// Resolution follows [`Runfiles::rlocation`]. Opening goes through the
    /// filesystem, so a directory-backed runfile that does not exist fails
    /// here rather than at resolution.
    pub fn open(&self, path: &str) -> Result<File> {
        let resolved = self.rlocation(path)?;
        File::open(&resolved).map_err(|source| RunfilesError::Io {
            path: resolved,
            source,
        })
    }

    /// Returns environment variables to pass to subprocesses so they
    /// discover the same runfiles. The returned vector is a fresh copy;
    /// callers may modify it freely. Empty for a default-constructed handle.
    pub fn env(&self) -> Vec<(OsString, OsString)> {
        self.env.clone()
    }

    /// Returns a handle identical to this one except that repository
    /// mappings are resolved in the context of `source_repo`. The backing
    /// and the mapping are shared with this handle, not re-read.
    pub fn with_source_repo(&self, source_repo: impl Into<String>) -> Runfiles {
        let mut view = self.clone();
        view.source_repo = source_repo.into();
        view
    }

    /// Calls `visit` with every `(apparent name, runfiles directory)` pair
    /// that the repository mapping makes visible to `source_repo`, in
    /// unspecified order. Visits nothing when the mapping is absent, as in
    /// builds without Bzlmod, or when the handle is default-constructed.
    pub fn for_each_visible_repo<F>(&self, source_repo: &str, visit: F)
    where
        F: FnMut(&str, &str),
    {
        self.repo_mapping.for_each_visible(source_repo, visit);
    }
}

/// Configures runfiles discovery for [`Runfiles`] handles.
///
/// Options take precedence over the corresponding environment variables.
/// The environment is consulted once, inside [`Builder::build`].
#[derive(Debug, Default)]
pub struct Builder {
    manifest_file: Option<PathBuf>,
    directory: Option<PathBuf>,
    program_name: Option<PathBuf>,
    source_repo: Option<String>,
}

impl Builder {
    /// Uses the given runfiles manifest file instead of consulting
    /// `RUNFILES_MANIFEST_FILE`.
    pub fn manifest_file(mut self, path: impl Into<PathBuf>) -> Builder {
        self.manifest_file = Some(path.into());
        self
    }

    /// Uses the given runfiles directory instead of consulting
    /// `RUNFILES_DIR` or `JAVA_RUNFILES`.
    pub fn directory(mut self, path: impl Into<PathBuf>) -> Builder {
        self.directory = Some(path.into());
        self
    }

    /// Uses the given path instead of `argv[0]` when probing the
    /// conventional `<program>.runfiles_manifest` and `<program>.runfiles`
    /// locations.
    pub fn program_name(mut self, path: impl Into<PathBuf>) -> Builder {
        self.program_name = Some(path.into());
        self
    }

    /// Resolves repository-qualified paths in the mapping context of the
    /// given canonical repository. Defaults to [`NO_SOURCE_REPO`]; prefer
    /// the [`rlocation!`] macro or [`Runfiles::with_source_repo`] for
    /// per-call-site contexts.
    pub fn source_repo(mut self, repo: impl Into<String>) -> Builder {
        self.source_repo = Some(repo.into());
        self
    }

    /// Discovers the runfiles location, loads the repository mapping, and
    /// captures the environment to hand to subprocesses.
    ///
    /// Fails with [`RunfilesError::NoRunfiles`] when no mechanism produces
    /// a location, and with a parse or I/O error when a configured manifest
    /// or the repo mapping cannot be loaded.
    pub fn build(self) -> Result<Runfiles> {
        let (backing, env) = self.discover()?;
        let repo_mapping = load_repo_mapping(&backing)?;
        let source_repo = self
            .source_repo
            .unwrap_or_else(|| NO_SOURCE_REPO.to_owned());
        Ok(Runfiles {
            backing: Some(Arc::new(backing)),
            repo_mapping: Arc::new(repo_mapping),
            env,
            source_repo,
        })
    }

    fn discover(&self) -> Result<(Backing, Vec<(OsString, OsString)>)> {
        if let Some(path) = self
            .manifest_file
            .clone()
            .or_else(|| env_path(MANIFEST_FILE_VAR))
        {
            return manifest_backing(&path);
        }

        if let Some(root) = self
            .directory
            .clone()
            .or_else(|| env_path(DIRECTORY_VAR))
            .or_else(|| env_path(LEGACY_DIRECTORY_VAR))
        {
            return Ok(directory_backing(root));
        }

        // Conventional locations next to the running program.
        if let Some(program) = self.program_name.clone().or_else(argv0) {
            let manifest = with_suffix(&program, ".runfiles_manifest");
            if manifest.is_file() {
                return manifest_backing(&manifest);
            }
            let root = with_suffix(&program, ".runfiles");
            if root.is_dir() {
                return Ok(directory_backing(root));
            }
        }

        Err(RunfilesError::NoRunfiles)
    }
}

fn manifest_backing(path: &Path) -> Result<(Backing, Vec<(OsString, OsString)>)> {
    let manifest = Manifest::parse(path)?;
    debug!("using manifest-backed runfiles from {}", path.display());
    let mut env = vec![(
        OsString::from(MANIFEST_FILE_VAR),
        path.as_os_str().to_owned(),
    )];
    // A manifest conventionally sits next to the runfiles directory it
    // indexes. Re-export the directory too, so that subprocesses which only
    // understand directory-backed runfiles see a consistent view.
    if let Some(root) = sibling_runfiles_dir(path) {
        env.push((OsString::from(DIRECTORY_VAR), root.as_os_str().to_owned()));
        env.push((
            OsString::from(LEGACY_DIRECTORY_VAR),
            root.into_os_string(),
        ));
    }
    Ok((Backing::Manifest(manifest), env))
}

fn directory_backing(root: PathBuf) -> (Backing, Vec<(OsString, OsString)>) {
    debug!("using directory-backed runfiles at {}", root.display());
    let env = vec![
        (OsString::from(DIRECTORY_VAR), root.as_os_str().to_owned()),
        (
            OsString::from(LEGACY_DIRECTORY_VAR),
            root.as_os_str().to_owned(),
        ),
    ];
    (Backing::Directory(Directory::new(root)), env)
}

/// Loads the repository mapping through the backing. The mapping manifest
/// only exists for builds with Bzlmod enabled, so failing to locate it
/// yields the empty mapping, while a mapping that exists but cannot be
/// parsed is an error.
fn load_repo_mapping(backing: &Backing) -> Result<RepoMapping> {
    match backing.resolve(REPO_MAPPING_RLOCATION) {
        Resolution::Path(path) => RepoMapping::parse(&path),
        Resolution::Empty | Resolution::NotFound => Ok(RepoMapping::default()),
    }
}

fn validate_path(path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(RunfilesError::EmptyPath);
    }
    if path.starts_with("../") || path.contains("/../") || path.ends_with("/..") {
        return Err(RunfilesError::DotDotSegment(path.to_owned()));
    }
    if path.starts_with("./") || path.contains("/./") || path.ends_with("/.") {
        return Err(RunfilesError::DotSegment(path.to_owned()));
    }
    if path.contains("//") {
        return Err(RunfilesError::EmptySegment(path.to_owned()));
    }
    // Rejected on every platform: such a path is absolute on backslash
    // filesystems but would be joined like a relative one elsewhere.
    if path.starts_with('\\') {
        return Err(RunfilesError::AbsoluteWithoutDrive(path.to_owned()));
    }
    Ok(())
}

fn env_path(var: &str) -> Option<PathBuf> {
    // An empty value is treated the same as an unset variable.
    env::var_os(var)
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
}

fn argv0() -> Option<PathBuf> {
    env::args_os().next().map(PathBuf::from)
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut joined = path.as_os_str().to_owned();
    joined.push(suffix);
    PathBuf::from(joined)
}

/// Returns the runfiles directory conventionally adjacent to a manifest
/// named `<dir>.runfiles_manifest` or `<dir>.runfiles/MANIFEST`, if that
/// directory exists.
fn sibling_runfiles_dir(manifest: &Path) -> Option<PathBuf> {
    let raw = manifest.to_str()?;
    let root = if let Some(stem) = raw.strip_suffix(".runfiles_manifest") {
        PathBuf::from(format!("{stem}.runfiles"))
    } else if let Some(stem) = raw
        .strip_suffix("/MANIFEST")
        .or_else(|| raw.strip_suffix(r"\MANIFEST"))
    {
        PathBuf::from(stem)
    } else {
        return None;
    };
    root.is_dir().then_some(root)
}

#[cfg(test)]
mod test {
    use super::*;

    use std::collections::HashMap;

    fn manifest_handle(entries: &[(&str, &str)]) -> Runfiles {
        let index: HashMap<String, String> = entries
            .iter()
            .map(|(logical, physical)| (logical.to_string(), physical.to_string()))
            .collect();
        Runfiles {
            backing: Some(Arc::new(Backing::Manifest(Manifest { index }))),
            repo_mapping: Arc::new(RepoMapping::default()),
            env: Vec::new(),
            source_repo: NO_SOURCE_REPO.to_owned(),
        }
    }

    #[test]
    fn rejects_unnormalized_paths() {
        let r = manifest_handle(&[("a/b", "c/d")]);
        assert!(matches!(r.rlocation(""), Err(RunfilesError::EmptyPath)));
        assert!(matches!(
            r.rlocation("../a"),
            Err(RunfilesError::DotDotSegment(_))
        ));
        assert!(matches!(
            r.rlocation("a/../b"),
            Err(RunfilesError::DotDotSegment(_))
        ));
        assert!(matches!(
            r.rlocation("a/.."),
            Err(RunfilesError::DotDotSegment(_))
        ));
        assert!(matches!(
            r.rlocation("./a"),
            Err(RunfilesError::DotSegment(_))
        ));
        assert!(matches!(
            r.rlocation("a/./b"),
            Err(RunfilesError::DotSegment(_))
        ));
        assert!(matches!(
            r.rlocation("a/."),
            Err(RunfilesError::DotSegment(_))
        ));
        assert!(matches!(
            r.rlocation("a//b"),
            Err(RunfilesError::EmptySegment(_))
        ));
        assert!(matches!(
            r.rlocation(r"\foo"),
            Err(RunfilesError::AbsoluteWithoutDrive(_))
        ));
    }

    #[test]
    fn dot_dot_wins_over_later_defects() {
        // Both defects are present; the dot-dot check runs first.
        let r = manifest_handle(&[]);
        assert!(matches!(
            r.rlocation("..//a"),
            Err(RunfilesError::DotDotSegment(_))
        ));
    }

    #[test]
    fn absolute_paths_pass_through_unchanged() {
        let r = manifest_handle(&[]);
        let abs = std::env::temp_dir().join("data.txt");
        let abs_str = abs.to_str().unwrap();
        assert_eq!(r.rlocation(abs_str).unwrap(), abs);
    }

    #[test]
    fn default_handle_fails_every_lookup() {
        let r = Runfiles::default();
        assert!(matches!(
            r.rlocation("a/b"),
            Err(RunfilesError::Uninitialized)
        ));
        assert!(matches!(
            r.rlocation_from("a/b", "canon_a"),
            Err(RunfilesError::Uninitialized)
        ));
        assert!(matches!(r.open("a/b"), Err(RunfilesError::Uninitialized)));
        assert!(r.env().is_empty());
    }

    #[test]
    fn manifest_lookup_distinguishes_empty_from_missing() {
        let r = manifest_handle(&[("a/b", "c/d"), ("pkg/empty.txt", "")]);
        assert_eq!(r.rlocation("a/b").unwrap(), PathBuf::from("c/d"));

        let err = r.rlocation("pkg/empty.txt").unwrap_err();
        assert!(err.is_empty_runfile());
        assert!(matches!(
            &err,
            RunfilesError::EmptyRunfile { name } if name == "pkg/empty.txt"
        ));

        let err = r.rlocation("pkg/missing.txt").unwrap_err();
        assert!(!err.is_empty_runfile());
        assert!(matches!(
            &err,
            RunfilesError::NotFound { name } if name == "pkg/missing.txt"
        ));
    }

    #[test]
    fn rlocation_macro_works_without_a_stamped_repository() {
        let r = manifest_handle(&[("a/b", "c/d")]);
        assert_eq!(rlocation!(r, "a/b").unwrap(), PathBuf::from("c/d"));
    }

    #[test]
    fn derived_views_share_the_backing_and_mapping() {
        let r = manifest_handle(&[("a/b", "c/d")]);
        let view = r.with_source_repo("canon_other");
        assert!(Arc::ptr_eq(
            r.backing.as_ref().unwrap(),
            view.backing.as_ref().unwrap()
        ));
        assert!(Arc::ptr_eq(&r.repo_mapping, &view.repo_mapping));
        // The original keeps answering in its own context.
        assert_eq!(r.source_repo, NO_SOURCE_REPO);
        assert_eq!(view.source_repo, "canon_other");
    }

    #[test]
    fn single_segment_paths_skip_the_mapping() {
        let r = manifest_handle(&[("data.txt", "/phys/data.txt")]);
        assert_eq!(
            r.rlocation("data.txt").unwrap(),
            PathBuf::from("/phys/data.txt")
        );
    }
}
