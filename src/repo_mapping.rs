//! The Bzlmod repository mapping: how each repository refers to its
//! dependencies by apparent name.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io;
use std::path::Path;

use tracing::debug;

use crate::error::{Result, RunfilesError};

/// Identifies how the repository `.0` refers to a dependency it calls `.1`.
pub(crate) type RepoMappingKey = (String, String);

/// Mapping entries shared by every repository whose canonical name starts
/// with `prefix`. Bazel emits these for extension-generated repositories,
/// which all see their parent module's dependencies the same way.
#[derive(Debug)]
struct PrefixMapping {
    prefix: String,
    mapping: HashMap<String, String>,
}

/// Two-level lookup table translating apparent repository names to the
/// canonical names runfiles are laid out under. The default value is the
/// empty mapping: every name is taken to be canonical already.
#[derive(Debug, Default)]
pub(crate) struct RepoMapping {
    exact: HashMap<RepoMappingKey, String>,
    // Sorted by prefix. The manifest producer guarantees that no prefix is
    // itself a prefix of another, so at most one entry can match a given
    // source repository and binary search finds it.
    prefixes: Vec<PrefixMapping>,
}

impl RepoMapping {
    /// Parses the repo mapping manifest at `path`.
    ///
    /// The manifest only exists for builds with Bzlmod enabled, so a file
    /// that does not exist yields the empty mapping. Any other read failure
    /// and any line with fewer than three comma-separated fields is an
    /// error: a mapping that loads partially would rewrite some lookups and
    /// silently misresolve others.
    pub(crate) fn parse(path: &Path) -> Result<RepoMapping> {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Ok(RepoMapping::default());
            }
            Err(e) => {
                return Err(RunfilesError::Io {
                    path: path.to_path_buf(),
                    source: e,
                });
            }
        };

        let mut exact = HashMap::new();
        let mut prefix_groups: BTreeMap<String, HashMap<String, String>> = BTreeMap::new();
        for line in contents.lines() {
            // Commas cannot be escaped, so the third field keeps any that
            // the target directory name contains.
            let fields: Vec<&str> = line.splitn(3, ',').collect();
            if fields.len() < 3 {
                return Err(RunfilesError::InvalidRepoMapping {
                    path: path.to_path_buf(),
                    line: line.to_owned(),
                });
            }
            let (source, apparent, target) = (fields[0], fields[1], fields[2]);
            match source.strip_suffix('*') {
                Some(prefix) => {
                    prefix_groups
                        .entry(prefix.to_owned())
                        .or_default()
                        .insert(apparent.to_owned(), target.to_owned());
                }
                None => {
                    exact.insert((source.to_owned(), apparent.to_owned()), target.to_owned());
                }
            }
        }

        // BTreeMap iteration yields prefixes in sorted order, which is what
        // the lookup's binary search requires.
        let prefixes: Vec<PrefixMapping> = prefix_groups
            .into_iter()
            .map(|(prefix, mapping)| PrefixMapping { prefix, mapping })
            .collect();

        debug!(
            "loaded repo mapping from {}: {} exact entries, {} prefix groups",
            path.display(),
            exact.len(),
            prefixes.len()
        );
        Ok(RepoMapping { exact, prefixes })
    }

    /// Looks up the runfiles directory of the repository that `source_repo`
    /// refers to as `apparent`. Exact entries win over prefix entries.
    pub(crate) fn get(&self, source_repo: &str, apparent: &str) -> Option<&str> {
        let key: RepoMappingKey = (source_repo.to_owned(), apparent.to_owned());
        if let Some(target) = self.exact.get(&key) {
            return Some(target);
        }
        // Every prefix sorts immediately before the strings it is a prefix
        // of, so the only candidate is the entry just before the insertion
        // point of `source_repo`. A source repo exactly equal to a prefix
        // sorts onto the entry itself and deliberately does not match it.
        let i = self
            .prefixes
            .partition_point(|entry| entry.prefix.as_str() < source_repo);
        if i > 0 {
            let entry = &self.prefixes[i - 1];
            if source_repo.starts_with(&entry.prefix) {
                return entry.mapping.get(apparent).map(String::as_str);
            }
        }
        None
    }

    /// Calls `visit` with every `(apparent name, runfiles directory)` pair
    /// visible to `source_repo`, in unspecified order.
    pub(crate) fn for_each_visible<F>(&self, source_repo: &str, mut visit: F)
    where
        F: FnMut(&str, &str),
    {
        for ((source, apparent), target) in &self.exact {
            if source == source_repo {
                visit(apparent, target);
            }
        }
        let i = self
            .prefixes
            .partition_point(|entry| entry.prefix.as_str() < source_repo);
        if i > 0 {
            let entry = &self.prefixes[i - 1];
            if source_repo.starts_with(&entry.prefix) {
                for (apparent, target) in &entry.mapping {
                    visit(apparent, target);
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn parse_lines(lines: &str) -> Result<RepoMapping> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("_repo_mapping");
        fs::write(&path, lines).unwrap();
        RepoMapping::parse(&path)
    }

    #[test]
    fn missing_file_is_the_empty_mapping() {
        let dir = tempfile::tempdir().unwrap();
        let mapping = RepoMapping::parse(&dir.path().join("_repo_mapping")).unwrap();
        assert_eq!(mapping.get("some_repo", "dep"), None);
    }

    #[test]
    fn exact_entries_resolve_per_source_repo() {
        let mapping = parse_lines(",main_ws,_main\ncanon_a,dep,canon_dep~1.0\n").unwrap();
        assert_eq!(mapping.get("", "main_ws"), Some("_main"));
        assert_eq!(mapping.get("canon_a", "dep"), Some("canon_dep~1.0"));
        assert_eq!(mapping.get("canon_a", "other"), None);
        assert_eq!(mapping.get("canon_b", "dep"), None);
    }

    #[test]
    fn malformed_line_is_fatal() {
        let err = parse_lines("canon_a,dep\n").unwrap_err();
        assert!(matches!(err, RunfilesError::InvalidRepoMapping { .. }));
    }

    #[test]
    fn blank_line_is_fatal() {
        let err = parse_lines("canon_a,dep,dir\n\ncanon_b,dep,dir\n").unwrap_err();
        assert!(matches!(
            err,
            RunfilesError::InvalidRepoMapping { line, .. } if line.is_empty()
        ));
    }

    #[test]
    fn target_keeps_embedded_commas() {
        let mapping = parse_lines("canon_a,dep,dir,with,commas\n").unwrap();
        assert_eq!(mapping.get("canon_a", "dep"), Some("dir,with,commas"));
    }

    #[test]
    fn duplicate_definitions_keep_the_last() {
        let mapping = parse_lines("canon_a,dep,first\ncanon_a,dep,second\n").unwrap();
        assert_eq!(mapping.get("canon_a", "dep"), Some("second"));

        let mapping = parse_lines("acme~*,dep,first\nacme~*,dep,second\n").unwrap();
        assert_eq!(mapping.get("acme~sub", "dep"), Some("second"));
    }

    #[test]
    fn prefix_entries_cover_generated_repos() {
        let mapping = parse_lines("acme~*,dep,acme_dir\nother~*,dep,other_dir\n").unwrap();
        assert_eq!(mapping.get("acme~foo", "dep"), Some("acme_dir"));
        assert_eq!(mapping.get("acme~foo~bar", "dep"), Some("acme_dir"));
        assert_eq!(mapping.get("other~x", "dep"), Some("other_dir"));
        assert_eq!(mapping.get("third~x", "dep"), None);
        // Sorts before every prefix, so no candidate exists.
        assert_eq!(mapping.get("aaa", "dep"), None);
        // Matches a prefix group, but not this apparent name.
        assert_eq!(mapping.get("acme~foo", "unknown"), None);
    }

    #[test]
    fn source_repo_equal_to_a_prefix_does_not_match_it() {
        let mapping = parse_lines("acme~*,dep,acme_dir\n").unwrap();
        assert_eq!(mapping.get("acme~", "dep"), None);
    }

    #[test]
    fn exact_entries_win_over_prefix_entries() {
        let mapping = parse_lines("acme~*,dep,prefix_dir\nacme~sub,dep,exact_dir\n").unwrap();
        assert_eq!(mapping.get("acme~sub", "dep"), Some("exact_dir"));
        assert_eq!(mapping.get("acme~other", "dep"), Some("prefix_dir"));
    }

    #[test]
    fn for_each_visible_unions_exact_and_prefix_entries() {
        let mapping = parse_lines(
            "canon_a,dep,dep_dir\ncanon_a,self,canon_a\ncanon_b,dep,other_dir\ncanon_*,gen,gen_dir\n",
        )
        .unwrap();

        let mut seen = BTreeMap::new();
        mapping.for_each_visible("canon_a", |apparent, target| {
            seen.insert(apparent.to_owned(), target.to_owned());
        });
        assert_eq!(
            seen,
            BTreeMap::from([
                ("dep".to_owned(), "dep_dir".to_owned()),
                ("self".to_owned(), "canon_a".to_owned()),
                ("gen".to_owned(), "gen_dir".to_owned()),
            ])
        );

        let mut count = 0;
        mapping.for_each_visible("unrelated", |_, _| count += 1);
        assert_eq!(count, 0);
    }
}
