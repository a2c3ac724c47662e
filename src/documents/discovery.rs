//! Document discovery.
//!
//! Walks a root directory and lazily yields paths that follow the document
//! naming convention. Uses the `ignore` walker, so hidden entries and
//! `.gitignore` rules are honored even outside a git repository.

use std::path::{Path, PathBuf};

use ignore::WalkBuilder;
use ignore::overrides::OverrideBuilder;
use thiserror::Error;

use super::config::DiscoveryConfig;

/// Discovery failures that abort the scan of a root.
#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("Cannot read root directory {path}: {reason}")]
    RootUnreadable { path: PathBuf, reason: String },
}

/// Decides whether a path is a document by its file name.
#[derive(Debug, Clone, Default)]
pub struct FileMatcher {
    file_names: Vec<String>,
    suffixes: Vec<String>,
}

impl FileMatcher {
    pub fn new(config: &DiscoveryConfig) -> Self {
        Self {
            file_names: config.file_names.clone(),
            suffixes: config.suffixes.clone(),
        }
    }

    pub fn matches(&self, path: &Path) -> bool {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return false;
        };
        if name.starts_with('.') {
            return false;
        }
        self.file_names.iter().any(|n| n == name)
            || self
                .suffixes
                .iter()
                .any(|s| name.len() > s.len() && name.ends_with(s.as_str()))
    }
}

/// Scanner for document files under a root.
#[derive(Debug, Clone)]
pub struct Discovery {
    matcher: FileMatcher,
    exclude: Vec<String>,
}

impl Discovery {
    pub fn new(config: &DiscoveryConfig) -> Self {
        Self {
            matcher: FileMatcher::new(config),
            exclude: config.exclude.clone(),
        }
    }

    pub fn matcher(&self) -> &FileMatcher {
        &self.matcher
    }

    /// Start a scan of `root`.
    ///
    /// Fails only if the root itself cannot be read. Every call starts a
    /// fresh walk, so a scan can be repeated at any time.
    pub fn discover(&self, root: &Path) -> Result<DiscoveredPaths, DiscoveryError> {
        let root = check_root(root)?;

        let mut builder = WalkBuilder::new(&root);
        builder
            .hidden(true) // Skip hidden files and directories
            .git_ignore(true)
            .git_global(false)
            .git_exclude(true)
            .follow_links(false)
            .require_git(false)
            .sort_by_file_name(|a, b| a.cmp(b));

        if !self.exclude.is_empty() {
            let mut overrides = OverrideBuilder::new(&root);
            for pattern in &self.exclude {
                if let Err(e) = overrides.add(&format!("!{pattern}")) {
                    tracing::warn!(target: "discovery", "invalid exclude pattern '{pattern}': {e}");
                }
            }
            match overrides.build() {
                Ok(overrides) => {
                    builder.overrides(overrides);
                }
                Err(e) => {
                    tracing::warn!(target: "discovery", "ignoring exclude patterns: {e}");
                }
            }
        }

        crate::debug_event!("discovery", "scanning", "{}", root.display());

        Ok(DiscoveredPaths {
            walk: builder.build(),
            matcher: self.matcher.clone(),
            root,
        })
    }
}

impl Default for Discovery {
    fn default() -> Self {
        Self::new(&DiscoveryConfig::default())
    }
}

/// Canonicalize the root and verify it is a readable directory.
fn check_root(root: &Path) -> Result<PathBuf, DiscoveryError> {
    let unreadable = |reason: String| DiscoveryError::RootUnreadable {
        path: root.to_path_buf(),
        reason,
    };

    let canonical = root.canonicalize().map_err(|e| unreadable(e.to_string()))?;
    if !canonical.is_dir() {
        return Err(unreadable("not a directory".to_string()));
    }
    std::fs::read_dir(&canonical).map_err(|e| unreadable(e.to_string()))?;
    Ok(canonical)
}

/// Lazy sequence of discovered document paths, in lexical order.
pub struct DiscoveredPaths {
    walk: ignore::Walk,
    matcher: FileMatcher,
    root: PathBuf,
}

impl DiscoveredPaths {
    /// The canonical root being scanned.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl Iterator for DiscoveredPaths {
    type Item = PathBuf;

    fn next(&mut self) -> Option<PathBuf> {
        loop {
            let entry = match self.walk.next()? {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!(target: "discovery", "skipping unreadable entry: {e}");
                    continue;
                }
            };

            if !entry.file_type().is_some_and(|ft| ft.is_file()) {
                continue;
            }
            if self.matcher.matches(entry.path()) {
                return Some(entry.into_path());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn touch(root: &Path, rel: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "---\n---\n").unwrap();
    }

    fn relative(root: &Path, paths: Vec<PathBuf>) -> Vec<String> {
        let root = root.canonicalize().unwrap();
        paths
            .into_iter()
            .map(|p| {
                p.strip_prefix(&root)
                    .unwrap()
                    .to_string_lossy()
                    .replace('\\', "/")
            })
            .collect()
    }

    #[test]
    fn test_matcher() {
        let matcher = FileMatcher::new(&DiscoveryConfig::default());
        assert!(matcher.matches(Path::new("specs/E01/spec.md")));
        assert!(matcher.matches(Path::new("specs/E01-F02.spec.md")));
        assert!(!matcher.matches(Path::new("specs/E01/context.md")));
        assert!(!matcher.matches(Path::new("specs/README.md")));
        assert!(!matcher.matches(Path::new("specs/.spec.md")));
    }

    #[test]
    fn test_discover_matching_files_in_lexical_order() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        touch(root, "E02/spec.md");
        touch(root, "E01/F01/spec.md");
        touch(root, "E01/spec.md");
        touch(root, "E01/context.md");
        touch(root, "README.md");
        touch(root, "loose.spec.md");

        let discovery = Discovery::default();
        let found = relative(root, discovery.discover(root).unwrap().collect());

        assert_eq!(
            found,
            vec!["E01/F01/spec.md", "E01/spec.md", "E02/spec.md", "loose.spec.md"]
        );
    }

    #[test]
    fn test_discover_is_restartable() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "E01/spec.md");
        touch(dir.path(), "E02/spec.md");

        let discovery = Discovery::default();
        let first: Vec<_> = discovery.discover(dir.path()).unwrap().collect();
        let second: Vec<_> = discovery.discover(dir.path()).unwrap().collect();
        assert_eq!(first.len(), 2);
        assert_eq!(first, second);
    }

    #[test]
    fn test_hidden_and_excluded_skipped() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        touch(root, ".archive/E09/spec.md");
        touch(root, "drafts/E08/spec.md");
        touch(root, "E01/spec.md");

        let config = DiscoveryConfig {
            exclude: vec!["drafts/**".to_string()],
            ..Default::default()
        };
        let found = relative(root, Discovery::new(&config).discover(root).unwrap().collect());
        assert_eq!(found, vec!["E01/spec.md"]);
    }

    #[test]
    fn test_gitignore_respected() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fs::write(root.join(".gitignore"), "generated/\n").unwrap();
        touch(root, "generated/E05/spec.md");
        touch(root, "E01/spec.md");

        let found = relative(root, Discovery::default().discover(root).unwrap().collect());
        assert_eq!(found, vec!["E01/spec.md"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_subdirectory_skipped() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let root = dir.path();
        touch(root, "E01/spec.md");
        touch(root, "E02/locked/spec.md");
        touch(root, "E03/spec.md");

        let locked = root.join("E02/locked");
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();
        let denied = fs::read_dir(&locked).is_err();

        let found = relative(root, Discovery::default().discover(root).unwrap().collect());
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

        if denied {
            assert_eq!(found, vec!["E01/spec.md", "E03/spec.md"]);
        } else {
            // Privileged users read through mode bits
            assert_eq!(found, vec!["E01/spec.md", "E02/locked/spec.md", "E03/spec.md"]);
        }
    }

    #[test]
    fn test_missing_root_is_fatal() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope");
        let result = Discovery::default().discover(&missing);
        assert!(matches!(result, Err(DiscoveryError::RootUnreadable { .. })));
    }

    #[test]
    fn test_file_root_is_fatal() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("spec.md");
        fs::write(&file, "").unwrap();
        let result = Discovery::default().discover(&file);
        assert!(matches!(result, Err(DiscoveryError::RootUnreadable { .. })));
    }
}
