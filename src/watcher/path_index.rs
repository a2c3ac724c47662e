//! Source path to document id correlation for the watcher.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Tracks which document id each watched file last produced.
///
/// Ordered by path so everything below a directory is one contiguous range.
#[derive(Debug, Default)]
pub struct PathIndex {
    ids: BTreeMap<PathBuf, String>,
}

impl PathIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `path` produced `id`, returning the id it produced before.
    pub fn insert(&mut self, path: PathBuf, id: String) -> Option<String> {
        self.ids.insert(path, id)
    }

    pub fn remove(&mut self, path: &Path) -> Option<String> {
        self.ids.remove(path)
    }

    pub fn get(&self, path: &Path) -> Option<&str> {
        self.ids.get(path).map(String::as_str)
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.ids.contains_key(path)
    }

    /// Tracked files strictly below `dir`.
    pub fn paths_under(&self, dir: &Path) -> Vec<PathBuf> {
        self.ids
            .range(dir.to_path_buf()..)
            .map(|(path, _)| path)
            .take_while(|path| path.starts_with(dir))
            .filter(|path| path.as_path() != dir)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Clear all entries and rebuild from the given pairs.
    pub fn rebuild(&mut self, entries: impl IntoIterator<Item = (PathBuf, String)>) {
        self.ids.clear();
        self.ids.extend(entries);
    }
}
