//! The in-memory document registry.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;

use crate::documents::{Document, Hierarchy, TreeNode};

use super::events::{EventBroadcaster, RegistryEvent};
use super::tree::build_forest;
use super::{DeleteOutcome, RegistryWarning, UpsertOutcome};

/// Maximum number of parent links followed when checking for cycles.
pub const MAX_CYCLE_DEPTH: usize = 64;

/// Both indices, always mutated together under the registry lock.
#[derive(Debug, Default)]
pub(super) struct RegistryState {
    pub(super) by_id: HashMap<String, Arc<Document>>,
    /// parent id -> child ids. Keyed by declared parent, present or not, so
    /// children reattach when a missing parent shows up.
    pub(super) children_of: HashMap<String, BTreeSet<String>>,
}

impl RegistryState {
    fn attach(&mut self, parent: &str, child: &str) {
        self.children_of
            .entry(parent.to_string())
            .or_default()
            .insert(child.to_string());
    }

    fn detach(&mut self, parent: &str, child: &str) {
        if let Some(children) = self.children_of.get_mut(parent) {
            children.remove(child);
            if children.is_empty() {
                self.children_of.remove(parent);
            }
        }
    }

    /// Follow parent links from `id` and return the chain if it comes back.
    fn find_cycle(&self, id: &str) -> Option<Vec<String>> {
        let mut chain = vec![id.to_string()];
        let mut current = self.by_id.get(id)?.parent_id()?;

        for _ in 0..MAX_CYCLE_DEPTH {
            chain.push(current.to_string());
            if current == id {
                return Some(chain);
            }
            current = self.by_id.get(current)?.parent_id()?;
        }
        None
    }

    fn warnings_for(&self, doc: &Document) -> Vec<RegistryWarning> {
        let mut warnings = Vec::new();
        if let Some(parent) = doc.parent_id() {
            if !self.by_id.contains_key(parent) {
                warnings.push(RegistryWarning::Orphan {
                    id: doc.id().to_string(),
                    parent_id: parent.to_string(),
                });
            }
        }
        if let Some(chain) = self.find_cycle(doc.id()) {
            warnings.push(RegistryWarning::CycleDetected {
                id: doc.id().to_string(),
                chain,
            });
        }
        warnings
    }

    fn children(&self, id: &str) -> Vec<Arc<Document>> {
        if !self.by_id.contains_key(id) {
            return Vec::new();
        }
        self.children_of
            .get(id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|child| self.by_id.get(child).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Canonical store of parsed documents with parent/child indexing.
///
/// One instance is shared per process as `Arc<Registry>`. Mutations take an
/// exclusive lock covering both indices; reads share the lock and always see
/// a consistent snapshot. Operations never fail: orphans and parent cycles
/// are reported as [`RegistryWarning`]s while the data stays queryable.
#[derive(Debug)]
pub struct Registry {
    state: RwLock<RegistryState>,
    events: EventBroadcaster,
}

impl Registry {
    pub fn new() -> Self {
        Self::with_event_capacity(1024)
    }

    pub fn with_event_capacity(capacity: usize) -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
            events: EventBroadcaster::new(capacity),
        }
    }

    /// Subscribe to change events.
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    /// Insert or fully replace the document at `doc.id`.
    pub fn upsert(&self, doc: Document) -> UpsertOutcome {
        let doc = Arc::new(doc);
        let id = doc.id().to_string();

        let (previous, warnings) = {
            let mut state = self.state.write();
            let previous = state.by_id.insert(id.clone(), Arc::clone(&doc));

            if let Some(old_parent) = previous.as_ref().and_then(|p| p.parent_id()) {
                state.detach(old_parent, &id);
            }
            if let Some(parent) = doc.parent_id() {
                state.attach(parent, &id);
            }

            let warnings = state.warnings_for(&doc);

            // Sent under the lock so subscribers see mutations in order
            let event = if previous.is_some() {
                RegistryEvent::Updated {
                    document: Arc::clone(&doc),
                }
            } else {
                RegistryEvent::Created {
                    document: Arc::clone(&doc),
                }
            };
            self.events.send(event);
            self.events.send(RegistryEvent::Changed { id: id.clone() });

            (previous, warnings)
        };

        // Callers decide whether a warning is final; a bulk load fills parents in later
        for warning in &warnings {
            tracing::debug!(target: "registry", "{warning}");
        }
        crate::debug_event!(
            "registry",
            if previous.is_some() { "updated" } else { "created" },
            "{id}"
        );

        UpsertOutcome {
            document: doc,
            previous,
            warnings,
        }
    }

    /// Remove a document. Children are kept and become orphans.
    pub fn delete(&self, id: &str) -> DeleteOutcome {
        let outcome = {
            let mut state = self.state.write();
            let Some(removed) = state.by_id.remove(id) else {
                return DeleteOutcome::default();
            };
            if let Some(parent) = removed.parent_id() {
                state.detach(parent, id);
            }
            let orphaned: Vec<String> = state
                .children_of
                .get(id)
                .map(|ids| {
                    ids.iter()
                        .filter(|child| state.by_id.contains_key(child.as_str()))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default();

            self.events.send(RegistryEvent::Deleted { id: id.to_string() });
            self.events.send(RegistryEvent::Changed { id: id.to_string() });

            DeleteOutcome {
                removed: Some(removed),
                orphaned,
            }
        };

        crate::debug_event!("registry", "deleted", "{id}");
        if !outcome.orphaned.is_empty() {
            tracing::warn!(
                target: "registry",
                "deleting {id} orphaned {} children: {}",
                outcome.orphaned.len(),
                outcome.orphaned.join(", ")
            );
        }
        outcome
    }

    pub fn get(&self, id: &str) -> Option<Arc<Document>> {
        self.state.read().by_id.get(id).cloned()
    }

    /// Snapshot of every document. Order is not significant.
    pub fn get_all(&self) -> Vec<Arc<Document>> {
        self.state.read().by_id.values().cloned().collect()
    }

    /// Current children of `id`, sorted by id. Empty if `id` is absent.
    pub fn get_children(&self, id: &str) -> Vec<Arc<Document>> {
        self.state.read().children(id)
    }

    /// Materialize the document forest from a consistent snapshot.
    pub fn get_tree(&self) -> Vec<TreeNode> {
        build_forest(&self.state.read())
    }

    /// Derived hierarchy annotation for `id`.
    pub fn hierarchy(&self, id: &str) -> Option<Hierarchy> {
        let state = self.state.read();
        let doc = state.by_id.get(id)?;
        Some(Hierarchy {
            level: doc.metadata.document_type.clone(),
            parent_id: doc.metadata.parent_id.clone(),
            child_ids: state
                .children(id)
                .iter()
                .map(|c| c.id().to_string())
                .collect(),
            depth: doc.metadata.depth(),
        })
    }

    /// Orphan and cycle warnings for the whole registry, sorted by id.
    pub fn diagnostics(&self) -> Vec<RegistryWarning> {
        let state = self.state.read();
        let mut docs: Vec<&Arc<Document>> = state.by_id.values().collect();
        docs.sort_by(|a, b| a.id().cmp(b.id()));
        docs.into_iter()
            .flat_map(|doc| state.warnings_for(doc))
            .collect()
    }

    /// Orphan and cycle warnings for the given ids, sorted by id. Ids not in
    /// the registry are skipped.
    pub fn diagnostics_for<'a>(
        &self,
        ids: impl IntoIterator<Item = &'a str>,
    ) -> Vec<RegistryWarning> {
        let state = self.state.read();
        let mut docs: Vec<&Arc<Document>> = ids
            .into_iter()
            .filter_map(|id| state.by_id.get(id))
            .collect();
        docs.sort_by(|a, b| a.id().cmp(b.id()));
        docs.dedup_by(|a, b| a.id() == b.id());
        docs.into_iter()
            .flat_map(|doc| state.warnings_for(doc))
            .collect()
    }

    /// Document parsed from the given file, if any.
    pub fn find_by_source_path(&self, path: &Path) -> Option<Arc<Document>> {
        self.state
            .read()
            .by_id
            .values()
            .find(|doc| doc.source_path() == Some(path))
            .cloned()
    }

    /// `(source path, id)` for every document that came from a file.
    pub fn source_paths(&self) -> Vec<(PathBuf, String)> {
        self.state
            .read()
            .by_id
            .values()
            .filter_map(|doc| {
                doc.source_path()
                    .map(|p| (p.to_path_buf(), doc.id().to_string()))
            })
            .collect()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.state.read().by_id.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.state.read().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().by_id.is_empty()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
