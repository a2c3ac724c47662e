//! In-memory document registry.
//!
//! Holds every parsed document by id plus a derived parent -> children index,
//! materializes the document forest on demand and broadcasts typed change
//! events. Anomalies (orphans, parent cycles) never fail an operation; they
//! come back as [`RegistryWarning`]s.

mod events;
mod store;
mod tree;

use std::fmt;
use std::sync::Arc;

use crate::documents::Document;

pub use events::{EventBroadcaster, RegistryEvent};
pub use store::{MAX_CYCLE_DEPTH, Registry};

/// Recoverable anomaly found while mutating or inspecting the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryWarning {
    /// The declared parent is not in the registry.
    Orphan { id: String, parent_id: String },
    /// Following parent links from `id` leads back to `id`.
    CycleDetected { id: String, chain: Vec<String> },
}

impl RegistryWarning {
    pub fn id(&self) -> &str {
        match self {
            RegistryWarning::Orphan { id, .. } | RegistryWarning::CycleDetected { id, .. } => id,
        }
    }
}

impl fmt::Display for RegistryWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryWarning::Orphan { id, parent_id } => {
                write!(f, "{id} is an orphan: parent {parent_id} not found")
            }
            RegistryWarning::CycleDetected { id, chain } => {
                write!(f, "parent cycle at {id}: {}", chain.join(" -> "))
            }
        }
    }
}

/// Result of [`Registry::upsert`].
#[derive(Debug, Clone)]
pub struct UpsertOutcome {
    /// The stored value.
    pub document: Arc<Document>,
    /// The value it replaced, if the id already existed.
    pub previous: Option<Arc<Document>>,
    pub warnings: Vec<RegistryWarning>,
}

impl UpsertOutcome {
    pub fn is_created(&self) -> bool {
        self.previous.is_none()
    }

    pub fn has_cycle(&self) -> bool {
        self.warnings
            .iter()
            .any(|w| matches!(w, RegistryWarning::CycleDetected { .. }))
    }
}

/// Result of [`Registry::delete`].
#[derive(Debug, Clone, Default)]
pub struct DeleteOutcome {
    /// The removed value, `None` if the id was unknown.
    pub removed: Option<Arc<Document>>,
    /// Children that lost their parent, sorted by id.
    pub orphaned: Vec<String>,
}
