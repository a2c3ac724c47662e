//! Core document types.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::id::HierarchicalId;

/// Validated metadata of one document.
///
/// Known fields are typed; anything else found in the metadata block is kept
/// in `extra` in its original order and shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentMetadata {
    pub id: String,
    pub title: String,
    pub document_type: String,
    pub status: String,
    pub priority: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Declared parent, or the parent implied by the id structure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,

    #[serde(default)]
    pub dependency_ids: Vec<String>,

    /// Unrecognized fields (`tags`, `assignee`, ...), passed through untouched.
    #[serde(flatten)]
    pub extra: IndexMap<String, serde_json::Value>,
}

impl DocumentMetadata {
    /// Depth implied by the id (0 for `E13`, 2 for `E13-F01-T01`).
    pub fn depth(&self) -> usize {
        HierarchicalId::parse(&self.id)
            .map(|id| id.depth())
            .unwrap_or(0)
    }
}

/// A parsed document as held by the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    #[serde(flatten)]
    pub metadata: DocumentMetadata,

    /// Body text with the metadata block stripped, verbatim.
    pub body: String,

    /// File the document was parsed from. Used for watcher correlation only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_path: Option<PathBuf>,
}

impl Document {
    pub fn new(metadata: DocumentMetadata, body: impl Into<String>) -> Self {
        Self {
            metadata,
            body: body.into(),
            source_path: None,
        }
    }

    pub fn with_source_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.source_path = Some(path.into());
        self
    }

    pub fn id(&self) -> &str {
        &self.metadata.id
    }

    pub fn parent_id(&self) -> Option<&str> {
        self.metadata.parent_id.as_deref()
    }

    pub fn source_path(&self) -> Option<&Path> {
        self.source_path.as_deref()
    }
}

/// Derived hierarchy annotation for a document. Never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Hierarchy {
    /// Level name, i.e. the document type.
    pub level: String,
    pub parent_id: Option<String>,
    /// Children currently present in the registry, sorted by id.
    pub child_ids: Vec<String>,
    pub depth: usize,
}

/// One node of the materialized document forest.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TreeNode {
    pub document: Arc<Document>,
    /// True when the document declares a parent that is not in the registry.
    pub orphan: bool,
    pub children: Vec<TreeNode>,
}

impl TreeNode {
    pub fn id(&self) -> &str {
        self.document.id()
    }

    /// Number of nodes in this subtree, including this one.
    pub fn size(&self) -> usize {
        1 + self.children.iter().map(TreeNode::size).sum::<usize>()
    }

    /// Depth-first search for a node by id.
    pub fn find(&self, id: &str) -> Option<&TreeNode> {
        if self.id() == id {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(id))
    }
}
