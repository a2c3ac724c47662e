//! Configuration types for the document taxonomy and discovery convention.

use serde::{Deserialize, Serialize};

/// Recognized document types, statuses and priorities.
///
/// Extending the taxonomy is a settings change, not a code change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaxonomyConfig {
    /// Document types and the id-segment prefix that implies each one.
    #[serde(default = "default_document_types")]
    pub document_types: Vec<DocumentTypeConfig>,

    /// Allowed `status` values.
    #[serde(default = "default_statuses")]
    pub statuses: Vec<String>,

    /// Allowed `priority` values.
    #[serde(default = "default_priorities")]
    pub priorities: Vec<String>,

    /// Status assigned when a document omits one.
    #[serde(default = "default_status")]
    pub default_status: String,

    /// Priority assigned when a document omits one.
    #[serde(default = "default_priority")]
    pub default_priority: String,
}

/// A single document type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DocumentTypeConfig {
    /// Type name as written in metadata (e.g. "feature").
    pub name: String,

    /// Id-segment prefix implying this type (e.g. "F" for `E13-F01`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
}

impl DocumentTypeConfig {
    fn new(name: &str, prefix: &str) -> Self {
        Self {
            name: name.to_string(),
            prefix: Some(prefix.to_string()),
        }
    }
}

fn default_document_types() -> Vec<DocumentTypeConfig> {
    vec![
        DocumentTypeConfig::new("epic", "E"),
        DocumentTypeConfig::new("feature", "F"),
        DocumentTypeConfig::new("task", "T"),
        DocumentTypeConfig::new("subtask", "S"),
        DocumentTypeConfig::new("bug", "B"),
        DocumentTypeConfig::new("spike", "K"),
    ]
}

fn default_statuses() -> Vec<String> {
    ["draft", "reviewing", "approved", "in-progress", "testing", "done"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_priorities() -> Vec<String> {
    ["high", "medium", "low"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_status() -> String {
    "draft".to_string()
}

fn default_priority() -> String {
    "medium".to_string()
}

impl Default for TaxonomyConfig {
    fn default() -> Self {
        Self {
            document_types: default_document_types(),
            statuses: default_statuses(),
            priorities: default_priorities(),
            default_status: default_status(),
            default_priority: default_priority(),
        }
    }
}

impl TaxonomyConfig {
    /// Check whether a (normalized) type name is configured.
    pub fn has_type(&self, name: &str) -> bool {
        self.document_types.iter().any(|t| t.name == name)
    }

    /// Type implied by an id-segment prefix, matched case-insensitively.
    pub fn type_for_prefix(&self, prefix: &str) -> Option<&str> {
        self.document_types
            .iter()
            .find(|t| {
                t.prefix
                    .as_deref()
                    .is_some_and(|p| p.eq_ignore_ascii_case(prefix))
            })
            .map(|t| t.name.as_str())
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.document_types.is_empty() {
            return Err("taxonomy.document_types must not be empty".to_string());
        }
        if !self.statuses.contains(&self.default_status) {
            return Err(format!(
                "default_status '{}' is not one of the configured statuses",
                self.default_status
            ));
        }
        if !self.priorities.contains(&self.default_priority) {
            return Err(format!(
                "default_priority '{}' is not one of the configured priorities",
                self.default_priority
            ));
        }
        Ok(())
    }
}

/// File naming convention for document discovery.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiscoveryConfig {
    /// Exact file names that are documents (e.g. "spec.md").
    #[serde(default = "default_file_names")]
    pub file_names: Vec<String>,

    /// File name suffixes that are documents (e.g. ".spec.md").
    #[serde(default = "default_suffixes")]
    pub suffixes: Vec<String>,

    /// Gitignore-style patterns excluded from discovery.
    #[serde(default)]
    pub exclude: Vec<String>,
}

fn default_file_names() -> Vec<String> {
    vec!["spec.md".to_string()]
}

fn default_suffixes() -> Vec<String> {
    vec![".spec.md".to_string()]
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            file_names: default_file_names(),
            suffixes: default_suffixes(),
            exclude: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_taxonomy_defaults() {
        let taxonomy = TaxonomyConfig::default();
        assert!(taxonomy.has_type("epic"));
        assert!(taxonomy.has_type("spike"));
        assert!(!taxonomy.has_type("story"));
        assert_eq!(taxonomy.default_status, "draft");
        assert_eq!(taxonomy.default_priority, "medium");
        assert!(taxonomy.validate().is_ok());
    }

    #[test]
    fn test_type_for_prefix() {
        let taxonomy = TaxonomyConfig::default();
        assert_eq!(taxonomy.type_for_prefix("E"), Some("epic"));
        assert_eq!(taxonomy.type_for_prefix("t"), Some("task"));
        assert_eq!(taxonomy.type_for_prefix("X"), None);
    }

    #[test]
    fn test_taxonomy_validation() {
        let mut taxonomy = TaxonomyConfig {
            default_status: "archived".to_string(),
            ..Default::default()
        };
        assert!(taxonomy.validate().is_err());

        taxonomy.statuses.push("archived".to_string());
        assert!(taxonomy.validate().is_ok());
    }

    #[test]
    fn test_discovery_defaults() {
        let config = DiscoveryConfig::default();
        assert_eq!(config.file_names, vec!["spec.md"]);
        assert_eq!(config.suffixes, vec![".spec.md"]);
        assert!(config.exclude.is_empty());
    }
}
