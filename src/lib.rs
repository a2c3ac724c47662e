//! Live in-memory registry of hierarchical spec documents.
//!
//! Documents are files (`spec.md`, `*.spec.md`) holding a `---` delimited
//! YAML metadata block and a free-form body. Ids encode the hierarchy:
//! `E13` is an epic, `E13-F01` a feature under it, `E13-F01-T01` a task.
//!
//! ```ignore
//! let settings = Settings::load()?;
//! let registry = Arc::new(Registry::with_event_capacity(settings.registry.event_capacity));
//! let loader = BulkLoader::new(
//!     Discovery::new(&settings.discovery),
//!     DocumentParser::new(MetadataValidator::new(settings.taxonomy.clone())),
//!     settings.indexing.clone(),
//! );
//! let report = loader.load_all(&settings.resolved_roots(), &registry)?;
//! let forest = registry.get_tree();
//! ```

pub mod config;
pub mod documents;
pub mod indexing;
pub mod logging;
pub mod registry;
pub mod watcher;

pub use config::{ConfigError, Settings};
pub use documents::{
    Discovery, Document, DocumentError, DocumentMetadata, DocumentParser, Hierarchy,
    MetadataValidator, ParseError, TreeNode, ValidationError,
};
pub use indexing::{BulkLoader, LoadError, LoadReport};
pub use registry::{DeleteOutcome, Registry, RegistryEvent, RegistryWarning, UpsertOutcome};
pub use watcher::{ChangeWatcher, WatchError, WatcherState};
