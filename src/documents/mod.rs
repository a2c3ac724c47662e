//! Document model, metadata validation, parsing and discovery.
//!
//! This module provides:
//! - Hierarchical id handling (`E13-F01-T01`)
//! - Schema validation of the metadata block against a configurable taxonomy
//! - Parsing of `---` delimited metadata plus body text
//! - Discovery of document files under a root directory

pub mod config;
pub mod discovery;
pub mod error;
pub mod id;
pub mod parser;
pub mod types;
pub mod validator;

pub use config::{DiscoveryConfig, DocumentTypeConfig, TaxonomyConfig};
pub use discovery::{DiscoveredPaths, Discovery, DiscoveryError, FileMatcher};
pub use error::{
    DocumentError, DocumentResult, FileAccessCause, ParseError, ValidationError,
};
pub use id::{HierarchicalId, is_valid_id};
pub use parser::{DocumentParser, ParsedDocument, read_with_timeout, render};
pub use types::{Document, DocumentMetadata, Hierarchy, TreeNode};
pub use validator::{MetadataValidator, RawMetadata};
