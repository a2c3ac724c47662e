//! Initial population of a registry from disk.

pub mod loader;

pub use loader::{BulkLoader, LoadError, LoadReport};
