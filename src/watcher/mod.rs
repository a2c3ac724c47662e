//! Change watcher that keeps a registry live.
//!
//! # Architecture
//!
//! ```text
//! notify::RecommendedWatcher (recursive, per root)
//!         |
//!      Scheduler task
//!   - per-path Debouncer (abortable timers)
//!   - PathIndex (path -> id)
//!         |
//!   bounded worker pool (semaphore)
//!         |
//!   parse -> Registry::upsert / Registry::delete
//! ```

mod change_watcher;
mod debouncer;
mod error;
mod path_index;

pub use change_watcher::{ChangeWatcher, ChangeWatcherBuilder, WatcherState, WatcherStats};
pub use debouncer::{Debouncer, Fired};
pub use error::WatchError;
pub use path_index::PathIndex;
