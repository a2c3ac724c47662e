//! Layered settings for specdex.
//!
//! Sources, lowest precedence first:
//! - Built-in defaults
//! - `.specdex/settings.toml`, found by searching the current directory's ancestors
//! - Environment variables
//!
//! # Environment Variables
//!
//! Environment variables must be prefixed with `SPECDEX_` and use double
//! underscores to separate nested levels:
//! - `SPECDEX_WATCHER__DEBOUNCE_MS=250` sets `watcher.debounce_ms`
//! - `SPECDEX_INDEXING__PARALLEL_THREADS=8` sets `indexing.parallel_threads`
//! - `SPECDEX_LOGGING__DEFAULT=debug` sets `logging.default`

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::documents::{DiscoveryConfig, TaxonomyConfig};

const CONFIG_DIR: &str = ".specdex";
const CONFIG_FILE: &str = "settings.toml";
const ENV_PREFIX: &str = "SPECDEX_";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load settings: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("Invalid [{section}] settings: {reason}")]
    Invalid {
        section: &'static str,
        reason: String,
    },

    #[error("Failed to write settings to {path}: {reason}")]
    Save { path: PathBuf, reason: String },
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Settings {
    /// Version of the configuration schema
    #[serde(default = "default_version")]
    pub version: u32,

    /// Directories holding spec documents
    #[serde(default = "default_roots")]
    pub roots: Vec<PathBuf>,

    /// Workspace root directory (where .specdex is located)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_root: Option<PathBuf>,

    #[serde(default)]
    pub indexing: IndexingConfig,

    #[serde(default)]
    pub discovery: DiscoveryConfig,

    #[serde(default)]
    pub watcher: WatcherConfig,

    #[serde(default)]
    pub taxonomy: TaxonomyConfig,

    #[serde(default)]
    pub registry: RegistryConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct IndexingConfig {
    /// Number of parallel threads for the initial parse
    #[serde(default = "default_parallel_threads")]
    pub parallel_threads: usize,

    /// Capacity of the discovery -> parse channel
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// Upper bound for a single file read during the initial load
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
}

impl IndexingConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct WatcherConfig {
    /// Quiet period per path before a change is processed
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Upper bound for a single file read
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,

    /// Maximum number of paths processed concurrently
    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl WatcherConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct RegistryConfig {
    /// Events buffered per subscriber before it lags
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct LoggingConfig {
    /// Default level: error, warn, info, debug, trace
    #[serde(default = "default_log_level")]
    pub default: String,

    /// Per-target overrides, e.g. `watcher = "debug"`
    #[serde(default)]
    pub modules: HashMap<String, String>,
}

// Default value functions
fn default_version() -> u32 {
    1
}
fn default_roots() -> Vec<PathBuf> {
    vec![PathBuf::from("specs")]
}
fn default_parallel_threads() -> usize {
    num_cpus::get()
}
fn default_channel_capacity() -> usize {
    256
}
fn default_debounce_ms() -> u64 {
    200
}
fn default_read_timeout_ms() -> u64 {
    2000
}
fn default_workers() -> usize {
    num_cpus::get()
}
fn default_event_capacity() -> usize {
    1024
}
fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            roots: default_roots(),
            workspace_root: None,
            indexing: IndexingConfig::default(),
            discovery: DiscoveryConfig::default(),
            watcher: WatcherConfig::default(),
            taxonomy: TaxonomyConfig::default(),
            registry: RegistryConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            parallel_threads: default_parallel_threads(),
            channel_capacity: default_channel_capacity(),
            read_timeout_ms: default_read_timeout_ms(),
        }
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            read_timeout_ms: default_read_timeout_ms(),
            workers: default_workers(),
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            event_capacity: default_event_capacity(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default: default_log_level(),
            modules: HashMap::new(),
        }
    }
}

impl Settings {
    /// Load configuration from all sources
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::find_workspace_config()
            .unwrap_or_else(|| PathBuf::from(CONFIG_DIR).join(CONFIG_FILE));

        let mut settings = Self::figment(&config_path).extract::<Settings>().map_err(Box::new)?;
        if settings.workspace_root.is_none() {
            settings.workspace_root = Self::workspace_root();
        }
        settings.check()?;
        Ok(settings)
    }

    /// Load configuration from a specific file, still honoring the environment
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let settings = Self::figment(path.as_ref())
            .extract::<Settings>()
            .map_err(Box::new)?;
        settings.check()?;
        Ok(settings)
    }

    fn figment(config_path: &Path) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Toml::file(config_path))
            // Double underscore separates nesting levels, single underscore
            // stays inside field names
            .merge(Env::prefixed(ENV_PREFIX).map(|key| {
                key.as_str().to_lowercase().replace("__", ".").into()
            }))
    }

    fn check(&self) -> Result<(), ConfigError> {
        self.taxonomy
            .validate()
            .map_err(|reason| ConfigError::Invalid {
                section: "taxonomy",
                reason,
            })?;
        if self.indexing.parallel_threads == 0 {
            return Err(ConfigError::Invalid {
                section: "indexing",
                reason: "parallel_threads must be at least 1".to_string(),
            });
        }
        if self.watcher.workers == 0 {
            return Err(ConfigError::Invalid {
                section: "watcher",
                reason: "workers must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Find `.specdex/settings.toml` searching from the current directory up
    fn find_workspace_config() -> Option<PathBuf> {
        Self::workspace_root().map(|root| root.join(CONFIG_DIR).join(CONFIG_FILE))
    }

    /// Get the workspace root directory (where .specdex is located)
    pub fn workspace_root() -> Option<PathBuf> {
        let current = std::env::current_dir().ok()?;

        current
            .ancestors()
            .find(|ancestor| ancestor.join(CONFIG_DIR).is_dir())
            .map(Path::to_path_buf)
    }

    /// Roots resolved against the workspace root when relative
    pub fn resolved_roots(&self) -> Vec<PathBuf> {
        self.roots
            .iter()
            .map(|root| match &self.workspace_root {
                Some(base) if root.is_relative() => base.join(root),
                _ => root.clone(),
            })
            .collect()
    }

    /// Replace the configured roots, resolving relative ones against `base`
    /// instead of the workspace root. Used for command-line roots.
    pub fn override_roots(&mut self, roots: &[PathBuf], base: &Path) {
        self.roots = roots
            .iter()
            .map(|root| {
                if root.is_relative() {
                    base.join(root)
                } else {
                    root.clone()
                }
            })
            .collect();
    }

    /// Save current configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let save_error = |reason: String| ConfigError::Save {
            path: path.to_path_buf(),
            reason,
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| save_error(e.to_string()))?;
        }
        let toml_string = toml::to_string_pretty(self).map_err(|e| save_error(e.to_string()))?;
        std::fs::write(path, toml_string).map_err(|e| save_error(e.to_string()))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.version, 1);
        assert_eq!(settings.roots, vec![PathBuf::from("specs")]);
        assert_eq!(settings.watcher.debounce_ms, 200);
        assert_eq!(settings.watcher.read_timeout(), Duration::from_secs(2));
        assert_eq!(settings.indexing.read_timeout(), Duration::from_secs(2));
        assert_eq!(settings.registry.event_capacity, 1024);
        assert_eq!(settings.logging.default, "warn");
        assert!(settings.indexing.parallel_threads > 0);
        assert!(settings.watcher.workers > 0);
    }

    #[test]
    fn test_load_from_toml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("settings.toml");

        let toml_content = r#"
roots = ["docs/specs", "/abs/specs"]

[watcher]
debounce_ms = 50
workers = 2

[indexing]
read_timeout_ms = 750

[discovery]
file_names = ["index.md"]

[taxonomy]
statuses = ["open", "closed"]
default_status = "open"

[logging.modules]
watcher = "debug"
"#;
        fs::write(&config_path, toml_content).unwrap();

        let settings = Settings::load_from(&config_path).unwrap();
        assert_eq!(settings.roots.len(), 2);
        assert_eq!(settings.watcher.debounce_ms, 50);
        assert_eq!(settings.watcher.workers, 2);
        assert_eq!(settings.watcher.read_timeout_ms, 2000);
        assert_eq!(settings.indexing.read_timeout_ms, 750);
        assert_eq!(settings.discovery.file_names, vec!["index.md"]);
        assert_eq!(settings.taxonomy.statuses, vec!["open", "closed"]);
        assert_eq!(settings.logging.modules["watcher"], "debug");
        // Untouched sections keep defaults
        assert!(settings.taxonomy.has_type("epic"));
    }

    #[test]
    fn test_override_roots_ignore_workspace_root() {
        let mut settings = Settings {
            workspace_root: Some(PathBuf::from("/work")),
            ..Settings::default()
        };
        settings.override_roots(
            &[PathBuf::from("specs"), PathBuf::from("/abs/specs")],
            Path::new("/work/sub/dir"),
        );
        assert_eq!(
            settings.resolved_roots(),
            vec![
                PathBuf::from("/work/sub/dir/specs"),
                PathBuf::from("/abs/specs")
            ]
        );
    }

    #[test]
    fn test_invalid_taxonomy_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("settings.toml");
        fs::write(
            &config_path,
            "[taxonomy]\nstatuses = [\"open\"]\ndefault_status = \"draft\"\n",
        )
        .unwrap();

        let result = Settings::load_from(&config_path);
        assert!(matches!(
            result,
            Err(ConfigError::Invalid {
                section: "taxonomy",
                ..
            })
        ));
    }

    #[test]
    fn test_zero_workers_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("settings.toml");
        fs::write(&config_path, "[watcher]\nworkers = 0\n").unwrap();

        assert!(matches!(
            Settings::load_from(&config_path),
            Err(ConfigError::Invalid {
                section: "watcher",
                ..
            })
        ));
    }

    #[test]
    fn test_save_settings() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join(".specdex").join("settings.toml");

        let mut settings = Settings::default();
        settings.indexing.parallel_threads = 2;
        settings.watcher.debounce_ms = 75;
        settings.roots = vec![PathBuf::from("product/specs")];

        settings.save(&config_path).unwrap();

        let loaded = Settings::load_from(&config_path).unwrap();
        assert_eq!(loaded.indexing.parallel_threads, 2);
        assert_eq!(loaded.watcher.debounce_ms, 75);
        assert_eq!(loaded.roots, vec![PathBuf::from("product/specs")]);
        assert_eq!(loaded.taxonomy, settings.taxonomy);
    }

    #[test]
    fn test_resolved_roots() {
        let settings = Settings {
            roots: vec![PathBuf::from("specs"), PathBuf::from("/opt/specs")],
            workspace_root: Some(PathBuf::from("/work")),
            ..Default::default()
        };
        assert_eq!(
            settings.resolved_roots(),
            vec![PathBuf::from("/work/specs"), PathBuf::from("/opt/specs")]
        );
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let settings = Settings::load_from(temp_dir.path().join("absent.toml")).unwrap();
        assert_eq!(settings.watcher.debounce_ms, 200);
    }
}
