//! Logging setup for the library and the CLI.
//!
//! Compact timestamped output with per-target levels. Library code logs
//! under the targets `discovery`, `parser`, `registry`, `loader` and
//! `watcher`.
//!
//! # Configuration
//!
//! ```toml
//! [logging]
//! default = "warn"    # quiet by default
//!
//! [logging.modules]
//! watcher = "debug"   # trace debounce and re-parse activity
//! ```
//!
//! # Environment Variable
//!
//! `RUST_LOG` takes precedence over config:
//! ```bash
//! RUST_LOG=debug specdex tree
//! RUST_LOG=registry=debug,watcher=trace specdex watch
//! ```

use std::sync::Once;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::LoggingConfig;

static INIT: Once = Once::new();

/// Compact time format: HH:MM:SS.mmm
struct CompactTime;

impl FormatTime for CompactTime {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", chrono::Local::now().format("%H:%M:%S%.3f"))
    }
}

/// Build the filter directive string from config, e.g. `warn,watcher=debug`.
fn filter_directives(config: &LoggingConfig) -> String {
    let mut modules: Vec<_> = config.modules.iter().collect();
    modules.sort();

    let mut directives = config.default.clone();
    for (module, level) in modules {
        directives.push_str(&format!(",{module}={level}"));
    }
    directives
}

/// Initialize logging with configuration.
///
/// Call once at startup. Later calls are no-ops, and so is a call made after
/// another global subscriber was installed.
///
/// The `RUST_LOG` environment variable takes precedence over config settings.
pub fn init_with_config(config: &LoggingConfig) {
    INIT.call_once(|| {
        let filter = if std::env::var("RUST_LOG").is_ok() {
            EnvFilter::from_default_env()
        } else {
            EnvFilter::new(filter_directives(config))
        };

        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_timer(CompactTime)
            .with_level(true)
            .with_writer(std::io::stderr)
            .with_filter(filter);

        let _ = tracing_subscriber::registry().with(fmt_layer).try_init();
    });
}

/// Initialize logging with `LoggingConfig::default()` (`warn`).
pub fn init() {
    init_with_config(&LoggingConfig::default());
}

/// Log an event with component context at info level.
///
/// The component is also the tracing target, so `[logging.modules]` entries
/// such as `watcher = "debug"` apply to it.
///
/// # Examples
/// ```ignore
/// log_event!("watcher", "started", "{} roots", roots.len());
/// log_event!("loader", "complete");
/// ```
#[macro_export]
macro_rules! log_event {
    ($component:literal, $event:expr) => {
        tracing::info!(target: $component, "[{}] {}", $component, $event)
    };
    ($component:literal, $event:expr, $($arg:tt)*) => {
        tracing::info!(target: $component, "[{}] {}: {}", $component, $event, format!($($arg)*))
    };
}

/// Debug-level event logging.
///
/// # Examples
/// ```ignore
/// debug_event!("registry", "upserted", "{id}");
/// ```
#[macro_export]
macro_rules! debug_event {
    ($component:literal, $event:expr) => {
        tracing::debug!(target: $component, "[{}] {}", $component, $event)
    };
    ($component:literal, $event:expr, $($arg:tt)*) => {
        tracing::debug!(target: $component, "[{}] {}: {}", $component, $event, format!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;
    use tracing_subscriber::fmt::MakeWriter;

    #[derive(Clone, Default)]
    struct Capture(Arc<parking_lot::Mutex<Vec<u8>>>);

    impl std::io::Write for Capture {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for Capture {
        type Writer = Capture;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[test]
    fn test_macros_log_under_component_target() {
        let capture = Capture::default();
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::new("warn,watcher=debug"))
            .with_writer(capture.clone())
            .with_ansi(false)
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            crate::debug_event!("watcher", "changed", "via macro");
            crate::log_event!("watcher", "started");
            crate::debug_event!("registry", "created", "filtered out");
            crate::log_event!("parser", "parsed");
        });

        let output = String::from_utf8(capture.0.lock().clone()).unwrap();
        assert!(output.contains("[watcher] changed: via macro"), "{output}");
        assert!(output.contains("[watcher] started"), "{output}");
        assert!(!output.contains("filtered out"), "{output}");
        assert!(!output.contains("[parser]"), "{output}");
    }

    #[test]
    fn test_filter_directives() {
        let config = LoggingConfig {
            default: "info".to_string(),
            modules: HashMap::from([
                ("watcher".to_string(), "trace".to_string()),
                ("registry".to_string(), "debug".to_string()),
            ]),
        };
        assert_eq!(
            filter_directives(&config),
            "info,registry=debug,watcher=trace"
        );
    }

    #[test]
    fn test_init_twice_is_harmless() {
        init();
        init_with_config(&LoggingConfig::default());
        crate::log_event!("test", "logged");
    }
}
