//! Tracing setup for the wright binary and its embedders.
//!
//! Logs always go to stderr: stdout is reserved for the NDJSON event stream.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::Level;
use tracing_subscriber::layer::{Layered, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{reload, EnvFilter, Layer, Registry};

type FilterLayer = reload::Layer<EnvFilter, Registry>;
type Filtered = Layered<FilterLayer, Registry>;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Json,
    Compact,
}

/// Configuration for the telemetry subsystem.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default log level. Overridden by RUST_LOG env var.
    pub log_level: Level,
    /// Per-module level overrides (e.g. "wright_engine" => DEBUG).
    pub module_levels: Vec<(String, Level)>,
    pub format: LogFormat,
    /// Include the span list in JSON records.
    pub with_spans: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            module_levels: Vec::new(),
            format: LogFormat::Json,
            with_spans: true,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("global subscriber already installed: {0}")]
    AlreadyInitialized(String),
    #[error("filter reload failed: {0}")]
    Reload(String),
}

/// Handle returned by [`init_telemetry`]; allows adjusting levels at runtime.
pub struct TelemetryGuard {
    handle: reload::Handle<EnvFilter, Registry>,
    base_level: Level,
    module_levels: RwLock<Vec<(String, Level)>>,
}

impl TelemetryGuard {
    /// Change the log level for a specific module at runtime.
    pub fn set_module_level(&self, module: &str, level: Level) -> Result<(), TelemetryError> {
        let directives = {
            let mut levels = self.module_levels.write();
            if let Some(entry) = levels.iter_mut().find(|(m, _)| m == module) {
                entry.1 = level;
            } else {
                levels.push((module.to_string(), level));
            }
            filter_directives(self.base_level, &levels)
        };
        self.handle
            .reload(EnvFilter::new(directives))
            .map_err(|e| TelemetryError::Reload(e.to_string()))
    }

    pub fn module_levels(&self) -> Vec<(String, Level)> {
        self.module_levels.read().clone()
    }
}

/// Build an `EnvFilter` directive string such as `info,wright_engine=debug`.
pub fn filter_directives(base: Level, module_levels: &[(String, Level)]) -> String {
    let mut filter = base.to_string().to_lowercase();
    for (module, level) in module_levels {
        filter.push_str(&format!(",{}={}", module, level.to_string().to_lowercase()));
    }
    filter
}

/// Initialize the global subscriber. Call once at startup.
pub fn init_telemetry(config: TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    let directives = filter_directives(config.log_level, &config.module_levels);
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&directives));
    let (filter_layer, handle) = reload::Layer::new(env_filter);

    let fmt_layer: Box<dyn Layer<Filtered> + Send + Sync> = match config.format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_span_list(config.with_spans)
            .boxed(),
        LogFormat::Compact => tracing_subscriber::fmt::layer()
            .compact()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| TelemetryError::AlreadyInitialized(e.to_string()))?;

    Ok(TelemetryGuard {
        handle,
        base_level: config.log_level,
        module_levels: RwLock::new(config.module_levels),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directives_include_module_overrides() {
        let levels = vec![
            ("wright_engine".to_string(), Level::DEBUG),
            ("wright_store".to_string(), Level::WARN),
        ];
        assert_eq!(
            filter_directives(Level::INFO, &levels),
            "info,wright_engine=debug,wright_store=warn"
        );
        assert_eq!(filter_directives(Level::TRACE, &[]), "trace");
    }

    #[test]
    fn default_config_is_json_info() {
        let config = TelemetryConfig::default();
        assert_eq!(config.log_level, Level::INFO);
        assert_eq!(config.format, LogFormat::Json);
        assert!(config.module_levels.is_empty());
    }

    #[test]
    fn log_format_serde() {
        let parsed: LogFormat = serde_json::from_str(r#""compact""#).unwrap();
        assert_eq!(parsed, LogFormat::Compact);
    }

    #[test]
    fn init_then_adjust_level() {
        let guard = init_telemetry(TelemetryConfig::default()).unwrap();
        guard.set_module_level("wright_engine", Level::DEBUG).unwrap();
        guard.set_module_level("wright_engine", Level::TRACE).unwrap();
        assert_eq!(
            guard.module_levels(),
            vec![("wright_engine".to_string(), Level::TRACE)]
        );
        assert!(init_telemetry(TelemetryConfig::default()).is_err());
    }
}
