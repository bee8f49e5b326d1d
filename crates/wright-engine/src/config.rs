use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use wright_store::StoreConfig;

use crate::error::ConfigError;

const DEFAULT_SYSTEM_PROMPT: &str = "\
You are Wright, an autonomous software engineer working inside a single project directory.

Use tools by writing XML-style tags. Each tool block names the tool and wraps every parameter \
in its own tag, for example:

<read-file>
<path>src/main.ts</path>
</read-file>

Available tools:
- read-file(path): read a file with line numbers.
- write-to-file(path, content): write the complete new content of a file.
- apply-diff(path, diff): apply SEARCH/REPLACE blocks to an existing file.
- delete-file(path): delete a file.
- rename-file(source, destination): move a file.
- add-dependency(name): install a package into the project.
- search-files(path, regex, file-pattern): regex search with surrounding context.
- list-files(path, recursive): list directory contents.
- ask-followup-question(question): ask the user for missing information and stop.

Paths are always relative to the project directory. Changes made during one step are applied \
together once every tool in that step has finished; build and lint results are reported back \
to you afterwards. Think inside <thinking> tags before acting.";

/// Runtime configuration for the agent. Every field has a default, so an
/// empty JSON object is a valid config file. Durations are milliseconds on
/// the wire.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub compact_threshold_tokens: usize,
    pub compact_target_ratio: f64,
    #[serde(with = "duration_ms")]
    pub compaction_lock_timeout: Duration,
    #[serde(with = "duration_ms")]
    pub compaction_check_interval: Duration,
    pub enable_prompt_cache: bool,
    pub max_prompt_cache_checkpoints: usize,
    pub skip_lint: bool,
    #[serde(with = "duration_ms")]
    pub model_timeout: Duration,
    #[serde(with = "duration_ms")]
    pub tool_poll_interval: Duration,
    #[serde(with = "duration_ms")]
    pub tool_timeout: Duration,
    #[serde(with = "duration_ms")]
    pub hook_timeout: Duration,
    pub max_consecutive_failures: u32,
    pub protected_dirs: Vec<String>,
    pub protected_files: Vec<String>,
    pub list_files_limit: usize,
    pub search_max_results: usize,
    pub system_prompt: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            compact_threshold_tokens: 30_000,
            compact_target_ratio: 0.3,
            compaction_lock_timeout: Duration::from_secs(1),
            compaction_check_interval: Duration::from_secs(1),
            enable_prompt_cache: false,
            max_prompt_cache_checkpoints: 4,
            skip_lint: true,
            model_timeout: Duration::from_secs(60),
            tool_poll_interval: Duration::from_millis(100),
            tool_timeout: Duration::from_secs(120),
            hook_timeout: Duration::from_secs(120),
            max_consecutive_failures: 4,
            protected_dirs: vec![".lovable".into()],
            protected_files: vec!["src/tsconfig.json".into()],
            list_files_limit: 200,
            search_max_results: 300,
            system_prompt: DEFAULT_SYSTEM_PROMPT.into(),
        }
    }
}

impl AgentConfig {
    /// Load from an optional JSON file, then apply `WRIGHT_*` environment
    /// overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)?;
                let config: Self = serde_json::from_str(&raw)?;
                debug!(path = %path.display(), "agent config loaded");
                config
            }
            None => Self::default(),
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Override numeric limits and flags from `lookup`. Unparseable values
    /// are logged and ignored.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        fn parsed<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
            let raw = lookup(key)?;
            match raw.trim().parse() {
                Ok(v) => Some(v),
                Err(_) => {
                    warn!(key, value = %raw, "ignoring unparseable config override");
                    None
                }
            }
        }

        if let Some(v) = parsed(&lookup, "WRIGHT_COMPACT_THRESHOLD_TOKENS") {
            self.compact_threshold_tokens = v;
        }
        if let Some(v) = parsed(&lookup, "WRIGHT_COMPACT_TARGET_RATIO") {
            self.compact_target_ratio = v;
        }
        if let Some(v) = parsed(&lookup, "WRIGHT_ENABLE_PROMPT_CACHE") {
            self.enable_prompt_cache = v;
        }
        if let Some(v) = parsed(&lookup, "WRIGHT_SKIP_LINT") {
            self.skip_lint = v;
        }
        if let Some(v) = parsed(&lookup, "WRIGHT_MAX_CONSECUTIVE_FAILURES") {
            self.max_consecutive_failures = v;
        }
        if let Some(v) = parsed(&lookup, "WRIGHT_LIST_FILES_LIMIT") {
            self.list_files_limit = v;
        }
        if let Some(v) = parsed(&lookup, "WRIGHT_SEARCH_MAX_RESULTS") {
            self.search_max_results = v;
        }
        if let Some(ms) = parsed(&lookup, "WRIGHT_MODEL_TIMEOUT_MS") {
            self.model_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parsed(&lookup, "WRIGHT_TOOL_TIMEOUT_MS") {
            self.tool_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parsed(&lookup, "WRIGHT_HOOK_TIMEOUT_MS") {
            self.hook_timeout = Duration::from_millis(ms);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.compact_target_ratio > 0.0 && self.compact_target_ratio <= 1.0) {
            return Err(ConfigError::Invalid {
                field: "compact_target_ratio",
                reason: format!("must be in (0, 1], got {}", self.compact_target_ratio),
            });
        }
        if self.max_consecutive_failures == 0 {
            return Err(ConfigError::Invalid {
                field: "max_consecutive_failures",
                reason: "must be at least 1".into(),
            });
        }
        if self.tool_poll_interval.is_zero() {
            return Err(ConfigError::Invalid {
                field: "tool_poll_interval",
                reason: "must be non-zero".into(),
            });
        }
        Ok(())
    }

    /// The compactor's subset.
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            compact_threshold_tokens: self.compact_threshold_tokens,
            compact_target_ratio: self.compact_target_ratio,
            compaction_lock_timeout: self.compaction_lock_timeout,
            compaction_check_interval: self.compaction_check_interval,
        }
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_is_default() {
        let config: AgentConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, AgentConfig::default());
        assert_eq!(config.model_timeout, Duration::from_secs(60));
        assert_eq!(config.protected_dirs, vec![".lovable"]);
    }

    #[test]
    fn durations_are_milliseconds() {
        let config: AgentConfig =
            serde_json::from_str(r#"{"tool_timeout": 2500, "skip_lint": false}"#).unwrap();
        assert_eq!(config.tool_timeout, Duration::from_millis(2500));
        assert!(!config.skip_lint);
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["tool_timeout"], 2500);
        assert_eq!(json["model_timeout"], 60_000);
    }

    #[test]
    fn env_overrides_apply_and_bad_values_are_ignored() {
        let mut config = AgentConfig::default();
        config.apply_env_overrides(|key| match key {
            "WRIGHT_COMPACT_THRESHOLD_TOKENS" => Some("1000".into()),
            "WRIGHT_MODEL_TIMEOUT_MS" => Some("250".into()),
            "WRIGHT_LIST_FILES_LIMIT" => Some("lots".into()),
            _ => None,
        });
        assert_eq!(config.compact_threshold_tokens, 1000);
        assert_eq!(config.model_timeout, Duration::from_millis(250));
        assert_eq!(config.list_files_limit, 200);
    }

    #[test]
    fn load_reads_file() {
        let dir = std::env::temp_dir().join(format!("wright_config_{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("wright.json");
        std::fs::write(&path, r#"{"search_max_results": 10}"#).unwrap();
        let config = AgentConfig::load(Some(&path)).unwrap();
        assert_eq!(config.search_max_results, 10);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn invalid_ratio_rejected() {
        let config = AgentConfig {
            compact_target_ratio: 1.5,
            ..AgentConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "compact_target_ratio", .. })
        ));
    }

    #[test]
    fn store_config_mirrors_fields() {
        let config = AgentConfig {
            compact_threshold_tokens: 10,
            ..AgentConfig::default()
        };
        let store = config.store_config();
        assert_eq!(store.compact_threshold_tokens, 10);
        assert_eq!(store.target_tokens(), 3);
    }
}
