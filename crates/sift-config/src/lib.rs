use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

mod logging;

pub use logging::init_tracing;

/// How query text is compared against index tokens.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    /// Tokens must start with the query. Only the shard owning the query's
    /// first character is consulted.
    #[default]
    Prefix,
    /// Tokens may contain the query anywhere. Every shard in the manifest is
    /// consulted, so the first broad query fans out over the whole index.
    Substring,
}

/// On-disk encoding of shard files.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShardFormat {
    /// Native JSON shard documents (`<key>.json`).
    #[default]
    Json,
    /// Doxygen `searchData` JavaScript files (`<key>.js`).
    Doxygen,
}

impl ShardFormat {
    pub fn file_extension(self) -> &'static str {
        match self {
            ShardFormat::Json => "json",
            ShardFormat::Doxygen => "js",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SearchConfig {
    /// Quiet period after the last keystroke before a query runs (in milliseconds).
    #[serde(default = "SearchConfig::default_debounce_ms")]
    pub debounce_ms: u64,

    #[serde(default)]
    pub match_mode: MatchMode,

    /// Maximum number of result rows handed to the presentation layer.
    ///
    /// `0` disables the limit.
    #[serde(default = "SearchConfig::default_result_limit")]
    pub result_limit: usize,
}

impl SearchConfig {
    fn default_debounce_ms() -> u64 {
        150
    }

    fn default_result_limit() -> usize {
        100
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            debounce_ms: Self::default_debounce_ms(),
            match_mode: MatchMode::default(),
            result_limit: Self::default_result_limit(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IndexConfig {
    /// Directory holding the shard files. Relative paths are resolved by the caller.
    #[serde(default)]
    pub root: Option<PathBuf>,

    #[serde(default)]
    pub format: ShardFormat,

    /// Upper bound on a single shard fetch (in milliseconds).
    #[serde(default = "IndexConfig::default_load_timeout_ms")]
    pub load_timeout_ms: u64,

    /// Shards larger than this are rejected as malformed.
    #[serde(default = "IndexConfig::default_max_shard_bytes")]
    pub max_shard_bytes: usize,
}

impl IndexConfig {
    fn default_load_timeout_ms() -> u64 {
        2_000
    }

    fn default_max_shard_bytes() -> usize {
        16 * 1024 * 1024
    }

    pub fn load_timeout(&self) -> Duration {
        Duration::from_millis(self.load_timeout_ms.max(1))
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            root: None,
            format: ShardFormat::default(),
            load_timeout_ms: Self::default_load_timeout_ms(),
            max_shard_bytes: Self::default_max_shard_bytes(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Either a simple level (`info`, `debug`, ...) or a full `EnvFilter`
    /// directive string.
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,

    /// Emit logs in JSON format.
    #[serde(default)]
    pub json: bool,

    /// Mirror logs to stderr.
    #[serde(default = "LoggingConfig::default_stderr")]
    pub stderr: bool,

    /// Append logs to the given file path.
    ///
    /// If the file cannot be opened, file logging is disabled while other sinks
    /// remain active.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_owned()
    }

    fn default_stderr() -> bool {
        true
    }

    /// Directives for the configured `level`.
    ///
    /// A bare level name (`WARNING` included) is accepted in any case;
    /// anything else is passed through as `EnvFilter` directives.
    pub fn directives(&self) -> String {
        let level = self.level.trim();
        if level.is_empty() {
            return Self::default_level();
        }
        if level.eq_ignore_ascii_case("warning") {
            return "warn".to_owned();
        }
        match level.parse::<LevelFilter>() {
            Ok(filter) => filter.to_string().to_ascii_lowercase(),
            Err(_) => level.to_owned(),
        }
    }

    /// The effective filter: [`LoggingConfig::directives`] followed by
    /// `RUST_LOG`, so the environment wins for targets both mention.
    ///
    /// Unparseable input falls back to the configured directives alone, then
    /// to `info`.
    pub fn env_filter(&self) -> EnvFilter {
        let configured = self.directives();
        let combined = match std::env::var("RUST_LOG") {
            Ok(env) if !env.trim().is_empty() => format!("{configured},{}", env.trim()),
            _ => configured.clone(),
        };
        EnvFilter::try_new(combined)
            .or_else(|_| EnvFilter::try_new(configured))
            .unwrap_or_else(|_| EnvFilter::new(Self::default_level()))
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
            json: false,
            stderr: Self::default_stderr(),
            file: None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SiftConfig {
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse toml config: {0}")]
    Toml(String),
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        // `Display` includes a snippet of the source document; keep just the
        // message so config contents don't end up in logs.
        ConfigError::Toml(err.message().to_owned())
    }
}

impl SiftConfig {
    pub fn load_from_str(text: &str) -> Result<Self, ConfigError> {
        let mut config: SiftConfig = toml::from_str(text)?;
        config.normalize();
        Ok(config)
    }

    /// Load a config file from TOML.
    ///
    /// A relative `index.root` is resolved against the config file's directory.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let mut config = Self::load_from_str(&text)?;
        if let (Some(root), Some(base)) = (config.index.root.as_ref(), path.parent()) {
            if root.is_relative() {
                config.index.root = Some(base.join(root));
            }
        }
        Ok(config)
    }

    fn normalize(&mut self) {
        if self.index.load_timeout_ms == 0 {
            tracing::warn!(
                target: "sift.config",
                "index.load_timeout_ms = 0 is not usable; falling back to 1ms"
            );
            self.index.load_timeout_ms = 1;
        }
        if self.index.max_shard_bytes == 0 {
            self.index.max_shard_bytes = IndexConfig::default_max_shard_bytes();
        }
    }
}
