//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.

use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Allowed provider regions when no explicit endpoint override is set
pub const VALID_REGIONS: &[&str] = &["us", "eu", "ca", "ap", "au"];

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default)]
    pub poll: PollConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Log-search API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default)]
    pub api_key: String,

    #[serde(default = "default_region")]
    pub region: String,

    /// Full base URL override; when set, region is ignored
    pub endpoint: Option<String>,

    #[serde(default)]
    pub log_key: String,

    #[serde(default = "default_query")]
    pub query: String,

    #[serde(default = "default_page_size")]
    pub page_size: u32,

    #[serde(default = "default_rate_limit")]
    pub rate_limit: u32,

    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
}

fn default_region() -> String {
    "us".to_string()
}

fn default_query() -> String {
    "where()".to_string()
}

fn default_page_size() -> u32 {
    500
}

fn default_rate_limit() -> u32 {
    60
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_request_timeout() -> u64 {
    30
}

fn default_max_pages() -> u32 {
    1000
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            region: default_region(),
            endpoint: None,
            log_key: String::new(),
            query: default_query(),
            page_size: default_page_size(),
            rate_limit: default_rate_limit(),
            retry_attempts: default_retry_attempts(),
            request_timeout_secs: default_request_timeout(),
            max_pages: default_max_pages(),
        }
    }
}

/// Query poll loop configuration
#[derive(Debug, Clone, Deserialize)]
pub struct PollConfig {
    #[serde(default = "default_poll_max_iterations")]
    pub max_iterations: u32,

    #[serde(default = "default_poll_max_wall_secs")]
    pub max_wall_secs: u64,

    #[serde(default = "default_poll_stuck_iterations")]
    pub stuck_iterations: u32,

    #[serde(default = "default_poll_initial_delay")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_poll_max_delay")]
    pub max_delay_ms: u64,

    #[serde(default = "default_poll_progress_log_every")]
    pub progress_log_every: u32,
}

fn default_poll_max_iterations() -> u32 {
    300
}

fn default_poll_max_wall_secs() -> u64 {
    900
}

fn default_poll_stuck_iterations() -> u32 {
    25
}

fn default_poll_initial_delay() -> u64 {
    500
}

fn default_poll_max_delay() -> u64 {
    10_000
}

fn default_poll_progress_log_every() -> u32 {
    10
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_poll_max_iterations(),
            max_wall_secs: default_poll_max_wall_secs(),
            stuck_iterations: default_poll_stuck_iterations(),
            initial_delay_ms: default_poll_initial_delay(),
            max_delay_ms: default_poll_max_delay(),
            progress_log_every: default_poll_progress_log_every(),
        }
    }
}

/// Local cache configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_dir")]
    pub cache_dir: String,

    #[serde(default = "default_output_dir")]
    pub output_dir: String,

    /// Fetch everything fresh; fetched segments land under output_dir
    /// instead of the cache
    #[serde(default)]
    pub bypass_cache: bool,

    #[serde(default = "default_flush_rows")]
    pub flush_rows: usize,

    #[serde(default = "default_dedupe_events")]
    pub dedupe_events: bool,
}

fn default_cache_dir() -> String {
    dirs::cache_dir()
        .map(|p| p.join("logcache").to_string_lossy().to_string())
        .unwrap_or_else(|| "./logcache_data".to_string())
}

fn default_output_dir() -> String {
    "./output".to_string()
}

fn default_flush_rows() -> usize {
    50_000
}

fn default_dedupe_events() -> bool {
    true
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            output_dir: default_output_dir(),
            bypass_cache: false,
            flush_rows: default_flush_rows(),
            dedupe_events: default_dedupe_events(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("logcache").join("config.toml")),
            Some(PathBuf::from("/etc/logcache/config.toml")),
            Some(PathBuf::from("./config.toml")),
        ];

        for path_opt in config_paths.iter().flatten() {
            if path_opt.exists() {
                match Self::load_with_env(path_opt) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path_opt);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path_opt, e);
                    }
                }
            }
        }

        tracing::info!("Using default config with environment overrides");
        Self::from_env()
    }

    /// Apply environment variable overrides to an existing config
    fn apply_env_overrides(&mut self) {
        // API overrides
        if let Ok(api_key) = std::env::var("LOGCACHE_API_KEY") {
            self.api.api_key = api_key;
        }
        if let Ok(region) = std::env::var("LOGCACHE_REGION") {
            self.api.region = region;
        }
        if let Ok(endpoint) = std::env::var("LOGCACHE_ENDPOINT") {
            self.api.endpoint = Some(endpoint);
        }
        if let Ok(log_key) = std::env::var("LOGCACHE_LOG_KEY") {
            self.api.log_key = log_key;
        }
        if let Ok(query) = std::env::var("LOGCACHE_QUERY") {
            self.api.query = query;
        }

        // Cache overrides
        if let Ok(cache_dir) = std::env::var("LOGCACHE_CACHE_DIR") {
            self.cache.cache_dir = cache_dir;
        }
        if let Ok(output_dir) = std::env::var("LOGCACHE_OUTPUT_DIR") {
            self.cache.output_dir = output_dir;
        }
        if let Ok(bypass) = std::env::var("LOGCACHE_BYPASS_CACHE") {
            if let Ok(b) = bypass.parse() {
                self.cache.bypass_cache = b;
            }
        }
        if let Ok(flush_rows) = std::env::var("LOGCACHE_FLUSH_ROWS") {
            if let Ok(n) = flush_rows.parse() {
                self.cache.flush_rows = n;
            }
        }
        if let Ok(dedupe) = std::env::var("LOGCACHE_DEDUPE_EVENTS") {
            if let Ok(b) = dedupe.parse() {
                self.cache.dedupe_events = b;
            }
        }

        // Logging overrides
        if let Ok(level) = std::env::var("LOGCACHE_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("LOGCACHE_LOG_FORMAT") {
            self.logging.format = format;
        }
    }

    /// Validate bounds and required fields
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api.api_key.is_empty() {
            return Err(ConfigError::Invalid("api.api_key must be set".to_string()));
        }
        if self.api.log_key.is_empty() {
            return Err(ConfigError::Invalid("api.log_key must be set".to_string()));
        }
        if self.api.endpoint.is_none() && !VALID_REGIONS.contains(&self.api.region.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "api.region must be one of {:?}, got {:?}",
                VALID_REGIONS, self.api.region
            )));
        }
        if !(100..=10_000).contains(&self.api.page_size) {
            return Err(ConfigError::Invalid(format!(
                "api.page_size must be in 100..=10000, got {}",
                self.api.page_size
            )));
        }
        if !(1..=1000).contains(&self.api.rate_limit) {
            return Err(ConfigError::Invalid(format!(
                "api.rate_limit must be in 1..=1000, got {}",
                self.api.rate_limit
            )));
        }
        if !(1..=10).contains(&self.api.retry_attempts) {
            return Err(ConfigError::Invalid(format!(
                "api.retry_attempts must be in 1..=10, got {}",
                self.api.retry_attempts
            )));
        }
        if self.cache.flush_rows == 0 {
            return Err(ConfigError::Invalid(
                "cache.flush_rows must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Effective API base URL
    pub fn endpoint(&self) -> String {
        match &self.api.endpoint {
            Some(endpoint) => endpoint.trim_end_matches('/').to_string(),
            None => format!("https://{}.rest.logs.insight.rapid7.com", self.api.region),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api: ApiConfig::default(),
            poll: PollConfig::default(),
            cache: CacheConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# logcache Configuration
#
# Environment variables override these settings:
# - LOGCACHE_API_KEY
# - LOGCACHE_REGION
# - LOGCACHE_ENDPOINT
# - LOGCACHE_LOG_KEY
# - LOGCACHE_QUERY
# - LOGCACHE_CACHE_DIR
# - LOGCACHE_OUTPUT_DIR
# - LOGCACHE_BYPASS_CACHE
# - LOGCACHE_FLUSH_ROWS
# - LOGCACHE_DEDUPE_EVENTS
# - LOGCACHE_LOG_LEVEL
# - LOGCACHE_LOG_FORMAT

[api]
# API key for the log-search service
api_key = ""

# Provider region: us, eu, ca, ap, au
region = "us"

# Log key to query
log_key = ""

# LEQL query to run over the window
query = "where()"

# Events per page (100-10000)
page_size = 500

# Requests per minute (1-1000)
rate_limit = 60

# Attempts per request on transient failures (1-10)
retry_attempts = 3

# HTTP request timeout in seconds
request_timeout_secs = 30

# Pagination ceiling per fetch window
max_pages = 1000

[poll]
# Poll iteration ceiling per page
max_iterations = 300

# Poll wall-clock ceiling per page (seconds)
max_wall_secs = 900

# Identical poll URLs before declaring the query stuck
stuck_iterations = 25

# First poll delay (ms), doubling up to max_delay_ms
initial_delay_ms = 500
max_delay_ms = 10000

# Emit a poll progress log every N iterations
progress_log_every = 10

[cache]
# Directory for cached segments
cache_dir = "~/.cache/logcache"

# Directory for run summaries and bypass-mode segments
output_dir = "./output"

# Skip the cache entirely; fetched data lands under output_dir
bypass_cache = false

# Rows per part file flush
flush_rows = 50000

# Drop events with a repeated sequence identity
dedupe_events = true

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        let mut config = Config::default();
        config.api.api_key = "key".to_string();
        config.api.log_key = "log".to_string();
        config
    }

    #[test]
    fn test_defaults_parse_from_empty_toml() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.api.region, "us");
        assert_eq!(config.api.page_size, 500);
        assert_eq!(config.cache.flush_rows, 50_000);
        assert!(config.cache.dedupe_events);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_load_toml_sections() {
        let config: Config = toml::from_str(
            r#"
            [api]
            api_key = "k"
            log_key = "l"
            region = "eu"
            page_size = 1000

            [cache]
            bypass_cache = true
            "#,
        )
        .unwrap();
        assert_eq!(config.api.region, "eu");
        assert_eq!(config.api.page_size, 1000);
        assert!(config.cache.bypass_cache);
    }

    #[test]
    fn test_generated_default_config_parses() {
        let config: Config = toml::from_str(&generate_default_config()).unwrap();
        assert_eq!(config.api.page_size, 500);
        assert_eq!(config.poll.max_iterations, 300);
    }

    #[test]
    fn test_validate_accepts_valid() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_validate_requires_keys() {
        let mut config = valid_config();
        config.api.api_key = String::new();
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.api.log_key = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_region_unless_endpoint_set() {
        let mut config = valid_config();
        config.api.region = "mars".to_string();
        assert!(config.validate().is_err());

        config.api.endpoint = Some("https://logs.example.com".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_bounds() {
        let mut config = valid_config();
        config.api.page_size = 99;
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.api.page_size = 10_001;
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.api.rate_limit = 0;
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.api.retry_attempts = 11;
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.cache.flush_rows = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_endpoint_from_region_or_override() {
        let mut config = valid_config();
        config.api.region = "eu".to_string();
        assert_eq!(
            config.endpoint(),
            "https://eu.rest.logs.insight.rapid7.com"
        );

        config.api.endpoint = Some("https://logs.example.com/".to_string());
        assert_eq!(config.endpoint(), "https://logs.example.com");
    }
}
