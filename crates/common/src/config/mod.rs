//! Configuration management for PetroRAG services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config/default, config/{APP_ENV}, config/local)
//! - Default values

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Language model configuration
    #[serde(default)]
    pub llm: LlmConfig,

    /// Memoization cache configuration
    #[serde(default)]
    pub cache: CacheSettings,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limit: RateLimitSettings,

    /// Query routing configuration
    #[serde(default)]
    pub router: RouterSettings,

    /// Relevance grading configuration
    #[serde(default)]
    pub grader: GraderSettings,

    /// Control loop configuration
    #[serde(default)]
    pub orchestrator: OrchestratorSettings,

    /// Tool service configuration
    #[serde(default)]
    pub tools: ToolSettings,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Per-question timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Maximum concurrent requests
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_requests: usize,

    /// Header carrying the caller identity for rate limiting
    #[serde(default = "default_identity_header")]
    pub identity_header: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LlmConfig {
    /// OpenAI-compatible API base URL
    #[serde(default = "default_llm_base")]
    pub api_base: String,

    /// API key; when absent a scripted mock client is used
    pub api_key: Option<String>,

    /// Model used for rewriting and answering
    #[serde(default = "default_llm_model")]
    pub model: String,

    /// Model used for relevance grading (falls back to `model`)
    pub grade_model: Option<String>,

    /// Request timeout in seconds
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,

    /// Maximum retries
    #[serde(default = "default_llm_retries")]
    pub max_retries: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheSettings {
    /// Default TTL in seconds for memoized model calls
    #[serde(default = "default_cache_ttl")]
    pub default_ttl_secs: u64,

    /// Interval of the expiry sweep in seconds
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitSettings {
    /// Enable per-identity rate limiting
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Bucket capacity per identity
    #[serde(default = "default_capacity")]
    pub capacity: u32,

    /// Tokens refilled per second per identity
    #[serde(default = "default_refill")]
    pub refill_per_second: f64,

    /// Service-wide requests per second (HTTP layer)
    #[serde(default = "default_global_rps")]
    pub global_requests_per_second: u32,

    /// Service-wide burst capacity (HTTP layer)
    #[serde(default = "default_global_burst")]
    pub global_burst: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RouterSettings {
    /// Directory holding the vector store and structured caches
    #[serde(default = "default_persist_dir")]
    pub persist_dir: PathBuf,

    /// File name of the structured parameter cache inside `persist_dir`
    #[serde(default = "default_structured_cache_file")]
    pub structured_cache_file: String,

    /// Tool used when no strategy matches
    #[serde(default = "default_generic_tool")]
    pub generic_tool: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GraderSettings {
    /// Rewrite attempts after which the verdict is forced to sufficient
    #[serde(default = "default_max_rewrites")]
    pub max_rewrites: u32,

    /// Context shorter than this is insufficient
    #[serde(default = "default_min_context")]
    pub min_context_chars: usize,

    /// Context longer than this may be accepted by heuristic shortcuts
    #[serde(default = "default_shortcut_context")]
    pub shortcut_context_chars: usize,

    /// Context prefix length sent to the scoring model
    #[serde(default = "default_max_scored_context")]
    pub max_scored_context_chars: usize,

    /// Words marking a truncated follow-up question
    #[serde(default = "default_continuation_cues")]
    pub continuation_cues: Vec<String>,

    /// Domain terms that, with a matching well name, accept the context
    #[serde(default = "default_entity_shortcut_terms")]
    pub entity_shortcut_terms: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OrchestratorSettings {
    /// Hard ceiling on rewrite attempts
    #[serde(default = "default_max_rewrites")]
    pub max_rewrites: u32,

    /// Message returned when the loop cannot produce an answer
    #[serde(default = "default_apology")]
    pub apology_message: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ToolSettings {
    /// Base URL of the tool execution service
    pub base_url: Option<String>,

    /// Tool request timeout in seconds
    #[serde(default = "default_tool_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Metrics port (0 to disable)
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Service name for tracing
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_request_timeout() -> u64 { 60 }
fn default_max_concurrent() -> usize { 100 }
fn default_identity_header() -> String { "X-Client-ID".to_string() }
fn default_llm_base() -> String { "https://api.openai.com/v1".to_string() }
fn default_llm_model() -> String { crate::DEFAULT_LLM_MODEL.to_string() }
fn default_llm_timeout() -> u64 { 30 }
fn default_llm_retries() -> u32 { 3 }
fn default_cache_ttl() -> u64 { 3600 }
fn default_cleanup_interval() -> u64 { 300 }
fn default_enabled() -> bool { true }
fn default_capacity() -> u32 { 10 }
fn default_refill() -> f64 { 1.0 }
fn default_global_rps() -> u32 { 50 }
fn default_global_burst() -> u32 { 100 }
fn default_persist_dir() -> PathBuf { PathBuf::from("./data/vectorstore") }
fn default_structured_cache_file() -> String { "petro_params_cache.json".to_string() }
fn default_generic_tool() -> String { "retrieve_petrophysical_docs".to_string() }
fn default_max_rewrites() -> u32 { 2 }
fn default_min_context() -> usize { 50 }
fn default_shortcut_context() -> usize { 500 }
fn default_max_scored_context() -> usize { 3000 }
fn default_tool_timeout() -> u64 { 30 }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_metrics_port() -> u16 { 9090 }
fn default_service_name() -> String { "petrorag".to_string() }

fn default_apology() -> String {
    "I'm sorry, I couldn't complete that request. Please rephrase the question or try again shortly."
        .to_string()
}

fn default_continuation_cues() -> Vec<String> {
    ["is", "accordingly", "reported"].iter().map(|s| s.to_string()).collect()
}

fn default_entity_shortcut_terms() -> Vec<String> {
    [
        "model", "evaluation", "sleipner", "volve", "hugin", "skagerak", "formation",
        "accordingly", "reported",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_secs: default_request_timeout(),
            max_concurrent_requests: default_max_concurrent(),
            identity_header: default_identity_header(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_base: default_llm_base(),
            api_key: None,
            model: default_llm_model(),
            grade_model: None,
            timeout_secs: default_llm_timeout(),
            max_retries: default_llm_retries(),
        }
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            default_ttl_secs: default_cache_ttl(),
            cleanup_interval_secs: default_cleanup_interval(),
        }
    }
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            capacity: default_capacity(),
            refill_per_second: default_refill(),
            global_requests_per_second: default_global_rps(),
            global_burst: default_global_burst(),
        }
    }
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            persist_dir: default_persist_dir(),
            structured_cache_file: default_structured_cache_file(),
            generic_tool: default_generic_tool(),
        }
    }
}

impl Default for GraderSettings {
    fn default() -> Self {
        Self {
            max_rewrites: default_max_rewrites(),
            min_context_chars: default_min_context(),
            shortcut_context_chars: default_shortcut_context(),
            max_scored_context_chars: default_max_scored_context(),
            continuation_cues: default_continuation_cues(),
            entity_shortcut_terms: default_entity_shortcut_terms(),
        }
    }
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            max_rewrites: default_max_rewrites(),
            apology_message: default_apology(),
        }
    }
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout_secs: default_tool_timeout(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            metrics_port: default_metrics_port(),
            service_name: default_service_name(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))

            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))

            // Load local overrides
            .add_source(File::with_name("config/local").required(false))

            // Load from environment variables with APP__ prefix
            // e.g., APP__SERVER__PORT=8081
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load from a specific TOML file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }

    /// Get default cache TTL as Duration
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.default_ttl_secs)
    }

    /// Model used for grading (falls back to the generation model)
    pub fn grade_model(&self) -> &str {
        self.llm.grade_model.as_deref().unwrap_or(&self.llm.model)
    }

    /// Full path of the structured parameter cache file
    pub fn structured_cache_path(&self) -> PathBuf {
        self.router.persist_dir.join(&self.router.structured_cache_file)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            llm: LlmConfig::default(),
            cache: CacheSettings::default(),
            rate_limit: RateLimitSettings::default(),
            router: RouterSettings::default(),
            grader: GraderSettings::default(),
            orchestrator: OrchestratorSettings::default(),
            tools: ToolSettings::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.llm.model, "gpt-4o");
        assert_eq!(config.grader.max_rewrites, 2);
        assert_eq!(config.grader.min_context_chars, 50);
        assert_eq!(config.grader.max_scored_context_chars, 3000);
    }

    #[test]
    fn test_grade_model_fallback() {
        let mut config = AppConfig::default();
        assert_eq!(config.grade_model(), "gpt-4o");

        config.llm.grade_model = Some("gpt-4o-mini".to_string());
        assert_eq!(config.grade_model(), "gpt-4o-mini");
    }

    #[test]
    fn test_structured_cache_path() {
        let config = AppConfig::default();
        assert!(config
            .structured_cache_path()
            .ends_with("vectorstore/petro_params_cache.json"));
    }

    #[test]
    fn test_deserialize_partial_sections() {
        let config: AppConfig = Config::builder()
            .set_override("rate_limit.capacity", 3)
            .unwrap()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.rate_limit.capacity, 3);
        assert_eq!(config.rate_limit.refill_per_second, 1.0);
        assert_eq!(config.server.port, 8080);
    }
}
