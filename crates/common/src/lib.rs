//! PetroRAG Common Library
//!
//! Shared code for the PetroRAG services including:
//! - Error types, sanitization and handling
//! - Configuration management
//! - TTL memoization cache and call fingerprints
//! - Per-identity token-bucket rate limiting
//! - Conversation model and query understanding
//! - LLM client abstraction
//! - Metrics and observability

pub mod cache;
pub mod config;
pub mod conversation;
pub mod errors;
pub mod llm;
pub mod metrics;
pub mod query;
pub mod rate_limit;
pub mod validation;
pub mod wells;

// Re-export commonly used types
pub use cache::{CacheStats, TtlCache};
pub use config::AppConfig;
pub use conversation::{Role, ToolCall, Turn};
pub use errors::{AppError, ErrorKind, Result};
pub use llm::LlmClient;
pub use query::{NormalizedQuery, QueryIntent, QueryNormalizer};
pub use rate_limit::{Admitted, RateLimiter};
pub use wells::EntityExtractor;

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default chat model used for generation and grading
pub const DEFAULT_LLM_MODEL: &str = "gpt-4o";
