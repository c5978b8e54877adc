//! Query router - picks one tool action per question
//!
//! Strategies are plain records (name, priority, predicate, action) kept
//! sorted by ascending priority. The first strategy whose predicate accepts
//! the question builds the decision; when none does, a generic retrieval
//! call is issued.

pub mod strategies;

use petrorag_common::config::RouterSettings;
use petrorag_common::errors::{AppError, ErrorKind, Result};
use petrorag_common::{metrics, NormalizedQuery, ToolCall};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub use strategies::RouteKeywords;

/// Name reported for the no-match fallback
pub const GENERIC_STRATEGY: &str = "generic";

/// Router configuration
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Tool used when no strategy matches
    pub generic_tool: String,

    /// Structured parameter cache; its presence enables parameter routing
    /// for questions without a resolved well
    pub structured_cache_path: Option<PathBuf>,

    /// Keyword sets of the built-in strategies
    pub keywords: RouteKeywords,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            generic_tool: "retrieve_petrophysical_docs".to_string(),
            structured_cache_path: None,
            keywords: RouteKeywords::default(),
        }
    }
}

impl From<&RouterSettings> for RouterConfig {
    fn from(settings: &RouterSettings) -> Self {
        Self {
            generic_tool: settings.generic_tool.clone(),
            structured_cache_path: Some(settings.persist_dir.join(&settings.structured_cache_file)),
            keywords: RouteKeywords::default(),
        }
    }
}

/// The action chosen for one question
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoutingDecision {
    /// Strategy that produced the decision
    pub strategy: String,

    /// Primary tool call
    pub call: ToolCall,

    /// Additional calls issued alongside the primary one
    pub fallbacks: Vec<ToolCall>,
}

impl RoutingDecision {
    /// Decision with a single `{query}` call to `tool`
    pub fn new(strategy: &str, tool: &str, query: &str) -> Result<Self> {
        Ok(Self {
            strategy: strategy.to_string(),
            call: tool_call(tool, query)?,
            fallbacks: Vec::new(),
        })
    }

    /// Add a fallback call
    pub fn with_fallback(mut self, tool: &str, query: &str) -> Result<Self> {
        self.fallbacks.push(tool_call(tool, query)?);
        Ok(self)
    }

    /// Primary tool name
    pub fn tool(&self) -> &str {
        &self.call.name
    }

    /// Primary call followed by fallbacks
    pub fn calls(&self) -> impl Iterator<Item = &ToolCall> {
        std::iter::once(&self.call).chain(self.fallbacks.iter())
    }
}

/// Build a `{query}` call with a fresh unique id
pub fn tool_call(tool: &str, query: &str) -> Result<ToolCall> {
    let query = query.trim();
    if query.is_empty() {
        return Err(AppError::routing("Cannot build a tool call without a query")
            .with_context("tool", tool));
    }

    Ok(ToolCall {
        name: tool.to_string(),
        args: serde_json::json!({ "query": query }),
        id: format!("call_{}_{}", tool, Uuid::new_v4().simple()),
    })
}

/// Everything a strategy may inspect
#[derive(Debug, Clone, Copy)]
pub struct RouteInput<'a> {
    /// Latest user question
    pub question: &'a str,

    /// Lowercased question
    pub question_lower: &'a str,

    /// Normalized view of the question
    pub query: &'a NormalizedQuery,

    /// Whether the structured parameter cache exists
    pub structured_cache_hint: bool,

    /// Configured generic retrieval tool
    pub generic_tool: &'a str,
}

type Predicate = Arc<dyn Fn(&RouteInput<'_>) -> bool + Send + Sync>;
type Action = Arc<dyn Fn(&RouteInput<'_>) -> Result<RoutingDecision> + Send + Sync>;

/// Predicate + action pair deciding which tool handles a question
#[derive(Clone)]
pub struct RoutingStrategy {
    name: String,
    priority: u32,
    should_route: Predicate,
    route: Action,
}

impl RoutingStrategy {
    /// Lower priorities are tried first
    pub fn new<P, A>(name: impl Into<String>, priority: u32, should_route: P, route: A) -> Self
    where
        P: Fn(&RouteInput<'_>) -> bool + Send + Sync + 'static,
        A: Fn(&RouteInput<'_>) -> Result<RoutingDecision> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            priority,
            should_route: Arc::new(should_route),
            route: Arc::new(route),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn priority(&self) -> u32 {
        self.priority
    }

    pub fn should_route(&self, input: &RouteInput<'_>) -> bool {
        (self.should_route)(input)
    }

    /// Build the decision; any failure is reported as a routing error
    pub fn route(&self, input: &RouteInput<'_>) -> Result<RoutingDecision> {
        (self.route)(input).map_err(|e| {
            if e.kind() == ErrorKind::Routing {
                e.with_context("strategy", self.name.as_str())
            } else {
                AppError::routing(format!("Strategy '{}' failed: {}", self.name, e.message()))
                    .with_context("strategy", self.name.as_str())
                    .with_source(e)
            }
        })
    }
}

impl std::fmt::Debug for RoutingStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoutingStrategy")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .finish()
    }
}

/// Priority-ordered strategy list
pub struct Router {
    strategies: Vec<RoutingStrategy>,
    config: RouterConfig,
    structured_cache_hint: bool,
}

impl Router {
    /// Router with no strategies; every question takes the generic route
    pub fn new(config: RouterConfig) -> Self {
        let structured_cache_hint = match &config.structured_cache_path {
            Some(path) => path.exists(),
            None => false,
        };
        debug!(structured_cache_hint, "Router created");

        Self {
            strategies: Vec::new(),
            config,
            structured_cache_hint,
        }
    }

    /// Router with the built-in depth, parameter, evaluation and section strategies
    pub fn with_default_strategies(config: RouterConfig) -> Self {
        let keywords = config.keywords.clone();
        let mut router = Self::new(config);
        for strategy in strategies::defaults(&keywords) {
            router.push(strategy);
        }
        router
    }

    /// Add a strategy; equal priorities keep insertion order
    pub fn push(&mut self, strategy: RoutingStrategy) {
        self.strategies.push(strategy);
        self.strategies.sort_by_key(|s| s.priority);
    }

    /// Strategies in evaluation order
    pub fn strategies(&self) -> &[RoutingStrategy] {
        &self.strategies
    }

    pub fn structured_cache_hint(&self) -> bool {
        self.structured_cache_hint
    }

    /// Pick the action for `question`
    ///
    /// Only predicates take part in selection: once a strategy is chosen its
    /// failure is returned as is, without trying lower priorities.
    pub fn route(&self, question: &str, query: &NormalizedQuery) -> Result<RoutingDecision> {
        let question_lower = question.to_lowercase();
        let input = RouteInput {
            question,
            question_lower: &question_lower,
            query,
            structured_cache_hint: self.structured_cache_hint,
            generic_tool: &self.config.generic_tool,
        };

        let selected = self.strategies.iter().find(|s| s.should_route(&input));

        let decision = match selected {
            Some(strategy) => {
                let decision = strategy.route(&input).map_err(|e| {
                    warn!(strategy = %strategy.name, error = %e, "Routing strategy failed");
                    e
                })?;
                info!(
                    strategy = %strategy.name,
                    tool = %decision.tool(),
                    priority = strategy.priority,
                    fallbacks = decision.fallbacks.len(),
                    "Route selected"
                );
                decision
            }
            None => {
                let decision =
                    RoutingDecision::new(GENERIC_STRATEGY, &self.config.generic_tool, &query.tool_query)
                        .or_else(|_| {
                            RoutingDecision::new(GENERIC_STRATEGY, &self.config.generic_tool, question)
                        })?;
                info!(strategy = GENERIC_STRATEGY, tool = %decision.tool(), "Route selected");
                decision
            }
        };

        metrics::record_route(&decision.strategy);
        Ok(decision)
    }
}
