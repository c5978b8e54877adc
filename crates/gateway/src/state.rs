//! Service wiring
//!
//! Every collaborator of the control loop is constructed here, once, and
//! shared by all requests through [`AppState`].

use petrorag_common::cache::CacheConfig;
use petrorag_common::errors::Result;
use petrorag_common::llm::{LlmRelevanceScorer, MockLlmClient, OpenAiChatClient};
use petrorag_common::query::{HeuristicNormalizer, NormalizerConfig};
use petrorag_common::wells::VolveEntityExtractor;
use petrorag_common::{AppConfig, EntityExtractor, LlmClient, RateLimiter, TtlCache};
use petrorag_context::grader::default_shortcuts;
use petrorag_context::{
    Grader, GraderConfig, HttpToolExecutor, LlmAnswerGenerator, Orchestrator, Rewriter, Router,
    RouterConfig, Services, StaticToolExecutor, ToolExecutor,
};
use std::sync::Arc;
use tracing::{info, warn};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub orchestrator: Arc<Orchestrator>,
    pub cache: Arc<TtlCache>,
    pub limiter: Arc<RateLimiter>,
    /// A real model endpoint is configured (otherwise the mock client answers)
    pub llm_configured: bool,
    /// A tool service is configured (otherwise the static executor answers)
    pub tools_configured: bool,
}

/// Model clients used by the loop
pub struct ModelClients {
    pub generation: Arc<dyn LlmClient>,
    pub grading: Arc<dyn LlmClient>,
}

impl ModelClients {
    fn from_config(config: &AppConfig) -> Result<(Self, bool)> {
        let has_key = config
            .llm
            .api_key
            .as_deref()
            .is_some_and(|key| !key.trim().is_empty());

        if !has_key {
            warn!("No LLM API key configured, answering with the development mock");
            let mock: Arc<dyn LlmClient> = Arc::new(MockLlmClient::new());
            return Ok((
                Self {
                    generation: mock.clone(),
                    grading: mock,
                },
                false,
            ));
        }

        let generation = OpenAiChatClient::new(&config.llm, config.llm.model.clone())?;
        let grading = OpenAiChatClient::new(&config.llm, config.grade_model())?;
        info!(
            model = %config.llm.model,
            grade_model = %config.grade_model(),
            "LLM clients initialized"
        );

        Ok((
            Self {
                generation: Arc::new(generation),
                grading: Arc::new(grading),
            },
            true,
        ))
    }
}

/// Build the state from configuration, choosing real or development backends
pub fn build_state(config: AppConfig) -> Result<AppState> {
    let (models, llm_configured) = ModelClients::from_config(&config)?;

    let (tools, tools_configured): (Arc<dyn ToolExecutor>, bool) =
        match HttpToolExecutor::from_settings(&config.tools)? {
            Some(executor) => {
                info!(base_url = ?config.tools.base_url, "Tool service configured");
                (Arc::new(executor), true)
            }
            None => {
                warn!("No tool service configured, every retrieval will fail over to an apology");
                (Arc::new(StaticToolExecutor::new()), false)
            }
        };

    let mut state = assemble(config, models, tools)?;
    state.llm_configured = llm_configured;
    state.tools_configured = tools_configured;
    Ok(state)
}

/// Wire the loop around the given model clients and tool executor
pub fn assemble(
    config: AppConfig,
    models: ModelClients,
    tools: Arc<dyn ToolExecutor>,
) -> Result<AppState> {
    let cache = Arc::new(TtlCache::new(CacheConfig {
        default_ttl: config.cache_ttl(),
        name: "llm".to_string(),
    }));
    let limiter = Arc::new(RateLimiter::new((&config.rate_limit).into())?);

    let extractor: Arc<dyn EntityExtractor> = Arc::new(VolveEntityExtractor::default());
    let normalizer = HeuristicNormalizer::new(NormalizerConfig::default(), extractor.clone());

    let router = Router::with_default_strategies(RouterConfig::from(&config.router));
    info!(
        strategies = router.strategies().len(),
        structured_cache = router.structured_cache_hint(),
        "Router initialized"
    );

    let grader = Grader::new(
        GraderConfig::from(&config.grader),
        Arc::new(LlmRelevanceScorer::new(models.grading)),
        cache.clone(),
    )
    .with_shortcuts(default_shortcuts(&config.grader, extractor.clone()));

    let services = Services {
        limiter: limiter.clone(),
        normalizer: Arc::new(normalizer),
        extractor,
        router: Arc::new(router),
        tools,
        grader: Arc::new(grader),
        rewriter: Arc::new(Rewriter::new(models.generation.clone(), cache.clone())),
        answerer: Arc::new(LlmAnswerGenerator::new(models.generation)),
    };

    let orchestrator = Orchestrator::new(config.orchestrator.clone().into(), services);

    Ok(AppState {
        config: Arc::new(config),
        orchestrator: Arc::new(orchestrator),
        cache,
        limiter,
        llm_configured: false,
        tools_configured: false,
    })
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// State backed by a scripted model and static tools
    pub fn state_with(llm: Arc<MockLlmClient>, tools: StaticToolExecutor) -> AppState {
        let models = ModelClients {
            generation: llm.clone(),
            grading: llm,
        };
        assemble(AppConfig::default(), models, Arc::new(tools)).unwrap()
    }
}
