//! Retrieval control loop
//!
//! `Admit → Route → Execute → Grade → {Answer, Rewrite → Route}`
//!
//! The loop runs at most `max_rewrites + 1` route/execute/grade cycles. The
//! ceiling is enforced here and, independently, by the grader. Only
//! rate-limit, validation and cancellation failures reach the caller as
//! errors; routing and processing failures become an apology answer.

use crate::answer::AnswerGenerator;
use crate::grader::{GradeSource, GradeVerdict, Grader, Verdict};
use crate::rewriter::Rewriter;
use crate::router::{Router, RoutingDecision};
use crate::tools::{execute_decision, ToolExecutor};
use petrorag_common::config::OrchestratorSettings;
use petrorag_common::conversation::{infer_recent_context, latest_user_question};
use petrorag_common::errors::{AppError, ErrorKind, Result};
use petrorag_common::{
    metrics, EntityExtractor, NormalizedQuery, QueryNormalizer, RateLimiter, Turn,
};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Orchestrator configuration
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Hard ceiling on rewrite attempts
    pub max_rewrites: u32,
    /// Answer returned when the loop cannot produce one
    pub apology_message: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        OrchestratorSettings::default().into()
    }
}

impl From<OrchestratorSettings> for OrchestratorConfig {
    fn from(settings: OrchestratorSettings) -> Self {
        Self {
            max_rewrites: settings.max_rewrites,
            apology_message: settings.apology_message,
        }
    }
}

/// Collaborators of the control loop
pub struct Services {
    pub limiter: Arc<RateLimiter>,
    pub normalizer: Arc<dyn QueryNormalizer>,
    pub extractor: Arc<dyn EntityExtractor>,
    pub router: Arc<Router>,
    pub tools: Arc<dyn ToolExecutor>,
    pub grader: Arc<Grader>,
    pub rewriter: Arc<Rewriter>,
    pub answerer: Arc<dyn AnswerGenerator>,
}

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    /// Answer generated from graded context
    Answered,
    /// Routing or processing failed; the answer is the apology message
    Apology,
}

impl OutcomeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeStatus::Answered => "answered",
            OutcomeStatus::Apology => "apology",
        }
    }
}

/// One route/execute/grade cycle
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteStep {
    pub strategy: String,
    pub tool: String,
    pub fallbacks: Vec<String>,
    pub query: String,
    pub verdict: Option<Verdict>,
    pub grade_source: Option<GradeSource>,
}

impl RouteStep {
    fn from_decision(decision: &RoutingDecision) -> Self {
        Self {
            strategy: decision.strategy.clone(),
            tool: decision.tool().to_string(),
            fallbacks: decision.fallbacks.iter().map(|c| c.name.clone()).collect(),
            query: decision.call.query().unwrap_or_default().to_string(),
            verdict: None,
            grade_source: None,
        }
    }
}

/// Result of one control loop run
#[derive(Debug, Clone, Serialize)]
pub struct Outcome {
    pub answer: String,
    pub status: OutcomeStatus,
    pub cycles: u32,
    pub rewrite_attempts: u32,
    pub route_trail: Vec<RouteStep>,
    /// Conversation including every turn the loop appended
    #[serde(skip)]
    pub turns: Vec<Turn>,
}

/// Mutable state of one run
struct Run {
    turns: Vec<Turn>,
    original_question: String,
    cycles: u32,
    rewrite_attempts: u32,
    trail: Vec<RouteStep>,
}

/// The retrieval control loop
pub struct Orchestrator {
    config: OrchestratorConfig,
    services: Services,
}

impl Orchestrator {
    pub fn new(config: OrchestratorConfig, services: Services) -> Self {
        Self { config, services }
    }

    /// Answer the latest user question in `turns` on behalf of `identity`
    ///
    /// Cancelling `cancel` aborts the run at its next suspension point.
    #[instrument(skip(self, turns, cancel), fields(turns = turns.len()))]
    pub async fn run(
        &self,
        identity: &str,
        turns: Vec<Turn>,
        cancel: &CancellationToken,
    ) -> Result<Outcome> {
        let start = Instant::now();

        self.admit(identity)?;

        let question = latest_user_question(&turns).trim().to_string();
        if question.is_empty() {
            return Err(AppError::validation("Conversation has no question to answer")
                .with_context("field", "messages"));
        }

        let mut run = Run {
            turns,
            original_question: question,
            cycles: 0,
            rewrite_attempts: 0,
            trail: Vec::new(),
        };

        let result = self.drive(&mut run, cancel).await;

        let outcome = match result {
            Ok(answer) => self.finish(run, answer, OutcomeStatus::Answered),
            Err(e) if matches!(e.kind(), ErrorKind::Routing | ErrorKind::Processing) => {
                error!(error = %e, cycles = run.cycles, "Control loop failed, returning apology");
                let apology = self.config.apology_message.clone();
                self.finish(run, apology, OutcomeStatus::Apology)
            }
            Err(e) => {
                metrics::record_orchestration(
                    start.elapsed().as_secs_f64(),
                    run.cycles as usize,
                    e.kind().as_str(),
                );
                return Err(e);
            }
        };

        info!(
            status = outcome.status.as_str(),
            cycles = outcome.cycles,
            rewrite_attempts = outcome.rewrite_attempts,
            "Question handled"
        );
        metrics::record_orchestration(
            start.elapsed().as_secs_f64(),
            outcome.cycles as usize,
            outcome.status.as_str(),
        );
        Ok(outcome)
    }

    /// Rate limit rejections are final; limiter faults admit the request
    fn admit(&self, identity: &str) -> Result<()> {
        match self.services.limiter.check_rate_limit(identity) {
            Ok(admitted) => {
                debug!(identity, remaining = admitted.remaining, "Request admitted");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::RateLimitExceeded => Err(e),
            Err(e) => {
                warn!(identity, error = %e, "Rate limiter unavailable, admitting request");
                Ok(())
            }
        }
    }

    async fn drive(&self, run: &mut Run, cancel: &CancellationToken) -> Result<String> {
        loop {
            if cancel.is_cancelled() {
                return Err(cancelled(run));
            }
            run.cycles += 1;

            // Route
            let question = latest_user_question(&run.turns).to_string();
            let query = self.normalize(&question, &run.turns);
            let decision = self.services.router.route(&question, &query)?;
            run.trail.push(RouteStep::from_decision(&decision));

            // Execute
            run.turns
                .push(Turn::tool_request(decision.calls().cloned().collect()));
            let results = guarded(
                cancel,
                run,
                execute_decision(self.services.tools.as_ref(), &decision),
            )
            .await?;
            run.turns.extend(results);

            // Grade
            let verdict = self.grade(run).await;
            if let Some(step) = run.trail.last_mut() {
                step.verdict = Some(verdict.verdict);
                step.grade_source = Some(verdict.source);
            }

            if verdict.verdict.is_sufficient() || run.rewrite_attempts >= self.config.max_rewrites {
                break;
            }

            // Rewrite
            let rewritten = guarded(cancel, run, self.services.rewriter.rewrite(&run.turns)).await;
            let next = match rewritten {
                Ok(turn) => turn,
                Err(e) if e.kind() == ErrorKind::Cancelled => return Err(e),
                Err(e) => {
                    warn!(error = %e, "Rewrite failed, retrying with the original question");
                    Turn::user(run.original_question.clone())
                }
            };
            run.turns.push(next);
            run.rewrite_attempts += 1;
        }

        // Answer
        guarded(cancel, run, self.services.answerer.generate(&run.turns)).await
    }

    async fn grade(&self, run: &Run) -> GradeVerdict {
        match self
            .services
            .grader
            .grade_for(&run.original_question, &run.turns, run.rewrite_attempts)
            .await
        {
            Ok(verdict) => verdict,
            Err(e) => {
                warn!(error = %e, "Grading failed, proceeding to answer");
                GradeVerdict {
                    verdict: Verdict::Sufficient,
                    rewrite_attempts: run.rewrite_attempts,
                    source: GradeSource::FailOpen,
                }
            }
        }
    }

    /// Normalize `question`, filling a missing well or formation from
    /// earlier turns
    fn normalize(&self, question: &str, turns: &[Turn]) -> NormalizedQuery {
        let mut query = self.services.normalizer.normalize(question);
        if query.well.is_some() && query.formation.is_some() {
            return query;
        }

        let (well, formation) = infer_recent_context(turns, self.services.extractor.as_ref());
        if query.well.is_none() {
            if let Some(well) = well {
                if !query.tool_query.contains(&well) {
                    query.tool_query = format!("{} {}", query.tool_query, well);
                }
                debug!(well = %well, "Well inherited from conversation");
                query.well = Some(well);
            }
        }
        if query.formation.is_none() {
            if let Some(formation) = formation {
                if !query.tool_query.contains(&formation) {
                    query.tool_query = format!("{} {}", query.tool_query, formation);
                }
                debug!(formation = %formation, "Formation inherited from conversation");
                query.formation = Some(formation);
            }
        }
        query
    }

    fn finish(&self, mut run: Run, answer: String, status: OutcomeStatus) -> Outcome {
        run.turns.push(Turn::assistant(answer.clone()));
        Outcome {
            answer,
            status,
            cycles: run.cycles,
            rewrite_attempts: run.rewrite_attempts,
            route_trail: run.trail,
            turns: run.turns,
        }
    }
}

fn cancelled(run: &Run) -> AppError {
    AppError::cancelled("Request cancelled").with_context("cycles", run.cycles)
}

/// Await `fut` unless `cancel` fires first
async fn guarded<T>(
    cancel: &CancellationToken,
    run: &Run,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(cancelled(run)),
        result = fut => result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::answer::LlmAnswerGenerator;
    use crate::grader::{GraderConfig, Grader};
    use crate::router::RouterConfig;
    use crate::tools::StaticToolExecutor;
    use async_trait::async_trait;
    use petrorag_common::llm::{LlmRelevanceScorer, MockLlmClient};
    use petrorag_common::query::HeuristicNormalizer;
    use petrorag_common::rate_limit::RateLimitConfig;
    use petrorag_common::wells::VolveEntityExtractor;
    use petrorag_common::TtlCache;
    use std::time::Duration;

    const LONG: &str = "Hugin formation in 15/9-F-5 has average porosity 0.21 and NTG 0.82 \
                        according to the CPI evaluation.";

    struct Harness {
        llm: Arc<MockLlmClient>,
        tools: Arc<StaticToolExecutor>,
        orchestrator: Orchestrator,
    }

    fn harness(llm: MockLlmClient, tools: StaticToolExecutor, capacity: u32) -> Harness {
        let llm = Arc::new(llm);
        let tools = Arc::new(tools);
        let cache = Arc::new(TtlCache::default());
        let extractor: Arc<dyn EntityExtractor> = Arc::new(VolveEntityExtractor::default());

        let services = Services {
            limiter: Arc::new(
                RateLimiter::new(RateLimitConfig {
                    capacity,
                    refill_per_second: 0.01,
                    enabled: true,
                })
                .unwrap(),
            ),
            normalizer: Arc::new(HeuristicNormalizer::default()),
            extractor,
            router: Arc::new(Router::with_default_strategies(RouterConfig::default())),
            tools: tools.clone(),
            grader: Arc::new(Grader::new(
                GraderConfig::default(),
                Arc::new(LlmRelevanceScorer::new(llm.clone())),
                cache.clone(),
            )),
            rewriter: Arc::new(Rewriter::new(llm.clone(), cache)),
            answerer: Arc::new(LlmAnswerGenerator::new(llm.clone())),
        };

        Harness {
            llm,
            tools,
            orchestrator: Orchestrator::new(OrchestratorConfig::default(), services),
        }
    }

    #[tokio::test]
    async fn test_sufficient_first_cycle_answers() {
        let llm = MockLlmClient::new();
        llm.push_reply("yes").push_reply("Porosity is 0.21.");
        let h = harness(
            llm,
            StaticToolExecutor::new().with_response("lookup_petrophysical_params", LONG),
            10,
        );

        let outcome = h
            .orchestrator
            .run(
                "alice",
                vec![Turn::user("What is the porosity of 15/9-F-5?")],
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(outcome.status, OutcomeStatus::Answered);
        assert_eq!(outcome.answer, "Porosity is 0.21.");
        assert_eq!(outcome.cycles, 1);
        assert_eq!(outcome.rewrite_attempts, 0);
        assert_eq!(outcome.route_trail[0].strategy, "petro_params");
        assert_eq!(outcome.route_trail[0].verdict, Some(Verdict::Sufficient));
        assert!(outcome.turns.last().is_some_and(|t| t.content == "Porosity is 0.21."));
    }

    #[tokio::test]
    async fn test_rewrite_loop_terminates_within_three_cycles() {
        // Every grade says no; the third grade is forced sufficient
        let llm = MockLlmClient::with_default("no");
        let h = harness(
            llm,
            StaticToolExecutor::new().with_response("retrieve_petrophysical_docs", "short"),
            10,
        );

        let outcome = h
            .orchestrator
            .run("alice", vec![Turn::user("Tell me about the reservoir")], &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.cycles, 3);
        assert_eq!(outcome.rewrite_attempts, 2);
        let sources: Vec<_> = outcome.route_trail.iter().map(|s| s.grade_source).collect();
        assert_eq!(
            sources,
            vec![
                Some(GradeSource::TooShort),
                Some(GradeSource::TooShort),
                Some(GradeSource::Forced)
            ]
        );
        assert_eq!(h.tools.call_count("retrieve_petrophysical_docs"), 3);
    }

    #[tokio::test]
    async fn test_rate_limit_rejection_is_error() {
        let h = harness(MockLlmClient::new(), StaticToolExecutor::new(), 1);
        let cancel = CancellationToken::new();

        // First request consumes the only token (and apologizes: no tools)
        let first = h
            .orchestrator
            .run("bob", vec![Turn::user("Tell me about the reservoir")], &cancel)
            .await
            .unwrap();
        assert_eq!(first.status, OutcomeStatus::Apology);

        let err = h
            .orchestrator
            .run("bob", vec![Turn::user("Tell me about the reservoir")], &cancel)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RateLimitExceeded);
        assert!(err.retry_after_secs().is_some());
    }

    #[tokio::test]
    async fn test_empty_question_is_validation_error() {
        let h = harness(MockLlmClient::new(), StaticToolExecutor::new(), 10);
        let err = h
            .orchestrator
            .run("alice", vec![Turn::user("   ")], &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_rewrite_failure_reuses_original_question() {
        let llm = MockLlmClient::new();
        llm.push_reply("no").push_failure("rewrite model down");
        let h = harness(
            llm,
            StaticToolExecutor::new().with_response("retrieve_petrophysical_docs", LONG),
            10,
        );

        let outcome = h
            .orchestrator
            .run("alice", vec![Turn::user("Describe the reservoir quality")], &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.status, OutcomeStatus::Answered);
        assert_eq!(outcome.rewrite_attempts, 1);
        let user_turns: Vec<&str> = outcome
            .turns
            .iter()
            .filter(|t| t.is_user())
            .map(|t| t.content.as_str())
            .collect();
        assert_eq!(user_turns, vec!["Describe the reservoir quality"; 2]);
    }

    #[tokio::test]
    async fn test_rewritten_cycles_are_graded_against_the_asked_question() {
        let llm = MockLlmClient::new();
        llm.push_reply("no")
            .push_reply("Summarize reservoir quality for the Hugin interval")
            .push_reply("yes")
            .push_reply("Good quality sand.");
        let h = harness(
            llm,
            StaticToolExecutor::new().with_response("retrieve_petrophysical_docs", LONG),
            10,
        );

        let outcome = h
            .orchestrator
            .run("alice", vec![Turn::user("Describe the reservoir quality")], &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.cycles, 2);
        assert_eq!(outcome.answer, "Good quality sand.");

        let second_grade = &h.llm.prompts()[2];
        assert!(second_grade.contains("Describe the reservoir quality"));
        assert!(!second_grade.contains("Summarize reservoir quality"));
    }

    #[tokio::test]
    async fn test_follow_up_inherits_well_and_formation() {
        let llm = MockLlmClient::with_default("yes");
        let h = harness(
            llm,
            StaticToolExecutor::new()
                .with_response("lookup_evaluation_parameters", LONG)
                .with_response("retrieve_petrophysical_docs", LONG),
            10,
        );

        let turns = vec![
            Turn::user("What is the porosity of Hugin in 15/9-F-5?"),
            Turn::assistant("Average porosity is 0.21."),
            Turn::user("and the matrix density?"),
        ];
        let outcome = h
            .orchestrator
            .run("alice", turns, &CancellationToken::new())
            .await
            .unwrap();

        let step = &outcome.route_trail[0];
        assert_eq!(step.strategy, "eval_params");
        assert!(step.query.contains("15/9-F-5"));
        assert!(step.query.contains("Hugin"));
        assert_eq!(step.fallbacks, vec!["retrieve_petrophysical_docs"]);
    }

    struct SlowTools;

    #[async_trait]
    impl ToolExecutor for SlowTools {
        async fn execute(&self, _call: &petrorag_common::ToolCall) -> Result<String> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(LONG.to_string())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_aborts_at_suspension_point() {
        let mut h = harness(MockLlmClient::new(), StaticToolExecutor::new(), 10);
        h.orchestrator.services.tools = Arc::new(SlowTools);

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let err = h
            .orchestrator
            .run("alice", vec![Turn::user("Tell me about the reservoir")], &cancel)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert_eq!(h.llm.call_count(), 0);
    }
}
