//! Relevance grader
//!
//! Decides whether the retrieved context answers the question. Cheap
//! deterministic checks run first; only ambiguous cases reach the scoring
//! model, whose verdicts are memoized. Any failure on the model path grades
//! the context as sufficient.

use petrorag_common::cache::keys;
use petrorag_common::config::GraderSettings;
use petrorag_common::conversation::{latest_user_question, tool_context};
use petrorag_common::errors::Result;
use petrorag_common::llm::RelevanceScorer;
use petrorag_common::query::contains_term;
use petrorag_common::wells::{normalize_well, EntityExtractor};
use petrorag_common::{metrics, TtlCache, Turn};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Outcome of grading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Sufficient,
    Insufficient,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Sufficient => "sufficient",
            Verdict::Insufficient => "insufficient",
        }
    }

    pub fn is_sufficient(&self) -> bool {
        *self == Verdict::Sufficient
    }
}

/// Step that decided a verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GradeSource {
    /// Rewrite ceiling reached
    Forced,
    /// Context below the minimum length
    TooShort,
    /// A heuristic shortcut accepted the context
    Shortcut,
    /// Memoized model verdict
    Cache,
    /// Fresh model verdict
    Model,
    /// Model path failed
    FailOpen,
}

impl GradeSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            GradeSource::Forced => "forced",
            GradeSource::TooShort => "too_short",
            GradeSource::Shortcut => "shortcut",
            GradeSource::Cache => "cache",
            GradeSource::Model => "model",
            GradeSource::FailOpen => "fail_open",
        }
    }
}

/// Verdict plus the rewrite count that produced it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GradeVerdict {
    pub verdict: Verdict,
    pub rewrite_attempts: u32,
    pub source: GradeSource,
}

/// Grader configuration
#[derive(Debug, Clone)]
pub struct GraderConfig {
    /// Rewrite attempts after which the verdict is forced to sufficient
    pub max_rewrites: u32,
    /// Context shorter than this is insufficient
    pub min_context_chars: usize,
    /// Context prefix length sent to the scorer and used in the cache key
    pub max_scored_context_chars: usize,
}

impl Default for GraderConfig {
    fn default() -> Self {
        Self {
            max_rewrites: 2,
            min_context_chars: 50,
            max_scored_context_chars: 3000,
        }
    }
}

impl From<&GraderSettings> for GraderConfig {
    fn from(settings: &GraderSettings) -> Self {
        Self {
            max_rewrites: settings.max_rewrites,
            min_context_chars: settings.min_context_chars,
            max_scored_context_chars: settings.max_scored_context_chars,
        }
    }
}

/// Cheap accept rule evaluated before the scoring model
pub trait GradeShortcut: Send + Sync {
    fn name(&self) -> &str;

    /// The shortcut is skipped unless the context is longer than this
    fn min_context_chars(&self) -> usize {
        0
    }

    /// `true` to accept the context without consulting the model
    fn accepts(&self, question: &str, context: &str) -> bool;
}

/// Accepts truncated follow-up questions ("the porosity reported is")
///
/// A question is truncated when it lacks terminal punctuation and contains
/// one of the continuation cues as a whole word. Only ample context
/// qualifies.
pub struct PartialSentenceShortcut {
    cues: Vec<String>,
    min_context_chars: usize,
}

impl PartialSentenceShortcut {
    pub fn new(cues: Vec<String>) -> Self {
        Self {
            cues: cues.into_iter().map(|c| c.to_lowercase()).collect(),
            min_context_chars: 0,
        }
    }

    /// Require context longer than `chars`
    pub fn with_min_context(mut self, chars: usize) -> Self {
        self.min_context_chars = chars;
        self
    }
}

impl GradeShortcut for PartialSentenceShortcut {
    fn name(&self) -> &str {
        "partial_sentence"
    }

    fn min_context_chars(&self) -> usize {
        self.min_context_chars
    }

    fn accepts(&self, question: &str, _context: &str) -> bool {
        let trimmed = question.trim();
        if trimmed.ends_with(['.', '!', '?', ':']) {
            return false;
        }
        let lower = trimmed.to_lowercase();
        self.cues.iter().any(|cue| contains_term(&lower, cue))
    }
}

/// Accepts context naming the question's well together with a domain term
pub struct EntityMentionShortcut {
    extractor: Arc<dyn EntityExtractor>,
    terms: Vec<String>,
}

impl EntityMentionShortcut {
    pub fn new(extractor: Arc<dyn EntityExtractor>, terms: Vec<String>) -> Self {
        Self {
            extractor,
            terms: terms.into_iter().map(|t| t.to_lowercase()).collect(),
        }
    }
}

impl GradeShortcut for EntityMentionShortcut {
    fn name(&self) -> &str {
        "entity_mention"
    }

    fn accepts(&self, question: &str, context: &str) -> bool {
        let Some(well) = self.extractor.extract_well(question) else {
            return false;
        };

        let context_lower = context.to_lowercase();
        let well_found = context_lower.contains(&well.to_lowercase())
            || self
                .extractor
                .extract_well(context)
                .is_some_and(|found| normalize_well(&found) == normalize_well(&well));

        well_found && self.terms.iter().any(|term| contains_term(&context_lower, term))
    }
}

/// Built-in shortcuts configured from settings
pub fn default_shortcuts(
    settings: &GraderSettings,
    extractor: Arc<dyn EntityExtractor>,
) -> Vec<Box<dyn GradeShortcut>> {
    vec![
        Box::new(
            PartialSentenceShortcut::new(settings.continuation_cues.clone())
                .with_min_context(settings.shortcut_context_chars),
        ),
        Box::new(EntityMentionShortcut::new(
            extractor,
            settings.entity_shortcut_terms.clone(),
        )),
    ]
}

/// Relevance grader
pub struct Grader {
    config: GraderConfig,
    scorer: Arc<dyn RelevanceScorer>,
    cache: Arc<TtlCache>,
    shortcuts: Vec<Box<dyn GradeShortcut>>,
}

impl Grader {
    /// Grader without shortcuts
    pub fn new(config: GraderConfig, scorer: Arc<dyn RelevanceScorer>, cache: Arc<TtlCache>) -> Self {
        Self {
            config,
            scorer,
            cache,
            shortcuts: Vec::new(),
        }
    }

    /// Replace the shortcut list
    pub fn with_shortcuts(mut self, shortcuts: Vec<Box<dyn GradeShortcut>>) -> Self {
        self.shortcuts = shortcuts;
        self
    }

    /// Grade the context gathered in `turns` against the latest question
    pub async fn grade(&self, turns: &[Turn], rewrite_attempts: u32) -> Result<GradeVerdict> {
        self.grade_for(latest_user_question(turns), turns, rewrite_attempts)
            .await
    }

    /// Grade the context gathered in `turns` against `question`
    ///
    /// The control loop passes the question the user asked, so rewritten
    /// turns do not change what the context is judged against.
    pub async fn grade_for(
        &self,
        question: &str,
        turns: &[Turn],
        rewrite_attempts: u32,
    ) -> Result<GradeVerdict> {
        if rewrite_attempts >= self.config.max_rewrites {
            warn!(rewrite_attempts, "Rewrite ceiling reached, grading as sufficient");
            return Ok(self.verdict(Verdict::Sufficient, rewrite_attempts, GradeSource::Forced));
        }

        let context = tool_context(turns)
            .unwrap_or_else(|| turns.last().map(|t| t.content.clone()).unwrap_or_default());
        let context_chars = context.chars().count();
        debug!(context_chars, rewrite_attempts, "Grading context");

        if context_chars < self.config.min_context_chars {
            return Ok(self.verdict(Verdict::Insufficient, rewrite_attempts, GradeSource::TooShort));
        }

        if let Some(shortcut) = self
            .shortcuts
            .iter()
            .find(|s| context_chars > s.min_context_chars() && s.accepts(question, &context))
        {
            debug!(shortcut = shortcut.name(), "Shortcut accepted context");
            return Ok(self.verdict(Verdict::Sufficient, rewrite_attempts, GradeSource::Shortcut));
        }

        let (verdict, source) = match self.score_cached(question, &context).await {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "Relevance scoring failed, grading as sufficient");
                (Verdict::Sufficient, GradeSource::FailOpen)
            }
        };
        Ok(self.verdict(verdict, rewrite_attempts, source))
    }

    async fn score_cached(&self, question: &str, context: &str) -> Result<(Verdict, GradeSource)> {
        let prefix = char_prefix(context, self.config.max_scored_context_chars);
        let key = keys::grade(question, prefix);

        if let Some(relevant) = self.cache.get::<bool>(&key) {
            return Ok((to_verdict(relevant), GradeSource::Cache));
        }

        let relevant = self.scorer.score(question, prefix).await?;
        self.cache.set(&key, &relevant);
        Ok((to_verdict(relevant), GradeSource::Model))
    }

    fn verdict(&self, verdict: Verdict, rewrite_attempts: u32, source: GradeSource) -> GradeVerdict {
        info!(
            verdict = verdict.as_str(),
            source = source.as_str(),
            rewrite_attempts,
            "Context graded"
        );
        metrics::record_grade(verdict.as_str(), source.as_str());

        GradeVerdict {
            verdict,
            rewrite_attempts,
            source,
        }
    }
}

fn to_verdict(relevant: bool) -> Verdict {
    if relevant {
        Verdict::Sufficient
    } else {
        Verdict::Insufficient
    }
}

/// First `max_chars` characters of `text`
pub(crate) fn char_prefix(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use petrorag_common::errors::AppError;
    use petrorag_common::llm::{LlmRelevanceScorer, MockLlmClient};
    use petrorag_common::wells::VolveEntityExtractor;
    use petrorag_common::ToolCall;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FailingScorer;

    #[async_trait]
    impl RelevanceScorer for FailingScorer {
        async fn score(&self, _question: &str, _context: &str) -> Result<bool> {
            Err(AppError::upstream("model unavailable"))
        }
    }

    struct CountingScorer {
        answer: bool,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RelevanceScorer for CountingScorer {
        async fn score(&self, _question: &str, context: &str) -> Result<bool> {
            assert!(context.chars().count() <= 3000);
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.answer)
        }
    }

    fn conversation(question: &str, context: &str) -> Vec<Turn> {
        let call = ToolCall {
            name: "retrieve_petrophysical_docs".to_string(),
            args: serde_json::json!({ "query": question }),
            id: "call_1".to_string(),
        };
        vec![
            Turn::user(question),
            Turn::tool_request(vec![call.clone()]),
            Turn::tool_result(&call, context),
        ]
    }

    fn grader(scorer: Arc<dyn RelevanceScorer>) -> Grader {
        Grader::new(GraderConfig::default(), scorer, Arc::new(TtlCache::default()))
    }

    fn with_defaults(grader: Grader) -> Grader {
        grader.with_shortcuts(default_shortcuts(
            &GraderSettings::default(),
            Arc::new(VolveEntityExtractor::default()),
        ))
    }

    #[tokio::test]
    async fn test_short_context_is_insufficient() {
        let mock = Arc::new(MockLlmClient::with_default("yes"));
        let grader = grader(Arc::new(LlmRelevanceScorer::new(mock.clone())));

        let verdict = grader
            .grade(&conversation("What is the porosity?", "0123456789"), 0)
            .await
            .unwrap();
        assert_eq!(verdict.verdict, Verdict::Insufficient);
        assert_eq!(verdict.source, GradeSource::TooShort);
        assert_eq!(mock.call_count(), 0);
    }

    #[tokio::test]
    async fn test_ceiling_forces_sufficient() {
        let grader = grader(Arc::new(FailingScorer));
        for attempts in [2, 3, 10] {
            let verdict = grader.grade(&conversation("q", ""), attempts).await.unwrap();
            assert_eq!(verdict.verdict, Verdict::Sufficient);
            assert_eq!(verdict.source, GradeSource::Forced);
            assert_eq!(verdict.rewrite_attempts, attempts);
        }
    }

    #[tokio::test]
    async fn test_model_verdict_is_memoized() {
        let scorer = Arc::new(CountingScorer {
            answer: false,
            calls: AtomicUsize::new(0),
        });
        let grader = grader(scorer.clone());
        let turns = conversation("What is the porosity?", &"unrelated drilling text ".repeat(10));

        let first = grader.grade(&turns, 0).await.unwrap();
        assert_eq!(first.verdict, Verdict::Insufficient);
        assert_eq!(first.source, GradeSource::Model);

        // Same question modulo case and spacing reuses the verdict
        let turns = conversation("what is the  porosity?", &"unrelated drilling text ".repeat(10));
        let second = grader.grade(&turns, 1).await.unwrap();
        assert_eq!(second.verdict, Verdict::Insufficient);
        assert_eq!(second.source, GradeSource::Cache);

        assert_eq!(scorer.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_scorer_sees_bounded_prefix() {
        let scorer = Arc::new(CountingScorer {
            answer: true,
            calls: AtomicUsize::new(0),
        });
        let grader = grader(scorer.clone());
        let verdict = grader
            .grade(&conversation("What is the porosity?", &"ø".repeat(5000)), 0)
            .await
            .unwrap();
        assert_eq!(verdict.verdict, Verdict::Sufficient);
        assert_eq!(scorer.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_scorer_failure_fails_open() {
        let grader = grader(Arc::new(FailingScorer));
        let verdict = grader
            .grade(&conversation("What is the porosity?", &"x".repeat(100)), 0)
            .await
            .unwrap();
        assert_eq!(verdict.verdict, Verdict::Sufficient);
        assert_eq!(verdict.source, GradeSource::FailOpen);
    }

    #[tokio::test]
    async fn test_partial_sentence_shortcut() {
        let grader = with_defaults(grader(Arc::new(FailingScorer)));
        let long = "Hugin sandstone interval description. ".repeat(20);

        let verdict = grader
            .grade(&conversation("The porosity reported for Hugin is", &long), 0)
            .await
            .unwrap();
        assert_eq!(verdict.source, GradeSource::Shortcut);

        // Terminal punctuation means a complete question
        let verdict = grader
            .grade(&conversation("The porosity reported for Hugin is?", &long), 0)
            .await
            .unwrap();
        assert_ne!(verdict.source, GradeSource::Shortcut);
    }

    #[tokio::test]
    async fn test_partial_sentence_needs_long_context() {
        let grader = with_defaults(grader(Arc::new(FailingScorer)));
        let medium = "x".repeat(200);

        let verdict = grader
            .grade(&conversation("The porosity reported is", &medium), 0)
            .await
            .unwrap();
        assert_eq!(verdict.source, GradeSource::FailOpen);
    }

    #[tokio::test]
    async fn test_entity_mention_accepts_medium_context() {
        let scorer = Arc::new(CountingScorer {
            answer: false,
            calls: AtomicUsize::new(0),
        });
        let grader = with_defaults(grader(scorer.clone()));
        let context = "Well 15/9-F-5 penetrates the Hugin formation; core plugs were taken across the upper sand.";
        assert!(context.chars().count() > 50 && context.chars().count() < 500);

        let verdict = grader
            .grade(&conversation("What is the porosity of 15/9-F-5?", context), 0)
            .await
            .unwrap();
        assert_eq!(verdict.verdict, Verdict::Sufficient);
        assert_eq!(verdict.source, GradeSource::Shortcut);
        assert_eq!(scorer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_grade_for_uses_given_question() {
        let grader = with_defaults(grader(Arc::new(FailingScorer)));
        let long = "Hugin sandstone interval description. ".repeat(20);
        let mut turns = conversation("The porosity reported for Hugin is", &long);
        turns.push(Turn::user("What porosity was reported for the Hugin formation?"));

        let latest = grader.grade(&turns, 1).await.unwrap();
        assert_eq!(latest.source, GradeSource::FailOpen);

        let original = grader
            .grade_for("The porosity reported for Hugin is", &turns, 1)
            .await
            .unwrap();
        assert_eq!(original.source, GradeSource::Shortcut);
    }

    #[test]
    fn test_partial_sentence_matches_whole_words() {
        let shortcut = PartialSentenceShortcut::new(vec!["is".to_string()]);
        assert!(shortcut.accepts("the value is", ""));
        assert!(!shortcut.accepts("this value", ""));
        assert!(!shortcut.accepts("what is it?", ""));
    }

    #[test]
    fn test_entity_mention_shortcut() {
        let shortcut = EntityMentionShortcut::new(
            Arc::new(VolveEntityExtractor::default()),
            vec!["evaluation".to_string()],
        );
        let question = "CPI results for 15/9-F-5";

        assert!(shortcut.accepts(question, "Petrophysical evaluation of 15_9_F_5 ..."));
        assert!(!shortcut.accepts(question, "Petrophysical evaluation of 15/9-F-4 ..."));
        assert!(!shortcut.accepts(question, "Well 15/9-F-5 drilling log"));
        assert!(!shortcut.accepts("CPI results", "evaluation of 15/9-F-5"));
    }

    #[tokio::test]
    async fn test_no_tool_turns_uses_last_turn() {
        let scorer = Arc::new(CountingScorer {
            answer: true,
            calls: AtomicUsize::new(0),
        });
        let grader = grader(scorer);
        let turns = vec![Turn::user("short")];
        let verdict = grader.grade(&turns, 0).await.unwrap();
        assert_eq!(verdict.source, GradeSource::TooShort);
    }

    #[test]
    fn test_char_prefix() {
        assert_eq!(char_prefix("héllo", 2), "hé");
        assert_eq!(char_prefix("abc", 10), "abc");
    }
}
