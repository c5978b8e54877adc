//! Question rewriter
//!
//! Produces a more retrieval-friendly question when the grader rejects the
//! context. The rewrite may not introduce wells, formations or other
//! entities that the original question did not name.

use petrorag_common::cache::keys;
use petrorag_common::conversation::{latest_context, latest_user_question};
use petrorag_common::errors::{AppError, ErrorKind, Result};
use petrorag_common::{metrics, LlmClient, TtlCache, Turn};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Build the rewrite instruction
pub fn rewrite_prompt(question: &str, context: &str) -> String {
    format!(
        "You are a question rewriter. Given the following question and context, \
         rewrite the question to be more specific and retrieval-friendly. \
         If the context is not relevant, ask a better question based on the original question.\n\n\
         RULES:\n\
         - DO NOT add well names, formation names, or other entities that were NOT in the original question.\n\
         - Keep exactly the wells, formations and parameters the original question names.\n\
         - DO NOT turn the question into a comparison unless the original question asks for one.\n\
         - Reply with the rewritten question only.\n\n\
         Original question: {}\n\
         Context: {}\n\
         Rewritten question:",
        question, context
    )
}

/// Rewrites the latest user question
pub struct Rewriter {
    llm: Arc<dyn LlmClient>,
    cache: Arc<TtlCache>,
}

impl Rewriter {
    pub fn new(llm: Arc<dyn LlmClient>, cache: Arc<TtlCache>) -> Self {
        Self { llm, cache }
    }

    /// New user turn carrying the refined question
    pub async fn rewrite(&self, turns: &[Turn]) -> Result<Turn> {
        let question = latest_user_question(turns);
        let context = latest_context(turns);
        let key = keys::rewrite(question, context);

        let rewritten = match self.cache.get::<String>(&key) {
            Some(cached) => {
                debug!("Using memoized rewrite");
                cached
            }
            None => {
                let raw = self
                    .llm
                    .complete(&rewrite_prompt(question, context))
                    .await
                    .map_err(|e| {
                        metrics::record_rewrite(false);
                        warn!(error = %e, "Rewrite generation failed");
                        to_processing(e)
                    })?;

                // Only usable questions are memoized
                let cleaned = clean_rewrite(&raw);
                if cleaned.is_empty() {
                    metrics::record_rewrite(false);
                    return Err(AppError::processing("Rewriter returned an empty question"));
                }
                self.cache.set(&key, &cleaned);
                cleaned
            }
        };

        info!(original = %question, rewritten = %rewritten, "Question rewritten");
        metrics::record_rewrite(true);
        Ok(Turn::user(rewritten))
    }
}

fn to_processing(e: AppError) -> AppError {
    if e.kind() == ErrorKind::Processing {
        e
    } else {
        AppError::processing(format!("Question rewrite failed: {}", e.message())).with_source(e)
    }
}

/// Strip a leading label and surrounding quotes from a model reply
fn clean_rewrite(raw: &str) -> String {
    let text = raw.trim();
    let text = text
        .strip_prefix("Rewritten question:")
        .map(str::trim)
        .unwrap_or(text);
    text.trim_matches(|c| c == '"' || c == '\'').trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use petrorag_common::llm::MockLlmClient;
    use petrorag_common::ToolCall;

    fn turns() -> Vec<Turn> {
        let call = ToolCall {
            name: "retrieve_petrophysical_docs".to_string(),
            args: serde_json::json!({ "query": "porosity" }),
            id: "call_1".to_string(),
        };
        vec![
            Turn::user("porosity 15/9-F-5?"),
            Turn::tool_request(vec![call.clone()]),
            Turn::tool_result(&call, "Drilling operations summary"),
        ]
    }

    #[tokio::test]
    async fn test_rewrite_returns_user_turn() {
        let mock = Arc::new(MockLlmClient::new());
        mock.push_reply("  \"What is the average porosity of well 15/9-F-5?\"  ");
        let rewriter = Rewriter::new(mock.clone(), Arc::new(TtlCache::default()));

        let turn = rewriter.rewrite(&turns()).await.unwrap();
        assert!(turn.is_user());
        assert_eq!(turn.content, "What is the average porosity of well 15/9-F-5?");

        let prompt = &mock.prompts()[0];
        assert!(prompt.contains("Original question: porosity 15/9-F-5?"));
        assert!(prompt.contains("Context: Drilling operations summary"));
        assert!(prompt.contains("DO NOT add well names"));
    }

    #[tokio::test]
    async fn test_rewrite_is_memoized() {
        let mock = Arc::new(MockLlmClient::with_default("Average porosity of 15/9-F-5"));
        let rewriter = Rewriter::new(mock.clone(), Arc::new(TtlCache::default()));

        rewriter.rewrite(&turns()).await.unwrap();
        rewriter.rewrite(&turns()).await.unwrap();
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test]
    async fn test_failure_is_processing_error() {
        let mock = Arc::new(MockLlmClient::new());
        mock.push_failure("timeout").push_reply("   ");
        let rewriter = Rewriter::new(mock, Arc::new(TtlCache::default()));

        let err = rewriter.rewrite(&turns()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Processing);

        let err = rewriter.rewrite(&turns()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Processing);
    }

    #[tokio::test]
    async fn test_empty_rewrite_is_not_memoized() {
        let mock = Arc::new(MockLlmClient::new());
        mock.push_reply("  \"\"  ").push_reply("What is the porosity of Hugin?");
        let cache = Arc::new(TtlCache::default());
        let rewriter = Rewriter::new(mock.clone(), cache.clone());

        let err = rewriter.rewrite(&turns()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Processing);
        assert_eq!(cache.stats().total_entries, 0);

        let turn = rewriter.rewrite(&turns()).await.unwrap();
        assert_eq!(turn.content, "What is the porosity of Hugin?");
        assert_eq!(mock.call_count(), 2);

        // The usable reply is memoized
        rewriter.rewrite(&turns()).await.unwrap();
        assert_eq!(mock.call_count(), 2);
    }

    #[test]
    fn test_clean_rewrite() {
        assert_eq!(clean_rewrite("Rewritten question: 'NTG of Hugin'"), "NTG of Hugin");
        assert_eq!(clean_rewrite("plain"), "plain");
    }
}
