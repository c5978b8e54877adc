//! Grounded answer generation

use async_trait::async_trait;
use petrorag_common::conversation::latest_user_question;
use petrorag_common::errors::{AppError, ErrorKind, Result};
use petrorag_common::{LlmClient, Turn};
use std::sync::Arc;
use tracing::debug;

/// Produces the final answer once the context is graded sufficient
#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    async fn generate(&self, turns: &[Turn]) -> Result<String>;
}

/// Per-context character budget inside the answer prompt
const MAX_CONTEXT_CHARS: usize = 4000;

/// Build the answer prompt from the latest question and every tool result
pub fn answer_prompt(turns: &[Turn]) -> String {
    let question = latest_user_question(turns);
    let contexts: Vec<&Turn> = turns.iter().filter(|t| t.is_tool()).collect();

    let mut prompt = String::from(
        "You are a petrophysics assistant answering questions about well reports.\n\
         Answer ONLY from the context below. If the context does not contain the \
         information, say that it is not available in the retrieved documents.\n\
         Quote numeric values with their units exactly as written.\n\n",
    );

    if contexts.is_empty() {
        prompt.push_str("Context: (none retrieved)\n\n");
    }
    for (i, turn) in contexts.iter().enumerate() {
        let source = turn.tool_name.as_deref().unwrap_or("tool");
        let text = crate::grader::char_prefix(&turn.content, MAX_CONTEXT_CHARS);
        prompt.push_str(&format!("[{}] ({})\n{}\n\n", i + 1, source, text));
    }

    prompt.push_str(&format!("Question: {}\n\nAnswer:", question));
    prompt
}

/// Answer generator backed by a chat model
pub struct LlmAnswerGenerator {
    llm: Arc<dyn LlmClient>,
}

impl LlmAnswerGenerator {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl AnswerGenerator for LlmAnswerGenerator {
    async fn generate(&self, turns: &[Turn]) -> Result<String> {
        let prompt = answer_prompt(turns);
        debug!(model = self.llm.model_name(), prompt_chars = prompt.len(), "Generating answer");

        let answer = self.llm.complete(&prompt).await.map_err(|e| {
            if e.kind() == ErrorKind::Processing {
                e
            } else {
                AppError::processing(format!("Answer generation failed: {}", e.message())).with_source(e)
            }
        })?;

        let answer = answer.trim();
        if answer.is_empty() {
            return Err(AppError::processing("Answer generator returned no text"));
        }
        Ok(answer.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use petrorag_common::llm::MockLlmClient;
    use petrorag_common::ToolCall;

    fn call(name: &str) -> ToolCall {
        ToolCall {
            name: name.to_string(),
            args: serde_json::json!({ "query": "ntg" }),
            id: format!("call_{}", name),
        }
    }

    #[test]
    fn test_prompt_numbers_contexts() {
        let a = call("lookup_petrophysical_params");
        let b = call("retrieve_petrophysical_docs");
        let turns = vec![
            Turn::user("NTG of Hugin in 15/9-F-5?"),
            Turn::tool_request(vec![a.clone(), b.clone()]),
            Turn::tool_result(&a, "NTG 0.82"),
            Turn::tool_result(&b, "Net to gross averaged 0.8"),
        ];

        let prompt = answer_prompt(&turns);
        assert!(prompt.contains("[1] (lookup_petrophysical_params)\nNTG 0.82"));
        assert!(prompt.contains("[2] (retrieve_petrophysical_docs)"));
        assert!(prompt.ends_with("Question: NTG of Hugin in 15/9-F-5?\n\nAnswer:"));
    }

    #[tokio::test]
    async fn test_generate_trims_and_rejects_empty() {
        let mock = Arc::new(MockLlmClient::new());
        mock.push_reply("  NTG is 0.82.  ").push_reply("");
        let generator = LlmAnswerGenerator::new(mock);
        let turns = vec![Turn::user("NTG?")];

        assert_eq!(generator.generate(&turns).await.unwrap(), "NTG is 0.82.");
        let err = generator.generate(&turns).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Processing);
    }
}
