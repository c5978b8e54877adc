//! Language model client abstraction
//!
//! Provides a unified interface for chat completion backends:
//! - OpenAI-compatible HTTP APIs
//! - A scripted mock for tests and key-less development
//! - A binary relevance scorer built on top of any client

use crate::config::LlmConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

/// Trait for text generation
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Complete a single user prompt
    async fn complete(&self, prompt: &str) -> Result<String>;

    /// Get the model name
    fn model_name(&self) -> &str;
}

/// OpenAI-compatible chat completion client
pub struct OpenAiChatClient {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    max_retries: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Deserialize)]
struct ChatMessageResponse {
    content: Option<String>,
}

impl OpenAiChatClient {
    /// Create a client for `model` using the connection settings in `config`
    pub fn new(config: &LlmConfig, model: impl Into<String>) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| AppError::configuration("LLM API key is not configured"))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::configuration(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_key,
            model: model.into(),
            base_url: config.api_base.trim_end_matches('/').to_string(),
            max_retries: config.max_retries.max(1),
            temperature: 0.0,
        })
    }

    /// Make request with retry
    async fn request_with_retry(&self, prompt: &str) -> Result<String> {
        let mut last_error = None;

        for attempt in 0..self.max_retries {
            if attempt > 0 {
                // Exponential backoff with jitter
                let base = 200 * 2_u64.pow(attempt);
                let jitter = rand::thread_rng().gen_range(0..=base / 2);
                tokio::time::sleep(Duration::from_millis(base + jitter)).await;
            }

            match self.make_request(prompt).await {
                Ok(text) => return Ok(text),
                Err(e) if e.is_client_error() => return Err(e),
                Err(e) => {
                    warn!(
                        model = %self.model,
                        attempt = attempt + 1,
                        max_retries = self.max_retries,
                        error = %e,
                        "LLM request failed, retrying"
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| AppError::upstream("LLM request failed after retries")))
    }

    async fn make_request(&self, prompt: &str) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);

        let request = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: self.temperature,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let err = if status.is_client_error() && status.as_u16() != 429 {
                AppError::validation(format!("LLM API rejected request ({})", status))
            } else {
                AppError::upstream(format!("LLM API error ({})", status))
            };
            return Err(err
                .with_context("status", status.as_u16())
                .with_context("body", body.chars().take(500).collect::<String>()));
        }

        let chat: ChatResponse = response.json().await?;
        chat.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| AppError::upstream("Empty response from LLM"))
    }
}

#[async_trait]
impl LlmClient for OpenAiChatClient {
    async fn complete(&self, prompt: &str) -> Result<String> {
        debug!(model = %self.model, prompt_chars = prompt.len(), "LLM completion");
        self.request_with_retry(prompt).await
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// One scripted mock reply
#[derive(Debug, Clone)]
pub enum MockReply {
    Text(String),
    Fail(String),
}

/// Mock client for testing and key-less development
///
/// Replies are taken from the script in order; once it is exhausted the
/// default reply is used, or a canned answer when none is set.
pub struct MockLlmClient {
    script: Mutex<VecDeque<MockReply>>,
    default_reply: Option<String>,
    prompts: Mutex<Vec<String>>,
    calls: AtomicUsize,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            default_reply: None,
            prompts: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Always answer with `reply` once the script is exhausted
    pub fn with_default(reply: impl Into<String>) -> Self {
        Self {
            default_reply: Some(reply.into()),
            ..Self::new()
        }
    }

    /// Queue a successful reply
    pub fn push_reply(&self, reply: impl Into<String>) -> &Self {
        self.push(MockReply::Text(reply.into()))
    }

    /// Queue a failure
    pub fn push_failure(&self, message: impl Into<String>) -> &Self {
        self.push(MockReply::Fail(message.into()))
    }

    fn push(&self, reply: MockReply) -> &Self {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(reply);
        }
        self
    }

    /// Number of completions requested so far
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Prompts received so far, oldest first
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }

    fn canned_reply(prompt: &str) -> String {
        if prompt.contains(GRADE_PROMPT_MARKER) {
            return "yes".to_string();
        }

        let question = prompt
            .lines()
            .find_map(|line| line.trim().strip_prefix("Question:"))
            .map(str::trim)
            .unwrap_or("your question");
        format!(
            "Based on the retrieved context, here is what is known about {}. \
             (Development mode: configure an LLM API key for real answers.)",
            question
        )
    }
}

impl Default for MockLlmClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, prompt: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }

        let next = self.script.lock().ok().and_then(|mut script| script.pop_front());
        match next {
            Some(MockReply::Text(text)) => Ok(text),
            Some(MockReply::Fail(message)) => Err(AppError::upstream(message)),
            None => Ok(self
                .default_reply
                .clone()
                .unwrap_or_else(|| Self::canned_reply(prompt))),
        }
    }

    fn model_name(&self) -> &str {
        "mock"
    }
}

const GRADE_PROMPT_MARKER: &str = "Give a binary score 'yes' or 'no'.";

/// Build the relevance grading prompt
pub fn grade_prompt(question: &str, context: &str) -> String {
    format!(
        "You are a grader assessing whether retrieved documents are relevant to the question.\n\
         If the documents contain the answer to the question, grade them as relevant.\n\
         {}\n\n\
         Question: {}\n\n\
         Documents: {}\n\n\
         Answer:",
        GRADE_PROMPT_MARKER, question, context
    )
}

/// Binary relevance judgement over (question, context)
#[async_trait]
pub trait RelevanceScorer: Send + Sync {
    /// `true` when the context answers the question
    async fn score(&self, question: &str, context: &str) -> Result<bool>;
}

/// Relevance scorer that prompts a model for yes/no
pub struct LlmRelevanceScorer {
    client: Arc<dyn LlmClient>,
}

impl LlmRelevanceScorer {
    pub fn new(client: Arc<dyn LlmClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RelevanceScorer for LlmRelevanceScorer {
    async fn score(&self, question: &str, context: &str) -> Result<bool> {
        let reply = self.client.complete(&grade_prompt(question, context)).await?;
        parse_binary_score(&reply).ok_or_else(|| {
            AppError::processing("Relevance scorer returned neither yes nor no")
                .with_context("model", self.client.model_name())
                .with_context("reply", reply.chars().take(100).collect::<String>())
        })
    }
}

/// First `yes` or `no` token in a model reply
pub fn parse_binary_score(reply: &str) -> Option<bool> {
    reply
        .split(|c: char| !c.is_ascii_alphabetic())
        .filter(|token| !token.is_empty())
        .find_map(|token| match token.to_ascii_lowercase().as_str() {
            "yes" => Some(true),
            "no" => Some(false),
            _ => None,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;

    #[test]
    fn test_parse_binary_score() {
        assert_eq!(parse_binary_score("yes"), Some(true));
        assert_eq!(parse_binary_score("  No."), Some(false));
        assert_eq!(parse_binary_score("{\"binary_score\": \"yes\"}"), Some(true));
        assert_eq!(parse_binary_score("Answer: NO, the documents"), Some(false));
        assert_eq!(parse_binary_score("maybe"), None);
        assert_eq!(parse_binary_score(""), None);
    }

    #[tokio::test]
    async fn test_mock_script_then_default() {
        let mock = MockLlmClient::with_default("fallback");
        mock.push_reply("first").push_failure("boom");

        assert_eq!(mock.complete("a").await.unwrap(), "first");
        let err = mock.complete("b").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Upstream);
        assert_eq!(mock.complete("c").await.unwrap(), "fallback");

        assert_eq!(mock.call_count(), 3);
        assert_eq!(mock.prompts(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_mock_canned_replies() {
        let mock = MockLlmClient::new();
        assert_eq!(mock.complete(&grade_prompt("q", "ctx")).await.unwrap(), "yes");

        let answer = mock.complete("Question: porosity of Hugin\nContext:").await.unwrap();
        assert!(answer.contains("porosity of Hugin"));
    }

    #[tokio::test]
    async fn test_relevance_scorer() {
        let mock = Arc::new(MockLlmClient::new());
        mock.push_reply("yes").push_reply("no").push_reply("unsure");
        let scorer = LlmRelevanceScorer::new(mock.clone());

        assert!(scorer.score("q", "ctx").await.unwrap());
        assert!(!scorer.score("q", "ctx").await.unwrap());
        let err = scorer.score("q", "ctx").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Processing);

        assert!(mock.prompts()[0].contains("Documents: ctx"));
    }

    #[test]
    fn test_openai_client_requires_key() {
        let config = LlmConfig::default();
        let err = OpenAiChatClient::new(&config, "gpt-4o").err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Configuration);

        let config = LlmConfig {
            api_key: Some("sk-test".to_string()),
            api_base: "http://localhost:1234/v1/".to_string(),
            ..Default::default()
        };
        let client = OpenAiChatClient::new(&config, "gpt-4o-mini").unwrap();
        assert_eq!(client.model_name(), "gpt-4o-mini");
        assert_eq!(client.base_url, "http://localhost:1234/v1");
    }
}
