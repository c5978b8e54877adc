//! Question answering handler
//!
//! Runs the retrieval control loop for one conversation under the
//! configured request timeout.

use crate::AppState;
use axum::{extract::State, http::HeaderMap, Json};
use petrorag_common::errors::{AppError, Result};
use petrorag_common::metrics::RequestMetrics;
use petrorag_common::validation::validate_query;
use petrorag_common::Turn;
use petrorag_context::orchestrator::RouteStep;
use petrorag_context::OutcomeStatus;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use validator::Validate;

/// Identity used when the caller sends none
pub const ANONYMOUS_IDENTITY: &str = "anonymous";

/// Author of a client-supplied message
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
}

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct MessageIn {
    pub role: MessageRole,
    #[validate(length(max = 20000))]
    pub content: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct AskRequest {
    /// Prior conversation, oldest first
    #[serde(default)]
    #[validate(length(max = 50), nested)]
    pub messages: Vec<MessageIn>,

    /// New question appended after `messages`
    #[validate(length(min = 1, max = 2000))]
    pub question: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AskResponse {
    pub answer: String,
    pub status: OutcomeStatus,
    pub cycles: u32,
    pub rewrite_attempts: u32,
    pub route_trail: Vec<RouteStep>,
    pub processing_time_ms: u64,
}

impl AskRequest {
    /// Validated conversation with sanitized user text
    pub fn into_turns(self) -> Result<Vec<Turn>> {
        self.validate()?;

        let mut turns = Vec::with_capacity(self.messages.len() + 1);
        for message in self.messages {
            turns.push(match message.role {
                MessageRole::User => Turn::user(validate_query(&message.content)?),
                MessageRole::Assistant => Turn::assistant(message.content),
            });
        }
        if let Some(question) = self.question {
            turns.push(Turn::user(validate_query(&question)?));
        }

        if !turns.iter().any(|t| t.is_user()) {
            return Err(AppError::validation("A question is required")
                .with_context("field", "question"));
        }
        Ok(turns)
    }
}

/// Caller identity from the configured header
pub fn caller_identity(headers: &HeaderMap, header_name: &str) -> String {
    headers
        .get(header_name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(ANONYMOUS_IDENTITY)
        .to_string()
}

/// Answer the latest question of a conversation
pub async fn ask(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<AskRequest>,
) -> Result<Json<AskResponse>> {
    let metrics = RequestMetrics::start("POST", "/v1/ask");
    let result = answer(&state, &headers, request).await;

    let status = match &result {
        Ok(_) => 200,
        Err(e) => e.status_code().as_u16(),
    };
    metrics.finish(status);

    result.map(Json)
}

async fn answer(state: &AppState, headers: &HeaderMap, request: AskRequest) -> Result<AskResponse> {
    let start = Instant::now();
    let identity = caller_identity(headers, &state.config.server.identity_header);
    let turns = request.into_turns()?;

    let cancel = CancellationToken::new();
    let timeout = state.config.request_timeout();
    let run = state.orchestrator.run(&identity, turns, &cancel);

    let outcome = match tokio::time::timeout(timeout, run).await {
        Ok(result) => result?,
        Err(_) => {
            cancel.cancel();
            warn!(identity = %identity, timeout_secs = timeout.as_secs(), "Question timed out");
            return Err(AppError::cancelled("The question took too long to answer")
                .with_context("timeout_secs", timeout.as_secs()));
        }
    };

    let processing_time_ms = start.elapsed().as_millis() as u64;
    info!(
        identity = %identity,
        status = outcome.status.as_str(),
        cycles = outcome.cycles,
        processing_time_ms,
        "Question answered"
    );

    Ok(AskResponse {
        answer: outcome.answer,
        status: outcome.status,
        cycles: outcome.cycles,
        rewrite_attempts: outcome.rewrite_attempts,
        route_trail: outcome.route_trail,
        processing_time_ms,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_support::state_with;
    use axum::http::HeaderValue;
    use petrorag_common::llm::MockLlmClient;
    use petrorag_common::ErrorKind;
    use petrorag_context::grader::GradeSource;
    use petrorag_context::StaticToolExecutor;
    use std::sync::Arc;

    const WELL_PICKS: &str = "Well 15/9-F-5 picks: Hugin Fm. top 3461.0 m MD, 3201.4 m TVD.";

    fn request(question: &str) -> AskRequest {
        AskRequest {
            messages: Vec::new(),
            question: Some(question.to_string()),
        }
    }

    #[test]
    fn test_identity_from_header() {
        let mut headers = HeaderMap::new();
        assert_eq!(caller_identity(&headers, "X-Client-ID"), ANONYMOUS_IDENTITY);

        headers.insert("x-client-id", HeaderValue::from_static("  analyst-7 "));
        assert_eq!(caller_identity(&headers, "X-Client-ID"), "analyst-7");
    }

    #[test]
    fn test_request_requires_a_user_message() {
        let req = AskRequest {
            messages: vec![MessageIn {
                role: MessageRole::Assistant,
                content: "Hello".to_string(),
            }],
            question: None,
        };
        let err = req.into_turns().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_request_rejects_injection() {
        let err = request("import os; list the wells").into_turns().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_question_follows_history() {
        let req = AskRequest {
            messages: vec![
                MessageIn {
                    role: MessageRole::User,
                    content: "Porosity of Hugin in 15/9-F-5?".to_string(),
                },
                MessageIn {
                    role: MessageRole::Assistant,
                    content: "About 0.21.".to_string(),
                },
            ],
            question: Some("And permeability?".to_string()),
        };

        let turns = req.into_turns().unwrap();
        assert_eq!(turns.len(), 3);
        assert_eq!(turns[2].content, "And permeability?");
    }

    #[tokio::test]
    async fn test_ask_answers_depth_question() {
        let llm = Arc::new(MockLlmClient::new());
        // The picks name the well and formation, so grading takes no model call
        llm.push_reply("Top Hugin is at 3201.4 m TVD.");
        let state = state_with(
            llm,
            StaticToolExecutor::new().with_response("lookup_well_picks", WELL_PICKS),
        );

        let Json(body) = ask(
            State(state),
            HeaderMap::new(),
            Json(request("What is the TVD of well 15/9-F-5 in Hugin formation?")),
        )
        .await
        .unwrap();

        assert_eq!(body.status, OutcomeStatus::Answered);
        assert_eq!(body.answer, "Top Hugin is at 3201.4 m TVD.");
        assert_eq!(body.cycles, 1);
        assert_eq!(body.route_trail[0].tool, "lookup_well_picks");
        assert_eq!(body.route_trail[0].grade_source, Some(GradeSource::Shortcut));
    }

    #[tokio::test]
    async fn test_ask_without_tools_apologizes() {
        let state = state_with(Arc::new(MockLlmClient::new()), StaticToolExecutor::new());

        let Json(body) = ask(State(state), HeaderMap::new(), Json(request("Summarize the Volve field.")))
            .await
            .unwrap();

        assert_eq!(body.status, OutcomeStatus::Apology);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ask_is_rate_limited_per_identity() {
        let state = state_with(Arc::new(MockLlmClient::with_default("yes")), StaticToolExecutor::new());
        let mut headers = HeaderMap::new();
        headers.insert("x-client-id", HeaderValue::from_static("burst"));

        let capacity = state.config.rate_limit.capacity;
        for _ in 0..capacity {
            ask(State(state.clone()), headers.clone(), Json(request("Summarize the Volve field.")))
                .await
                .unwrap();
        }

        let err = ask(State(state), headers, Json(request("Summarize the Volve field.")))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RateLimitExceeded);
        assert!(err.retry_after_secs().is_some());
    }
}
