//! Tool execution layer
//!
//! Provides:
//! - The `ToolExecutor` seam the control loop calls tools through
//! - An HTTP executor for a remote tool service
//! - A static in-memory executor for tests and development
//! - Concurrent execution of a routing decision's calls

use crate::router::RoutingDecision;
use async_trait::async_trait;
use futures::future::join_all;
use petrorag_common::config::ToolSettings;
use petrorag_common::errors::{AppError, ErrorKind, Result};
use petrorag_common::{ToolCall, Turn};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, warn};

/// Trait for tool execution
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Run one call and return its text output
    async fn execute(&self, call: &ToolCall) -> Result<String>;
}

/// Client for a tool service exposing `POST {base_url}/tools/{name}`
pub struct HttpToolExecutor {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Serialize)]
struct ToolRequest<'a> {
    name: &'a str,
    args: &'a serde_json::Value,
}

#[derive(Deserialize)]
struct ToolResponse {
    content: String,
}

impl HttpToolExecutor {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::configuration(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Executor for the configured tool service, if one is configured
    pub fn from_settings(settings: &ToolSettings) -> Result<Option<Self>> {
        settings
            .base_url
            .as_deref()
            .filter(|url| !url.trim().is_empty())
            .map(|url| Self::new(url, Duration::from_secs(settings.timeout_secs)))
            .transpose()
    }
}

#[async_trait]
impl ToolExecutor for HttpToolExecutor {
    async fn execute(&self, call: &ToolCall) -> Result<String> {
        let url = format!("{}/tools/{}", self.base_url, call.name);

        let response = self
            .client
            .post(&url)
            .json(&ToolRequest {
                name: &call.name,
                args: &call.args,
            })
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(AppError::not_found(format!("Unknown tool: {}", call.name))
                .with_context("tool", call.name.as_str()));
        }
        if !status.is_success() {
            return Err(AppError::upstream(format!("Tool service error ({})", status))
                .with_context("tool", call.name.as_str())
                .with_context("status", status.as_u16()));
        }

        let body: ToolResponse = response.json().await?;
        Ok(body.content)
    }
}

#[derive(Debug, Clone)]
enum StaticResponse {
    Text(String),
    Fail(String),
}

/// In-memory executor with scripted per-tool responses
///
/// Each tool replays its responses in order; the last one repeats.
#[derive(Default)]
pub struct StaticToolExecutor {
    responses: Mutex<HashMap<String, VecDeque<StaticResponse>>>,
    invocations: Mutex<Vec<ToolCall>>,
}

impl StaticToolExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful response for `tool`
    pub fn with_response(self, tool: &str, content: impl Into<String>) -> Self {
        self.push(tool, StaticResponse::Text(content.into()));
        self
    }

    /// Queue a failure for `tool`
    pub fn with_failure(self, tool: &str, message: impl Into<String>) -> Self {
        self.push(tool, StaticResponse::Fail(message.into()));
        self
    }

    fn push(&self, tool: &str, response: StaticResponse) {
        if let Ok(mut responses) = self.responses.lock() {
            responses.entry(tool.to_string()).or_default().push_back(response);
        }
    }

    /// Calls received so far, oldest first
    pub fn invocations(&self) -> Vec<ToolCall> {
        self.invocations.lock().map(|i| i.clone()).unwrap_or_default()
    }

    /// Number of calls received for `tool`
    pub fn call_count(&self, tool: &str) -> usize {
        self.invocations().iter().filter(|c| c.name == tool).count()
    }

    fn next_response(&self, tool: &str) -> Option<StaticResponse> {
        let mut responses = self.responses.lock().ok()?;
        let queue = responses.get_mut(tool)?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

#[async_trait]
impl ToolExecutor for StaticToolExecutor {
    async fn execute(&self, call: &ToolCall) -> Result<String> {
        if let Ok(mut invocations) = self.invocations.lock() {
            invocations.push(call.clone());
        }

        match self.next_response(&call.name) {
            Some(StaticResponse::Text(text)) => Ok(text),
            Some(StaticResponse::Fail(message)) => {
                Err(AppError::upstream(message).with_context("tool", call.name.as_str()))
            }
            None => Err(AppError::not_found(format!("Unknown tool: {}", call.name))
                .with_context("tool", call.name.as_str())),
        }
    }
}

/// Issue the primary and fallback calls of `decision` concurrently
///
/// Returns one tool turn per successful call, in call order. Fails only when
/// every call failed, with the primary call's error as the cause.
pub async fn execute_decision(
    executor: &dyn ToolExecutor,
    decision: &RoutingDecision,
) -> Result<Vec<Turn>> {
    let calls: Vec<&ToolCall> = decision.calls().collect();
    let results = join_all(calls.iter().map(|call| executor.execute(call))).await;

    let mut turns = Vec::with_capacity(calls.len());
    let mut primary_error = None;

    for (idx, (call, result)) in calls.iter().zip(results).enumerate() {
        match result {
            Ok(content) => {
                debug!(tool = %call.name, call_id = %call.id, chars = content.len(), "Tool call succeeded");
                turns.push(Turn::tool_result(call, content));
            }
            Err(e) => {
                warn!(tool = %call.name, call_id = %call.id, error = %e, "Tool call failed");
                if idx == 0 {
                    primary_error = Some(e);
                }
            }
        }
    }

    if turns.is_empty() {
        let cause = primary_error.unwrap_or_else(|| AppError::internal("no tool calls issued"));
        let err = if cause.kind() == ErrorKind::Processing {
            cause
        } else {
            AppError::processing(format!("Tool execution failed: {}", cause.message()))
                .with_context("tool", decision.tool())
                .with_source(cause)
        };
        return Err(err);
    }

    Ok(turns)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    fn decision(fallback: bool) -> RoutingDecision {
        let decision =
            RoutingDecision::new("eval_params", "lookup_evaluation_parameters", "rhoma 15/9-F-5")
                .unwrap();
        if fallback {
            decision
                .with_fallback("retrieve_petrophysical_docs", "rhoma matrix density")
                .unwrap()
        } else {
            decision
        }
    }

    #[tokio::test]
    async fn test_primary_and_fallback_both_recorded() {
        let executor = StaticToolExecutor::new()
            .with_response("lookup_evaluation_parameters", "rhoma = 2.65 g/cc")
            .with_response("retrieve_petrophysical_docs", "Matrix density was set to 2.65");
        let decision = decision(true);

        let turns = execute_decision(&executor, &decision).await.unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].tool_name.as_deref(), Some("lookup_evaluation_parameters"));
        assert_eq!(turns[0].tool_call_id.as_deref(), Some(decision.call.id.as_str()));
        assert_eq!(turns[1].tool_name.as_deref(), Some("retrieve_petrophysical_docs"));
    }

    #[tokio::test]
    async fn test_fallback_covers_primary_failure() {
        let executor = StaticToolExecutor::new()
            .with_failure("lookup_evaluation_parameters", "table missing")
            .with_response("retrieve_petrophysical_docs", "Matrix density was set to 2.65");

        let turns = execute_decision(&executor, &decision(true)).await.unwrap();
        assert_eq!(turns.len(), 1);
        assert_eq!(executor.call_count("lookup_evaluation_parameters"), 1);
    }

    #[tokio::test]
    async fn test_failure_without_fallback_is_processing_error() {
        let executor = StaticToolExecutor::new();
        let err = assert_err!(execute_decision(&executor, &decision(false)).await);
        assert_eq!(err.kind(), ErrorKind::Processing);
        assert_eq!(err.context()["tool"], "lookup_evaluation_parameters");
    }

    #[tokio::test]
    async fn test_static_responses_replay_in_order() {
        let executor = StaticToolExecutor::new()
            .with_response("t", "first")
            .with_response("t", "second");
        let call = ToolCall {
            name: "t".to_string(),
            args: serde_json::json!({}),
            id: "call_t".to_string(),
        };

        assert_eq!(executor.execute(&call).await.unwrap(), "first");
        assert_eq!(executor.execute(&call).await.unwrap(), "second");
        assert_eq!(executor.execute(&call).await.unwrap(), "second");
        assert_eq!(executor.invocations().len(), 3);
    }

    #[test]
    fn test_http_executor_from_settings() {
        assert!(assert_ok!(HttpToolExecutor::from_settings(&ToolSettings::default())).is_none());

        let settings = ToolSettings {
            base_url: Some("http://tools.local/".to_string()),
            timeout_secs: 5,
        };
        let executor = HttpToolExecutor::from_settings(&settings).unwrap().unwrap();
        assert_eq!(executor.base_url, "http://tools.local");
    }
}
