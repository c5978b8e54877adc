//! Health check handlers

use crate::AppState;
use axum::{extract::State, Json};
use serde::Serialize;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Serialize)]
pub struct ReadyResponse {
    pub status: String,
    pub checks: HealthChecks,
}

#[derive(Serialize)]
pub struct HealthChecks {
    pub llm: CheckResult,
    pub tools: CheckResult,
    pub structured_cache: CheckResult,
}

#[derive(Serialize)]
pub struct CheckResult {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl CheckResult {
    fn up() -> Self {
        Self {
            status: "up".to_string(),
            detail: None,
        }
    }

    fn degraded(detail: &str) -> Self {
        Self {
            status: "degraded".to_string(),
            detail: Some(detail.to_string()),
        }
    }
}

/// Liveness probe - always returns healthy if server is running
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: petrorag_common::VERSION.to_string(),
    })
}

/// Readiness probe - reports which backends are real and which are stand-ins
pub async fn ready(State(state): State<AppState>) -> Json<ReadyResponse> {
    let llm = if state.llm_configured {
        CheckResult::up()
    } else {
        CheckResult::degraded("no API key, development mock in use")
    };

    let tools = if state.tools_configured {
        CheckResult::up()
    } else {
        CheckResult::degraded("no tool service configured")
    };

    let structured_cache = if state.config.structured_cache_path().exists() {
        CheckResult::up()
    } else {
        CheckResult::degraded("structured parameter cache not found")
    };

    let all_up = [&llm, &tools].iter().all(|c| c.status == "up");

    Json(ReadyResponse {
        status: if all_up { "ready" } else { "degraded" }.to_string(),
        checks: HealthChecks {
            llm,
            tools,
            structured_cache,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_support::state_with;
    use petrorag_common::llm::MockLlmClient;
    use petrorag_context::StaticToolExecutor;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_health_reports_version() {
        let Json(body) = health().await;
        assert_eq!(body.status, "healthy");
        assert_eq!(body.version, petrorag_common::VERSION);
    }

    #[tokio::test]
    async fn test_ready_is_degraded_on_development_doubles() {
        let state = state_with(Arc::new(MockLlmClient::new()), StaticToolExecutor::new());
        let Json(body) = ready(State(state)).await;

        assert_eq!(body.status, "degraded");
        assert_eq!(body.checks.llm.status, "degraded");
        assert_eq!(body.checks.tools.status, "degraded");
    }
}
