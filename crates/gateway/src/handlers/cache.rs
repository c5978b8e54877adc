//! Cache and admission introspection

use crate::AppState;
use axum::{extract::State, Json};
use petrorag_common::CacheStats;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct CacheStatsResponse {
    pub name: String,
    pub default_ttl_secs: u64,
    #[serde(flatten)]
    pub stats: CacheStats,
    /// Callers with a live rate limit bucket
    pub tracked_identities: usize,
}

/// Entry counts of the memoization cache
pub async fn stats(State(state): State<AppState>) -> Json<CacheStatsResponse> {
    Json(CacheStatsResponse {
        name: state.cache.name().to_string(),
        default_ttl_secs: state.cache.default_ttl().as_secs(),
        stats: state.cache.stats(),
        tracked_identities: state.limiter.tracked_identities(),
    })
}
