// src/handlers/network.rs
use super::{json, query};
use crate::state::AppState;
use miniweb_core::{Context, HandlerError, HandlerResult};
use serde::Deserialize;

/// Snapshots returned by `/api/network/history` without `?n=`.
pub const DEFAULT_HISTORY: usize = 60;

#[derive(Debug, Default, Deserialize)]
struct HistoryQuery {
    n: Option<usize>,
}

/// `GET /api/network`
pub fn latest(ctx: &Context<'_, AppState>) -> HandlerResult {
    let snapshot = ctx
        .state
        .network
        .last()
        .ok_or_else(|| HandlerError::Internal("no network snapshot available".into()))?;
    json(&snapshot)
}

/// `GET /api/network/history?n=K`: up to K snapshots, oldest first.
pub fn history(ctx: &Context<'_, AppState>) -> HandlerResult {
    let q: HistoryQuery = query(ctx.req)?;
    let n = q.n.unwrap_or(DEFAULT_HISTORY);
    json(&ctx.state.network.last_n(n))
}
