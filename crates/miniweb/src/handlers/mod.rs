// src/handlers/mod.rs
//! Route handlers and the route table.

pub mod man;
pub mod network;
pub mod pages;
pub mod packages;
pub mod processes;
pub mod static_files;
pub mod system;

use crate::state::AppState;
use miniweb_core::{HandlerError, HandlerResult, Request, Response, Router};
use serde::Serialize;
use serde::de::DeserializeOwned;

pub fn router() -> Router<AppState> {
    let mut router = Router::new();
    router.get("/", pages::index);
    router.get("/static/*path", static_files::serve);
    router.get("/api/system", system::system_info);
    router.get("/api/server", system::server_stats);
    router.get("/api/network", network::latest);
    router.get("/api/network/history", network::history);
    router.get("/api/processes", processes::list);
    router.get("/api/packages", packages::list);
    router.get("/api/apropos", man::apropos);
    router.get("/man/:section/:page", man::page);
    router
}

pub(crate) fn json<T: Serialize + ?Sized>(value: &T) -> HandlerResult {
    serde_json::to_vec(value)
        .map(Response::json)
        .map_err(|e| HandlerError::Internal(format!("json encoding: {e}")))
}

/// Decode the query string into `T`. Missing query decodes as empty.
pub(crate) fn query<T: DeserializeOwned>(req: &Request<'_>) -> Result<T, HandlerError> {
    serde_urlencoded::from_str(req.query.unwrap_or(""))
        .map_err(|e| HandlerError::BadRequest(format!("invalid query string: {e}")))
}

/// "3d 4h 12m", "4h 12m" or "12m".
pub fn format_uptime(secs: u64) -> String {
    let days = secs / 86_400;
    let hours = secs % 86_400 / 3_600;
    let mins = secs % 3_600 / 60;
    match (days, hours) {
        (0, 0) => format!("{mins}m"),
        (0, _) => format!("{hours}h {mins}m"),
        _ => format!("{days}d {hours}h {mins}m"),
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_uptime() {
        assert_eq!(format_uptime(59), "0m");
        assert_eq!(format_uptime(3 * 3600 + 5 * 60), "3h 5m");
        assert_eq!(format_uptime(2 * 86_400 + 3600 + 60), "2d 1h 1m");
    }

    #[test]
    fn test_route_table() {
        let router = router();
        assert_eq!(router.len(), 10);
        let (_, params) = router
            .find(miniweb_core::Method::Get, "/man/1/ls")
            .unwrap();
        assert_eq!(params["section"], "1");
        assert!(router.find(miniweb_core::Method::Get, "/api/network/history").is_some());
        assert!(router.find(miniweb_core::Method::Head, "/api/system").is_some());
        assert!(router.find(miniweb_core::Method::Post, "/api/system").is_none());
    }
}
