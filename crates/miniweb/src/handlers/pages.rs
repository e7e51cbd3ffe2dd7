// src/handlers/pages.rs
use super::format_uptime;
use super::system;
use crate::state::AppState;
use crate::templates::{self, FALLBACK_INDEX};
use miniweb_core::{Context, HandlerResult, Response};

/// `GET /`: the index template, or the built-in page when none is installed.
pub fn index(ctx: &Context<'_, AppState>) -> HandlerResult {
    let state = ctx.state;
    let template = templates::load(&state.config.templates_dir, "index.html")
        .unwrap_or_else(|| FALLBACK_INDEX.to_string());

    let uptime = system::host_uptime().unwrap_or_else(|| state.uptime().as_secs());
    let uptime = format_uptime(uptime);
    let client = ctx.req.client.to_string();
    let html = templates::render(
        &template,
        &[
            ("hostname", state.hostname.as_str()),
            ("uptime", uptime.as_str()),
            ("version", crate::VERSION),
            ("client", client.as_str()),
        ],
    );
    Ok(Response::html(html))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::handlers::testing::{body, call, state};
    use std::path::PathBuf;

    #[test]
    fn test_fallback_page() {
        let state = state(Config {
            templates_dir: PathBuf::from("/nonexistent"),
            ..Config::default()
        });
        let res = call(index, &state, "GET / HTTP/1.1\r\n\r\n", &[]).unwrap();
        assert_eq!(res.status, 200);
        assert!(res.content_type.starts_with("text/html"));
        let html = body(&res);
        assert!(html.contains(crate::VERSION));
        assert!(html.contains("127.0.0.1"));
        assert!(!html.contains("{{"));
    }

    #[test]
    fn test_template_from_dir() {
        let dir = std::env::temp_dir().join(format!("miniweb-tpl-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("index.html"), "<b>{{version}}</b>{{nope}}").unwrap();

        let state = state(Config {
            templates_dir: dir.clone(),
            ..Config::default()
        });
        let res = call(index, &state, "GET / HTTP/1.1\r\n\r\n", &[]).unwrap();
        assert_eq!(body(&res), format!("<b>{}</b>", crate::VERSION));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
