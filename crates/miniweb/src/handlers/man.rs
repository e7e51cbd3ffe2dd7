// src/handlers/man.rs
//! Manual pages: rendering through mandoc and keyword search through apropos.

use super::{json, query};
use crate::state::AppState;
use miniweb_core::capture::run;
use miniweb_core::{Context, HandlerError, HandlerResult, Response, capture};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const MAN: &str = "/usr/bin/man";
const APROPOS: &str = "/usr/bin/apropos";
const MAX_TOKEN: usize = 64;
const MAX_QUERY: usize = 128;
const LOCATE_TIMEOUT: Duration = Duration::from_secs(5);
const PAGE_MAX_BYTES: usize = 8 * 1024 * 1024;
const APROPOS_MAX_BYTES: usize = 1024 * 1024;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    #[default]
    Html,
    Pdf,
    Txt,
}

impl Format {
    fn mandoc_output(self) -> &'static str {
        match self {
            Format::Html => "html",
            Format::Pdf => "pdf",
            Format::Txt => "ascii",
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct PageQuery {
    #[serde(default)]
    format: Format,
}

#[derive(Debug, Default, Deserialize)]
struct AproposQuery {
    #[serde(default)]
    q: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AproposHit {
    pub name: String,
    pub section: String,
    pub description: String,
}

/// Section and page names: `[A-Za-z0-9._+-]`, not starting with `-`.
pub fn valid_token(s: &str) -> bool {
    !s.is_empty()
        && s.len() <= MAX_TOKEN
        && !s.starts_with('-')
        && s.bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'+' | b'-'))
}

/// Remove `X\bX` bold and `_\bX` underline sequences from terminal output.
pub fn strip_overstrike(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        if ch == '\u{8}' {
            out.pop();
        } else {
            out.push(ch);
        }
    }
    out
}

/// Parse `name(sec) - description` lines. Both `ls(1)` and `ls (1)` forms occur.
pub fn parse_apropos(text: &str) -> Vec<AproposHit> {
    text.lines()
        .filter_map(|line| {
            let (left, description) = line.split_once(" - ")?;
            let open = left.rfind('(')?;
            let close = left[open..].find(')')? + open;
            let name = left[..open].trim();
            let section = left[open + 1..close].trim();
            if name.is_empty() || section.is_empty() {
                return None;
            }
            Some(AproposHit {
                name: name.to_string(),
                section: section.to_string(),
                description: description.trim().to_string(),
            })
        })
        .collect()
}

/// Path of the source file for `page` in `section`, via `man -w`.
fn locate(section: &str, page: &str) -> Option<String> {
    let out = capture(MAN, &["man", "-w", section, page], 4096, LOCATE_TIMEOUT)?;
    if !out.status().is_some_and(|s| s.success()) {
        return None;
    }
    let text = out.text();
    let path = text.lines().next()?.trim();
    path.starts_with('/').then(|| path.to_string())
}

/// `GET /man/:section/:page[?format=html|pdf|txt]`
pub fn page(ctx: &Context<'_, AppState>) -> HandlerResult {
    let section = ctx.get_param("section").unwrap_or("");
    let name = ctx.get_param("page").unwrap_or("");
    if !valid_token(section) || !valid_token(name) {
        return Err(HandlerError::BadRequest("invalid manual section or page name".into()));
    }
    let q: PageQuery = query(ctx.req)?;

    let source = locate(section, name)
        .ok_or_else(|| HandlerError::NotFound(format!("No manual entry for {name}({section})")))?;

    let mandoc = ctx.state.config.mandoc_path.to_string_lossy();
    render(&mandoc, &source, q.format, ctx.state.subprocess_timeout())
}

/// Render `source` through mandoc. A clean run that prints nothing means the
/// page has no content in this format.
fn render(mandoc: &str, source: &str, format: Format, timeout: Duration) -> HandlerResult {
    let argv = ["mandoc", "-T", format.mandoc_output(), source];
    let out = match run(mandoc, &argv, PAGE_MAX_BYTES, timeout) {
        Ok(out) => out,
        Err(e) if e.is_clean_empty() => {
            return Err(HandlerError::NotFound(format!("mandoc produced nothing for {source}")));
        }
        Err(e) => return Err(HandlerError::Internal(format!("mandoc on {source}: {e}"))),
    };
    // mandoc reports errors from 3 upward; lower codes still carry a rendering.
    if out.status().and_then(|s| s.code()).is_some_and(|c| c >= 3) {
        return Err(HandlerError::Internal(format!("mandoc failed on {source}")));
    }

    Ok(match format {
        Format::Html => Response::html(out.into_bytes()),
        Format::Pdf => Response::bytes("application/pdf", out.into_bytes()),
        Format::Txt => Response::text(200, strip_overstrike(&out.text())),
    })
}

/// `GET /api/apropos?q=TERM`
pub fn apropos(ctx: &Context<'_, AppState>) -> HandlerResult {
    let q: AproposQuery = query(ctx.req)?;
    let term = q.q.trim();
    if term.is_empty() {
        return Err(HandlerError::BadRequest("missing search term".into()));
    }
    if term.len() > MAX_QUERY || term.starts_with('-') {
        return Err(HandlerError::BadRequest("invalid search term".into()));
    }
    let hits = capture(APROPOS, &["apropos", term], APROPOS_MAX_BYTES, ctx.state.subprocess_timeout())
        .map(|out| parse_apropos(&out.text()))
        .unwrap_or_default();
    json(&hits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::handlers::testing::{call, state};

    #[test]
    fn test_valid_token() {
        assert!(valid_token("1"));
        assert!(valid_token("3p"));
        assert!(valid_token("g++"));
        assert!(valid_token("pkg_add.conf-5"));
        assert!(!valid_token(""));
        assert!(!valid_token("-T"));
        assert!(!valid_token("../etc"));
        assert!(!valid_token("a b"));
        assert!(!valid_token("x;rm"));
        assert!(!valid_token(&"a".repeat(MAX_TOKEN + 1)));
    }

    #[test]
    fn test_strip_overstrike() {
        assert_eq!(strip_overstrike("N\u{8}NA\u{8}AM\u{8}ME\u{8}E"), "NAME");
        assert_eq!(strip_overstrike("_\u{8}f_\u{8}i_\u{8}l_\u{8}e"), "file");
        assert_eq!(strip_overstrike("plain"), "plain");
    }

    #[test]
    fn test_parse_apropos() {
        let text = "ls(1) - list directory contents\n\
                    cat, tac (1)         - concatenate files\n\
                    nothing appropriate.\n\
                    strange(3p) - has - dashes\n";
        let hits = parse_apropos(text);
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0], AproposHit {
            name: "ls".into(),
            section: "1".into(),
            description: "list directory contents".into(),
        });
        assert_eq!(hits[1].name, "cat, tac");
        assert_eq!(hits[2].section, "3p");
        assert_eq!(hits[2].description, "has - dashes");
    }

    #[test]
    fn test_page_rejects_bad_names() {
        let state = state(Config::default());
        let head = "GET /man/1/-Tx HTTP/1.1\r\n\r\n";
        let err = call(page, &state, head, &[("section", "1"), ("page", "-Tx")]).unwrap_err();
        assert_eq!(err.status(), 400);
        let err = call(page, &state, head, &[("section", "1;ls"), ("page", "ls")]).unwrap_err();
        assert_eq!(err.status(), 400);
    }

    #[test]
    fn test_page_rejects_bad_format() {
        let state = state(Config::default());
        let head = "GET /man/1/ls?format=dvi HTTP/1.1\r\n\r\n";
        let err = call(page, &state, head, &[("section", "1"), ("page", "ls")]).unwrap_err();
        assert_eq!(err.status(), 400);
    }

    #[test]
    fn test_missing_page_is_not_found() {
        let state = state(Config::default());
        let head = "GET /man/1/no-such-page-zz9 HTTP/1.1\r\n\r\n";
        let params = [("section", "1"), ("page", "no-such-page-zz9")];
        let err = call(page, &state, head, &params).unwrap_err();
        assert_eq!(err.status(), 404);
    }

    /// Executable stand-in for mandoc running `body`.
    fn fake_mandoc(tag: &str, body: &str) -> String {
        use std::os::unix::fs::PermissionsExt;
        let dir = std::env::temp_dir().join(format!("miniweb-mandoc-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(tag);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn test_silent_mandoc_is_not_found() {
        let mandoc = fake_mandoc("silent", "exit 0");
        let err = render(&mandoc, "/usr/share/man/man1/ls.1", Format::Html, Duration::from_secs(5)).unwrap_err();
        assert_eq!(err.status(), 404);
    }

    #[test]
    fn test_failing_mandoc_is_internal_error() {
        let timeout = Duration::from_secs(5);

        let silent_failure = fake_mandoc("silent-failure", "exit 5");
        let err = render(&silent_failure, "/x.1", Format::Html, timeout).unwrap_err();
        assert_eq!(err.status(), 500);

        let noisy_failure = fake_mandoc("noisy-failure", "echo 'mandoc: /x.1: ERROR'; exit 4");
        let err = render(&noisy_failure, "/x.1", Format::Html, timeout).unwrap_err();
        assert_eq!(err.status(), 500);

        let err = render("/nonexistent/mandoc", "/x.1", Format::Html, timeout).unwrap_err();
        assert_eq!(err.status(), 500);
    }

    #[test]
    fn test_mandoc_output_becomes_body() {
        let mandoc = fake_mandoc("warning", "printf 'N\\bNAME\\n'; echo \"$2 $3\" 1>&2; exit 1");
        let res = render(&mandoc, "/x.1", Format::Txt, Duration::from_secs(5)).unwrap();
        assert_eq!(res.status, 200);
        let body = String::from_utf8(res.body).unwrap();
        assert!(body.starts_with("NAME\n"));
        assert!(body.contains("ascii /x.1"));
    }

    #[test]
    fn test_apropos_validation() {
        let state = state(Config::default());
        let err = call(apropos, &state, "GET /api/apropos HTTP/1.1\r\n\r\n", &[]).unwrap_err();
        assert_eq!(err.status(), 400);
        let err = call(apropos, &state, "GET /api/apropos?q= HTTP/1.1\r\n\r\n", &[]).unwrap_err();
        assert_eq!(err.status(), 400);
        let err = call(apropos, &state, "GET /api/apropos?q=-k HTTP/1.1\r\n\r\n", &[]).unwrap_err();
        assert_eq!(err.status(), 400);
        let long = format!("GET /api/apropos?q={} HTTP/1.1\r\n\r\n", "x".repeat(MAX_QUERY + 1));
        assert_eq!(call(apropos, &state, &long, &[]).unwrap_err().status(), 400);
    }

    #[test]
    fn test_apropos_returns_array() {
        let state = state(Config::default());
        let head = "GET /api/apropos?q=zz9-plural-z-alpha HTTP/1.1\r\n\r\n";
        let res = call(apropos, &state, head, &[]).unwrap();
        let v: serde_json::Value = serde_json::from_slice(&res.body).unwrap();
        assert!(v.is_array());
    }
}
