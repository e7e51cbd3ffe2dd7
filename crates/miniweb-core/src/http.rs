// src/http.rs
use arrayvec::ArrayVec;
use std::net::{Ipv4Addr, SocketAddrV4};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Head,
    Options,
    Trace,
    Connect,
    Unknown,
}

impl Method {
    pub fn from_bytes(b: &[u8]) -> Self {
        match b {
            b"GET" => Method::Get,
            b"POST" => Method::Post,
            b"PUT" => Method::Put,
            b"DELETE" => Method::Delete,
            b"PATCH" => Method::Patch,
            b"HEAD" => Method::Head,
            b"OPTIONS" => Method::Options,
            b"TRACE" => Method::Trace,
            b"CONNECT" => Method::Connect,
            _ => Method::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Patch => "PATCH",
            Method::Head => "HEAD",
            Method::Options => "OPTIONS",
            Method::Trace => "TRACE",
            Method::Connect => "CONNECT",
            Method::Unknown => "UNKNOWN",
        }
    }
}

pub const MAX_HEADERS: usize = 64;

/// Capacity of the per-response custom header buffer.
pub const HEADER_BUF: usize = 2048;

/// Transient view over a fully-read request head. Borrows the connection buffer.
#[derive(Debug)]
pub struct Request<'a> {
    pub method: Method,
    /// Method token as sent, for logging unknown methods.
    pub method_raw: &'a str,
    pub path: &'a str,
    pub query: Option<&'a str>,
    pub version: &'a str,
    pub headers: ArrayVec<(&'a str, &'a str), MAX_HEADERS>,
    /// Length of the head including the terminating blank line.
    pub head_len: usize,
    pub peer: SocketAddrV4,
    /// Client address after trusted-proxy resolution.
    pub client: Ipv4Addr,
    pub is_https: bool,
}

impl<'a> Request<'a> {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&'a str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| *v)
    }

    /// HTTP/1.1 keep-alive hint. Informational only, every response closes.
    pub fn keep_alive(&self) -> bool {
        match self.header("Connection") {
            Some(v) if v.eq_ignore_ascii_case("close") => false,
            Some(v) if v.eq_ignore_ascii_case("keep-alive") => true,
            _ => self.version == "HTTP/1.1",
        }
    }

    /// Look up a query-string parameter (no percent-decoding).
    pub fn query_param(&self, key: &str) -> Option<&'a str> {
        self.query?.split('&').find_map(|pair| {
            let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
            (k == key).then_some(v)
        })
    }

    /// Apply client-IP resolution: forwarded headers are honored only from the trusted proxy.
    pub(crate) fn resolve_client(&mut self, trusted_proxy: Option<Ipv4Addr>) {
        self.client = *self.peer.ip();
        if trusted_proxy != Some(*self.peer.ip()) {
            return;
        }
        let forwarded = self
            .header("X-Real-IP")
            .or_else(|| self.header("X-Forwarded-For").and_then(|v| v.split(',').next()));
        if let Some(ip) = forwarded.and_then(|v| v.trim().parse().ok()) {
            self.client = ip;
        }
        self.is_https = self
            .header("X-Forwarded-Proto")
            .is_some_and(|p| p.trim().eq_ignore_ascii_case("https"));
    }
}

pub fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        204 => "No Content",
        301 => "Moved Permanently",
        302 => "Found",
        304 => "Not Modified",
        400 => "Bad Request",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        413 => "Payload Too Large",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HeaderError {
    #[error("response header buffer full ({HEADER_BUF} bytes)")]
    Overflow,

    /// Name is not an HTTP token, or the value holds CR, LF or NUL.
    #[error("invalid header line")]
    Invalid,
}

fn is_token_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
}

/// Accumulated output of a handler.
///
/// `body.len()` is authoritative for `Content-Length`; bodies may be binary.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub content_type: &'static str,
    pub body: Vec<u8>,
    headers: ArrayVec<u8, HEADER_BUF>,
    /// Set by the worker for HEAD requests: send the head only.
    pub omit_body: bool,
}

impl Response {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            content_type: "text/plain; charset=utf-8",
            body: Vec::new(),
            headers: ArrayVec::new(),
            omit_body: false,
        }
    }

    pub fn with_body(status: u16, content_type: &'static str, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            content_type,
            body: body.into(),
            headers: ArrayVec::new(),
            omit_body: false,
        }
    }

    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self::with_body(200, "text/plain; charset=utf-8", body)
    }

    pub fn html(body: impl Into<Vec<u8>>) -> Self {
        Self::with_body(200, "text/html; charset=utf-8", body)
    }

    pub fn text(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self::with_body(status, "text/plain; charset=utf-8", body)
    }

    pub fn json(body: impl Into<Vec<u8>>) -> Self {
        Self::with_body(200, "application/json", body)
    }

    pub fn bytes(content_type: &'static str, body: impl Into<Vec<u8>>) -> Self {
        Self::with_body(200, content_type, body)
    }

    /// Minimal HTML page naming the status, with an optional escaped detail line.
    pub fn error_page(status: u16, detail: Option<&str>) -> Self {
        let reason = reason_phrase(status);
        let mut body = format!(
            "<!DOCTYPE html>\n<html><head><title>{status} {reason}</title></head>\n<body><h1>{status} {reason}</h1>\n"
        );
        if let Some(detail) = detail {
            body.push_str("<p>");
            body.push_str(&escape_html(detail));
            body.push_str("</p>\n");
        }
        body.push_str("</body></html>\n");
        Self::with_body(status, "text/html; charset=utf-8", body)
    }

    pub fn bad_request(detail: &str) -> Self {
        Self::error_page(400, Some(detail))
    }

    pub fn forbidden(detail: &str) -> Self {
        Self::error_page(403, Some(detail))
    }

    pub fn not_found(path: &str) -> Self {
        Self::error_page(404, Some(&format!("No such resource: {path}")))
    }

    pub fn internal_error() -> Self {
        Self::error_page(500, None)
    }

    pub fn unavailable() -> Self {
        Self::error_page(503, Some("Server busy: connection limit reached"))
    }

    /// Append one `name: value\r\n` line, failing if the 2 KiB buffer would
    /// overflow or if the line could split the response head.
    pub fn try_header(&mut self, name: &str, value: &str) -> Result<(), HeaderError> {
        if name.is_empty()
            || !name.bytes().all(is_token_byte)
            || value.bytes().any(|b| matches!(b, b'\r' | b'\n' | 0))
        {
            return Err(HeaderError::Invalid);
        }
        let needed = name.len() + 2 + value.len() + 2;
        if self.headers.remaining_capacity() < needed {
            return Err(HeaderError::Overflow);
        }
        for part in [name.as_bytes(), b": ", value.as_bytes(), b"\r\n"] {
            // Capacity checked above.
            let _ = self.headers.try_extend_from_slice(part);
        }
        Ok(())
    }

    /// Builder form of `try_header`; a rejected header is dropped and logged.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        if let Err(e) = self.try_header(name, value) {
            tracing::warn!(header = %name.escape_debug(), error = %e, "header dropped");
        }
        self
    }

    /// Concatenated custom header lines.
    pub fn header_lines(&self) -> &[u8] {
        &self.headers
    }

    pub fn body_len(&self) -> usize {
        self.body.len()
    }
}

pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
