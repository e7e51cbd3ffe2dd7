// src/parser.rs
use crate::http::{MAX_HEADERS, Method, Request};
use arrayvec::ArrayVec;
use memchr::memmem;
use std::net::SocketAddrV4;
use thiserror::Error;

pub const MAX_METHOD_LEN: usize = 31;
pub const MAX_PATH_LEN: usize = 511;
pub const MAX_VERSION_LEN: usize = 31;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("malformed request line")]
    Malformed,
    #[error("malformed header line")]
    BadHeader,
    #[error("more than {MAX_HEADERS} header lines")]
    TooManyHeaders,
    #[error("request head too large")]
    TooLarge,
}

/// Split `METHOD SP PATH SP VERSION` with the length bounds applied.
pub fn parse_request_line(line: &[u8]) -> Result<(&str, &str, &str), ParseError> {
    let line = std::str::from_utf8(line).map_err(|_| ParseError::Malformed)?;
    let mut parts = line.split(' ');
    let (Some(method), Some(target), Some(version), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(ParseError::Malformed);
    };

    if method.is_empty()
        || method.len() > MAX_METHOD_LEN
        || !method.bytes().all(|b| b.is_ascii_uppercase())
    {
        return Err(ParseError::Malformed);
    }
    if target.is_empty() || target.len() > MAX_PATH_LEN || !target.starts_with('/') {
        return Err(ParseError::Malformed);
    }
    if version.len() > MAX_VERSION_LEN || !version.starts_with("HTTP/") {
        return Err(ParseError::Malformed);
    }
    Ok((method, target, version))
}

/// Parse a complete head (request line + headers, ending in `\r\n\r\n`).
pub fn parse_head(head: &[u8], peer: SocketAddrV4) -> Result<Request<'_>, ParseError> {
    let line_end = memmem::find(head, b"\r\n").ok_or(ParseError::Malformed)?;
    let (method_raw, target, version) = parse_request_line(&head[..line_end])?;

    let (path, query) = match target.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (target, None),
    };

    let mut headers = ArrayVec::new();
    let mut cursor = line_end + 2;
    while cursor + 1 < head.len() {
        let rest = &head[cursor..];
        let end = memmem::find(rest, b"\r\n").ok_or(ParseError::BadHeader)?;
        if end == 0 {
            break;
        }
        let line = std::str::from_utf8(&rest[..end]).map_err(|_| ParseError::BadHeader)?;
        let (name, value) = line.split_once(':').ok_or(ParseError::BadHeader)?;
        if name.is_empty() || name.contains(' ') {
            return Err(ParseError::BadHeader);
        }
        headers
            .try_push((name, value.trim()))
            .map_err(|_| ParseError::TooManyHeaders)?;
        cursor += end + 2;
    }

    let client = *peer.ip();
    Ok(Request {
        method: Method::from_bytes(method_raw.as_bytes()),
        method_raw,
        path,
        query,
        version,
        headers,
        head_len: head.len(),
        peer,
        client,
        is_https: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn peer() -> SocketAddrV4 {
        SocketAddrV4::new(Ipv4Addr::LOCALHOST, 40000)
    }

    #[test]
    fn test_parse_basic_request() {
        let head = b"GET /some/path?foo=bar HTTP/1.1\r\nHost: localhost\r\nKeep-Alive: true\r\n\r\n";
        let req = parse_head(head, peer()).unwrap();

        assert_eq!(req.method, Method::Get);
        assert_eq!(req.path, "/some/path");
        assert_eq!(req.query, Some("foo=bar"));
        assert_eq!(req.version, "HTTP/1.1");
        assert_eq!(req.headers.len(), 2);
        assert_eq!(req.headers[0], ("Host", "localhost"));
        assert_eq!(req.headers[1], ("Keep-Alive", "true"));
        assert_eq!(req.head_len, head.len());
        assert_eq!(req.client, Ipv4Addr::LOCALHOST);
    }

    #[test]
    fn test_malformed_request_lines() {
        for line in [
            &b"NOT A VALID LINE"[..],
            b"GET /",
            b"GET / HTTP/1.1 extra",
            b"get / HTTP/1.1",
            b"GET relative HTTP/1.1",
            b"GET / FTP/1.0",
            b"GET  / HTTP/1.1",
            b"",
        ] {
            assert_eq!(parse_request_line(line), Err(ParseError::Malformed), "{:?}", line);
        }
    }

    #[test]
    fn test_request_line_length_bounds() {
        let long_path = format!("GET /{} HTTP/1.1", "a".repeat(MAX_PATH_LEN));
        assert_eq!(parse_request_line(long_path.as_bytes()), Err(ParseError::Malformed));
        let ok_path = format!("GET /{} HTTP/1.1", "a".repeat(MAX_PATH_LEN - 1));
        assert!(parse_request_line(ok_path.as_bytes()).is_ok());
        let long_method = format!("{} / HTTP/1.1", "X".repeat(MAX_METHOD_LEN + 1));
        assert_eq!(parse_request_line(long_method.as_bytes()), Err(ParseError::Malformed));
    }

    #[test]
    fn test_unknown_method_still_parses() {
        let req = parse_head(b"BREW /pot HTTP/1.1\r\n\r\n", peer()).unwrap();
        assert_eq!(req.method, Method::Unknown);
        assert_eq!(req.method_raw, "BREW");
    }

    #[test]
    fn test_bad_header_line() {
        let head = b"GET / HTTP/1.1\r\nno colon here\r\n\r\n";
        assert!(matches!(parse_head(head, peer()), Err(ParseError::BadHeader)));
    }

    #[test]
    fn test_too_many_headers() {
        let mut head = b"GET / HTTP/1.1\r\n".to_vec();
        for i in 0..=MAX_HEADERS {
            head.extend_from_slice(format!("X-{i}: v\r\n").as_bytes());
        }
        head.extend_from_slice(b"\r\n");
        assert!(matches!(parse_head(&head, peer()), Err(ParseError::TooManyHeaders)));
    }
}
