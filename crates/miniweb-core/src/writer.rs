// src/writer.rs
use crate::http::{Response, reason_phrase};
use crate::syscalls;
use std::io::{self, Write};
use std::os::fd::RawFd;
use std::time::{Duration, SystemTime};

pub const SERVER_NAME: &str = concat!("miniweb/", env!("CARGO_PKG_VERSION"));

/// Per-retry wait for write readiness after EAGAIN.
pub const WRITE_WAIT_MS: i32 = 10;
/// EAGAIN retries allowed per `write_all` call.
pub const WRITE_MAX_RETRIES: u32 = 100;
/// Bodies above this size are sent after a short pause following the head.
pub const LARGE_BODY: usize = 64 * 1024;
pub const HEAD_BODY_PAUSE: Duration = Duration::from_millis(5);

/// Serialize status line, standard headers, custom header lines and the blank line.
pub fn serialize_head(res: &Response) -> Vec<u8> {
    let custom = res.header_lines();
    let mut head = Vec::with_capacity(192 + custom.len());
    // Writes into a Vec cannot fail.
    let _ = write!(
        head,
        "HTTP/1.1 {} {}\r\nDate: {}\r\nServer: {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n",
        res.status,
        reason_phrase(res.status),
        httpdate::fmt_http_date(SystemTime::now()),
        SERVER_NAME,
        res.content_type,
        res.body_len(),
    );
    head.extend_from_slice(custom);
    head.extend_from_slice(b"\r\n");
    head
}

/// Write every byte of `buf` to a non-blocking socket.
///
/// EINTR retries at once; EAGAIN waits up to `WRITE_WAIT_MS` for writability,
/// at most `WRITE_MAX_RETRIES` times. A zero-length write is an error.
pub fn write_all(fd: RawFd, mut buf: &[u8]) -> io::Result<usize> {
    let total = buf.len();
    let mut retries = 0;
    while !buf.is_empty() {
        match syscalls::send_nonblocking(fd, buf) {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(n) => buf = &buf[n..],
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                retries += 1;
                if retries > WRITE_MAX_RETRIES {
                    return Err(io::Error::new(io::ErrorKind::TimedOut, "peer stopped reading"));
                }
                syscalls::wait_writable(fd, WRITE_WAIT_MS)?;
            }
            Err(e) => return Err(e),
        }
    }
    Ok(total)
}

/// Send a complete response. Returns the number of bytes written.
pub fn send_response(fd: RawFd, res: &Response) -> io::Result<usize> {
    let head = serialize_head(res);
    if res.omit_body || res.body.is_empty() {
        return write_all(fd, &head);
    }
    if res.body.len() > LARGE_BODY {
        let sent = write_all(fd, &head)?;
        std::thread::sleep(HEAD_BODY_PAUSE);
        return Ok(sent + write_all(fd, &res.body)?);
    }
    // Small responses go out in one buffer.
    let mut out = head;
    out.extend_from_slice(&res.body);
    write_all(fd, &out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::os::fd::AsRawFd;
    use std::os::unix::net::UnixStream;

    fn head_str(res: &Response) -> String {
        String::from_utf8(serialize_head(res)).unwrap()
    }

    #[test]
    fn test_head_has_standard_headers() {
        let res = Response::html("<p>hi</p>").header("X-Frame-Options", "DENY");
        let head = head_str(&res);
        assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(head.contains("Content-Type: text/html; charset=utf-8\r\n"));
        assert!(head.contains("Content-Length: 9\r\n"));
        assert!(head.contains("Connection: close\r\n"));
        assert!(head.contains(&format!("Server: {SERVER_NAME}\r\n")));
        assert!(head.ends_with("X-Frame-Options: DENY\r\n\r\n"));
    }

    #[test]
    fn test_content_length_counts_binary_bytes() {
        let res = Response::bytes("application/pdf", vec![0u8, 1, 0, 2, 0]);
        assert!(head_str(&res).contains("Content-Length: 5\r\n"));
    }

    #[test]
    fn test_send_large_response_over_socketpair() {
        let (a, mut b) = UnixStream::pair().unwrap();
        a.set_nonblocking(true).unwrap();
        let body = vec![b'x'; LARGE_BODY * 3];
        let res = Response::bytes("application/octet-stream", body.clone());

        let reader = std::thread::spawn(move || {
            let mut all = Vec::new();
            b.read_to_end(&mut all).unwrap();
            all
        });
        let sent = send_response(a.as_raw_fd(), &res).unwrap();
        drop(a);

        let all = reader.join().unwrap();
        assert_eq!(sent, all.len());
        let split = all.windows(4).position(|w| w == b"\r\n\r\n").unwrap() + 4;
        assert_eq!(&all[split..], &body[..]);
    }

    #[test]
    fn test_head_request_omits_body_but_keeps_length() {
        let (a, mut b) = UnixStream::pair().unwrap();
        let mut res = Response::ok("hello");
        res.omit_body = true;
        send_response(a.as_raw_fd(), &res).unwrap();
        drop(a);
        let mut s = String::new();
        b.read_to_string(&mut s).unwrap();
        assert!(s.contains("Content-Length: 5\r\n"));
        assert!(s.ends_with("\r\n\r\n"));
    }
}
