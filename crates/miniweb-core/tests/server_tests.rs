use miniweb_core::{Context, HandlerError, HandlerResult, MetricsHandle, Response, Router, Server, ServerConfig};
use std::io::{Read, Write};
use std::net::{Ipv4Addr, SocketAddrV4, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

struct TestServer {
    addr: SocketAddrV4,
    shutdown: Arc<AtomicBool>,
    metrics: MetricsHandle,
    handle: Option<JoinHandle<()>>,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn index(_: &Context<'_, String>) -> HandlerResult {
    Ok(Response::html("<h1>miniweb</h1>"))
}

fn whoami(ctx: &Context<'_, String>) -> HandlerResult {
    let scheme = if ctx.req.is_https { "https" } else { "http" };
    Ok(Response::ok(format!("{} {}", ctx.req.client, scheme)))
}

fn greet(ctx: &Context<'_, String>) -> HandlerResult {
    let name = ctx.get_param("name").unwrap_or("nobody");
    Ok(Response::ok(format!("{}, {}", ctx.state, name)))
}

fn broken(_: &Context<'_, String>) -> HandlerResult {
    Err(HandlerError::Internal("disk on fire".into()))
}

fn start(config: ServerConfig) -> TestServer {
    let mut router = Router::new();
    router.get("/", index);
    router.get("/whoami", whoami);
    router.get("/greet/:name", greet);
    router.get("/broken", broken);

    let server = Server::bind(ServerConfig { port: 0, ..config }).unwrap();
    let addr = server.local_addr();
    let shutdown = server.shutdown_handle();
    let metrics = server.metrics();
    let handle = thread::spawn(move || {
        server.serve(router, "hello".to_string()).unwrap();
    });
    TestServer {
        addr,
        shutdown,
        metrics,
        handle: Some(handle),
    }
}

fn request(addr: SocketAddrV4, raw: &[u8]) -> String {
    let mut stream = TcpStream::connect(addr).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    stream.write_all(raw).unwrap();
    let mut res = String::new();
    stream.read_to_string(&mut res).unwrap();
    res
}

fn content_length(res: &str) -> usize {
    res.lines()
        .find_map(|l| l.strip_prefix("Content-Length: "))
        .and_then(|v| v.trim().parse().ok())
        .unwrap()
}

fn body(res: &str) -> &str {
    res.split_once("\r\n\r\n").map(|(_, b)| b).unwrap_or("")
}

#[test]
fn test_happy_path() {
    let srv = start(ServerConfig::default());
    let res = request(srv.addr, b"GET / HTTP/1.1\r\nHost: x\r\n\r\n");

    assert!(res.starts_with("HTTP/1.1 200 OK\r\n"), "{res}");
    assert!(res.contains("Connection: close\r\n"));
    assert!(res.contains("Server: miniweb/"));
    assert!(res.contains("Date: "));
    assert_eq!(content_length(&res), body(&res).len());
    assert!(!body(&res).is_empty());
}

#[test]
fn test_route_params_and_state() {
    let srv = start(ServerConfig::default());
    let res = request(srv.addr, b"GET /greet/world HTTP/1.1\r\n\r\n");
    assert_eq!(body(&res), "hello, world");
}

#[test]
fn test_malformed_line() {
    let srv = start(ServerConfig::default());
    let res = request(srv.addr, b"NOT A VALID LINE\r\n\r\n");
    assert!(res.starts_with("HTTP/1.1 400 Bad Request\r\n"), "{res}");
    assert!(body(&res).contains("Bad Request"));
    assert_eq!(content_length(&res), body(&res).len());
}

#[test]
fn test_unknown_route() {
    let srv = start(ServerConfig::default());
    let res = request(srv.addr, b"GET /does-not-exist HTTP/1.1\r\n\r\n");
    assert!(res.starts_with("HTTP/1.1 404 Not Found\r\n"), "{res}");
    assert!(body(&res).contains("/does-not-exist"));
}

#[test]
fn test_handler_error_is_opaque_500() {
    let srv = start(ServerConfig::default());
    let res = request(srv.addr, b"GET /broken HTTP/1.1\r\n\r\n");
    assert!(res.starts_with("HTTP/1.1 500 Internal Server Error\r\n"), "{res}");
    assert!(!res.contains("disk on fire"));
}

#[test]
fn test_head_sends_length_without_body() {
    let srv = start(ServerConfig::default());
    let res = request(srv.addr, b"HEAD / HTTP/1.1\r\n\r\n");
    assert!(res.starts_with("HTTP/1.1 200 OK\r\n"));
    assert_eq!(content_length(&res), "<h1>miniweb</h1>".len());
    assert!(body(&res).is_empty());
}

#[test]
fn test_head_split_across_writes() {
    let srv = start(ServerConfig::default());
    let mut stream = TcpStream::connect(srv.addr).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    stream.write_all(b"GET /greet/slow HTTP/1.1\r\nHo").unwrap();
    thread::sleep(Duration::from_millis(100));
    stream.write_all(b"st: x\r\n\r").unwrap();
    thread::sleep(Duration::from_millis(100));
    stream.write_all(b"\n").unwrap();
    let mut res = String::new();
    stream.read_to_string(&mut res).unwrap();
    assert_eq!(body(&res), "hello, slow");
}

#[test]
fn test_oversized_head_is_rejected() {
    let srv = start(ServerConfig {
        max_req_size: 1024,
        ..ServerConfig::default()
    });
    // Exactly fills the buffer (one byte is kept for the terminator).
    let mut raw = b"GET / HTTP/1.1\r\nX-Fill: ".to_vec();
    raw.resize(1023, b'a');
    let res = request(srv.addr, &raw);
    assert!(res.starts_with("HTTP/1.1 400 Bad Request\r\n"), "{res}");
    assert!(res.contains("Request head too large"));
}

#[test]
fn test_connection_cap() {
    let srv = start(ServerConfig {
        max_conns: 2,
        ..ServerConfig::default()
    });
    let mut first = TcpStream::connect(srv.addr).unwrap();
    let mut second = TcpStream::connect(srv.addr).unwrap();
    // Let the accept loop admit both before the third arrives.
    thread::sleep(Duration::from_millis(200));
    assert_eq!(srv.metrics.snapshot().active_connections, 2);

    let res = request(srv.addr, b"GET / HTTP/1.1\r\n\r\n");
    assert!(res.starts_with("HTTP/1.1 503 Service Unavailable\r\n"), "{res}");
    assert!(body(&res).contains("connection limit"));
    assert_eq!(srv.metrics.snapshot().rejected, 1);

    for stream in [&mut first, &mut second] {
        stream.write_all(b"GET / HTTP/1.1\r\n\r\n").unwrap();
        let mut res = String::new();
        stream.read_to_string(&mut res).unwrap();
        assert!(res.starts_with("HTTP/1.1 200 OK\r\n"));
    }
}

#[test]
fn test_idle_connection_is_reaped() {
    let srv = start(ServerConfig {
        conn_timeout: 1,
        ..ServerConfig::default()
    });
    let mut stream = TcpStream::connect(srv.addr).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(10))).unwrap();

    let start = Instant::now();
    let mut buf = [0u8; 64];
    let n = stream.read(&mut buf).unwrap();
    assert_eq!(n, 0, "server sent bytes to an idle client");
    assert!(start.elapsed() <= Duration::from_secs(5));
    thread::sleep(Duration::from_millis(50));
    assert!(srv.metrics.snapshot().idle_reaped >= 1);
    assert_eq!(srv.metrics.snapshot().active_connections, 0);
}

#[test]
fn test_forwarded_headers_need_trusted_proxy() {
    let untrusted = start(ServerConfig::default());
    let raw = b"GET /whoami HTTP/1.1\r\nX-Forwarded-For: 10.1.2.3, 10.0.0.1\r\nX-Forwarded-Proto: https\r\n\r\n";
    assert_eq!(body(&request(untrusted.addr, raw)), "127.0.0.1 http");

    let trusted = start(ServerConfig {
        trusted_proxy: Some(Ipv4Addr::LOCALHOST),
        ..ServerConfig::default()
    });
    assert_eq!(body(&request(trusted.addr, raw)), "10.1.2.3 https");

    let raw = b"GET /whoami HTTP/1.1\r\nX-Real-IP: 192.0.2.7\r\nX-Forwarded-For: 10.1.2.3\r\n\r\n";
    assert_eq!(body(&request(trusted.addr, raw)), "192.0.2.7 http");
}

#[test]
fn test_counters_follow_traffic() {
    let srv = start(ServerConfig::default());
    for _ in 0..5 {
        request(srv.addr, b"GET / HTTP/1.1\r\n\r\n");
    }
    let snap = srv.metrics.snapshot();
    assert_eq!(snap.requests, 5);
    assert!(snap.bytes_sent > 5 * "<h1>miniweb</h1>".len());
}

#[test]
fn test_shutdown_stops_serving() {
    let mut srv = start(ServerConfig::default());
    request(srv.addr, b"GET / HTTP/1.1\r\n\r\n");
    srv.shutdown.store(true, Ordering::Release);
    let handle = srv.handle.take().unwrap();
    handle.join().unwrap();
    assert!(TcpStream::connect(srv.addr).is_err());
}
