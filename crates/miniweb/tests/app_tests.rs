use miniweb::{AppState, Config, handlers};
use miniweb_core::Server;
use std::io::{Read, Write};
use std::net::{SocketAddrV4, TcpStream};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

struct App {
    addr: SocketAddrV4,
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Drop for App {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn start() -> App {
    let root = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    let config = Config {
        port: 0,
        threads: 2,
        static_dir: root.join("static"),
        templates_dir: root.join("templates"),
        ..Config::default()
    };
    let server = Server::bind(config.server_config()).unwrap();
    let addr = server.local_addr();
    let shutdown = server.shutdown_handle();
    let state = AppState::new(config, server.metrics());
    let handle = thread::spawn(move || {
        server.serve(handlers::router(), state).unwrap();
    });
    App {
        addr,
        shutdown,
        handle: Some(handle),
    }
}

fn get(addr: SocketAddrV4, target: &str) -> (u16, String) {
    let mut stream = TcpStream::connect(addr).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(15))).unwrap();
    write!(stream, "GET {target} HTTP/1.1\r\nHost: localhost\r\n\r\n").unwrap();
    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).unwrap();
    let res = String::from_utf8_lossy(&raw).into_owned();
    let status = res[9..12].parse().unwrap();
    let body = res
        .split_once("\r\n\r\n")
        .map(|(_, b)| b.to_string())
        .unwrap_or_default();
    (status, body)
}

#[test]
fn test_index_renders_template() {
    let app = start();
    let (status, body) = get(app.addr, "/");
    assert_eq!(status, 200);
    assert!(body.contains("/static/css/site.css"));
    assert!(body.contains(miniweb::VERSION));
    assert!(body.contains("127.0.0.1"));
    assert!(!body.contains("{{"));
}

#[test]
fn test_static_assets() {
    let app = start();
    let (status, body) = get(app.addr, "/static/css/site.css");
    assert_eq!(status, 200);
    assert!(body.contains("font-family"));

    assert_eq!(get(app.addr, "/static/../Cargo.toml").0, 403);
    assert_eq!(get(app.addr, "/static/css/nope.css").0, 404);
}

#[test]
fn test_json_endpoints() {
    let app = start();
    for target in ["/api/system", "/api/network", "/api/network/history?n=5"] {
        let (status, body) = get(app.addr, target);
        assert_eq!(status, 200, "{target}");
        serde_json::from_str::<serde_json::Value>(&body).unwrap();
    }
}

#[test]
fn test_server_counters_advance() {
    let app = start();
    get(app.addr, "/");
    let (status, body) = get(app.addr, "/api/server");
    assert_eq!(status, 200);
    let v: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert!(v["requests"].as_u64().unwrap() >= 1);
    assert_eq!(v["threads"], 2);
    assert_eq!(v["version"], miniweb::VERSION);
}

#[test]
fn test_input_validation() {
    let app = start();
    assert_eq!(get(app.addr, "/man/1/-Thtml").0, 400);
    assert_eq!(get(app.addr, "/man/1/ls?format=dvi").0, 400);
    assert_eq!(get(app.addr, "/api/apropos").0, 400);
    assert_eq!(get(app.addr, "/api/network/history?n=-1").0, 400);
    assert_eq!(get(app.addr, "/no/such/route").0, 404);
}
