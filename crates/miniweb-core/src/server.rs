// src/server.rs
use crate::conn::REQ_BUF;
use crate::error::{ServerError, ServerResult};
use crate::http::Response;
use crate::metrics::{MetricsHandle, ServerMetrics};
use crate::pool::{ConnectionPool, Rejected};
use crate::router::Router;
use crate::syscalls::{self, Event, LISTEN_BACKLOG, Poller};
use crate::worker::{self, LISTENER_TOKEN, Shared};
use crate::writer;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::os::fd::{AsRawFd, OwnedFd};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Accept-loop wait per iteration.
const ACCEPT_WAIT_MS: i32 = 1000;

/// Engine settings. The binary fills these from its config file and CLI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub bind: Ipv4Addr,
    /// 0 picks an ephemeral port.
    pub port: u16,
    pub threads: usize,
    pub max_conns: usize,
    /// Idle timeout in seconds, measured from accept.
    pub conn_timeout: u64,
    /// Request-head buffer size in bytes.
    pub max_req_size: usize,
    pub trusted_proxy: Option<Ipv4Addr>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: Ipv4Addr::LOCALHOST,
            port: 8080,
            threads: 4,
            max_conns: 1024,
            conn_timeout: 30,
            max_req_size: REQ_BUF,
            trusted_proxy: None,
        }
    }
}

/// A bound, not yet serving, HTTP server.
pub struct Server {
    config: ServerConfig,
    listener: OwnedFd,
    local_addr: SocketAddrV4,
    accept_poller: Poller,
    conn_poller: Poller,
    pool: Arc<ConnectionPool>,
    metrics: Arc<ServerMetrics>,
    shutdown: Arc<AtomicBool>,
}

impl Server {
    /// Open the listening socket and both readiness queues.
    pub fn bind(config: ServerConfig) -> ServerResult<Self> {
        let addr = SocketAddrV4::new(config.bind, config.port);
        let listener = syscalls::create_listen_socket(addr, LISTEN_BACKLOG)
            .map_err(|source| ServerError::Bind { addr, source })?;
        let local_addr = syscalls::local_addr(listener.as_raw_fd())?;

        let accept_poller = Poller::new().map_err(ServerError::Poller)?;
        accept_poller
            .add(listener.as_raw_fd(), LISTENER_TOKEN)
            .map_err(ServerError::Poller)?;
        let conn_poller = Poller::new().map_err(ServerError::Poller)?;

        let pool = Arc::new(ConnectionPool::new(config.max_conns, config.max_req_size));
        tracing::debug!(
            table_size = pool.table_size(),
            max_conns = config.max_conns,
            "connection table ready"
        );

        Ok(Self {
            config,
            listener,
            local_addr,
            accept_poller,
            conn_poller,
            pool,
            metrics: Arc::new(ServerMetrics::new()),
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn local_addr(&self) -> SocketAddrV4 {
        self.local_addr
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Flag that stops the server once set. Safe to store from a signal handler thread.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    /// Live view of the server counters, usable from handlers.
    pub fn metrics(&self) -> MetricsHandle {
        MetricsHandle::new(self.metrics.clone(), self.pool.clone())
    }

    /// Run the accept loop and the worker pool until the shutdown flag is set.
    pub fn serve<S: Send + Sync + 'static>(self, router: Router<S>, state: S) -> ServerResult<()> {
        let Server {
            config,
            listener,
            local_addr,
            accept_poller,
            conn_poller,
            pool,
            metrics,
            shutdown,
        } = self;

        let threads = config.threads.max(1);
        let shared = Arc::new(Shared {
            pool,
            poller: conn_poller,
            metrics,
            router,
            state,
            config,
            shutdown: shutdown.clone(),
        });

        let mut workers: Vec<JoinHandle<()>> = Vec::with_capacity(threads);
        for id in 0..threads {
            let worker_shared = shared.clone();
            let spawned = thread::Builder::new()
                .name(format!("miniweb-worker-{id}"))
                .spawn(move || worker::run(id, worker_shared));
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(source) => {
                    shutdown.store(true, Ordering::Release);
                    let _ = join_workers(workers);
                    shared.pool.close_all();
                    return Err(ServerError::Spawn {
                        name: format!("miniweb-worker-{id}"),
                        source,
                    });
                }
            }
        }
        tracing::info!(addr = %local_addr, workers = threads, "listening");

        let unavailable = preformatted_unavailable();
        let mut events = [Event::default(); 8];
        while !shutdown.load(Ordering::Acquire) {
            match accept_poller.wait(&mut events, ACCEPT_WAIT_MS) {
                Ok(0) => {}
                Ok(_) => accept_ready(&shared, listener.as_raw_fd(), &unavailable),
                Err(e) => {
                    tracing::error!(error = %e, "listener wait failed");
                    thread::sleep(Duration::from_millis(100));
                }
            }
        }

        tracing::info!("shutting down");
        let panicked = join_workers(workers);
        let closed = shared.pool.close_all();
        let snap = shared.metrics.snapshot(0);
        tracing::info!(
            requests = snap.requests,
            bytes_sent = snap.bytes_sent,
            rejected = snap.rejected,
            stale_events = snap.stale_events,
            idle_reaped = snap.idle_reaped,
            closed,
            "server stopped"
        );
        drop(listener);
        match panicked {
            Some(name) => Err(ServerError::WorkerPanic(name)),
            None => Ok(()),
        }
    }
}

/// Join every worker. Returns the name of the first one that panicked.
fn join_workers(workers: Vec<JoinHandle<()>>) -> Option<String> {
    let mut panicked = None;
    for handle in workers {
        let name = handle.thread().name().unwrap_or("worker").to_string();
        if handle.join().is_err() {
            tracing::error!(worker = %name, "worker thread panicked");
            panicked.get_or_insert(name);
        }
    }
    panicked
}

/// The 503 sent to connections refused at accept time, serialized once.
fn preformatted_unavailable() -> Vec<u8> {
    let res = Response::unavailable();
    let mut bytes = writer::serialize_head(&res);
    bytes.extend_from_slice(&res.body);
    bytes
}

/// Drain the accept backlog, admitting each socket into the pool.
fn accept_ready<S>(shared: &Shared<S>, listen_fd: i32, unavailable: &[u8]) {
    loop {
        match syscalls::accept_connection(listen_fd) {
            Ok(Some((sock, peer))) => admit(shared, sock, peer, unavailable),
            Ok(None) => return,
            Err(e) => {
                tracing::error!(error = %e, "accept failed");
                // Descriptor exhaustion keeps the listener readable; back off.
                thread::sleep(Duration::from_millis(10));
                return;
            }
        }
    }
}

fn admit<S>(shared: &Shared<S>, sock: OwnedFd, peer: SocketAddrV4, unavailable: &[u8]) {
    match shared.pool.alloc(sock, peer) {
        Ok(handle) => {
            if let Err(e) = shared.poller.add_oneshot(handle.fd, handle.token()) {
                tracing::warn!(%peer, error = %e, "cannot register connection");
                shared.pool.free_handle(handle);
            }
        }
        Err(Rejected { reason, sock }) => {
            shared.metrics.inc_rejected();
            tracing::warn!(%peer, %reason, "refusing connection");
            if let Err(e) = writer::write_all(sock.as_raw_fd(), unavailable) {
                tracing::debug!(%peer, error = %e, "503 not delivered");
            }
        }
    }
}
