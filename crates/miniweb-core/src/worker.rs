// src/worker.rs
use crate::conn::{ConnHandle, Connection, HeadState};
use crate::http::{Method, Request, Response};
use crate::metrics::ServerMetrics;
use crate::parser;
use crate::pool::ConnectionPool;
use crate::router::{Context, Router};
use crate::server::ServerConfig;
use crate::syscalls::{self, Event, MAX_BATCH, Poller};
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Token of the listening socket. Never a valid `ConnHandle` (fd would be -1).
pub const LISTENER_TOKEN: u64 = u64::MAX;

/// Readiness wait per loop iteration.
const WAIT_MS: i32 = 1000;

/// State shared by the accept thread and every worker.
pub(crate) struct Shared<S> {
    pub pool: Arc<ConnectionPool>,
    pub poller: Poller,
    pub metrics: Arc<ServerMetrics>,
    pub router: Router<S>,
    pub state: S,
    pub config: ServerConfig,
    pub shutdown: Arc<AtomicBool>,
}

/// What a single readiness event led to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outcome {
    /// Listener token; not ours.
    Ignored,
    /// Handle no longer matches its slot, or another worker holds it.
    Stale,
    /// Peer closed or errored before a full head arrived.
    Closed,
    /// Partial head, waiting for more bytes.
    Rearmed,
    Responded { status: u16, bytes: usize },
}

pub(crate) fn run<S: Send + Sync + 'static>(id: usize, shared: Arc<Shared<S>>) {
    let mut events = [Event::default(); MAX_BATCH];
    let mut last_sweep = 0;
    tracing::debug!(worker = id, "worker started");

    while !shared.shutdown.load(Ordering::Acquire) {
        if id == 0 {
            let now = syscalls::now_secs();
            if now != last_sweep {
                last_sweep = now;
                let reaped = shared.pool.sweep(now, shared.config.conn_timeout);
                if reaped > 0 {
                    shared.metrics.add_reaped(reaped);
                    tracing::debug!(reaped, "closed idle connections");
                }
            }
        }

        let n = match shared.poller.wait(&mut events, WAIT_MS) {
            Ok(n) => n,
            Err(e) => {
                tracing::error!(worker = id, error = %e, "readiness wait failed");
                std::thread::sleep(Duration::from_millis(10));
                continue;
            }
        };

        for event in &events[..n] {
            process_event(&shared, event);
        }
    }
    tracing::debug!(worker = id, "worker stopped");
}

/// Service one readiness event end to end.
pub(crate) fn process_event<S>(shared: &Shared<S>, event: &Event) -> Outcome {
    if event.token == LISTENER_TOKEN {
        return Outcome::Ignored;
    }
    let handle = ConnHandle::from_token(event.token);
    let Some(mut conn) = shared.pool.checkout(handle) else {
        shared.metrics.inc_stale();
        tracing::trace!(fd = handle.fd, generation = handle.generation, "dropped stale event");
        return Outcome::Stale;
    };

    if event.error || (event.hangup && !event.readable) {
        tracing::debug!(fd = handle.fd, "peer hung up");
        shared.pool.release(conn);
        return Outcome::Closed;
    }

    loop {
        let n = match syscalls::recv_nonblocking(conn.fd(), conn.spare()) {
            Ok(0) => {
                tracing::debug!(fd = handle.fd, "peer closed before sending a full head");
                shared.pool.release(conn);
                return Outcome::Closed;
            }
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return park(shared, conn),
            Err(e) => {
                tracing::debug!(fd = handle.fd, error = %e, "recv failed");
                shared.pool.release(conn);
                return Outcome::Closed;
            }
        };

        match conn.advance(n) {
            HeadState::Partial => continue,
            HeadState::Complete(head_len) => {
                let outcome = serve(shared, &conn, head_len);
                shared.pool.release(conn);
                return outcome;
            }
            HeadState::Overflow => {
                let res = Response::bad_request("Request head too large");
                let outcome = respond(shared, &conn, &res, "-", "-");
                shared.pool.release(conn);
                return outcome;
            }
        }
    }
}

/// Return a partially read connection to the pool with its registration re-armed.
fn park<S>(shared: &Shared<S>, conn: Box<Connection>) -> Outcome {
    let fd = conn.fd();
    match shared.pool.checkin_and_rearm(conn, &shared.poller) {
        Ok(true) => Outcome::Rearmed,
        Ok(false) => Outcome::Closed,
        Err(e) => {
            tracing::warn!(fd, error = %e, "cannot re-arm connection");
            Outcome::Closed
        }
    }
}

fn serve<S>(shared: &Shared<S>, conn: &Connection, head_len: usize) -> Outcome {
    let mut req = match parser::parse_head(&conn.data()[..head_len], conn.peer) {
        Ok(req) => req,
        Err(e) => {
            tracing::debug!(peer = %conn.peer, error = %e, "rejected request head");
            let res = Response::bad_request(&e.to_string());
            return respond(shared, conn, &res, "-", "-");
        }
    };
    req.resolve_client(shared.config.trusted_proxy);

    let mut res = dispatch(&shared.router, &shared.state, &req);
    if req.method == Method::Head {
        res.omit_body = true;
    }
    let method = req.method_raw;
    let path = req.path;
    let outcome = respond(shared, conn, &res, method, path);
    if let Outcome::Responded { status, bytes } = outcome {
        tracing::info!(client = %req.client, method, path, status, bytes, "request");
    }
    outcome
}

/// Route lookup plus handler execution. Handler errors and panics become error pages.
pub(crate) fn dispatch<S>(router: &Router<S>, state: &S, req: &Request<'_>) -> Response {
    let Some((handler, params)) = router.find(req.method, req.path) else {
        return Response::not_found(req.path);
    };
    let ctx = Context { req, params, state };

    match panic::catch_unwind(AssertUnwindSafe(|| handler(&ctx))) {
        Ok(Ok(res)) => res,
        Ok(Err(e)) => {
            if e.status() >= 500 {
                tracing::error!(path = req.path, error = %e, "handler failed");
            } else {
                tracing::debug!(path = req.path, error = %e, "handler refused request");
            }
            Response::error_page(e.status(), e.public_detail())
        }
        Err(_) => {
            tracing::error!(path = req.path, "handler panicked");
            Response::internal_error()
        }
    }
}

fn respond<S>(shared: &Shared<S>, conn: &Connection, res: &Response, method: &str, path: &str) -> Outcome {
    match crate::writer::send_response(conn.fd(), res) {
        Ok(bytes) => {
            shared.metrics.inc_req();
            shared.metrics.add_bytes(bytes);
            Outcome::Responded {
                status: res.status,
                bytes,
            }
        }
        Err(e) => {
            tracing::debug!(peer = %conn.peer, method, path, error = %e, "response not delivered");
            Outcome::Closed
        }
    }
}
