// src/lib.rs
pub mod capture;
pub mod conn;
pub mod error;
pub mod http;
pub mod metrics;
pub mod parser;
pub mod pool;
pub mod router;
pub mod sampler;
pub mod server;
pub mod syscalls;
pub mod worker;
pub mod writer;

// Re-exports for users
pub use capture::{CaptureError, Captured, capture};
pub use error::{HandlerError, ServerError, ServerResult};
pub use http::{Method, Request, Response, escape_html};
pub use metrics::{MetricsHandle, MetricsSnapshot};
pub use router::{Context, Handler, HandlerResult, Router};
pub use sampler::{Sampler, SnapshotRing};
pub use server::{Server, ServerConfig};
