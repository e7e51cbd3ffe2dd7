// src/error.rs
use crate::parser::ParseError;
use std::io;
use thiserror::Error;

/// Central error type for the miniweb engine.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Underlying I/O error from the OS or network.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The listening socket could not be set up.
    #[error("cannot listen on {addr}: {source}")]
    Bind {
        addr: std::net::SocketAddrV4,
        #[source]
        source: io::Error,
    },

    /// epoll/kqueue creation or registration failed.
    #[error("readiness queue: {0}")]
    Poller(#[source] io::Error),

    /// Error during HTTP request parsing.
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// A worker thread could not be started.
    #[error("cannot spawn {name}: {source}")]
    Spawn {
        name: String,
        #[source]
        source: io::Error,
    },

    /// A worker thread panicked outside of handler code.
    #[error("worker panic: {0}")]
    WorkerPanic(String),
}

pub type ServerResult<T> = Result<T, ServerError>;

/// Failure reported by a route handler. The worker turns it into an error page.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl HandlerError {
    pub fn status(&self) -> u16 {
        match self {
            HandlerError::BadRequest(_) => 400,
            HandlerError::Forbidden(_) => 403,
            HandlerError::NotFound(_) => 404,
            HandlerError::Internal(_) | HandlerError::Io(_) => 500,
        }
    }

    /// Detail safe to show to the client. Internal failures stay opaque.
    pub fn public_detail(&self) -> Option<&str> {
        match self {
            HandlerError::BadRequest(m) | HandlerError::Forbidden(m) | HandlerError::NotFound(m) => {
                Some(m)
            }
            HandlerError::Internal(_) | HandlerError::Io(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handler_error_status_mapping() {
        assert_eq!(HandlerError::BadRequest("x".into()).status(), 400);
        assert_eq!(HandlerError::Forbidden("x".into()).status(), 403);
        assert_eq!(HandlerError::NotFound("x".into()).status(), 404);
        assert_eq!(HandlerError::Internal("x".into()).status(), 500);
        let io = HandlerError::from(io::Error::other("boom"));
        assert_eq!(io.status(), 500);
        assert!(io.public_detail().is_none());
    }

    #[test]
    fn test_parse_error_converts() {
        let err: ServerError = ParseError::Malformed.into();
        assert!(err.to_string().starts_with("parse error"));
    }
}
