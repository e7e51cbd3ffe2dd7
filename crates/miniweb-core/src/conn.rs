// src/conn.rs
use std::net::SocketAddrV4;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};

/// Default request-head buffer capacity.
pub const REQ_BUF: usize = 16 * 1024;

/// End-of-head marker.
pub const HEAD_END: &[u8; 4] = b"\r\n\r\n";

/// Slot-generation handle carried in the readiness queue's user data.
///
/// The pair (descriptor, generation) identifies one connection lifetime;
/// a handle whose generation no longer matches its slot is stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnHandle {
    pub fd: RawFd,
    pub generation: u32,
}

impl ConnHandle {
    pub fn token(self) -> u64 {
        ((self.fd as u32 as u64) << 32) | self.generation as u64
    }

    pub fn from_token(token: u64) -> Self {
        Self {
            fd: (token >> 32) as u32 as RawFd,
            generation: token as u32,
        }
    }
}

/// Result of appending freshly received bytes to the head buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeadState {
    /// No `\r\n\r\n` yet, more room left.
    Partial,
    /// Head complete; the value is its length including the marker.
    Complete(usize),
    /// Buffer full without a complete head.
    Overflow,
}

/// One accepted TCP client.
///
/// Owns the socket: dropping the record closes the descriptor.
#[derive(Debug)]
pub struct Connection {
    sock: OwnedFd,
    pub peer: SocketAddrV4,
    buf: Box<[u8]>,
    bytes_read: usize,
    pub created: u64,
    pub generation: u32,
}

impl Connection {
    pub fn new(sock: OwnedFd, peer: SocketAddrV4, buf_cap: usize, created: u64, generation: u32) -> Self {
        // Two bytes minimum: one for data, one for the NUL terminator.
        let cap = buf_cap.max(2);
        Self {
            sock,
            peer,
            buf: vec![0u8; cap].into_boxed_slice(),
            bytes_read: 0,
            created,
            generation,
        }
    }

    pub fn fd(&self) -> RawFd {
        self.sock.as_raw_fd()
    }

    pub fn handle(&self) -> ConnHandle {
        ConnHandle {
            fd: self.fd(),
            generation: self.generation,
        }
    }

    pub fn bytes_read(&self) -> usize {
        self.bytes_read
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Spare room for the next `recv`, always leaving one byte for the NUL terminator.
    pub fn spare(&mut self) -> &mut [u8] {
        let end = self.buf.len() - 1;
        &mut self.buf[self.bytes_read..end]
    }

    /// Record `n` bytes just written into `spare()` and look for the end of the head.
    pub fn advance(&mut self, n: usize) -> HeadState {
        let limit = self.buf.len() - 1;
        // Resume the marker search three bytes back in case it straddles two reads.
        let scan_from = self.bytes_read.saturating_sub(HEAD_END.len() - 1);
        self.bytes_read = (self.bytes_read + n).min(limit);
        self.buf[self.bytes_read] = 0;

        match memchr::memmem::find(&self.buf[scan_from..self.bytes_read], HEAD_END) {
            Some(pos) => HeadState::Complete(scan_from + pos + HEAD_END.len()),
            None if self.bytes_read >= limit => HeadState::Overflow,
            None => HeadState::Partial,
        }
    }

    /// Bytes received so far.
    pub fn data(&self) -> &[u8] {
        &self.buf[..self.bytes_read]
    }

    /// The raw buffer including the NUL terminator at `bytes_read`.
    pub fn raw(&self) -> &[u8] {
        &self.buf
    }
}
