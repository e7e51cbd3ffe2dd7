// src/pool.rs
use crate::conn::{ConnHandle, Connection};
use crate::syscalls::{self, Poller};
use std::io;
use std::net::SocketAddrV4;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

/// Descriptors 0..=2 are stdio and never index the table.
pub const FIRST_FD: RawFd = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AllocError {
    #[error("descriptor outside the connection table")]
    OutOfRange,
    #[error("connection limit reached")]
    Full,
    #[error("slot already occupied")]
    Occupied,
}

/// Socket handed back to the caller when `alloc` refuses it.
#[derive(Debug)]
pub struct Rejected {
    pub reason: AllocError,
    pub sock: OwnedFd,
}

#[derive(Debug, Default)]
enum Slot {
    #[default]
    Vacant,
    /// Waiting for readiness; the record lives in the table.
    Parked(Box<Connection>),
    /// Checked out by a worker. The slot is still occupied.
    Busy { created: u64 },
}

impl Slot {
    fn is_occupied(&self) -> bool {
        !matches!(self, Slot::Vacant)
    }
}

struct PoolInner {
    slots: Vec<Slot>,
    generations: Vec<u32>,
    active_count: usize,
    high_water: usize,
}

impl PoolInner {
    /// Clear slot `idx` and bump its generation. Returns the parked record, if any.
    fn vacate(&mut self, idx: usize) -> Option<Box<Connection>> {
        let old = std::mem::take(&mut self.slots[idx]);
        self.generations[idx] = self.generations[idx].wrapping_add(1);
        self.active_count -= 1;
        match old {
            Slot::Parked(conn) => Some(conn),
            _ => None,
        }
    }
}

/// Table of live connections indexed directly by socket descriptor.
///
/// One mutex guards the slots, their generations and `active_count`. It is
/// never held across socket I/O: workers `checkout` a record, read, then
/// `checkin_and_rearm` or `release` it.
pub struct ConnectionPool {
    inner: Mutex<PoolInner>,
    max_active: usize,
    buf_cap: usize,
}

impl ConnectionPool {
    /// Pool sized to the process descriptor limit.
    pub fn new(max_active: usize, buf_cap: usize) -> Self {
        Self::with_table_size(syscalls::descriptor_limit(), max_active, buf_cap)
    }

    pub fn with_table_size(table_size: usize, max_active: usize, buf_cap: usize) -> Self {
        let mut slots = Vec::with_capacity(table_size);
        slots.resize_with(table_size, Slot::default);
        Self {
            inner: Mutex::new(PoolInner {
                slots,
                generations: vec![0; table_size],
                active_count: 0,
                high_water: 0,
            }),
            max_active,
            buf_cap,
        }
    }

    fn lock(&self) -> MutexGuard<'_, PoolInner> {
        // A panicking holder cannot leave the tables half-updated; every mutation is a few stores.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn index(fd: RawFd, table: usize) -> Option<usize> {
        if fd < FIRST_FD || fd as usize >= table {
            None
        } else {
            Some(fd as usize)
        }
    }

    /// Take ownership of an accepted socket and publish it into its slot.
    pub fn alloc(&self, sock: OwnedFd, peer: SocketAddrV4) -> Result<ConnHandle, Rejected> {
        let fd = sock.as_raw_fd();
        let mut inner = self.lock();

        let reason = match Self::index(fd, inner.slots.len()) {
            None => Some(AllocError::OutOfRange),
            Some(_) if inner.active_count >= self.max_active => Some(AllocError::Full),
            Some(idx) if inner.slots[idx].is_occupied() => Some(AllocError::Occupied),
            Some(_) => None,
        };
        if let Some(reason) = reason {
            return Err(Rejected { reason, sock });
        }

        let idx = fd as usize;
        let generation = inner.generations[idx];
        let conn = Connection::new(sock, peer, self.buf_cap, syscalls::now_secs(), generation);
        inner.slots[idx] = Slot::Parked(Box::new(conn));
        inner.active_count += 1;
        inner.high_water = inner.high_water.max(idx + 1);

        Ok(ConnHandle { fd, generation })
    }

    /// Release the slot for `fd`. A parked record is closed here; a checked-out
    /// one is closed by its worker when it is returned.
    pub fn free(&self, fd: RawFd) -> bool {
        let mut inner = self.lock();
        match Self::index(fd, inner.slots.len()) {
            Some(idx) if inner.slots[idx].is_occupied() => {
                drop(inner.vacate(idx));
                true
            }
            _ => false,
        }
    }

    /// Release the slot only while it still belongs to `handle`.
    pub fn free_handle(&self, handle: ConnHandle) -> bool {
        let mut inner = self.lock();
        match Self::index(handle.fd, inner.slots.len()) {
            Some(idx)
                if inner.slots[idx].is_occupied() && inner.generations[idx] == handle.generation =>
            {
                drop(inner.vacate(idx));
                true
            }
            _ => false,
        }
    }

    /// True iff the slot is occupied and its generation matches the handle.
    pub fn validate(&self, handle: ConnHandle) -> bool {
        let inner = self.lock();
        match Self::index(handle.fd, inner.slots.len()) {
            Some(idx) => inner.slots[idx].is_occupied() && inner.generations[idx] == handle.generation,
            None => false,
        }
    }

    /// Validate `handle` and take its record out for servicing.
    ///
    /// Returns `None` for stale handles and for records another worker holds.
    pub fn checkout(&self, handle: ConnHandle) -> Option<Box<Connection>> {
        let mut inner = self.lock();
        let idx = Self::index(handle.fd, inner.slots.len())?;
        if inner.generations[idx] != handle.generation {
            return None;
        }
        let created = match &inner.slots[idx] {
            Slot::Parked(conn) => conn.created,
            _ => return None,
        };
        match std::mem::replace(&mut inner.slots[idx], Slot::Busy { created }) {
            Slot::Parked(conn) => Some(conn),
            _ => None,
        }
    }

    /// Park a checked-out record and re-arm its one-shot registration.
    ///
    /// Both steps happen under the pool lock, so the sweeper cannot reap the
    /// record and hand its descriptor number to a new connection in between.
    /// `Ok(false)` means the slot was freed while the record was out; `Err`
    /// means the re-arm failed and the slot was vacated. In both cases the
    /// socket is closed.
    pub fn checkin_and_rearm(&self, conn: Box<Connection>, poller: &Poller) -> io::Result<bool> {
        let mut inner = self.lock();
        let idx = conn.fd() as usize;
        let owns_slot = matches!(inner.slots[idx], Slot::Busy { .. })
            && inner.generations[idx] == conn.generation;
        if !owns_slot {
            drop(inner);
            drop(conn);
            return Ok(false);
        }
        let handle = conn.handle();
        if let Err(e) = poller.rearm(handle.fd, handle.token()) {
            drop(conn);
            inner.vacate(idx);
            return Err(e);
        }
        inner.slots[idx] = Slot::Parked(conn);
        Ok(true)
    }

    /// Close a checked-out record and free its slot.
    pub fn release(&self, conn: Box<Connection>) {
        let mut inner = self.lock();
        let idx = conn.fd() as usize;
        let owns_slot = matches!(inner.slots[idx], Slot::Busy { .. })
            && inner.generations[idx] == conn.generation;
        // Close before the slot becomes reusable.
        drop(conn);
        if owns_slot {
            inner.vacate(idx);
        }
    }

    /// Close parked connections older than `timeout_secs`. Returns how many were reaped.
    pub fn sweep(&self, now: u64, timeout_secs: u64) -> usize {
        let mut inner = self.lock();
        let mut reaped = 0;
        for idx in FIRST_FD as usize..inner.high_water {
            let expired = match &inner.slots[idx] {
                Slot::Parked(conn) => now.saturating_sub(conn.created) > timeout_secs,
                _ => false,
            };
            if expired {
                drop(inner.vacate(idx));
                reaped += 1;
            }
        }
        reaped
    }

    /// Close every parked connection and vacate all slots (shutdown).
    pub fn close_all(&self) -> usize {
        let mut inner = self.lock();
        let mut closed = 0;
        for idx in FIRST_FD as usize..inner.high_water {
            if inner.slots[idx].is_occupied() {
                drop(inner.vacate(idx));
                closed += 1;
            }
        }
        closed
    }

    pub fn active_count(&self) -> usize {
        self.lock().active_count
    }

    pub fn is_occupied(&self, fd: RawFd) -> bool {
        let inner = self.lock();
        Self::index(fd, inner.slots.len()).is_some_and(|idx| inner.slots[idx].is_occupied())
    }

    pub fn generation(&self, fd: RawFd) -> Option<u32> {
        let inner = self.lock();
        Self::index(fd, inner.slots.len()).map(|idx| inner.generations[idx])
    }

    /// Age of the connection in `fd`'s slot, parked or busy.
    pub fn created(&self, fd: RawFd) -> Option<u64> {
        let inner = self.lock();
        let idx = Self::index(fd, inner.slots.len())?;
        match &inner.slots[idx] {
            Slot::Parked(conn) => Some(conn.created),
            Slot::Busy { created } => Some(*created),
            Slot::Vacant => None,
        }
    }

    pub fn max_active(&self) -> usize {
        self.max_active
    }

    pub fn table_size(&self) -> usize {
        self.lock().slots.len()
    }

    /// Number of occupied slots, counted the slow way.
    #[cfg(test)]
    fn occupied(&self) -> usize {
        self.lock().slots.iter().filter(|s| s.is_occupied()).count()
    }
}
