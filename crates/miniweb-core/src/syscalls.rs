// src/syscalls.rs
use libc::{c_int, c_void, socklen_t};
use std::io;
use std::mem;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::time::{SystemTime, UNIX_EPOCH};

/// Minimum listen backlog; the OS may clamp larger values.
pub const LISTEN_BACKLOG: c_int = 128;

// ---- Socket Operations ----

/// Create the non-blocking, close-on-exec IPv4 listening socket with SO_REUSEADDR.
pub fn create_listen_socket(addr: SocketAddrV4, backlog: c_int) -> io::Result<OwnedFd> {
    let fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_STREAM, 0) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    // Owned from here on, so every early return closes it.
    let sock = unsafe { OwnedFd::from_raw_fd(fd) };

    set_cloexec(fd)?;
    set_nonblocking(fd)?;

    let one: c_int = 1;
    if unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_REUSEADDR,
            &one as *const _ as *const c_void,
            mem::size_of_val(&one) as socklen_t,
        )
    } < 0
    {
        return Err(io::Error::last_os_error());
    }

    #[cfg(target_os = "macos")]
    unsafe {
        // No MSG_NOSIGNAL on macOS.
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_NOSIGPIPE,
            &one as *const _ as *const c_void,
            mem::size_of_val(&one) as socklen_t,
        );
    }

    let sin = sockaddr_from(addr);
    if unsafe {
        libc::bind(
            fd,
            &sin as *const _ as *const libc::sockaddr,
            mem::size_of_val(&sin) as socklen_t,
        )
    } < 0
    {
        return Err(io::Error::last_os_error());
    }

    if unsafe { libc::listen(fd, backlog.max(LISTEN_BACKLOG)) } < 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(sock)
}

fn sockaddr_from(addr: SocketAddrV4) -> libc::sockaddr_in {
    let mut sin: libc::sockaddr_in = unsafe { mem::zeroed() };
    #[cfg(any(target_os = "macos", target_os = "freebsd", target_os = "openbsd"))]
    {
        sin.sin_len = mem::size_of::<libc::sockaddr_in>() as u8;
    }
    sin.sin_family = libc::AF_INET as libc::sa_family_t;
    sin.sin_port = addr.port().to_be();
    sin.sin_addr = libc::in_addr {
        s_addr: u32::from_ne_bytes(addr.ip().octets()),
    };
    sin
}

fn sockaddr_to(sin: &libc::sockaddr_in) -> SocketAddrV4 {
    SocketAddrV4::new(
        Ipv4Addr::from(sin.sin_addr.s_addr.to_ne_bytes()),
        u16::from_be(sin.sin_port),
    )
}

/// Local address of a bound socket (used when binding to port 0).
pub fn local_addr(fd: RawFd) -> io::Result<SocketAddrV4> {
    let mut sin: libc::sockaddr_in = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<libc::sockaddr_in>() as socklen_t;
    if unsafe { libc::getsockname(fd, &mut sin as *mut _ as *mut libc::sockaddr, &mut len) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(sockaddr_to(&sin))
}

/// Accept one pending connection.
///
/// Returns `Ok(None)` on EAGAIN/EWOULDBLOCK and EINTR; the accepted socket is
/// non-blocking and close-on-exec.
pub fn accept_connection(listen_fd: RawFd) -> io::Result<Option<(OwnedFd, SocketAddrV4)>> {
    let mut sin: libc::sockaddr_in = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<libc::sockaddr_in>() as socklen_t;

    #[cfg(target_os = "linux")]
    let fd = unsafe {
        libc::accept4(
            listen_fd,
            &mut sin as *mut _ as *mut libc::sockaddr,
            &mut len,
            libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
        )
    };
    #[cfg(not(target_os = "linux"))]
    let fd = unsafe { libc::accept(listen_fd, &mut sin as *mut _ as *mut libc::sockaddr, &mut len) };

    if fd < 0 {
        let err = io::Error::last_os_error();
        return match err.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted => Ok(None),
            _ => Err(err),
        };
    }
    let sock = unsafe { OwnedFd::from_raw_fd(fd) };

    #[cfg(not(target_os = "linux"))]
    {
        set_nonblocking(fd)?;
        set_cloexec(fd)?;
        #[cfg(target_os = "macos")]
        unsafe {
            let one: c_int = 1;
            libc::setsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_NOSIGPIPE,
                &one as *const _ as *const c_void,
                mem::size_of_val(&one) as socklen_t,
            );
        }
    }

    Ok(Some((sock, sockaddr_to(&sin))))
}

pub fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL, 0);
        if flags < 0 || libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

pub fn set_cloexec(fd: RawFd) -> io::Result<()> {
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFD, 0);
        if flags < 0 || libc::fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC) < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

/// Single non-blocking `recv`. WouldBlock is returned as an error for the caller to classify.
pub fn recv_nonblocking(fd: RawFd, buf: &mut [u8]) -> io::Result<usize> {
    let res = unsafe { libc::recv(fd, buf.as_mut_ptr() as *mut c_void, buf.len(), 0) };
    if res < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(res as usize)
    }
}

/// Single non-blocking `send`. Peer resets surface as EPIPE, never as SIGPIPE.
pub fn send_nonblocking(fd: RawFd, buf: &[u8]) -> io::Result<usize> {
    #[cfg(target_os = "linux")]
    let flags = libc::MSG_NOSIGNAL;
    #[cfg(not(target_os = "linux"))]
    let flags = 0;

    let res = unsafe { libc::send(fd, buf.as_ptr() as *const c_void, buf.len(), flags) };
    if res < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(res as usize)
    }
}

fn poll_one(fd: RawFd, events: libc::c_short, timeout_ms: c_int) -> io::Result<libc::c_short> {
    let mut pfd = libc::pollfd {
        fd,
        events,
        revents: 0,
    };
    let res = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
    if res < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(if res == 0 { 0 } else { pfd.revents })
}

/// Wait up to `timeout_ms` for `fd` to accept more bytes. `Ok(false)` means the wait timed out.
pub fn wait_writable(fd: RawFd, timeout_ms: c_int) -> io::Result<bool> {
    match poll_one(fd, libc::POLLOUT, timeout_ms) {
        Ok(revents) => Ok(revents != 0),
        Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(false),
        Err(e) => Err(e),
    }
}

/// Wait up to `timeout_ms` for `fd` to have data or hang up. `Ok(false)` means the wait timed out.
pub fn wait_readable(fd: RawFd, timeout_ms: c_int) -> io::Result<bool> {
    match poll_one(fd, libc::POLLIN, timeout_ms) {
        Ok(revents) => Ok(revents != 0),
        Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(false),
        Err(e) => Err(e),
    }
}

/// Closed-peer writes must surface as EPIPE instead of killing the process.
pub fn ignore_sigpipe() {
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_IGN);
    }
}

/// Descriptor table size for this process (soft RLIMIT_NOFILE), clamped to a sane range.
pub fn descriptor_limit() -> usize {
    let mut rl: libc::rlimit = unsafe { mem::zeroed() };
    let soft = if unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, &mut rl) } == 0 {
        rl.rlim_cur as u64
    } else {
        1024
    };
    soft.clamp(64, 1 << 20) as usize
}

/// Wall-clock seconds since the epoch.
pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

// ---- Readiness queue ----

/// One readiness notification, platform-neutral.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Event {
    pub token: u64,
    pub readable: bool,
    pub writable: bool,
    pub hangup: bool,
    pub error: bool,
}

/// Max events drained per `wait` call.
pub const MAX_BATCH: usize = 64;

#[cfg(target_os = "linux")]
pub use linux_epoll::Poller;

#[cfg(target_os = "linux")]
mod linux_epoll {
    use super::*;
    use libc::{EPOLLERR, EPOLLHUP, EPOLLIN, EPOLLONESHOT, EPOLLOUT, EPOLLRDHUP, epoll_event};

    /// Shared epoll instance. `epoll_wait` is safe to call from many threads at once.
    pub struct Poller {
        fd: OwnedFd,
    }

    impl Poller {
        pub fn new() -> io::Result<Self> {
            let fd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
            if fd < 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(Self {
                fd: unsafe { OwnedFd::from_raw_fd(fd) },
            })
        }

        fn ctl(&self, op: c_int, fd: RawFd, token: u64, interests: c_int) -> io::Result<()> {
            let mut event = epoll_event {
                events: interests as u32,
                u64: token,
            };
            if unsafe { libc::epoll_ctl(self.fd.as_raw_fd(), op, fd, &mut event) } < 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        }

        /// Level-triggered read interest (listening sockets).
        pub fn add(&self, fd: RawFd, token: u64) -> io::Result<()> {
            self.ctl(libc::EPOLL_CTL_ADD, fd, token, EPOLLIN)
        }

        /// One-shot read interest: delivered to exactly one waiter, then disarmed until `rearm`.
        pub fn add_oneshot(&self, fd: RawFd, token: u64) -> io::Result<()> {
            self.ctl(
                libc::EPOLL_CTL_ADD,
                fd,
                token,
                EPOLLIN | EPOLLRDHUP | EPOLLONESHOT,
            )
        }

        pub fn rearm(&self, fd: RawFd, token: u64) -> io::Result<()> {
            self.ctl(
                libc::EPOLL_CTL_MOD,
                fd,
                token,
                EPOLLIN | EPOLLRDHUP | EPOLLONESHOT,
            )
        }

        /// Wait for events. EINTR is reported as zero events.
        pub fn wait(&self, events: &mut [Event], timeout_ms: c_int) -> io::Result<usize> {
            let mut raw = [epoll_event { events: 0, u64: 0 }; MAX_BATCH];
            let cap = events.len().min(MAX_BATCH);
            let res = unsafe {
                libc::epoll_wait(self.fd.as_raw_fd(), raw.as_mut_ptr(), cap as c_int, timeout_ms)
            };
            if res < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    return Ok(0);
                }
                return Err(err);
            }

            let n = res as usize;
            for (out, ev) in events.iter_mut().zip(raw.iter()).take(n) {
                let bits = ev.events as c_int;
                *out = Event {
                    token: ev.u64,
                    readable: bits & EPOLLIN != 0,
                    writable: bits & EPOLLOUT != 0,
                    hangup: bits & (EPOLLHUP | EPOLLRDHUP) != 0,
                    error: bits & EPOLLERR != 0,
                };
            }
            Ok(n)
        }
    }
}

#[cfg(any(target_os = "macos", target_os = "freebsd", target_os = "openbsd"))]
pub use bsd_kqueue::Poller;

#[cfg(any(target_os = "macos", target_os = "freebsd", target_os = "openbsd"))]
mod bsd_kqueue {
    use super::*;
    use libc::{EV_ADD, EV_ENABLE, EV_EOF, EV_ERROR, EV_ONESHOT, EVFILT_READ, kevent};
    use std::ptr;

    /// Shared kqueue. Multiple threads may block in `kevent` on it concurrently.
    pub struct Poller {
        fd: OwnedFd,
    }

    impl Poller {
        pub fn new() -> io::Result<Self> {
            let fd = unsafe { libc::kqueue() };
            if fd < 0 {
                return Err(io::Error::last_os_error());
            }
            set_cloexec(fd)?;
            Ok(Self {
                fd: unsafe { OwnedFd::from_raw_fd(fd) },
            })
        }

        fn change(&self, fd: RawFd, token: u64, flags: u16) -> io::Result<()> {
            let mut ev: kevent = unsafe { mem::zeroed() };
            ev.ident = fd as usize;
            ev.filter = EVFILT_READ;
            ev.flags = flags;
            ev.udata = token as usize as *mut c_void;
            let res =
                unsafe { libc::kevent(self.fd.as_raw_fd(), &ev, 1, ptr::null_mut(), 0, ptr::null()) };
            if res < 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        }

        pub fn add(&self, fd: RawFd, token: u64) -> io::Result<()> {
            self.change(fd, token, EV_ADD | EV_ENABLE)
        }

        pub fn add_oneshot(&self, fd: RawFd, token: u64) -> io::Result<()> {
            self.change(fd, token, EV_ADD | EV_ENABLE | EV_ONESHOT)
        }

        pub fn rearm(&self, fd: RawFd, token: u64) -> io::Result<()> {
            self.change(fd, token, EV_ADD | EV_ENABLE | EV_ONESHOT)
        }

        pub fn wait(&self, events: &mut [Event], timeout_ms: c_int) -> io::Result<usize> {
            let mut raw: [kevent; MAX_BATCH] = unsafe { mem::zeroed() };
            let cap = events.len().min(MAX_BATCH);
            let ts = libc::timespec {
                tv_sec: (timeout_ms / 1000) as libc::time_t,
                tv_nsec: ((timeout_ms % 1000) * 1_000_000) as libc::c_long,
            };
            let res = unsafe {
                libc::kevent(
                    self.fd.as_raw_fd(),
                    ptr::null(),
                    0,
                    raw.as_mut_ptr(),
                    cap as c_int,
                    &ts,
                )
            };
            if res < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    return Ok(0);
                }
                return Err(err);
            }

            let n = res as usize;
            for (out, ev) in events.iter_mut().zip(raw.iter()).take(n) {
                *out = Event {
                    token: ev.udata as usize as u64,
                    readable: ev.filter == EVFILT_READ,
                    writable: false,
                    hangup: ev.flags & EV_EOF != 0,
                    error: ev.flags & EV_ERROR != 0,
                };
            }
            Ok(n)
        }
    }
}
