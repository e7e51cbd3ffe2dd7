// src/capture.rs
//! Bounded subprocess capture.
//!
//! Runs a program with stdout and stderr joined on one pipe, reads at most
//! `max_bytes` before a wall-clock deadline, and always reaps the child.
//! A handler calling this can block its worker for at most `timeout` plus
//! the time it takes the kernel to deliver SIGKILL.

use crate::syscalls;
use std::borrow::Cow;
use std::fs::File;
use std::io::{self, Read};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::os::unix::process::CommandExt;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};
use thiserror::Error;

const READ_CHUNK: usize = 8192;
/// How long to let a child that closed its output exit on its own before SIGKILL.
const EXIT_GRACE: Duration = Duration::from_millis(50);

/// Output of a finished capture. `len()` is the number of bytes read.
#[derive(Debug, Clone)]
pub struct Captured {
    data: Vec<u8>,
    status: Option<ExitStatus>,
    truncated: bool,
}

impl Captured {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// Output as text, invalid UTF-8 replaced.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.data)
    }

    /// Exit status of the child. Killed children report the signal.
    pub fn status(&self) -> Option<ExitStatus> {
        self.status
    }

    /// True when reading stopped at `max_bytes`.
    pub fn truncated(&self) -> bool {
        self.truncated
    }
}

/// Why a capture produced no usable output.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("output budget is zero")]
    NoBudget,

    #[error("cannot start: {0}")]
    Spawn(#[source] io::Error),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The child ran to completion without printing anything.
    #[error("no output")]
    Empty { status: Option<ExitStatus> },
}

impl CaptureError {
    /// True for an empty run whose child exited with status 0.
    pub fn is_clean_empty(&self) -> bool {
        matches!(self, CaptureError::Empty { status: Some(s) } if s.success())
    }
}

fn pipe() -> io::Result<(OwnedFd, OwnedFd)> {
    let mut fds = [0; 2];
    if unsafe { libc::pipe(fds.as_mut_ptr()) } < 0 {
        return Err(io::Error::last_os_error());
    }
    let (rd, wr) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
    // Other threads may spawn concurrently; neither end may leak into their children.
    syscalls::set_cloexec(rd.as_raw_fd())?;
    syscalls::set_cloexec(wr.as_raw_fd())?;
    Ok((rd, wr))
}

fn spawn(exec_path: &str, argv: &[&str]) -> io::Result<(Child, File)> {
    let (rd, wr) = pipe()?;
    let wr_err = wr.try_clone()?;

    let mut cmd = Command::new(exec_path);
    if let Some((arg0, rest)) = argv.split_first() {
        cmd.arg0(arg0).args(rest);
    }
    // Own process group, so a timeout kills grandchildren too.
    cmd.process_group(0)
        .stdin(Stdio::null())
        .stdout(Stdio::from(wr))
        .stderr(Stdio::from(wr_err));
    let child = cmd.spawn()?;
    // The parent's copies of the write end must be gone or EOF never arrives.
    drop(cmd);
    Ok((child, File::from(rd)))
}

enum ReadEnd {
    Eof,
    Limit,
    Timeout,
    Error,
}

fn read_bounded(out: &mut File, data: &mut Vec<u8>, max_bytes: usize, deadline: Instant) -> ReadEnd {
    let mut chunk = [0u8; READ_CHUNK];
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return ReadEnd::Timeout;
        }
        let wait_ms = remaining.as_millis().clamp(1, i32::MAX as u128) as i32;
        match syscalls::wait_readable(out.as_raw_fd(), wait_ms) {
            Ok(true) => {}
            Ok(false) => continue,
            Err(_) => return ReadEnd::Error,
        }

        let want = (max_bytes - data.len()).min(READ_CHUNK);
        match out.read(&mut chunk[..want]) {
            Ok(0) => return ReadEnd::Eof,
            Ok(n) => {
                data.extend_from_slice(&chunk[..n]);
                if data.len() >= max_bytes {
                    return ReadEnd::Limit;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(_) => return ReadEnd::Error,
        }
    }
}

/// Reap `child` exactly once. After EOF it gets a short grace period; otherwise it is killed.
fn reap(child: &mut Child, clean_eof: bool) -> Option<ExitStatus> {
    if clean_eof {
        let grace = Instant::now() + EXIT_GRACE;
        while Instant::now() < grace {
            match child.try_wait() {
                Ok(Some(status)) => return Some(status),
                Ok(None) => std::thread::sleep(Duration::from_millis(1)),
                Err(_) => break,
            }
        }
    }
    // Kill fails harmlessly if the child already exited; wait reaps either way.
    unsafe {
        libc::kill(-(child.id() as libc::pid_t), libc::SIGKILL);
    }
    let _ = child.kill();
    child.wait().ok()
}

/// Run `exec_path` with `argv` (argv[0] included) and capture its combined output.
///
/// Fails if the process cannot be started, on timeout, or when it printed
/// nothing. The child is reaped on every path.
pub fn run(exec_path: &str, argv: &[&str], max_bytes: usize, timeout: Duration) -> Result<Captured, CaptureError> {
    if max_bytes == 0 {
        return Err(CaptureError::NoBudget);
    }
    let (mut child, mut out) = spawn(exec_path, argv).map_err(|e| {
        tracing::debug!(exec = exec_path, error = %e, "spawn failed");
        CaptureError::Spawn(e)
    })?;

    let mut data = Vec::with_capacity(max_bytes.min(64 * 1024));
    let end = read_bounded(&mut out, &mut data, max_bytes, Instant::now() + timeout);
    drop(out);
    let status = reap(&mut child, matches!(end, ReadEnd::Eof));

    match end {
        ReadEnd::Timeout => {
            tracing::warn!(exec = exec_path, timeout_secs = timeout.as_secs(), "subprocess timed out, killed");
            Err(CaptureError::Timeout(timeout))
        }
        _ if data.is_empty() => Err(CaptureError::Empty { status }),
        end => Ok(Captured {
            data,
            status,
            truncated: matches!(end, ReadEnd::Limit),
        }),
    }
}

/// [`run`] for callers that treat every failure alike.
pub fn capture(exec_path: &str, argv: &[&str], max_bytes: usize, timeout: Duration) -> Option<Captured> {
    run(exec_path, argv, max_bytes, timeout).ok()
}
