// src/handlers/system.rs
use super::json;
use crate::state::AppState;
use miniweb_core::{Context, HandlerResult};
use serde::Serialize;
use std::ffi::CStr;
#[cfg(not(target_os = "linux"))]
use std::time::Duration;

#[derive(Debug, Serialize)]
pub struct SystemInfo {
    pub hostname: String,
    pub os: String,
    pub release: String,
    pub machine: String,
    pub uptime_secs: Option<u64>,
    pub load_average: Option<[f64; 3]>,
    pub memory: Memory,
}

#[derive(Debug, Default, PartialEq, Eq, Serialize)]
pub struct Memory {
    pub total_bytes: Option<u64>,
    pub available_bytes: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct ServerStats {
    pub version: &'static str,
    pub uptime_secs: u64,
    pub threads: usize,
    pub max_connections: usize,
    pub active_connections: usize,
    pub requests: usize,
    pub bytes_sent: usize,
    pub rejected: usize,
    pub stale_events: usize,
    pub idle_reaped: usize,
}

pub fn hostname() -> String {
    let mut buf = [0u8; 256];
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr().cast(), buf.len()) };
    if rc != 0 {
        return "localhost".to_string();
    }
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).into_owned()
}

/// (sysname, release, machine)
fn uname() -> Option<(String, String, String)> {
    let mut uts: libc::utsname = unsafe { std::mem::zeroed() };
    if unsafe { libc::uname(&mut uts) } != 0 {
        return None;
    }
    let field = |f: &[libc::c_char]| unsafe { CStr::from_ptr(f.as_ptr()) }.to_string_lossy().into_owned();
    Some((field(&uts.sysname), field(&uts.release), field(&uts.machine)))
}

pub fn load_average() -> Option<[f64; 3]> {
    let mut loads = [0f64; 3];
    let n = unsafe { libc::getloadavg(loads.as_mut_ptr(), 3) };
    (n == 3).then_some(loads)
}

/// First field of `/proc/uptime`.
pub fn parse_proc_uptime(text: &str) -> Option<u64> {
    let secs: f64 = text.split_whitespace().next()?.parse().ok()?;
    Some(secs as u64)
}

/// `MemTotal` and `MemAvailable` from `/proc/meminfo`, in bytes.
pub fn parse_meminfo(text: &str) -> Memory {
    let mut mem = Memory::default();
    for line in text.lines() {
        let Some((key, rest)) = line.split_once(':') else {
            continue;
        };
        let kib = rest
            .split_whitespace()
            .next()
            .and_then(|v| v.parse::<u64>().ok());
        match key {
            "MemTotal" => mem.total_bytes = kib.map(|k| k * 1024),
            "MemAvailable" => mem.available_bytes = kib.map(|k| k * 1024),
            _ => {}
        }
    }
    mem
}

/// Boot time from `sysctl -n kern.boottime`: either `{ sec = N, usec = M } ...` or a bare integer.
pub fn parse_boottime(text: &str) -> Option<u64> {
    let text = text.trim();
    if let Some(rest) = text.split("sec = ").nth(1) {
        return rest.split(|c: char| !c.is_ascii_digit()).next()?.parse().ok();
    }
    text.parse().ok()
}

#[cfg(target_os = "linux")]
pub fn host_uptime() -> Option<u64> {
    parse_proc_uptime(&std::fs::read_to_string("/proc/uptime").ok()?)
}

#[cfg(target_os = "linux")]
fn memory() -> Memory {
    std::fs::read_to_string("/proc/meminfo")
        .map(|text| parse_meminfo(&text))
        .unwrap_or_default()
}

#[cfg(not(target_os = "linux"))]
fn sysctl(name: &str) -> Option<String> {
    const SYSCTL: [&str; 2] = ["/sbin/sysctl", "/usr/sbin/sysctl"];
    let exec = SYSCTL.into_iter().find(|p| std::path::Path::new(p).exists())?;
    miniweb_core::capture(exec, &["sysctl", "-n", name], 4096, Duration::from_secs(2))
        .map(|out| out.text().trim().to_string())
}

#[cfg(not(target_os = "linux"))]
pub fn host_uptime() -> Option<u64> {
    let boot = parse_boottime(&sysctl("kern.boottime")?)?;
    Some(miniweb_core::syscalls::now_secs().saturating_sub(boot))
}

#[cfg(not(target_os = "linux"))]
fn memory() -> Memory {
    let key = if cfg!(target_os = "macos") { "hw.memsize" } else { "hw.physmem" };
    Memory {
        total_bytes: sysctl(key).and_then(|v| v.parse().ok()),
        available_bytes: None,
    }
}

/// `GET /api/system`
pub fn system_info(ctx: &Context<'_, AppState>) -> HandlerResult {
    let (os, release, machine) = uname().unwrap_or_default();
    json(&SystemInfo {
        hostname: ctx.state.hostname.clone(),
        os,
        release,
        machine,
        uptime_secs: host_uptime(),
        load_average: load_average(),
        memory: memory(),
    })
}

/// `GET /api/server`
pub fn server_stats(ctx: &Context<'_, AppState>) -> HandlerResult {
    let state = ctx.state;
    let snap = state.metrics.snapshot();
    json(&ServerStats {
        version: crate::VERSION,
        uptime_secs: state.uptime().as_secs(),
        threads: state.config.threads,
        max_connections: state.metrics.max_connections(),
        active_connections: snap.active_connections,
        requests: snap.requests,
        bytes_sent: snap.bytes_sent,
        rejected: snap.rejected,
        stale_events: snap.stale_events,
        idle_reaped: snap.idle_reaped,
    })
}
