// src/handlers/processes.rs
use super::json;
use crate::state::AppState;
use miniweb_core::{Context, HandlerError, HandlerResult, capture};
use serde::Serialize;
use std::time::Duration;

const PS: &str = "/bin/ps";
#[cfg(target_os = "linux")]
const PS_ARGS: [&str; 3] = ["ps", "-eo", "pid,user,pcpu,pmem,comm"];
#[cfg(not(target_os = "linux"))]
const PS_ARGS: [&str; 3] = ["ps", "-axo", "pid,user,pcpu,pmem,comm"];
const PS_TIMEOUT: Duration = Duration::from_secs(5);
const PS_MAX_BYTES: usize = 4 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Process {
    pub pid: u32,
    pub user: String,
    pub cpu: f32,
    pub mem: f32,
    pub command: String,
}

/// Parse `ps -o pid,user,pcpu,pmem,comm` output. The header and malformed rows are skipped.
pub fn parse_ps(text: &str) -> Vec<Process> {
    text.lines()
        .skip(1)
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let pid = fields.next()?.parse().ok()?;
            let user = fields.next()?.to_string();
            let cpu = fields.next()?.parse().ok()?;
            let mem = fields.next()?.parse().ok()?;
            let command = fields.collect::<Vec<_>>().join(" ");
            if command.is_empty() {
                return None;
            }
            Some(Process {
                pid,
                user,
                cpu,
                mem,
                command,
            })
        })
        .collect()
}

/// `GET /api/processes`
pub fn list(_ctx: &Context<'_, AppState>) -> HandlerResult {
    let out = capture(PS, &PS_ARGS, PS_MAX_BYTES, PS_TIMEOUT)
        .ok_or_else(|| HandlerError::Internal("ps produced no output".into()))?;
    json(&parse_ps(&out.text()))
}
