// src/netinfo.rs
//! Network state snapshots: interface counters, IPv4 routes and resolver settings.
//!
//! Snapshots are fixed-size values so the sampler ring can bound its memory.
//! On Linux they come from `/proc/net/dev`, `/proc/net/route` and
//! `/etc/resolv.conf`; elsewhere `netstat` output is scraped.

use arrayvec::{ArrayString, ArrayVec};
use serde::Serialize;
use std::net::Ipv4Addr;

pub const MAX_INTERFACES: usize = 16;
pub const MAX_ROUTES: usize = 32;
pub const MAX_RESOLVERS: usize = 4;

pub type IfName = ArrayString<16>;
pub type Addr = ArrayString<48>;
pub type Domain = ArrayString<64>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Interface {
    pub name: IfName,
    pub rx_bytes: u64,
    pub rx_packets: u64,
    pub rx_errors: u64,
    pub tx_bytes: u64,
    pub tx_packets: u64,
    pub tx_errors: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Route {
    pub destination: Addr,
    pub gateway: Addr,
    pub iface: IfName,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NetSnapshot {
    pub timestamp: u64,
    pub interfaces: ArrayVec<Interface, MAX_INTERFACES>,
    pub routes: ArrayVec<Route, MAX_ROUTES>,
    pub nameservers: ArrayVec<Addr, MAX_RESOLVERS>,
    pub search: ArrayVec<Domain, MAX_RESOLVERS>,
}

/// Copy `s` into a fixed string, truncated at a char boundary.
fn fit<const N: usize>(s: &str) -> ArrayString<N> {
    let mut out = ArrayString::new();
    for ch in s.chars() {
        if out.try_push(ch).is_err() {
            break;
        }
    }
    out
}

/// Parse `/proc/net/dev`.
pub fn parse_proc_net_dev(text: &str) -> ArrayVec<Interface, MAX_INTERFACES> {
    let mut out = ArrayVec::new();
    for line in text.lines().skip(2) {
        let Some((name, counters)) = line.split_once(':') else {
            continue;
        };
        let f: Vec<u64> = counters
            .split_whitespace()
            .map(|v| v.parse().unwrap_or(0))
            .collect();
        if f.len() < 11 {
            continue;
        }
        let iface = Interface {
            name: fit(name.trim()),
            rx_bytes: f[0],
            rx_packets: f[1],
            rx_errors: f[2],
            tx_bytes: f[8],
            tx_packets: f[9],
            tx_errors: f[10],
        };
        if out.try_push(iface).is_err() {
            break;
        }
    }
    out
}

/// `/proc/net/route` stores addresses as host-order hex of the network-order bytes.
fn proc_hex_addr(hex: &str) -> Option<Ipv4Addr> {
    u32::from_str_radix(hex, 16)
        .ok()
        .map(|v| Ipv4Addr::from(v.to_le_bytes()))
}

/// Parse `/proc/net/route`.
pub fn parse_proc_net_route(text: &str) -> ArrayVec<Route, MAX_ROUTES> {
    let mut out = ArrayVec::new();
    for line in text.lines().skip(1) {
        let cols: Vec<&str> = line.split_whitespace().collect();
        if cols.len() < 8 {
            continue;
        }
        let (Some(dest), Some(gw), Some(mask)) =
            (proc_hex_addr(cols[1]), proc_hex_addr(cols[2]), proc_hex_addr(cols[7]))
        else {
            continue;
        };
        let destination = if dest.is_unspecified() && mask.is_unspecified() {
            fit("default")
        } else {
            fit(&format!("{}/{}", dest, u32::from(mask).count_ones()))
        };
        let route = Route {
            destination,
            gateway: fit(&gw.to_string()),
            iface: fit(cols[0]),
        };
        if out.try_push(route).is_err() {
            break;
        }
    }
    out
}

/// Parse `resolv.conf` into (nameservers, search domains).
pub fn parse_resolv_conf(
    text: &str,
) -> (ArrayVec<Addr, MAX_RESOLVERS>, ArrayVec<Domain, MAX_RESOLVERS>) {
    let mut servers = ArrayVec::new();
    let mut search = ArrayVec::new();
    for line in text.lines() {
        let line = line.split(['#', ';']).next().unwrap_or("");
        let mut words = line.split_whitespace();
        match words.next() {
            Some("nameserver") => {
                if let Some(addr) = words.next() {
                    let _ = servers.try_push(fit(addr));
                }
            }
            Some("search") | Some("domain") => {
                search.clear();
                for domain in words.take(MAX_RESOLVERS) {
                    search.push(fit(domain));
                }
            }
            _ => {}
        }
    }
    (servers, search)
}

fn header_index(header: &[&str], names: &[&str]) -> Option<usize> {
    header.iter().position(|h| names.contains(h))
}

/// Parse `netstat -rn -f inet` (BSD layout, header names locate the columns).
pub fn parse_netstat_routes(text: &str) -> ArrayVec<Route, MAX_ROUTES> {
    let mut out = ArrayVec::new();
    let mut lines = text.lines();
    let header: Vec<&str> = loop {
        match lines.next() {
            Some(l) if l.starts_with("Destination") => break l.split_whitespace().collect(),
            Some(_) => continue,
            None => return out,
        }
    };
    let iface_col = header_index(&header, &["Netif", "Iface", "Interface"]);

    for line in lines {
        let cols: Vec<&str> = line.split_whitespace().collect();
        if cols.len() < 2 {
            break;
        }
        let iface = iface_col
            .and_then(|i| cols.get(i))
            .copied()
            .unwrap_or("");
        let route = Route {
            destination: fit(cols[0]),
            gateway: fit(cols[1]),
            iface: fit(iface),
        };
        if out.try_push(route).is_err() {
            break;
        }
    }
    out
}

/// Parse `netstat -ibn`. Only the first (link-level) row of each interface is kept.
///
/// Rows may omit the address column, so counters are aligned from the right.
pub fn parse_netstat_interfaces(text: &str) -> ArrayVec<Interface, MAX_INTERFACES> {
    let mut out: ArrayVec<Interface, MAX_INTERFACES> = ArrayVec::new();
    let mut lines = text.lines();
    let Some(header) = lines.next() else {
        return out;
    };
    let header: Vec<&str> = header.split_whitespace().collect();
    let width = header.len();
    let counter = |cols: &[&str], names: &[&str]| -> u64 {
        let Some(i) = header_index(&header, names) else {
            return 0;
        };
        let shift = width.saturating_sub(cols.len());
        i.checked_sub(shift)
            .and_then(|j| cols.get(j))
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    };

    for line in lines {
        let cols: Vec<&str> = line.split_whitespace().collect();
        let Some(name) = cols.first() else {
            continue;
        };
        let name = name.trim_end_matches('*');
        if out.iter().any(|i| i.name.as_str() == name) {
            continue;
        }
        let iface = Interface {
            name: fit(name),
            rx_bytes: counter(&cols, &["Ibytes"]),
            rx_packets: counter(&cols, &["Ipkts"]),
            rx_errors: counter(&cols, &["Ierrs"]),
            tx_bytes: counter(&cols, &["Obytes"]),
            tx_packets: counter(&cols, &["Opkts"]),
            tx_errors: counter(&cols, &["Oerrs"]),
        };
        if out.try_push(iface).is_err() {
            break;
        }
    }
    out
}

/// Take a snapshot of the host's current network state.
pub fn collect() -> NetSnapshot {
    let mut snap = NetSnapshot {
        timestamp: miniweb_core::syscalls::now_secs(),
        ..NetSnapshot::default()
    };
    collect_platform(&mut snap);
    if let Ok(text) = std::fs::read_to_string("/etc/resolv.conf") {
        (snap.nameservers, snap.search) = parse_resolv_conf(&text);
    }
    snap
}

#[cfg(target_os = "linux")]
fn collect_platform(snap: &mut NetSnapshot) {
    if let Ok(text) = std::fs::read_to_string("/proc/net/dev") {
        snap.interfaces = parse_proc_net_dev(&text);
    }
    if let Ok(text) = std::fs::read_to_string("/proc/net/route") {
        snap.routes = parse_proc_net_route(&text);
    }
}

#[cfg(not(target_os = "linux"))]
fn collect_platform(snap: &mut NetSnapshot) {
    use miniweb_core::capture;
    use std::time::Duration;

    const NETSTAT: &str = "/usr/bin/netstat";
    const LIMIT: usize = 256 * 1024;
    let timeout = Duration::from_secs(5);

    if let Some(out) = capture(NETSTAT, &["netstat", "-ibn"], LIMIT, timeout) {
        snap.interfaces = parse_netstat_interfaces(&out.text());
    }
    if let Some(out) = capture(NETSTAT, &["netstat", "-rn", "-f", "inet"], LIMIT, timeout) {
        snap.routes = parse_netstat_routes(&out.text());
    }
}
