// src/handlers/packages.rs
use super::json;
use crate::state::AppState;
use miniweb_core::{Context, HandlerError, HandlerResult, capture};
use serde::Serialize;
use std::path::Path;
use std::time::Duration;

const PKG_INFO: &str = "/usr/sbin/pkg_info";
const DPKG_QUERY: &str = "/usr/bin/dpkg-query";
const LIST_TIMEOUT: Duration = Duration::from_secs(10);
const LIST_MAX_BYTES: usize = 8 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Package {
    pub name: String,
    pub version: String,
}

/// `pkg_info` lines look like `curl-8.4.0p0   transfer files with FTP, HTTP...`.
pub fn parse_pkg_info(text: &str) -> Vec<Package> {
    text.lines()
        .filter_map(|line| {
            let stem = line.split_whitespace().next()?;
            // The version starts after the last '-' followed by a digit.
            let split = stem
                .match_indices('-')
                .filter(|(i, _)| stem[i + 1..].starts_with(|c: char| c.is_ascii_digit()))
                .map(|(i, _)| i)
                .last();
            Some(match split {
                Some(i) => Package {
                    name: stem[..i].to_string(),
                    version: stem[i + 1..].to_string(),
                },
                None => Package {
                    name: stem.to_string(),
                    version: String::new(),
                },
            })
        })
        .collect()
}

/// `dpkg-query -W -f '${Package}\t${Version}\n'` output.
pub fn parse_dpkg(text: &str) -> Vec<Package> {
    text.lines()
        .filter_map(|line| {
            let (name, version) = line.split_once('\t')?;
            let name = name.trim();
            (!name.is_empty()).then(|| Package {
                name: name.to_string(),
                version: version.trim().to_string(),
            })
        })
        .collect()
}

/// `GET /api/packages`
pub fn list(_ctx: &Context<'_, AppState>) -> HandlerResult {
    let packages = if Path::new(PKG_INFO).exists() {
        let out = capture(PKG_INFO, &["pkg_info"], LIST_MAX_BYTES, LIST_TIMEOUT);
        out.map(|o| parse_pkg_info(&o.text()))
    } else if Path::new(DPKG_QUERY).exists() {
        let argv = ["dpkg-query", "-W", "-f=${Package}\t${Version}\n"];
        let out = capture(DPKG_QUERY, &argv, LIST_MAX_BYTES, LIST_TIMEOUT);
        out.map(|o| parse_dpkg(&o.text()))
    } else {
        return Err(HandlerError::Internal("no package manager found".into()));
    };
    let packages = packages.ok_or_else(|| HandlerError::Internal("package query failed".into()))?;
    json(&packages)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pkg_info() {
        let text = "curl-8.4.0p0        transfer files with FTP, HTTP\n\
                    py3-setuptools-68.0.0v0 simplified packaging\n\
                    quirks-6.160        exceptions to pkg_add rules\n";
        let pkgs = parse_pkg_info(text);
        assert_eq!(pkgs.len(), 3);
        assert_eq!(pkgs[0], Package { name: "curl".into(), version: "8.4.0p0".into() });
        assert_eq!(pkgs[1].name, "py3-setuptools");
        assert_eq!(pkgs[1].version, "68.0.0v0");
        assert_eq!(pkgs[2].version, "6.160");
    }

    #[test]
    fn test_parse_dpkg() {
        let pkgs = parse_dpkg("bash\t5.2.15-2+b2\nlibc6\t2.36-9\n\nbroken line\n");
        assert_eq!(pkgs.len(), 2);
        assert_eq!(pkgs[0].name, "bash");
        assert_eq!(pkgs[1].version, "2.36-9");
    }
}
