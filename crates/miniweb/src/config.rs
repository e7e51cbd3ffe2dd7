// src/config.rs
//! Server configuration: built-in defaults, a `key value` file and CLI overrides.
//!
//! ```text
//! # miniweb.conf
//! port          8080
//! bind          0.0.0.0
//! threads       8
//! trusted_proxy 127.0.0.1
//! verbose       yes
//! ```
//!
//! Lookup order when `-f` is not given: `./miniweb.conf`, `$HOME/.miniweb.conf`,
//! `/etc/miniweb.conf`. The first file found is used; none at all is fine.

use crate::cli::Cli;
use miniweb_core::ServerConfig;
use std::fmt::Display;
use std::io;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

pub const CONFIG_NAME: &str = "miniweb.conf";
pub const MIN_REQ_SIZE: usize = 1024;
pub const MAX_REQ_SIZE: usize = 1024 * 1024;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{}:{line}: {message}", path.display())]
    Parse {
        path: PathBuf,
        line: usize,
        message: String,
    },
}

/// Effective settings after file and CLI merging.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub port: u16,
    pub bind: Ipv4Addr,
    pub threads: usize,
    pub max_conns: usize,
    /// Idle connection timeout (seconds).
    pub conn_timeout: u64,
    pub max_req_size: usize,
    /// Wall-clock limit for mandoc and the other subprocesses (seconds).
    pub mandoc_timeout: u64,
    pub static_dir: PathBuf,
    pub templates_dir: PathBuf,
    pub mandoc_path: PathBuf,
    pub trusted_proxy: Option<Ipv4Addr>,
    pub verbose: bool,
    /// File the settings were read from, if any.
    pub source: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            bind: Ipv4Addr::LOCALHOST,
            threads: 4,
            max_conns: 1024,
            conn_timeout: 30,
            max_req_size: 16 * 1024,
            mandoc_timeout: 10,
            static_dir: PathBuf::from("./static"),
            templates_dir: PathBuf::from("./templates"),
            mandoc_path: PathBuf::from("/usr/bin/mandoc"),
            trusted_proxy: None,
            verbose: false,
            source: None,
        }
    }
}

fn ranged<T>(value: &str, min: T, max: T) -> Result<T, String>
where
    T: FromStr + PartialOrd + Display + Copy,
{
    let v: T = value.parse().map_err(|_| format!("'{value}' is not a number"))?;
    if v < min || v > max {
        return Err(format!("{v} is outside {min}..={max}"));
    }
    Ok(v)
}

fn boolean(value: &str) -> Result<bool, String> {
    match value.to_ascii_lowercase().as_str() {
        "yes" | "true" | "on" | "1" => Ok(true),
        "no" | "false" | "off" | "0" => Ok(false),
        _ => Err(format!("'{value}' is not a boolean")),
    }
}

fn ipv4(value: &str) -> Result<Ipv4Addr, String> {
    value
        .parse()
        .map_err(|_| format!("'{value}' is not an IPv4 address"))
}

impl Config {
    /// Apply one recognized key. Keys are case-insensitive.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), String> {
        match key.to_ascii_lowercase().as_str() {
            "port" => self.port = ranged(value, 1, u16::MAX)?,
            "bind" => self.bind = ipv4(value)?,
            "threads" => self.threads = ranged(value, 1, 64)?,
            "max_conns" => self.max_conns = ranged(value, 1, 65535)?,
            "conn_timeout" => self.conn_timeout = ranged(value, 1, u64::MAX)?,
            "max_req_size" => self.max_req_size = ranged(value, MIN_REQ_SIZE, MAX_REQ_SIZE)?,
            "mandoc_timeout" => self.mandoc_timeout = ranged(value, 1, u64::MAX)?,
            "static_dir" => self.static_dir = PathBuf::from(value),
            "templates_dir" => self.templates_dir = PathBuf::from(value),
            "mandoc_path" => self.mandoc_path = PathBuf::from(value),
            "trusted_proxy" => self.trusted_proxy = Some(ipv4(value)?),
            "verbose" => self.verbose = boolean(value)?,
            other => return Err(format!("unknown key '{other}'")),
        }
        Ok(())
    }

    /// Parse file contents on top of the current values.
    pub fn merge_str(&mut self, text: &str, path: &Path) -> Result<(), ConfigError> {
        for (idx, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let parse_err = |message: String| ConfigError::Parse {
                path: path.to_path_buf(),
                line: idx + 1,
                message,
            };
            let (key, value) = line
                .split_once(char::is_whitespace)
                .map(|(k, v)| (k, v.trim()))
                .ok_or_else(|| parse_err(format!("'{line}' has no value")))?;
            self.set(key, value).map_err(parse_err)?;
        }
        Ok(())
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Config::default();
        config.merge_str(&text, path)?;
        config.source = Some(path.to_path_buf());
        Ok(config)
    }

    /// Implicit lookup locations, in order.
    pub fn candidates(home: Option<&Path>) -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(".").join(CONFIG_NAME)];
        if let Some(home) = home {
            paths.push(home.join(format!(".{CONFIG_NAME}")));
        }
        paths.push(Path::new("/etc").join(CONFIG_NAME));
        paths
    }

    /// Load from `explicit` (must exist) or the first implicit candidate that does.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        let home = std::env::var_os("HOME").map(PathBuf::from);
        for path in Self::candidates(home.as_deref()) {
            if path.is_file() {
                return Self::from_file(&path);
            }
        }
        Ok(Config::default())
    }

    /// CLI flags win over file values.
    pub fn apply_cli(&mut self, cli: &Cli) {
        if let Some(port) = cli.port {
            self.port = port;
        }
        if let Some(bind) = cli.bind {
            self.bind = bind;
        }
        if let Some(threads) = cli.threads {
            self.threads = threads as usize;
        }
        if let Some(max_conns) = cli.max_conns {
            self.max_conns = max_conns as usize;
        }
        if cli.verbose {
            self.verbose = true;
        }
    }

    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            bind: self.bind,
            port: self.port,
            threads: self.threads,
            max_conns: self.max_conns,
            conn_timeout: self.conn_timeout,
            max_req_size: self.max_req_size,
            trusted_proxy: self.trusted_proxy,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn parse(text: &str) -> Result<Config, ConfigError> {
        let mut config = Config::default();
        config.merge_str(text, Path::new("test.conf"))?;
        Ok(config)
    }

    #[test]
    fn test_defaults() {
        let c = Config::default();
        assert_eq!(c.port, 8080);
        assert_eq!(c.bind, Ipv4Addr::LOCALHOST);
        assert_eq!(c.threads, 4);
        assert_eq!(c.max_conns, 1024);
        assert_eq!(c.conn_timeout, 30);
        assert_eq!(c.max_req_size, 16384);
        assert_eq!(c.mandoc_timeout, 10);
        assert_eq!(c.trusted_proxy, None);
        assert!(!c.verbose);
    }

    #[test]
    fn test_parse_file_format() {
        let c = parse(
            "# comment\n\nPORT 9000\nbind\t0.0.0.0\n  threads   8  \nverbose on\ntrusted_proxy 10.0.0.1\nstatic_dir /srv/www static\n",
        )
        .unwrap();
        assert_eq!(c.port, 9000);
        assert_eq!(c.bind, Ipv4Addr::UNSPECIFIED);
        assert_eq!(c.threads, 8);
        assert!(c.verbose);
        assert_eq!(c.trusted_proxy, Some(Ipv4Addr::new(10, 0, 0, 1)));
        assert_eq!(c.static_dir, PathBuf::from("/srv/www static"));
    }

    #[test]
    fn test_parse_errors_carry_line_numbers() {
        let err = parse("port 80\n\nthreads 65\n").unwrap_err();
        match err {
            ConfigError::Parse { line, message, .. } => {
                assert_eq!(line, 3);
                assert!(message.contains("1..=64"), "{message}");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(parse("colour blue\n").unwrap_err().to_string().contains("test.conf:1"));
        assert!(parse("port\n").is_err());
        assert!(parse("port 0\n").is_err());
        assert!(parse("max_req_size 512\n").is_err());
        assert!(parse("bind localhost\n").is_err());
        assert!(parse("verbose maybe\n").is_err());
    }

    #[test]
    fn test_explicit_missing_file_is_fatal() {
        let err = Config::load(Some(Path::new("/nonexistent/miniweb.conf"))).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_candidate_order() {
        let paths = Config::candidates(Some(Path::new("/home/op")));
        assert_eq!(
            paths,
            vec![
                PathBuf::from("./miniweb.conf"),
                PathBuf::from("/home/op/.miniweb.conf"),
                PathBuf::from("/etc/miniweb.conf"),
            ]
        );
        assert_eq!(Config::candidates(None).len(), 2);
    }

    #[test]
    fn test_cli_overrides_file() {
        let mut c = parse("port 9000\nthreads 2\n").unwrap();
        let cli = Cli::try_parse_from(["miniweb", "-p", "7000", "-v"]).unwrap();
        c.apply_cli(&cli);
        assert_eq!(c.port, 7000);
        assert_eq!(c.threads, 2);
        assert!(c.verbose);

        let sc = c.server_config();
        assert_eq!(sc.port, 7000);
        assert_eq!(sc.threads, 2);
    }
}
