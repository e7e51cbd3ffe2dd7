// src/cli.rs
use clap::Parser;
use std::net::Ipv4Addr;
use std::path::PathBuf;

/// Command-line flags. Anything given here overrides the config file.
#[derive(Debug, Parser)]
#[command(name = "miniweb")]
#[command(about = "Small HTTP server exposing system introspection endpoints")]
#[command(version)]
pub struct Cli {
    /// Listen port
    #[arg(short, long, value_parser = clap::value_parser!(u16).range(1..))]
    pub port: Option<u16>,

    /// Listen address (IPv4)
    #[arg(short, long)]
    pub bind: Option<Ipv4Addr>,

    /// Worker threads
    #[arg(short, long, value_parser = clap::value_parser!(u32).range(1..=64))]
    pub threads: Option<u32>,

    /// Maximum concurrent connections
    #[arg(short = 'c', long = "max-conns", value_parser = clap::value_parser!(u32).range(1..=65535))]
    pub max_conns: Option<u32>,

    /// Configuration file
    #[arg(short = 'f', long = "config")]
    pub config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long)]
    pub verbose: bool,
}
