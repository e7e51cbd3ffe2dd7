// src/state.rs
use crate::config::Config;
use crate::handlers::system;
use crate::netinfo::{self, NetSnapshot};
use miniweb_core::sampler::SAMPLE_INTERVAL;
use miniweb_core::{MetricsHandle, Sampler};
use std::time::{Duration, Instant};

/// Shared, read-only state handed to every handler.
pub struct AppState {
    pub config: Config,
    pub hostname: String,
    pub started: Instant,
    /// Network history, sampled once per second after the first request that needs it.
    pub network: Sampler<NetSnapshot>,
    pub metrics: MetricsHandle,
}

impl AppState {
    pub fn new(config: Config, metrics: MetricsHandle) -> Self {
        Self {
            config,
            hostname: system::hostname(),
            started: Instant::now(),
            network: Sampler::new("netinfo", SAMPLE_INTERVAL, netinfo::collect),
            metrics,
        }
    }

    /// Time since this process started serving.
    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    /// Wall-clock limit for subprocesses run on behalf of a request.
    pub fn subprocess_timeout(&self) -> Duration {
        Duration::from_secs(self.config.mandoc_timeout)
    }
}

impl Drop for AppState {
    fn drop(&mut self) {
        self.network.shutdown();
    }
}
