// src/main.rs
use clap::Parser;
use miniweb::cli::Cli;
use miniweb::logging::init_logging;
use miniweb::{AppState, Config, handlers};
use miniweb_core::{Server, syscalls};
use std::process::ExitCode;
use std::sync::atomic::Ordering;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            init_logging(cli.verbose);
            tracing::error!(error = %e, "cannot load configuration");
            return ExitCode::FAILURE;
        }
    };
    config.apply_cli(&cli);
    init_logging(config.verbose);
    if let Some(path) = &config.source {
        tracing::info!(path = %path.display(), "configuration loaded");
    }

    syscalls::ignore_sigpipe();

    let server = match Server::bind(config.server_config()) {
        Ok(server) => server,
        Err(e) => {
            tracing::error!(error = %e, bind = %config.bind, port = config.port, "cannot start server");
            return ExitCode::FAILURE;
        }
    };

    let shutdown = server.shutdown_handle();
    if let Err(e) = ctrlc::set_handler(move || shutdown.store(true, Ordering::Release)) {
        tracing::warn!(error = %e, "cannot install signal handler");
    }

    let state = AppState::new(config, server.metrics());
    match server.serve(handlers::router(), state) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "server stopped with an error");
            ExitCode::FAILURE
        }
    }
}
