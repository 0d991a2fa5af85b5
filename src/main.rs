// Main entrypoint for the flowcache proxy.

use std::sync::atomic::Ordering;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use flowcache::config::Config;
use flowcache::logging;
use flowcache::proxy::Proxy;

/// flowcache - forwarding HTTP caching proxy with a streaming in-memory cache
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TCP port to listen on
    port: u16,
}

fn main() -> Result<()> {
    let args = Args::parse();

    logging::init();

    let cfg = Config::from_env().context("failed to load configuration from environment")?;
    info!(
        pid = std::process::id(),
        port = args.port,
        num_cpus = num_cpus::get(),
        handlers = cfg.handler_count,
        "proxy starting"
    );

    let proxy = Proxy::bind(cfg, args.port).context("proxy startup failed")?;

    // Termination signals land here; workers and the evictor never see
    // them and only the accept loop initiates shutdown.
    let shutdown = proxy.shutdown_handle();
    ctrlc::set_handler(move || {
        shutdown.store(true, Ordering::Relaxed);
    })
    .context("failed to install signal handler")?;

    proxy.serve()
}
