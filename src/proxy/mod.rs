//! Proxy composition: listener, thread pool, cache and shutdown wiring.

use std::io;
use std::net::{SocketAddr, TcpListener};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

pub mod fingerprint;
pub mod session;

use crate::cache::Cache;
use crate::config::Config;
use crate::pool::{PoolError, ShutdownMode, ThreadPool};

const ACCEPT_POLL: Duration = Duration::from_millis(25);

/// The assembled proxy: accept loop on the calling thread, sessions on
/// the pool, eviction on the cache's own thread.
pub struct Proxy {
    cfg: Config,
    cache: Arc<Cache>,
    pool: ThreadPool,
    listener: TcpListener,
    shutdown: Arc<AtomicBool>,
}

impl Proxy {
    /// Binds the listening socket and builds the cache and pool. Any
    /// failure here is a startup failure and surfaces as a non-zero exit.
    pub fn bind(cfg: Config, port: u16) -> Result<Self> {
        let listener = TcpListener::bind(("0.0.0.0", port))
            .with_context(|| format!("failed to bind port {port}"))?;
        listener
            .set_nonblocking(true)
            .context("failed to configure the listening socket")?;

        let cache = Arc::new(
            Cache::new(cfg.cache_capacity, cfg.cache_ttl).context("failed to create cache")?,
        );
        let pool = ThreadPool::new(cfg.handler_count, cfg.queue_capacity)
            .context("failed to create thread pool")?;

        Ok(Self {
            cfg,
            cache,
            pool,
            listener,
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .context("listener address unavailable")
    }

    /// Flag observed by the accept loop; flip it to stop serving.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Shared handle to the cache, used by tests to observe entries.
    pub fn cache(&self) -> Arc<Cache> {
        Arc::clone(&self.cache)
    }

    /// Accepts connections until the shutdown flag is raised, then stops
    /// the pool and destroys the cache.
    pub fn serve(self) -> Result<()> {
        let addr = self.local_addr()?;
        info!(%addr, workers = self.cfg.handler_count, "proxy listening");

        while !self.shutdown.load(Ordering::Relaxed) {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    let _ = stream.set_nodelay(true);
                    // Accepted sockets must block; only the listener polls.
                    if let Err(err) = stream.set_nonblocking(false) {
                        warn!(peer = %peer, error = %err, "failed to configure client socket");
                        continue;
                    }
                    let cache = Arc::clone(&self.cache);
                    match self.pool.execute(move || session::handle_client(stream, cache)) {
                        Ok(task_id) => debug!(peer = %peer, task_id, "connection dispatched"),
                        Err(PoolError::Shutdown) => {
                            warn!(peer = %peer, "pool is shut down, dropping connection");
                        }
                        Err(err) => warn!(peer = %peer, error = %err, "failed to dispatch connection"),
                    }
                }
                Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => {
                    thread::sleep(ACCEPT_POLL);
                }
                Err(err) => {
                    warn!(error = %err, "accept failed");
                    thread::sleep(ACCEPT_POLL);
                }
            }
        }

        info!("accept loop stopped, shutting down");
        let mode = if self.cfg.drain_on_shutdown {
            ShutdownMode::Drain
        } else {
            ShutdownMode::Drop
        };
        self.pool.shutdown(mode);
        self.cache.shutdown();
        Ok(())
    }
}
