// Shared helpers for the integration test suite.

pub mod origin;

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::cache::Cache;
use crate::config::Config;
use crate::proxy::Proxy;

pub use origin::{Origin, OriginOptions};

/// A proxy running on its own thread, bound to an ephemeral port.
pub struct RunningProxy {
    pub addr: SocketAddr,
    cache: Arc<Cache>,
    shutdown: Arc<AtomicBool>,
    serve_thread: Option<JoinHandle<()>>,
}

impl RunningProxy {
    pub fn start(cfg: Config) -> Self {
        crate::logging::try_init();

        let proxy = Proxy::bind(cfg, 0).expect("proxy bind failed");
        let addr = proxy.local_addr().expect("proxy addr unavailable");
        let cache = proxy.cache();
        let shutdown = proxy.shutdown_handle();

        let serve_thread = thread::Builder::new()
            .name("proxy-accept".to_string())
            .spawn(move || {
                proxy.serve().expect("proxy serve failed");
            })
            .expect("proxy thread spawn failed");

        Self {
            addr,
            cache,
            shutdown,
            serve_thread: Some(serve_thread),
        }
    }

    pub fn cache(&self) -> &Arc<Cache> {
        &self.cache
    }

    /// Waits until the cache holds exactly `expected` entries, or panics
    /// after the timeout.
    pub fn await_cache_len(&self, expected: usize, timeout: Duration) {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if self.cache.len() == expected {
                return;
            }
            thread::sleep(Duration::from_millis(10));
        }
        panic!(
            "cache never reached {} entries (still {})",
            expected,
            self.cache.len()
        );
    }

    pub fn stop(mut self) {
        self.stop_inner();
    }

    fn stop_inner(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.serve_thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for RunningProxy {
    fn drop(&mut self) {
        self.stop_inner();
    }
}

/// Configuration sized for fast tests.
pub fn test_config() -> Config {
    Config {
        handler_count: 4,
        cache_ttl: Duration::from_secs(60),
        cache_capacity: 64,
        queue_capacity: 16,
        drain_on_shutdown: false,
    }
}

/// Sends an absolute-form GET through the proxy and returns the raw
/// response bytes (headers and body) once the proxy closes the socket.
pub fn http_get(proxy: SocketAddr, origin: SocketAddr, path: &str) -> std::io::Result<Vec<u8>> {
    send_request(
        proxy,
        format!("GET http://{origin}{path} HTTP/1.0\r\nHost: {origin}\r\n\r\n").as_bytes(),
    )
}

/// Sends raw request bytes and collects the full response.
pub fn send_request(proxy: SocketAddr, request: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut stream = TcpStream::connect(proxy)?;
    stream.set_nodelay(true)?;
    stream.write_all(request)?;
    let mut response = Vec::new();
    stream.read_to_end(&mut response)?;
    Ok(response)
}

/// Splits a raw HTTP response at the blank line and returns the body.
pub fn body_of(response: &[u8]) -> &[u8] {
    response
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|pos| &response[pos + 4..])
        .unwrap_or(&[])
}

/// Deterministic pseudo-random payload for byte-exact comparisons.
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}
