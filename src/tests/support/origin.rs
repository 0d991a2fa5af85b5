// Test origin server for integration tests.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

const ACCEPT_POLL: Duration = Duration::from_millis(10);

/// Behavior knobs for one origin instance.
#[derive(Clone)]
pub struct OriginOptions {
    /// Response body to serve.
    pub body: Vec<u8>,
    /// Pause between accepting the request and writing the response, so
    /// tests can race a second client against an in-flight transfer.
    pub response_delay: Duration,
    /// Send only this many body bytes before closing, while still
    /// advertising the full `Content-Length`.
    pub truncate_at: Option<usize>,
}

impl OriginOptions {
    pub fn with_body(body: Vec<u8>) -> Self {
        Self {
            body,
            response_delay: Duration::ZERO,
            truncate_at: None,
        }
    }
}

/// A minimal threaded HTTP origin: serves one configured response per
/// connection and counts how many requests it saw.
pub struct Origin {
    addr: SocketAddr,
    hits: Arc<AtomicUsize>,
    stop: Arc<AtomicBool>,
    accept_thread: Option<JoinHandle<()>>,
}

impl Origin {
    pub fn start(body: Vec<u8>) -> Self {
        Self::start_with(OriginOptions::with_body(body))
    }

    pub fn start_with(opts: OriginOptions) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("origin bind failed");
        listener.set_nonblocking(true).expect("origin nonblocking failed");
        let addr = listener.local_addr().unwrap();

        let hits = Arc::new(AtomicUsize::new(0));
        let stop = Arc::new(AtomicBool::new(false));

        let accept_hits = Arc::clone(&hits);
        let accept_stop = Arc::clone(&stop);
        let accept_thread = thread::Builder::new()
            .name("origin".to_string())
            .spawn(move || {
                while !accept_stop.load(Ordering::Relaxed) {
                    match listener.accept() {
                        Ok((stream, _)) => {
                            accept_hits.fetch_add(1, Ordering::Relaxed);
                            let opts = opts.clone();
                            thread::spawn(move || serve_one(stream, &opts));
                        }
                        Err(ref err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                            thread::sleep(ACCEPT_POLL);
                        }
                        Err(_) => break,
                    }
                }
            })
            .expect("origin thread spawn failed");

        Self {
            addr,
            hits,
            stop,
            accept_thread: Some(accept_thread),
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Number of connections the origin accepted.
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::Relaxed)
    }
}

impl Drop for Origin {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.accept_thread.take() {
            let _ = handle.join();
        }
    }
}

fn serve_one(mut stream: TcpStream, opts: &OriginOptions) {
    let _ = stream.set_nodelay(true);
    let _ = stream.set_nonblocking(false);

    // Read until the end of the request head; the tests never send bodies
    // the origin cares about.
    let mut buf = [0u8; 4096];
    let mut request = Vec::new();
    loop {
        match stream.read(&mut buf) {
            Ok(0) => return,
            Ok(n) => {
                request.extend_from_slice(&buf[..n]);
                if request.windows(4).any(|w| w == b"\r\n\r\n") {
                    break;
                }
            }
            Err(_) => return,
        }
    }

    if !opts.response_delay.is_zero() {
        thread::sleep(opts.response_delay);
    }

    let head = format!(
        "HTTP/1.0 200 OK\r\nContent-Type: application/octet-stream\r\nContent-Length: {}\r\n\r\n",
        opts.body.len()
    );
    if stream.write_all(head.as_bytes()).is_err() {
        return;
    }
    let sent = opts.truncate_at.unwrap_or(opts.body.len()).min(opts.body.len());
    let _ = stream.write_all(&opts.body[..sent]);
    let _ = stream.flush();
    // Dropping the stream closes the connection; with truncate_at set the
    // client observes EOF before the promised Content-Length.
}
