//! HTTP/1.x wire parsing at the proxy boundary.
//!
//! The proxy is request-line-aware only: enough parsing to route, key the
//! cache and detect truncated upstream responses. Everything else is
//! forwarded as opaque bytes.

use std::io::Read;
use std::net::TcpStream;


/// Upper bound on a request or response head.
pub const MAX_HEAD_BYTES: usize = 8 * 1024;
const HEADER_SLOTS: usize = 64;
const READ_CHUNK: usize = 1024;

#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    #[error("malformed head: {0}")]
    Parse(#[from] httparse::Error),
    #[error("head exceeds {MAX_HEAD_BYTES} bytes")]
    TooLarge,
    #[error("connection closed before a complete head")]
    UnexpectedEof,
    #[error("i/o error reading head: {0}")]
    Io(#[from] std::io::Error),
}

/// Parsed request line and the headers the proxy cares about, plus every
/// raw byte read so far (head and any body prefix) for opaque forwarding.
#[derive(Debug)]
pub struct RequestHead {
    pub method: String,
    pub target: String,
    pub version: u8,
    pub host: Option<String>,
    pub content_length: usize,
    pub head_len: usize,
    pub raw: Vec<u8>,
}

impl RequestHead {
    /// Only plain-HTTP GET responses are cached; everything else is
    /// forwarded without cache involvement.
    pub fn is_cacheable(&self) -> bool {
        self.method == "GET" && !self.target.starts_with("https://")
    }
}

/// Reads from the client until a complete request head is buffered.
pub fn read_request_head(stream: &mut TcpStream) -> Result<RequestHead, HttpError> {
    let mut buf: Vec<u8> = Vec::with_capacity(READ_CHUNK);
    let mut chunk = [0u8; READ_CHUNK];

    loop {
        let parsed = {
            let mut headers = [httparse::EMPTY_HEADER; HEADER_SLOTS];
            let mut req = httparse::Request::new(&mut headers);
            match req.parse(&buf)? {
                httparse::Status::Complete(head_len) => {
                    let method = req.method.unwrap_or_default().to_string();
                    let target = req.path.unwrap_or("/").to_string();
                    let version = req.version.unwrap_or(0);
                    let host = header_value(req.headers, "host").map(str::to_string);
                    let content_length = header_value(req.headers, "content-length")
                        .and_then(|v| v.parse().ok())
                        .unwrap_or(0);
                    Some((method, target, version, host, content_length, head_len))
                }
                httparse::Status::Partial => None,
            }
        };

        if let Some((method, target, version, host, content_length, head_len)) = parsed {
            return Ok(RequestHead {
                method,
                target,
                version,
                host,
                content_length,
                head_len,
                raw: buf,
            });
        }

        if buf.len() >= MAX_HEAD_BYTES {
            return Err(HttpError::TooLarge);
        }
        let n = stream.read(&mut chunk)?;
        if n == 0 {
            return Err(HttpError::UnexpectedEof);
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

fn header_value<'h>(headers: &'h [httparse::Header<'h>], name: &str) -> Option<&'h str> {
    headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .and_then(|h| std::str::from_utf8(h.value).ok())
        .map(str::trim)
}

/// Status line and framing facts of an upstream response head.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseHead {
    pub status: u16,
    pub head_len: usize,
    pub content_length: Option<usize>,
}

/// Parses a response head out of a byte prefix. `Ok(None)` means more
/// bytes are needed.
pub fn parse_response_head(buf: &[u8]) -> Result<Option<ResponseHead>, HttpError> {
    let mut headers = [httparse::EMPTY_HEADER; HEADER_SLOTS];
    let mut rsp = httparse::Response::new(&mut headers);
    match rsp.parse(buf)? {
        httparse::Status::Complete(head_len) => {
            let content_length = rsp
                .headers
                .iter()
                .find(|h| h.name.eq_ignore_ascii_case("content-length"))
                .and_then(|h| std::str::from_utf8(h.value).ok())
                .and_then(|v| v.trim().parse().ok());
            Ok(Some(ResponseHead {
                status: rsp.code.unwrap_or(0),
                head_len,
                content_length,
            }))
        }
        httparse::Status::Partial => Ok(None),
    }
}

/// Incrementally watches the producer's upstream byte stream so EOF can
/// be classified: a short `Content-Length` body means truncation, a
/// close-delimited response completes at EOF.
pub struct ResponseSniffer {
    head: Vec<u8>,
    parsed: Option<ResponseHead>,
    total: usize,
    gave_up: bool,
}

impl ResponseSniffer {
    pub fn new() -> Self {
        Self {
            head: Vec::new(),
            parsed: None,
            total: 0,
            gave_up: false,
        }
    }

    /// Accounts for one chunk of upstream bytes.
    pub fn feed(&mut self, chunk: &[u8]) {
        self.total += chunk.len();
        if self.parsed.is_some() || self.gave_up {
            return;
        }

        self.head.extend_from_slice(chunk);
        match parse_response_head(&self.head) {
            Ok(Some(parsed)) => {
                self.parsed = Some(parsed);
                self.head = Vec::new();
            }
            Ok(None) => {
                if self.head.len() > MAX_HEAD_BYTES {
                    // Oversized head: stop sniffing, treat the stream as
                    // close-delimited.
                    self.gave_up = true;
                    self.head = Vec::new();
                }
            }
            Err(_) => {
                self.gave_up = true;
                self.head = Vec::new();
            }
        }
    }

    /// Called at upstream EOF: did the stream end before the response it
    /// promised?
    pub fn is_truncated(&self) -> bool {
        match self.parsed {
            Some(head) => match head.content_length {
                Some(length) => self.total < head.head_len + length,
                None => false,
            },
            // EOF before a complete head is always a failure, unless the
            // sniffer already gave up and fell back to close-delimited.
            None => !self.gave_up,
        }
    }

    pub fn bytes_seen(&self) -> usize {
        self.total
    }
}

impl Default for ResponseSniffer {
    fn default() -> Self {
        Self::new()
    }
}
