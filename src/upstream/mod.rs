//! Origin connector: authority resolution, DNS and TCP.

use std::io;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::debug;

use crate::http::RequestHead;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_PORT: u16 = 80;

#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("request carries no resolvable authority")]
    MissingAuthority,
    #[error("failed to resolve {authority}: {source}")]
    Resolve {
        authority: String,
        source: io::Error,
    },
    #[error("failed to connect to {authority}: {source}")]
    Connect {
        authority: String,
        source: io::Error,
    },
}

/// The origin authority for a request: the absolute-form request target
/// wins, the `Host` header is the fallback.
pub fn authority_of(head: &RequestHead) -> Option<String> {
    if let Some(rest) = head.target.strip_prefix("http://") {
        let end = rest.find('/').unwrap_or(rest.len());
        if !rest[..end].is_empty() {
            return Some(rest[..end].to_string());
        }
    }
    head.host.clone()
}

/// Opens a TCP connection to the authority, trying each resolved address
/// in turn.
pub fn connect(authority: &str) -> Result<TcpStream, UpstreamError> {
    let target = with_default_port(authority);
    let addrs: Vec<_> = target
        .to_socket_addrs()
        .map_err(|source| UpstreamError::Resolve {
            authority: target.clone(),
            source,
        })?
        .collect();

    let mut last_err = None;
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT) {
            Ok(stream) => {
                let _ = stream.set_nodelay(true);
                debug!(authority = %target, %addr, "upstream connected");
                return Ok(stream);
            }
            Err(err) => last_err = Some(err),
        }
    }

    Err(UpstreamError::Connect {
        authority: target,
        source: last_err.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::AddrNotAvailable, "no addresses resolved")
        }),
    })
}

/// Resolves the request's authority and connects to it.
pub fn connect_for(head: &RequestHead) -> Result<TcpStream, UpstreamError> {
    let authority = authority_of(head).ok_or(UpstreamError::MissingAuthority)?;
    connect(&authority)
}

/// Appends `:80` when the authority has no explicit port. Bracketed IPv6
/// literals keep their brackets.
fn with_default_port(authority: &str) -> String {
    let has_port = if authority.starts_with('[') {
        authority.contains("]:")
    } else {
        authority.contains(':')
    };
    if has_port {
        authority.to_string()
    } else {
        format!("{authority}:{DEFAULT_PORT}")
    }
}
