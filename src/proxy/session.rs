//! Per-connection session logic: routing to cache or origin.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::cache::{Admission, Cache, CacheEntry};
use crate::http::{self, RequestHead, ResponseSniffer};
use crate::message::{FailReason, ReadState};
use crate::proxy::fingerprint::fingerprint;
use crate::upstream::{self, UpstreamError};

const READ_BUF: usize = 8 * 1024;

static RESPONSE_BAD_REQUEST: &[u8] =
    b"HTTP/1.0 400 Bad Request\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";
static RESPONSE_BAD_GATEWAY: &[u8] =
    b"HTTP/1.0 502 Bad Gateway\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";

/// Entry point for a pooled task: one accepted client connection.
pub fn handle_client(mut stream: TcpStream, cache: Arc<Cache>) {
    let peer = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_string());

    let head = match http::read_request_head(&mut stream) {
        Ok(head) => head,
        Err(err) => {
            warn!(peer = %peer, error = %err, "failed to read request head");
            let _ = stream.write_all(RESPONSE_BAD_REQUEST);
            return;
        }
    };
    debug!(peer = %peer, method = %head.method, target = %head.target, "request accepted");

    if !head.is_cacheable() {
        forward_uncached(stream, &head, &peer);
        return;
    }

    let key = fingerprint(&head);
    if let Some(entry) = cache.get(&key) {
        debug!(peer = %peer, "cache hit");
        stream_entry(stream, &entry, &peer);
        return;
    }

    // Miss. Re-check under the bucket write lock: a concurrent producer
    // may have won the slot since the lookup above.
    match cache.lookup_or_insert(&key) {
        Admission::Consumer(entry) => {
            debug!(peer = %peer, "joined in-flight entry");
            stream_entry(stream, &entry, &peer);
        }
        Admission::Producer(entry) => {
            debug!(peer = %peer, "cache miss, producing");
            produce_entry(stream, &entry, &head, &cache, &peer);
        }
    }
}

/// Consumer side: stream the entry's buffer to the client until the
/// message completes or fails.
fn stream_entry(mut stream: TcpStream, entry: &Arc<CacheEntry>, peer: &str) {
    let mut offset = 0usize;
    loop {
        let (chunk, state) = entry.body().read_from(offset);
        if !chunk.is_empty() {
            if stream.write_all(&chunk).is_err() {
                debug!(peer = %peer, "client disconnected mid-stream");
                return;
            }
            offset += chunk.len();
        }
        match state {
            ReadState::Producing => continue,
            ReadState::Complete => {
                if offset >= entry.body().len() {
                    break;
                }
            }
            ReadState::Failed(reason) => {
                // Abrupt close tells the client the message is unusable.
                debug!(peer = %peer, reason = ?reason, "entry failed, closing client");
                return;
            }
        }
    }
    let _ = stream.flush();
    debug!(peer = %peer, bytes = offset, "response served from cache");
}

/// Producer side: fetch from the origin, feeding the cache entry and the
/// producer's own client simultaneously.
fn produce_entry(
    mut client: TcpStream,
    entry: &Arc<CacheEntry>,
    head: &RequestHead,
    cache: &Arc<Cache>,
    peer: &str,
) {
    let mut origin = match upstream::connect_for(head) {
        Ok(stream) => stream,
        Err(err) => {
            warn!(peer = %peer, error = %err, "upstream connect failed");
            abort_entry(entry, cache);
            let canned = match err {
                UpstreamError::MissingAuthority => RESPONSE_BAD_REQUEST,
                _ => RESPONSE_BAD_GATEWAY,
            };
            let _ = client.write_all(canned);
            return;
        }
    };

    if let Err(err) = origin.write_all(&head.raw) {
        warn!(peer = %peer, error = %err, "failed to forward request upstream");
        abort_entry(entry, cache);
        let _ = client.write_all(RESPONSE_BAD_GATEWAY);
        return;
    }

    let mut client_ok = true;
    let mut sniffer = ResponseSniffer::new();
    let mut buf = [0u8; READ_BUF];
    loop {
        match origin.read(&mut buf) {
            Ok(0) => {
                if sniffer.is_truncated() {
                    warn!(peer = %peer, bytes = sniffer.bytes_seen(), "upstream closed before the full response");
                    abort_entry(entry, cache);
                } else {
                    entry.body().finalize();
                    debug!(peer = %peer, bytes = entry.body().len(), "response cached");
                }
                break;
            }
            Ok(n) => {
                sniffer.feed(&buf[..n]);
                if entry.body().append(&buf[..n]).is_err() {
                    // Buffer was fail-finalized underneath us (shutdown);
                    // stop pulling from the origin.
                    debug!(peer = %peer, "entry finalized externally, aborting transfer");
                    break;
                }
                if client_ok && client.write_all(&buf[..n]).is_err() {
                    // Our client left; other consumers still depend on
                    // the transfer, so keep filling the buffer.
                    client_ok = false;
                    debug!(peer = %peer, "producer client disconnected, transfer continues");
                }
            }
            Err(err) => {
                warn!(peer = %peer, error = %err, "upstream read failed");
                abort_entry(entry, cache);
                break;
            }
        }
    }

    if client_ok {
        let _ = client.flush();
    }
}

/// Fails the buffer so consumers drain, and unlinks this exact entry so
/// the next identical request opens a fresh upstream.
fn abort_entry(entry: &Arc<CacheEntry>, cache: &Arc<Cache>) {
    entry.body().fail(FailReason::Upstream);
    cache.remove(entry);
}

/// Non-cacheable request: byte-for-byte forwarding, no cache involvement.
fn forward_uncached(mut client: TcpStream, head: &RequestHead, peer: &str) {
    let mut origin = match upstream::connect_for(head) {
        Ok(stream) => stream,
        Err(err) => {
            warn!(peer = %peer, error = %err, "upstream connect failed");
            let canned = match err {
                UpstreamError::MissingAuthority => RESPONSE_BAD_REQUEST,
                _ => RESPONSE_BAD_GATEWAY,
            };
            let _ = client.write_all(canned);
            return;
        }
    };

    if origin.write_all(&head.raw).is_err() {
        let _ = client.write_all(RESPONSE_BAD_GATEWAY);
        return;
    }

    // Forward the rest of the request body, if the head promised one.
    let already_read = head.raw.len() - head.head_len;
    if head.content_length > already_read {
        let mut remaining = head.content_length - already_read;
        let mut buf = [0u8; READ_BUF];
        while remaining > 0 {
            let want = remaining.min(buf.len());
            match client.read(&mut buf[..want]) {
                Ok(0) => break,
                Ok(n) => {
                    if origin.write_all(&buf[..n]).is_err() {
                        let _ = client.write_all(RESPONSE_BAD_GATEWAY);
                        return;
                    }
                    remaining -= n;
                }
                Err(_) => return,
            }
        }
    }

    // Stream the response back until the origin closes.
    let mut total = 0usize;
    let mut buf = [0u8; READ_BUF];
    loop {
        match origin.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                if client.write_all(&buf[..n]).is_err() {
                    debug!(peer = %peer, "client disconnected during passthrough");
                    return;
                }
                total += n;
            }
            Err(err) => {
                warn!(peer = %peer, error = %err, "upstream read failed during passthrough");
                return;
            }
        }
    }
    let _ = client.flush();
    debug!(peer = %peer, bytes = total, "passthrough complete");
}
