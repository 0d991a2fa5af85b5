//! Cache key derivation.

use bytes::Bytes;

use crate::http::RequestHead;

/// Builds the cache fingerprint: the canonical request line (method and
/// target) plus the lowercased `Host` header, so identical URLs on
/// different virtual hosts never share an entry.
pub fn fingerprint(head: &RequestHead) -> Bytes {
    let host = head.host.as_deref().unwrap_or("");
    let mut buf = Vec::with_capacity(head.method.len() + head.target.len() + host.len() + 2);
    buf.extend_from_slice(head.method.as_bytes());
    buf.push(b' ');
    buf.extend_from_slice(head.target.as_bytes());
    buf.push(b'\n');
    buf.extend_from_slice(host.to_ascii_lowercase().as_bytes());
    Bytes::from(buf)
}
