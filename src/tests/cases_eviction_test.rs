// Integration tests for TTL-based eviction through the full proxy.

use std::thread;
use std::time::Duration;

use crate::tests::support::{body_of, http_get, payload, test_config, Origin, RunningProxy};

/// TTL expiry: after the entry idles past the TTL the evictor removes it,
/// and the next identical request goes upstream again.
#[test]
fn test_ttl_expiry_refetches_from_upstream() {
    let body = payload(256);
    let origin = Origin::start(body.clone());

    let mut cfg = test_config();
    cfg.cache_ttl = Duration::from_millis(200);
    let proxy = RunningProxy::start(cfg);

    let first = http_get(proxy.addr, origin.addr(), "/ttl").unwrap();
    assert_eq!(body_of(&first), &body[..]);
    assert_eq!(origin.hits(), 1);

    // TTL 200ms, sweep interval 100ms: the entry must be gone well
    // before 400ms of idleness.
    proxy.await_cache_len(0, Duration::from_millis(600));

    let second = http_get(proxy.addr, origin.addr(), "/ttl").unwrap();
    assert_eq!(body_of(&second), &body[..]);
    assert_eq!(origin.hits(), 2, "expiry must force a fresh upstream fetch");

    proxy.stop();
}

/// An entry that keeps being requested stays cached across many sweep
/// intervals.
#[test]
fn test_active_entry_survives_ttl_sweeps() {
    let body = payload(128);
    let origin = Origin::start(body.clone());

    let mut cfg = test_config();
    cfg.cache_ttl = Duration::from_millis(300);
    let proxy = RunningProxy::start(cfg);

    http_get(proxy.addr, origin.addr(), "/hot").unwrap();

    // Re-request every 100ms for a full second; each hit refreshes the
    // last-access stamp.
    for _ in 0..10 {
        thread::sleep(Duration::from_millis(100));
        let response = http_get(proxy.addr, origin.addr(), "/hot").unwrap();
        assert_eq!(body_of(&response), &body[..]);
    }

    assert_eq!(origin.hits(), 1, "a hot entry must never be refetched");
    assert_eq!(proxy.cache().len(), 1);

    proxy.stop();
}
