//! Background eviction of idle cache entries.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info};

use super::store::Shared;

const THREAD_NAME: &str = "evictor";
const MAX_SLEEP: Duration = Duration::from_secs(1);

/// Sleep between sweeps: half the TTL, capped at one second so shutdown
/// and short TTLs are both observed promptly.
pub(crate) fn sweep_interval(ttl: Duration) -> Duration {
    (ttl / 2).min(MAX_SLEEP).max(Duration::from_millis(1))
}

/// Spawns the evictor thread over the cache's shared state.
pub(crate) fn spawn(shared: Arc<Shared>) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(THREAD_NAME.to_string())
        .spawn(move || run(&shared))
}

fn run(shared: &Shared) {
    info!("cache evictor started");
    let interval = sweep_interval(shared.ttl());

    loop {
        {
            let mut stop = shared.stop.lock();
            if *stop {
                break;
            }
            // Timed condvar sleep: a shutdown notification wakes the
            // thread inside the interval instead of after it.
            let _ = shared.wake.wait_for(&mut stop, interval);
            if *stop {
                break;
            }
        }

        let removed = shared.sweep();
        if removed > 0 {
            debug!(removed, "eviction sweep removed expired entries");
        }
    }

    info!("cache evictor stopped");
}
