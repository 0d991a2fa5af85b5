//! Streaming message buffer: single producer, many blocking consumers.

use bytes::Bytes;
use parking_lot::{Condvar, Mutex};


/// Why a message was aborted before completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailReason {
    /// The origin connection broke or returned a truncated response.
    Upstream,
    /// The proxy is shutting down while the transfer was in flight.
    Shutdown,
}

/// Observable state of a message buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadState {
    Producing,
    Complete,
    Failed(FailReason),
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum MessageError {
    #[error("message already finalized")]
    AlreadyFinalized,
}

struct Inner {
    data: Vec<u8>,
    state: ReadState,
}

/// One HTTP message being received from upstream and fanned out to any
/// number of clients. The buffer only grows, and once `Complete` or
/// `Failed` is reached it never mutates again, so a consumer can safely
/// snapshot `(offset, available)` and copy outside the lock.
pub struct MessageBuffer {
    inner: Mutex<Inner>,
    grown: Condvar,
}

impl MessageBuffer {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                data: Vec::new(),
                state: ReadState::Producing,
            }),
            grown: Condvar::new(),
        }
    }

    /// Appends bytes to the message. Producer-only.
    pub fn append(&self, chunk: &[u8]) -> Result<(), MessageError> {
        {
            let mut inner = self.inner.lock();
            if inner.state != ReadState::Producing {
                return Err(MessageError::AlreadyFinalized);
            }
            inner.data.extend_from_slice(chunk);
        }
        self.grown.notify_all();
        Ok(())
    }

    /// Marks the message complete. Idempotent, not reversible; a no-op on
    /// an already-failed buffer.
    pub fn finalize(&self) {
        {
            let mut inner = self.inner.lock();
            if inner.state != ReadState::Producing {
                return;
            }
            inner.state = ReadState::Complete;
        }
        self.grown.notify_all();
    }

    /// Marks the message failed so every consumer unblocks and drains.
    /// A no-op on an already-complete buffer.
    pub fn fail(&self, reason: FailReason) {
        {
            let mut inner = self.inner.lock();
            if inner.state != ReadState::Producing {
                return;
            }
            inner.state = ReadState::Failed(reason);
        }
        self.grown.notify_all();
    }

    /// Returns all bytes available from `offset` onward together with the
    /// state observed at that moment. Blocks while there is nothing new
    /// past `offset` and the producer is still running.
    pub fn read_from(&self, offset: usize) -> (Bytes, ReadState) {
        let mut inner = self.inner.lock();
        loop {
            if offset < inner.data.len() {
                let chunk = Bytes::copy_from_slice(&inner.data[offset..]);
                return (chunk, inner.state);
            }
            match inner.state {
                ReadState::Producing => self.grown.wait(&mut inner),
                state => return (Bytes::new(), state),
            }
        }
    }

    /// Current number of buffered bytes.
    pub fn len(&self) -> usize {
        self.inner.lock().data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current state without touching the data.
    pub fn state(&self) -> ReadState {
        self.inner.lock().state
    }
}

impl Default for MessageBuffer {
    fn default() -> Self {
        Self::new()
    }
}
