//! Stdin ring buffer and line-oriented reading (`spec.md` §4.3 "IO
//! redirection").
//!
//! Grounded in `examples/original_source/src/utils/ioredirect.cpp`: input
//! written by the user arrives faster than the debuggee consumes it, so it
//! is held in a buffer split into three regions — bytes already handed to
//! the debuggee (`sent`), bytes currently being written (`in_flight`), and
//! bytes queued but not yet sent (`unsent`). The producer only ever grows
//! `staging`, appended under `inner`'s *read* lock so concurrent callers
//! never block each other; only compaction — which rewrites `sent`,
//! `in_flight` and `data` together — takes the write lock.

use std::sync::{Mutex, RwLock};

/// Byte buffer for stdin forwarding, tracking how much of its content has
/// been sent to the debuggee versus is still queued.
pub struct StdinRingBuffer {
    inner: RwLock<Inner>,
    /// Newly appended bytes not yet folded into `inner.data`. Guarded by its
    /// own mutex so appenders only ever need `inner`'s read lock.
    staging: Mutex<Vec<u8>>,
}

struct Inner {
    data: Vec<u8>,
    sent: usize,
    in_flight: usize,
}

impl Default for StdinRingBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl StdinRingBuffer {
    pub fn new() -> Self {
        StdinRingBuffer {
            inner: RwLock::new(Inner {
                data: Vec::new(),
                sent: 0,
                in_flight: 0,
            }),
            staging: Mutex::new(Vec::new()),
        }
    }

    /// Appends newly available input. Only needs a read lock on `inner`:
    /// the bytes land in `staging`, which compaction folds in under its own
    /// write lock.
    pub fn append(&self, bytes: &[u8]) {
        let _read_guard = self.inner.read().unwrap();
        self.staging.lock().unwrap().extend_from_slice(bytes);
    }

    fn fold_staging(inner: &mut Inner, staging: &Mutex<Vec<u8>>) {
        let mut staging = staging.lock().unwrap();
        if !staging.is_empty() {
            inner.data.append(&mut staging);
        }
    }

    /// Returns the next chunk of unsent bytes, marking it in-flight.
    pub fn take_unsent(&self) -> Vec<u8> {
        let mut inner = self.inner.write().unwrap();
        Self::fold_staging(&mut inner, &self.staging);
        let start = inner.sent + inner.in_flight;
        let chunk = inner.data[start..].to_vec();
        inner.in_flight += chunk.len();
        chunk
    }

    /// Marks `n` in-flight bytes as fully sent and compacts the buffer,
    /// dropping the now-unneeded `sent` prefix.
    pub fn mark_sent(&self, n: usize) {
        let mut inner = self.inner.write().unwrap();
        inner.sent += n;
        inner.in_flight = inner.in_flight.saturating_sub(n);
        if inner.sent > 0 {
            inner.data.drain(0..inner.sent);
            inner.sent = 0;
        }
    }

    pub fn unsent_len(&self) -> usize {
        let inner = self.inner.read().unwrap();
        let staged = self.staging.lock().unwrap().len();
        inner.data.len() - inner.sent - inner.in_flight + staged
    }
}

/// Outcome of reading one logical unit from an interactive input source
/// (`spec.md` §4.2 "CLI dialect" line reader).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineOutcome {
    Line(String),
    Interrupted,
    EndOfInput,
    IoError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_unsent_then_mark_sent_compacts_buffer() {
        let buf = StdinRingBuffer::new();
        buf.append(b"hello");
        assert_eq!(buf.unsent_len(), 5);

        let chunk = buf.take_unsent();
        assert_eq!(chunk, b"hello");
        assert_eq!(buf.unsent_len(), 0);

        buf.mark_sent(5);
        assert_eq!(buf.unsent_len(), 0);

        buf.append(b"world");
        assert_eq!(buf.unsent_len(), 5);
        assert_eq!(buf.take_unsent(), b"world");
    }

    #[test]
    fn partial_send_keeps_remainder_in_flight_not_unsent() {
        let buf = StdinRingBuffer::new();
        buf.append(b"abcdef");
        let chunk = buf.take_unsent();
        assert_eq!(chunk.len(), 6);
        // the 6 bytes were already taken for sending; partially
        // acknowledging them doesn't make any of them "unsent" again.
        buf.mark_sent(3);
        assert_eq!(buf.unsent_len(), 0);

        buf.append(b"xyz");
        assert_eq!(buf.unsent_len(), 3);
    }
}
