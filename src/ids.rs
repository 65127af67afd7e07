//! Strongly typed scalar identifiers (`spec.md` §3).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

/// Identifies a debuggee thread. `Invalid` and `AllThreads` are sentinels;
/// all other values come from the runtime API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ThreadId(i64);

impl ThreadId {
    pub const INVALID_RAW: i64 = -1;
    pub const ALL_THREADS_RAW: i64 = -2;

    pub fn invalid() -> Self {
        ThreadId(Self::INVALID_RAW)
    }

    pub fn all_threads() -> Self {
        ThreadId(Self::ALL_THREADS_RAW)
    }

    pub fn new(raw: i64) -> Self {
        ThreadId(raw)
    }

    pub fn raw(self) -> i64 {
        self.0
    }

    pub fn is_valid(self) -> bool {
        self != Self::invalid() && self != Self::all_threads()
    }
}

impl std::fmt::Display for ThreadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Non-negative stack depth; 0 is the innermost frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameLevel(u32);

impl FrameLevel {
    pub fn new(level: u32) -> Self {
        FrameLevel(level)
    }

    pub fn value(self) -> u32 {
        self.0
    }
}

/// Opaque per-stop handle mapping to `(ThreadId, FrameLevel)`.
///
/// The backing table (`FrameIdTable`) is cleared on every resume so that ids
/// from a previous stop are never valid after continuation (`spec.md` §3
/// invariants, §5.c).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameId(u32);

impl FrameId {
    pub fn raw(self) -> u32 {
        self.0
    }

    /// Reconstructs a `FrameId` from the integer a wire dialect handed back
    /// to us (e.g. DAP's `frameId` argument). The table treats any raw value
    /// it never allocated as simply unresolved, same as a stale id.
    pub fn from_raw(raw: u32) -> Self {
        FrameId(raw)
    }
}

impl std::fmt::Display for FrameId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Process-wide table mapping `FrameId -> (ThreadId, FrameLevel)`.
///
/// An arena+index pattern per `spec.md` §9 "Ownership patterns to
/// re-architect": avoids lifetime entanglement with live runtime frame
/// handles by allocating opaque generation-scoped integer ids instead.
#[derive(Default)]
pub struct FrameIdTable {
    next: AtomicU32,
    entries: Mutex<HashMap<u32, (ThreadId, FrameLevel)>>,
}

impl FrameIdTable {
    pub fn new() -> Self {
        Self {
            next: AtomicU32::new(1),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Allocate (or look up) the `FrameId` for `(thread, level)` at the
    /// current stop. Re-requesting the same pair within the same stop
    /// returns the same id, matching "Frame identity stable within a stop"
    /// (`spec.md` §2 item 8).
    pub fn allocate(&self, thread: ThreadId, level: FrameLevel) -> FrameId {
        let mut entries = self.entries.lock().unwrap();
        if let Some((&id, _)) = entries.iter().find(|(_, v)| **v == (thread, level)) {
            return FrameId(id);
        }
        let id = self.next.fetch_add(1, Ordering::SeqCst);
        entries.insert(id, (thread, level));
        FrameId(id)
    }

    pub fn resolve(&self, id: FrameId) -> Option<(ThreadId, FrameLevel)> {
        self.entries.lock().unwrap().get(&id.0).copied()
    }

    /// Invalidate all outstanding frame ids. Called on every resume
    /// (`spec.md` §3 invariants, §4.6 `Continue`).
    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_is_stable_within_a_stop() {
        let table = FrameIdTable::new();
        let a = table.allocate(ThreadId::new(1), FrameLevel::new(0));
        let b = table.allocate(ThreadId::new(1), FrameLevel::new(0));
        assert_eq!(a, b);
        let c = table.allocate(ThreadId::new(1), FrameLevel::new(1));
        assert_ne!(a, c);
    }

    #[test]
    fn clear_invalidates_all_ids() {
        let table = FrameIdTable::new();
        let a = table.allocate(ThreadId::new(1), FrameLevel::new(0));
        table.clear();
        assert!(table.resolve(a).is_none());
    }

    #[test]
    fn sentinels_are_distinct() {
        assert_ne!(ThreadId::invalid(), ThreadId::all_threads());
        assert!(!ThreadId::invalid().is_valid());
        assert!(!ThreadId::all_threads().is_valid());
        assert!(ThreadId::new(42).is_valid());
    }
}
