//! Debugger events and their dialect-specific text escaping
//! (`spec.md` §4.6 "Events", §7 "Escaping").
//!
//! Grounded in `examples/jcn363-AI_IDE`'s `rust-ai-ide-debugger` MI
//! formatting helpers for the overall escape-on-render approach, and in
//! `examples/original_source/src/protocols/miprotocol.h`
//! (`EscapeMIValue`) plus the JSON escaping in
//! `examples/original_source/src/protocols/vscodeprotocol.cpp`'s VS Code
//! protocol glue for the exact character tables.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::model::{Module, RenderedBreakpoint, StoppedEvent};

/// Every event the core can emit, before dialect-specific rendering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DebuggerEvent {
    Stopped(StoppedEvent),
    Continued { all_threads: bool },
    Exited { exit_code: i32 },
    Terminated,
    ThreadStarted { thread_id: i64 },
    ThreadExited { thread_id: i64 },
    ModuleLoaded(Module),
    BreakpointChanged(RenderedBreakpoint),
    Output { category: String, text: String },
}

/// Assigns each emitted event a strictly increasing sequence number, shared
/// across dialects so that interleaved MI/DAP/CLI output remains orderable
/// (`spec.md` §4.6 invariant: "events carry monotonic sequence numbers").
#[derive(Default)]
pub struct EventSequencer {
    next: AtomicU64,
}

impl EventSequencer {
    pub fn new() -> Self {
        EventSequencer {
            next: AtomicU64::new(1),
        }
    }

    pub fn next_seq(&self) -> u64 {
        self.next.fetch_add(1, Ordering::SeqCst)
    }
}

/// Escapes a string for embedding inside a GDB/MI quoted value: backslash
/// and double-quote are escaped, and control characters are rendered as
/// `\n`, `\t`, `\r` or `\xHH`.
pub fn escape_mi(input: &str) -> String {
    let mut out = String::with_capacity(input.len() + 8);
    for ch in input.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\{:03o}", c as u32)),
            c => out.push(c),
        }
    }
    out
}

/// Escapes a string per JSON string-literal rules (`spec.md` §7), used when
/// rendering DAP event/response bodies by hand rather than through
/// `serde_json` (e.g. when embedding pre-rendered text into a larger
/// payload).
pub fn escape_json(input: &str) -> String {
    let mut out = String::with_capacity(input.len() + 8);
    for ch in input.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\u{8}' => out.push_str("\\b"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\u{c}' => out.push_str("\\f"),
            '\r' => out.push_str("\\r"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_numbers_are_monotonic() {
        let seq = EventSequencer::new();
        let a = seq.next_seq();
        let b = seq.next_seq();
        assert!(b > a);
    }

    #[test]
    fn mi_escaping_handles_quotes_and_control_chars() {
        assert_eq!(escape_mi("a\"b\\c\nd"), "a\\\"b\\\\c\\nd");
        assert_eq!(escape_mi("\x01"), "\\001");
    }

    #[test]
    fn json_escaping_handles_quotes_and_control_chars() {
        assert_eq!(escape_json("a\"b\\c\nd"), "a\\\"b\\\\c\\nd");
        assert_eq!(escape_json("\x01"), "\\u0001");
    }
}
