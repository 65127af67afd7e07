//! Shared data model types (`spec.md` §3).

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::ids::{FrameId, ThreadId};

/// `{name, path}` where `name` is the basename of `path`; absent when both
/// are empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub name: String,
    pub path: String,
}

impl Source {
    pub fn from_path(path: impl AsRef<Path>) -> Option<Self> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return None;
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Some(Source {
            name,
            path: path.to_string_lossy().into_owned(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SymbolStatus {
    Skipped,
    Loaded,
    NotFound,
}

/// A loaded unit of managed code. Lifetime begins at module-load, ends at
/// module-unload or process exit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Module {
    pub id: String,
    pub name: String,
    pub path: PathBuf,
    pub symbol_status: SymbolStatus,
    pub base_address: u64,
    pub size: u64,
}

/// Breakpoint as rendered for responses and events, i.e. the wire shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderedBreakpoint {
    pub id: u32,
    pub verified: bool,
    pub message: Option<String>,
    pub source: Option<Source>,
    pub line: Option<u32>,
    pub hit_count: u64,
    pub condition: Option<String>,
    pub module: Option<String>,
    pub funcname: Option<String>,
    pub params: Option<String>,
}

impl RenderedBreakpoint {
    pub fn unresolved(id: u32, source: Source, line: u32, condition: Option<String>) -> Self {
        RenderedBreakpoint {
            id,
            verified: false,
            message: Some("No executable code of the debugger's target code type is associated with this line.".to_string()),
            source: Some(source),
            line: Some(line),
            hit_count: 0,
            condition,
            module: None,
            funcname: None,
            params: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameKind {
    Unknown,
    Native,
    ClrNative,
    ClrInternal,
    ClrManaged,
}

/// Synthesized by walking native frames on demand; `id` is allocated lazily
/// from the process-wide `FrameIdTable`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackFrame {
    #[serde(skip)]
    pub id: Option<FrameId>,
    pub name: String,
    pub source: Option<Source>,
    pub line: u32,
    pub column: u32,
    pub end_line: Option<u32>,
    pub end_column: Option<u32>,
    pub module_id: Option<String>,
    pub clr_addr: Option<u64>,
    pub native_addr: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoppedReason {
    Step,
    Breakpoint,
    Exception,
    Pause,
    Entry,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExceptionDetails {
    pub name: String,
    pub message: Option<String>,
    pub stage: String,
    pub category: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoppedEvent {
    pub reason: StoppedReason,
    pub thread_id: ThreadId,
    pub text: Option<String>,
    pub all_threads_stopped: bool,
    pub frame: Option<StackFrame>,
    pub breakpoint: Option<RenderedBreakpoint>,
    pub exception: Option<ExceptionDetails>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueKind {
    Scope,
    Class,
    Variable,
}

/// A stable handle to a live runtime value, owned by the variable reference
/// table and released when the table clears on resume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValueHandle(pub u64);

/// One named scope at a stack frame, e.g. "Locals" (`spec.md` §4.5
/// "Scopes").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scope {
    pub name: String,
    pub variables_reference: u64,
    pub named_variables: u32,
    pub indexed_variables: u32,
    pub expensive: bool,
}
