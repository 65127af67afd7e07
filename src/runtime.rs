//! The native CLR debug API contract.
//!
//! `spec.md` §1 explicitly puts "the native CLR debug API itself" out of
//! scope: this core only consumes its contract. `RuntimeApi` is that
//! contract, expressed as a trait so the rest of the crate can be exercised
//! against `mock::MockRuntime` without a live runtime.

use crate::error::Result;
use crate::ids::ThreadId;
use crate::model::{FrameKind, Module};

/// A resolved binding of a source line or function to a concrete
/// `(module, method, IL offset)` location (`spec.md` §GLOSSARY "Breakpoint
/// resolution").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedLocation {
    pub mod_address: u64,
    pub method_token: u32,
    pub il_offset: u32,
    pub fullname: String,
    pub linenum: u32,
}

/// Opaque handle to a native breakpoint installed in the runtime. At most
/// one of these exists per `(source file, line)` even when several logical
/// breakpoints share that location (`spec.md` §3 invariants).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeBreakpointHandle(pub u64);

#[derive(Debug, Clone)]
pub struct NativeFrameInfo {
    pub kind: FrameKind,
    pub function_name: String,
    pub fullname: Option<String>,
    pub line: u32,
    pub column: u32,
    pub module_id: Option<String>,
    pub clr_addr: Option<u64>,
    pub native_addr: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepType {
    StepIn,
    StepOver,
    StepOut,
}

/// One named scope at a stack frame (e.g. "Locals"), with its members
/// already resolved (`spec.md` §4.5 "Scopes").
#[derive(Debug, Clone)]
pub struct NativeScopeInfo {
    pub name: String,
    pub expensive: bool,
    pub children: Vec<crate::variables::Variable>,
}

/// Outcome of assigning to a variable or expression, in the same shape as
/// the value it produced (`spec.md` §4.5 "set variable"/"setExpression").
#[derive(Debug, Clone)]
pub struct SetVariableOutcome {
    pub value: String,
    pub type_name: String,
    pub variables_reference: Option<u64>,
}

/// The subset of the native debug API the core drives directly.
///
/// All methods are synchronous from the caller's point of view; a real
/// implementation backs them with blocking calls into the native API (the
/// core never holds its own locks across such a call, per `spec.md` §5).
pub trait RuntimeApi: Send + Sync {
    fn resolve_line(&self, module: &Module, fullname: &str, line: u32) -> Option<ResolvedLocation>;

    fn resolve_function(
        &self,
        module: &Module,
        name: &str,
        params: &str,
    ) -> Vec<ResolvedLocation>;

    fn entry_point(&self, module: &Module) -> Option<ResolvedLocation>;

    fn set_native_breakpoint(&self, loc: &ResolvedLocation) -> Result<NativeBreakpointHandle>;

    fn remove_native_breakpoint(&self, handle: NativeBreakpointHandle) -> Result<()>;

    fn suspend_process(&self) -> Result<()>;

    fn resume_process(&self, all_threads: bool) -> Result<()>;

    fn setup_step(&self, thread: ThreadId, step_type: StepType) -> Result<()>;

    fn walk_frames(
        &self,
        thread: ThreadId,
        low: u32,
        high: u32,
    ) -> Result<Vec<NativeFrameInfo>>;

    /// Schedule a managed function call on `thread`; the result is delivered
    /// later through the eval-completion callback (`spec.md` §4.7 "Eval
    /// queue"), not returned here.
    fn schedule_eval(&self, thread: ThreadId, expression: &str) -> Result<()>;

    /// Starts the debuggee and returns its pid (`spec.md` §4.5 "launch").
    fn launch(&self, program: &str, args: &[String]) -> Result<i32>;

    /// Attaches to an already-running process (`spec.md` §4.5 "attach").
    fn attach(&self, pid: i32) -> Result<()>;

    fn list_threads(&self) -> Result<Vec<ThreadId>>;

    /// Resolves every scope visible at `(thread, level)`, with its members
    /// already fetched (`spec.md` §4.5 "Scopes").
    fn get_scopes(&self, thread: ThreadId, level: crate::ids::FrameLevel) -> Result<Vec<NativeScopeInfo>>;

    /// Assigns to a variable reachable through `reference` by name
    /// (`spec.md` §4.5 "set variable").
    fn set_variable_by_reference(
        &self,
        reference: u64,
        name: &str,
        value: &str,
    ) -> Result<SetVariableOutcome>;

    /// Assigns to an arbitrary lvalue expression evaluated on `thread`
    /// (`spec.md` §4.5 "setExpression").
    fn set_expression(
        &self,
        thread: ThreadId,
        expression: &str,
        value: &str,
    ) -> Result<SetVariableOutcome>;
}

pub mod mock {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;

    /// An in-memory stand-in for the native runtime, used by this crate's
    /// own tests and suitable as a fixture for integration tests of the
    /// scenarios in `spec.md` §8.
    pub struct MockRuntime {
        /// module id -> (fullname:line) -> ResolvedLocation
        lines: Mutex<HashMap<String, HashMap<(String, u32), ResolvedLocation>>>,
        /// module id -> (name, params) -> Vec<ResolvedLocation>
        functions: Mutex<HashMap<String, HashMap<(String, String), Vec<ResolvedLocation>>>>,
        entries: Mutex<HashMap<String, ResolvedLocation>>,
        next_handle: AtomicU64,
        active_breakpoints: Mutex<Vec<NativeBreakpointHandle>>,
        suspended: Mutex<bool>,
        next_pid: AtomicU64,
        threads: Mutex<Vec<ThreadId>>,
        scopes: Mutex<HashMap<(i64, u32), Vec<NativeScopeInfo>>>,
    }

    impl Default for MockRuntime {
        fn default() -> Self {
            Self::new()
        }
    }

    impl MockRuntime {
        pub fn new() -> Self {
            MockRuntime {
                lines: Mutex::new(HashMap::new()),
                functions: Mutex::new(HashMap::new()),
                entries: Mutex::new(HashMap::new()),
                next_handle: AtomicU64::new(1),
                active_breakpoints: Mutex::new(Vec::new()),
                suspended: Mutex::new(false),
                next_pid: AtomicU64::new(1000),
                threads: Mutex::new(vec![ThreadId::new(1)]),
                scopes: Mutex::new(HashMap::new()),
            }
        }

        pub fn set_threads(&self, threads: Vec<ThreadId>) {
            *self.threads.lock().unwrap() = threads;
        }

        pub fn add_scope(&self, thread: ThreadId, level: crate::ids::FrameLevel, scope: NativeScopeInfo) {
            self.scopes
                .lock()
                .unwrap()
                .entry((thread.raw(), level.value()))
                .or_default()
                .push(scope);
        }

        pub fn add_line(&self, module_id: &str, fullname: &str, line: u32, loc: ResolvedLocation) {
            self.lines
                .lock()
                .unwrap()
                .entry(module_id.to_string())
                .or_default()
                .insert((fullname.to_string(), line), loc);
        }

        pub fn add_function(
            &self,
            module_id: &str,
            name: &str,
            params: &str,
            locs: Vec<ResolvedLocation>,
        ) {
            self.functions
                .lock()
                .unwrap()
                .entry(module_id.to_string())
                .or_default()
                .insert((name.to_string(), params.to_string()), locs);
        }

        pub fn add_entry_point(&self, module_id: &str, loc: ResolvedLocation) {
            self.entries.lock().unwrap().insert(module_id.to_string(), loc);
        }

        pub fn active_breakpoint_count(&self) -> usize {
            self.active_breakpoints.lock().unwrap().len()
        }

        pub fn is_suspended(&self) -> bool {
            *self.suspended.lock().unwrap()
        }
    }

    impl RuntimeApi for MockRuntime {
        fn resolve_line(
            &self,
            module: &Module,
            fullname: &str,
            line: u32,
        ) -> Option<ResolvedLocation> {
            self.lines
                .lock()
                .unwrap()
                .get(&module.id)
                .and_then(|m| m.get(&(fullname.to_string(), line)))
                .cloned()
        }

        fn resolve_function(
            &self,
            module: &Module,
            name: &str,
            params: &str,
        ) -> Vec<ResolvedLocation> {
            self.functions
                .lock()
                .unwrap()
                .get(&module.id)
                .and_then(|m| m.get(&(name.to_string(), params.to_string())))
                .cloned()
                .unwrap_or_default()
        }

        fn entry_point(&self, module: &Module) -> Option<ResolvedLocation> {
            self.entries.lock().unwrap().get(&module.id).cloned()
        }

        fn set_native_breakpoint(&self, _loc: &ResolvedLocation) -> Result<NativeBreakpointHandle> {
            let id = self.next_handle.fetch_add(1, Ordering::SeqCst);
            let handle = NativeBreakpointHandle(id);
            self.active_breakpoints.lock().unwrap().push(handle);
            Ok(handle)
        }

        fn remove_native_breakpoint(&self, handle: NativeBreakpointHandle) -> Result<()> {
            self.active_breakpoints.lock().unwrap().retain(|h| *h != handle);
            Ok(())
        }

        fn suspend_process(&self) -> Result<()> {
            *self.suspended.lock().unwrap() = true;
            Ok(())
        }

        fn resume_process(&self, _all_threads: bool) -> Result<()> {
            *self.suspended.lock().unwrap() = false;
            Ok(())
        }

        fn setup_step(&self, _thread: ThreadId, _step_type: StepType) -> Result<()> {
            Ok(())
        }

        fn walk_frames(&self, _thread: ThreadId, _low: u32, _high: u32) -> Result<Vec<NativeFrameInfo>> {
            Ok(Vec::new())
        }

        fn schedule_eval(&self, _thread: ThreadId, _expression: &str) -> Result<()> {
            Ok(())
        }

        fn launch(&self, _program: &str, _args: &[String]) -> Result<i32> {
            Ok(self.next_pid.fetch_add(1, Ordering::SeqCst) as i32)
        }

        fn attach(&self, _pid: i32) -> Result<()> {
            Ok(())
        }

        fn list_threads(&self) -> Result<Vec<ThreadId>> {
            Ok(self.threads.lock().unwrap().clone())
        }

        fn get_scopes(&self, thread: ThreadId, level: crate::ids::FrameLevel) -> Result<Vec<NativeScopeInfo>> {
            Ok(self
                .scopes
                .lock()
                .unwrap()
                .get(&(thread.raw(), level.value()))
                .cloned()
                .unwrap_or_default())
        }

        fn set_variable_by_reference(
            &self,
            reference: u64,
            _name: &str,
            value: &str,
        ) -> Result<SetVariableOutcome> {
            Ok(SetVariableOutcome {
                value: value.to_string(),
                type_name: String::new(),
                variables_reference: Some(reference),
            })
        }

        fn set_expression(
            &self,
            _thread: ThreadId,
            _expression: &str,
            value: &str,
        ) -> Result<SetVariableOutcome> {
            Ok(SetVariableOutcome {
                value: value.to_string(),
                type_name: String::new(),
                variables_reference: None,
            })
        }
    }
}
