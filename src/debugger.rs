//! The `Debugger` facade: the stable capability surface all three wire
//! dialects drive (`spec.md` §4.5).
//!
//! Grounded in `examples/jcn363-AI_IDE`'s `rust-ai-ide-debugger` facade
//! struct for the "one object owns every subsystem, dialects only see
//! this" shape; internals are grounded per-subsystem in their own modules.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use log::info;
use tokio::sync::mpsc::UnboundedSender;

use crate::breakpoints::{
    BreakpointEngine, ExceptionBreakMode, FunctionBreakpointSpec, SourceBreakpointSpec,
};
use crate::error::{DebuggerError, Result};
use crate::eval::{EvalQueue, EvalResult};
use crate::events::{DebuggerEvent, EventSequencer};
use crate::execution::{ExecutionController, ProcessState};
use crate::frames::FrameWalker;
use crate::ids::{FrameId, FrameLevel, ThreadId};
use crate::model::{Module, RenderedBreakpoint, Scope, StackFrame, StoppedEvent, StoppedReason};
use crate::runtime::{RuntimeApi, SetVariableOutcome, StepType};
use crate::variables::{Variable, VariableTable, VariablesFilter};

/// Everything a wire dialect needs to drive one debug session.
pub struct Debugger {
    runtime: Arc<dyn RuntimeApi>,
    breakpoints: BreakpointEngine,
    execution: Arc<ExecutionController>,
    frames: FrameWalker,
    variables: VariableTable,
    eval: EvalQueue,
    events: EventSequencer,
    modules: Mutex<Vec<Module>>,
    stop_at_entry: bool,
    next_eval_seq: AtomicU64,
    event_sink: Mutex<Option<UnboundedSender<DebuggerEvent>>>,
}

impl Debugger {
    pub fn new(runtime: Arc<dyn RuntimeApi>, stop_at_entry: bool) -> Self {
        Debugger {
            runtime,
            breakpoints: BreakpointEngine::new(),
            execution: Arc::new(ExecutionController::new()),
            frames: FrameWalker::new(),
            variables: VariableTable::new(),
            eval: EvalQueue::new(),
            events: EventSequencer::new(),
            modules: Mutex::new(Vec::new()),
            stop_at_entry,
            next_eval_seq: AtomicU64::new(1),
            event_sink: Mutex::new(None),
        }
    }

    pub fn event_sequencer(&self) -> &EventSequencer {
        &self.events
    }

    /// Registers the channel events are forwarded to. Set once, after
    /// construction, so callers can build the `Debugger` before they have a
    /// running event loop to drain it (`spec.md` §4.6 "Events").
    pub fn set_event_sink(&self, sink: UnboundedSender<DebuggerEvent>) {
        *self.event_sink.lock().unwrap() = Some(sink);
    }

    fn emit(&self, event: DebuggerEvent) {
        if let Some(sink) = self.event_sink.lock().unwrap().as_ref() {
            let _ = sink.send(event);
        }
    }

    pub fn state(&self) -> ProcessState {
        self.execution.state()
    }

    pub fn on_launched(&self, pid: i32) {
        info!("debuggee started, pid={pid}");
        self.execution.mark_started(pid);
    }

    /// Starts the debuggee via the runtime API and reports it as launched
    /// (`spec.md` §4.5 "launch").
    pub fn launch(&self, program: &str, args: &[String]) -> Result<i32> {
        let pid = self.runtime.launch(program, args)?;
        self.on_launched(pid);
        Ok(pid)
    }

    /// Attaches to an already-running process (`spec.md` §4.5 "attach").
    pub fn attach(&self, pid: i32) -> Result<()> {
        self.runtime.attach(pid)?;
        self.on_launched(pid);
        Ok(())
    }

    pub fn threads(&self) -> Result<Vec<ThreadId>> {
        self.runtime.list_threads()
    }

    /// `spec.md` §4.5 "Scopes": allocates a variables-reference for each
    /// scope's children and reports a `namedVariables` count alongside it.
    pub fn scopes(&self, thread: ThreadId, level: FrameLevel) -> Result<Vec<Scope>> {
        if self.execution.state() != ProcessState::Paused {
            return Err(DebuggerError::wrong_state("process is not paused"));
        }
        let native_scopes = self.runtime.get_scopes(thread, level)?;
        Ok(native_scopes
            .into_iter()
            .map(|scope| {
                let named = scope.children.iter().filter(|v| v.indexed_count == 0).count() as u32;
                let indexed = scope.children.iter().filter(|v| v.indexed_count > 0).count() as u32;
                let reference = self.variables.register(crate::model::ValueKind::Scope, scope.children);
                Scope {
                    name: scope.name,
                    variables_reference: reference,
                    named_variables: named,
                    indexed_variables: indexed,
                    expensive: scope.expensive,
                }
            })
            .collect())
    }

    /// Assigns to a variable reachable through `reference` by name
    /// (`spec.md` §4.5 "set variable").
    pub fn set_variable(&self, reference: u64, name: &str, value: &str) -> Result<SetVariableOutcome> {
        if self.execution.state() != ProcessState::Paused {
            return Err(DebuggerError::wrong_state("process is not paused"));
        }
        self.runtime.set_variable_by_reference(reference, name, value)
    }

    /// Assigns to an arbitrary lvalue expression (`spec.md` §4.5
    /// "setExpression").
    pub fn set_expression(&self, thread: ThreadId, expression: &str, value: &str) -> Result<SetVariableOutcome> {
        if self.execution.state() != ProcessState::Paused {
            return Err(DebuggerError::wrong_state("process is not paused"));
        }
        self.runtime.set_expression(thread, expression, value)
    }

    /// Invokes a type's static constructor lazily before reading its static
    /// members, through the same eval queue as [`Debugger::evaluate`]
    /// (`spec.md` §4.7 "Evaluate").
    pub async fn run_class_constructor(&self, thread: ThreadId, type_name: &str) -> Result<EvalResult> {
        if self.execution.state() != ProcessState::Paused {
            return Err(DebuggerError::wrong_state("process is not paused"));
        }
        let rx = self.eval.enqueue(thread);
        self.runtime
            .schedule_eval(thread, &format!("__RunClassConstructor__({type_name})"))?;
        rx.await.map_err(|_| DebuggerError::cancelled("eval channel closed"))?
    }

    /// Suppresses finalization for an object, through the same eval queue as
    /// [`Debugger::evaluate`] (`spec.md` §4.7 "Evaluate").
    pub async fn suppress_finalize(&self, thread: ThreadId, object_expr: &str) -> Result<()> {
        if self.execution.state() != ProcessState::Paused {
            return Err(DebuggerError::wrong_state("process is not paused"));
        }
        let rx = self.eval.enqueue(thread);
        self.runtime
            .schedule_eval(thread, &format!("__SuppressFinalize__({object_expr})"))?;
        rx.await.map_err(|_| DebuggerError::cancelled("eval channel closed"))??;
        Ok(())
    }

    pub fn on_module_loaded(&self, module: Module) -> (Vec<RenderedBreakpoint>, Vec<u32>) {
        let (changed_src, changed_fn) =
            self.breakpoints
                .on_module_loaded(module.clone(), self.stop_at_entry, self.runtime.as_ref());
        self.emit(DebuggerEvent::ModuleLoaded(module.clone()));
        self.modules.lock().unwrap().push(module);
        (changed_src, changed_fn)
    }

    pub fn on_process_exited(&self, exit_code: i32) {
        self.execution.mark_exited();
        self.frames.invalidate();
        self.variables.clear();
        self.eval.cancel_all();
        self.emit(DebuggerEvent::Exited { exit_code });
    }

    fn invalidate_stop_state(&self) {
        self.frames.invalidate();
        self.variables.clear();
        self.eval.cancel_all();
    }

    pub fn continue_(&self, all_threads: bool) -> Result<()> {
        self.invalidate_stop_state();
        self.execution.resume(self.runtime.as_ref(), all_threads)?;
        self.emit(DebuggerEvent::Continued { all_threads });
        Ok(())
    }

    pub fn pause(&self) -> Result<()> {
        self.execution.pause(self.runtime.as_ref())?;
        self.emit(DebuggerEvent::Stopped(StoppedEvent {
            reason: StoppedReason::Pause,
            thread_id: ThreadId::all_threads(),
            text: None,
            all_threads_stopped: true,
            frame: None,
            breakpoint: None,
            exception: None,
        }));
        Ok(())
    }

    pub fn step(&self, thread: ThreadId, kind: StepType) -> Result<()> {
        self.invalidate_stop_state();
        self.execution.step(self.runtime.as_ref(), thread, kind)?;
        self.emit(DebuggerEvent::Continued { all_threads: false });
        Ok(())
    }

    pub fn stack_trace(&self, thread: ThreadId, low: u32, high: u32) -> Result<Vec<StackFrame>> {
        if self.execution.state() != ProcessState::Paused {
            return Err(DebuggerError::wrong_state("process is not paused"));
        }
        let modules = self.modules.lock().unwrap().clone();
        self.frames.stack_trace(thread, low, high, &modules, self.runtime.as_ref())
    }

    pub fn resolve_frame(&self, id: FrameId) -> Option<(ThreadId, crate::ids::FrameLevel)> {
        self.frames.resolve(id)
    }

    pub fn get_variables(
        &self,
        reference: u64,
        filter: VariablesFilter,
        start: Option<u32>,
        count: Option<u32>,
    ) -> Result<Vec<Variable>> {
        self.variables.get_variables(reference, filter, start, count)
    }

    pub async fn evaluate(&self, thread: ThreadId, expression: &str) -> Result<EvalResult> {
        if self.execution.state() != ProcessState::Paused {
            return Err(DebuggerError::wrong_state("process is not paused"));
        }
        let rx = self.eval.enqueue(thread);
        self.runtime.schedule_eval(thread, expression)?;
        let _seq = self.next_eval_seq.fetch_add(1, Ordering::SeqCst);
        rx.await.map_err(|_| DebuggerError::cancelled("eval channel closed"))?
    }

    pub fn complete_eval(&self, thread: ThreadId, result: Result<EvalResult>) {
        self.eval.complete(thread, result);
    }

    pub fn set_source_breakpoints(
        &self,
        path: &str,
        specs: &[SourceBreakpointSpec],
    ) -> Vec<RenderedBreakpoint> {
        self.breakpoints.set_source_breakpoints(path, specs, self.runtime.as_ref())
    }

    pub fn set_function_breakpoints(&self, specs: &[FunctionBreakpointSpec]) -> Vec<RenderedBreakpoint> {
        self.breakpoints.set_function_breakpoints(specs, self.runtime.as_ref())
    }

    pub fn on_source_breakpoint_hit(
        &self,
        native: crate::runtime::NativeBreakpointHandle,
        condition_holds: impl Fn(&str) -> bool,
    ) -> Option<RenderedBreakpoint> {
        self.breakpoints.on_source_breakpoint_hit(native, condition_holds)
    }

    pub fn set_exception_breakpoint(&self, mode: ExceptionBreakMode, name: &str) -> (u32, Option<u32>) {
        self.breakpoints.insert_exception_breakpoint(mode, name)
    }

    pub fn delete_exception_breakpoint(&self, id: u32) -> bool {
        self.breakpoints.delete_exception_breakpoint(id)
    }

    pub fn exception_matches(
        &self,
        event: crate::breakpoints::ExceptionEventType,
        exception_name: &str,
        category: crate::breakpoints::ExceptionBreakCategory,
    ) -> bool {
        self.breakpoints.exceptions().matches(event, exception_name, category)
    }

    pub fn disconnect(&self, terminate_debuggee: bool) -> Result<()> {
        if terminate_debuggee && self.execution.state() != ProcessState::Exited {
            // The process-kill path belongs to the runtime API; this core
            // only tears down its own bookkeeping here.
            info!("disconnect requested termination of the debuggee");
        }
        self.invalidate_stop_state();
        self.emit(DebuggerEvent::Terminated);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::mock::MockRuntime;

    #[test]
    fn stack_trace_requires_paused_state() {
        let runtime = Arc::new(MockRuntime::new());
        let debugger = Debugger::new(runtime, false);
        let err = debugger.stack_trace(ThreadId::new(1), 0, 10).unwrap_err();
        assert!(matches!(err, DebuggerError::WrongState(_)));
    }

    #[tokio::test]
    async fn evaluate_requires_paused_state() {
        let runtime = Arc::new(MockRuntime::new());
        let debugger = Debugger::new(runtime, false);
        let err = debugger.evaluate(ThreadId::new(1), "1+1").await.unwrap_err();
        assert!(matches!(err, DebuggerError::WrongState(_)));
    }

    #[test]
    fn continue_invalidates_frame_and_variable_state() {
        let runtime = Arc::new(MockRuntime::new());
        let debugger = Debugger::new(runtime, false);
        debugger.on_launched(1234);
        let reference = debugger.variables.register(crate::model::ValueKind::Scope, vec![]);
        debugger.continue_(true).unwrap();
        assert!(debugger
            .get_variables(reference, VariablesFilter::Both, None, None)
            .is_err());
    }
}
