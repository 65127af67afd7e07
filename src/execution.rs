//! Process execution state machine and stepping (`spec.md` §4.5 "Execution
//! control", §4.6 "Async stepper").
//!
//! Grounded in `examples/original_source/src/debugger/manageddebugger.h`
//! for the `NotStarted -> Running -> Paused -> Exited` state machine and in
//! `examples/original_source/src/debugger/stepper_async.h` for the
//! two-phase async stepper: a step that begins inside an `async`/`await`
//! state machine installs a breakpoint at the method's current yield IL
//! offset tagged with a correlation id; when that breakpoint is hit and the
//! id matches, the stepper switches to a breakpoint at the resume offset
//! instead of completing immediately, so that only the step that actually
//! lands back in user code reports `Stopped(Step)`.

use std::sync::{Arc, Condvar, Mutex};

use log::info;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;

use crate::error::{DebuggerError, Result};
use crate::ids::ThreadId;
use crate::runtime::{NativeBreakpointHandle, ResolvedLocation, RuntimeApi, StepType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    NotStarted,
    Running,
    Paused,
    Exited,
}

/// Which phase of the async step protocol is currently installed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AsyncStepPhase {
    AwaitingYield,
    AwaitingResume,
}

struct AsyncStep {
    async_id: u64,
    phase: AsyncStepPhase,
    yield_breakpoint: NativeBreakpointHandle,
    resume_breakpoint: Option<NativeBreakpointHandle>,
    wait_completion_breakpoint: Option<NativeBreakpointHandle>,
}

struct Inner {
    state: ProcessState,
    pid: Option<i32>,
    active_step: Option<AsyncStep>,
}

/// Owns the process lifecycle state and the stepper. A single mutex guards
/// both because a step transition and a state transition must never be
/// observed independently (`spec.md` §5 lock-ordering: state-mutex is
/// acquired after breakpoints-mutex and before eval-mutex).
pub struct ExecutionController {
    inner: Mutex<Inner>,
    condvar: Condvar,
}

impl Default for ExecutionController {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionController {
    pub fn new() -> Self {
        ExecutionController {
            inner: Mutex::new(Inner {
                state: ProcessState::NotStarted,
                pid: None,
                active_step: None,
            }),
            condvar: Condvar::new(),
        }
    }

    pub fn state(&self) -> ProcessState {
        self.inner.lock().unwrap().state
    }

    pub fn mark_started(&self, pid: i32) {
        let mut inner = self.inner.lock().unwrap();
        inner.state = ProcessState::Running;
        inner.pid = Some(pid);
        self.condvar.notify_all();
    }

    pub fn mark_exited(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.state = ProcessState::Exited;
        inner.active_step = None;
        self.condvar.notify_all();
    }

    fn require_attached(&self, inner: &Inner) -> Result<()> {
        match inner.state {
            ProcessState::NotStarted | ProcessState::Exited => {
                Err(DebuggerError::no_process("no debuggee is attached"))
            }
            _ => Ok(()),
        }
    }

    /// `spec.md` §4.5 "Continue": transitions to Running and invalidates
    /// every frame and variable reference (callers must also clear the
    /// frame and variable tables; that invalidation is not this type's
    /// responsibility so it stays decoupled from the runtime handle).
    pub fn resume(&self, runtime: &dyn RuntimeApi, all_threads: bool) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        self.require_attached(&inner)?;
        inner.active_step = None;
        runtime.resume_process(all_threads)?;
        inner.state = ProcessState::Running;
        self.condvar.notify_all();
        Ok(())
    }

    /// `spec.md` §4.5 "Pause": sends `SIGINT` to the debuggee process group
    /// the same way an interactive Ctrl-C would, then suspends via the
    /// runtime API.
    pub fn pause(&self, runtime: &dyn RuntimeApi) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        self.require_attached(&inner)?;
        if let Some(pid) = inner.pid {
            signal::kill(Pid::from_raw(pid), Signal::SIGINT)
                .map_err(|e| DebuggerError::runtime_failure(0x8000_0010, e.to_string()))?;
        }
        runtime.suspend_process()?;
        inner.state = ProcessState::Paused;
        self.condvar.notify_all();
        Ok(())
    }

    /// A plain (non-async-aware) step: a single `setup_step` call whose
    /// completion is reported as-is (`spec.md` §4.5 "Step").
    pub fn step(&self, runtime: &dyn RuntimeApi, thread: ThreadId, kind: StepType) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        self.require_attached(&inner)?;
        inner.active_step = None;
        runtime.setup_step(thread, kind)?;
        inner.state = ProcessState::Running;
        self.condvar.notify_all();
        Ok(())
    }

    /// Begins an async-aware step: install a breakpoint at `yield_loc`
    /// tagged with `async_id`, optionally also at
    /// `NotifyDebuggerOfWaitCompletion` (`wait_completion_loc`) for a
    /// step-out that needs to catch re-entry across an await boundary.
    pub fn begin_async_step(
        &self,
        runtime: &dyn RuntimeApi,
        thread: ThreadId,
        async_id: u64,
        yield_loc: &ResolvedLocation,
        wait_completion_loc: Option<&ResolvedLocation>,
    ) -> Result<()> {
        let yield_breakpoint = runtime.set_native_breakpoint(yield_loc)?;
        let wait_completion_breakpoint = match wait_completion_loc {
            Some(loc) => Some(runtime.set_native_breakpoint(loc)?),
            None => None,
        };

        let mut inner = self.inner.lock().unwrap();
        self.require_attached(&inner)?;
        inner.active_step = Some(AsyncStep {
            async_id,
            phase: AsyncStepPhase::AwaitingYield,
            yield_breakpoint,
            resume_breakpoint: None,
            wait_completion_breakpoint,
        });
        drop(inner);

        runtime.setup_step(thread, StepType::StepOver)?;
        info!("began async step, async_id={async_id}");
        Ok(())
    }

    /// Called when the yield breakpoint fires. If `hit_async_id` matches
    /// the step in progress, switches to the resume-offset phase instead of
    /// completing; otherwise the hit is unrelated to this step and the
    /// caller should treat it as an ordinary breakpoint hit.
    ///
    /// Returns `true` when the phase transition happened (caller must not
    /// yet report `Stopped(Step)`).
    pub fn on_yield_breakpoint_hit(
        &self,
        runtime: &dyn RuntimeApi,
        hit_async_id: u64,
        resume_loc: &ResolvedLocation,
    ) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap();
        let matches = matches!(
            &inner.active_step,
            Some(step) if step.async_id == hit_async_id && step.phase == AsyncStepPhase::AwaitingYield
        );
        if !matches {
            return Ok(false);
        }

        let yield_breakpoint = inner.active_step.as_ref().unwrap().yield_breakpoint;
        drop(inner);
        runtime.remove_native_breakpoint(yield_breakpoint)?;
        let resume_breakpoint = runtime.set_native_breakpoint(resume_loc)?;

        let mut inner = self.inner.lock().unwrap();
        if let Some(step) = &mut inner.active_step {
            step.phase = AsyncStepPhase::AwaitingResume;
            step.resume_breakpoint = Some(resume_breakpoint);
        }
        Ok(true)
    }

    /// Called when the resume breakpoint fires. Returns `true` when this
    /// hit completes the step (caller should now report `Stopped(Step)`
    /// and tear the step state down).
    pub fn on_resume_breakpoint_hit(&self, runtime: &dyn RuntimeApi, hit_async_id: u64) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap();
        let completes = matches!(
            &inner.active_step,
            Some(step) if step.async_id == hit_async_id && step.phase == AsyncStepPhase::AwaitingResume
        );
        if completes {
            if let Some(step) = inner.active_step.take() {
                drop(inner);
                if let Some(h) = step.resume_breakpoint {
                    runtime.remove_native_breakpoint(h)?;
                }
                if let Some(h) = step.wait_completion_breakpoint {
                    runtime.remove_native_breakpoint(h)?;
                }
            }
        }
        Ok(completes)
    }

    /// Blocks until the process leaves `Running`, used by synchronous CLI
    /// commands that wait for the next stop (`spec.md` §4.2 "CLI dialect").
    pub fn wait_while_running(&self, arc: &Arc<Self>) -> ProcessState {
        let inner = arc.inner.lock().unwrap();
        let (inner, _) = arc
            .condvar
            .wait_timeout_while(inner, std::time::Duration::from_secs(15), |i| {
                i.state == ProcessState::Running
            })
            .unwrap();
        inner.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::mock::MockRuntime;

    fn loc(line: u32) -> ResolvedLocation {
        ResolvedLocation {
            mod_address: 0,
            method_token: 1,
            il_offset: 0,
            fullname: "/src/main.cs".to_string(),
            linenum: line,
        }
    }

    #[test]
    fn resume_transitions_to_running_and_clears_active_step() {
        let ctl = ExecutionController::new();
        ctl.mark_started(1234);
        let runtime = MockRuntime::new();
        ctl.begin_async_step(&runtime, ThreadId::new(1), 1, &loc(10), None).unwrap();
        ctl.resume(&runtime, true).unwrap();
        assert_eq!(ctl.state(), ProcessState::Running);
        // active step was cleared, so a hit against the old async id no
        // longer matches anything.
        assert!(!ctl.on_yield_breakpoint_hit(&runtime, 1, &loc(20)).unwrap());
    }

    #[test]
    fn no_process_rejects_resume() {
        let ctl = ExecutionController::new();
        let runtime = MockRuntime::new();
        assert!(ctl.resume(&runtime, true).is_err());
    }

    #[test]
    fn async_step_only_completes_on_matching_resume_hit() {
        let ctl = ExecutionController::new();
        ctl.mark_started(1);
        let runtime = MockRuntime::new();
        let thread = ThreadId::new(1);

        ctl.begin_async_step(&runtime, thread, 77, &loc(10), None).unwrap();

        // unrelated async id: no transition
        assert!(!ctl.on_yield_breakpoint_hit(&runtime, 99, &loc(20)).unwrap());
        // matching: transitions to resume phase
        assert!(ctl.on_yield_breakpoint_hit(&runtime, 77, &loc(20)).unwrap());
        // resume hit with wrong id does not complete
        assert!(!ctl.on_resume_breakpoint_hit(&runtime, 1).unwrap());
        // resume hit with matching id completes
        assert!(ctl.on_resume_breakpoint_hit(&runtime, 77).unwrap());
    }
}
