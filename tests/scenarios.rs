//! End-to-end scenarios from `spec.md` §8, exercised against
//! [`clr_debug_core::runtime::mock::MockRuntime`].

use std::sync::Arc;
use std::time::Duration;

use clr_debug_core::breakpoints::{
    ExceptionBreakCategory, ExceptionBreakMode, ExceptionEventType, ExceptionFilter,
    ExceptionFlags, SourceBreakpointSpec,
};
use clr_debug_core::dispatch::Dispatcher;
use clr_debug_core::model::{Module, SymbolStatus};
use clr_debug_core::runtime::mock::MockRuntime;
use clr_debug_core::runtime::ResolvedLocation;
use clr_debug_core::Debugger;

fn module(id: &str) -> Module {
    Module {
        id: id.to_string(),
        name: format!("{id}.dll"),
        path: std::path::PathBuf::from(format!("/bin/{id}.dll")),
        symbol_status: SymbolStatus::Loaded,
        base_address: 0x1000,
        size: 0x2000,
    }
}

fn loc(line: u32) -> ResolvedLocation {
    ResolvedLocation {
        mod_address: 0x1000,
        method_token: 1,
        il_offset: 0,
        fullname: "/p/Program.cs".to_string(),
        linenum: line,
    }
}

/// Scenario A: breakpoints set before any module is loaded come back
/// unverified, then verify once the owning module loads.
#[test]
fn scenario_a_breakpoint_resolution_across_module_load() {
    let runtime = Arc::new(MockRuntime::new());
    let debugger = Debugger::new(runtime.clone(), true);

    let initial = debugger.set_source_breakpoints(
        "/p/Program.cs",
        &[
            SourceBreakpointSpec { line: 10, condition: None },
            SourceBreakpointSpec { line: 20, condition: None },
        ],
    );
    assert_eq!(initial.len(), 2);
    assert!(initial.iter().all(|b| !b.verified));
    let ids: Vec<u32> = initial.iter().map(|b| b.id).collect();

    let m = module("Program");
    runtime.add_line(&m.id, "/p/Program.cs", 10, loc(10));
    runtime.add_line(&m.id, "/p/Program.cs", 20, loc(20));
    let (changed, _) = debugger.on_module_loaded(m);

    assert_eq!(changed.len(), 2);
    assert!(changed.iter().all(|b| b.verified));
    let changed_ids: Vec<u32> = changed.iter().map(|b| b.id).collect();
    assert_eq!(ids, changed_ids);
}

/// Scenario B: two breakpoints at the same line share a single native
/// installation and report a single hit through the smaller id.
#[test]
fn scenario_b_duplicate_source_breakpoints_deduplicate_natively() {
    let runtime = Arc::new(MockRuntime::new());
    let debugger = Debugger::new(runtime.clone(), false);
    let m = module("Program");
    runtime.add_line(&m.id, "/p/Program.cs", 10, loc(10));
    debugger.on_module_loaded(m);

    let rendered = debugger.set_source_breakpoints(
        "/p/Program.cs",
        &[
            SourceBreakpointSpec { line: 10, condition: None },
            SourceBreakpointSpec { line: 10, condition: None },
        ],
    );
    assert_eq!(rendered.len(), 2);
    assert_ne!(rendered[0].id, rendered[1].id);
    assert_eq!(runtime.active_breakpoint_count(), 1);

    let smallest = rendered.iter().map(|b| b.id).min().unwrap();
    let native = clr_debug_core::runtime::NativeBreakpointHandle(1);
    let hit = debugger.on_source_breakpoint_hit(native, |_| true).unwrap();
    assert_eq!(hit.id, smallest);
    assert_eq!(hit.hit_count, 1);

    // the second hit on the same native breakpoint still resolves to the
    // same logical id and accumulates the hit count.
    let hit_again = debugger.on_source_breakpoint_hit(native, |_| true).unwrap();
    assert_eq!(hit_again.id, smallest);
    assert_eq!(hit_again.hit_count, 2);
}

/// Scenario C: an exception filter condition distinguishes which exception
/// type actually stops execution.
#[test]
fn scenario_c_exception_filter_matches_only_named_type() {
    let runtime = Arc::new(MockRuntime::new());
    let debugger = Debugger::new(runtime, false);

    debugger.set_exception_breakpoint(
        ExceptionBreakMode {
            category: ExceptionBreakCategory::Any,
            flags: ExceptionFlags::from_filter(ExceptionFilter::Throw),
        },
        "System.InvalidOperationException",
    );

    assert!(debugger.exception_matches(
        ExceptionEventType::CatchHandlerFound,
        "System.InvalidOperationException",
        ExceptionBreakCategory::Any
    ));
    assert!(!debugger.exception_matches(
        ExceptionEventType::CatchHandlerFound,
        "System.ArgumentException",
        ExceptionBreakCategory::Any
    ));
}

/// Scenario D: an explicit cancel rejects the in-flight request.
#[test]
fn scenario_d_cancel_by_request_id() {
    let dispatcher = Dispatcher::start();
    let (start_tx, start_rx) = std::sync::mpsc::channel::<()>();
    let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();

    let worker_dispatcher = dispatcher.clone();
    let handle = std::thread::spawn(move || {
        worker_dispatcher.dispatch(5, "evaluate", Duration::from_secs(5), move || {
            start_tx.send(()).unwrap();
            release_rx.recv().unwrap();
            Ok(serde_json::Value::String("42".to_string()))
        })
    });
    start_rx.recv().unwrap();

    let queued_dispatcher = dispatcher.clone();
    let queued = std::thread::spawn(move || {
        queued_dispatcher.dispatch(6, "evaluate", Duration::from_secs(5), || {
            Ok(serde_json::Value::Null)
        })
    });
    std::thread::sleep(Duration::from_millis(50));

    let cancelled = dispatcher.cancel(6);
    assert!(cancelled);

    release_tx.send(()).unwrap();
    handle.join().unwrap().unwrap();
    let result = queued.join().unwrap();
    assert!(result.is_err());
}

/// Scenario E: a disruptive command (`continue`) cancels everything queued
/// ahead of it.
#[test]
fn scenario_e_disruptive_command_clears_queue() {
    let dispatcher = Dispatcher::start();
    let (start_tx, start_rx) = std::sync::mpsc::channel::<()>();
    let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();

    let blocker_dispatcher = dispatcher.clone();
    let blocker = std::thread::spawn(move || {
        blocker_dispatcher.dispatch(1, "evaluate", Duration::from_secs(5), move || {
            start_tx.send(()).unwrap();
            release_rx.recv().unwrap();
            Ok(serde_json::Value::Null)
        })
    });
    start_rx.recv().unwrap();

    let mut queued_handles = Vec::new();
    for id in 2..=4 {
        let d = dispatcher.clone();
        queued_handles.push(std::thread::spawn(move || {
            d.dispatch(id, "evaluate", Duration::from_secs(5), || Ok(serde_json::Value::Null))
        }));
    }
    std::thread::sleep(Duration::from_millis(50));

    let continue_dispatcher = dispatcher.clone();
    let continue_result = continue_dispatcher.dispatch(100, "continue", Duration::from_secs(5), || {
        Ok(serde_json::Value::Bool(true))
    });

    release_tx.send(()).unwrap();
    blocker.join().unwrap().unwrap();
    for h in queued_handles {
        assert!(h.join().unwrap().is_err());
    }
    assert!(continue_result.is_ok());
}

/// Scenario F: a step that begins inside an `await` only reports
/// completion once the resume breakpoint with the matching async id fires.
#[test]
fn scenario_f_async_step_over_await_reports_once() {
    let runtime = Arc::new(MockRuntime::new());
    let controller = clr_debug_core::execution::ExecutionController::new();
    controller.mark_started(4242);

    let thread = clr_debug_core::ids::ThreadId::new(1);
    controller
        .begin_async_step(runtime.as_ref(), thread, 55, &loc(30), None)
        .unwrap();

    // The yield breakpoint fires first; this must not itself be reported as
    // step-complete.
    let transitioned = controller
        .on_yield_breakpoint_hit(runtime.as_ref(), 55, &loc(31))
        .unwrap();
    assert!(transitioned);

    // Only the resume breakpoint, with the matching async id, completes it.
    let completed = controller.on_resume_breakpoint_hit(runtime.as_ref(), 55).unwrap();
    assert!(completed);
}
