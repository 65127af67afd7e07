//! Wires one live debug session: the command [`Dispatcher`] and the
//! [`Debugger`] facade on one side, the wire dialects on the other
//! (`spec.md` §4.4 "Protocol dispatcher", §6 "JSON dialect").
//!
//! Grounded in `examples/original_source/src/protocols/vscodeprotocol.cpp`'s
//! per-command dispatch table, reproduced here as a `match` over
//! `Request::command` that runs each command through the single-worker
//! [`Dispatcher`] so every dialect still executes commands in strict queue
//! order, exactly as §5 requires regardless of which front end is talking.
//! `evaluate`, `setExpression` and the two "reuses the eval queue" commands
//! are `async fn`s on [`Debugger`]; the dispatcher's worker thread runs them
//! to completion via the caller's `tokio::runtime::Handle`, matching how
//! `examples/jcn363-AI_IDE`'s debugger crate bridges its own sync worker
//! threads into async runtime calls.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::warn;
use serde_json::{json, Value};
use tokio::runtime::Handle;

use crate::breakpoints::{
    ExceptionBreakCategory, ExceptionBreakMode, ExceptionFilter, ExceptionFlags,
    FunctionBreakpointSpec, SourceBreakpointSpec,
};
use crate::debugger::Debugger;
use crate::dispatch::{Dispatcher, RequestId, DEFAULT_COMMAND_TIMEOUT};
use crate::error::{DebuggerError, Result};
use crate::events::DebuggerEvent;
use crate::ids::{FrameId, ThreadId};
use crate::model::StoppedReason;
use crate::protocol::dap::{capabilities, Request, Response};
use crate::runtime::StepType;
use crate::variables::VariablesFilter;

/// Owns the dispatcher and facade for one debug session.
pub struct Session {
    debugger: Arc<Debugger>,
    dispatcher: Arc<Dispatcher>,
    rt_handle: Handle,
    next_local_id: AtomicU64,
}

impl Session {
    pub fn new(debugger: Arc<Debugger>, rt_handle: Handle) -> Self {
        Session {
            debugger,
            dispatcher: Dispatcher::start(),
            rt_handle,
            next_local_id: AtomicU64::new(1),
        }
    }

    /// Runs one command by name, the same way [`Session::handle_dap_request`]
    /// does, for dialects (CLI, MI) whose own request framing doesn't carry a
    /// DAP `Request`. Shares the same dispatcher queue and `Debugger` methods
    /// as the DAP path, so a disruptive CLI `continue` still cancels queued
    /// MI/DAP work exactly as `spec.md` §5 requires.
    pub fn dispatch_command(&self, command: &str, args: Value) -> Result<Option<Value>> {
        let id = self.next_local_id.fetch_add(1, Ordering::SeqCst);
        self.run_dap_command(id, command, args)
    }

    pub fn debugger(&self) -> &Arc<Debugger> {
        &self.debugger
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Handles one DAP request, blocking the calling thread until the
    /// dispatcher runs it, and renders the outcome as a response frame. The
    /// client's own `seq` doubles as the dispatcher's request id, so a later
    /// `cancel` naming that `seq` reaches the right queued entry.
    pub fn handle_dap_request(&self, request: Request) -> Response {
        let response_seq = self.debugger.event_sequencer().next_seq();
        let command = request.command.clone();
        let id: RequestId = request.seq;

        match self.run_dap_command(id, &command, request.arguments) {
            Ok(body) => Response::success(response_seq, request.seq, &command, body),
            Err(err) => {
                warn!("command '{command}' failed: {err}");
                Response::failure(response_seq, request.seq, &command, err.failed_command_message(&command))
            }
        }
    }

    fn run_dap_command(&self, id: RequestId, command: &str, args: Value) -> Result<Option<Value>> {
        let debugger = self.debugger.clone();

        match command {
            "initialize" => Ok(Some(capabilities())),

            "configurationDone" => self
                .dispatcher
                .dispatch(id, command, DEFAULT_COMMAND_TIMEOUT, || Ok(Value::Null))
                .map(|_| None),

            "launch" => {
                let program = args.get("program").and_then(Value::as_str).unwrap_or_default().to_string();
                let launch_args = string_array(&args, "args");
                self.dispatcher
                    .dispatch(id, command, DEFAULT_COMMAND_TIMEOUT, move || {
                        let pid = debugger.launch(&program, &launch_args)?;
                        Ok(json!({ "pid": pid }))
                    })
                    .map(Some)
            }

            "attach" => {
                let pid = args.get("processId").and_then(Value::as_i64).unwrap_or_default() as i32;
                self.dispatcher
                    .dispatch(id, command, DEFAULT_COMMAND_TIMEOUT, move || {
                        debugger.attach(pid)?;
                        Ok(Value::Null)
                    })
                    .map(|_| None)
            }

            "threads" => self
                .dispatcher
                .dispatch(id, command, DEFAULT_COMMAND_TIMEOUT, move || {
                    let threads = debugger.threads()?;
                    let rendered: Vec<Value> = threads
                        .into_iter()
                        .map(|t| json!({ "id": t.raw(), "name": format!("Thread #{}", t.raw()) }))
                        .collect();
                    Ok(json!({ "threads": rendered }))
                })
                .map(Some),

            "stackTrace" => {
                let thread = thread_id_arg(&args, "threadId");
                let low = args.get("startFrame").and_then(Value::as_u64).unwrap_or(0) as u32;
                let levels = args.get("levels").and_then(Value::as_u64).unwrap_or(64) as u32;
                self.dispatcher
                    .dispatch(id, command, DEFAULT_COMMAND_TIMEOUT, move || {
                        let frames = debugger.stack_trace(thread, low, low + levels)?;
                        let total = frames.len();
                        let rendered: Vec<Value> = frames.into_iter().map(stack_frame_to_json).collect();
                        Ok(json!({ "stackFrames": rendered, "totalFrames": total }))
                    })
                    .map(Some)
            }

            "scopes" => {
                let frame_id = FrameId::from_raw(args.get("frameId").and_then(Value::as_u64).unwrap_or_default() as u32);
                self.dispatcher
                    .dispatch(id, command, DEFAULT_COMMAND_TIMEOUT, move || {
                        let (thread, level) = debugger
                            .resolve_frame(frame_id)
                            .ok_or_else(|| DebuggerError::invalid_argument("unknown frameId"))?;
                        let scopes = debugger.scopes(thread, level)?;
                        Ok(json!({ "scopes": scopes }))
                    })
                    .map(Some)
            }

            "variables" => {
                let reference = args.get("variablesReference").and_then(Value::as_u64).unwrap_or_default();
                let filter = match args.get("filter").and_then(Value::as_str) {
                    Some("named") => VariablesFilter::Named,
                    Some("indexed") => VariablesFilter::Indexed,
                    _ => VariablesFilter::Both,
                };
                let start = args.get("start").and_then(Value::as_u64).map(|v| v as u32);
                let count = args.get("count").and_then(Value::as_u64).map(|v| v as u32);
                self.dispatcher
                    .dispatch(id, command, DEFAULT_COMMAND_TIMEOUT, move || {
                        let vars = debugger.get_variables(reference, filter, start, count)?;
                        Ok(json!({ "variables": vars.into_iter().map(variable_to_json).collect::<Vec<_>>() }))
                    })
                    .map(Some)
            }

            "setVariable" => {
                let reference = args.get("variablesReference").and_then(Value::as_u64).unwrap_or_default();
                let name = args.get("name").and_then(Value::as_str).unwrap_or_default().to_string();
                let value = args.get("value").and_then(Value::as_str).unwrap_or_default().to_string();
                self.dispatcher
                    .dispatch(id, command, DEFAULT_COMMAND_TIMEOUT, move || {
                        let outcome = debugger.set_variable(reference, &name, &value)?;
                        Ok(json!({
                            "value": outcome.value,
                            "type": outcome.type_name,
                            "variablesReference": outcome.variables_reference.unwrap_or(0),
                        }))
                    })
                    .map(Some)
            }

            "setExpression" => {
                let frame_id = FrameId::from_raw(args.get("frameId").and_then(Value::as_u64).unwrap_or_default() as u32);
                let expression = args.get("expression").and_then(Value::as_str).unwrap_or_default().to_string();
                let value = args.get("value").and_then(Value::as_str).unwrap_or_default().to_string();
                self.dispatcher
                    .dispatch(id, command, DEFAULT_COMMAND_TIMEOUT, move || {
                        let (thread, _) = debugger
                            .resolve_frame(frame_id)
                            .ok_or_else(|| DebuggerError::invalid_argument("unknown frameId"))?;
                        let outcome = debugger.set_expression(thread, &expression, &value)?;
                        Ok(json!({
                            "value": outcome.value,
                            "type": outcome.type_name,
                            "variablesReference": outcome.variables_reference.unwrap_or(0),
                        }))
                    })
                    .map(Some)
            }

            "evaluate" => {
                let frame_id = args.get("frameId").and_then(Value::as_u64).map(|v| FrameId::from_raw(v as u32));
                let expression = args.get("expression").and_then(Value::as_str).unwrap_or_default().to_string();
                let handle = self.rt_handle.clone();
                self.dispatcher
                    .dispatch(id, command, DEFAULT_COMMAND_TIMEOUT, move || {
                        let frame_id = frame_id.ok_or_else(|| DebuggerError::invalid_argument("evaluate requires a frameId"))?;
                        let (thread, _) = debugger
                            .resolve_frame(frame_id)
                            .ok_or_else(|| DebuggerError::invalid_argument("unknown frameId"))?;
                        let result = handle.block_on(debugger.evaluate(thread, &expression))?;
                        Ok(json!({
                            "result": result.value,
                            "type": result.type_name,
                            "variablesReference": result.variables_reference.unwrap_or(0),
                        }))
                    })
                    .map(Some)
            }

            "setBreakpoints" => {
                let path = args
                    .pointer("/source/path")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let specs = args
                    .get("breakpoints")
                    .and_then(Value::as_array)
                    .map(|a| {
                        a.iter()
                            .filter_map(|b| {
                                Some(SourceBreakpointSpec {
                                    line: b.get("line")?.as_u64()? as u32,
                                    condition: b.get("condition").and_then(Value::as_str).map(str::to_string),
                                })
                            })
                            .collect::<Vec<_>>()
                    })
                    .unwrap_or_default();
                self.dispatcher
                    .dispatch(id, command, DEFAULT_COMMAND_TIMEOUT, move || {
                        let rendered = debugger.set_source_breakpoints(&path, &specs);
                        Ok(json!({ "breakpoints": rendered }))
                    })
                    .map(Some)
            }

            "setFunctionBreakpoints" => {
                let specs = args
                    .get("breakpoints")
                    .and_then(Value::as_array)
                    .map(|a| {
                        a.iter()
                            .filter_map(|b| {
                                let name = b.get("name")?.as_str()?;
                                let condition = b.get("condition").and_then(Value::as_str).map(str::to_string);
                                Some(parse_function_spec(name, condition))
                            })
                            .collect::<Vec<_>>()
                    })
                    .unwrap_or_default();
                self.dispatcher
                    .dispatch(id, command, DEFAULT_COMMAND_TIMEOUT, move || {
                        let rendered = debugger.set_function_breakpoints(&specs);
                        Ok(json!({ "breakpoints": rendered }))
                    })
                    .map(Some)
            }

            "setExceptionBreakpoints" => {
                let filters = string_array(&args, "filters");
                let filter_options: Vec<(String, Option<String>)> = args
                    .get("filterOptions")
                    .and_then(Value::as_array)
                    .map(|a| {
                        a.iter()
                            .filter_map(|v| {
                                let filter_id = v.get("filterId")?.as_str()?.to_string();
                                let condition = v.get("condition").and_then(Value::as_str).map(str::to_string);
                                Some((filter_id, condition))
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                self.dispatcher
                    .dispatch(id, command, DEFAULT_COMMAND_TIMEOUT, move || {
                        for filter_id in &filters {
                            if let Some(filter) = exception_filter_from_id(filter_id) {
                                let mode = ExceptionBreakMode {
                                    category: ExceptionBreakCategory::Any,
                                    flags: ExceptionFlags::from_filter(filter),
                                };
                                debugger.set_exception_breakpoint(mode, "*");
                            }
                        }
                        for (filter_id, condition) in &filter_options {
                            if let Some(filter) = exception_filter_from_id(filter_id) {
                                let mode = ExceptionBreakMode {
                                    category: ExceptionBreakCategory::Any,
                                    flags: ExceptionFlags::from_filter(filter),
                                };
                                let name = condition.as_deref().unwrap_or("*");
                                debugger.set_exception_breakpoint(mode, name);
                            }
                        }
                        Ok(Value::Null)
                    })
                    .map(|_| None)
            }

            "exceptionInfo" => Err(DebuggerError::invalid_argument(
                "no exception is currently active on this thread",
            )),

            "continue" => {
                let all_threads = args.get("threadId").is_none();
                self.dispatcher
                    .dispatch(id, command, DEFAULT_COMMAND_TIMEOUT, move || {
                        debugger.continue_(all_threads)?;
                        Ok(json!({ "allThreadsContinued": all_threads }))
                    })
                    .map(Some)
            }

            "pause" => self
                .dispatcher
                .dispatch(id, command, DEFAULT_COMMAND_TIMEOUT, move || {
                    debugger.pause()?;
                    Ok(Value::Null)
                })
                .map(|_| None),

            "next" | "stepIn" | "stepOut" => {
                let thread = thread_id_arg(&args, "threadId");
                let kind = match command {
                    "next" => StepType::StepOver,
                    "stepIn" => StepType::StepIn,
                    _ => StepType::StepOut,
                };
                self.dispatcher
                    .dispatch(id, command, DEFAULT_COMMAND_TIMEOUT, move || {
                        debugger.step(thread, kind)?;
                        Ok(Value::Null)
                    })
                    .map(|_| None)
            }

            "disconnect" => {
                let terminate = args.get("terminateDebuggee").and_then(Value::as_bool).unwrap_or(false);
                self.dispatcher
                    .dispatch(id, command, DEFAULT_COMMAND_TIMEOUT, move || {
                        debugger.disconnect(terminate)?;
                        Ok(Value::Null)
                    })
                    .map(|_| None)
            }

            "terminate" => self
                .dispatcher
                .dispatch(id, command, DEFAULT_COMMAND_TIMEOUT, move || {
                    debugger.disconnect(true)?;
                    Ok(Value::Null)
                })
                .map(|_| None),

            "cancel" => {
                let request_id = args.get("requestId").and_then(Value::as_u64).unwrap_or(0);
                if self.dispatcher.cancel(request_id) {
                    Ok(None)
                } else {
                    Err(DebuggerError::invalid_argument(format!(
                        "cancel not supported for requestId {request_id}"
                    )))
                }
            }

            other => Err(DebuggerError::invalid_argument(format!("unknown command '{other}'"))),
        }
    }
}

/// Renders one core event to its DAP event name and body, for whichever
/// task drains the `Debugger`'s event sink and frames it onto the wire
/// (`spec.md` §4.6 "Events", §6 "JSON dialect").
pub fn render_event(event: DebuggerEvent) -> (&'static str, Option<Value>) {
    match event {
        DebuggerEvent::Stopped(ev) => (
            "stopped",
            Some(json!({
                "reason": stopped_reason_str(ev.reason),
                "threadId": ev.thread_id.raw(),
                "text": ev.text,
                "allThreadsStopped": ev.all_threads_stopped,
                "frame": ev.frame.map(stack_frame_to_json),
                "breakpoint": ev.breakpoint,
                "exception": ev.exception,
            })),
        ),
        DebuggerEvent::Continued { all_threads } => {
            ("continued", Some(json!({ "allThreadsContinued": all_threads })))
        }
        DebuggerEvent::Exited { exit_code } => ("exited", Some(json!({ "exitCode": exit_code }))),
        DebuggerEvent::Terminated => ("terminated", None),
        DebuggerEvent::ThreadStarted { thread_id } => {
            ("thread", Some(json!({ "reason": "started", "threadId": thread_id })))
        }
        DebuggerEvent::ThreadExited { thread_id } => {
            ("thread", Some(json!({ "reason": "exited", "threadId": thread_id })))
        }
        DebuggerEvent::ModuleLoaded(module) => {
            ("module", Some(json!({ "reason": "new", "module": module })))
        }
        DebuggerEvent::BreakpointChanged(bp) => {
            ("breakpoint", Some(json!({ "reason": "changed", "breakpoint": bp })))
        }
        DebuggerEvent::Output { category, text } => {
            ("output", Some(json!({ "category": category, "output": text })))
        }
    }
}

fn stopped_reason_str(reason: StoppedReason) -> &'static str {
    match reason {
        StoppedReason::Step => "step",
        StoppedReason::Breakpoint => "breakpoint",
        StoppedReason::Exception => "exception",
        StoppedReason::Pause => "pause",
        StoppedReason::Entry => "entry",
    }
}

fn string_array(args: &Value, field: &str) -> Vec<String> {
    args.get(field)
        .and_then(Value::as_array)
        .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_default()
}

fn thread_id_arg(args: &Value, field: &str) -> ThreadId {
    match args.get(field).and_then(Value::as_i64) {
        Some(raw) => ThreadId::new(raw),
        None => ThreadId::all_threads(),
    }
}

fn exception_filter_from_id(filter_id: &str) -> Option<ExceptionFilter> {
    match filter_id {
        "all" => Some(ExceptionFilter::Throw),
        "user-unhandled" => Some(ExceptionFilter::UserUnhandled),
        _ => None,
    }
}

/// Parses a DAP function-breakpoint name, which uses the same
/// `<module>!<name>(<params>)` / `<name>(<params>)` grammar as the CLI
/// dialect's `break` command.
fn parse_function_spec(name: &str, condition: Option<String>) -> FunctionBreakpointSpec {
    let (head, params) = match name.find('(') {
        Some(open) if name.ends_with(')') => (&name[..open], name[open + 1..name.len() - 1].to_string()),
        _ => (name, String::new()),
    };
    let (module, name) = match head.split_once('!') {
        Some((m, n)) => (Some(m.to_string()), n.to_string()),
        None => (None, head.to_string()),
    };
    FunctionBreakpointSpec { module, name, params, condition }
}

fn stack_frame_to_json(f: crate::model::StackFrame) -> Value {
    json!({
        "id": f.id.map(|id| id.raw()).unwrap_or(0),
        "name": f.name,
        "source": f.source,
        "line": f.line,
        "column": f.column,
        "endLine": f.end_line,
        "endColumn": f.end_column,
    })
}

fn variable_to_json(v: crate::variables::Variable) -> Value {
    json!({
        "name": v.name,
        "value": v.value,
        "type": v.type_name,
        "variablesReference": v.variables_reference.unwrap_or(0),
        "namedVariables": v.named_count,
        "indexedVariables": v.indexed_count,
    })
}
