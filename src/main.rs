//! CLI entry point: parses launch flags, builds the `Debugger` facade and
//! drives whichever wire dialect was selected over stdin/stdout
//! (`spec.md` §6 "Command line", §4.2 "Wire dialects").
//!
//! Grounded in `examples/original_source/src/debugger/main.cpp`'s top-level
//! shape: parse flags, pick a protocol, then hand stdin/stdout to it for
//! the rest of the process's life, with debugger events interleaved onto
//! the same output stream as command responses.

use std::io::Write;
use std::sync::Arc;

use clap::Parser;
use log::{error, info, warn};
use serde_json::{json, Value};
use tokio::sync::mpsc::UnboundedReceiver;

use clr_debug_core::events::DebuggerEvent;
use clr_debug_core::protocol::cli::{self, CliCommand};
use clr_debug_core::protocol::dap;
use clr_debug_core::protocol::mi;
use clr_debug_core::protocol::Dialect;
use clr_debug_core::session::{render_event, Session};
use clr_debug_core::Debugger;

/// Core engine for a managed-code debugger.
#[derive(Parser, Debug)]
#[command(name = "clr-debug", version)]
struct Cli {
    /// Attach to an already-running process instead of launching one.
    #[arg(long)]
    attach: Option<i32>,

    /// Wire dialect to speak on stdin/stdout: `mi`, `vscode` or `cli`.
    #[arg(long, default_value = "cli")]
    interpreter: String,

    /// Run one dialect command immediately at startup, may repeat.
    #[arg(long = "command", short = 'x')]
    command: Vec<String>,

    /// Execute one CLI-dialect command immediately at startup, may repeat.
    #[arg(short = 'e', long = "ex")]
    ex: Vec<String>,

    /// Mirror all inbound/outbound protocol traffic to this path (or
    /// stderr when no path is given).
    #[arg(long = "engineLogging", num_args = 0..=1, default_missing_value = "")]
    engine_logging: Option<String>,

    /// Listen on a TCP port instead of using stdin/stdout.
    #[arg(long, num_args = 0..=1, default_missing_value = "0")]
    server: Option<u16>,

    /// Write the debugger's own diagnostic log to this path.
    #[arg(long)]
    log: Option<String>,

    /// Launch and immediately continue the debuggee instead of stopping at
    /// entry.
    #[arg(long)]
    run: bool,

    /// Enable hot-reload of changed managed assemblies while stopped.
    #[arg(long = "hot-reload")]
    hot_reload: bool,

    /// Enable interop (mixed native/managed) debugging.
    #[arg(long = "interop-debugging")]
    interop_debugging: bool,

    /// Print build information and exit.
    #[arg(long)]
    buildinfo: bool,

    /// The debuggee program and its arguments, after `--`.
    #[arg(last = true)]
    program: Vec<String>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    env_logger::init();

    if cli.buildinfo {
        println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
        return;
    }

    let Some(dialect) = Dialect::from_interpreter_flag(&cli.interpreter) else {
        error!("unknown interpreter dialect: {}", cli.interpreter);
        std::process::exit(1);
    };

    info!(
        "starting with dialect={:?} attach={:?} run={} hot_reload={} interop_debugging={}",
        dialect, cli.attach, cli.run, cli.hot_reload, cli.interop_debugging
    );

    if let Some(path) = &cli.engine_logging {
        if path.is_empty() {
            info!("engine logging mirrored to stderr");
        } else {
            info!("engine logging mirrored to {path}");
        }
    }

    if cli.program.is_empty() && cli.attach.is_none() {
        error!("no program to launch and no --attach pid given");
        std::process::exit(1);
    }

    let runtime: Arc<dyn clr_debug_core::runtime::RuntimeApi> =
        Arc::new(clr_debug_core::runtime::mock::MockRuntime::new());
    let debugger = Arc::new(Debugger::new(runtime, !cli.run));

    let (event_tx, event_rx) = tokio::sync::mpsc::unbounded_channel();
    debugger.set_event_sink(event_tx);

    let session = Arc::new(Session::new(debugger, tokio::runtime::Handle::current()));

    if let Some(pid) = cli.attach {
        if let Err(e) = session.dispatch_command("attach", json!({ "processId": pid })) {
            error!("attach failed: {e}");
        }
    } else if let Some((program, args)) = cli.program.split_first() {
        let launch_args = json!({ "program": program, "args": args });
        if let Err(e) = session.dispatch_command("launch", launch_args) {
            error!("launch failed: {e}");
        }
    }

    for command in cli.ex.iter().chain(cli.command.iter()) {
        if let Some(parsed) = cli::parse_line(command) {
            info!("startup command: {parsed:?}");
        }
    }

    match dialect {
        Dialect::Dap => run_dap_loop(session, event_rx).await,
        Dialect::Mi => run_mi_loop(session, event_rx).await,
        Dialect::Cli => run_cli_loop(session, event_rx).await,
    }
}

/// Drives the JSON (DAP-style) dialect: one task reads `Content-Length`
/// framed requests from stdin and replies synchronously; a second drains
/// the event sink and frames notifications onto the same stdout, both
/// serialized through a shared writer lock (`spec.md` §6 "Wire protocol").
async fn run_dap_loop(session: Arc<Session>, mut events: UnboundedReceiver<DebuggerEvent>) {
    let writer = Arc::new(std::sync::Mutex::new(std::io::stdout()));

    let event_writer = writer.clone();
    let event_debugger = session.debugger().clone();
    let event_task = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let (name, body) = render_event(event);
            let seq = event_debugger.event_sequencer().next_seq();
            let message = dap::EventMessage::new(seq, name, body);
            let mut out = event_writer.lock().unwrap();
            if dap::write_frame(&mut *out, &message).is_err() {
                break;
            }
        }
    });

    let request_writer = writer.clone();
    let request_task = tokio::task::spawn_blocking(move || {
        let mut stdin = std::io::stdin();
        loop {
            match dap::read_frame(&mut stdin) {
                Ok(Some(request)) => {
                    let response = session.handle_dap_request(request);
                    let mut out = request_writer.lock().unwrap();
                    if dap::write_frame(&mut *out, &response).is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("DAP frame read error: {e}");
                    break;
                }
            }
        }
    });

    let _ = request_task.await;
    event_task.abort();
}

/// Drives the interactive CLI dialect over plain lines of text. Supports
/// the core of `examples/original_source`'s command set; commands with no
/// counterpart on the `Debugger` facade are acknowledged but not acted on.
async fn run_cli_loop(session: Arc<Session>, mut events: UnboundedReceiver<DebuggerEvent>) {
    let event_task = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let (name, body) = render_event(event);
            match body {
                Some(body) => println!("*{name}: {body}"),
                None => println!("*{name}"),
            }
        }
    });

    let mut source_breakpoints: Vec<clr_debug_core::breakpoints::SourceBreakpointSpec> = Vec::new();
    let mut last_program: Option<String> = None;
    let mut last_args: Vec<String> = Vec::new();

    let request_task = tokio::task::spawn_blocking(move || {
        let stdin = std::io::stdin();
        let mut line = String::new();
        loop {
            print!("(clr-debug) ");
            let _ = std::io::stdout().flush();
            line.clear();
            if stdin.read_line(&mut line).unwrap_or(0) == 0 {
                break;
            }
            let Some(command) = cli::parse_line(&line) else { continue };

            let outcome = match command {
                CliCommand::Backtrace => session
                    .dispatch_command("stackTrace", json!({ "threadId": 1, "startFrame": 0, "levels": 64 }))
                    .map(|body| body.map(|v| v.to_string())),
                CliCommand::Continue => session.dispatch_command("continue", json!({})).map(|_| None),
                CliCommand::Next => session
                    .dispatch_command("next", json!({ "threadId": 1 }))
                    .map(|_| None),
                CliCommand::Step => session
                    .dispatch_command("stepIn", json!({ "threadId": 1 }))
                    .map(|_| None),
                CliCommand::Finish => session
                    .dispatch_command("stepOut", json!({ "threadId": 1 }))
                    .map(|_| None),
                CliCommand::Interrupt => session.dispatch_command("pause", json!({})).map(|_| None),
                CliCommand::Attach(pid) => session
                    .dispatch_command("attach", json!({ "processId": pid }))
                    .map(|_| None),
                CliCommand::Detach => session
                    .dispatch_command("disconnect", json!({ "terminateDebuggee": false }))
                    .map(|_| None),
                CliCommand::Run => {
                    let args = json!({ "program": last_program.clone().unwrap_or_default(), "args": last_args.clone() });
                    session.dispatch_command("launch", args).map(|_| None)
                }
                CliCommand::SetArgs(args) => {
                    last_args = args;
                    Ok(None)
                }
                CliCommand::File(program) => {
                    last_program = Some(program);
                    Ok(None)
                }
                CliCommand::Print(expr) => session
                    .dispatch_command("evaluate", json!({ "expression": expr, "frameId": 1 }))
                    .map(|body| body.map(|v| v.to_string())),
                CliCommand::Break(args) => match cli::parse_break_args(&args) {
                    Some(parsed) => match parsed.spec {
                        cli::BreakpointSpec::Line { file, line } => {
                            source_breakpoints.push(clr_debug_core::breakpoints::SourceBreakpointSpec {
                                line,
                                condition: parsed.condition,
                            });
                            let bps: Vec<Value> = source_breakpoints
                                .iter()
                                .map(|b| json!({ "line": b.line, "condition": b.condition }))
                                .collect();
                            session
                                .dispatch_command("setBreakpoints", json!({ "source": { "path": file }, "breakpoints": bps }))
                                .map(|body| body.map(|v| v.to_string()))
                        }
                        cli::BreakpointSpec::Function { .. } => {
                            Ok(Some("function breakpoints: use the MI or DAP dialect".to_string()))
                        }
                    },
                    None => Ok(Some("usage: break [-f] [-c <cond>] <file>:<line>".to_string())),
                },
                CliCommand::InfoThreads => session.dispatch_command("threads", json!({})).map(|body| body.map(|v| v.to_string())),
                CliCommand::Help => Ok(Some(cli::COMMANDS.join(" "))),
                CliCommand::Quit => {
                    let _ = session.dispatch_command("disconnect", json!({ "terminateDebuggee": true }));
                    break;
                }
                CliCommand::InfoBreakpoints
                | CliCommand::Delete(_)
                | CliCommand::Enable(_)
                | CliCommand::Disable(_)
                | CliCommand::Catch(_)
                | CliCommand::Source(_)
                | CliCommand::Wait(_)
                | CliCommand::SaveBreakpoints(_)
                | CliCommand::List
                | CliCommand::Unknown(_) => Ok(Some("not supported in this session".to_string())),
            };

            match outcome {
                Ok(Some(text)) => println!("{text}"),
                Ok(None) => {}
                Err(e) => println!("{}", e.failed_command_message("command")),
            }
        }
    });

    let _ = request_task.await;
    event_task.abort();
}

/// Drives the GDB/MI text dialect, translating a small, commonly used
/// subset of `-exec-*`/`-break-*` commands onto the same `Debugger` facade
/// the other two dialects share.
async fn run_mi_loop(session: Arc<Session>, mut events: UnboundedReceiver<DebuggerEvent>) {
    let event_task = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let (name, _) = render_event(event);
            println!("*{}", mi_async_class(name));
        }
    });

    let request_task = tokio::task::spawn_blocking(move || {
        let stdin = std::io::stdin();
        let mut line = String::new();
        loop {
            line.clear();
            if stdin.read_line(&mut line).unwrap_or(0) == 0 {
                break;
            }
            let Some(cmd) = mi::parse_command(&line) else { continue };

            let result = match cmd.name.as_str() {
                "exec-continue" => session.dispatch_command("continue", json!({})).map(|_| Vec::new()),
                "exec-next" => session
                    .dispatch_command("next", json!({ "threadId": 1 }))
                    .map(|_| Vec::new()),
                "exec-step" => session
                    .dispatch_command("stepIn", json!({ "threadId": 1 }))
                    .map(|_| Vec::new()),
                "exec-finish" => session
                    .dispatch_command("stepOut", json!({ "threadId": 1 }))
                    .map(|_| Vec::new()),
                "exec-interrupt" => session.dispatch_command("pause", json!({})).map(|_| Vec::new()),
                "break-insert" => {
                    let Some(location) = cmd.args.first() else {
                        println!("{}", mi::render_error(cmd.token, "usage: -break-insert <file>:<line>"));
                        continue;
                    };
                    let Some((file, line)) = location.rsplit_once(':') else {
                        println!("{}", mi::render_error(cmd.token, "expected <file>:<line>"));
                        continue;
                    };
                    let Ok(line) = line.parse::<u32>() else {
                        println!("{}", mi::render_error(cmd.token, "invalid line number"));
                        continue;
                    };
                    session
                        .dispatch_command(
                            "setBreakpoints",
                            json!({ "source": { "path": file }, "breakpoints": [{ "line": line }] }),
                        )
                        .map(|_| Vec::new())
                }
                "stack-list-frames" => session
                    .dispatch_command("stackTrace", json!({ "threadId": 1, "startFrame": 0, "levels": 64 }))
                    .map(|body| vec![("stack", body.unwrap_or(Value::Null).to_string())]),
                other => {
                    println!("{}", mi::render_error(cmd.token, &format!("unsupported command: {other}")));
                    continue;
                }
            };

            match result {
                Ok(fields) => println!("{}", mi::render_result_done(cmd.token, &fields)),
                Err(e) => println!("{}", mi::render_error(cmd.token, &e.failed_command_message(&cmd.name))),
            }
        }
    });

    let _ = request_task.await;
    event_task.abort();
}

fn mi_async_class(event_name: &str) -> String {
    match event_name {
        "exited" | "terminated" => format!("{event_name},reason=\"exited\""),
        other => format!("notify-async,event=\"{other}\""),
    }
}
