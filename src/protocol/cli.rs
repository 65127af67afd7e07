//! Interactive CLI dialect (`spec.md` §4.2 "CLI dialect").
//!
//! Grounded in `examples/original_source/src/protocols/cliprotocol.cpp`'s
//! `gdb`-like front-end and `examples/original_source`'s command-line
//! help text for the command list and breakpoint-spec grammar: either
//! `<file>:<line>` or `<module>!<name>(<params>)`, optionally followed by
//! `-f` (force pending) or `-c <expr>` (condition).

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BreakpointSpec {
    Line { file: String, line: u32 },
    Function { module: Option<String>, name: String, params: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedBreak {
    pub spec: BreakpointSpec,
    pub condition: Option<String>,
    pub force_pending: bool,
}

/// Parses the argument text following a `break` command.
pub fn parse_break_args(args: &str) -> Option<ParsedBreak> {
    let mut condition = None;
    let mut force_pending = false;
    let mut rest = args.trim();

    loop {
        if let Some(after) = rest.strip_prefix("-f") {
            force_pending = true;
            rest = after.trim();
        } else if let Some(after) = rest.strip_prefix("-c ") {
            rest = after.trim();
            // the condition expression may itself contain spaces, so only
            // the final whitespace-separated token is the location.
            if let Some(split) = rest.rfind(char::is_whitespace) {
                condition = Some(rest[..split].trim().to_string());
                rest = rest[split..].trim();
            }
            break;
        } else {
            break;
        }
    }

    let location = rest.trim();
    if location.is_empty() {
        return None;
    }

    let spec = if let Some((module_and_name, params)) = split_function_call(location) {
        let (module, name) = match module_and_name.split_once('!') {
            Some((m, n)) => (Some(m.to_string()), n.to_string()),
            None => (None, module_and_name.to_string()),
        };
        BreakpointSpec::Function { module, name, params }
    } else {
        let (file, line) = location.rsplit_once(':')?;
        BreakpointSpec::Line {
            file: file.to_string(),
            line: line.parse().ok()?,
        }
    };

    Some(ParsedBreak {
        spec,
        condition,
        force_pending,
    })
}

fn split_function_call(text: &str) -> Option<(&str, &str)> {
    let open = text.find('(')?;
    if !text.ends_with(')') {
        return None;
    }
    Some((&text[..open], &text[open + 1..text.len() - 1]))
}

/// Top-level commands the CLI dialect accepts, for completion and dispatch.
pub const COMMANDS: &[&str] = &[
    "backtrace", "break", "catch", "continue", "delete", "detach", "disable", "enable", "file",
    "finish", "help", "info", "interrupt", "list", "next", "print", "quit", "run", "attach",
    "step", "source", "wait", "set", "save",
];

/// Returns every command in [`COMMANDS`] that starts with `prefix`, for
/// interactive tab completion.
pub fn complete(prefix: &str) -> Vec<&'static str> {
    COMMANDS.iter().copied().filter(|c| c.starts_with(prefix)).collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CliCommand {
    Backtrace,
    Break(String),
    Catch(String),
    Continue,
    Delete(Vec<u32>),
    Detach,
    Disable(Vec<u32>),
    Enable(Vec<u32>),
    File(String),
    Finish,
    Help,
    InfoThreads,
    InfoBreakpoints,
    Interrupt,
    List,
    Next,
    Print(String),
    Quit,
    Run,
    Attach(i32),
    Step,
    Source(String),
    Wait(u32),
    SetArgs(Vec<String>),
    SaveBreakpoints(String),
    Unknown(String),
}

pub fn parse_line(line: &str) -> Option<CliCommand> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let (command, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let rest = rest.trim();

    Some(match command {
        "backtrace" | "bt" => CliCommand::Backtrace,
        "break" | "b" => CliCommand::Break(rest.to_string()),
        "catch" => CliCommand::Catch(rest.to_string()),
        "continue" | "c" => CliCommand::Continue,
        "delete" => CliCommand::Delete(parse_ids(rest)),
        "detach" => CliCommand::Detach,
        "disable" => CliCommand::Disable(parse_ids(rest)),
        "enable" => CliCommand::Enable(parse_ids(rest)),
        "file" => CliCommand::File(rest.to_string()),
        "finish" => CliCommand::Finish,
        "help" => CliCommand::Help,
        "info" if rest == "threads" => CliCommand::InfoThreads,
        "info" if rest == "breakpoints" => CliCommand::InfoBreakpoints,
        "interrupt" => CliCommand::Interrupt,
        "list" | "l" => CliCommand::List,
        "next" | "n" => CliCommand::Next,
        "print" | "p" => CliCommand::Print(rest.to_string()),
        "quit" | "q" => CliCommand::Quit,
        "run" | "r" => CliCommand::Run,
        "attach" => CliCommand::Attach(rest.parse().ok()?),
        "step" | "s" => CliCommand::Step,
        "source" => CliCommand::Source(rest.to_string()),
        "wait" => CliCommand::Wait(rest.parse().ok()?),
        "set" if rest.starts_with("args ") => {
            CliCommand::SetArgs(rest[5..].split_whitespace().map(str::to_string).collect())
        }
        "save" if rest.starts_with("breakpoints ") => {
            CliCommand::SaveBreakpoints(rest[12..].trim().to_string())
        }
        other => CliCommand::Unknown(other.to_string()),
    })
}

fn parse_ids(rest: &str) -> Vec<u32> {
    rest.split_whitespace().filter_map(|s| s.parse().ok()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_file_line_breakpoint() {
        let parsed = parse_break_args("Program.cs:42").unwrap();
        assert_eq!(
            parsed.spec,
            BreakpointSpec::Line {
                file: "Program.cs".to_string(),
                line: 42
            }
        );
        assert!(!parsed.force_pending);
        assert!(parsed.condition.is_none());
    }

    #[test]
    fn parses_function_breakpoint_with_module_and_condition() {
        let parsed = parse_break_args("-c i > 5 MyApp.dll!MyApp.Program.Main(string[])").unwrap();
        assert_eq!(parsed.condition.as_deref(), Some("i > 5"));
        assert_eq!(
            parsed.spec,
            BreakpointSpec::Function {
                module: Some("MyApp.dll".to_string()),
                name: "MyApp.Program.Main".to_string(),
                params: "string[]".to_string(),
            }
        );
    }

    #[test]
    fn parses_force_pending_flag() {
        let parsed = parse_break_args("-f Program.cs:10").unwrap();
        assert!(parsed.force_pending);
        assert_eq!(
            parsed.spec,
            BreakpointSpec::Line {
                file: "Program.cs".to_string(),
                line: 10
            }
        );
    }

    #[test]
    fn parses_function_without_module_prefix() {
        let parsed = parse_break_args("Main(string[])").unwrap();
        assert_eq!(
            parsed.spec,
            BreakpointSpec::Function {
                module: None,
                name: "Main".to_string(),
                params: "string[]".to_string()
            }
        );
    }

    #[test]
    fn completion_matches_prefix() {
        let matches = complete("br");
        assert_eq!(matches, vec!["backtrace", "break"]);
    }

    #[test]
    fn parses_save_breakpoints_command() {
        let cmd = parse_line("save breakpoints bps.txt").unwrap();
        assert_eq!(cmd, CliCommand::SaveBreakpoints("bps.txt".to_string()));
    }

    #[test]
    fn unknown_command_is_preserved_verbatim() {
        let cmd = parse_line("frobnicate").unwrap();
        assert_eq!(cmd, CliCommand::Unknown("frobnicate".to_string()));
    }
}
