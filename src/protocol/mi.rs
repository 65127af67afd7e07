//! GDB/MI text dialect (`spec.md` §4.2 "MI dialect").
//!
//! Grounded in `examples/original_source/src/protocols/miprotocol.h`:
//! requests look like `[token]-command-name arg1 arg2`, responses are
//! `[token]^done,field=value` / `^error,msg="..."` / `^running`, and
//! asynchronous notifications are `*stopped,reason="..."`. Breakpoint
//! rendering follows the same convention: a resolved line breakpoint
//! renders as `Breakpoint N at 0xADDR: file F, line L.`, an unresolved one
//! appends the literal `--pending` flag.

use crate::events::escape_mi;
use crate::model::RenderedBreakpoint;

#[derive(Debug, Clone)]
pub struct MiCommand {
    pub token: Option<u64>,
    pub name: String,
    pub args: Vec<String>,
}

/// Splits `[token]-command-name arg1 arg2...` into its parts. Tokens are
/// optional; args are whitespace-separated except inside double quotes.
pub fn parse_command(line: &str) -> Option<MiCommand> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let digits_end = line.find(|c: char| !c.is_ascii_digit()).unwrap_or(line.len());
    let (token, rest) = if digits_end > 0 {
        (line[..digits_end].parse::<u64>().ok(), &line[digits_end..])
    } else {
        (None, line)
    };

    let rest = rest.strip_prefix('-')?;
    let mut tokens = tokenize(rest);
    if tokens.is_empty() {
        return None;
    }
    let name = tokens.remove(0);
    Some(MiCommand {
        token,
        name,
        args: tokens,
    })
}

fn tokenize(input: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = input.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' => in_quotes = !in_quotes,
            ' ' if !in_quotes => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            '\\' if in_quotes => {
                if let Some(&next) = chars.peek() {
                    current.push(next);
                    chars.next();
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

pub fn render_result_done(token: Option<u64>, fields: &[(&str, String)]) -> String {
    let prefix = token.map(|t| t.to_string()).unwrap_or_default();
    let body: Vec<String> = fields
        .iter()
        .map(|(k, v)| format!("{k}=\"{}\"", escape_mi(v)))
        .collect();
    if body.is_empty() {
        format!("{prefix}^done")
    } else {
        format!("{prefix}^done,{}", body.join(","))
    }
}

pub fn render_error(token: Option<u64>, message: &str) -> String {
    let prefix = token.map(|t| t.to_string()).unwrap_or_default();
    format!("{prefix}^error,msg=\"{}\"", escape_mi(message))
}

/// `spec.md` §4.2 "Breakpoint rendering in MI".
pub fn render_breakpoint_line(bp: &RenderedBreakpoint) -> String {
    if !bp.verified {
        return format!("Breakpoint {} at {} --pending", bp.id, location_text(bp));
    }
    format!("Breakpoint {} at {}", bp.id, location_text(bp))
}

fn location_text(bp: &RenderedBreakpoint) -> String {
    match (&bp.source, bp.line) {
        (Some(source), Some(line)) => format!("{}:{}", source.path, line),
        _ => match &bp.funcname {
            Some(name) => format!("{}()", name),
            None => "<unknown>".to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_token_command_and_quoted_args() {
        let cmd = parse_command(r#"5-break-insert "Program.cs:10""#).unwrap();
        assert_eq!(cmd.token, Some(5));
        assert_eq!(cmd.name, "break-insert");
        assert_eq!(cmd.args, vec!["Program.cs:10"]);
    }

    #[test]
    fn parses_command_without_token() {
        let cmd = parse_command("-exec-continue").unwrap();
        assert_eq!(cmd.token, None);
        assert_eq!(cmd.name, "exec-continue");
        assert!(cmd.args.is_empty());
    }

    #[test]
    fn renders_done_result_with_escaped_fields() {
        let rendered = render_result_done(Some(3), &[("msg", "a\"b".to_string())]);
        assert_eq!(rendered, r#"3^done,msg="a\"b""#);
    }

    #[test]
    fn pending_breakpoint_gets_pending_suffix() {
        let bp = RenderedBreakpoint::unresolved(
            1,
            crate::model::Source {
                name: "Program.cs".to_string(),
                path: "/src/Program.cs".to_string(),
            },
            10,
            None,
        );
        assert!(render_breakpoint_line(&bp).ends_with("--pending"));
    }
}
