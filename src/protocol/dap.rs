//! JSON request/response/event dialect and its `Content-Length` framing
//! (`spec.md` §4.2 "JSON dialect", §6 "Wire protocol").
//!
//! Grounded in `examples/original_source/src/protocols/vscodeprotocol.cpp`
//! for the framing and the command surface; message shapes are expressed
//! with `serde`, matching how `examples/jcn363-AI_IDE`'s debugger crate
//! renders its own wire types.

use std::io::{self, Read, Write};

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Deserialize)]
pub struct Request {
    pub seq: u64,
    pub command: String,
    #[serde(default)]
    pub arguments: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct Response {
    pub seq: u64,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub request_seq: u64,
    pub success: bool,
    pub command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

impl Response {
    pub fn success(seq: u64, request_seq: u64, command: &str, body: Option<Value>) -> Self {
        Response {
            seq,
            kind: "response",
            request_seq,
            success: true,
            command: command.to_string(),
            message: None,
            body,
        }
    }

    pub fn failure(seq: u64, request_seq: u64, command: &str, message: String) -> Self {
        Response {
            seq,
            kind: "response",
            request_seq,
            success: false,
            command: command.to_string(),
            message: Some(message),
            body: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EventMessage {
    pub seq: u64,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub event: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

impl EventMessage {
    pub fn new(seq: u64, event: &str, body: Option<Value>) -> Self {
        EventMessage {
            seq,
            kind: "event",
            event: event.to_string(),
            body,
        }
    }
}

/// Writes `message` as one `Content-Length: N\r\n\r\n<json>` frame.
pub fn write_frame(out: &mut impl Write, message: &impl Serialize) -> io::Result<()> {
    let body = serde_json::to_vec(message)?;
    write!(out, "Content-Length: {}\r\n\r\n", body.len())?;
    out.write_all(&body)?;
    out.flush()
}

/// Reads one `Content-Length`-framed JSON payload from `input`. Returns
/// `Ok(None)` at a clean EOF before any header bytes arrive.
pub fn read_frame(input: &mut impl Read) -> io::Result<Option<Request>> {
    let mut header = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        let n = input.read(&mut byte)?;
        if n == 0 {
            return if header.is_empty() {
                Ok(None)
            } else {
                Err(io::Error::new(io::ErrorKind::UnexpectedEof, "truncated header"))
            };
        }
        header.push(byte[0]);
        if header.ends_with(b"\r\n\r\n") {
            break;
        }
    }

    let header_text = String::from_utf8_lossy(&header);
    let length = header_text
        .lines()
        .find_map(|line| line.strip_prefix("Content-Length:"))
        .and_then(|v| v.trim().parse::<usize>().ok())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "missing Content-Length"))?;

    let mut body = vec![0u8; length];
    input.read_exact(&mut body)?;
    let request: Request = serde_json::from_slice(&body)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    Ok(Some(request))
}

/// Capabilities advertised in response to `initialize` (`spec.md` §6).
pub fn capabilities() -> Value {
    serde_json::json!({
        "supportsConfigurationDoneRequest": true,
        "supportsConditionalBreakpoints": true,
        "supportsFunctionBreakpoints": true,
        "supportsExceptionFilterOptions": true,
        "supportsEvaluateForHovers": true,
        "supportsSetVariable": true,
        "supportTerminateDebuggee": true,
        "supportsDelayedStackTraceLoading": true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_round_trips() {
        let mut buf = Vec::new();
        let resp = Response::success(1, 1, "initialize", Some(capabilities()));
        write_frame(&mut buf, &resp).unwrap();

        let mut cursor = io::Cursor::new(buf);
        // Response isn't a Request, so exercise the header parsing directly
        // against a hand-built request payload instead.
        let request_bytes = serde_json::to_vec(&serde_json::json!({
            "seq": 1,
            "command": "initialize",
            "arguments": {}
        }))
        .unwrap();
        let mut framed = Vec::new();
        write!(framed, "Content-Length: {}\r\n\r\n", request_bytes.len()).unwrap();
        framed.extend_from_slice(&request_bytes);
        let mut framed_cursor = io::Cursor::new(framed);
        let parsed = read_frame(&mut framed_cursor).unwrap().unwrap();
        assert_eq!(parsed.command, "initialize");

        // drain the first cursor so it's used (avoids an unused warning).
        let mut discard = Vec::new();
        cursor.read_to_end(&mut discard).unwrap();
        assert!(!discard.is_empty());
    }

    #[test]
    fn read_frame_returns_none_at_clean_eof() {
        let mut cursor = io::Cursor::new(Vec::<u8>::new());
        assert!(read_frame(&mut cursor).unwrap().is_none());
    }
}
