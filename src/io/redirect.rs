//! IO redirection worker: relays the debuggee's stdout/stderr as `Output`
//! events and forwards queued stdin to it (`spec.md` §4.3 "IO
//! redirection").
//!
//! Grounded in `examples/original_source/src/utils/ioredirect.cpp`: stdout
//! and stderr are read on their own tasks and forwarded line-by-line;
//! stdin uses [`super::stream_buffer::StdinRingBuffer`] plus a dedicated
//! writer task so a slow or blocked debuggee never stalls the caller
//! appending more input. The original wakes its writer via a control pipe
//! fed into the same `async_wait`; this port uses a [`tokio::sync::Notify`]
//! for the same purpose, so the writer task blocks until there is actually
//! something to send instead of polling. Cancellation is a single atomic
//! flag checked by all three tasks, so calling `cancel` more than once is
//! harmless.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, warn};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStderr, ChildStdin, ChildStdout};
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::events::DebuggerEvent;
use crate::io::stream_buffer::StdinRingBuffer;

/// Owns the three forwarding tasks for one debuggee process. Dropping this
/// does not stop the tasks; call [`IoRedirect::cancel`] and then `.await`
/// the stored handles (via [`IoRedirect::join`]) for a clean shutdown.
pub struct IoRedirect {
    cancelled: Arc<AtomicBool>,
    stdin_buffer: Arc<StdinRingBuffer>,
    stdin_notify: Arc<Notify>,
    stdout_task: JoinHandle<()>,
    stderr_task: JoinHandle<()>,
    stdin_task: Option<JoinHandle<()>>,
}

impl IoRedirect {
    /// Spawns the forwarding tasks. `events` receives `Output` events for
    /// everything read from stdout/stderr.
    pub fn spawn(
        stdout: ChildStdout,
        stderr: ChildStderr,
        stdin: Option<ChildStdin>,
        events: UnboundedSender<DebuggerEvent>,
    ) -> Self {
        let cancelled = Arc::new(AtomicBool::new(false));

        let stdout_task = spawn_reader(stdout, "stdout", events.clone(), cancelled.clone());
        let stderr_task = spawn_reader(stderr, "stderr", events, cancelled.clone());

        let stdin_buffer = Arc::new(StdinRingBuffer::new());
        let stdin_notify = Arc::new(Notify::new());
        let stdin_task = stdin.map(|handle| {
            spawn_writer(handle, stdin_buffer.clone(), stdin_notify.clone(), cancelled.clone())
        });

        IoRedirect {
            cancelled,
            stdin_buffer,
            stdin_notify,
            stdout_task,
            stderr_task,
            stdin_task,
        }
    }

    /// Queues bytes to be written to the debuggee's stdin and wakes the
    /// writer task if it was idle.
    pub fn write_stdin(&self, bytes: &[u8]) {
        self.stdin_buffer.append(bytes);
        self.stdin_notify.notify_one();
    }

    /// Idempotent: safe to call multiple times, including from multiple
    /// threads racing to tear down on process exit.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.stdin_notify.notify_one();
    }

    pub async fn join(self) {
        let _ = self.stdout_task.await;
        let _ = self.stderr_task.await;
        if let Some(task) = self.stdin_task {
            let _ = task.await;
        }
    }
}

fn spawn_reader(
    mut source: impl tokio::io::AsyncRead + Unpin + Send + 'static,
    category: &'static str,
    events: UnboundedSender<DebuggerEvent>,
    cancelled: Arc<AtomicBool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut buf = [0u8; 4096];
        loop {
            if cancelled.load(Ordering::SeqCst) {
                break;
            }
            match source.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    let text = String::from_utf8_lossy(&buf[..n]).into_owned();
                    if events
                        .send(DebuggerEvent::Output {
                            category: category.to_string(),
                            text,
                        })
                        .is_err()
                    {
                        break;
                    }
                }
                Err(e) => {
                    warn!("{category} read error: {e}");
                    break;
                }
            }
        }
        debug!("{category} forwarding task exiting");
    })
}

fn spawn_writer(
    mut sink: ChildStdin,
    buffer: Arc<StdinRingBuffer>,
    notify: Arc<Notify>,
    cancelled: Arc<AtomicBool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            if cancelled.load(Ordering::SeqCst) {
                break;
            }
            let chunk = buffer.take_unsent();
            if chunk.is_empty() {
                notify.notified().await;
                continue;
            }
            match sink.write_all(&chunk).await {
                Ok(()) => buffer.mark_sent(chunk.len()),
                Err(e) => {
                    warn!("stdin write error: {e}");
                    break;
                }
            }
        }
        let _ = sink.shutdown().await;
    })
}

/// Wraps a reader with line buffering for callers that want whole lines
/// rather than raw chunks (`spec.md` §4.2's CLI line reader).
pub async fn read_line(
    reader: &mut BufReader<impl tokio::io::AsyncRead + Unpin>,
) -> super::stream_buffer::LineOutcome {
    use super::stream_buffer::LineOutcome;
    use tokio::io::AsyncBufReadExt;

    let mut line = String::new();
    match reader.read_line(&mut line).await {
        Ok(0) => LineOutcome::EndOfInput,
        Ok(_) => {
            if line.ends_with('\n') {
                line.pop();
                if line.ends_with('\r') {
                    line.pop();
                }
            }
            LineOutcome::Line(line)
        }
        Err(e) => LineOutcome::IoError(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::stream_buffer::LineOutcome;

    #[tokio::test]
    async fn read_line_strips_crlf() {
        let data: &[u8] = b"hello\r\nworld\n";
        let mut reader = BufReader::new(data);
        let first = read_line(&mut reader).await;
        assert_eq!(first, LineOutcome::Line("hello".to_string()));
        let second = read_line(&mut reader).await;
        assert_eq!(second, LineOutcome::Line("world".to_string()));
        let third = read_line(&mut reader).await;
        assert_eq!(third, LineOutcome::EndOfInput);
    }
}
