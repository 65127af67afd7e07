//! Expression evaluation queue (`spec.md` §4.5 "Evaluate", §4.7 "Eval
//! queue").
//!
//! Grounded in `examples/original_source/src/debugger/evalwaiter.h`:
//! evaluations run on the debuggee thread itself, so requests for the same
//! thread are serialized FIFO and each is represented by a one-shot promise
//! that the eval-completion callback fulfills later. A disruptive command
//! (continue, step, disconnect) cancels every outstanding evaluation rather
//! than letting it complete against a process that has moved on.
//!
//! `RunClassConstructor` and `SuppressFinalize` reuse this same queue:
//! they enqueue like any other evaluation and the runtime's completion
//! callback fulfills them the same way (`spec.md` §4.7 "Evaluate").

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use log::debug;
use tokio::sync::oneshot;

use crate::error::{DebuggerError, Result};
use crate::ids::ThreadId;

#[derive(Debug, Clone)]
pub struct EvalResult {
    pub value: String,
    pub type_name: String,
    pub variables_reference: Option<u64>,
}

struct PendingEval {
    thread: ThreadId,
    completion: oneshot::Sender<Result<EvalResult>>,
}

/// Per-thread FIFO queue of scheduled evaluations.
#[derive(Default)]
pub struct EvalQueue {
    pending: Mutex<HashMap<ThreadId, VecDeque<PendingEval>>>,
}

impl EvalQueue {
    pub fn new() -> Self {
        EvalQueue {
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Enqueues an evaluation for `thread` and returns a future that
    /// resolves when the runtime's eval-completion callback calls
    /// [`EvalQueue::complete`] (or the request is cancelled).
    ///
    /// The caller is responsible for actually asking the runtime to run the
    /// expression (via `RuntimeApi::schedule_eval`) once this request is at
    /// the head of its thread's queue; this type only tracks completion.
    pub fn enqueue(&self, thread: ThreadId) -> oneshot::Receiver<Result<EvalResult>> {
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .unwrap()
            .entry(thread)
            .or_default()
            .push_back(PendingEval {
                thread,
                completion: tx,
            });
        rx
    }

    /// Fulfills the oldest outstanding evaluation on `thread`.
    pub fn complete(&self, thread: ThreadId, result: Result<EvalResult>) {
        let mut pending = self.pending.lock().unwrap();
        if let Some(queue) = pending.get_mut(&thread) {
            if let Some(entry) = queue.pop_front() {
                let _ = entry.completion.send(result);
            }
            if queue.is_empty() {
                pending.remove(&thread);
            }
        }
    }

    /// Cancels every outstanding evaluation on every thread. Called when a
    /// disruptive command (continue, step, pause-then-continue, detach) is
    /// dispatched (`spec.md` §5 "Disruptive commands").
    pub fn cancel_all(&self) {
        let mut pending = self.pending.lock().unwrap();
        let count: usize = pending.values().map(|q| q.len()).sum();
        if count > 0 {
            debug!("cancelling {count} outstanding evaluation(s)");
        }
        for (_, queue) in pending.drain() {
            for entry in queue {
                let _ = entry
                    .completion
                    .send(Err(DebuggerError::cancelled("process resumed")));
            }
        }
    }

    pub fn pending_count(&self, thread: ThreadId) -> usize {
        self.pending
            .lock()
            .unwrap()
            .get(&thread)
            .map(VecDeque::len)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn completion_resolves_the_future() {
        let queue = EvalQueue::new();
        let rx = queue.enqueue(ThreadId::new(1));
        queue.complete(
            ThreadId::new(1),
            Ok(EvalResult {
                value: "42".to_string(),
                type_name: "int".to_string(),
                variables_reference: None,
            }),
        );
        let result = rx.await.unwrap().unwrap();
        assert_eq!(result.value, "42");
    }

    #[tokio::test]
    async fn cancel_all_rejects_every_pending_request() {
        let queue = EvalQueue::new();
        let a = queue.enqueue(ThreadId::new(1));
        let b = queue.enqueue(ThreadId::new(2));
        queue.cancel_all();
        assert!(a.await.unwrap().is_err());
        assert!(b.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn requests_on_the_same_thread_complete_fifo() {
        let queue = EvalQueue::new();
        let first = queue.enqueue(ThreadId::new(1));
        let second = queue.enqueue(ThreadId::new(1));
        queue.complete(
            ThreadId::new(1),
            Ok(EvalResult {
                value: "1".to_string(),
                type_name: "int".to_string(),
                variables_reference: None,
            }),
        );
        queue.complete(
            ThreadId::new(1),
            Ok(EvalResult {
                value: "2".to_string(),
                type_name: "int".to_string(),
                variables_reference: None,
            }),
        );
        assert_eq!(first.await.unwrap().unwrap().value, "1");
        assert_eq!(second.await.unwrap().unwrap().value, "2");
    }
}
