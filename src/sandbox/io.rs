//! Console capture for guest stdout/stderr and `log` lines.

use std::sync::{Arc, Mutex, PoisonError};

use wasmtime_wasi::pipe::MemoryOutputPipe;

/// Bounded log line buffer shared between the isolate and the runner.
#[derive(Debug, Default)]
struct LogBuffer {
    lines: Vec<String>,
    dropped: usize,
}

/// Captures everything a guest writes during one run.
///
/// Clones share the same buffers, so the runner can read the console even
/// when the isolate is still owned by the guest thread.
#[derive(Clone, Debug)]
pub struct GuestConsole {
    stdout: MemoryOutputPipe,
    stderr: MemoryOutputPipe,
    logs: Arc<Mutex<LogBuffer>>,
    max_log_lines: usize,
}

impl GuestConsole {
    /// Create a console whose pipes hold at most `max_bytes` each.
    pub fn new(max_bytes: usize, max_log_lines: usize) -> Self {
        Self {
            stdout: MemoryOutputPipe::new(max_bytes),
            stderr: MemoryOutputPipe::new(max_bytes),
            logs: Arc::new(Mutex::new(LogBuffer::default())),
            max_log_lines,
        }
    }

    /// Pipe to install as the guest's WASI stdout.
    pub fn stdout_pipe(&self) -> MemoryOutputPipe {
        self.stdout.clone()
    }

    /// Pipe to install as the guest's WASI stderr.
    pub fn stderr_pipe(&self) -> MemoryOutputPipe {
        self.stderr.clone()
    }

    /// Record a `log` line. Returns `false` if the line was dropped.
    pub fn push_log(&self, line: String) -> bool {
        let mut logs = self.logs.lock().unwrap_or_else(PoisonError::into_inner);
        if logs.lines.len() >= self.max_log_lines {
            logs.dropped += 1;
            return false;
        }
        logs.lines.push(line);
        true
    }

    /// Snapshot of everything captured so far.
    pub fn output(&self) -> ConsoleOutput {
        let logs = self.logs.lock().unwrap_or_else(PoisonError::into_inner);
        ConsoleOutput {
            stdout: String::from_utf8_lossy(&self.stdout.contents()).into_owned(),
            stderr: String::from_utf8_lossy(&self.stderr.contents()).into_owned(),
            logs: logs.lines.clone(),
            dropped_logs: logs.dropped,
        }
    }
}

/// What a guest wrote during a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsoleOutput {
    pub stdout: String,
    pub stderr: String,
    pub logs: Vec<String>,
    /// Lines discarded after the per-run cap was reached.
    pub dropped_logs: usize,
}
