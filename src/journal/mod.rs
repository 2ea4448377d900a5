//! Transaction journal.
//!
//! Every bank operation reports its outcome as exactly one line; the line
//! formats are part of the engine contract and must not be altered by a
//! logging framework, so the journal is its own component and `tracing` is
//! reserved for operational diagnostics.
//!
//! Lines are serialized by a mutex and flushed individually, making the
//! journal atomic per line across all threads.
//!
//! # Log mode
//!
//! Error suppression is per thread: a dispatcher executing the first attempt
//! of a PERSISTENT operation switches its own thread to [`LogMode::SuccessOnly`]
//! so the provisional failure leaves no trace, then restores [`LogMode::All`]
//! before the retry. The mode lives in a thread-local cell; success lines are
//! never suppressed.

use std::cell::Cell;
use std::fs::File;
use std::io::{self, LineWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Per-thread journaling policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogMode {
    /// Record every outcome (default).
    All,
    /// Drop error lines; success lines still go through.
    SuccessOnly,
}

thread_local! {
    static LOG_MODE: Cell<LogMode> = const { Cell::new(LogMode::All) };
}

/// Set the calling thread's journaling policy.
pub fn set_thread_log_mode(mode: LogMode) {
    LOG_MODE.with(|m| m.set(mode));
}

/// The calling thread's current journaling policy.
pub fn thread_log_mode() -> LogMode {
    LOG_MODE.with(|m| m.get())
}

/// Line-oriented log sink, atomic per line.
pub struct Journal {
    sink: Mutex<Box<dyn Write + Send>>,
}

impl std::fmt::Debug for Journal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Journal").finish_non_exhaustive()
    }
}

impl Journal {
    /// Journal writing to the file at `path`, created or truncated.
    pub fn to_file(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = File::create(path)?;
        Ok(Self {
            sink: Mutex::new(Box::new(LineWriter::new(file))),
        })
    }

    /// Journal writing to an arbitrary sink.
    pub fn to_writer(writer: Box<dyn Write + Send>) -> Self {
        Self {
            sink: Mutex::new(writer),
        }
    }

    /// Journal that discards everything.
    pub fn sink() -> Self {
        Self::to_writer(Box::new(io::sink()))
    }

    /// Journal that records lines into memory, for assertions in tests.
    pub fn capture() -> (Self, JournalCapture) {
        let buffer: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));
        let journal = Self::to_writer(Box::new(SharedBuffer {
            buffer: Arc::clone(&buffer),
        }));
        (journal, JournalCapture { buffer })
    }

    /// Append one line. Write failures are swallowed: the journal is an
    /// observation channel and must never fail a transaction.
    pub fn append(&self, line: &str) {
        let mut sink = self.sink.lock().unwrap();
        let _ = writeln!(sink, "{line}");
        let _ = sink.flush();
    }

    /// Append one error line, unless the calling thread is in
    /// [`LogMode::SuccessOnly`].
    pub fn append_error(&self, line: &str) {
        if thread_log_mode() == LogMode::SuccessOnly {
            return;
        }
        self.append(line);
    }
}

struct SharedBuffer {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Read side of [`Journal::capture`].
#[derive(Debug, Clone)]
pub struct JournalCapture {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl JournalCapture {
    /// All lines recorded so far.
    pub fn lines(&self) -> Vec<String> {
        let buffer = self.buffer.lock().unwrap();
        String::from_utf8_lossy(&buffer)
            .lines()
            .map(str::to_owned)
            .collect()
    }

    /// Whether any recorded line contains `needle`.
    pub fn contains(&self, needle: &str) -> bool {
        self.lines().iter().any(|l| l.contains(needle))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_records_lines_in_order() {
        let (journal, capture) = Journal::capture();
        journal.append("first");
        journal.append("second");
        assert_eq!(capture.lines(), vec!["first", "second"]);
    }

    #[test]
    fn test_success_only_drops_errors_but_not_successes() {
        let (journal, capture) = Journal::capture();
        set_thread_log_mode(LogMode::SuccessOnly);
        journal.append_error("suppressed");
        journal.append("kept");
        set_thread_log_mode(LogMode::All);
        journal.append_error("visible");
        assert_eq!(capture.lines(), vec!["kept", "visible"]);
    }

    #[test]
    fn test_mode_is_per_thread() {
        set_thread_log_mode(LogMode::SuccessOnly);
        let other = std::thread::spawn(thread_log_mode).join().unwrap();
        assert_eq!(other, LogMode::All);
        set_thread_log_mode(LogMode::All);
    }
}
