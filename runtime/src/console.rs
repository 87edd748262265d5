//! Line reassembly for guest console output.
//!
//! Guests write text in arbitrary fragments, while each sink call produces a
//! whole line. The buffer joins fragments back into lines: completed lines go
//! out at once, and an unterminated tail is held until either the stream
//! switches between stdout and stderr or the idle deadline passes.

use std::io::{self, Write};
use std::time::{Duration, Instant};

/// Which console stream a fragment belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Stream {
    #[default]
    Out,
    Err,
}

impl Stream {
    pub fn from_flag(to_error: bool) -> Self {
        if to_error {
            Stream::Err
        } else {
            Stream::Out
        }
    }
}

/// Receives whole lines, without their trailing newline.
pub trait ConsoleSink {
    fn line(&mut self, stream: Stream, text: &str);
}

impl<S: ConsoleSink + ?Sized> ConsoleSink for Box<S> {
    fn line(&mut self, stream: Stream, text: &str) {
        (**self).line(stream, text)
    }
}

/// Collects lines in memory.
impl ConsoleSink for Vec<(Stream, String)> {
    fn line(&mut self, stream: Stream, text: &str) {
        self.push((stream, text.to_string()));
    }
}

/// Sends normal lines to stdout and error lines to stderr.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdioSink;

impl ConsoleSink for StdioSink {
    fn line(&mut self, stream: Stream, text: &str) {
        // A closed pipe must not take the guest down with it.
        let _ = match stream {
            Stream::Out => writeln!(io::stdout().lock(), "{text}"),
            Stream::Err => writeln!(io::stderr().lock(), "{text}"),
        };
    }
}

pub struct ConsoleBuffer<S> {
    sink: S,
    pending: String,
    pending_stream: Stream,
    // Set only while `pending` is non-empty.
    deadline: Option<Instant>,
    flush_delay: Duration,
}

impl<S: ConsoleSink> ConsoleBuffer<S> {
    pub fn new(sink: S, flush_delay: Duration) -> Self {
        Self {
            sink,
            pending: String::new(),
            pending_stream: Stream::Out,
            deadline: None,
            flush_delay,
        }
    }

    /// Appends a fragment written at `now`.
    pub fn write(&mut self, text: &str, stream: Stream, now: Instant) {
        if !self.pending.is_empty() && self.pending_stream != stream {
            self.flush();
        }
        self.pending_stream = stream;

        let mut lines = text.split('\n');
        let tail = lines.next_back().unwrap_or_default();
        for line in lines {
            self.pending.push_str(line);
            self.flush();
        }
        self.pending.push_str(tail);

        self.deadline = if self.pending.is_empty() {
            None
        } else {
            Some(now + self.flush_delay)
        };
    }

    /// Emits whatever is pending as one line. Nothing pending, nothing sent.
    pub fn flush(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        self.sink.line(self.pending_stream, &self.pending);
        self.pending.clear();
        self.deadline = None;
    }

    /// Flushes if the idle deadline has passed by `now`.
    pub fn poll(&mut self, now: Instant) {
        if self.deadline.is_some_and(|deadline| deadline <= now) {
            self.flush();
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn pending(&self) -> &str {
        &self.pending
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }
}
