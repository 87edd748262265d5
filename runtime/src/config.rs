use std::io::{self, BufRead, IsTerminal, Write};
use std::time::Duration;

use crate::canvas::DEFAULT_SIZE;

/// How long an unterminated console line may sit before it is flushed.
pub const DEFAULT_FLUSH_DELAY: Duration = Duration::from_millis(3);

/// What `wasm_debug_break` does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DebugBreak {
    /// Note the request in the trace log and carry on.
    #[default]
    Ignore,
    /// Stop until Enter is pressed, when stdin is an interactive terminal.
    Pause,
}

impl DebugBreak {
    pub(crate) fn trigger(self) {
        tracing::debug!("guest requested a debug break");
        if self == DebugBreak::Ignore || !io::stdin().is_terminal() {
            return;
        }
        let mut stderr = io::stderr().lock();
        let _ = write!(stderr, "paused at wasm_debug_break, press Enter to continue ");
        let _ = stderr.flush();
        let mut line = String::new();
        let _ = io::stdin().lock().read_line(&mut line);
    }
}

/// Settings for a guest's host environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostConfig {
    /// Initial drawing surface size; `None` leaves the guest without one.
    pub surface: Option<(u32, u32)>,
    pub flush_delay: Duration,
    pub debug_break: DebugBreak,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            surface: Some(DEFAULT_SIZE),
            flush_delay: DEFAULT_FLUSH_DELAY,
            debug_break: DebugBreak::Ignore,
        }
    }
}
