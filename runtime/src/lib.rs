// Host harness for canvas-style WebAssembly modules: loads a module, binds the
// drawing/console imports it expects and drives its per-frame callback.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::time::Instant;

use thiserror::Error;

pub mod canvas;
pub mod color;
pub mod config;
pub mod console;
pub mod engines;
pub mod frame;
pub mod host;
pub mod memory;

pub use canvas::Canvas;
pub use color::Color;
pub use config::{DebugBreak, HostConfig};
pub use console::{ConsoleBuffer, ConsoleSink, StdioSink, Stream};
pub use frame::{FrameClock, FrameSource, Interval};
pub use host::HostFunction;

/// Result alias used by the runtime.
pub type Result<T> = core::result::Result<T, Error>;

/// Common error cases for the runtime and engines.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// The module source has nothing under the requested name.
    #[error("module `{0}` not found")]
    ModuleNotFound(String),
    /// Reading the module bytes failed for a reason other than absence.
    #[error("failed to read module `{name}`: {message}")]
    Io { name: String, message: String },
    /// The module does not export something the host relies on.
    #[error("module does not export `{0}`")]
    ExportNotFound(String),
    /// The module called an `env` import the host does not provide.
    #[error("Missing function: {0}")]
    MissingHostFunction(String),
    /// A string span reached past the end of linear memory.
    #[error("memory access out of bounds: {offset}+{len} exceeds {size} bytes")]
    OutOfBounds { offset: u64, len: u64, size: usize },
    /// `set_update_frame` pointed at an empty or nonexistent table slot.
    #[error("function table index {0} does not hold a function")]
    BadTableIndex(u64),
    /// A requested drawing surface exceeds the host's size limits.
    #[error("drawing surface {width}x{height} is too large")]
    SurfaceTooLarge { width: u32, height: u32 },
    /// The requested frame rate has no usable frame period.
    #[error("invalid frame rate: {0}")]
    FrameRate(String),
    /// A drawing call arrived while no surface is bound.
    #[error("no drawing surface is bound")]
    NoSurface,
    /// An export or import has a shape the host cannot drive.
    #[error("unexpected signature for `{name}`: {detail}")]
    Signature { name: String, detail: String },
    /// Writing the canvas snapshot failed.
    #[error("snapshot failed: {0}")]
    Snapshot(String),
    /// The underlying engine failed.
    #[error("engine: {0}")]
    Engine(String),
}

/// Source of WASM bytecode.
pub trait ModuleSource {
    /// Fetches raw bytes for the module registered under `name`.
    fn fetch(&self, name: &str) -> Result<Vec<u8>>;
}

/// Reads modules from files below a root directory.
pub struct FileSource {
    root: PathBuf,
}

impl FileSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl ModuleSource for FileSource {
    fn fetch(&self, name: &str) -> Result<Vec<u8>> {
        let path = self.root.join(name);
        fs::read(&path).map_err(|err| match err.kind() {
            io::ErrorKind::NotFound => Error::ModuleNotFound(name.to_string()),
            _ => Error::Io {
                name: name.to_string(),
                message: err.to_string(),
            },
        })
    }
}

/// Simple in-memory module store.
#[derive(Default)]
pub struct MemoryStore {
    modules: HashMap<String, Vec<u8>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a module.
    pub fn upsert(&mut self, name: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        self.modules.insert(name.into(), bytes.into());
    }
}

impl ModuleSource for MemoryStore {
    fn fetch(&self, name: &str) -> Result<Vec<u8>> {
        self.modules
            .get(name)
            .cloned()
            .ok_or_else(|| Error::ModuleNotFound(name.to_string()))
    }
}

/// Pending one-shot timers owned by a guest, serviced between frames.
pub trait Timers {
    /// Earliest instant at which [`Timers::fire`] has work to do.
    fn deadline(&self) -> Option<Instant>;

    /// Runs every timer whose deadline is at or before `now`.
    fn fire(&mut self, now: Instant);
}

/// A module instantiated against the host function table.
pub trait Guest: Timers {
    /// Calls the module entry point once.
    fn run_main(&mut self) -> Result<()>;

    /// Calls the installed update callback, if any, with the frame delta.
    fn update_frame(&mut self, delta_seconds: f64) -> Result<()>;

    /// Flushes buffered console output; called once the frame loop ends.
    fn shutdown(&mut self) {}
}

/// Execution engine abstraction so the runtime can swap backends.
pub trait Engine {
    type Guest: Guest;

    /// Compiles and instantiates a module.
    fn load(&mut self, module: &[u8]) -> Result<Self::Guest>;
}

/// Drives one module from load through its frame loop.
pub struct Runtime<E, S> {
    engine: E,
    source: S,
}

impl<E, S> Runtime<E, S>
where
    E: Engine,
    S: ModuleSource,
{
    /// Creates a runtime from an engine and a module source.
    pub const fn new(engine: E, source: S) -> Self {
        Self { engine, source }
    }

    /// Fetches and instantiates a module, then calls its entry point.
    pub fn start(&mut self, name: &str) -> Result<E::Guest> {
        let bytes = self.source.fetch(name)?;
        tracing::info!(module = name, bytes = bytes.len(), "loading module");
        let mut guest = self.engine.load(&bytes)?;
        if let Err(err) = guest.run_main() {
            guest.shutdown();
            return Err(err);
        }
        Ok(guest)
    }

    /// Loads a module and drives its update callback until `frames` runs dry.
    ///
    /// The guest is handed back so callers can inspect its final state. A
    /// failing update callback ends the loop; buffered console output is
    /// flushed before the error is returned.
    pub fn run<F>(&mut self, name: &str, frames: &mut F) -> Result<E::Guest>
    where
        F: FrameSource + ?Sized,
    {
        let mut guest = self.start(name)?;
        let outcome = drive(&mut guest, frames);
        guest.shutdown();
        let count = outcome?;
        tracing::info!(frames = count, "frame loop finished");
        Ok(guest)
    }

    /// Consumes the runtime and returns its parts.
    pub fn into_parts(self) -> (E, S) {
        (self.engine, self.source)
    }
}

fn drive<G, F>(guest: &mut G, frames: &mut F) -> Result<u64>
where
    G: Guest,
    F: FrameSource + ?Sized,
{
    let mut clock = FrameClock::default();
    let mut updates = 0;
    while let Some(timestamp) = frames.next_frame(guest) {
        if let Some(delta) = clock.tick(timestamp) {
            guest.update_frame(delta)?;
            updates += 1;
        }
    }
    Ok(updates)
}
