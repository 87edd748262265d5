//! The host function table a module sees under its `env` import namespace.
//!
//! [`HostApi`] lists the operations; [`HostFunction`] is the name-keyed
//! dispatcher used at the import boundary. Names the table does not know
//! resolve to [`Error::MissingHostFunction`], so an unimplemented hook fails on
//! first use instead of quietly returning zero.

use std::time::Instant;

use crate::canvas::Canvas;
use crate::color::Color;
use crate::config::{DebugBreak, HostConfig};
use crate::console::{ConsoleBuffer, ConsoleSink, StdioSink, Stream};
use crate::{Error, Result};

/// Import namespace the table is exposed under.
pub const IMPORT_MODULE: &str = "env";

/// Operations a module can reach through its imports.
pub trait HostApi {
    fn set_canvas_size(&mut self, width: u32, height: u32) -> Result<()>;
    fn clear_with_color(&mut self, color: Color) -> Result<()>;
    fn fill_rect(&mut self, x: f64, y: f64, w: f64, h: f64, color: Color) -> Result<()>;
    fn fill_circle(&mut self, x: f64, y: f64, radius: f64, color: Color) -> Result<()>;
    /// Installs the function at `index` of the module's table as the update callback.
    fn set_update_frame(&mut self, index: u64) -> Result<()>;
    /// Forwards `len` bytes of UTF-8 at `offset` to the console.
    fn write_string(&mut self, len: u64, offset: u64, to_error: bool) -> Result<()>;
    fn debug_break(&mut self) -> Result<()>;
}

/// A numeric argument as it arrived from the module, before coercion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Arg {
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
}

impl Arg {
    /// Coordinates and radii. Integers are signed.
    fn as_f64(self) -> f64 {
        match self {
            Arg::I32(v) => v as f64,
            Arg::I64(v) => v as f64,
            Arg::F32(v) => v as f64,
            Arg::F64(v) => v,
        }
    }

    /// Offsets, lengths and table indices. A 32-bit value is an unsigned pointer.
    fn as_u64(self) -> u64 {
        match self {
            Arg::I32(v) => v as u32 as u64,
            Arg::I64(v) => v as u64,
            Arg::F32(v) => v as u64,
            Arg::F64(v) => v as u64,
        }
    }

    /// Canvas dimensions; negative values clamp to zero.
    fn as_size(self) -> u32 {
        match self {
            Arg::I32(v) => v.max(0) as u32,
            Arg::I64(v) => v.clamp(0, u32::MAX as i64) as u32,
            Arg::F32(v) => v as u32,
            Arg::F64(v) => v as u32,
        }
    }

    fn as_color(self) -> Color {
        match self {
            Arg::I32(v) => Color(v as u32),
            Arg::I64(v) => Color::from_bits(v as u64),
            Arg::F32(v) => Color::from_bits(v as i64 as u64),
            Arg::F64(v) => Color::from_bits(v as i64 as u64),
        }
    }

    fn as_bool(self) -> bool {
        match self {
            Arg::I32(v) => v != 0,
            Arg::I64(v) => v != 0,
            Arg::F32(v) => v != 0.0,
            Arg::F64(v) => v != 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostFunction {
    SetCanvasSize,
    ClearWithColor,
    FillRect,
    FillCircle,
    SetUpdateFrame,
    WriteString,
    DebugBreak,
}

impl HostFunction {
    pub const ALL: [HostFunction; 7] = [
        HostFunction::SetCanvasSize,
        HostFunction::ClearWithColor,
        HostFunction::FillRect,
        HostFunction::FillCircle,
        HostFunction::SetUpdateFrame,
        HostFunction::WriteString,
        HostFunction::DebugBreak,
    ];

    /// Import name as emitted by the module toolchain.
    pub const fn name(self) -> &'static str {
        match self {
            HostFunction::SetCanvasSize => "set_canvas_size",
            HostFunction::ClearWithColor => "clear_with_color",
            HostFunction::FillRect => "fill_rect",
            HostFunction::FillCircle => "fill_circle",
            HostFunction::SetUpdateFrame => "set_update_frame",
            HostFunction::WriteString => "wasm_write_string",
            HostFunction::DebugBreak => "wasm_debug_break",
        }
    }

    pub const fn arity(self) -> usize {
        match self {
            HostFunction::SetCanvasSize => 2,
            HostFunction::ClearWithColor => 1,
            HostFunction::FillRect => 5,
            HostFunction::FillCircle => 4,
            HostFunction::SetUpdateFrame => 1,
            HostFunction::WriteString => 3,
            HostFunction::DebugBreak => 0,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "write_string" => Some(HostFunction::WriteString),
            "debug_break" => Some(HostFunction::DebugBreak),
            _ => Self::ALL.into_iter().find(|f| f.name() == name),
        }
    }

    /// Like [`HostFunction::from_name`], but unknown names are an error. The
    /// engine links that error into a stub so the module fails on first call.
    pub fn resolve(name: &str) -> Result<Self> {
        Self::from_name(name).ok_or_else(|| Error::MissingHostFunction(name.to_string()))
    }

    /// Coerces `args` and calls the matching operation on `api`.
    pub fn dispatch(self, api: &mut dyn HostApi, args: &[Arg]) -> Result<()> {
        if args.len() != self.arity() {
            return Err(Error::Signature {
                name: self.name().to_string(),
                detail: format!("expected {} arguments, got {}", self.arity(), args.len()),
            });
        }
        match self {
            HostFunction::SetCanvasSize => api.set_canvas_size(args[0].as_size(), args[1].as_size()),
            HostFunction::ClearWithColor => api.clear_with_color(args[0].as_color()),
            HostFunction::FillRect => api.fill_rect(
                args[0].as_f64(),
                args[1].as_f64(),
                args[2].as_f64(),
                args[3].as_f64(),
                args[4].as_color(),
            ),
            HostFunction::FillCircle => api.fill_circle(
                args[0].as_f64(),
                args[1].as_f64(),
                args[2].as_f64(),
                args[3].as_color(),
            ),
            HostFunction::SetUpdateFrame => api.set_update_frame(args[0].as_u64()),
            HostFunction::WriteString => {
                api.write_string(args[0].as_u64(), args[1].as_u64(), args[2].as_bool())
            }
            HostFunction::DebugBreak => api.debug_break(),
        }
    }
}

/// Host-side state behind the table that does not depend on the engine:
/// the drawing surface, the console buffer and the debug-break policy.
pub struct HostContext<S = Box<dyn ConsoleSink + Send>> {
    surface: Option<Canvas>,
    console: ConsoleBuffer<S>,
    debug_break: DebugBreak,
}

impl HostContext {
    /// Context writing guest output to stdout/stderr.
    pub fn stdio(config: &HostConfig) -> Result<Self> {
        Self::with_sink(config, StdioSink)
    }

    pub fn with_sink(config: &HostConfig, sink: impl ConsoleSink + Send + 'static) -> Result<Self> {
        Self::new(config, Box::new(sink))
    }
}

impl<S: ConsoleSink> HostContext<S> {
    /// Fails when the configured surface is over the size limits.
    pub fn new(config: &HostConfig, sink: S) -> Result<Self> {
        let surface = config
            .surface
            .map(|(w, h)| Canvas::new(w, h))
            .transpose()?;
        Ok(Self {
            surface,
            console: ConsoleBuffer::new(sink, config.flush_delay),
            debug_break: config.debug_break,
        })
    }

    pub fn surface(&self) -> Option<&Canvas> {
        self.surface.as_ref()
    }

    pub fn surface_mut(&mut self) -> Result<&mut Canvas> {
        self.surface.as_mut().ok_or(Error::NoSurface)
    }

    pub fn console(&self) -> &ConsoleBuffer<S> {
        &self.console
    }

    pub fn console_mut(&mut self) -> &mut ConsoleBuffer<S> {
        &mut self.console
    }

    pub fn set_canvas_size(&mut self, width: u32, height: u32) -> Result<()> {
        let surface = self.surface_mut()?;
        if let Err(err) = surface.set_size(width, height) {
            tracing::warn!(width, height, "refusing to resize drawing surface");
            return Err(err);
        }
        Ok(())
    }

    pub fn clear_with_color(&mut self, color: Color) -> Result<()> {
        self.surface_mut()?.clear_with_color(color);
        Ok(())
    }

    pub fn fill_rect(&mut self, x: f64, y: f64, w: f64, h: f64, color: Color) -> Result<()> {
        self.surface_mut()?.fill_rect(x, y, w, h, color);
        Ok(())
    }

    pub fn fill_circle(&mut self, x: f64, y: f64, radius: f64, color: Color) -> Result<()> {
        self.surface_mut()?.fill_circle(x, y, radius, color);
        Ok(())
    }

    pub fn write_text(&mut self, text: &str, to_error: bool) {
        self.console
            .write(text, Stream::from_flag(to_error), Instant::now());
    }

    pub fn debug_break(&mut self) {
        self.debug_break.trigger();
    }
}
