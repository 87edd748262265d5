use anyhow::Context;
use clap::Parser;
use runtime::engines::wasmtime_host::WasmtimeEngine;
use runtime::{canvas, DebugBreak, FileSource, HostConfig, Interval, Runtime};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "framehost",
    about = "Run a canvas-style WebAssembly module frame by frame."
)]
struct Args {
    /// Module to load, relative to --root
    #[arg(default_value = "main.wasm")]
    module: String,

    /// Directory modules are fetched from
    #[arg(long, default_value = ".")]
    root: PathBuf,

    /// Initial drawing surface size
    #[arg(long, value_name = "WIDTHxHEIGHT", default_value = "300x150", value_parser = parse_size)]
    canvas: (u32, u32),

    /// Run without a drawing surface; drawing calls then fail
    #[arg(long, conflicts_with = "canvas")]
    no_canvas: bool,

    /// Target frame rate
    #[arg(long, default_value_t = 60.0)]
    fps: f64,

    /// Stop after this many frames (runs until interrupted otherwise)
    #[arg(long)]
    frames: Option<u64>,

    /// Idle time before an unterminated console line is flushed
    #[arg(long, value_name = "MS", default_value_t = 3)]
    flush_delay_ms: u64,

    /// Write the final canvas to a PNG file once the frame loop ends
    #[arg(long, value_name = "PATH")]
    snapshot: Option<PathBuf>,

    /// Pause at debug breaks when attached to a terminal
    #[arg(long)]
    pause_on_break: bool,

    /// Log host diagnostics at debug level (RUST_LOG overrides)
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn host_config(&self) -> HostConfig {
        HostConfig {
            surface: (!self.no_canvas).then_some(self.canvas),
            flush_delay: Duration::from_millis(self.flush_delay_ms),
            debug_break: if self.pause_on_break {
                DebugBreak::Pause
            } else {
                DebugBreak::Ignore
            },
        }
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let mut frames = Interval::new(args.fps, args.frames).context("--fps")?;
    let engine = WasmtimeEngine::new(args.host_config()).context("starting wasmtime")?;
    let mut runtime = Runtime::new(engine, FileSource::new(&args.root));

    let guest = runtime
        .run(&args.module, &mut frames)
        .with_context(|| format!("running `{}`", args.module))?;

    if let Some(path) = &args.snapshot {
        let canvas = guest
            .canvas()
            .context("--snapshot needs a drawing surface")?;
        canvas.save_png(path)?;
        tracing::info!(path = %path.display(), "snapshot written");
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn parse_size(value: &str) -> Result<(u32, u32), String> {
    let (width, height) = value
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got `{value}`"))?;
    let parse = |part: &str| {
        part.trim()
            .parse::<u32>()
            .map_err(|_| format!("`{part}` is not a valid dimension"))
    };
    let (width, height) = (parse(width)?, parse(height)?);
    canvas::check_size(width, height).map_err(|err| err.to_string())?;
    Ok((width, height))
}
