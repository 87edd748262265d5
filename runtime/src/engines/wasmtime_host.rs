//! wasmtime-backed engine.
//!
//! Every function the module imports from `env` is linked: names in the host
//! table dispatch through [`HostFunction`], anything else links to a stub that
//! traps with [`Error::MissingHostFunction`] when called. Host functions take
//! their argument widths from the import's declared type, so modules built for
//! 32-bit and 64-bit linear memory link against the same table.

use std::time::Instant;

use wasmtime::{
    Caller, Config, Engine as HostEngine, ExternType, Func, FuncType, Instance, Linker, Memory,
    Module, OptLevel, Ref, Store, Table, Val, ValType,
};

use crate::host::{Arg, HostApi, HostContext, HostFunction, IMPORT_MODULE};
use crate::memory::read_utf8;
use crate::{Canvas, Color, Engine, Error, Guest, HostConfig, Result, Timers};

pub const MEMORY_EXPORT: &str = "memory";
pub const TABLE_EXPORT: &str = "__indirect_function_table";
pub const ENTRY_EXPORT: &str = "main";

/// Store data: everything host functions can reach.
pub struct HostState {
    host: HostContext,
    memory: Option<Memory>,
    table: Option<Table>,
    update_frame: Option<Func>,
}

/// wasmtime-backed engine.
pub struct WasmtimeEngine {
    engine: HostEngine,
    config: HostConfig,
}

impl WasmtimeEngine {
    pub fn new(config: HostConfig) -> Result<Self> {
        let mut wasm_config = Config::new();
        wasm_config.cranelift_opt_level(OptLevel::Speed);
        wasm_config.wasm_memory64(true);
        let engine = HostEngine::new(&wasm_config)
            .map_err(|err| Error::Engine(format!("wasmtime init: {err:#}")))?;
        Ok(Self { engine, config })
    }

    /// Instantiates `module` against an explicitly built host context.
    pub fn load_with(&mut self, module: &[u8], host: HostContext) -> Result<WasmtimeGuest> {
        if module.is_empty() {
            return Err(Error::Engine("wasmtime: empty module".into()));
        }
        let compiled = Module::new(&self.engine, module)
            .map_err(|err| Error::Engine(format!("wasmtime compile: {err:#}")))?;

        let mut linker = Linker::new(&self.engine);
        link(&mut linker, &compiled)?;

        let state = HostState {
            host,
            memory: None,
            table: None,
            update_frame: None,
        };
        let mut store = Store::new(&self.engine, state);
        let instance = linker.instantiate(&mut store, &compiled).map_err(trap)?;

        let memory = instance.get_memory(&mut store, MEMORY_EXPORT);
        let table = instance.get_table(&mut store, TABLE_EXPORT);
        if memory.is_none() {
            tracing::warn!("module exports no `{MEMORY_EXPORT}`; string writes will fail");
        }
        if table.is_none() {
            tracing::warn!("module exports no `{TABLE_EXPORT}`; update callbacks will fail");
        }
        tracing::debug!(
            memory_bytes = memory.map(|m| m.data_size(&store)),
            table_len = table.map(|t| t.size(&store)),
            "module instantiated"
        );
        let data = store.data_mut();
        data.memory = memory;
        data.table = table;

        Ok(WasmtimeGuest { store, instance })
    }
}

impl Engine for WasmtimeEngine {
    type Guest = WasmtimeGuest;

    fn load(&mut self, module: &[u8]) -> Result<WasmtimeGuest> {
        let host = HostContext::stdio(&self.config)?;
        self.load_with(module, host)
    }
}

/// A module instance plus its host state.
pub struct WasmtimeGuest {
    store: Store<HostState>,
    instance: Instance,
}

impl WasmtimeGuest {
    pub fn host(&self) -> &HostContext {
        &self.store.data().host
    }

    pub fn canvas(&self) -> Option<&Canvas> {
        self.host().surface()
    }

    pub fn has_update_callback(&self) -> bool {
        self.store.data().update_frame.is_some()
    }

    pub fn instance(&self) -> Instance {
        self.instance
    }

    pub fn store_mut(&mut self) -> &mut Store<HostState> {
        &mut self.store
    }
}

impl Timers for WasmtimeGuest {
    fn deadline(&self) -> Option<Instant> {
        self.host().console().deadline()
    }

    fn fire(&mut self, now: Instant) {
        self.store.data_mut().host.console_mut().poll(now);
    }
}

impl Guest for WasmtimeGuest {
    fn run_main(&mut self) -> Result<()> {
        let main = self
            .instance
            .get_func(&mut self.store, ENTRY_EXPORT)
            .ok_or_else(|| Error::ExportNotFound(ENTRY_EXPORT.into()))?;
        let ty = main.ty(&self.store);
        let params = ty
            .params()
            .map(|ty| zero(ENTRY_EXPORT, ty))
            .collect::<Result<Vec<_>>>()?;
        call(&mut self.store, main, ENTRY_EXPORT, &ty, &params)
    }

    fn update_frame(&mut self, delta_seconds: f64) -> Result<()> {
        let Some(update) = self.store.data().update_frame else {
            return Ok(());
        };
        let ty = update.ty(&self.store);
        let params = frame_args(&ty, delta_seconds)?;
        call(&mut self.store, update, "update callback", &ty, &params)
    }

    fn shutdown(&mut self) {
        self.store.data_mut().host.console_mut().flush();
    }
}

fn link(linker: &mut Linker<HostState>, module: &Module) -> Result<()> {
    for import in module.imports() {
        if import.module() != IMPORT_MODULE {
            continue;
        }
        let ExternType::Func(ty) = import.ty() else {
            continue;
        };
        let name = import.name();
        let linked = match HostFunction::resolve(name) {
            Ok(function) => {
                if ty.params().len() != function.arity() {
                    tracing::warn!(
                        name,
                        params = ty.params().len(),
                        expected = function.arity(),
                        "import declared with a different parameter count; calls will fail"
                    );
                }
                let result_types: Vec<ValType> = ty.results().collect();
                linker.func_new(IMPORT_MODULE, name, ty, move |mut caller, params, results| {
                    let args = params.iter().map(to_arg).collect::<Result<Vec<_>>>()?;
                    function.dispatch(&mut HostCall { caller: &mut caller }, &args)?;
                    // Host operations return nothing; declared results read as zero.
                    for (slot, ty) in results.iter_mut().zip(&result_types) {
                        *slot = zero(function.name(), ty.clone())?;
                    }
                    Ok(())
                })
            }
            Err(missing) => {
                tracing::warn!(name, "module imports a function the host does not provide");
                linker.func_new(IMPORT_MODULE, name, ty, move |_, _, _| {
                    Err(missing.clone().into())
                })
            }
        };
        linked.map_err(|err| Error::Engine(format!("wasmtime link `{name}`: {err:#}")))?;
    }
    Ok(())
}

/// Host-function view of the calling instance.
struct HostCall<'a, 'b> {
    caller: &'a mut Caller<'b, HostState>,
}

impl HostCall<'_, '_> {
    fn host(&mut self) -> &mut HostContext {
        &mut self.caller.data_mut().host
    }
}

impl HostApi for HostCall<'_, '_> {
    fn set_canvas_size(&mut self, width: u32, height: u32) -> Result<()> {
        self.host().set_canvas_size(width, height)
    }

    fn clear_with_color(&mut self, color: Color) -> Result<()> {
        self.host().clear_with_color(color)
    }

    fn fill_rect(&mut self, x: f64, y: f64, w: f64, h: f64, color: Color) -> Result<()> {
        self.host().fill_rect(x, y, w, h, color)
    }

    fn fill_circle(&mut self, x: f64, y: f64, radius: f64, color: Color) -> Result<()> {
        self.host().fill_circle(x, y, radius, color)
    }

    fn set_update_frame(&mut self, index: u64) -> Result<()> {
        let table = self
            .caller
            .data()
            .table
            .ok_or_else(|| Error::ExportNotFound(TABLE_EXPORT.into()))?;
        let slot = u32::try_from(index).map_err(|_| Error::BadTableIndex(index))?;
        let update = match table.get(&mut *self.caller, slot) {
            Some(Ref::Func(Some(func))) => func,
            _ => return Err(Error::BadTableIndex(index)),
        };
        tracing::debug!(index, "update callback installed");
        self.caller.data_mut().update_frame = Some(update);
        Ok(())
    }

    fn write_string(&mut self, len: u64, offset: u64, to_error: bool) -> Result<()> {
        let memory = self
            .caller
            .data()
            .memory
            .ok_or_else(|| Error::ExportNotFound(MEMORY_EXPORT.into()))?;
        let text = read_utf8(memory.data(&*self.caller), offset, len)?;
        self.host().write_text(&text, to_error);
        Ok(())
    }

    fn debug_break(&mut self) -> Result<()> {
        self.host().debug_break();
        Ok(())
    }
}

fn to_arg(val: &Val) -> Result<Arg> {
    match *val {
        Val::I32(v) => Ok(Arg::I32(v)),
        Val::I64(v) => Ok(Arg::I64(v)),
        Val::F32(bits) => Ok(Arg::F32(f32::from_bits(bits))),
        Val::F64(bits) => Ok(Arg::F64(f64::from_bits(bits))),
        _ => Err(Error::Signature {
            name: "host function".into(),
            detail: "only numeric arguments are supported".into(),
        }),
    }
}

fn zero(name: &str, ty: ValType) -> Result<Val> {
    match ty {
        ValType::I32 => Ok(Val::I32(0)),
        ValType::I64 => Ok(Val::I64(0)),
        ValType::F32 => Ok(Val::F32(0)),
        ValType::F64 => Ok(Val::F64(0)),
        other => Err(Error::Signature {
            name: name.to_string(),
            detail: format!("cannot pass a placeholder for {other:?}"),
        }),
    }
}

/// Placeholders for every parameter but the last, which carries the delta.
fn frame_args(ty: &FuncType, delta_seconds: f64) -> Result<Vec<Val>> {
    let name = "update callback";
    let params: Vec<ValType> = ty.params().collect();
    let Some((last, leading)) = params.split_last() else {
        return Err(Error::Signature {
            name: name.into(),
            detail: "takes no frame delta parameter".into(),
        });
    };
    let delta = match last {
        ValType::F64 => Val::F64(delta_seconds.to_bits()),
        ValType::F32 => Val::F32((delta_seconds as f32).to_bits()),
        other => {
            return Err(Error::Signature {
                name: name.into(),
                detail: format!("frame delta must be a float, found {other:?}"),
            })
        }
    };
    let mut args = leading
        .iter()
        .map(|ty| zero(name, ty.clone()))
        .collect::<Result<Vec<_>>>()?;
    args.push(delta);
    Ok(args)
}

fn call(
    store: &mut Store<HostState>,
    func: Func,
    name: &str,
    ty: &FuncType,
    params: &[Val],
) -> Result<()> {
    let mut results = ty
        .results()
        .map(|ty| zero(name, ty))
        .collect::<Result<Vec<_>>>()?;
    func.call(&mut *store, params, &mut results).map_err(trap)
}

/// Recovers errors raised by host functions; anything else is an engine failure.
fn trap(err: anyhow::Error) -> Error {
    match err.downcast::<Error>() {
        Ok(err) => err,
        Err(err) => Error::Engine(format!("{err:#}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::{ConsoleSink, Stream};
    use crate::{FrameSource, MemoryStore, Runtime};
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct SharedSink(Arc<Mutex<Vec<(Stream, String)>>>);

    impl ConsoleSink for SharedSink {
        fn line(&mut self, stream: Stream, text: &str) {
            self.0.lock().unwrap().push((stream, text.to_string()));
        }
    }

    impl SharedSink {
        fn lines(&self) -> Vec<(Stream, String)> {
            self.0.lock().unwrap().clone()
        }
    }

    const DEMO: &str = r#"
        (module
          (import "env" "set_canvas_size" (func $size (param i32 i32)))
          (import "env" "clear_with_color" (func $clear (param i32)))
          (import "env" "fill_rect" (func $rect (param f32 f32 f32 f32 i32)))
          (import "env" "set_update_frame" (func $set_update (param i64)))
          (import "env" "wasm_write_string" (func $write (param i64 i64 i32)))
          (memory (export "memory") 1)
          (table (export "__indirect_function_table") 2 funcref)
          (elem (i32.const 1) $update)
          (data (i32.const 16) "hello\nworld")
          (global $frames (export "frames") (mut i32) (i32.const 0))
          (global $last_delta (export "last_delta") (mut f64) (f64.const 0))
          (func (export "main") (param i32 i64)
            (call $size (i32.const 4) (i32.const 2))
            (call $clear (i32.const 0xff0000ff))
            (call $write (i64.const 11) (i64.const 16) (i32.const 0))
            (call $set_update (i64.const 1)))
          (func $update (param i64 f64)
            (global.set $frames (i32.add (global.get $frames) (i32.const 1)))
            (global.set $last_delta (local.get 1))
            (call $rect (f32.const 0) (f32.const 0) (f32.const 1) (f32.const 1)
                        (i32.const 0xffff0000))))
    "#;

    fn engine(config: HostConfig) -> WasmtimeEngine {
        WasmtimeEngine::new(config).unwrap()
    }

    fn load(wat: &str, config: HostConfig) -> (WasmtimeGuest, SharedSink) {
        let sink = SharedSink::default();
        let host = HostContext::with_sink(&config, sink.clone()).unwrap();
        let guest = engine(config).load_with(wat.as_bytes(), host).unwrap();
        (guest, sink)
    }

    fn global(guest: &mut WasmtimeGuest, name: &str) -> Val {
        let instance = guest.instance();
        instance
            .get_global(guest.store_mut(), name)
            .unwrap()
            .get(guest.store_mut())
    }

    #[test]
    fn main_draws_logs_and_registers_callback() {
        let (mut guest, sink) = load(DEMO, HostConfig::default());
        guest.run_main().unwrap();

        let canvas = guest.canvas().unwrap();
        assert_eq!((canvas.width(), canvas.height()), (4, 2));
        assert_eq!(canvas.pixel(3, 1), Some(Color(0xFF00_00FF)));
        assert!(guest.has_update_callback());

        assert_eq!(sink.lines(), [(Stream::Out, "hello".to_string())]);
        assert!(guest.deadline().is_some());
        guest.shutdown();
        assert_eq!(
            sink.lines(),
            [
                (Stream::Out, "hello".to_string()),
                (Stream::Out, "world".to_string())
            ]
        );
    }

    #[test]
    fn update_callback_receives_delta() {
        let (mut guest, _sink) = load(DEMO, HostConfig::default());
        guest.run_main().unwrap();

        guest.update_frame(0.016).unwrap();
        guest.update_frame(0.017).unwrap();

        assert_eq!(global(&mut guest, "frames").i32(), Some(2));
        assert_eq!(global(&mut guest, "last_delta").f64(), Some(0.017));
        assert_eq!(guest.canvas().unwrap().pixel(0, 0), Some(Color(0xFFFF_0000)));
    }

    #[test]
    fn update_without_callback_is_noop() {
        let (mut guest, _sink) = load(DEMO, HostConfig::default());
        assert!(!guest.has_update_callback());
        guest.update_frame(0.5).unwrap();
        assert_eq!(global(&mut guest, "frames").i32(), Some(0));
    }

    #[test]
    fn missing_import_fails_on_first_call() {
        let wat = r#"
            (module
              (import "env" "play_sound" (func $play (param i32)))
              (func (export "main") (param i32 i64)
                (call $play (i32.const 7))))
        "#;
        // Linking succeeds; only the call fails.
        let (mut guest, _sink) = load(wat, HostConfig::default());
        let err = guest.run_main().unwrap_err();
        assert_eq!(err, Error::MissingHostFunction("play_sound".into()));
        assert!(err.to_string().contains("play_sound"));
    }

    #[test]
    fn string_past_memory_end_traps() {
        let wat = r#"
            (module
              (import "env" "wasm_write_string" (func $write (param i32 i32 i32)))
              (memory (export "memory") 1)
              (func (export "main") (param i32 i64)
                (call $write (i32.const 100) (i32.const 65500) (i32.const 1))))
        "#;
        let (mut guest, sink) = load(wat, HostConfig::default());
        let err = guest.run_main().unwrap_err();
        assert_eq!(
            err,
            Error::OutOfBounds {
                offset: 65500,
                len: 100,
                size: 65536
            }
        );
        assert!(sink.lines().is_empty());
    }

    #[test]
    fn memory64_modules_are_supported() {
        let wat = r#"
            (module
              (import "env" "wasm_write_string" (func $write (param i64 i64 i32)))
              (memory (export "memory") i64 1)
              (data (i64.const 8) "oops\n")
              (func (export "main") (param i32 i64)
                (call $write (i64.const 5) (i64.const 8) (i32.const 1))))
        "#;
        let (mut guest, sink) = load(wat, HostConfig::default());
        guest.run_main().unwrap();
        assert_eq!(sink.lines(), [(Stream::Err, "oops".to_string())]);
    }

    #[test]
    fn empty_table_slot_is_rejected() {
        let wat = r#"
            (module
              (import "env" "set_update_frame" (func $set_update (param i32)))
              (table (export "__indirect_function_table") 2 funcref)
              (func (export "main") (param i32 i64)
                (call $set_update (local.get 0))))
        "#;
        let (mut guest, _sink) = load(wat, HostConfig::default());
        assert_eq!(guest.run_main().unwrap_err(), Error::BadTableIndex(0));
    }

    #[test]
    fn drawing_without_surface_traps() {
        let wat = r#"
            (module
              (import "env" "clear_with_color" (func $clear (param i32)))
              (func (export "main") (param i32 i64)
                (call $clear (i32.const 0))))
        "#;
        let config = HostConfig {
            surface: None,
            ..HostConfig::default()
        };
        let (mut guest, _sink) = load(wat, config);
        assert_eq!(guest.run_main().unwrap_err(), Error::NoSurface);
    }

    #[test]
    fn wrong_arity_import_fails_only_when_called() {
        let wat = r#"
            (module
              (import "env" "fill_circle" (func $circle (param f64 f64 i32)))
              (global $calls (export "calls") (mut i32) (i32.const 0))
              (func (export "main") (param i32 i64)
                (global.set $calls (i32.const 1)))
              (func (export "draw")
                (call $circle (f64.const 1) (f64.const 1) (i32.const 0))))
        "#;
        let (mut guest, _sink) = load(wat, HostConfig::default());
        guest.run_main().unwrap();
        assert_eq!(global(&mut guest, "calls").i32(), Some(1));

        let instance = guest.instance();
        let draw = instance
            .get_typed_func::<(), ()>(guest.store_mut(), "draw")
            .unwrap();
        let err = trap(draw.call(guest.store_mut(), ()).unwrap_err());
        assert!(matches!(err, Error::Signature { ref name, .. } if name == "fill_circle"));
    }

    #[test]
    fn oversized_canvas_traps_without_killing_the_host() {
        let wat = r#"
            (module
              (import "env" "set_canvas_size" (func $size (param i32 i32)))
              (func (export "main") (param i32 i64)
                (call $size (i32.const 0x7fffffff) (i32.const 0x7fffffff))))
        "#;
        let (mut guest, _sink) = load(wat, HostConfig::default());
        let err = guest.run_main().unwrap_err();
        assert!(matches!(err, Error::SurfaceTooLarge { .. }));
        assert_eq!(guest.canvas().unwrap().width(), 300);
    }

    #[test]
    fn missing_entry_point_is_reported() {
        let (mut guest, _sink) = load("(module)", HostConfig::default());
        assert_eq!(
            guest.run_main().unwrap_err(),
            Error::ExportNotFound("main".into())
        );
    }

    struct Scripted(VecDeque<f64>);

    impl FrameSource for Scripted {
        fn next_frame(&mut self, _timers: &mut dyn Timers) -> Option<f64> {
            self.0.pop_front()
        }
    }

    #[test]
    fn runtime_drives_frames() {
        let mut store = MemoryStore::new();
        store.upsert("main.wasm", DEMO);
        let mut runtime = Runtime::new(engine(HostConfig::default()), store);
        let mut frames = Scripted(VecDeque::from([1000.0, 1016.0, 1033.0]));

        let mut guest = runtime.run("main.wasm", &mut frames).unwrap();

        assert_eq!(global(&mut guest, "frames").i32(), Some(2));
        let delta = global(&mut guest, "last_delta").f64().unwrap();
        assert!((delta - 0.017).abs() < 1e-9);
    }
}
