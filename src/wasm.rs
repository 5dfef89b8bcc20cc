//! WebAssembly bindings for the loader.
//!
//! Drives an Emscripten-built emulator from the browser. The module object
//! handed to the driver script exposes `_malloc`, `_free`, `HEAPU8` and
//! `ccall`; readiness is signalled through `onRuntimeInitialized`.
//!
//! Log events go to the browser console, one console call per event at the
//! matching console level.

use crate::fetch::HttpFetcher;
use crate::loader::status::{StatusMessage, StatusSink};
use crate::loader::{Controller, LoaderError, LoaderOptions};
use crate::module::{
    self, Arg, CallError, EmulationModule, ModuleError, Pointer, RunDependencies, Value, ValueType,
};
use crate::LoaderConfig;
use js_sys::{Array, Function, Object, Promise, Reflect, Uint8Array};
use std::cell::RefCell;
use std::io;
use std::rc::Rc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level, Metadata};
use tracing_subscriber::fmt::MakeWriter;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::{future_to_promise, JsFuture};

/// Initialize panic hook and console logging.
#[wasm_bindgen(start)]
pub fn init() {
    #[cfg(feature = "console_error_panic_hook")]
    console_error_panic_hook::set_once();
    init_logging();
}

/// Route `tracing` events to the browser console.
///
/// Safe to call more than once; only the first call installs a subscriber.
pub fn init_logging() {
    // No wall clock on wasm32-unknown-unknown; the console stamps entries itself.
    let _ = tracing_subscriber::fmt()
        .with_writer(ConsoleMakeWriter)
        .with_ansi(false)
        .without_time()
        .with_max_level(Level::INFO)
        .try_init();
}

/// Buffers one formatted event and hands it to the console on drop.
pub struct ConsoleWriter {
    level: Level,
    buf: Vec<u8>,
}

impl io::Write for ConsoleWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for ConsoleWriter {
    fn drop(&mut self) {
        let text = String::from_utf8_lossy(&self.buf);
        let text = text.trim_end();
        if text.is_empty() {
            return;
        }

        let line = JsValue::from_str(text);
        match self.level {
            Level::ERROR => web_sys::console::error_1(&line),
            Level::WARN => web_sys::console::warn_1(&line),
            Level::INFO => web_sys::console::info_1(&line),
            _ => web_sys::console::debug_1(&line),
        }
    }
}

/// `MakeWriter` picking the console method from the event level.
pub struct ConsoleMakeWriter;

impl<'a> MakeWriter<'a> for ConsoleMakeWriter {
    type Writer = ConsoleWriter;

    fn make_writer(&'a self) -> Self::Writer {
        ConsoleWriter {
            level: Level::INFO,
            buf: Vec::new(),
        }
    }

    fn make_writer_for(&'a self, meta: &Metadata<'_>) -> Self::Writer {
        ConsoleWriter {
            level: *meta.level(),
            buf: Vec::new(),
        }
    }
}

/// Render a thrown JS value as text.
fn describe(value: &JsValue) -> String {
    if let Some(text) = value.as_string() {
        return text;
    }
    if let Some(err) = value.dyn_ref::<js_sys::Error>() {
        return String::from(err.message());
    }
    format!("{value:?}")
}

/// Classify a value thrown out of the export `name`.
pub fn classify_thrown(name: &str, value: &JsValue) -> CallError {
    CallError::from_thrown(name, describe(value))
}

fn set(target: &Object, key: &str, value: &JsValue) -> Result<(), JsValue> {
    Reflect::set(target, &JsValue::from_str(key), value).map(|_| ())
}

/// The Emscripten `Module` object, seen through the loader's contract.
pub struct JsModule {
    module: Object,
    // Callbacks installed on the module object; dropping them would
    // invalidate the JS functions.
    _hooks: Vec<Closure<dyn FnMut(JsValue)>>,
}

impl JsModule {
    /// Build the module object for `canvas`.
    pub fn new(canvas: JsValue) -> Result<Self, JsValue> {
        let object = Object::new();
        set(&object, "canvas", &canvas)?;
        set(&object, "preRun", &Array::new())?;
        set(&object, "postRun", &Array::new())?;

        let print = Closure::<dyn FnMut(JsValue)>::new(|text: JsValue| module::print(&describe(&text)));
        let print_err =
            Closure::<dyn FnMut(JsValue)>::new(|text: JsValue| module::print_err(&describe(&text)));
        let set_status = Closure::<dyn FnMut(JsValue)>::new(|text: JsValue| {
            info!(target: "dosload::module", "{}", describe(&text));
        });
        let mut deps = RunDependencies::new();
        let monitor = Closure::<dyn FnMut(JsValue)>::new(move |left: JsValue| {
            let left = left.as_f64().unwrap_or(0.0).max(0.0) as u32;
            info!(target: "dosload::module", "{}", deps.update(left));
        });

        set(&object, "print", print.as_ref())?;
        set(&object, "printErr", print_err.as_ref())?;
        set(&object, "setStatus", set_status.as_ref())?;
        set(&object, "monitorRunDependencies", monitor.as_ref())?;

        Ok(Self {
            module: object,
            _hooks: vec![print, print_err, set_status, monitor],
        })
    }

    /// The raw module object.
    pub fn object(&self) -> &Object {
        &self.module
    }

    fn export(&self, name: &str) -> Result<Function, CallError> {
        Reflect::get(&self.module, &JsValue::from_str(name))
            .ok()
            .and_then(|value| value.dyn_into::<Function>().ok())
            .ok_or_else(|| CallError::MissingExport(name.to_string()))
    }

    fn heap(&self) -> Result<Uint8Array, ModuleError> {
        Reflect::get(&self.module, &JsValue::from_str("HEAPU8"))
            .ok()
            .and_then(|value| value.dyn_into::<Uint8Array>().ok())
            .ok_or_else(|| ModuleError::Unavailable("HEAPU8".into()))
    }
}

impl EmulationModule for JsModule {
    async fn initialize(&mut self, script: &[u8]) -> Result<(), ModuleError> {
        let source = std::str::from_utf8(script)
            .map_err(|e| ModuleError::Init(format!("driver script is not UTF-8: {e}")))?;

        let mut resolve_ready = None;
        let ready = Promise::new(&mut |resolve: Function, _reject: Function| {
            resolve_ready = Some(resolve);
        });
        let resolve_ready =
            resolve_ready.ok_or_else(|| ModuleError::Init("readiness promise was not created".into()))?;
        set(&self.module, "onRuntimeInitialized", &resolve_ready).map_err(|e| ModuleError::Init(describe(&e)))?;

        // The driver script expects the module object in scope as `Module`.
        let factory = Function::new_with_args("Module", source);
        factory
            .call1(&JsValue::NULL, &self.module)
            .map_err(|e| ModuleError::Init(describe(&e)))?;

        JsFuture::from(ready)
            .await
            .map_err(|e| ModuleError::Init(describe(&e)))?;
        Ok(())
    }

    fn allocate(&mut self, size: usize) -> Result<Pointer, ModuleError> {
        let malloc = self
            .export("_malloc")
            .map_err(|e| ModuleError::Unavailable(e.to_string()))?;
        let ptr = malloc
            .call1(&JsValue::NULL, &JsValue::from_f64(size as f64))
            .map_err(|e| ModuleError::Unavailable(describe(&e)))?;

        match ptr.as_f64() {
            Some(offset) if offset > 0.0 => Ok(Pointer::new(offset as u32)),
            _ => Err(ModuleError::OutOfMemory { requested: size }),
        }
    }

    fn free(&mut self, ptr: Pointer) {
        let released = self
            .export("_free")
            .map_err(|e| e.to_string())
            .and_then(|free| {
                free.call1(&JsValue::NULL, &JsValue::from_f64(f64::from(ptr.offset())))
                    .map_err(|e| describe(&e))
            });
        if let Err(e) = released {
            warn!(%ptr, "free failed: {e}");
        }
    }

    fn write_bytes(&mut self, ptr: Pointer, bytes: &[u8]) -> Result<(), ModuleError> {
        let heap = self.heap()?;
        let start = ptr.offset() as usize;
        let available = (heap.length() as usize).saturating_sub(start);
        if bytes.len() > available {
            return Err(ModuleError::OutOfBounds {
                ptr,
                len: bytes.len(),
                capacity: available,
            });
        }

        heap.set(&Uint8Array::from(bytes), ptr.offset());
        Ok(())
    }

    fn call(&mut self, name: &str, returns: ValueType, args: &[Arg<'_>]) -> Result<Value, CallError> {
        let ccall = self.export("ccall")?;

        let arg_types = Array::new();
        let values = Array::new();
        for arg in args {
            arg_types.push(&JsValue::from_str(arg.value_type().ccall_name().unwrap_or("number")));
            values.push(&match arg {
                Arg::Number(n) => JsValue::from_f64(*n),
                Arg::Str(s) => JsValue::from_str(s),
            });
        }
        let return_type = returns.ccall_name().map(JsValue::from_str).unwrap_or(JsValue::NULL);

        let result = ccall
            .apply(
                &self.module,
                &Array::of4(&JsValue::from_str(name), &return_type, &arg_types, &values),
            )
            .map_err(|e| classify_thrown(name, &e))?;

        Ok(if let Some(n) = result.as_f64() {
            Value::Number(n)
        } else if let Some(s) = result.as_string() {
            Value::Str(s)
        } else {
            Value::Void
        })
    }
}

/// Status sink forwarding to a JS callback `(message, percent)`.
///
/// A `null` message means the loader should be hidden.
pub struct JsStatus {
    onstatus: Option<Function>,
}

impl JsStatus {
    pub fn new(onstatus: Option<Function>) -> Self {
        Self { onstatus }
    }

    fn emit(&self, message: JsValue, percent: JsValue) {
        if let Some(callback) = &self.onstatus {
            if let Err(e) = callback.call2(&JsValue::NULL, &message, &percent) {
                warn!("onstatus hook threw: {}", describe(&e));
            }
        }
    }
}

impl StatusSink for JsStatus {
    fn update_message(&mut self, message: &StatusMessage) {
        let percent = message
            .percent()
            .map(|p| JsValue::from_f64(f64::from(p)))
            .unwrap_or(JsValue::UNDEFINED);
        self.emit(JsValue::from_str(&message.to_string()), percent);
    }

    fn hide_loader(&mut self) {
        self.emit(JsValue::NULL, JsValue::UNDEFINED);
    }
}

type JsController = Controller<JsModule, HttpFetcher, JsStatus>;

/// Browser-facing loader.
#[wasm_bindgen]
pub struct Dosbox {
    inner: Rc<RefCell<Option<JsController>>>,
    cancel: CancellationToken,
}

#[wasm_bindgen]
impl Dosbox {
    /// Create a loader drawing into `canvas`.
    ///
    /// `config_json` follows the loader's JSON configuration; relative URLs
    /// resolve against the page when no `base_url` is given.
    #[wasm_bindgen(constructor)]
    pub fn new(
        canvas: JsValue,
        config_json: Option<String>,
        onload: Option<Function>,
        onrun: Option<Function>,
        onstatus: Option<Function>,
    ) -> Result<Dosbox, JsError> {
        let mut config = match config_json {
            Some(text) => LoaderConfig::from_json(&text).map_err(|e| JsError::new(&e.to_string()))?,
            None => LoaderConfig::default(),
        };
        if config.base_url.is_none() {
            config.base_url = page_url();
        }

        let module = JsModule::new(canvas).map_err(|e| JsError::new(&describe(&e)))?;

        let mut options = LoaderOptions::new();
        if let Some(callback) = onload {
            options = options.on_load(move |outcome| {
                let arg = match outcome {
                    Ok(()) => JsValue::NULL,
                    Err(e) => JsValue::from_str(&e.to_string()),
                };
                if let Err(e) = callback.call1(&JsValue::NULL, &arg) {
                    warn!("onload hook threw: {}", describe(&e));
                }
            });
        }
        if let Some(callback) = onrun {
            options = options.on_run(move |program| {
                if let Err(e) = callback.call1(&JsValue::NULL, &JsValue::from_str(program)) {
                    warn!("onrun hook threw: {}", describe(&e));
                }
            });
        }

        let controller = Controller::new(module, HttpFetcher::new(), JsStatus::new(onstatus), config, options)
            .map_err(|e| JsError::new(&e.to_string()))?;
        let cancel = controller.cancel_token();

        Ok(Dosbox {
            inner: Rc::new(RefCell::new(Some(controller))),
            cancel,
        })
    }

    /// Download the driver script and initialize the emulator.
    pub fn start(&self) -> Promise {
        let inner = Rc::clone(&self.inner);
        future_to_promise(async move {
            let mut controller = take(&inner)?;
            let result = controller.start().await;
            *inner.borrow_mut() = Some(controller);
            result.map(|()| JsValue::UNDEFINED).map_err(to_js_error)
        })
    }

    /// Mount `archive_url` and launch `program` from it.
    pub fn run(&self, archive_url: String, program: String) -> Promise {
        let inner = Rc::clone(&self.inner);
        future_to_promise(async move {
            let mut controller = take(&inner)?;
            let result = controller.run(&archive_url, &program).await;
            *inner.borrow_mut() = Some(controller);
            result.map(|()| JsValue::UNDEFINED).map_err(to_js_error)
        })
    }

    /// Abort the current download.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Current lifecycle state.
    pub fn state(&self) -> String {
        self.inner
            .borrow()
            .as_ref()
            .map(|controller| controller.state().to_string())
            .unwrap_or_else(|| "busy".to_string())
    }
}

fn take(inner: &Rc<RefCell<Option<JsController>>>) -> Result<JsController, JsValue> {
    inner
        .borrow_mut()
        .take()
        .ok_or_else(|| JsValue::from_str("another loader operation is in progress"))
}

fn to_js_error(err: LoaderError) -> JsValue {
    JsError::new(&err.to_string()).into()
}

fn page_url() -> Option<String> {
    let location = Reflect::get(&js_sys::global(), &JsValue::from_str("location")).ok()?;
    Reflect::get(&location, &JsValue::from_str("href")).ok()?.as_string()
}
