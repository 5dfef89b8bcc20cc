//! Capability contract for the external emulation module.
//!
//! The emulator itself is an opaque, precompiled component. The loader only
//! needs a handful of primitives from it:
//! - `initialize` - evaluate the driver script and wait until the runtime is ready
//! - `allocate` / `free` - manage buffers in the module's linear memory
//! - `write_bytes` - copy data into linear memory
//! - `call` - invoke an exported function by name

mod host;

pub use host::HostModule;

use std::fmt;
use std::future::Future;
use thiserror::Error;
use tracing::{info, warn};

/// Value the module throws to unwind its stack while the program keeps
/// running from the browser's main loop.
pub const UNWIND_SENTINEL: &str = "SimulateInfiniteLoop";

/// Offset into the module's linear memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Pointer(u32);

impl Pointer {
    /// Wrap a raw linear-memory offset.
    pub const fn new(offset: u32) -> Self {
        Self(offset)
    }

    /// The raw offset.
    pub const fn offset(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Pointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// Types understood by the module's generic call primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Number,
    String,
    Void,
}

impl ValueType {
    /// Type name as the module's call primitive spells it (`None` for void).
    pub fn ccall_name(self) -> Option<&'static str> {
        match self {
            ValueType::Number => Some("number"),
            ValueType::String => Some("string"),
            ValueType::Void => None,
        }
    }
}

/// A call argument. Its type travels with it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Arg<'a> {
    Number(f64),
    Str(&'a str),
}

impl Arg<'_> {
    /// Declared type of this argument.
    pub fn value_type(&self) -> ValueType {
        match self {
            Arg::Number(_) => ValueType::Number,
            Arg::Str(_) => ValueType::String,
        }
    }

    /// Argument for a linear-memory pointer.
    pub fn pointer(ptr: Pointer) -> Self {
        Arg::Number(f64::from(ptr.offset()))
    }
}

/// A value returned by the module.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Number(f64),
    Str(String),
    Void,
}

impl Value {
    /// Interpret as a C `int` return value.
    pub fn as_i32(&self) -> Option<i32> {
        match *self {
            Value::Number(n) if n.fract() == 0.0 && n >= f64::from(i32::MIN) && n <= f64::from(i32::MAX) => {
                Some(n as i32)
            }
            _ => None,
        }
    }
}

/// Outcome of a failed `call`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallError {
    /// The module unwound its stack to keep running asynchronously.
    #[error("module unwound its stack; program continues in the main loop")]
    Unwind,

    #[error("`{name}` threw: {message}")]
    Thrown { name: String, message: String },

    #[error("module does not export `{0}`")]
    MissingExport(String),
}

impl CallError {
    /// Classify a value thrown out of `name`.
    pub fn from_thrown(name: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        if message == UNWIND_SENTINEL {
            CallError::Unwind
        } else {
            CallError::Thrown {
                name: name.to_string(),
                message,
            }
        }
    }

    /// Whether this is the expected unwinding sentinel.
    pub fn is_unwind(&self) -> bool {
        matches!(self, CallError::Unwind)
    }
}

/// Errors from the module's memory and lifecycle primitives.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModuleError {
    #[error("module initialization failed: {0}")]
    Init(String),

    #[error("out of module memory: requested {requested} bytes")]
    OutOfMemory { requested: usize },

    #[error("write of {len} bytes at {ptr} exceeds its allocation of {capacity} bytes")]
    OutOfBounds { ptr: Pointer, len: usize, capacity: usize },

    #[error("pointer {0} is not a live allocation")]
    InvalidPointer(Pointer),

    #[error("module primitive unavailable: {0}")]
    Unavailable(String),
}

/// The primitives the loader drives on an emulation module.
pub trait EmulationModule {
    /// Evaluate the driver script and resolve once the runtime is ready to
    /// accept calls.
    fn initialize(&mut self, script: &[u8]) -> impl Future<Output = Result<(), ModuleError>>;

    /// Reserve `size` bytes of linear memory.
    fn allocate(&mut self, size: usize) -> Result<Pointer, ModuleError>;

    /// Release a buffer returned by [`EmulationModule::allocate`].
    fn free(&mut self, ptr: Pointer);

    /// Copy `bytes` into linear memory starting at `ptr`.
    fn write_bytes(&mut self, ptr: Pointer, bytes: &[u8]) -> Result<(), ModuleError>;

    /// Invoke the export `name`.
    fn call(&mut self, name: &str, returns: ValueType, args: &[Arg<'_>]) -> Result<Value, CallError>;

    /// Runtime status line (download counters and the like).
    fn set_status(&mut self, text: &str) {
        info!(target: "dosload::module", "{text}");
    }
}

/// Module standard output.
pub fn print(text: &str) {
    info!(target: "dosload::module::stdout", "{text}");
}

/// Module standard error.
pub fn print_err(text: &str) {
    warn!(target: "dosload::module::stderr", "{text}");
}

/// Tracks the module's outstanding run dependencies.
///
/// The module reports how many dependencies are still pending; the largest
/// count seen is taken as the total.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunDependencies {
    total: u32,
}

impl RunDependencies {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `left` pending dependencies and return the status line to show.
    pub fn update(&mut self, left: u32) -> String {
        self.total = self.total.max(left);
        if left > 0 {
            format!("Preparing... ({}/{})", self.total - left, self.total)
        } else {
            "All downloads complete.".to_string()
        }
    }

    /// Largest pending count seen so far.
    pub fn total(&self) -> u32 {
        self.total
    }
}
