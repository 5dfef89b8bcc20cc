//! Headless, in-process emulation module.
//!
//! Implements the module contract without an emulator behind it: a linear
//! memory with a first-fit allocator, an `extract_zip` that accepts buffers
//! carrying a ZIP signature, and a `dosbox_main` that records the program it
//! was asked to launch. Useful for checking that a deployment serves the
//! right driver script and archive.

use super::{print, Arg, CallError, EmulationModule, ModuleError, Pointer, Value, ValueType};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Default linear memory size (16 MiB).
pub const DEFAULT_MEMORY_SIZE: usize = 16 * 1024 * 1024;

/// Offsets below this are never handed out, so 0 stays a null pointer.
const HEAP_BASE: usize = 16;

const ALIGN: usize = 8;

/// Local file header and empty-archive end record signatures.
const ZIP_SIGNATURES: [&[u8; 4]; 2] = [b"PK\x03\x04", b"PK\x05\x06"];

/// Non-zero result of `extract_zip` for buffers that are not ZIP archives.
pub const EXTRACT_NOT_AN_ARCHIVE: i32 = 1;

/// Archive recorded by a successful `extract_zip`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountedArchive {
    /// Size of the archive in bytes.
    pub len: usize,
}

/// In-process module with its own linear memory.
pub struct HostModule {
    memory: Vec<u8>,
    /// Live allocations: offset -> reserved length.
    allocations: BTreeMap<usize, usize>,
    script_len: Option<usize>,
    mounted: Vec<MountedArchive>,
    launched: Option<String>,
}

impl HostModule {
    /// Create a module with the default memory size.
    pub fn new() -> Self {
        Self::with_memory_size(DEFAULT_MEMORY_SIZE)
    }

    /// Create a module with `size` bytes of linear memory.
    pub fn with_memory_size(size: usize) -> Self {
        Self {
            memory: vec![0; size],
            allocations: BTreeMap::new(),
            script_len: None,
            mounted: Vec::new(),
            launched: None,
        }
    }

    /// Whether `initialize` has completed.
    pub fn is_ready(&self) -> bool {
        self.script_len.is_some()
    }

    /// Number of buffers currently allocated.
    pub fn live_allocations(&self) -> usize {
        self.allocations.len()
    }

    /// Archives extracted so far.
    pub fn mounted_archives(&self) -> &[MountedArchive] {
        &self.mounted
    }

    /// Program passed to the entry point, if any.
    pub fn launched_program(&self) -> Option<&str> {
        self.launched.as_deref()
    }

    /// Read back `len` bytes at `ptr`.
    pub fn read_bytes(&self, ptr: Pointer, len: usize) -> Option<&[u8]> {
        let start = ptr.offset() as usize;
        self.memory.get(start..start.checked_add(len)?)
    }

    fn find_gap(&self, size: usize) -> Option<usize> {
        let mut cursor = HEAP_BASE;
        for (&start, &len) in &self.allocations {
            if start.checked_sub(cursor)? >= size {
                return Some(cursor);
            }
            cursor = align_up(start + len)?;
        }
        (self.memory.len().checked_sub(cursor)? >= size).then_some(cursor)
    }

    fn extract_zip(&mut self, args: &[Arg<'_>]) -> Result<Value, CallError> {
        let (ptr, len) = match args {
            [Arg::Number(ptr), Arg::Number(len)] => (*ptr as usize, *len as usize),
            _ => {
                return Err(CallError::Thrown {
                    name: "extract_zip".into(),
                    message: "expected (pointer: number, length: number)".into(),
                })
            }
        };

        let Some(bytes) = ptr.checked_add(len).and_then(|end| self.memory.get(ptr..end)) else {
            return Err(CallError::Thrown {
                name: "extract_zip".into(),
                message: format!("buffer {ptr:#x}+{len} is outside linear memory"),
            });
        };

        let is_archive = ZIP_SIGNATURES.iter().any(|sig| bytes.starts_with(&sig[..]));
        if !is_archive {
            debug!(len, "extract_zip: no ZIP signature");
            return Ok(Value::Number(f64::from(EXTRACT_NOT_AN_ARCHIVE)));
        }

        self.mounted.push(MountedArchive { len });
        Ok(Value::Number(0.0))
    }

    fn dosbox_main(&mut self, args: &[Arg<'_>]) -> Result<Value, CallError> {
        let [Arg::Str(program)] = args else {
            return Err(CallError::Thrown {
                name: "dosbox_main".into(),
                message: "expected (program: string)".into(),
            });
        };

        print(&format!("host module: launching {program}"));
        self.launched = Some(program.to_string());
        Ok(Value::Number(0.0))
    }
}

impl Default for HostModule {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HostModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostModule")
            .field("memory_size", &self.memory.len())
            .field("live_allocations", &self.allocations.len())
            .field("ready", &self.is_ready())
            .field("mounted", &self.mounted.len())
            .finish()
    }
}

impl EmulationModule for HostModule {
    async fn initialize(&mut self, script: &[u8]) -> Result<(), ModuleError> {
        if script.is_empty() {
            return Err(ModuleError::Init("driver script is empty".into()));
        }
        self.script_len = Some(script.len());
        Ok(())
    }

    fn allocate(&mut self, size: usize) -> Result<Pointer, ModuleError> {
        // Zero-byte requests still get a unique address.
        let reserve = size.max(1);
        let offset = self
            .find_gap(reserve)
            .ok_or(ModuleError::OutOfMemory { requested: size })?;
        let ptr = u32::try_from(offset).map_err(|_| ModuleError::OutOfMemory { requested: size })?;

        self.allocations.insert(offset, reserve);
        Ok(Pointer::new(ptr))
    }

    fn free(&mut self, ptr: Pointer) {
        if self.allocations.remove(&(ptr.offset() as usize)).is_none() {
            warn!(%ptr, "free of unknown pointer");
        }
    }

    fn write_bytes(&mut self, ptr: Pointer, bytes: &[u8]) -> Result<(), ModuleError> {
        let start = ptr.offset() as usize;
        let capacity = *self
            .allocations
            .get(&start)
            .ok_or(ModuleError::InvalidPointer(ptr))?;
        if bytes.len() > capacity {
            return Err(ModuleError::OutOfBounds {
                ptr,
                len: bytes.len(),
                capacity,
            });
        }

        self.memory[start..start + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    fn call(&mut self, name: &str, _returns: ValueType, args: &[Arg<'_>]) -> Result<Value, CallError> {
        if !self.is_ready() {
            return Err(CallError::Thrown {
                name: name.to_string(),
                message: "module is not initialized".into(),
            });
        }

        match name {
            "extract_zip" => self.extract_zip(args),
            "dosbox_main" => self.dosbox_main(args),
            _ => Err(CallError::MissingExport(name.to_string())),
        }
    }
}

fn align_up(offset: usize) -> Option<usize> {
    Some(offset.checked_add(ALIGN - 1)? & !(ALIGN - 1))
}
