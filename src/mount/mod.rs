//! Archive mount pipeline.
//!
//! Fetched archive bytes are copied into the module's linear memory and the
//! module is asked to extract them into its virtual filesystem. The buffer
//! is released exactly once per attempt, whatever the extraction does.

use crate::fetch::{Fetch, FetchError, Progress};
use crate::module::{Arg, CallError, EmulationModule, ModuleError, Pointer, ValueType};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

/// Default name of the module's extraction export.
pub const EXTRACT_EXPORT: &str = "extract_zip";

/// Fetched archive contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Raw bytes.
    Bytes(Vec<u8>),
    /// Bytes carried one per character, as a byte-preserving text transport
    /// delivers them.
    Text(String),
}

impl Payload {
    /// Decode into bytes.
    ///
    /// Text keeps the low 8 bits of each character code. That maps both
    /// Latin-1 text and the `x-user-defined` charset (bytes 0x80..=0xFF as
    /// U+F780..=U+F7FF) back to the original bytes. Whether the transport
    /// really produced such a mapping is the sender's responsibility.
    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Payload::Bytes(bytes) => bytes,
            Payload::Text(text) => text.chars().map(|c| (u32::from(c) & 0xFF) as u8).collect(),
        }
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Payload::Bytes(bytes)
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Payload::Text(text)
    }
}

/// Errors raised while mounting an archive.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MountError {
    #[error("download failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("could not allocate {len} bytes of module memory: {source}")]
    Allocation { len: usize, source: ModuleError },

    #[error("could not copy archive into module memory: {0}")]
    Write(ModuleError),

    #[error("extraction call failed: {0}")]
    Call(CallError),

    #[error("archive extraction failed with code {code}")]
    ExtractionFailed { code: i32 },

    #[error("extraction returned a non-integer value: {0}")]
    UnexpectedReturn(String),

    #[error("mount cancelled")]
    Cancelled,
}

/// A buffer in module memory, released when dropped.
pub struct Allocation<'m, M: EmulationModule> {
    module: &'m mut M,
    ptr: Pointer,
}

impl<'m, M: EmulationModule> Allocation<'m, M> {
    /// Allocate `len` bytes in `module`.
    pub fn new(module: &'m mut M, len: usize) -> Result<Self, ModuleError> {
        let ptr = module.allocate(len)?;
        Ok(Self { module, ptr })
    }

    /// Address of the buffer.
    pub fn ptr(&self) -> Pointer {
        self.ptr
    }

    /// Copy `bytes` into the buffer.
    pub fn write(&mut self, bytes: &[u8]) -> Result<(), ModuleError> {
        self.module.write_bytes(self.ptr, bytes)
    }

    /// Module the buffer lives in.
    pub fn module(&mut self) -> &mut M {
        self.module
    }
}

impl<M: EmulationModule> Drop for Allocation<'_, M> {
    fn drop(&mut self) {
        self.module.free(self.ptr);
    }
}

/// Copy `bytes` into `module` and extract them through `export`.
///
/// An empty archive is still handed to the module, which decides whether
/// that is a valid mount.
pub fn mount_bytes<M: EmulationModule>(module: &mut M, export: &str, bytes: &[u8]) -> Result<(), MountError> {
    let mut buffer = Allocation::new(module, bytes.len())
        .map_err(|source| MountError::Allocation { len: bytes.len(), source })?;
    buffer.write(bytes).map_err(MountError::Write)?;

    let ptr = buffer.ptr();
    debug!(%ptr, len = bytes.len(), export, "extracting archive");
    let result = buffer
        .module()
        .call(
            export,
            ValueType::Number,
            &[Arg::pointer(ptr), Arg::Number(bytes.len() as f64)],
        )
        .map_err(MountError::Call)?;

    match result.as_i32() {
        Some(0) => Ok(()),
        Some(code) => Err(MountError::ExtractionFailed { code }),
        None => Err(MountError::UnexpectedReturn(format!("{result:?}"))),
    }
}

/// Decode `payload` and mount it.
pub fn mount_payload<M: EmulationModule>(module: &mut M, export: &str, payload: Payload) -> Result<(), MountError> {
    mount_bytes(module, export, &payload.into_bytes())
}

/// Download the archive at `url` and mount it.
///
/// Returns the archive size. Cancellation is honoured until the bytes are
/// handed to the module; the copy and extraction run to completion.
pub async fn fetch_and_mount<F, M>(
    fetcher: &F,
    module: &mut M,
    url: &Url,
    export: &str,
    cancel: &CancellationToken,
    progress: &mut dyn FnMut(Progress),
) -> Result<usize, MountError>
where
    F: Fetch,
    M: EmulationModule,
{
    let bytes = fetcher.fetch(url, cancel, progress).await?;
    if cancel.is_cancelled() {
        return Err(MountError::Cancelled);
    }

    let len = bytes.len();
    mount_payload(module, export, Payload::Bytes(bytes)).map_err(|e| {
        debug!(url = %crate::fetch::redact_url_for_logs(url), "unable to mount: {e}");
        e
    })?;
    Ok(len)
}
