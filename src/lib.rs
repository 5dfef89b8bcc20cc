//! # dosload
//!
//! Loader and control surface for a precompiled DOS emulation module.
//!
//! The emulator itself (CPU, virtual filesystem, audio and video) is an
//! external component. This crate downloads its driver script, initializes
//! it, mounts a program archive into its virtual filesystem and starts the
//! program.

pub mod config;
pub mod fetch;
pub mod loader;
pub mod module;
pub mod mount;

#[cfg(feature = "tui")]
pub mod tui;

#[cfg(feature = "wasm")]
pub mod wasm;

// Re-export commonly used types
pub use config::{ConfigError, LoaderConfig};
pub use fetch::{Fetch, FetchError, HttpFetcher, Progress};
pub use loader::status::{LogStatus, StatusMessage, StatusSink};
pub use loader::{Controller, LoaderError, LoaderOptions, LoaderState};
pub use module::{Arg, CallError, EmulationModule, HostModule, ModuleError, Pointer, Value, ValueType};
pub use mount::{mount_bytes, mount_payload, MountError, Payload};

#[cfg(feature = "tui")]
pub use tui::TerminalStatus;
