//! Terminal loading screen.
//!
//! Renders the loader's status in a small inline viewport:
//! - Current lifecycle message
//! - Download progress gauge while a fetch is in flight

mod app;
mod ui;

pub use app::{LoaderScreen, TerminalStatus};
