//! Status messages and the sinks that display them.

use crate::fetch::Progress;
use std::fmt;
use tracing::{debug, info};

/// The current lifecycle message, optionally with a completion percentage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusMessage {
    text: String,
    percent: Option<u8>,
}

impl StatusMessage {
    /// A message without progress.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            percent: None,
        }
    }

    /// A message carrying download progress.
    pub fn with_progress(text: impl Into<String>, progress: Progress) -> Self {
        Self {
            text: text.into(),
            percent: Some(progress.percent()),
        }
    }

    /// Phase text without the percentage.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Completion percentage, if this message tracks a download.
    pub fn percent(&self) -> Option<u8> {
        self.percent
    }
}

impl fmt::Display for StatusMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.percent {
            Some(percent) => write!(f, "{} ({}%)", self.text, percent),
            None => f.write_str(&self.text),
        }
    }
}

/// Where lifecycle messages go.
///
/// Each update replaces the previous message.
pub trait StatusSink {
    /// Show the loading indicator.
    fn show_loader(&mut self) {}

    /// Replace the current message.
    fn update_message(&mut self, message: &StatusMessage);

    /// Hide the loading indicator once the program is running.
    fn hide_loader(&mut self) {}
}

impl<S: StatusSink + ?Sized> StatusSink for Box<S> {
    fn show_loader(&mut self) {
        (**self).show_loader();
    }

    fn update_message(&mut self, message: &StatusMessage) {
        (**self).update_message(message);
    }

    fn hide_loader(&mut self) {
        (**self).hide_loader();
    }
}

/// Sends status messages to the log.
///
/// Phase changes log at `info`, progress ticks at `debug`.
#[derive(Debug, Default)]
pub struct LogStatus {
    last: Option<StatusMessage>,
}

impl LogStatus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Most recent message.
    pub fn current(&self) -> Option<&StatusMessage> {
        self.last.as_ref()
    }
}

impl StatusSink for LogStatus {
    fn update_message(&mut self, message: &StatusMessage) {
        if self.last.as_ref() == Some(message) {
            return;
        }

        let same_phase = self.last.as_ref().is_some_and(|last| last.text() == message.text());
        if same_phase {
            debug!(status = %message);
        } else {
            info!(status = %message);
        }
        self.last = Some(message.clone());
    }

    fn hide_loader(&mut self) {
        debug!("loader hidden");
    }
}
