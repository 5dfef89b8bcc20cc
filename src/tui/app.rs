//! Loading screen state and terminal driver.

use crate::loader::status::{StatusMessage, StatusSink};
use ratatui::prelude::*;
use ratatui::{TerminalOptions, Viewport};
use std::io::{stdout, Stdout};
use tracing::warn;

/// Height of the inline viewport in rows.
const VIEWPORT_HEIGHT: u16 = 3;

/// What the loading screen shows.
#[derive(Debug, Clone, Default)]
pub struct LoaderScreen {
    /// Title of the box (the driver name).
    pub title: String,
    /// Current status message.
    pub message: Option<StatusMessage>,
    /// Whether the loader is on screen.
    pub visible: bool,
}

impl LoaderScreen {
    /// Create a hidden screen.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            message: None,
            visible: false,
        }
    }

    /// Gauge ratio in `0.0..=1.0`, if the current message tracks progress.
    pub fn ratio(&self) -> Option<f64> {
        self.message
            .as_ref()
            .and_then(StatusMessage::percent)
            .map(|percent| f64::from(percent) / 100.0)
    }
}

/// Status sink drawing into an inline terminal viewport.
pub struct TerminalStatus<B: Backend = CrosstermBackend<Stdout>> {
    terminal: Terminal<B>,
    screen: LoaderScreen,
}

impl TerminalStatus {
    /// Reserve the viewport below the cursor on stdout.
    pub fn new(title: impl Into<String>) -> std::io::Result<Self> {
        Self::with_backend(CrosstermBackend::new(stdout()), title)
    }
}

impl<B: Backend> TerminalStatus<B> {
    /// Reserve the viewport on `backend`.
    pub fn with_backend(backend: B, title: impl Into<String>) -> std::io::Result<Self> {
        let terminal = Terminal::with_options(
            backend,
            TerminalOptions {
                viewport: Viewport::Inline(VIEWPORT_HEIGHT),
            },
        )?;

        Ok(Self {
            terminal,
            screen: LoaderScreen::new(title),
        })
    }

    /// Current screen state.
    pub fn screen(&self) -> &LoaderScreen {
        &self.screen
    }

    fn redraw(&mut self) {
        let screen = &self.screen;
        if let Err(e) = self.terminal.draw(|frame| super::ui::draw(frame, screen)) {
            warn!("loader screen draw failed: {e}");
        }
    }
}

impl<B: Backend> StatusSink for TerminalStatus<B> {
    fn show_loader(&mut self) {
        self.screen.visible = true;
        self.redraw();
    }

    fn update_message(&mut self, message: &StatusMessage) {
        if self.screen.message.as_ref() == Some(message) {
            return;
        }
        self.screen.message = Some(message.clone());
        self.redraw();
    }

    fn hide_loader(&mut self) {
        self.screen.visible = false;
        if let Err(e) = self.terminal.clear() {
            warn!("loader screen clear failed: {e}");
        }
        if let Err(e) = self.terminal.show_cursor() {
            warn!("could not restore the cursor: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::Progress;
    use ratatui::backend::TestBackend;

    fn rendered(status: &TerminalStatus<TestBackend>) -> String {
        status
            .terminal
            .backend()
            .buffer()
            .content()
            .iter()
            .map(|cell| cell.symbol())
            .collect()
    }

    #[test]
    fn test_ratio_follows_progress() {
        let mut screen = LoaderScreen::new("js-dos");
        assert_eq!(screen.ratio(), None);

        screen.message = Some(StatusMessage::with_progress("Mount GAME.EXE", Progress::new(Some(8), 2)));
        assert_eq!(screen.ratio(), Some(0.25));

        screen.message = Some(StatusMessage::new("Launching GAME.EXE"));
        assert_eq!(screen.ratio(), None);
    }

    #[test]
    fn test_hide_loader_clears_viewport() {
        let mut status = TerminalStatus::with_backend(TestBackend::new(40, 6), "js-dos").unwrap();
        status.show_loader();
        status.update_message(&StatusMessage::new("Initializing dosbox"));
        assert!(rendered(&status).contains("Initializing dosbox"));

        status.hide_loader();
        assert!(!status.screen().visible);
        assert!(!rendered(&status).contains("Initializing"));
        assert!(!rendered(&status).contains("js-dos"));
    }
}
