//! UI rendering for the loading screen.

use super::app::LoaderScreen;
use ratatui::{
    prelude::*,
    style::{Color, Modifier, Style},
    widgets::{Block, Borders, Gauge, Paragraph},
};

/// Main draw function.
pub fn draw(frame: &mut Frame, screen: &LoaderScreen) {
    if !screen.visible {
        return;
    }

    let block = Block::default()
        .title(format!(" {} ", screen.title))
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan));

    let text = screen
        .message
        .as_ref()
        .map(|m| m.to_string())
        .unwrap_or_default();

    match screen.ratio() {
        Some(ratio) => {
            let gauge = Gauge::default()
                .block(block)
                .gauge_style(Style::default().fg(Color::Green).add_modifier(Modifier::BOLD))
                .ratio(ratio.clamp(0.0, 1.0))
                .label(text);
            frame.render_widget(gauge, frame.area());
        }
        None => {
            let paragraph = Paragraph::new(text)
                .style(Style::default().fg(Color::White))
                .block(block);
            frame.render_widget(paragraph, frame.area());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::Progress;
    use crate::loader::status::StatusMessage;
    use ratatui::backend::TestBackend;

    fn render(screen: &LoaderScreen) -> String {
        let mut terminal = Terminal::new(TestBackend::new(40, 3)).unwrap();
        terminal.draw(|frame| draw(frame, screen)).unwrap();
        let buffer = terminal.backend().buffer().clone();
        buffer
            .content()
            .iter()
            .map(|cell| cell.symbol())
            .collect()
    }

    #[test]
    fn test_draws_message_and_percent() {
        let mut screen = LoaderScreen::new("js-dos");
        screen.visible = true;
        screen.message = Some(StatusMessage::with_progress("Loading js-dos", Progress::new(Some(4), 2)));

        let rendered = render(&screen);
        assert!(rendered.contains("Loading js-dos (50%)"));
        assert!(rendered.contains(" js-dos "));
    }

    #[test]
    fn test_hidden_screen_draws_nothing() {
        let mut screen = LoaderScreen::new("js-dos");
        screen.message = Some(StatusMessage::new("Initializing dosbox"));
        assert!(!render(&screen).contains("Initializing"));
    }
}
