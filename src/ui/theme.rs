//! Theme configuration for the TUI.

use ratatui::style::{Color, Modifier, Style};

use crate::app::StatusKind;

/// Color theme for the application
#[derive(Debug, Clone)]
pub struct Theme {
    pub bg: Color,
    pub fg: Color,
    pub highlight_bg: Color,
    pub highlight_fg: Color,
    pub border: Color,
    pub title: Color,
    pub editing: Color,
    pub status_info: Color,
    pub status_success: Color,
    pub status_warning: Color,
    pub status_error: Color,
    pub sql_keyword: Color,
}

impl Default for Theme {
    fn default() -> Self {
        Theme {
            bg: Color::Reset,
            fg: Color::White,
            highlight_bg: Color::Rgb(60, 60, 80),
            highlight_fg: Color::White,
            border: Color::Rgb(100, 100, 120),
            title: Color::Cyan,
            editing: Color::LightYellow,
            status_info: Color::Cyan,
            status_success: Color::Green,
            status_warning: Color::Yellow,
            status_error: Color::Red,
            sql_keyword: Color::LightBlue,
        }
    }
}

impl Theme {
    /// Base surface style used to paint widget backgrounds
    pub fn surface_style(&self) -> Style {
        Style::default().fg(self.fg).bg(self.bg)
    }

    /// Convenience helper returning (border_style, title_style) for focus state
    pub fn panel_styles(&self, focused: bool) -> (Style, Style) {
        if focused {
            (self.focused_border_style(), self.focused_border_style())
        } else {
            (self.border_style(), self.dimmed_title_style())
        }
    }

    /// Get style for highlighted/selected items
    pub fn highlight_style(&self) -> Style {
        Style::default()
            .fg(self.highlight_fg)
            .bg(self.highlight_bg)
            .add_modifier(Modifier::BOLD)
    }

    /// Get style for borders
    pub fn border_style(&self) -> Style {
        Style::default().fg(self.border)
    }

    /// Get style for focused panel borders (distinct from normal borders)
    pub fn focused_border_style(&self) -> Style {
        Style::default()
            .fg(Color::Yellow)
            .add_modifier(Modifier::BOLD)
    }

    /// Get style for titles
    pub fn title_style(&self) -> Style {
        Style::default()
            .fg(self.title)
            .add_modifier(Modifier::BOLD)
    }

    /// Get style for unfocused/dimmed titles
    pub fn dimmed_title_style(&self) -> Style {
        Style::default()
            .fg(self.border)
            .add_modifier(Modifier::DIM)
    }

    /// Style for a form field currently being edited
    pub fn editing_style(&self) -> Style {
        Style::default()
            .fg(self.editing)
            .add_modifier(Modifier::UNDERLINED)
    }

    pub fn header_style(&self) -> Style {
        Style::default()
            .fg(self.title)
            .add_modifier(Modifier::BOLD | Modifier::UNDERLINED)
    }

    pub fn keyword_style(&self) -> Style {
        Style::default()
            .fg(self.sql_keyword)
            .add_modifier(Modifier::BOLD)
    }

    /// Get style for a status bar message
    pub fn status_style(&self, kind: StatusKind) -> Style {
        let color = match kind {
            StatusKind::Info => self.status_info,
            StatusKind::Success => self.status_success,
            StatusKind::Warning => self.status_warning,
            StatusKind::Error => self.status_error,
        };
        Style::default().fg(color)
    }
}
