//! Municipality picker state and popup widget.
//!
//! The picker lists the names returned by the lookup query. Typing narrows
//! the list, space toggles the highlighted name, enter confirms the choice.

use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph},
    Frame,
};

use super::help::centered_rect;
use super::theme::Theme;

/// Selection state for the municipality picker
#[derive(Debug, Clone, Default)]
pub struct MunicipalityPicker {
    names: Vec<String>,
    /// Chosen names in the order they were picked
    chosen: Vec<String>,
    query: String,
    cursor: usize,
}

impl MunicipalityPicker {
    /// Start a picker over `names` with `chosen` pre-selected
    pub fn new(names: Vec<String>, chosen: &[String]) -> Self {
        MunicipalityPicker {
            names,
            chosen: chosen.to_vec(),
            query: String::new(),
            cursor: 0,
        }
    }

    /// Names matching the typed query (case-insensitive substring)
    pub fn visible(&self) -> Vec<&str> {
        let needle = self.query.to_lowercase();
        self.names
            .iter()
            .filter(|n| needle.is_empty() || n.to_lowercase().contains(&needle))
            .map(String::as_str)
            .collect()
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn total(&self) -> usize {
        self.names.len()
    }

    pub fn is_chosen(&self, name: &str) -> bool {
        self.chosen.iter().any(|c| c == name)
    }

    pub fn chosen(&self) -> &[String] {
        &self.chosen
    }

    pub fn into_chosen(self) -> Vec<String> {
        self.chosen
    }

    pub fn move_down(&mut self) {
        let len = self.visible().len();
        if len > 0 {
            self.cursor = (self.cursor + 1) % len;
        }
    }

    pub fn move_up(&mut self) {
        let len = self.visible().len();
        if len > 0 {
            self.cursor = self.cursor.checked_sub(1).unwrap_or(len - 1);
        }
    }

    /// Toggle the highlighted name. Returns true if it is now chosen.
    pub fn toggle_current(&mut self) -> bool {
        let Some(name) = self.visible().get(self.cursor).map(|n| n.to_string()) else {
            return false;
        };
        if let Some(pos) = self.chosen.iter().position(|c| *c == name) {
            self.chosen.remove(pos);
            false
        } else {
            self.chosen.push(name);
            true
        }
    }

    pub fn push_char(&mut self, c: char) {
        self.query.push(c);
        self.cursor = 0;
    }

    pub fn pop_char(&mut self) {
        self.query.pop();
        self.cursor = 0;
    }
}

/// Popup rendering the picker over the dashboard
pub struct PickerPopup<'a> {
    picker: &'a MunicipalityPicker,
    title: String,
    theme: &'a Theme,
}

impl<'a> PickerPopup<'a> {
    pub fn new(picker: &'a MunicipalityPicker, state_label: &str, theme: &'a Theme) -> Self {
        PickerPopup {
            picker,
            title: format!(" Municipalities ({state_label}) "),
            theme,
        }
    }

    pub fn render(&self, frame: &mut Frame, area: Rect) {
        let popup_area = centered_rect(50, 70, area);
        frame.render_widget(Clear, popup_area);

        let block = Block::default()
            .title(self.title.as_str())
            .borders(Borders::ALL)
            .border_style(self.theme.focused_border_style())
            .title_style(self.theme.title_style())
            .style(self.theme.surface_style());
        let inner = block.inner(popup_area);
        frame.render_widget(block, popup_area);

        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(1), // Search
                Constraint::Min(3),    // Names
                Constraint::Length(1), // Hints
            ])
            .split(inner);

        let search = Line::from(vec![
            Span::styled("Search: ", self.theme.dimmed_title_style()),
            Span::styled(self.picker.query(), self.theme.editing_style()),
        ]);
        frame.render_widget(Paragraph::new(search), chunks[0]);

        let visible = self.picker.visible();
        let items: Vec<ListItem> = visible
            .iter()
            .map(|name| {
                let mark = if self.picker.is_chosen(name) { "[x] " } else { "[ ] " };
                ListItem::new(format!("{mark}{name}"))
            })
            .collect();
        let list = List::new(items)
            .highlight_style(self.theme.highlight_style())
            .highlight_symbol("> ");
        let mut state = ListState::default();
        if !visible.is_empty() {
            state.select(Some(self.picker.cursor()));
        }
        frame.render_stateful_widget(list, chunks[1], &mut state);

        let hints = format!(
            "{}/{} shown, {} chosen | [Space] toggle [Enter] confirm [Esc] cancel",
            visible.len(),
            self.picker.total(),
            self.picker.chosen().len()
        );
        frame.render_widget(
            Paragraph::new(hints).style(self.theme.dimmed_title_style()),
            chunks[2],
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn picker() -> MunicipalityPicker {
        MunicipalityPicker::new(
            vec![
                "Cascavel".into(),
                "Curitiba".into(),
                "Londrina".into(),
                "Maringá".into(),
            ],
            &["Londrina".to_string()],
        )
    }

    #[test]
    fn test_query_filters_case_insensitively() {
        let mut p = picker();
        p.push_char('c');
        p.push_char('U');
        assert_eq!(p.visible(), vec!["Curitiba"]);
        p.pop_char();
        assert_eq!(p.visible(), vec!["Cascavel", "Curitiba"]);
    }

    #[test]
    fn test_toggle_keeps_pick_order() {
        let mut p = picker();
        p.move_down(); // Curitiba
        assert!(p.toggle_current());
        assert_eq!(p.chosen(), ["Londrina", "Curitiba"]);
        p.move_down();
        assert!(!p.toggle_current()); // Londrina was pre-selected
        assert_eq!(p.into_chosen(), vec!["Curitiba"]);
    }

    #[test]
    fn test_cursor_wraps() {
        let mut p = picker();
        p.move_up();
        assert_eq!(p.cursor(), 3);
        p.move_down();
        assert_eq!(p.cursor(), 0);
    }

    #[test]
    fn test_toggle_on_empty_list_is_noop() {
        let mut p = MunicipalityPicker::new(Vec::new(), &[]);
        assert!(!p.toggle_current());
        p.move_down();
        assert_eq!(p.cursor(), 0);
    }
}
