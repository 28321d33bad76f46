//! UI widgets for the query dashboard.

use ratatui::{
    layout::{Constraint, Rect},
    style::Style,
    text::{Line, Span},
    widgets::{Block, BorderType, Borders, Cell, Paragraph, Row, Table, TableState, Wrap},
    Frame,
};

use crate::app::{Field, FormState, StatusMessage};
use crate::warehouse::QueryResult;

use super::theme::Theme;

/// Rows shown in the results preview
pub const PREVIEW_ROWS: usize = 100;

const MIN_COLUMN_WIDTH: usize = 4;
const MAX_COLUMN_WIDTH: usize = 32;

const SQL_KEYWORDS: [&str; 8] = [
    "WITH", "SELECT", "FROM", "LEFT", "WHERE", "LIMIT", "ORDER", "ON",
];

fn panel_block<'b>(title: String, focused: bool, theme: &Theme) -> Block<'b> {
    let (border_style, title_style) = theme.panel_styles(focused);
    Block::default()
        .title(title)
        .borders(Borders::ALL)
        .border_type(if focused {
            BorderType::Double
        } else {
            BorderType::Plain
        })
        .border_style(border_style)
        .title_style(title_style)
}

/// Filter form panel widget
pub struct FilterForm<'a> {
    form: &'a FormState,
    selected: usize,
    editing: Option<&'a str>,
    theme: &'a Theme,
}

impl<'a> FilterForm<'a> {
    pub fn new(
        form: &'a FormState,
        selected: usize,
        editing: Option<&'a str>,
        theme: &'a Theme,
    ) -> Self {
        FilterForm {
            form,
            selected,
            editing,
            theme,
        }
    }

    pub fn render(&self, frame: &mut Frame, area: Rect, focused: bool) {
        let mut lines: Vec<Line> = Vec::new();

        for (idx, field) in Field::ALL.iter().enumerate() {
            let is_selected = idx == self.selected;
            let marker = if is_selected && focused { "> " } else { "  " };
            let label_style = if is_selected {
                self.theme.title_style()
            } else {
                self.theme.dimmed_title_style()
            };

            lines.push(Line::from(vec![
                Span::raw(marker),
                Span::styled(field.label(), label_style),
            ]));

            let value = match (is_selected, self.editing) {
                (true, Some(buffer)) => Span::styled(format!("{buffer}_"), self.theme.editing_style()),
                (true, None) => Span::styled(self.form.display_value(*field), self.theme.highlight_style()),
                _ => Span::styled(self.form.display_value(*field), self.theme.surface_style()),
            };
            lines.push(Line::from(vec![Span::raw("    "), value]));
        }

        let paragraph = Paragraph::new(lines)
            .block(panel_block(" Filters ".to_string(), focused, self.theme))
            .wrap(Wrap { trim: false });

        frame.render_widget(paragraph, area);
    }
}

/// Column widths sized to the header and the previewed cells
fn column_widths(result: &QueryResult, first_col: usize) -> Vec<Constraint> {
    result
        .columns
        .iter()
        .enumerate()
        .skip(first_col)
        .map(|(col, column)| {
            let widest_cell = result
                .head(PREVIEW_ROWS)
                .iter()
                .filter_map(|row| row.get(col))
                .map(|cell| cell.to_string().chars().count())
                .max()
                .unwrap_or(0);
            let width = widest_cell
                .max(column.name.chars().count())
                .clamp(MIN_COLUMN_WIDTH, MAX_COLUMN_WIDTH);
            Constraint::Length(width as u16)
        })
        .collect()
}

/// Results preview table widget
pub struct ResultsTable<'a> {
    result: Option<&'a QueryResult>,
    selected_row: usize,
    first_col: usize,
    theme: &'a Theme,
}

impl<'a> ResultsTable<'a> {
    pub fn new(
        result: Option<&'a QueryResult>,
        selected_row: usize,
        first_col: usize,
        theme: &'a Theme,
    ) -> Self {
        ResultsTable {
            result,
            selected_row,
            first_col,
            theme,
        }
    }

    pub fn render(&self, frame: &mut Frame, area: Rect, focused: bool) {
        let Some(result) = self.result.filter(|r| !r.columns.is_empty()) else {
            let paragraph = Paragraph::new("No results yet. Press [r] to run the query.")
                .style(self.theme.dimmed_title_style())
                .block(panel_block(" Results ".to_string(), focused, self.theme));
            frame.render_widget(paragraph, area);
            return;
        };

        let preview = result.head(PREVIEW_ROWS);
        let title = format!(
            " Results: {} rows (showing {}) | columns {}-{} of {} ",
            result.len(),
            preview.len(),
            self.first_col + 1,
            result.columns.len(),
            result.columns.len()
        );

        let header = Row::new(
            result
                .columns
                .iter()
                .skip(self.first_col)
                .map(|c| Cell::from(c.name.as_str())),
        )
        .style(self.theme.header_style());

        let rows: Vec<Row> = preview
            .iter()
            .map(|row| {
                Row::new(
                    row.iter()
                        .skip(self.first_col)
                        .map(|cell| Cell::from(cell.to_string())),
                )
            })
            .collect();

        let table = Table::new(rows, column_widths(result, self.first_col))
            .header(header)
            .block(panel_block(title, focused, self.theme))
            .row_highlight_style(self.theme.highlight_style())
            .highlight_symbol("> ");

        let mut state = TableState::default();
        if !preview.is_empty() {
            state.select(Some(self.selected_row.min(preview.len() - 1)));
        }
        frame.render_stateful_widget(table, area, &mut state);
    }
}

/// Split a SQL line into a highlighted leading keyword and the rest
fn highlight_sql_line<'l>(line: &'l str, theme: &Theme) -> Line<'l> {
    let indent = line.len() - line.trim_start().len();
    let (lead, rest) = line.split_at(indent);
    let word_end = rest.find(' ').unwrap_or(rest.len());
    let (word, tail) = rest.split_at(word_end);

    if SQL_KEYWORDS.contains(&word) {
        Line::from(vec![
            Span::raw(lead),
            Span::styled(word, theme.keyword_style()),
            Span::raw(tail),
        ])
    } else {
        Line::from(line)
    }
}

/// Generated SQL panel widget
pub struct SqlPanel<'a> {
    sql: Option<&'a str>,
    active_filters: usize,
    scroll: u16,
    theme: &'a Theme,
}

impl<'a> SqlPanel<'a> {
    pub fn new(sql: Option<&'a str>, active_filters: usize, scroll: u16, theme: &'a Theme) -> Self {
        SqlPanel {
            sql,
            active_filters,
            scroll,
            theme,
        }
    }

    pub fn render(&self, frame: &mut Frame, area: Rect, focused: bool) {
        let title = format!(" Generated SQL ({} filters) ", self.active_filters);
        let lines: Vec<Line> = match self.sql {
            Some(sql) => sql
                .lines()
                .map(|l| highlight_sql_line(l, self.theme))
                .collect(),
            None => vec![Line::styled(
                "The query text appears here once you run it.",
                self.theme.dimmed_title_style(),
            )],
        };

        let paragraph = Paragraph::new(lines)
            .block(panel_block(title, focused, self.theme))
            .scroll((self.scroll, 0));

        frame.render_widget(paragraph, area);
    }
}

/// Status bar widget
pub struct StatusBar<'a> {
    billing_project: Option<&'a str>,
    status: Option<&'a StatusMessage>,
    theme: &'a Theme,
}

impl<'a> StatusBar<'a> {
    pub fn new(
        billing_project: Option<&'a str>,
        status: Option<&'a StatusMessage>,
        theme: &'a Theme,
    ) -> Self {
        StatusBar {
            billing_project,
            status,
            theme,
        }
    }

    pub fn render(&self, frame: &mut Frame, area: Rect) {
        let line = match self.status {
            Some(status) => Line::styled(status.text.as_str(), self.theme.status_style(status.kind)),
            None => {
                let project = self.billing_project.unwrap_or("no billing project");
                Line::styled(
                    format!("cno-query: {project} | [r] Run [x/c/z] Export [?] Help [q] Quit"),
                    Style::default(),
                )
            }
        };

        let paragraph = Paragraph::new(line).block(Block::default().borders(Borders::TOP));

        frame.render_widget(paragraph, area);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::warehouse::{CellValue, Column, ColumnType};

    #[test]
    fn test_column_widths_are_clamped() {
        let result = QueryResult::new(
            vec![
                Column {
                    name: "cep".into(),
                    column_type: ColumnType::String,
                },
                Column {
                    name: "nome_empresarial".into(),
                    column_type: ColumnType::String,
                },
            ],
            vec![vec![
                CellValue::Text("1".into()),
                CellValue::Text("x".repeat(80)),
            ]],
        );
        assert_eq!(
            column_widths(&result, 0),
            vec![Constraint::Length(4), Constraint::Length(32)]
        );
        assert_eq!(column_widths(&result, 1), vec![Constraint::Length(32)]);
    }

    #[test]
    fn test_sql_keyword_highlight() {
        let theme = Theme::default();
        let line = highlight_sql_line("  LEFT JOIN dicionario_situacao", &theme);
        assert_eq!(line.spans.len(), 3);
        assert_eq!(line.spans[1].content, "LEFT");

        let plain = highlight_sql_line("  dados.cep AS cep,", &theme);
        assert_eq!(plain.spans.len(), 1);
    }
}
