//! Main application logic and TUI event loop.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout},
    Terminal,
};

use crate::cli::{AppConfig, BILLING_PROJECT_ENV, CREDENTIALS_PATH_ENV, SERVICE_ACCOUNT_JSON_ENV};
use crate::export::{self, ExportFormat};
use crate::query::{
    build_query, filter_clauses, parse_date, parse_municipalities, parse_row_limit, FilterError,
    FilterParams, StateFilter, DATE_FORMAT,
};
use crate::ui::{
    widgets::{FilterForm, ResultsTable, SqlPanel, StatusBar, PREVIEW_ROWS},
    HelpOverlay, MunicipalityPicker, PickerPopup, Theme,
};
use crate::warehouse::{
    BigQueryClient, Credentials, LookupCache, QueryResult, Warehouse, WarehouseError,
};

const POLL_INTERVAL: Duration = Duration::from_millis(250);
const PAGE_ROWS: usize = 20;

/// Which panel is currently focused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusedPanel {
    Form,
    Results,
    Sql,
}

impl FocusedPanel {
    fn next(self) -> Self {
        match self {
            FocusedPanel::Form => FocusedPanel::Results,
            FocusedPanel::Results => FocusedPanel::Sql,
            FocusedPanel::Sql => FocusedPanel::Form,
        }
    }

    fn prev(self) -> Self {
        match self {
            FocusedPanel::Form => FocusedPanel::Sql,
            FocusedPanel::Results => FocusedPanel::Form,
            FocusedPanel::Sql => FocusedPanel::Results,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    Info,
    Success,
    Warning,
    Error,
}

/// Message shown in the status bar until the next action replaces it
#[derive(Debug, Clone)]
pub struct StatusMessage {
    pub kind: StatusKind,
    pub text: String,
}

/// Form fields, in display order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    BillingProject,
    State,
    StartDate,
    EndDate,
    Municipalities,
    RowLimit,
    FileName,
    DecodeDictionary,
}

impl Field {
    pub const ALL: [Field; 8] = [
        Field::BillingProject,
        Field::State,
        Field::StartDate,
        Field::EndDate,
        Field::Municipalities,
        Field::RowLimit,
        Field::FileName,
        Field::DecodeDictionary,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Field::BillingProject => "Billing project ID",
            Field::State => "State (UF)",
            Field::StartDate => "Start date (data_inicio)",
            Field::EndDate => "End date (data_inicio)",
            Field::Municipalities => "Municipalities",
            Field::RowLimit => "Row limit",
            Field::FileName => "Export file name",
            Field::DecodeDictionary => "Decode coded columns",
        }
    }

    /// Fields edited through a free-text buffer
    fn is_text(self) -> bool {
        !matches!(self, Field::State | Field::DecodeDictionary)
    }
}

/// Raw form values as typed by the user; parsed on submission
#[derive(Debug, Clone, PartialEq)]
pub struct FormState {
    pub billing_project: String,
    pub state: StateFilter,
    pub start_date: String,
    pub end_date: String,
    pub municipalities: Vec<String>,
    pub row_limit: String,
    pub file_name: String,
    pub decode_dictionary: bool,
}

impl FormState {
    pub fn from_config(config: &AppConfig) -> Self {
        let fmt_date = |d: Option<chrono::NaiveDate>| {
            d.map(|d| d.format(DATE_FORMAT).to_string())
                .unwrap_or_default()
        };
        FormState {
            billing_project: config.billing_project.clone().unwrap_or_default(),
            state: config.filters.state.clone(),
            start_date: fmt_date(config.filters.start_date),
            end_date: fmt_date(config.filters.end_date),
            municipalities: config.filters.municipalities.clone(),
            row_limit: config.filters.row_limit.to_string(),
            file_name: config.file_base.clone(),
            decode_dictionary: config.filters.decode_dictionary,
        }
    }

    /// Text shown in the form for `field`
    pub fn display_value(&self, field: Field) -> String {
        match field {
            Field::BillingProject if self.billing_project.is_empty() => "(required)".to_string(),
            Field::State => format!("< {} >", self.state),
            Field::StartDate if self.start_date.is_empty() => "(open)".to_string(),
            Field::EndDate if self.end_date.is_empty() => "(open)".to_string(),
            Field::Municipalities if self.municipalities.is_empty() => "(all)".to_string(),
            Field::DecodeDictionary if self.decode_dictionary => "[x] on".to_string(),
            Field::DecodeDictionary => "[ ] off".to_string(),
            _ => self.text_value(field),
        }
    }

    /// Editable text of a free-text field
    fn text_value(&self, field: Field) -> String {
        match field {
            Field::BillingProject => self.billing_project.clone(),
            Field::StartDate => self.start_date.clone(),
            Field::EndDate => self.end_date.clone(),
            Field::Municipalities => self.municipalities.join(", "),
            Field::RowLimit => self.row_limit.clone(),
            Field::FileName => self.file_name.clone(),
            Field::State => self.state.to_string(),
            Field::DecodeDictionary => self.decode_dictionary.to_string(),
        }
    }

    fn set_text(&mut self, field: Field, value: String) {
        match field {
            Field::BillingProject => self.billing_project = value.trim().to_string(),
            Field::StartDate => self.start_date = value.trim().to_string(),
            Field::EndDate => self.end_date = value.trim().to_string(),
            Field::Municipalities => self.municipalities = parse_municipalities(&value),
            Field::RowLimit => self.row_limit = value.trim().to_string(),
            Field::FileName => self.file_name = value.trim().to_string(),
            Field::State | Field::DecodeDictionary => {}
        }
    }

    /// Validate the form. The billing project is checked first.
    pub fn to_params(&self) -> Result<FilterParams, FilterError> {
        if self.billing_project.trim().is_empty() {
            return Err(FilterError::MissingBillingProject);
        }
        FilterParams {
            state: self.state.clone(),
            start_date: parse_date(&self.start_date)?,
            end_date: parse_date(&self.end_date)?,
            municipalities: self.municipalities.clone(),
            row_limit: parse_row_limit(&self.row_limit)?,
            decode_dictionary: self.decode_dictionary,
        }
        .validate()
    }
}

/// Blocking work scheduled by a key press, run after the next redraw so
/// the "running" status is visible while it executes
#[derive(Debug, Clone, PartialEq)]
enum Pending {
    Query(String),
    Municipalities(StateFilter),
}

/// Builds a warehouse connection for a billing project
pub type Connector = Box<dyn Fn(&str) -> Result<Box<dyn Warehouse>, WarehouseError>>;

/// Connector backed by the BigQuery REST client
pub fn bigquery_connector(credentials: Option<Credentials>) -> Connector {
    Box::new(move |billing_project: &str| {
        let credentials = credentials.clone().ok_or_else(|| {
            WarehouseError::Credentials(format!(
                "set {SERVICE_ACCOUNT_JSON_ENV} or {CREDENTIALS_PATH_ENV}, or pass --credentials"
            ))
        })?;
        let client = BigQueryClient::new(billing_project.to_string(), credentials)?;
        Ok(Box::new(client) as Box<dyn Warehouse>)
    })
}

/// Application state
pub struct App {
    // Configuration
    config: AppConfig,
    theme: Theme,

    // Warehouse
    connector: Connector,
    warehouse: Option<Box<dyn Warehouse>>,
    lookup_cache: LookupCache,

    // Form
    form: FormState,
    selected_field: usize,
    editing: Option<String>,
    picker: Option<MunicipalityPicker>,

    // Results
    result: Option<QueryResult>,
    last_sql: Option<String>,
    active_filters: usize,
    selected_row: usize,
    first_col: usize,
    sql_scroll: u16,

    // UI State
    focused: FocusedPanel,
    show_help: bool,
    pending: Option<Pending>,
    status: Option<StatusMessage>,

    // Exit flag
    should_quit: bool,
}

impl App {
    /// Create a new App instance talking to BigQuery
    pub fn new(config: AppConfig) -> Self {
        let connector = bigquery_connector(config.credentials.clone());
        Self::with_connector(config, connector)
    }

    pub fn with_connector(config: AppConfig, connector: Connector) -> Self {
        let form = FormState::from_config(&config);
        let status = if form.billing_project.is_empty() {
            Some(StatusMessage {
                kind: StatusKind::Info,
                text: format!(
                    "Tip: store {BILLING_PROJECT_ENV} and {SERVICE_ACCOUNT_JSON_ENV} in .env to skip typing them"
                ),
            })
        } else {
            None
        };

        App {
            config,
            theme: Theme::default(),
            connector,
            warehouse: None,
            lookup_cache: LookupCache::new(),
            form,
            selected_field: 0,
            editing: None,
            picker: None,
            result: None,
            last_sql: None,
            active_filters: 0,
            selected_row: 0,
            first_col: 0,
            sql_scroll: 0,
            focused: FocusedPanel::Form,
            show_help: false,
            pending: None,
            status,
            should_quit: false,
        }
    }

    fn set_status(&mut self, kind: StatusKind, text: impl Into<String>) {
        self.status = Some(StatusMessage {
            kind,
            text: text.into(),
        });
    }

    fn current_field(&self) -> Field {
        Field::ALL[self.selected_field]
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Make sure a connection for the form's billing project exists
    fn connect(&mut self) -> Result<(), WarehouseError> {
        let project = self.form.billing_project.trim();
        let stale = self
            .warehouse
            .as_ref()
            .map(|w| w.identity() != project)
            .unwrap_or(true);
        if stale {
            tracing::info!(billing_project = %project, "Connecting to warehouse");
            self.warehouse = Some((self.connector)(project)?);
        }
        Ok(())
    }

    /// Validate the form, build the SQL and schedule the query
    pub fn submit(&mut self) {
        let params = match self.form.to_params() {
            Ok(params) => params,
            Err(FilterError::MissingBillingProject) => {
                self.set_status(
                    StatusKind::Error,
                    format!(
                        "Billing project ID is required: fill it in the form or set {BILLING_PROJECT_ENV}"
                    ),
                );
                self.selected_field = 0;
                self.focused = FocusedPanel::Form;
                return;
            }
            Err(e) => {
                self.set_status(StatusKind::Error, format!("Invalid filters: {e}"));
                return;
            }
        };

        let sql = build_query(&params);
        self.active_filters = filter_clauses(&params).len();
        tracing::info!(
            state = %params.state,
            filters = self.active_filters,
            row_limit = params.row_limit,
            decode = params.decode_dictionary,
            "Query built"
        );
        self.last_sql = Some(sql.clone());
        self.sql_scroll = 0;
        self.pending = Some(Pending::Query(sql));
        self.set_status(StatusKind::Info, "Running query on BigQuery (Base dos Dados)...");
    }

    /// Schedule the municipality lookup for the selected state
    pub fn open_picker(&mut self) {
        if self.form.billing_project.trim().is_empty() {
            self.set_status(
                StatusKind::Error,
                "Billing project ID is required to look up municipalities",
            );
            return;
        }
        let state = self.form.state.clone();
        if self
            .lookup_cache
            .is_cached(&state, self.form.billing_project.trim())
        {
            self.load_municipalities(state);
            return;
        }
        self.pending = Some(Pending::Municipalities(state));
        self.set_status(StatusKind::Info, "Loading municipalities...");
    }

    /// Run whatever blocking work was scheduled by the last key press
    pub fn execute_pending(&mut self) {
        match self.pending.take() {
            Some(Pending::Query(sql)) => self.run_query(&sql),
            Some(Pending::Municipalities(state)) => self.load_municipalities(state),
            None => {}
        }
    }

    fn run_query(&mut self, sql: &str) {
        let outcome = self.connect().and_then(|()| match self.warehouse.as_deref() {
            Some(warehouse) => warehouse.run_query(sql),
            None => Err(WarehouseError::Credentials("no warehouse connection".into())),
        });

        match outcome {
            Ok(result) => {
                if result.is_empty() {
                    self.set_status(
                        StatusKind::Warning,
                        "Query finished: no rows found for the selected filters",
                    );
                } else {
                    self.set_status(
                        StatusKind::Success,
                        format!("Query finished: {} rows returned", result.len()),
                    );
                    self.focused = FocusedPanel::Results;
                }
                self.result = Some(result);
                self.selected_row = 0;
                self.first_col = 0;
            }
            Err(e) => {
                tracing::error!(error = %e, "Query failed");
                self.result = None;
                self.set_status(StatusKind::Error, format!("Query failed: {e}"));
            }
        }
    }

    fn load_municipalities(&mut self, state: StateFilter) {
        let outcome = self.connect().and_then(|()| match self.warehouse.as_deref() {
            Some(warehouse) => self
                .lookup_cache
                .municipalities(warehouse, &state)
                .map(|names| names.to_vec()),
            None => Err(WarehouseError::Credentials("no warehouse connection".into())),
        });

        match outcome {
            Ok(names) => {
                self.set_status(
                    StatusKind::Info,
                    format!("{} municipalities in {state}", names.len()),
                );
                self.picker = Some(MunicipalityPicker::new(names, &self.form.municipalities));
            }
            Err(e) => {
                tracing::error!(error = %e, "Municipality lookup failed");
                self.set_status(StatusKind::Error, format!("Municipality lookup failed: {e}"));
            }
        }
    }

    /// Encode the current result and save it into the output directory
    pub fn export(&mut self, format: ExportFormat) -> Option<PathBuf> {
        let outcome = match self.result.as_ref().filter(|r| !r.is_empty()) {
            Some(result) => export::encode(result, format, &self.form.file_name)
                .and_then(|artifact| artifact.write_to(&self.config.output_dir)),
            None => {
                self.set_status(StatusKind::Warning, "Nothing to export: run a query first");
                return None;
            }
        };

        match outcome {
            Ok(path) => {
                self.set_status(StatusKind::Success, format!("Saved {}", path.display()));
                Some(path)
            }
            Err(e) => {
                tracing::error!(error = %e, format = %format, "Export failed");
                self.set_status(StatusKind::Error, format!("Export failed: {e}"));
                None
            }
        }
    }

    /// Handle keyboard input
    pub fn handle_input(&mut self, key: KeyCode, modifiers: KeyModifiers) {
        if self.editing.is_some() {
            self.handle_edit_key(key);
            return;
        }
        if self.picker.is_some() {
            self.handle_picker_key(key);
            return;
        }

        // Global shortcuts
        match key {
            KeyCode::Char('c') if modifiers.contains(KeyModifiers::CONTROL) => {
                self.should_quit = true;
                return;
            }
            KeyCode::Char('q') => {
                self.should_quit = true;
                return;
            }
            KeyCode::Char('?') | KeyCode::F(1) => {
                self.show_help = !self.show_help;
                return;
            }
            KeyCode::Esc if self.show_help => {
                self.show_help = false;
                return;
            }
            _ => {}
        }

        // If help is shown, don't process other keys
        if self.show_help {
            return;
        }

        match key {
            KeyCode::Tab => self.focused = self.focused.next(),
            KeyCode::BackTab => self.focused = self.focused.prev(),
            KeyCode::Char('r') | KeyCode::F(5) => self.submit(),
            KeyCode::Char('x') => {
                self.export(ExportFormat::Xlsx);
            }
            KeyCode::Char('c') => {
                self.export(ExportFormat::Csv);
            }
            KeyCode::Char('z') => {
                self.export(ExportFormat::Zip);
            }
            KeyCode::Char('m') => self.open_picker(),
            KeyCode::Char('M') => {
                self.lookup_cache.invalidate();
                self.open_picker();
            }
            _ => match self.focused {
                FocusedPanel::Form => self.handle_form_navigation(key),
                FocusedPanel::Results => self.handle_results_navigation(key),
                FocusedPanel::Sql => self.handle_sql_navigation(key),
            },
        }
    }

    fn handle_edit_key(&mut self, key: KeyCode) {
        let Some(buffer) = self.editing.as_mut() else {
            return;
        };
        match key {
            KeyCode::Char(c) => buffer.push(c),
            KeyCode::Backspace => {
                buffer.pop();
            }
            KeyCode::Enter => {
                if let Some(value) = self.editing.take() {
                    let field = self.current_field();
                    self.form.set_text(field, value);
                }
            }
            KeyCode::Esc => self.editing = None,
            _ => {}
        }
    }

    fn handle_picker_key(&mut self, key: KeyCode) {
        let Some(picker) = self.picker.as_mut() else {
            return;
        };
        match key {
            KeyCode::Esc => self.picker = None,
            KeyCode::Enter => {
                if let Some(picker) = self.picker.take() {
                    self.form.municipalities = picker.into_chosen();
                    self.set_status(
                        StatusKind::Info,
                        format!("{} municipalities selected", self.form.municipalities.len()),
                    );
                }
            }
            KeyCode::Down => picker.move_down(),
            KeyCode::Up => picker.move_up(),
            KeyCode::Char(' ') => {
                picker.toggle_current();
            }
            KeyCode::Backspace => picker.pop_char(),
            KeyCode::Char(c) => picker.push_char(c),
            _ => {}
        }
    }

    fn handle_form_navigation(&mut self, key: KeyCode) {
        let field = self.current_field();
        match key {
            KeyCode::Down | KeyCode::Char('j') => {
                self.selected_field = (self.selected_field + 1) % Field::ALL.len();
            }
            KeyCode::Up | KeyCode::Char('k') => {
                self.selected_field = self
                    .selected_field
                    .checked_sub(1)
                    .unwrap_or(Field::ALL.len() - 1);
            }
            KeyCode::Enter if field.is_text() => {
                self.editing = Some(self.form.text_value(field));
            }
            KeyCode::Enter | KeyCode::Right | KeyCode::Char('l') | KeyCode::Char(' ') => {
                self.cycle_field(field, true);
            }
            KeyCode::Left | KeyCode::Char('h') => self.cycle_field(field, false),
            _ => {}
        }
    }

    /// Step a choice field (state, decode toggle) forward or backward
    fn cycle_field(&mut self, field: Field, forward: bool) {
        match field {
            Field::State => {
                self.form.state = if forward {
                    self.form.state.next()
                } else {
                    self.form.state.prev()
                };
                // Picked names belong to the previous state
                if !self.form.municipalities.is_empty() {
                    self.form.municipalities.clear();
                    self.set_status(
                        StatusKind::Warning,
                        format!("Municipality selection cleared for {}", self.form.state),
                    );
                }
            }
            Field::DecodeDictionary => {
                self.form.decode_dictionary = !self.form.decode_dictionary;
            }
            _ => {}
        }
    }

    fn preview_len(&self) -> usize {
        self.result
            .as_ref()
            .map(|r| r.head(PREVIEW_ROWS).len())
            .unwrap_or(0)
    }

    fn handle_results_navigation(&mut self, key: KeyCode) {
        let rows = self.preview_len();
        let cols = self.result.as_ref().map(|r| r.columns.len()).unwrap_or(0);
        if rows == 0 && cols == 0 {
            return;
        }
        let last_row = rows.saturating_sub(1);

        match key {
            KeyCode::Down | KeyCode::Char('j') => {
                self.selected_row = (self.selected_row + 1).min(last_row);
            }
            KeyCode::Up | KeyCode::Char('k') => {
                self.selected_row = self.selected_row.saturating_sub(1);
            }
            KeyCode::PageDown => self.selected_row = (self.selected_row + PAGE_ROWS).min(last_row),
            KeyCode::PageUp => self.selected_row = self.selected_row.saturating_sub(PAGE_ROWS),
            KeyCode::Home | KeyCode::Char('g') => self.selected_row = 0,
            KeyCode::End | KeyCode::Char('G') => self.selected_row = last_row,
            KeyCode::Right | KeyCode::Char('l') => {
                self.first_col = (self.first_col + 1).min(cols.saturating_sub(1));
            }
            KeyCode::Left | KeyCode::Char('h') => {
                self.first_col = self.first_col.saturating_sub(1);
            }
            KeyCode::Esc => self.focused = FocusedPanel::Form,
            _ => {}
        }
    }

    fn handle_sql_navigation(&mut self, key: KeyCode) {
        let lines = self
            .last_sql
            .as_ref()
            .map(|s| s.lines().count())
            .unwrap_or(0);
        let max_scroll = u16::try_from(lines.saturating_sub(1)).unwrap_or(u16::MAX);

        match key {
            KeyCode::Down | KeyCode::Char('j') => {
                self.sql_scroll = (self.sql_scroll + 1).min(max_scroll);
            }
            KeyCode::Up | KeyCode::Char('k') => {
                self.sql_scroll = self.sql_scroll.saturating_sub(1);
            }
            KeyCode::Home | KeyCode::Char('g') => self.sql_scroll = 0,
            KeyCode::Esc => self.focused = FocusedPanel::Form,
            _ => {}
        }
    }

    /// Render the UI
    fn render(&self, frame: &mut ratatui::Frame) {
        let size = frame.area();

        // Main layout: body, status bar
        let main_chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Min(3),    // Body
                Constraint::Length(2), // Status bar
            ])
            .split(size);

        // Body layout: filter form (left) and content (right)
        let body_chunks = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([
                Constraint::Length(34), // Form
                Constraint::Min(40),    // Content
            ])
            .split(main_chunks[0]);

        // Content layout: results and SQL preview
        let content_chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Percentage(65), // Results
                Constraint::Percentage(35), // SQL
            ])
            .split(body_chunks[1]);

        let form = FilterForm::new(
            &self.form,
            self.selected_field,
            self.editing.as_deref(),
            &self.theme,
        );
        form.render(frame, body_chunks[0], self.focused == FocusedPanel::Form);

        let results = ResultsTable::new(
            self.result.as_ref(),
            self.selected_row,
            self.first_col,
            &self.theme,
        );
        results.render(frame, content_chunks[0], self.focused == FocusedPanel::Results);

        let sql = SqlPanel::new(
            self.last_sql.as_deref(),
            self.active_filters,
            self.sql_scroll,
            &self.theme,
        );
        sql.render(frame, content_chunks[1], self.focused == FocusedPanel::Sql);

        let billing = Some(self.form.billing_project.as_str()).filter(|p| !p.is_empty());
        let status_bar = StatusBar::new(billing, self.status.as_ref(), &self.theme);
        status_bar.render(frame, main_chunks[1]);

        if let Some(picker) = &self.picker {
            let popup = PickerPopup::new(picker, &self.form.state.to_string(), &self.theme);
            popup.render(frame, size);
        }

        // Render help overlay if active
        if self.show_help {
            let help = HelpOverlay::new(&self.theme);
            help.render(frame, size);
        }
    }
}

/// Restore terminal to normal state
fn restore_terminal() {
    // Best effort cleanup - ignore errors since we may be in a panic
    let _ = disable_raw_mode();
    let _ = execute!(io::stdout(), LeaveAlternateScreen);
}

/// Run the TUI application
pub fn run(config: AppConfig) -> Result<()> {
    // Setup terminal
    enable_raw_mode().context("Failed to enable raw mode")?;
    let mut stdout = io::stdout();
    if let Err(e) = execute!(stdout, EnterAlternateScreen) {
        restore_terminal();
        return Err(e).context("Failed to setup terminal");
    }
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = match Terminal::new(backend) {
        Ok(t) => t,
        Err(e) => {
            restore_terminal();
            return Err(e).context("Failed to create terminal");
        }
    };

    let mut app = App::new(config);

    let result = run_main_loop(&mut terminal, &mut app);

    // Always restore terminal, regardless of result
    restore_terminal();
    terminal.show_cursor().ok();

    result
}

/// Main application loop
fn run_main_loop(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut App,
) -> Result<()> {
    loop {
        terminal.draw(|f| app.render(f))?;

        // Blocking work runs right after the frame that announced it
        if app.has_pending() {
            app.execute_pending();
            continue;
        }

        if event::poll(POLL_INTERVAL)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    app.handle_input(key.code, key.modifiers);
                }
            }
        }

        if app.should_quit {
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::warehouse::{CellValue, Column, ColumnType};

    /// Records submitted SQL and answers with a canned result
    struct FakeWarehouse {
        identity: String,
        answer: Result<QueryResult, String>,
        log: Rc<RefCell<Vec<String>>>,
    }

    impl Warehouse for FakeWarehouse {
        fn identity(&self) -> &str {
            &self.identity
        }

        fn run_query(&self, sql: &str) -> Result<QueryResult, WarehouseError> {
            self.log.borrow_mut().push(sql.to_string());
            self.answer.clone().map_err(|message| WarehouseError::Api {
                status: 400,
                message,
            })
        }
    }

    fn sample_result(rows: usize) -> QueryResult {
        QueryResult::new(
            vec![Column {
                name: "nome".into(),
                column_type: ColumnType::String,
            }],
            (0..rows)
                .map(|i| vec![CellValue::Text(format!("row {i}"))])
                .collect(),
        )
    }

    fn config(billing: Option<&str>, output_dir: PathBuf) -> AppConfig {
        AppConfig {
            billing_project: billing.map(str::to_string),
            credentials: None,
            output_dir,
            filters: FilterParams::default(),
            file_base: "cno_consulta".to_string(),
        }
    }

    fn app_with(
        billing: Option<&str>,
        answer: Result<QueryResult, String>,
    ) -> (App, Rc<RefCell<Vec<String>>>) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let shared = Rc::clone(&log);
        let connector: Connector = Box::new(move |identity: &str| {
            Ok(Box::new(FakeWarehouse {
                identity: identity.to_string(),
                answer: answer.clone(),
                log: Rc::clone(&shared),
            }) as Box<dyn Warehouse>)
        });
        let app = App::with_connector(config(billing, std::env::temp_dir()), connector);
        (app, log)
    }

    fn status_kind(app: &App) -> Option<StatusKind> {
        app.status.as_ref().map(|s| s.kind)
    }

    fn type_text(app: &mut App, text: &str) {
        for c in text.chars() {
            app.handle_input(KeyCode::Char(c), KeyModifiers::NONE);
        }
    }

    #[test]
    fn test_missing_billing_project_blocks_submission() {
        let (mut app, log) = app_with(None, Ok(sample_result(1)));
        app.selected_field = 3;
        app.submit();

        assert_eq!(status_kind(&app), Some(StatusKind::Error));
        assert!(!app.has_pending());
        assert!(app.last_sql.is_none());
        assert_eq!(app.selected_field, 0);
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn test_submit_runs_built_query() {
        let (mut app, log) = app_with(Some("billing"), Ok(sample_result(150)));
        app.handle_input(KeyCode::Char('r'), KeyModifiers::NONE);
        assert!(app.has_pending());
        assert_eq!(status_kind(&app), Some(StatusKind::Info));

        app.execute_pending();
        assert_eq!(status_kind(&app), Some(StatusKind::Success));
        assert_eq!(app.result.as_ref().map(QueryResult::len), Some(150));
        assert_eq!(app.preview_len(), PREVIEW_ROWS);
        assert_eq!(app.focused, FocusedPanel::Results);

        let sent = log.borrow();
        assert_eq!(sent.len(), 1);
        assert_eq!(Some(&sent[0]), app.last_sql.as_ref());
        assert!(sent[0].contains("dados.sigla_uf = 'PR'"));
        assert!(sent[0].ends_with("LIMIT 100000"));
        assert_eq!(app.active_filters, 2);
    }

    #[test]
    fn test_empty_result_warns() {
        let (mut app, _) = app_with(Some("billing"), Ok(sample_result(0)));
        app.submit();
        app.execute_pending();
        assert_eq!(status_kind(&app), Some(StatusKind::Warning));
        assert_eq!(app.focused, FocusedPanel::Form);
    }

    #[test]
    fn test_warehouse_failure_is_reported() {
        let (mut app, _) = app_with(Some("billing"), Err("Access Denied".into()));
        app.submit();
        app.execute_pending();

        let status = app.status.as_ref().unwrap();
        assert_eq!(status.kind, StatusKind::Error);
        assert!(status.text.starts_with("Query failed:"));
        assert!(status.text.contains("Access Denied"));
        assert!(app.result.is_none());
    }

    #[test]
    fn test_missing_credentials_is_a_query_failure() {
        let mut app = App::with_connector(
            config(Some("billing"), std::env::temp_dir()),
            bigquery_connector(None),
        );
        app.submit();
        app.execute_pending();
        let status = app.status.as_ref().unwrap();
        assert_eq!(status.kind, StatusKind::Error);
        assert!(status.text.contains(SERVICE_ACCOUNT_JSON_ENV));
    }

    #[test]
    fn test_invalid_form_value_is_reported() {
        let (mut app, _) = app_with(Some("billing"), Ok(sample_result(1)));
        app.form.start_date = "16/05/2023".into();
        app.submit();
        assert_eq!(status_kind(&app), Some(StatusKind::Error));
        assert!(!app.has_pending());
    }

    #[test]
    fn test_editing_a_field() {
        let (mut app, _) = app_with(None, Ok(sample_result(1)));
        // Billing project is the first field
        app.handle_input(KeyCode::Enter, KeyModifiers::NONE);
        type_text(&mut app, "my-project");
        app.handle_input(KeyCode::Enter, KeyModifiers::NONE);
        assert_eq!(app.form.billing_project, "my-project");

        // 'q' while editing is text, not quit
        app.handle_input(KeyCode::Enter, KeyModifiers::NONE);
        type_text(&mut app, "q");
        assert!(!app.should_quit);
        app.handle_input(KeyCode::Esc, KeyModifiers::NONE);
        assert_eq!(app.form.billing_project, "my-project");
    }

    #[test]
    fn test_state_field_cycles() {
        let (mut app, _) = app_with(None, Ok(sample_result(1)));
        app.handle_input(KeyCode::Char('j'), KeyModifiers::NONE);
        assert_eq!(app.current_field(), Field::State);
        app.handle_input(KeyCode::Char('l'), KeyModifiers::NONE);
        assert_eq!(app.form.state, StateFilter::Code("RJ".into()));
        app.handle_input(KeyCode::Char('h'), KeyModifiers::NONE);
        app.handle_input(KeyCode::Char('h'), KeyModifiers::NONE);
        assert_eq!(app.form.state, StateFilter::Code("PI".into()));
    }

    #[test]
    fn test_state_change_clears_municipalities() {
        let (mut app, _) = app_with(Some("billing"), Ok(sample_result(1)));
        app.form.municipalities = vec!["Curitiba".into()];
        app.selected_field = 1;
        app.handle_input(KeyCode::Char('l'), KeyModifiers::NONE);

        assert_eq!(app.form.state, StateFilter::Code("RJ".into()));
        assert!(app.form.municipalities.is_empty());
        assert_eq!(status_kind(&app), Some(StatusKind::Warning));

        app.submit();
        let sql = app.last_sql.as_deref().unwrap();
        assert!(sql.contains("dados.sigla_uf = 'RJ'"));
        assert!(!sql.contains("Curitiba"));
    }

    #[test]
    fn test_picker_populates_municipalities() {
        let names = QueryResult::new(
            vec![Column {
                name: "nome".into(),
                column_type: ColumnType::String,
            }],
            vec![
                vec![CellValue::Text("Cascavel".into())],
                vec![CellValue::Text("Curitiba".into())],
            ],
        );
        let (mut app, log) = app_with(Some("billing"), Ok(names));

        app.handle_input(KeyCode::Char('m'), KeyModifiers::NONE);
        app.execute_pending();
        assert!(app.picker.is_some());

        type_text(&mut app, "curi");
        app.handle_input(KeyCode::Char(' '), KeyModifiers::NONE);
        app.handle_input(KeyCode::Enter, KeyModifiers::NONE);
        assert!(app.picker.is_none());
        assert_eq!(app.form.municipalities, vec!["Curitiba"]);

        // Second open is served from the cache without a pending lookup
        app.handle_input(KeyCode::Char('m'), KeyModifiers::NONE);
        assert!(!app.has_pending());
        assert!(app.picker.is_some());
        app.handle_input(KeyCode::Esc, KeyModifiers::NONE);
        assert_eq!(log.borrow().len(), 1);
        assert_eq!(app.form.municipalities, vec!["Curitiba"]);

        // Reload drops the cached list and queries again
        app.handle_input(KeyCode::Char('M'), KeyModifiers::NONE);
        assert!(app.has_pending());
        app.execute_pending();
        assert_eq!(log.borrow().len(), 2);
    }

    #[test]
    fn test_export_without_result_warns() {
        let (mut app, _) = app_with(Some("billing"), Ok(sample_result(1)));
        assert!(app.export(ExportFormat::Csv).is_none());
        assert_eq!(status_kind(&app), Some(StatusKind::Warning));
    }

    #[test]
    fn test_export_writes_files() {
        let dir = tempfile::tempdir().unwrap();
        let (mut app, _) = app_with(Some("billing"), Ok(sample_result(3)));
        app.config.output_dir = dir.path().to_path_buf();
        app.form.file_name = "obras.xlsx".into();
        app.submit();
        app.execute_pending();

        for format in ExportFormat::ALL {
            let path = app.export(format).unwrap();
            assert_eq!(path, dir.path().join(format!("obras.{}", format.extension())));
            assert!(path.exists());
        }
        assert_eq!(status_kind(&app), Some(StatusKind::Success));
    }

    #[test]
    fn test_results_navigation_is_bounded() {
        let (mut app, _) = app_with(Some("billing"), Ok(sample_result(5)));
        app.submit();
        app.execute_pending();

        app.handle_input(KeyCode::Char('G'), KeyModifiers::NONE);
        assert_eq!(app.selected_row, 4);
        app.handle_input(KeyCode::Char('j'), KeyModifiers::NONE);
        assert_eq!(app.selected_row, 4);
        app.handle_input(KeyCode::Char('l'), KeyModifiers::NONE);
        assert_eq!(app.first_col, 0);
        app.handle_input(KeyCode::Char('g'), KeyModifiers::NONE);
        assert_eq!(app.selected_row, 0);
    }

    #[test]
    fn test_form_round_trips_config() {
        let cfg = config(Some("billing"), PathBuf::from("."));
        let form = FormState::from_config(&cfg);
        assert_eq!(form.start_date, "2023-05-16");
        assert_eq!(form.to_params().unwrap(), cfg.filters);
    }
}
