//! Filter parameters collected from the dashboard form or the command line.

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The 27 Brazilian federative units accepted by the state filter.
pub const STATE_CODES: [&str; 27] = [
    "AC", "AL", "AM", "AP", "BA", "CE", "DF", "ES", "GO", "MA", "MG", "MS", "MT", "PA", "PB",
    "PE", "PI", "PR", "RJ", "RN", "RO", "RR", "RS", "SC", "SE", "SP", "TO",
];

/// Largest row limit the warehouse will be asked for
pub const MAX_ROW_LIMIT: u32 = 500_000;
pub const DEFAULT_ROW_LIMIT: u32 = 100_000;
pub const DEFAULT_STATE: &str = "PR";

/// Date format used in the form, on the command line and in SQL literals
pub const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FilterError {
    #[error("Unknown state code: {0}")]
    InvalidState(String),

    #[error("Invalid date '{0}', expected YYYY-MM-DD")]
    InvalidDate(String),

    #[error("Start date {start} is after end date {end}")]
    InvertedRange { start: NaiveDate, end: NaiveDate },

    #[error("Row limit must be between 1 and 500000, got {0}")]
    RowLimitOutOfRange(u64),

    #[error("Row limit must be a number between 1 and 500000, got '{0}'")]
    InvalidRowLimit(String),

    #[error("Billing project ID is required")]
    MissingBillingProject,
}

/// State (UF) selection: either every state or a single code
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StateFilter {
    All,
    Code(String),
}

impl StateFilter {
    /// Parse a user-supplied state code. Blank, `all`, `*` and `(Todas)` select every state.
    pub fn parse(input: &str) -> Result<Self, FilterError> {
        let trimmed = input.trim();
        if trimmed.is_empty()
            || trimmed == "*"
            || trimmed.eq_ignore_ascii_case("all")
            || trimmed.eq_ignore_ascii_case("(todas)")
        {
            return Ok(StateFilter::All);
        }

        let code = trimmed.to_ascii_uppercase();
        if STATE_CODES.contains(&code.as_str()) {
            Ok(StateFilter::Code(code))
        } else {
            Err(FilterError::InvalidState(trimmed.to_string()))
        }
    }

    pub fn code(&self) -> Option<&str> {
        match self {
            StateFilter::All => None,
            StateFilter::Code(c) => Some(c.as_str()),
        }
    }

    /// Cycle forward through `All, AC, AL, ..., TO`
    pub fn next(&self) -> Self {
        match self.position() {
            None => StateFilter::Code(STATE_CODES[0].to_string()),
            Some(i) if i + 1 < STATE_CODES.len() => StateFilter::Code(STATE_CODES[i + 1].to_string()),
            Some(_) => StateFilter::All,
        }
    }

    /// Cycle backward through `All, AC, AL, ..., TO`
    pub fn prev(&self) -> Self {
        match self.position() {
            None => StateFilter::Code(STATE_CODES[STATE_CODES.len() - 1].to_string()),
            Some(0) => StateFilter::All,
            Some(i) => StateFilter::Code(STATE_CODES[i - 1].to_string()),
        }
    }

    fn position(&self) -> Option<usize> {
        self.code()
            .and_then(|c| STATE_CODES.iter().position(|s| *s == c))
    }
}

impl Default for StateFilter {
    fn default() -> Self {
        StateFilter::Code(DEFAULT_STATE.to_string())
    }
}

impl fmt::Display for StateFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateFilter::All => write!(f, "(all)"),
            StateFilter::Code(c) => write!(f, "{c}"),
        }
    }
}

/// Parse a `YYYY-MM-DD` date; a blank string means "no bound".
pub fn parse_date(input: &str) -> Result<Option<NaiveDate>, FilterError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    NaiveDate::parse_from_str(trimmed, DATE_FORMAT)
        .map(Some)
        .map_err(|_| FilterError::InvalidDate(trimmed.to_string()))
}

/// Parse a row limit, enforcing `1..=MAX_ROW_LIMIT`
pub fn parse_row_limit(input: &str) -> Result<u32, FilterError> {
    let digits: String = input.trim().chars().filter(|c| *c != '_' && *c != ',').collect();
    let value: u64 = digits
        .parse()
        .map_err(|_| FilterError::InvalidRowLimit(input.trim().to_string()))?;
    check_row_limit(value)
}

fn check_row_limit(value: u64) -> Result<u32, FilterError> {
    if value == 0 || value > u64::from(MAX_ROW_LIMIT) {
        return Err(FilterError::RowLimitOutOfRange(value));
    }
    Ok(value as u32)
}

/// Split a comma-separated municipality list
pub fn parse_municipalities(input: &str) -> Vec<String> {
    normalize_municipalities(input.split(',').map(str::to_string).collect())
}

/// Trim names, drop blanks and duplicates, keep first-seen order
fn normalize_municipalities(names: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(names.len());
    for name in names {
        let name = name.trim();
        if !name.is_empty() && !out.iter().any(|n| n == name) {
            out.push(name.to_string());
        }
    }
    out
}

pub fn default_start_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2023, 5, 16).unwrap_or_default()
}

pub fn default_end_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 5, 16).unwrap_or_default()
}

/// Everything that constrains one warehouse query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterParams {
    pub state: StateFilter,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub municipalities: Vec<String>,
    pub row_limit: u32,
    /// Join the dictionary table to decode coded columns
    pub decode_dictionary: bool,
}

impl Default for FilterParams {
    fn default() -> Self {
        FilterParams {
            state: StateFilter::default(),
            start_date: Some(default_start_date()),
            end_date: Some(default_end_date()),
            municipalities: Vec::new(),
            row_limit: DEFAULT_ROW_LIMIT,
            decode_dictionary: false,
        }
    }
}

impl FilterParams {
    /// Parameters with no constraint at all except the row limit
    #[cfg(test)]
    pub fn unfiltered(row_limit: u32) -> Self {
        FilterParams {
            state: StateFilter::All,
            start_date: None,
            end_date: None,
            municipalities: Vec::new(),
            row_limit,
            decode_dictionary: false,
        }
    }

    /// Check ranges and normalize the municipality list in place
    pub fn validate(mut self) -> Result<Self, FilterError> {
        check_row_limit(u64::from(self.row_limit))?;
        if let (Some(start), Some(end)) = (self.start_date, self.end_date) {
            if start > end {
                return Err(FilterError::InvertedRange { start, end });
            }
        }
        self.municipalities = normalize_municipalities(self.municipalities);
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_parse() {
        assert_eq!(StateFilter::parse("sp").unwrap(), StateFilter::Code("SP".into()));
        assert_eq!(StateFilter::parse("(Todas)").unwrap(), StateFilter::All);
        assert_eq!(StateFilter::parse("").unwrap(), StateFilter::All);
        assert!(matches!(
            StateFilter::parse("XX"),
            Err(FilterError::InvalidState(_))
        ));
    }

    #[test]
    fn test_state_cycle_wraps() {
        assert_eq!(StateFilter::All.next(), StateFilter::Code("AC".into()));
        assert_eq!(StateFilter::Code("TO".into()).next(), StateFilter::All);
        assert_eq!(StateFilter::All.prev(), StateFilter::Code("TO".into()));
        assert_eq!(StateFilter::Code("AC".into()).prev(), StateFilter::All);
    }

    #[test]
    fn test_parse_date() {
        assert_eq!(parse_date("  ").unwrap(), None);
        assert_eq!(
            parse_date("2024-02-29").unwrap(),
            NaiveDate::from_ymd_opt(2024, 2, 29)
        );
        assert!(parse_date("29/02/2024").is_err());
    }

    #[test]
    fn test_row_limit_bounds() {
        assert_eq!(parse_row_limit("100_000").unwrap(), 100_000);
        assert_eq!(parse_row_limit("500000").unwrap(), MAX_ROW_LIMIT);
        assert_eq!(
            parse_row_limit("500001"),
            Err(FilterError::RowLimitOutOfRange(500_001))
        );
        assert!(parse_row_limit("0").is_err());
    }

    #[test]
    fn test_row_limit_reports_bad_input() {
        let err = parse_row_limit(" abc ").unwrap_err();
        assert_eq!(err, FilterError::InvalidRowLimit("abc".into()));
        assert_eq!(
            err.to_string(),
            "Row limit must be a number between 1 and 500000, got 'abc'"
        );

        assert_eq!(
            parse_row_limit("-5"),
            Err(FilterError::InvalidRowLimit("-5".into()))
        );
        assert_eq!(
            parse_row_limit("99999999999999999999999"),
            Err(FilterError::InvalidRowLimit("99999999999999999999999".into()))
        );
    }

    #[test]
    fn test_validate_rejects_inverted_range() {
        let params = FilterParams {
            start_date: parse_date("2025-01-02").unwrap(),
            end_date: parse_date("2025-01-01").unwrap(),
            ..FilterParams::default()
        };
        assert!(matches!(
            params.validate(),
            Err(FilterError::InvertedRange { .. })
        ));
    }

    #[test]
    fn test_validate_normalizes_municipalities() {
        let params = FilterParams {
            municipalities: vec![
                " Curitiba ".into(),
                "".into(),
                "Londrina".into(),
                "Curitiba".into(),
            ],
            ..FilterParams::default()
        };
        let params = params.validate().unwrap();
        assert_eq!(params.municipalities, vec!["Curitiba", "Londrina"]);
    }

    #[test]
    fn test_parse_municipalities() {
        assert_eq!(
            parse_municipalities("Maringá, Cascavel,,Maringá"),
            vec!["Maringá", "Cascavel"]
        );
        assert!(parse_municipalities("").is_empty());
    }
}
