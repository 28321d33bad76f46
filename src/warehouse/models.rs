//! Tabular query results as returned by the warehouse.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Column type as reported by the warehouse schema
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnType {
    String,
    Integer,
    Float,
    Boolean,
    Date,
    Timestamp,
    Other(String),
}

impl ColumnType {
    /// Map a BigQuery type name (legacy or standard SQL spelling)
    pub fn from_bigquery(name: &str) -> Self {
        match name.to_ascii_uppercase().as_str() {
            "STRING" => ColumnType::String,
            "INTEGER" | "INT64" => ColumnType::Integer,
            "FLOAT" | "FLOAT64" | "NUMERIC" | "BIGNUMERIC" => ColumnType::Float,
            "BOOLEAN" | "BOOL" => ColumnType::Boolean,
            "DATE" => ColumnType::Date,
            "TIMESTAMP" | "DATETIME" => ColumnType::Timestamp,
            other => ColumnType::Other(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub column_type: ColumnType,
}

/// A single typed cell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl CellValue {
    /// Type a raw cell string according to its column type.
    ///
    /// Values that do not parse as the declared type are kept as text.
    pub fn from_raw(raw: Option<&str>, column_type: &ColumnType) -> Self {
        let Some(raw) = raw else {
            return CellValue::Null;
        };
        match column_type {
            ColumnType::Integer => raw
                .parse()
                .map(CellValue::Int)
                .unwrap_or_else(|_| CellValue::Text(raw.to_string())),
            ColumnType::Float => raw
                .parse()
                .map(CellValue::Float)
                .unwrap_or_else(|_| CellValue::Text(raw.to_string())),
            ColumnType::Boolean => match raw.to_ascii_lowercase().as_str() {
                "true" => CellValue::Bool(true),
                "false" => CellValue::Bool(false),
                _ => CellValue::Text(raw.to_string()),
            },
            _ => CellValue::Text(raw.to_string()),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Null => Ok(()),
            CellValue::Bool(v) => write!(f, "{v}"),
            CellValue::Int(v) => write!(f, "{v}"),
            CellValue::Float(v) => write!(f, "{v}"),
            CellValue::Text(v) => write!(f, "{v}"),
        }
    }
}

/// Result of one warehouse query
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub columns: Vec<Column>,
    pub rows: Vec<Vec<CellValue>>,
}

impl QueryResult {
    pub fn new(columns: Vec<Column>, rows: Vec<Vec<CellValue>>) -> Self {
        QueryResult { columns, rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// First `n` rows, for previews
    pub fn head(&self, n: usize) -> &[Vec<CellValue>] {
        &self.rows[..n.min(self.rows.len())]
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_type_mapping() {
        assert_eq!(ColumnType::from_bigquery("INT64"), ColumnType::Integer);
        assert_eq!(ColumnType::from_bigquery("numeric"), ColumnType::Float);
        assert_eq!(ColumnType::from_bigquery("DATE"), ColumnType::Date);
        assert_eq!(
            ColumnType::from_bigquery("GEOGRAPHY"),
            ColumnType::Other("GEOGRAPHY".into())
        );
    }

    #[test]
    fn test_cell_typing() {
        assert_eq!(
            CellValue::from_raw(Some("42"), &ColumnType::Integer),
            CellValue::Int(42)
        );
        assert_eq!(
            CellValue::from_raw(Some("1.5"), &ColumnType::Float),
            CellValue::Float(1.5)
        );
        assert_eq!(
            CellValue::from_raw(Some("abc"), &ColumnType::Integer),
            CellValue::Text("abc".into())
        );
        assert!(CellValue::from_raw(None, &ColumnType::String).is_null());
        assert_eq!(CellValue::Null.to_string(), "");
    }

    #[test]
    fn test_head_clamps() {
        let result = QueryResult::new(vec![], vec![vec![CellValue::Int(1)]; 3]);
        assert_eq!(result.head(100).len(), 3);
        assert_eq!(result.head(2).len(), 2);
    }
}
