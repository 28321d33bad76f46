//! Export artifacts: spreadsheet, semicolon CSV and zipped spreadsheet.

use std::fmt;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};

use rust_xlsxwriter::{Format, Workbook, XlsxError};
use thiserror::Error;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::warehouse::{CellValue, QueryResult};

pub const DEFAULT_BASE_NAME: &str = "cno_consulta";

/// UTF-8 byte order mark, so spreadsheet programs detect the encoding
const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";
const CSV_DELIMITER: u8 = b';';
const SHEET_NAME: &str = "cno";

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("Spreadsheet encoding failed: {0}")]
    Xlsx(#[from] XlsxError),

    #[error("CSV encoding failed: {0}")]
    Csv(#[from] csv::Error),

    #[error("Archive encoding failed: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Xlsx,
    Csv,
    Zip,
}

impl ExportFormat {
    pub const ALL: [ExportFormat; 3] = [ExportFormat::Xlsx, ExportFormat::Csv, ExportFormat::Zip];

    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Xlsx => "xlsx",
            ExportFormat::Csv => "csv",
            ExportFormat::Zip => "zip",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            ExportFormat::Xlsx => {
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
            }
            ExportFormat::Csv => "text/csv",
            ExportFormat::Zip => "application/zip",
        }
    }

    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().trim_start_matches('.').to_ascii_lowercase().as_str() {
            "xlsx" | "excel" => Some(ExportFormat::Xlsx),
            "csv" => Some(ExportFormat::Csv),
            "zip" => Some(ExportFormat::Zip),
            _ => None,
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.extension())
    }
}

/// Strip a trailing known extension from `base` and append `format`'s.
///
/// `"Relatorio.XLSX"` becomes `"Relatorio.csv"` for CSV. Only the last path
/// component of `base` is kept; an empty one falls back to
/// [`DEFAULT_BASE_NAME`].
pub fn file_name(base: &str, format: ExportFormat) -> String {
    // Only the last path component; exports stay inside the output dir
    let trimmed = Path::new(base.trim())
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("")
        .trim();
    let stem = ExportFormat::ALL
        .iter()
        .find_map(|f| {
            let suffix = format!(".{}", f.extension());
            let split = trimmed.len().checked_sub(suffix.len())?;
            let (head, tail) = (trimmed.get(..split)?, trimmed.get(split..)?);
            tail.eq_ignore_ascii_case(&suffix).then_some(head)
        })
        .unwrap_or(trimmed);

    let stem = if stem.is_empty() { DEFAULT_BASE_NAME } else { stem };
    format!("{stem}.{}", format.extension())
}

/// Encode the result as an `.xlsx` workbook: a bold header row, then typed
/// cells. There is no index column.
pub fn to_xlsx(result: &QueryResult) -> Result<Vec<u8>, ExportError> {
    let mut workbook = Workbook::new();
    let header = Format::new().set_bold();
    let sheet = workbook.add_worksheet();
    sheet.set_name(SHEET_NAME)?;

    for (col, column) in result.columns.iter().enumerate() {
        sheet.write_string_with_format(0, col as u16, &column.name, &header)?;
    }

    for (i, row) in result.rows.iter().enumerate() {
        let r = (i + 1) as u32;
        for (col, cell) in row.iter().enumerate() {
            let c = col as u16;
            match cell {
                CellValue::Null => {}
                CellValue::Bool(v) => {
                    sheet.write_boolean(r, c, *v)?;
                }
                CellValue::Int(v) => {
                    sheet.write_number(r, c, *v as f64)?;
                }
                // Spreadsheets have no infinity or NaN number
                CellValue::Float(v) if !v.is_finite() => {
                    sheet.write_string(r, c, v.to_string())?;
                }
                CellValue::Float(v) => {
                    sheet.write_number(r, c, *v)?;
                }
                CellValue::Text(v) => {
                    sheet.write_string(r, c, v)?;
                }
            }
        }
    }

    Ok(workbook.save_to_buffer()?)
}

/// Encode the result as BOM-prefixed UTF-8 text with `;` separators
pub fn to_csv(result: &QueryResult) -> Result<Vec<u8>, ExportError> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(CSV_DELIMITER)
        .from_writer(UTF8_BOM.to_vec());

    writer.write_record(result.column_names())?;
    for row in &result.rows {
        writer.write_record(row.iter().map(CellValue::to_string))?;
    }

    writer.into_inner().map_err(|e| ExportError::Io(e.into_error()))
}

/// A deflated archive holding the spreadsheet under `inner_name`
pub fn to_zip(result: &QueryResult, inner_name: &str) -> Result<Vec<u8>, ExportError> {
    let spreadsheet = to_xlsx(result)?;

    let mut archive = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    archive.start_file(inner_name, options)?;
    archive.write_all(&spreadsheet)?;

    Ok(archive.finish()?.into_inner())
}

/// An encoded, ready-to-save export
#[derive(Debug, Clone)]
pub struct Artifact {
    pub file_name: String,
    pub format: ExportFormat,
    pub bytes: Vec<u8>,
}

impl Artifact {
    pub fn mime_type(&self) -> &'static str {
        self.format.mime_type()
    }

    /// Save into `dir`, returning the full path written
    pub fn write_to(&self, dir: &Path) -> Result<PathBuf, ExportError> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(&self.file_name);
        std::fs::write(&path, &self.bytes)?;
        tracing::info!(
            path = %path.display(),
            bytes = self.bytes.len(),
            mime = self.mime_type(),
            "Export written"
        );
        Ok(path)
    }
}

/// Encode `result` in `format`, naming the file after `base`
pub fn encode(
    result: &QueryResult,
    format: ExportFormat,
    base: &str,
) -> Result<Artifact, ExportError> {
    let bytes = match format {
        ExportFormat::Xlsx => to_xlsx(result)?,
        ExportFormat::Csv => to_csv(result)?,
        ExportFormat::Zip => to_zip(result, &file_name(base, ExportFormat::Xlsx))?,
    };
    Ok(Artifact {
        file_name: file_name(base, format),
        format,
        bytes,
    })
}
