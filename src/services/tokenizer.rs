//! Upload tokenizer
//!
//! Turns an uploaded CSV file or spreadsheet into a `RawGrid`: trimmed
//! string cells, fully-empty rows dropped, row 0 is the header. Data rows
//! shorter than the header are padded so every mapped column index is
//! valid for every row.

use std::io::{Cursor, Read, Seek};
use std::path::Path;

use base64::Engine;
use calamine::{open_workbook_auto, open_workbook_from_rs, DataType, Reader, Xlsx};

use crate::types::{ImportError, ImportFile};

/// Rectangular grid of string cells; row 0 is the header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawGrid {
    rows: Vec<Vec<String>>,
}

impl RawGrid {
    /// Build a grid from raw rows.
    ///
    /// Fails with `NoDataRows` unless a header and at least one data row remain
    /// after empty rows are dropped.
    pub fn from_rows(rows: Vec<Vec<String>>) -> Result<Self, ImportError> {
        let mut rows: Vec<Vec<String>> = rows
            .into_iter()
            .map(|row| row.into_iter().map(|cell| cell.trim().to_string()).collect::<Vec<_>>())
            .filter(|row| row.iter().any(|cell| !cell.is_empty()))
            .collect();

        if rows.len() < 2 {
            return Err(ImportError::NoDataRows);
        }

        let width = rows[0].len();
        for row in rows.iter_mut().skip(1) {
            if row.len() < width {
                row.resize(width, String::new());
            }
        }

        Ok(Self { rows })
    }

    pub fn header(&self) -> &[String] {
        &self.rows[0]
    }

    pub fn data_rows(&self) -> &[Vec<String>] {
        &self.rows[1..]
    }

    pub fn data_row_count(&self) -> usize {
        self.rows.len() - 1
    }

    #[cfg(test)]
    pub fn into_rows(self) -> Vec<Vec<String>> {
        self.rows
    }
}

/// Read any supported upload payload
pub fn read_import_file(file: &ImportFile) -> Result<RawGrid, ImportError> {
    match file {
        ImportFile::Csv { content } => parse_csv(content),
        ImportFile::Xlsx { content_base64 } => {
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(content_base64.trim())
                .map_err(|e| ImportError::InvalidPayload(format!("invalid base64: {}", e)))?;
            parse_xlsx(bytes)
        }
        ImportFile::Rows { rows } => grid_from_values(rows),
    }
}

/// Tokenize CSV text.
///
/// Quoted fields may contain commas, doubled quotes and line breaks. Only LF
/// ends a row; the CR of a CRLF is trimmed with the cell and a lone CR stays
/// inside its cell. Quotes in the middle of an unquoted field are kept as
/// written.
pub fn parse_csv(text: &str) -> Result<RawGrid, ImportError> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .terminator(csv::Terminator::Any(b'\n'))
        .from_reader(text.as_bytes());

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        rows.push(record.iter().map(str::to_string).collect());
    }

    RawGrid::from_rows(rows)
}

/// Build a grid from a spreadsheet that was already parsed into JSON cells
pub fn grid_from_values(rows: &[Vec<serde_json::Value>]) -> Result<RawGrid, ImportError> {
    let rows = rows
        .iter()
        .map(|row| row.iter().map(value_to_cell).collect())
        .collect();
    RawGrid::from_rows(rows)
}

/// Read the first worksheet of an .xlsx workbook held in memory
pub fn parse_xlsx(bytes: Vec<u8>) -> Result<RawGrid, ImportError> {
    let mut workbook: Xlsx<_> = open_workbook_from_rs(Cursor::new(bytes))
        .map_err(|e| ImportError::Spreadsheet(format!("unable to open workbook: {}", e)))?;
    grid_from_workbook(&mut workbook)
}

/// Read the first worksheet of a workbook on disk (.xlsx, .xls, .ods)
pub fn read_spreadsheet_file(path: &Path) -> Result<RawGrid, ImportError> {
    let mut workbook = open_workbook_auto(path)
        .map_err(|e| ImportError::Spreadsheet(format!("unable to open workbook: {}", e)))?;
    grid_from_workbook(&mut workbook)
}

fn grid_from_workbook<RS, R>(workbook: &mut R) -> Result<RawGrid, ImportError>
where
    RS: Read + Seek,
    R: Reader<RS>,
{
    let sheet_name = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or_else(|| ImportError::Spreadsheet("the workbook does not contain any worksheets".to_string()))?;

    let range = workbook
        .worksheet_range(&sheet_name)
        .ok_or_else(|| ImportError::Spreadsheet(format!("unable to read worksheet '{}'", sheet_name)))?
        .map_err(|e| ImportError::Spreadsheet(format!("unable to read worksheet data: {:?}", e)))?;

    let rows = range
        .rows()
        .map(|row| row.iter().map(cell_to_string).collect())
        .collect();
    RawGrid::from_rows(rows)
}

fn cell_to_string(cell: &DataType) -> String {
    match cell {
        DataType::Empty => String::new(),
        // Whole numbers (phone numbers, ids) without a trailing ".0"
        DataType::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", *f as i64),
        _ => cell.to_string(),
    }
}

fn value_to_cell(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}
