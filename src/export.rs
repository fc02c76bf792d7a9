//! CSV and XLSX downloads of derived series and of the top-5 table.

use serde_json::Value;

use crate::derive::SeriesEntry;
use crate::error::{Error, Result};
use crate::kpi::TableRow;

const SERIES_HEADERS: [&str; 5] = [
    "label",
    "value",
    "percentage_of_total",
    "delta_from_previous",
    "relative_change",
];

fn optional(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// Text of a table cell; `null` is an empty cell
fn cell_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Columns to export: the given ones, or the keys of the first row when the
/// payload did not list any
fn table_columns(columns: &[String], rows: &[TableRow]) -> Vec<String> {
    if !columns.is_empty() {
        return columns.to_vec();
    }
    rows.first()
        .map(|row| row.keys().cloned().collect())
        .unwrap_or_default()
}

fn finish_csv(writer: csv::Writer<Vec<u8>>) -> Result<String> {
    let bytes = writer
        .into_inner()
        .map_err(|e| Error::Export(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| Error::Export(e.to_string()))
}

/// Convert a derived series to CSV
///
/// One row per entry. Missing shares and deltas are written as empty cells.
///
/// # Examples
/// ```
/// use businalyst::derive::SeriesEntry;
/// use businalyst::export::series_to_csv;
///
/// let entries = vec![SeriesEntry {
///     label: "Jan".to_string(),
///     value: 100.0,
///     percentage_of_total: Some(100.0),
///     delta_from_previous: None,
///     relative_change: None,
/// }];
/// let csv = series_to_csv(&entries).unwrap();
/// assert_eq!(
///     csv,
///     "label,value,percentage_of_total,delta_from_previous,relative_change\nJan,100,100,,\n"
/// );
/// ```
pub fn series_to_csv(entries: &[SeriesEntry]) -> Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(SERIES_HEADERS)?;

    for entry in entries {
        writer.write_record([
            entry.label.clone(),
            entry.value.to_string(),
            optional(entry.percentage_of_total),
            optional(entry.delta_from_previous),
            optional(entry.relative_change),
        ])?;
    }

    finish_csv(writer)
}

/// Convert a table (top-5 rows, orders list) to CSV
///
/// Cells are written in column order; quoting of commas, quotes and newlines
/// is left to the `csv` writer.
pub fn table_to_csv(columns: &[String], rows: &[TableRow]) -> Result<String> {
    let columns = table_columns(columns, rows);
    if columns.is_empty() {
        return Ok(String::new());
    }
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(&columns)?;

    for row in rows {
        writer.write_record(columns.iter().map(|c| cell_text(row.get(c))))?;
    }

    finish_csv(writer)
}

/// Convert a derived series to XLSX
///
/// Same layout as [`series_to_csv`], with numbers stored as numbers.
#[cfg(feature = "web")]
pub fn series_to_xlsx(entries: &[SeriesEntry]) -> Result<Vec<u8>> {
    use rust_xlsxwriter::{Workbook, Worksheet};

    let mut workbook = Workbook::new();
    let mut worksheet = Worksheet::new();

    for (col, header) in SERIES_HEADERS.iter().enumerate() {
        worksheet
            .write_string(0, col as u16, *header)
            .map_err(xlsx_error)?;
    }

    for (i, entry) in entries.iter().enumerate() {
        let row = (i + 1) as u32;
        worksheet
            .write_string(row, 0, entry.label.as_str())
            .map_err(xlsx_error)?;
        worksheet
            .write_number(row, 1, entry.value)
            .map_err(xlsx_error)?;

        let optionals = [
            entry.percentage_of_total,
            entry.delta_from_previous,
            entry.relative_change,
        ];
        for (offset, value) in optionals.into_iter().enumerate() {
            if let Some(value) = value {
                worksheet
                    .write_number(row, (offset + 2) as u16, value)
                    .map_err(xlsx_error)?;
            }
        }
    }

    workbook.push_worksheet(worksheet);
    workbook.save_to_buffer().map_err(xlsx_error)
}

/// Convert a table to XLSX; numeric cells stay numeric
#[cfg(feature = "web")]
pub fn table_to_xlsx(columns: &[String], rows: &[TableRow]) -> Result<Vec<u8>> {
    use rust_xlsxwriter::{Workbook, Worksheet};

    let columns = table_columns(columns, rows);
    let mut workbook = Workbook::new();
    let mut worksheet = Worksheet::new();

    for (col, name) in columns.iter().enumerate() {
        worksheet
            .write_string(0, col as u16, name.as_str())
            .map_err(xlsx_error)?;
    }

    for (i, row) in rows.iter().enumerate() {
        let r = (i + 1) as u32;
        for (col, name) in columns.iter().enumerate() {
            let col = col as u16;
            match row.get(name) {
                Some(Value::Number(n)) => {
                    worksheet
                        .write_number(r, col, n.as_f64().unwrap_or(0.0))
                        .map_err(xlsx_error)?;
                }
                None | Some(Value::Null) => {}
                other => {
                    worksheet
                        .write_string(r, col, cell_text(other).as_str())
                        .map_err(xlsx_error)?;
                }
            }
        }
    }

    workbook.push_worksheet(worksheet);
    workbook.save_to_buffer().map_err(xlsx_error)
}

#[cfg(feature = "web")]
fn xlsx_error(e: rust_xlsxwriter::XlsxError) -> Error {
    Error::Export(e.to_string())
}
