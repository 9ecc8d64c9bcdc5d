use crate::error::MapError;
use anyhow::{anyhow, Context, Result};
use calamine::{open_workbook_auto, Data, Reader};
use csv::{ReaderBuilder, WriterBuilder};
use rust_xlsxwriter::Workbook;
use std::borrow::Cow;
use std::fmt;
use std::fs::File;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableFormat {
    Csv,
    Spreadsheet,
}

impl TableFormat {
    pub fn from_path(path: &Path) -> Result<Self, MapError> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|s| s.to_lowercase());

        match extension.as_deref() {
            Some("csv") => Ok(TableFormat::Csv),
            Some("xlsx") | Some("xls") | Some("ods") => Ok(TableFormat::Spreadsheet),
            _ => Err(MapError::unsupported(path)),
        }
    }
}

/// One table cell. CSV cells are always `Text`; spreadsheet cells keep the
/// type they were stored with so they are written back unchanged.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Empty,
    Text(String),
    Number(f64),
    Bool(bool),
}

impl Cell {
    /// Display form; whole numbers print without a fraction.
    pub fn text(&self) -> Cow<'_, str> {
        match self {
            Cell::Empty => Cow::Borrowed(""),
            Cell::Text(s) => Cow::Borrowed(s.as_str()),
            Cell::Number(n) => Cow::Owned(format_number(*n)),
            Cell::Bool(b) => Cow::Owned(b.to_string()),
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text())
    }
}

impl From<&str> for Cell {
    fn from(text: &str) -> Self {
        Cell::Text(text.to_string())
    }
}

impl From<&Data> for Cell {
    fn from(cell: &Data) -> Self {
        match cell {
            Data::Empty => Cell::Empty,
            Data::String(s) => Cell::Text(s.clone()),
            Data::Int(i) => Cell::Number(*i as f64),
            Data::Float(f) => Cell::Number(*f),
            Data::Bool(b) => Cell::Bool(*b),
            other => Cell::Text(other.to_string()),
        }
    }
}

/// A header row and typed cells.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

impl Table {
    pub fn column_index(&self, column: &str, path: &Path) -> Result<usize, MapError> {
        self.headers
            .iter()
            .position(|h| h.trim() == column)
            .ok_or_else(|| MapError::MissingColumn {
                path: path.to_path_buf(),
                column: column.to_string(),
            })
    }

    pub fn cell(&self, row: usize, column: usize) -> Cow<'_, str> {
        self.rows
            .get(row)
            .and_then(|r| r.get(column))
            .map(Cell::text)
            .unwrap_or(Cow::Borrowed(""))
    }
}

pub fn read_table(path: &Path) -> Result<Table> {
    match TableFormat::from_path(path)? {
        TableFormat::Csv => read_csv(path),
        TableFormat::Spreadsheet => read_spreadsheet(path),
    }
}

pub fn write_table(path: &Path, table: &Table) -> Result<()> {
    match TableFormat::from_path(path)? {
        TableFormat::Csv => write_csv(path, table),
        TableFormat::Spreadsheet => write_spreadsheet(path, table),
    }
}

fn read_csv(path: &Path) -> Result<Table> {
    let file = File::open(path).with_context(|| format!("Failed to open CSV file: {:?}", path))?;
    let mut rdr = ReaderBuilder::new().flexible(true).from_reader(file);
    let headers = rdr.headers()?.iter().map(str::to_string).collect();

    let mut rows = Vec::new();
    for result in rdr.records() {
        let record = result.with_context(|| format!("Malformed CSV row in {:?}", path))?;
        rows.push(record.iter().map(Cell::from).collect());
    }

    Ok(Table { headers, rows })
}

fn read_spreadsheet(path: &Path) -> Result<Table> {
    let mut workbook = open_workbook_auto(path)
        .with_context(|| format!("Failed to open spreadsheet: {:?}", path))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| anyhow!("Spreadsheet {:?} has no worksheets", path))?
        .with_context(|| format!("Failed to read first worksheet of {:?}", path))?;

    let mut rows = range.rows().map(|row| row.iter().map(Cell::from).collect::<Vec<_>>());
    let headers = rows
        .next()
        .map(|row| row.iter().map(|cell| cell.to_string()).collect())
        .unwrap_or_default();

    Ok(Table {
        headers,
        rows: rows.collect(),
    })
}

/// Whole numbers print as integers so that ids like `5915022.0` match the
/// shapefile's `5915022`.
pub fn format_number(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}

fn write_csv(path: &Path, table: &Table) -> Result<()> {
    let mut wtr = WriterBuilder::new()
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("Failed to create CSV file: {:?}", path))?;
    wtr.write_record(&table.headers)?;
    for row in &table.rows {
        wtr.write_record(row.iter().map(|cell| cell.to_string()))?;
    }
    wtr.flush()?;
    Ok(())
}

fn write_spreadsheet(path: &Path, table: &Table) -> Result<()> {
    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();

    for (col, header) in table.headers.iter().enumerate() {
        sheet.write_string(0, col as u16, header.as_str())?;
    }
    for (r, row) in table.rows.iter().enumerate() {
        let r = (r + 1) as u32;
        for (col, cell) in row.iter().enumerate() {
            let col = col as u16;
            match cell {
                Cell::Empty => continue,
                Cell::Text(s) => sheet.write_string(r, col, s.as_str())?,
                Cell::Number(n) => sheet.write_number(r, col, *n)?,
                Cell::Bool(b) => sheet.write_boolean(r, col, *b)?,
            };
        }
    }

    workbook
        .save(path)
        .with_context(|| format!("Failed to write spreadsheet: {:?}", path))?;
    Ok(())
}
