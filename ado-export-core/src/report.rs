//! Report sink: the tabular output the extraction passes write into.
//!
//! Rows are zero-based; row 0 holds the header of each sheet.

use rust_xlsxwriter::{Format, Workbook, XlsxError};
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sheet {
    WorkItems,
    Pipelines,
    Source,
}

impl Sheet {
    pub const ALL: [Sheet; 3] = [Sheet::WorkItems, Sheet::Pipelines, Sheet::Source];

    pub fn name(self) -> &'static str {
        match self {
            Sheet::WorkItems => "WorkItems",
            Sheet::Pipelines => "Pipelines",
            Sheet::Source => "Source",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cell {
    Text(String),
    Integer(i64),
    Empty,
}

impl From<&str> for Cell {
    fn from(value: &str) -> Self {
        Cell::Text(value.to_string())
    }
}

impl From<String> for Cell {
    fn from(value: String) -> Self {
        Cell::Text(value)
    }
}

impl From<i64> for Cell {
    fn from(value: i64) -> Self {
        Cell::Integer(value)
    }
}

impl From<usize> for Cell {
    fn from(value: usize) -> Self {
        Cell::Integer(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

impl From<u64> for Cell {
    fn from(value: u64) -> Self {
        Cell::Integer(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

impl<T: Into<Cell>> From<Option<T>> for Cell {
    fn from(value: Option<T>) -> Self {
        value.map_or(Cell::Empty, Into::into)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("spreadsheet error")]
    Xlsx(#[from] XlsxError),
    #[error("row {row} in sheet {sheet} is out of range")]
    RowOutOfRange { sheet: &'static str, row: u32 },
}

/// Destination for extracted rows. Written by a single flow, row by row.
pub trait ReportSink {
    fn write_header(&mut self, sheet: Sheet, columns: &[&str]) -> Result<(), ReportError>;

    fn write_row(&mut self, sheet: Sheet, row: u32, cells: &[Cell]) -> Result<(), ReportError>;
}

/// `.xlsx` workbook with one worksheet per [`Sheet`].
pub struct XlsxReport {
    workbook: Workbook,
    header: Format,
}

impl XlsxReport {
    pub fn new() -> Result<Self, ReportError> {
        let mut workbook = Workbook::new();
        for sheet in Sheet::ALL {
            workbook.add_worksheet().set_name(sheet.name())?;
        }
        Ok(Self {
            workbook,
            header: Format::new().set_bold(),
        })
    }

    pub fn save(&mut self, path: &Path) -> Result<(), ReportError> {
        for sheet in Sheet::ALL {
            self.workbook.worksheet_from_name(sheet.name())?.autofit();
        }
        self.workbook.save(path)?;
        info!(path = %path.display(), "Saved report workbook");
        Ok(())
    }
}

impl ReportSink for XlsxReport {
    fn write_header(&mut self, sheet: Sheet, columns: &[&str]) -> Result<(), ReportError> {
        let worksheet = self.workbook.worksheet_from_name(sheet.name())?;
        for (col, title) in columns.iter().enumerate() {
            let col = u16::try_from(col).map_err(|_| ReportError::RowOutOfRange {
                sheet: sheet.name(),
                row: 0,
            })?;
            worksheet.write_string_with_format(0, col, *title, &self.header)?;
        }
        debug!(sheet = sheet.name(), columns = columns.len(), "Wrote header");
        Ok(())
    }

    fn write_row(&mut self, sheet: Sheet, row: u32, cells: &[Cell]) -> Result<(), ReportError> {
        let worksheet = self.workbook.worksheet_from_name(sheet.name())?;
        for (col, cell) in cells.iter().enumerate() {
            let col = u16::try_from(col).map_err(|_| ReportError::RowOutOfRange {
                sheet: sheet.name(),
                row,
            })?;
            match cell {
                Cell::Text(text) => {
                    worksheet.write_string(row, col, text.as_str())?;
                }
                Cell::Integer(value) => {
                    worksheet.write_number(row, col, *value as f64)?;
                }
                Cell::Empty => {}
            }
        }
        Ok(())
    }
}

/// In-memory sink, for tests and dry runs of the passes.
#[cfg(any(test, feature = "test-export-mocks"))]
#[derive(Debug, Default)]
pub struct MemoryReport {
    pub headers: std::collections::HashMap<Sheet, Vec<String>>,
    pub rows: std::collections::HashMap<Sheet, std::collections::BTreeMap<u32, Vec<Cell>>>,
}

#[cfg(any(test, feature = "test-export-mocks"))]
impl MemoryReport {
    pub fn rows_of(&self, sheet: Sheet) -> Vec<(u32, Vec<Cell>)> {
        self.rows
            .get(&sheet)
            .map(|rows| rows.iter().map(|(k, v)| (*k, v.clone())).collect())
            .unwrap_or_default()
    }

    pub fn row(&self, sheet: Sheet, row: u32) -> Option<&Vec<Cell>> {
        self.rows.get(&sheet).and_then(|rows| rows.get(&row))
    }
}

#[cfg(any(test, feature = "test-export-mocks"))]
impl ReportSink for MemoryReport {
    fn write_header(&mut self, sheet: Sheet, columns: &[&str]) -> Result<(), ReportError> {
        self.headers
            .insert(sheet, columns.iter().map(|c| c.to_string()).collect());
        Ok(())
    }

    fn write_row(&mut self, sheet: Sheet, row: u32, cells: &[Cell]) -> Result<(), ReportError> {
        if row == 0 {
            return Err(ReportError::RowOutOfRange {
                sheet: sheet.name(),
                row,
            });
        }
        self.rows
            .entry(sheet)
            .or_default()
            .insert(row, cells.to_vec());
        Ok(())
    }
}
