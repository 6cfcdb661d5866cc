use std::path::Path;

use calamine::{open_workbook_auto, Data, Range, Reader};

use super::types::RawRow;
use super::RowSource;
use crate::error::{AppError, AppResult};

/// First worksheet of any workbook format calamine understands.
///
/// The whole used range is materialised up front, so this backend trades
/// memory for format coverage (xls, xlsb, ods).
pub struct CalamineWorkbook {
    range: Range<Data>,
}

impl CalamineWorkbook {
    pub fn open(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        tracing::info!("Opening workbook {} with calamine", path.display());
        let start = std::time::Instant::now();

        let mut workbook = open_workbook_auto(path)?;
        let sheet_names = workbook.sheet_names().to_vec();
        tracing::info!("Found {} sheets: {:?}", sheet_names.len(), sheet_names);

        let range = workbook
            .worksheet_range_at(0)
            .ok_or_else(|| AppError::MissingPart("first worksheet".to_string()))??;
        tracing::info!("Worksheet loaded in {:?} ({:?} cells)", start.elapsed(), range.get_size());

        Ok(Self { range })
    }

    pub fn from_range(range: Range<Data>) -> Self {
        Self { range }
    }

    fn raw_rows(&self) -> impl Iterator<Item = RawRow> + '_ {
        let (first_row, first_col) = self.range.start().unwrap_or((0, 0));
        self.range.rows().enumerate().map(move |(offset, cells)| {
            let mut row = RawRow::new(first_row + offset as u32 + 1);
            for (col_offset, cell) in cells.iter().enumerate() {
                if let Some(value) = cell_text(cell) {
                    row.push(first_col as usize + col_offset, value);
                }
            }
            row
        })
    }
}

impl RowSource for CalamineWorkbook {
    fn rows<'a>(&'a mut self) -> AppResult<Box<dyn Iterator<Item = AppResult<RawRow>> + 'a>> {
        Ok(Box::new(self.raw_rows().map(Ok)))
    }
}

/// Renders a calamine cell the way the worksheet XML would carry it, so the
/// parser sees the same text from both backends.
fn cell_text(cell: &Data) -> Option<String> {
    match cell {
        Data::String(s) => Some(s.clone()),
        Data::Int(i) => Some(i.to_string()),
        Data::Float(f) => Some(f.to_string()),
        Data::Bool(b) => Some(if *b { "1" } else { "0" }.to_string()),
        Data::DateTime(d) => Some(d.as_f64().to_string()),
        Data::DateTimeIso(s) | Data::DurationIso(s) => Some(s.clone()),
        Data::Error(_) | Data::Empty => None,
    }
}
