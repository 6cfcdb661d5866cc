pub mod calamine_source;
pub mod reader;
pub mod types;
pub mod utils;

use std::path::Path;

pub use calamine_source::CalamineWorkbook;
pub use reader::{load_shared_strings, XlsxWorkbook};
pub use types::{RawCell, RawRow};

use crate::config::ReaderBackend;
use crate::error::AppResult;

/// Anything that can hand out worksheet rows in document order.
///
/// The record loader only depends on this trait, so tests can feed it rows
/// built in memory and the binary can swap the workbook backend.
pub trait RowSource {
    fn rows<'a>(&'a mut self) -> AppResult<Box<dyn Iterator<Item = AppResult<RawRow>> + 'a>>;
}

impl RowSource for Vec<RawRow> {
    fn rows<'a>(&'a mut self) -> AppResult<Box<dyn Iterator<Item = AppResult<RawRow>> + 'a>> {
        Ok(Box::new(self.iter().cloned().map(Ok)))
    }
}

pub fn open_row_source(backend: ReaderBackend, path: &Path) -> AppResult<Box<dyn RowSource>> {
    match backend {
        ReaderBackend::Stream => Ok(Box::new(XlsxWorkbook::open(path)?)),
        ReaderBackend::Calamine => Ok(Box::new(CalamineWorkbook::open(path)?)),
    }
}
