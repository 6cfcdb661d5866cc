//! Streaming reader for OOXML workbooks.
//!
//! Only two parts of the package are touched: the shared-string table and
//! the first worksheet. The worksheet is pulled event by event, so at most
//! one row is alive at a time regardless of the sheet size.

use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::Path;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use zip::result::ZipError;
use zip::ZipArchive;

use super::types::RawRow;
use super::utils::{column_index, row_number};
use super::RowSource;
use crate::error::{AppError, AppResult};

pub const SHARED_STRINGS_PART: &str = "xl/sharedStrings.xml";
pub const FIRST_SHEET_PART: &str = "xl/worksheets/sheet1.xml";

/// Reads `xl/sharedStrings.xml` into an ordered table.
///
/// A package without that part is valid (every string may be inline) and
/// yields an empty table. Rich-text runs of one `<si>` are concatenated;
/// phonetic hints (`<rPh>`) are left out.
pub fn load_shared_strings<R: Read + Seek>(archive: &mut ZipArchive<R>) -> AppResult<Vec<String>> {
    let part = match archive.by_name(SHARED_STRINGS_PART) {
        Ok(part) => part,
        Err(ZipError::FileNotFound) => {
            tracing::debug!("No shared string table in workbook");
            return Ok(Vec::new());
        }
        Err(e) => return Err(e.into()),
    };

    let mut reader = Reader::from_reader(BufReader::new(part));
    let mut buf = Vec::new();
    let mut strings = Vec::new();
    let mut current = String::new();
    let mut in_item = false;
    let mut in_text = false;
    let mut in_phonetic = false;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"si" => {
                    in_item = true;
                    current.clear();
                }
                b"rPh" => in_phonetic = true,
                b"t" if in_item && !in_phonetic => in_text = true,
                _ => {}
            },
            Event::Empty(e) => {
                if e.local_name().as_ref() == b"si" {
                    strings.push(String::new());
                }
            }
            Event::Text(t) if in_text => current.push_str(&t.unescape()?),
            Event::CData(t) if in_text => current.push_str(&String::from_utf8_lossy(&t)),
            Event::End(e) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"rPh" => in_phonetic = false,
                b"si" => {
                    in_item = false;
                    strings.push(std::mem::take(&mut current));
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(strings)
}

/// An opened `.xlsx` package with its shared strings already resolved.
pub struct XlsxWorkbook<R: Read + Seek = BufReader<File>> {
    archive: ZipArchive<R>,
    shared_strings: Vec<String>,
}

impl XlsxWorkbook<BufReader<File>> {
    pub fn open(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        tracing::info!("Opening workbook {}", path.display());
        let file = File::open(path)?;
        Self::from_reader(BufReader::new(file))
    }
}

impl<R: Read + Seek> XlsxWorkbook<R> {
    pub fn from_reader(reader: R) -> AppResult<Self> {
        let mut archive = ZipArchive::new(reader)?;
        let shared_strings = load_shared_strings(&mut archive)?;
        tracing::info!("Loaded {} shared strings", shared_strings.len());
        Ok(Self { archive, shared_strings })
    }

    pub fn shared_strings(&self) -> &[String] {
        &self.shared_strings
    }

    /// Streams the rows of the first worksheet in document order.
    pub fn rows(&mut self) -> AppResult<RowStream<'_>> {
        let part = match self.archive.by_name(FIRST_SHEET_PART) {
            Ok(part) => part,
            Err(ZipError::FileNotFound) => {
                return Err(AppError::MissingPart(FIRST_SHEET_PART.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        let source: Box<dyn Read + '_> = Box::new(part);
        Ok(RowStream {
            reader: Reader::from_reader(BufReader::new(source)),
            shared_strings: &self.shared_strings,
            buf: Vec::new(),
            last_row: 0,
            finished: false,
        })
    }
}

impl<R: Read + Seek> RowSource for XlsxWorkbook<R> {
    fn rows<'a>(&'a mut self) -> AppResult<Box<dyn Iterator<Item = AppResult<RawRow>> + 'a>> {
        Ok(Box::new(XlsxWorkbook::rows(self)?))
    }
}

#[derive(Clone, Copy, PartialEq)]
enum TextTarget {
    None,
    Value,
    Inline,
}

#[derive(Default)]
struct PendingCell {
    column: usize,
    kind: Option<String>,
    value: Option<String>,
    inline: Option<String>,
}

/// Iterator over the `<row>` elements of one worksheet part.
pub struct RowStream<'a> {
    reader: Reader<BufReader<Box<dyn Read + 'a>>>,
    shared_strings: &'a [String],
    buf: Vec<u8>,
    last_row: u32,
    finished: bool,
}

impl RowStream<'_> {
    fn read_row(&mut self) -> AppResult<Option<RawRow>> {
        let RowStream { reader, shared_strings, buf, last_row, .. } = self;

        let mut row: Option<RawRow> = None;
        let mut cell: Option<PendingCell> = None;
        let mut target = TextTarget::None;
        let mut next_column = 0usize;

        loop {
            buf.clear();
            match reader.read_event_into(buf)? {
                Event::Start(e) => match e.local_name().as_ref() {
                    b"row" => {
                        let index = row_index(&e, *last_row)?;
                        *last_row = index;
                        next_column = 0;
                        row = Some(RawRow::new(index));
                    }
                    b"c" => {
                        let pending = pending_cell(&e, next_column)?;
                        next_column = pending.column + 1;
                        cell = Some(pending);
                    }
                    b"v" => target = TextTarget::Value,
                    b"is" => {
                        if let Some(c) = cell.as_mut() {
                            c.inline = Some(String::new());
                        }
                    }
                    b"t" => {
                        if cell.as_ref().map_or(false, |c| c.inline.is_some()) {
                            target = TextTarget::Inline;
                        }
                    }
                    b"rPh" => target = TextTarget::None,
                    _ => {}
                },
                Event::Empty(e) => match e.local_name().as_ref() {
                    b"row" => {
                        let index = row_index(&e, *last_row)?;
                        *last_row = index;
                        return Ok(Some(RawRow::new(index)));
                    }
                    // A self-closed cell has no value node: nothing to record.
                    b"c" => {
                        let pending = pending_cell(&e, next_column)?;
                        next_column = pending.column + 1;
                    }
                    _ => {}
                },
                Event::Text(t) => {
                    if let Some(c) = cell.as_mut() {
                        match target {
                            TextTarget::Value => c.value.get_or_insert_with(String::new).push_str(&t.unescape()?),
                            TextTarget::Inline => {
                                if let Some(inline) = c.inline.as_mut() {
                                    inline.push_str(&t.unescape()?);
                                }
                            }
                            TextTarget::None => {}
                        }
                    }
                }
                Event::End(e) => match e.local_name().as_ref() {
                    b"v" | b"t" => target = TextTarget::None,
                    b"c" => {
                        if let (Some(c), Some(r)) = (cell.take(), row.as_mut()) {
                            let column = c.column;
                            if let Some(value) = resolve_cell(c, *shared_strings) {
                                r.push(column, value);
                            }
                        }
                    }
                    b"row" => {
                        if let Some(r) = row.take() {
                            return Ok(Some(r));
                        }
                    }
                    _ => {}
                },
                Event::Eof => return Ok(None),
                _ => {}
            }
        }
    }
}

impl Iterator for RowStream<'_> {
    type Item = AppResult<RawRow>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.read_row() {
            Ok(Some(row)) => Some(Ok(row)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}

fn row_index(element: &BytesStart<'_>, last_row: u32) -> AppResult<u32> {
    if let Some(attr) = element.try_get_attribute(b"r")? {
        let text = attr.unescape_value()?;
        match row_number(&text) {
            Some(index) => return Ok(index),
            None => tracing::warn!("Unreadable row index '{}', assuming {}", text, last_row + 1),
        }
    }
    Ok(last_row + 1)
}

fn pending_cell(element: &BytesStart<'_>, next_column: usize) -> AppResult<PendingCell> {
    let mut cell = PendingCell { column: next_column, ..PendingCell::default() };
    for attr in element.attributes() {
        let attr = attr?;
        match attr.key.local_name().as_ref() {
            b"r" => {
                let reference = attr.unescape_value()?;
                if let Some(column) = column_index(&reference) {
                    cell.column = column;
                }
            }
            b"t" => cell.kind = Some(attr.unescape_value()?.into_owned()),
            _ => {}
        }
    }
    Ok(cell)
}

/// Resolves a cell to text according to its `t` attribute.
///
/// `s` indexes the shared-string table, `inlineStr` carries its own text,
/// `e` (formula error) is treated as no value, everything else is the raw
/// `<v>` text for the caller to type.
fn resolve_cell(cell: PendingCell, shared_strings: &[String]) -> Option<String> {
    match cell.kind.as_deref() {
        Some("s") => {
            let raw = cell.value?;
            match raw.trim().parse::<usize>() {
                Ok(idx) => match shared_strings.get(idx) {
                    Some(text) => Some(text.clone()),
                    None => {
                        tracing::warn!("Shared string index {} out of range ({} entries)", idx, shared_strings.len());
                        None
                    }
                },
                Err(_) => {
                    tracing::warn!("Invalid shared string index '{}'", raw);
                    None
                }
            }
        }
        Some("inlineStr") => cell.inline.or(cell.value),
        Some("e") => None,
        _ => cell.value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};
    use zip::write::SimpleFileOptions;

    fn build_xlsx(shared: Option<&str>, sheet: &str) -> Cursor<Vec<u8>> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default();
        if let Some(shared) = shared {
            writer.start_file(SHARED_STRINGS_PART, options).unwrap();
            writer.write_all(shared.as_bytes()).unwrap();
        }
        writer.start_file(FIRST_SHEET_PART, options).unwrap();
        writer.write_all(sheet.as_bytes()).unwrap();
        let mut cursor = writer.finish().unwrap();
        cursor.set_position(0);
        cursor
    }

    const NS: &str = r#"xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main""#;

    #[test]
    fn test_shared_strings_concatenate_runs() {
        let shared = format!(
            r#"<sst {NS}><si><t>plain</t></si><si><r><t>rich </t></r><r><t>text</t></r></si><si><t>a&amp;b</t><rPh><t>phon</t></rPh></si><si/></sst>"#
        );
        let mut workbook = XlsxWorkbook::from_reader(build_xlsx(Some(&shared), "<worksheet/>")).unwrap();
        assert_eq!(workbook.shared_strings(), &["plain", "rich text", "a&b", ""]);
        assert!(workbook.rows().unwrap().next().is_none());
    }

    #[test]
    fn test_missing_shared_strings_is_empty_table() {
        let sheet = format!(r#"<worksheet {NS}><sheetData></sheetData></worksheet>"#);
        let workbook = XlsxWorkbook::from_reader(build_xlsx(None, &sheet)).unwrap();
        assert!(workbook.shared_strings().is_empty());
    }

    #[test]
    fn test_missing_sheet_is_an_error() {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        writer.start_file("xl/workbook.xml", SimpleFileOptions::default()).unwrap();
        writer.write_all(b"<workbook/>").unwrap();
        let mut cursor = writer.finish().unwrap();
        cursor.set_position(0);

        let mut workbook = XlsxWorkbook::from_reader(cursor).unwrap();
        assert!(matches!(workbook.rows(), Err(AppError::MissingPart(_))));
    }

    #[test]
    fn test_rows_resolve_all_cell_kinds() {
        let shared = format!(r#"<sst {NS}><si><t>header</t></si><si><t>Besançon</t></si></sst>"#);
        let sheet = format!(
            r#"<worksheet {NS}><sheetData>
<row r="1"><c r="A1" t="s"><v>0</v></c></row>
<row r="2"><c r="A2" t="s"><v>1</v></c><c r="B2"><v>75001.0</v></c><c r="C2" t="inlineStr"><is><t>inline</t></is></c><c r="D2" s="3"/><c r="E2" t="e"><v>#N/A</v></c><c r="AB2"><v>7</v></c></row>
<row r="4"><c t="s"><v>9</v></c><c><v>1</v></c></row>
</sheetData></worksheet>"#
        );
        let mut workbook = XlsxWorkbook::from_reader(build_xlsx(Some(&shared), &sheet)).unwrap();
        let rows: Vec<RawRow> = workbook.rows().unwrap().collect::<AppResult<_>>().unwrap();

        assert_eq!(rows.len(), 3);
        assert!(rows[0].is_header());
        assert_eq!(rows[0].get(0), Some("header"));

        let data = &rows[1];
        assert_eq!(data.index, 2);
        assert_eq!(data.get(0), Some("Besançon"));
        assert_eq!(data.get(1), Some("75001.0"));
        assert_eq!(data.get(2), Some("inline"));
        assert_eq!(data.get(3), None);
        assert_eq!(data.get(4), None);
        assert_eq!(data.get(27), Some("7"));

        // Out-of-range shared index is dropped, positional column inferred.
        let last = &rows[2];
        assert_eq!(last.index, 4);
        assert_eq!(last.get(0), None);
        assert_eq!(last.get(1), Some("1"));
    }

    #[test]
    fn test_empty_row_element() {
        let sheet = format!(r#"<worksheet {NS}><sheetData><row r="1"/><row><c r="B2"><v>3</v></c></row></sheetData></worksheet>"#);
        let mut workbook = XlsxWorkbook::from_reader(build_xlsx(None, &sheet)).unwrap();
        let rows: Vec<RawRow> = workbook.rows().unwrap().collect::<AppResult<_>>().unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows[0].cells.is_empty());
        assert_eq!(rows[1].index, 2);
        assert_eq!(rows[1].get(1), Some("3"));
    }
}
