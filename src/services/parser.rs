use std::collections::HashMap;

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime};
use once_cell::sync::Lazy;
use regex::Regex;
use smallvec::SmallVec;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use crate::config::ColumnSchema;
use crate::error::{AppError, AppResult};
use crate::models::{OfRecord, Specialty};
use crate::services::excel::{RawRow, RowSource};

/// Scalar fields plus three specialty code and label slots.
pub const SCHEMA_COLUMNS: usize = 21;

static YEAR_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(19|20)\d{2}").unwrap());

/// Serial of 9999-12-31, the last day a spreadsheet date can hold.
const MAX_EXCEL_SERIAL: f64 = 2_958_465.0;

/// Trimmed cell text with thousands separators removed, or `None` for blank
/// and `nan` cells.
fn numeric_text(value: Option<&str>) -> Option<String> {
    let text: String = value?
        .trim()
        .chars()
        .filter(|c| *c != '\u{a0}' && *c != ' ')
        .collect();
    if text.is_empty() || text.eq_ignore_ascii_case("nan") {
        return None;
    }
    Some(text)
}

/// Integer cell. Decimal text is rounded; anything unparseable is `None`.
pub fn parse_int(value: Option<&str>) -> Option<i64> {
    let text = numeric_text(value)?;
    if text.contains('.') || text.contains('e') || text.contains('E') {
        let number: f64 = text.parse().ok()?;
        let rounded = number.round();
        if !rounded.is_finite() || rounded.abs() >= i64::MAX as f64 {
            return None;
        }
        return Some(rounded as i64);
    }
    text.parse().ok()
}

pub fn parse_float(value: Option<&str>) -> Option<f64> {
    let text = numeric_text(value)?;
    text.parse::<f64>().ok().filter(|n| n.is_finite())
}

/// SIREN (9) / SIRET (14) style identifier: digits only, left-padded with
/// zeros when the spreadsheet stored it as a number and dropped them.
pub fn parse_identifier(value: Option<&str>, length: usize) -> Option<String> {
    let text = value?.trim();
    if text.is_empty() || text.eq_ignore_ascii_case("nan") {
        return None;
    }
    let text = text.strip_suffix(".0").unwrap_or(text);
    let digits: String = if text.contains(['e', 'E']) {
        match text.parse::<f64>() {
            Ok(n) if n.is_finite() && n >= 0.0 => format!("{:.0}", n),
            _ => return Some(text.to_string()),
        }
    } else {
        text.chars().filter(|c| c.is_ascii_digit()).collect()
    };
    if digits.is_empty() {
        return Some(text.to_string());
    }
    if digits.len() < length {
        Some(format!("{:0>width$}", digits, width = length))
    } else {
        Some(digits)
    }
}

/// Date cell: an Excel serial number (1899-12-30 epoch) or one of the text
/// layouts seen in exports.
pub fn parse_excel_date(value: Option<&str>) -> Option<NaiveDate> {
    let text = value?.trim();
    if text.is_empty() {
        return None;
    }

    if let Ok(serial) = text.parse::<f64>() {
        if !serial.is_finite() || serial <= 0.0 || serial.round() > MAX_EXCEL_SERIAL {
            return None;
        }
        let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?;
        let offset = Duration::try_days(serial.round() as i64)?;
        return epoch.checked_add_signed(offset);
    }

    for format in ["%Y-%m-%d", "%d/%m/%Y", "%m/%d/%Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(text, format) {
            return Some(date);
        }
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(datetime) = NaiveDateTime::parse_from_str(text, format) {
            return Some(datetime.date());
        }
    }
    chrono::DateTime::parse_from_rfc3339(text)
        .ok()
        .map(|dt| dt.date_naive())
}

/// Year of the last declaration. Falls back to the first plausible year
/// found anywhere in the text.
pub fn parse_declaration_year(value: Option<&str>) -> Option<i32> {
    if let Some(date) = parse_excel_date(value) {
        return Some(date.year());
    }
    let found = YEAR_PATTERN.find(value?)?;
    found.as_str().parse().ok()
}

pub fn clean_text(value: Option<&str>) -> Option<String> {
    let text = value?.trim();
    if text.is_empty() || text.eq_ignore_ascii_case("nan") {
        None
    } else {
        Some(text.to_string())
    }
}

/// Canonical postal code: 5 digits for mainland and most overseas codes,
/// fewer only when the source itself was a short non-overseas fragment.
pub fn normalize_postal_code(value: Option<&str>) -> Option<String> {
    let text = value?.trim();
    if text.is_empty() || text.eq_ignore_ascii_case("nan") {
        return None;
    }
    let text = text.replace(' ', "");
    let text = text.strip_suffix(".0").unwrap_or(&text);
    let digits: String = text.chars().filter(|c| c.is_ascii_digit()).collect();

    match digits.len() {
        0 => None,
        5.. => Some(digits[..5].to_string()),
        4 => Some(format!("0{}", digits)),
        3 if digits.starts_with("97") || digits.starts_with("98") => Some(format!("{}00", digits)),
        3 => Some(digits),
        _ => Some(format!("{:0>5}", digits)),
    }
}

/// Department code of a normalised postal code: 3 digits overseas, `2A`/`2B`
/// for Corsica, the first 2 digits otherwise.
pub fn department_from_postal_code(postal_code: Option<&str>) -> Option<String> {
    let code = postal_code?;
    if code.len() < 2 || !code.is_ascii() {
        return None;
    }
    if code.starts_with("97") || code.starts_with("98") {
        return Some(code[..code.len().min(3)].to_string());
    }
    if code.starts_with("20") {
        let third = code.as_bytes().get(2).copied().unwrap_or(b'0');
        return Some(if third == b'0' || third == b'1' { "2A" } else { "2B" }.to_string());
    }
    Some(code[..2].to_string())
}

/// Upper-case, accent-free city name used as a grouping key.
pub fn normalize_city_key(name: Option<&str>) -> String {
    match name {
        Some(name) => name
            .trim()
            .to_uppercase()
            .nfd()
            .filter(|c| !is_combining_mark(*c))
            .collect(),
        None => String::new(),
    }
}

/// Column positions of every schema field, resolved from the header row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HeaderMap {
    pub numero: Option<usize>,
    pub denomination: Option<usize>,
    pub siren: Option<usize>,
    pub siret: Option<usize>,
    pub postal_code: Option<usize>,
    pub city: Option<usize>,
    pub street: Option<usize>,
    pub region: Option<usize>,
    pub certification: Option<usize>,
    pub last_declaration: Option<usize>,
    pub exercise_start: Option<usize>,
    pub exercise_end: Option<usize>,
    pub trainees: Option<usize>,
    pub subcontracted_trainees: Option<usize>,
    pub headcount: Option<usize>,
    pub specialty_codes: [Option<usize>; 3],
    pub specialty_labels: [Option<usize>; 3],
    pub missing: Vec<String>,
}

impl HeaderMap {
    pub fn from_row(row: &RawRow, schema: &ColumnSchema) -> Self {
        let positions: HashMap<&str, usize> = row
            .cells
            .iter()
            .map(|cell| (cell.value.trim(), cell.column))
            .collect();

        let mut missing = Vec::new();
        let mut find = |header: &str| {
            let column = positions.get(header).copied();
            if column.is_none() {
                missing.push(header.to_string());
            }
            column
        };

        let mut map = HeaderMap {
            numero: find(&schema.numero),
            denomination: find(&schema.denomination),
            siren: find(&schema.siren),
            siret: find(&schema.siret),
            postal_code: find(&schema.postal_code),
            city: find(&schema.city),
            street: find(&schema.street),
            region: find(&schema.region),
            certification: find(&schema.certification),
            last_declaration: find(&schema.last_declaration),
            exercise_start: find(&schema.exercise_start),
            exercise_end: find(&schema.exercise_end),
            trainees: find(&schema.trainees),
            subcontracted_trainees: find(&schema.subcontracted_trainees),
            headcount: find(&schema.headcount),
            specialty_codes: [None; 3],
            specialty_labels: [None; 3],
            missing: Vec::new(),
        };
        for i in 0..3 {
            map.specialty_codes[i] = find(&schema.specialty_codes[i]);
            map.specialty_labels[i] = find(&schema.specialty_labels[i]);
        }
        map.missing = missing;
        map
    }

    pub fn resolved(&self) -> usize {
        SCHEMA_COLUMNS - self.missing.len()
    }
}

fn cell<'r>(row: &'r RawRow, column: Option<usize>) -> Option<&'r str> {
    column.and_then(|c| row.get(c))
}

pub fn parse_record(row: &RawRow, headers: &HeaderMap) -> OfRecord {
    let postal_code = normalize_postal_code(cell(row, headers.postal_code));
    let department = department_from_postal_code(postal_code.as_deref());
    let last_declaration_text = cell(row, headers.last_declaration);

    let mut specialties: SmallVec<[Specialty; 3]> = SmallVec::new();
    for i in 0..3 {
        let specialty = Specialty {
            code: clean_text(cell(row, headers.specialty_codes[i])),
            label: clean_text(cell(row, headers.specialty_labels[i])),
        };
        specialties.push(specialty);
    }
    // Trailing empty slots carry nothing; leading ones keep positions stable.
    while specialties.last().map_or(false, |s| s.code.is_none() && s.label.is_none()) {
        specialties.pop();
    }

    OfRecord {
        row: row.index,
        numero: clean_text(cell(row, headers.numero)),
        denomination: clean_text(cell(row, headers.denomination)),
        siren: parse_identifier(cell(row, headers.siren), 9),
        siret: parse_identifier(cell(row, headers.siret), 14),
        postal_code,
        department,
        city: clean_text(cell(row, headers.city)),
        street: clean_text(cell(row, headers.street)),
        region_code: parse_int(cell(row, headers.region)).and_then(|c| u32::try_from(c).ok()),
        headcount: parse_int(cell(row, headers.headcount)).and_then(|h| u32::try_from(h).ok()),
        trainees: parse_float(cell(row, headers.trainees)).filter(|t| *t >= 0.0),
        subcontracted_trainees: parse_float(cell(row, headers.subcontracted_trainees))
            .filter(|t| *t >= 0.0),
        certification: clean_text(cell(row, headers.certification)),
        last_declaration: parse_excel_date(last_declaration_text),
        declaration_year: parse_declaration_year(last_declaration_text),
        exercise_start: parse_excel_date(cell(row, headers.exercise_start)),
        exercise_end: parse_excel_date(cell(row, headers.exercise_end)),
        specialties,
    }
}

#[derive(Debug, Clone, Default)]
pub struct LoadedSheet {
    pub records: Vec<OfRecord>,
    pub rows_seen: usize,
    pub headers: HeaderMap,
}

/// Reads every row from `source`: row 1 builds the header map, every later
/// row becomes one record. Rows without cells stay in the base as records
/// whose fields are all absent.
pub fn load_records(source: &mut dyn RowSource, schema: &ColumnSchema) -> AppResult<LoadedSheet> {
    let start = std::time::Instant::now();
    let mut headers: Option<HeaderMap> = None;
    let mut records = Vec::new();
    let mut rows_seen = 0usize;
    let mut skipped = 0usize;
    let mut blank = 0usize;

    for row in source.rows()? {
        let row = row?;
        rows_seen += 1;

        if row.is_header() {
            let map = HeaderMap::from_row(&row, schema);
            tracing::info!(
                "Resolved {} of {} schema columns from header row",
                map.resolved(),
                SCHEMA_COLUMNS
            );
            for header in &map.missing {
                tracing::warn!("Header '{}' not found in row 1, field will be empty", header);
            }
            headers = Some(map);
            continue;
        }

        let Some(map) = headers.as_ref() else {
            skipped += 1;
            continue;
        };
        if row.cells.is_empty() {
            blank += 1;
        }
        records.push(parse_record(&row, map));
    }

    let headers = headers.ok_or_else(|| AppError::MissingPart("header row 1".to_string()))?;
    if skipped > 0 {
        tracing::warn!("Skipped {} rows before the header row", skipped);
    }
    if blank > 0 {
        tracing::warn!("{} data rows carry no cells and count as empty records", blank);
    }
    tracing::info!(
        "Parsed {} records from {} rows in {:?}",
        records.len(),
        rows_seen,
        start.elapsed()
    );

    Ok(LoadedSheet { records, rows_seen, headers })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_numbers() {
        assert_eq!(parse_int(Some(" 5 ")), Some(5));
        assert_eq!(parse_int(Some("4.6")), Some(5));
        assert_eq!(parse_int(Some("1\u{a0}200")), Some(1200));
        assert_eq!(parse_int(Some("nan")), None);
        assert_eq!(parse_int(Some("")), None);
        assert_eq!(parse_int(Some("abc")), None);
        assert_eq!(parse_float(Some("120")), Some(120.0));
        assert_eq!(parse_float(Some("12.5")), Some(12.5));
        assert_eq!(parse_float(Some("NaN")), None);
        assert_eq!(parse_float(Some("inf")), None);
        assert_eq!(parse_float(None), None);
        assert_eq!(parse_int(Some("99999999999999999999")), None);
        assert_eq!(parse_int(Some("1e300")), None);
        assert_eq!(parse_int(Some("-1e19")), None);
        assert_eq!(parse_int(Some("-3")), Some(-3));
        assert_eq!(parse_float(Some("1e999")), None);
        assert_eq!(parse_float(Some("-1e999")), None);
    }

    #[test]
    fn test_parse_identifier_pads() {
        assert_eq!(parse_identifier(Some("12345678"), 9), Some("012345678".to_string()));
        assert_eq!(parse_identifier(Some("123456789.0"), 9), Some("123456789".to_string()));
        assert_eq!(parse_identifier(Some("1.23456789E8"), 9), Some("123456789".to_string()));
        assert_eq!(parse_identifier(Some("123 456 789 00012"), 14), Some("12345678900012".to_string()));
        assert_eq!(parse_identifier(Some(" "), 9), None);
    }

    #[test]
    fn test_parse_excel_date() {
        let expected = NaiveDate::from_ymd_opt(2024, 1, 1);
        assert_eq!(parse_excel_date(Some("45292")), expected);
        assert_eq!(parse_excel_date(Some("45292.4")), expected);
        assert_eq!(parse_excel_date(Some("2024-01-01")), expected);
        assert_eq!(parse_excel_date(Some("01/01/2024")), expected);
        assert_eq!(parse_excel_date(Some("2024-01-01T08:30:00")), expected);
        assert_eq!(parse_excel_date(Some("0")), None);
        assert_eq!(parse_excel_date(Some("soon")), None);
        assert_eq!(
            parse_excel_date(Some("2958465")),
            NaiveDate::from_ymd_opt(9999, 12, 31)
        );
        assert_eq!(parse_excel_date(Some("2958466")), None);
        assert_eq!(parse_excel_date(Some("99999999999999")), None);
        assert_eq!(parse_excel_date(Some("1e300")), None);
        assert_eq!(parse_excel_date(Some("-45292")), None);
        assert_eq!(parse_excel_date(Some("-1e300")), None);
    }

    #[test]
    fn test_parse_declaration_year() {
        assert_eq!(parse_declaration_year(Some("45292")), Some(2024));
        assert_eq!(parse_declaration_year(Some("déclaré en 2019")), Some(2019));
        assert_eq!(parse_declaration_year(Some("n/a")), None);
        assert_eq!(parse_declaration_year(Some("1e300")), None);
        assert_eq!(parse_declaration_year(Some("99999999999999")), None);
    }

    #[test]
    fn test_postal_code_normalization() {
        assert_eq!(normalize_postal_code(Some("75001.0")), Some("75001".to_string()));
        assert_eq!(normalize_postal_code(Some("75001")), Some("75001".to_string()));
        assert_eq!(normalize_postal_code(Some("1000")), Some("01000".to_string()));
        assert_eq!(normalize_postal_code(Some("971")), Some("97100".to_string()));
        assert_eq!(normalize_postal_code(Some("75 008")), Some("75008".to_string()));
        assert_eq!(normalize_postal_code(Some("nan")), None);
        assert_eq!(normalize_postal_code(Some("CEDEX")), None);
    }

    #[test]
    fn test_postal_code_normalization_is_idempotent() {
        for raw in ["75001.0", "1000", "971", "20090", "97400", "12"] {
            let once = normalize_postal_code(Some(raw));
            let twice = normalize_postal_code(once.as_deref());
            assert_eq!(once, twice, "{}", raw);
        }
    }

    #[test]
    fn test_department_from_postal_code() {
        assert_eq!(department_from_postal_code(Some("20090")).as_deref(), Some("2A"));
        assert_eq!(department_from_postal_code(Some("20200")).as_deref(), Some("2B"));
        assert_eq!(department_from_postal_code(Some("75001")).as_deref(), Some("75"));
        assert_eq!(department_from_postal_code(Some("97400")).as_deref(), Some("974"));
        assert_eq!(department_from_postal_code(None), None);
    }

    #[test]
    fn test_normalize_city_key() {
        assert_eq!(normalize_city_key(Some("Besançon")), normalize_city_key(Some("BESANCON")));
        assert_eq!(normalize_city_key(Some(" Saint-Étienne ")), "SAINT-ETIENNE");
        assert_eq!(normalize_city_key(None), "");
    }

    fn header_row(schema: &ColumnSchema) -> RawRow {
        let mut row = RawRow::new(1);
        row.push(0, schema.denomination.clone());
        row.push(1, schema.headcount.clone());
        row.push(2, schema.certification.clone());
        row.push(3, schema.trainees.clone());
        row.push(4, schema.region.clone());
        row.push(5, schema.postal_code.clone());
        row.push(6, schema.specialty_labels[0].clone());
        row
    }

    #[test]
    fn test_header_map_resolves_by_name() {
        let schema = ColumnSchema::default();
        let headers = HeaderMap::from_row(&header_row(&schema), &schema);
        assert_eq!(headers.headcount, Some(1));
        assert_eq!(headers.specialty_labels[0], Some(6));
        assert_eq!(headers.siren, None);
        assert_eq!(headers.resolved(), 7);
        assert!(headers.missing.contains(&schema.siren));
    }

    #[test]
    fn test_load_records_from_memory() {
        let schema = ColumnSchema::default();
        let mut data = RawRow::new(2);
        data.push(0, "Form'Action".to_string());
        data.push(1, "5".to_string());
        data.push(2, "1".to_string());
        data.push(3, "120".to_string());
        data.push(4, "11".to_string());
        data.push(5, "75001.0".to_string());
        data.push(6, "Langues vivantes".to_string());

        let mut rows = vec![header_row(&schema), data, RawRow::new(3)];
        let sheet = load_records(&mut rows, &schema).unwrap();

        assert_eq!(sheet.rows_seen, 3);
        assert_eq!(sheet.records.len(), 2);
        assert_eq!(sheet.records[1].row, 3);
        assert_eq!(sheet.records[1].headcount, None);
        assert!(sheet.records[1].specialties.is_empty());
        let record = &sheet.records[0];
        assert_eq!(record.headcount, Some(5));
        assert_eq!(record.trainees, Some(120.0));
        assert_eq!(record.region_code, Some(11));
        assert_eq!(record.department.as_deref(), Some("75"));
        assert_eq!(record.specialty_count(), 1);
        assert_eq!(record.certification.as_deref(), Some("1"));
    }

    #[test]
    fn test_load_records_requires_header() {
        let mut rows = vec![RawRow::new(2)];
        let err = load_records(&mut rows, &ColumnSchema::default()).unwrap_err();
        assert!(matches!(err, AppError::MissingPart(_)));
    }
}
