use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use of_market::config::{ColumnSchema, ReaderBackend};
use of_market::reports::{run_reports, tam::region_breakdown, ReportContext, ReportKind};
use of_market::services::excel::utils::column_letters;
use of_market::services::excel::{open_row_source, XlsxWorkbook};
use of_market::services::parser::load_records;
use of_market::services::tam::TamFilter;
use of_market::services::writer::ReportWriter;
use zip::write::SimpleFileOptions;

const NS: &str = "http://schemas.openxmlformats.org/spreadsheetml/2006/main";

enum Cell<'a> {
    Text(&'a str),
    Number(&'a str),
    Empty,
}

fn schema_headers(schema: &ColumnSchema) -> Vec<String> {
    let mut headers = vec![
        schema.numero.clone(),
        schema.denomination.clone(),
        schema.siren.clone(),
        schema.siret.clone(),
        schema.postal_code.clone(),
        schema.city.clone(),
        schema.region.clone(),
        schema.certification.clone(),
        schema.last_declaration.clone(),
        schema.exercise_start.clone(),
        schema.exercise_end.clone(),
        schema.trainees.clone(),
        schema.subcontracted_trainees.clone(),
        schema.headcount.clone(),
    ];
    headers.extend(schema.specialty_codes.iter().cloned());
    headers.extend(schema.specialty_labels.iter().cloned());
    headers.push(schema.street.clone());
    headers
}

fn row_xml(row: u32, cells: &[Cell<'_>]) -> String {
    let mut xml = format!(r#"<row r="{}">"#, row);
    for (i, cell) in cells.iter().enumerate() {
        let reference = format!("{}{}", column_letters(i), row);
        match cell {
            Cell::Text(text) => xml.push_str(&format!(
                r#"<c r="{}" t="inlineStr"><is><t>{}</t></is></c>"#,
                reference, text
            )),
            Cell::Number(value) => xml.push_str(&format!(r#"<c r="{}"><v>{}</v></c>"#, reference, value)),
            Cell::Empty => {}
        }
    }
    xml.push_str("</row>");
    xml
}

/// Header row plus one qualified organisation and one too large to qualify.
fn write_registry(path: &Path) {
    let headers = schema_headers(&ColumnSchema::default());
    let header_cells: Vec<Cell<'_>> = headers.iter().map(|h| Cell::Text(h)).collect();

    let qualified = [
        Cell::Text("11750000175"),
        Cell::Text("Alpha Formation"),
        Cell::Number("123456789"),
        Cell::Text("12345678900012"),
        Cell::Number("75011"),
        Cell::Text("Paris"),
        Cell::Number("11"),
        Cell::Number("1"),
        Cell::Number("45292"),
        Cell::Number("45292"),
        Cell::Number("45657"),
        Cell::Number("120"),
        Cell::Number("0"),
        Cell::Number("5"),
        Cell::Text("333"),
        Cell::Empty,
        Cell::Empty,
        Cell::Text("Enseignement, formation"),
        Cell::Empty,
        Cell::Empty,
        Cell::Text("12 rue de la Roquette"),
    ];
    let too_large = [
        Cell::Text("84690000169"),
        Cell::Text("Beta Conseil"),
        Cell::Number("987654321"),
        Cell::Text("98765432100019"),
        Cell::Number("69001"),
        Cell::Text("Lyon"),
        Cell::Number("84"),
        Cell::Empty,
        Cell::Text("2023-06-30"),
        Cell::Empty,
        Cell::Empty,
        Cell::Number("300"),
        Cell::Empty,
        Cell::Number("15"),
        Cell::Empty,
        Cell::Empty,
        Cell::Empty,
        Cell::Text("Informatique"),
        Cell::Empty,
        Cell::Empty,
    ];

    let sheet = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><worksheet xmlns="{}"><sheetData>{}{}{}</sheetData></worksheet>"#,
        NS,
        row_xml(1, &header_cells),
        row_xml(2, &qualified),
        row_xml(3, &too_large),
    );

    let mut zip = zip::ZipWriter::new(File::create(path).unwrap());
    zip.start_file("xl/worksheets/sheet1.xml", SimpleFileOptions::default())
        .unwrap();
    zip.write_all(sheet.as_bytes()).unwrap();
    zip.finish().unwrap();
}

fn registry() -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("registry.xlsx");
    write_registry(&path);
    (dir, path)
}

#[test]
fn test_qualified_subset_from_workbook() {
    let (_dir, path) = registry();
    let mut workbook = XlsxWorkbook::open(&path).unwrap();
    let sheet = load_records(&mut workbook, &ColumnSchema::default()).unwrap();

    assert_eq!(sheet.records.len(), 2);
    let first = &sheet.records[0];
    assert_eq!(first.siren.as_deref(), Some("123456789"));
    assert_eq!(first.department.as_deref(), Some("75"));
    assert_eq!(first.declaration_year, Some(2024));
    assert_eq!(first.main_specialty(), Some("Enseignement, formation"));
    assert_eq!(first.street.as_deref(), Some("12 rue de la Roquette"));
    assert_eq!(sheet.records[1].street, None);
    assert_eq!(sheet.records[1].declaration_year, Some(2023));

    let ctx = ReportContext::new(&sheet.records, TamFilter::default());
    assert_eq!(ctx.tam.len(), 1);
    assert_eq!(ctx.tam[0].row, 2);
    assert_eq!(ctx.funnel.headcount_in_range, 1);

    let regions = region_breakdown(&ctx.tam);
    assert_eq!(regions.len(), 1);
    assert_eq!(regions[0].name, "Île-de-France");
    assert_eq!(regions[0].count, 1);
    assert_eq!(regions[0].mean_trainees, Some(120.0));
}

#[test]
fn test_every_report_writes_its_files() {
    let (dir, path) = registry();
    let mut source = open_row_source(ReaderBackend::Stream, &path).unwrap();
    let sheet = load_records(source.as_mut(), &ColumnSchema::default()).unwrap();
    let ctx = ReportContext::new(&sheet.records, TamFilter::default());

    let out = dir.path().join("out");
    let mut writer = ReportWriter::new(&out).unwrap();
    run_reports(&ReportKind::ALL, &ctx, &mut writer).unwrap();

    let expected = [
        "tam_summary.md",
        "synthese.md",
        "distribution_effectif.csv",
        "tam_funnel.json",
        "effectifs_analysis.md",
        "distribution_0_100.csv",
        "departements_analysis.md",
        "departements_scoring.csv",
        "specialites_analysis.md",
        "specialites_export.csv",
        "reseaux_nationaux.md",
        "reseaux_top50.csv",
        "dormants_analysis.md",
        "dormants_export.csv",
        "prospects_top500.md",
        "prospects_top500.csv",
        "prospects_top100.csv",
        "evolution_temporelle.md",
        "evolution_annees.csv",
        "scenarios_croissance.md",
        "scenario_b_projection.csv",
        "qualite_donnees.md",
        "qualite_sans_cp.csv",
        "maturite_qualiopi.md",
        "maturite_regions.csv",
        "haute_activite.md",
        "haute_activite_top50.csv",
        "polyvalence_analysis.md",
        "polyvalence_combinations.csv",
    ];
    for name in expected {
        assert!(out.join(name).is_file(), "{} missing", name);
    }
    assert_eq!(writer.written().len(), expected.len());

    let prospects = std::fs::read_to_string(out.join("prospects_top500.csv")).unwrap();
    assert_eq!(prospects.lines().count(), 2);
    assert!(prospects.contains("Alpha Formation"));

    let funnel: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(out.join("tam_funnel.json")).unwrap()).unwrap();
    assert_eq!(funnel["base"], 2);
    assert_eq!(funnel["active"], 1);
}

#[test]
fn test_missing_workbook_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let result = open_row_source(ReaderBackend::Stream, &dir.path().join("absent.xlsx"));
    assert!(result.is_err());
}
