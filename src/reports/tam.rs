use std::collections::BTreeMap;

use serde::Serialize;

use super::ReportContext;
use crate::error::AppResult;
use crate::models::OfRecord;
use crate::services::reference::{region_name, REGION_ORDER};
use crate::services::stats::{mean, median, percent};
use crate::services::tam::TamFunnel;
use crate::services::writer::{
    format_count, format_float, format_percent, MarkdownDoc, ReportWriter,
};

#[derive(Debug, Clone, PartialEq)]
pub struct HeadcountRow {
    pub headcount: u32,
    pub count: usize,
    pub share: f64,
    pub mean_trainees: Option<f64>,
    pub median_trainees: Option<f64>,
    pub total_trainees: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RegionRow {
    pub code: Option<u32>,
    pub name: &'static str,
    pub count: usize,
    pub share: f64,
    pub mean_trainees: Option<f64>,
    pub mean_headcount: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatrixRow {
    pub code: Option<u32>,
    pub name: &'static str,
    pub counts: Vec<usize>,
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IntensityRow {
    pub code: Option<u32>,
    pub name: &'static str,
    pub count: usize,
    pub mean_trainees: f64,
    pub ratio: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FunnelSummary {
    #[serde(flatten)]
    pub funnel: TamFunnel,
    pub min_headcount: u32,
    pub max_headcount: u32,
    pub certification_rule: &'static str,
}

#[derive(Debug, Clone)]
pub struct TamReport {
    pub summary: FunnelSummary,
    pub headcounts: Vec<u32>,
    pub distribution: Vec<HeadcountRow>,
    pub overall_mean_trainees: Option<f64>,
    pub overall_median_trainees: Option<f64>,
    pub overall_mean_headcount: Option<f64>,
    pub total_trainees: f64,
    pub regions: Vec<RegionRow>,
    pub matrix: Vec<MatrixRow>,
    pub intensity: Vec<IntensityRow>,
}

fn trainees_of(records: &[&OfRecord]) -> Vec<f64> {
    records.iter().filter_map(|r| r.trainees).collect()
}

fn headcounts_of(records: &[&OfRecord]) -> Vec<f64> {
    records.iter().filter_map(|r| r.headcount.map(f64::from)).collect()
}

fn group_by_region<'a>(tam: &[&'a OfRecord]) -> BTreeMap<Option<u32>, Vec<&'a OfRecord>> {
    let mut groups: BTreeMap<Option<u32>, Vec<&OfRecord>> = BTreeMap::new();
    for record in tam {
        groups.entry(record.region_code).or_default().push(record);
    }
    groups
}

/// TAM organisations per region, largest first (ties by region code).
pub fn region_breakdown(tam: &[&OfRecord]) -> Vec<RegionRow> {
    let total = tam.len();
    let mut rows: Vec<RegionRow> = group_by_region(tam)
        .into_iter()
        .map(|(code, records)| RegionRow {
            code,
            name: region_name(code),
            count: records.len(),
            share: percent(records.len(), total),
            mean_trainees: mean(&trainees_of(&records)),
            mean_headcount: mean(&headcounts_of(&records)),
        })
        .collect();
    rows.sort_by(|a, b| b.count.cmp(&a.count));
    rows
}

pub fn build(ctx: &ReportContext<'_>) -> TamReport {
    let tam = &ctx.tam;
    let total = tam.len();
    let headcounts: Vec<u32> = (ctx.filter.min_headcount..=ctx.filter.max_headcount).collect();

    let distribution = headcounts
        .iter()
        .map(|&h| {
            let subset: Vec<&OfRecord> = tam.iter().copied().filter(|r| r.headcount == Some(h)).collect();
            let trainees = trainees_of(&subset);
            HeadcountRow {
                headcount: h,
                count: subset.len(),
                share: percent(subset.len(), total),
                mean_trainees: mean(&trainees),
                median_trainees: median(&trainees),
                total_trainees: trainees.iter().sum(),
            }
        })
        .collect();

    let groups = group_by_region(tam);
    let mut ordered: Vec<Option<u32>> = REGION_ORDER
        .iter()
        .map(|c| Some(*c))
        .filter(|c| groups.contains_key(c))
        .collect();
    let others: Vec<Option<u32>> = groups.keys().filter(|c| !ordered.contains(c)).copied().collect();
    ordered.extend(others);

    let matrix = ordered
        .iter()
        .map(|code| {
            let records = &groups[code];
            let counts: Vec<usize> = headcounts
                .iter()
                .map(|&h| records.iter().filter(|r| r.headcount == Some(h)).count())
                .collect();
            MatrixRow { code: *code, name: region_name(*code), total: counts.iter().sum(), counts }
        })
        .collect();

    let mut intensity: Vec<IntensityRow> = groups
        .iter()
        .filter_map(|(code, records)| {
            let mean_trainees = mean(&trainees_of(records))?;
            let ratio = mean(&headcounts_of(records))
                .filter(|h| *h > 0.0)
                .map(|h| mean_trainees / h);
            Some(IntensityRow {
                code: *code,
                name: region_name(*code),
                count: records.len(),
                mean_trainees,
                ratio,
            })
        })
        .collect();
    intensity.sort_by(|a, b| b.ratio.unwrap_or(0.0).total_cmp(&a.ratio.unwrap_or(0.0)));
    intensity.truncate(10);

    let all_trainees = trainees_of(tam);
    TamReport {
        summary: FunnelSummary {
            funnel: ctx.funnel,
            min_headcount: ctx.filter.min_headcount,
            max_headcount: ctx.filter.max_headcount,
            certification_rule: ctx.filter.rule.name(),
        },
        headcounts,
        distribution,
        overall_mean_trainees: mean(&all_trainees),
        overall_median_trainees: median(&all_trainees),
        overall_mean_headcount: mean(&headcounts_of(tam)),
        total_trainees: all_trainees.iter().sum(),
        regions: region_breakdown(tam),
        matrix,
        intensity,
    }
}

fn code_label(code: Option<u32>) -> String {
    code.map_or_else(|| "-".to_string(), |c| c.to_string())
}

fn summary_doc(report: &TamReport) -> MarkdownDoc {
    let total = report.summary.funnel.tam();
    let mut doc = MarkdownDoc::new("TAM : organismes de formation 3-10 formateurs");

    let mut rows: Vec<Vec<String>> = report
        .distribution
        .iter()
        .map(|row| {
            vec![
                row.headcount.to_string(),
                format_count(row.count),
                format_percent(row.share),
                format_float(row.mean_trainees, 1),
                format_float(row.median_trainees, 1),
                format_float(Some(row.total_trainees), 0),
            ]
        })
        .collect();
    rows.push(vec![
        "TOTAL".to_string(),
        format_count(total),
        "100%".to_string(),
        format_float(report.overall_mean_trainees, 1),
        format_float(report.overall_median_trainees, 1),
        format_float(Some(report.total_trainees), 0),
    ]);
    doc.heading(3, "Tableau 1 : Distribution des effectifs (3-10 formateurs)").table(
        &[
            "effectifFormateurs",
            "nombre_OF",
            "% du TAM",
            "stagiaires_moyen",
            "stagiaires_median",
            "stagiaires_total",
        ],
        rows,
    );

    let mut rows: Vec<Vec<String>> = report
        .regions
        .iter()
        .map(|row| {
            vec![
                code_label(row.code),
                row.name.to_string(),
                format_count(row.count),
                format_percent(row.share),
                format_float(row.mean_trainees, 1),
                format_float(row.mean_headcount, 1),
            ]
        })
        .collect();
    rows.push(vec![
        "TOTAL".to_string(),
        "France".to_string(),
        format_count(total),
        "100%".to_string(),
        format_float(report.overall_mean_trainees, 1),
        format_float(report.overall_mean_headcount, 1),
    ]);
    doc.heading(3, "Tableau 2 : Répartition par région").table(
        &[
            "codeRegion",
            "nom_region",
            "nombre_OF_TAM",
            "% national",
            "stagiaires_moyen",
            "effectif_moyen",
        ],
        rows,
    );

    let mut headers = vec!["codeRegion".to_string(), "nom_region".to_string()];
    headers.extend(report.headcounts.iter().map(|h| h.to_string()));
    headers.push("Total".to_string());
    let header_refs: Vec<&str> = headers.iter().map(String::as_str).collect();

    let mut rows: Vec<Vec<String>> = report
        .matrix
        .iter()
        .map(|row| {
            let mut cells = vec![code_label(row.code), row.name.to_string()];
            cells.extend(row.counts.iter().map(|c| format_count(*c)));
            cells.push(format_count(row.total));
            cells
        })
        .collect();
    let mut total_row = vec!["TOTAL".to_string(), "France".to_string()];
    total_row.extend(report.distribution.iter().map(|d| format_count(d.count)));
    total_row.push(format_count(total));
    rows.push(total_row);
    doc.heading(3, "Tableau 3 : Matrice région × effectif").table(&header_refs, rows);

    let rows = report.intensity.iter().enumerate().map(|(rank, row)| {
        vec![
            (rank + 1).to_string(),
            code_label(row.code),
            row.name.to_string(),
            format_count(row.count),
            format_float(Some(row.mean_trainees), 1),
            format_float(row.ratio, 2),
        ]
    });
    doc.heading(3, "Tableau 4 : Top 10 régions par intensité").table(
        &["Rang", "codeRegion", "nom_region", "nombre_OF", "stagiaires_moyen", "ratio_production"],
        rows,
    );
    doc
}

fn synthesis_doc(report: &TamReport) -> MarkdownDoc {
    let funnel = &report.summary.funnel;
    let tam = funnel.tam();
    let mut doc = MarkdownDoc::default();
    doc.heading(2, "Synthèse exécutive")
        .paragraph(format!("TAM TOTAL QUALIFIÉ : {} OF", format_count(tam)))
        .paragraph(format!("Règle de certification : {}", report.summary.certification_rule))
        .bullet(format!("Base France : {} OF", format_count(funnel.base)))
        .bullet(format!(
            "↓ {}-{} formateurs : {} OF",
            report.summary.min_headcount,
            report.summary.max_headcount,
            format_count(funnel.headcount_in_range)
        ))
        .bullet(format!("↓ + Certifiés Qualiopi : {} OF", format_count(funnel.certified)))
        .bullet(format!("↓ + Actifs : {} OF", format_count(funnel.active)))
        .blank();

    if tam == 0 {
        doc.paragraph("Aucun OF ne satisfait le filtre TAM.");
        return doc;
    }
    if let Some(top) = report.regions.first() {
        doc.paragraph(format!(
            "1. {} concentre {} OF, soit {} du TAM.",
            top.name,
            format_count(top.count),
            format_percent(top.share)
        ));
    }
    if let Some(top) = report.distribution.iter().max_by_key(|d| d.count) {
        doc.paragraph(format!(
            "2. Les structures de {} formateurs représentent {} OF ({} du TAM).",
            top.headcount,
            format_count(top.count),
            format_percent(top.share)
        ));
    }
    if let Some(first) = report.intensity.first() {
        doc.paragraph(format!(
            "3. Intensité maximale en {} avec {} stagiaires par formateur.",
            first.name,
            format_float(first.ratio, 2)
        ));
    }
    doc
}

pub fn write(report: &TamReport, writer: &mut ReportWriter) -> AppResult<()> {
    writer.write_markdown("tam_summary.md", &summary_doc(report))?;
    writer.write_markdown("synthese.md", &synthesis_doc(report))?;

    let rows = report.distribution.iter().map(|row| {
        vec![
            row.headcount.to_string(),
            row.count.to_string(),
            format!("{:.1}", row.share),
            format_float(row.mean_trainees, 1),
            format_float(row.median_trainees, 1),
            format!("{:.0}", row.total_trainees),
        ]
    });
    writer.write_csv(
        "distribution_effectif.csv",
        &[
            "effectif",
            "nombre_OF",
            "pct_tam",
            "stagiaires_moyen",
            "stagiaires_median",
            "stagiaires_total",
        ],
        rows,
    )?;
    writer.write_json("tam_funnel.json", &report.summary)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reports::fixtures::of;
    use crate::services::tam::TamFilter;

    #[test]
    fn test_region_breakdown_sorted_by_count() {
        let records = vec![of(5, 100.0, 84), of(4, 10.0, 11), of(6, 30.0, 11)];
        let tam: Vec<&OfRecord> = records.iter().collect();
        let rows = region_breakdown(&tam);
        assert_eq!(rows[0].name, "Île-de-France");
        assert_eq!(rows[0].count, 2);
        assert_eq!(rows[0].mean_trainees, Some(20.0));
        assert_eq!(rows[0].mean_headcount, Some(5.0));
        assert_eq!(rows[1].name, "Auvergne-Rhône-Alpes");
    }

    #[test]
    fn test_build_distribution_matrix_and_intensity() {
        let mut unknown = of(3, 90.0, 0);
        unknown.region_code = None;
        let records = vec![of(3, 30.0, 84), of(10, 50.0, 11), of(10, 150.0, 11), unknown, of(12, 10.0, 11)];
        let ctx = ReportContext::new(&records, TamFilter::default());
        let report = build(&ctx);

        assert_eq!(report.summary.funnel.tam(), 4);
        assert_eq!(report.distribution.len(), 8);
        assert_eq!(report.distribution[0].count, 2);
        assert_eq!(report.distribution[7].count, 2);
        assert_eq!(report.distribution[7].median_trainees, Some(100.0));
        assert_eq!(report.total_trainees, 320.0);

        // mainland order first, unknown region appended
        assert_eq!(report.matrix[0].code, Some(11));
        assert_eq!(report.matrix[1].code, Some(84));
        assert_eq!(report.matrix[2].code, None);
        assert_eq!(report.matrix[0].total, 2);

        // unknown: 90/3 = 30, ARA: 30/3 = 10, IDF: 100/10 = 10
        assert_eq!(report.intensity[0].code, None);
        assert!((report.intensity[0].ratio.unwrap() - 30.0).abs() < 1e-9);
    }

    #[test]
    fn test_write_outputs() {
        let records = vec![of(5, 120.0, 11)];
        let ctx = ReportContext::new(&records, TamFilter::default());
        let dir = tempfile::tempdir().unwrap();
        let mut writer = ReportWriter::new(dir.path()).unwrap();
        write(&build(&ctx), &mut writer).unwrap();

        let funnel: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(dir.path().join("tam_funnel.json")).unwrap()).unwrap();
        assert_eq!(funnel["active"], 1);
        assert_eq!(funnel["certification_rule"], "present");

        let synth = std::fs::read_to_string(dir.path().join("synthese.md")).unwrap();
        assert!(synth.contains("TAM TOTAL QUALIFIÉ : 1 OF"));
        assert!(synth.contains("Île-de-France concentre 1 OF"));
    }
}
