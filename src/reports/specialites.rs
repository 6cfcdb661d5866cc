use std::collections::HashMap;

use super::ReportContext;
use crate::error::AppResult;
use crate::models::OfRecord;
use crate::services::classify::{classify_specialite, MacroTheme};
use crate::services::stats::{mean, percent};
use crate::services::writer::{format_count, format_float, format_percent, MarkdownDoc, ReportWriter};

const UNLABELLED: &str = "Non renseigné";

#[derive(Debug, Clone, PartialEq)]
pub struct SpecialtyRow {
    pub code: Option<String>,
    pub label: String,
    pub theme: MacroTheme,
    pub base_count: usize,
    pub base_share: f64,
    pub tam_count: usize,
    pub tam_share: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ThemeRow {
    pub theme: MacroTheme,
    pub base_count: usize,
    pub base_share: f64,
    pub tam_count: usize,
    pub tam_share: f64,
    pub mean_trainees: Option<f64>,
    pub mean_trainees_per_trainer: Option<f64>,
    pub top_labels: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BreadthRow {
    pub specialties: usize,
    pub base_count: usize,
    pub tam_count: usize,
    pub tam_share: f64,
}

#[derive(Debug, Clone)]
pub struct SpecialitesReport {
    pub base_total: usize,
    pub tam_total: usize,
    pub top: Vec<SpecialtyRow>,
    pub themes: Vec<ThemeRow>,
    pub breadth: Vec<BreadthRow>,
}

type SpecialtyKey = (Option<String>, String);

fn primary_key(record: &OfRecord) -> Option<SpecialtyKey> {
    let first = record.specialties.first()?;
    if first.code.is_none() && first.label.is_none() {
        return None;
    }
    Some((
        first.code.clone(),
        first.label.clone().unwrap_or_else(|| UNLABELLED.to_string()),
    ))
}

/// Counts in first-seen order so equal counts keep a stable ranking.
fn count_keys<'a, I>(records: I) -> (Vec<SpecialtyKey>, HashMap<SpecialtyKey, usize>)
where
    I: Iterator<Item = &'a OfRecord>,
{
    let mut order = Vec::new();
    let mut counts: HashMap<SpecialtyKey, usize> = HashMap::new();
    for key in records.filter_map(primary_key) {
        let count = counts.entry(key.clone()).or_insert(0);
        if *count == 0 {
            order.push(key);
        }
        *count += 1;
    }
    (order, counts)
}

pub fn build(ctx: &ReportContext<'_>) -> SpecialitesReport {
    let base_total = ctx.records.len();
    let tam_total = ctx.tam.len();

    let (order, base_counts) = count_keys(ctx.records.iter());
    let (_, tam_counts) = count_keys(ctx.tam.iter().copied());

    let mut top: Vec<SpecialtyRow> = order
        .into_iter()
        .map(|key| {
            let base_count = base_counts[&key];
            let tam_count = tam_counts.get(&key).copied().unwrap_or(0);
            SpecialtyRow {
                theme: classify_specialite(Some(key.1.as_str())),
                code: key.0,
                label: key.1,
                base_count,
                base_share: percent(base_count, base_total),
                tam_count,
                tam_share: percent(tam_count, tam_total),
            }
        })
        .collect();
    top.sort_by(|a, b| b.base_count.cmp(&a.base_count));
    top.truncate(50);

    let mut themes: Vec<ThemeRow> = MacroTheme::ALL
        .iter()
        .map(|&theme| {
            let in_theme = |r: &&OfRecord| primary_key(r).is_some() && r.main_theme() == theme;
            let base_count = ctx.records.iter().filter(|r| in_theme(r)).count();
            let tam: Vec<&OfRecord> = ctx.tam.iter().copied().filter(|r| in_theme(r)).collect();
            let trainees: Vec<f64> = tam.iter().filter_map(|r| r.trainees).collect();
            let per_trainer: Vec<f64> = tam
                .iter()
                .filter_map(|r| match (r.trainees, r.headcount) {
                    (Some(t), Some(h)) if h > 0 => Some(t / h as f64),
                    _ => None,
                })
                .collect();

            let (label_order, label_counts) = count_keys(tam.iter().copied());
            let mut labels: Vec<(String, usize)> = label_order
                .into_iter()
                .map(|key| {
                    let n = label_counts[&key];
                    (key.1, n)
                })
                .collect();
            labels.sort_by(|a, b| b.1.cmp(&a.1));

            ThemeRow {
                theme,
                base_count,
                base_share: percent(base_count, base_total),
                tam_count: tam.len(),
                tam_share: percent(tam.len(), tam_total),
                mean_trainees: mean(&trainees),
                mean_trainees_per_trainer: mean(&per_trainer),
                top_labels: labels.into_iter().take(3).map(|(l, _)| l).collect(),
            }
        })
        .collect();
    themes.sort_by(|a, b| b.tam_share.total_cmp(&a.tam_share));

    let breadth = (0..=3)
        .map(|n| {
            let base_count = ctx.records.iter().filter(|r| r.specialty_count() == n).count();
            let tam_count = ctx.tam.iter().filter(|r| r.specialty_count() == n).count();
            BreadthRow {
                specialties: n,
                base_count,
                tam_count,
                tam_share: percent(tam_count, tam_total),
            }
        })
        .collect();

    SpecialitesReport { base_total, tam_total, top, themes, breadth }
}

pub fn write(report: &SpecialitesReport, writer: &mut ReportWriter) -> AppResult<()> {
    let mut doc = MarkdownDoc::new("Analyse des spécialités");
    doc.bullet(format!("Base : {} OF", format_count(report.base_total)))
        .bullet(format!("TAM : {} OF", format_count(report.tam_total)))
        .blank();

    let rows = report.top.iter().enumerate().map(|(i, row)| {
        vec![
            (i + 1).to_string(),
            row.code.clone().unwrap_or_else(|| "-".to_string()),
            row.label.clone(),
            format_count(row.base_count),
            format_percent(row.base_share),
            format_count(row.tam_count),
            format_percent(row.tam_share),
        ]
    });
    doc.heading(2, "Tableau 1 : Top 50 des spécialités principales (Spé 1)").table(
        &["Rang", "Code NSF", "Libellé spécialité", "OF total", "% base", "OF TAM", "% TAM"],
        rows,
    );

    let rows = report.themes.iter().map(|row| {
        let tops = if row.top_labels.is_empty() { "-".to_string() } else { row.top_labels.join(", ") };
        vec![
            row.theme.label().to_string(),
            format_count(row.base_count),
            format_percent(row.base_share),
            format_count(row.tam_count),
            format_percent(row.tam_share),
            format_float(row.mean_trainees, 1),
            format_float(row.mean_trainees_per_trainer, 1),
            tops,
        ]
    });
    doc.heading(2, "Tableau 2 : Répartition par macro-thème").table(
        &[
            "Macro-thème",
            "OF total",
            "% base",
            "OF TAM",
            "% TAM",
            "Stag. moyen (TAM)",
            "Stag./formateur (TAM)",
            "Spés principales",
        ],
        rows,
    );

    let rows = report.breadth.iter().map(|row| {
        vec![
            row.specialties.to_string(),
            format_count(row.base_count),
            format_count(row.tam_count),
            format_percent(row.tam_share),
        ]
    });
    doc.heading(2, "Tableau 3 : Nombre de spécialités déclarées")
        .table(&["Spécialités", "OF total", "OF TAM", "% TAM"], rows);
    writer.write_markdown("specialites_analysis.md", &doc)?;

    let rows = report.top.iter().map(|row| {
        vec![
            row.code.clone().unwrap_or_default(),
            row.label.clone(),
            row.theme.label().to_string(),
            row.base_count.to_string(),
            format!("{:.2}", row.base_share),
            row.tam_count.to_string(),
            format!("{:.2}", row.tam_share),
        ]
    });
    writer.write_csv(
        "specialites_export.csv",
        &["code_nsf", "libelle", "macro_theme", "of_total", "pct_base", "of_tam", "pct_tam"],
        rows,
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reports::fixtures::{of, with_specialties};
    use crate::services::tam::TamFilter;

    #[test]
    fn test_top_and_themes() {
        let records = vec![
            with_specialties(of(5, 100.0, 11), &["Langues vivantes"]),
            with_specialties(of(4, 60.0, 11), &["Langues vivantes", "Droit"]),
            with_specialties(of(20, 500.0, 11), &["Informatique"]),
            with_specialties(of(6, 30.0, 11), &["Enseignement, formation", "Droit", "Marketing"]),
            of(5, 10.0, 11),
        ];
        let ctx = ReportContext::new(&records, TamFilter::default());
        let report = build(&ctx);

        assert_eq!(report.top[0].label, "Langues vivantes");
        assert_eq!(report.top[0].base_count, 2);
        assert_eq!(report.top[0].tam_count, 2);
        assert_eq!(report.top[0].theme, MacroTheme::Langues);

        let langues = report.themes.iter().find(|t| t.theme == MacroTheme::Langues).unwrap();
        assert_eq!(langues.mean_trainees, Some(80.0));
        assert_eq!(langues.mean_trainees_per_trainer, Some(17.5));
        assert_eq!(langues.top_labels, vec!["Langues vivantes".to_string()]);
        // sorted by TAM share, Langues holds 2 of 4 TAM records
        assert_eq!(report.themes[0].theme, MacroTheme::Langues);

        let tech = report.themes.iter().find(|t| t.theme == MacroTheme::TechDigital).unwrap();
        assert_eq!(tech.base_count, 1);
        assert_eq!(tech.tam_count, 0);

        assert_eq!(report.breadth[0].base_count, 1);
        assert_eq!(report.breadth[2].tam_count, 1);
        assert_eq!(report.breadth[3].tam_count, 1);
    }
}
