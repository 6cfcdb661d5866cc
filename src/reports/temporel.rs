use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate};

use super::ReportContext;
use crate::error::AppResult;
use crate::models::OfRecord;
use crate::services::reference::{region_name, REGION_ORDER};
use crate::services::stats::{mean, percent};
use crate::services::writer::{format_count, format_float, format_percent, MarkdownDoc, ReportWriter};

/// Declarations up to this year are pooled into one bucket.
const LEGACY_UNTIL: i32 = 2022;
const AVERAGE_MONTH_DAYS: f64 = 30.4375;
const GROWTH_YEARS: [i32; 3] = [2023, 2024, 2025];

const MONTHS: [&str; 12] = [
    "Janvier", "Février", "Mars", "Avril", "Mai", "Juin", "Juillet", "Août", "Septembre", "Octobre",
    "Novembre", "Décembre",
];

#[derive(Debug, Clone, PartialEq)]
pub struct YearRow {
    pub label: String,
    pub count: usize,
    pub share: f64,
    pub tam_count: usize,
    /// Relative change against the previous row, in percent.
    pub growth: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MonthRow {
    pub month: u32,
    pub count: usize,
    pub share: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DurationRow {
    pub label: &'static str,
    pub count: usize,
    pub share: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RegionGrowthRow {
    pub name: &'static str,
    pub counts: [usize; 3],
}

impl RegionGrowthRow {
    pub fn growth_label(&self) -> String {
        let (base, latest) = (self.counts[0], self.counts[2]);
        if base > 0 {
            format!("{:+.1}%", (latest as f64 - base as f64) / base as f64 * 100.0)
        } else if latest > 0 {
            "+∞".to_string()
        } else {
            "0.0%".to_string()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CohortRow {
    pub label: &'static str,
    pub count: usize,
    pub mean_trainees: Option<f64>,
    pub mean_headcount: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct TemporelReport {
    pub years: Vec<YearRow>,
    pub dated: usize,
    pub undated: usize,
    pub months: Vec<MonthRow>,
    pub durations: Vec<DurationRow>,
    pub regions: Vec<RegionGrowthRow>,
    pub cohorts: Vec<CohortRow>,
}

/// Exercise length in whole months; `None` when either bound is missing or
/// the exercise ends before it starts.
pub fn exercise_months(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Option<i64> {
    let days = (end? - start?).num_days();
    if days < 0 {
        return None;
    }
    Some((days as f64 / AVERAGE_MONTH_DAYS).round() as i64)
}

fn duration_label(months: i64) -> &'static str {
    match months {
        12 => "12 mois (Standard)",
        18 => "18 mois (1.5 an)",
        24 => "24 mois (Bi-annuel)",
        _ => "Autre (Non standard)",
    }
}

fn month_interpretation(month: u32) -> &'static str {
    match month {
        1 => "Calendaire",
        4 => "Fiscal",
        7 => "Rentrée estivale",
        10 => "Clôture automnale",
        _ => "",
    }
}

fn year_rows(records: &[OfRecord], tam: &[&OfRecord]) -> (Vec<YearRow>, usize) {
    let bucket = |year: i32| year.max(LEGACY_UNTIL);
    let mut counts: BTreeMap<i32, (usize, usize)> = BTreeMap::new();
    for year in records.iter().filter_map(|r| r.declaration_year) {
        counts.entry(bucket(year)).or_default().0 += 1;
    }
    for year in tam.iter().filter_map(|r| r.declaration_year) {
        counts.entry(bucket(year)).or_default().1 += 1;
    }
    let dated: usize = counts.values().map(|c| c.0).sum();

    let mut previous: Option<usize> = None;
    let rows = counts
        .into_iter()
        .map(|(year, (count, tam_count))| {
            let growth = previous
                .filter(|p| *p > 0)
                .map(|p| (count as f64 - p as f64) / p as f64 * 100.0);
            previous = Some(count);
            YearRow {
                label: if year == LEGACY_UNTIL { format!("≤{}", LEGACY_UNTIL) } else { year.to_string() },
                count,
                share: percent(count, dated),
                tam_count,
                growth,
            }
        })
        .collect();
    (rows, dated)
}

pub fn build(ctx: &ReportContext<'_>) -> TemporelReport {
    let (years, dated) = year_rows(ctx.records, &ctx.tam);

    let starts: Vec<u32> = ctx.tam.iter().filter_map(|r| r.exercise_start.map(|d| d.month())).collect();
    let months = (1..=12)
        .map(|month| {
            let count = starts.iter().filter(|m| **m == month).count();
            MonthRow { month, count, share: percent(count, starts.len()) }
        })
        .collect();

    let lengths: Vec<i64> = ctx
        .tam
        .iter()
        .filter_map(|r| exercise_months(r.exercise_start, r.exercise_end))
        .collect();
    let durations = [12, 18, 24, 0]
        .into_iter()
        .map(|bucket| {
            let label = duration_label(bucket);
            let count = lengths.iter().filter(|m| duration_label(**m) == label).count();
            DurationRow { label, count, share: percent(count, lengths.len()) }
        })
        .collect();

    let mut by_region: BTreeMap<&'static str, [usize; 3]> = BTreeMap::new();
    for record in &ctx.tam {
        let Some(slot) = record.declaration_year.and_then(|y| GROWTH_YEARS.iter().position(|g| *g == y)) else {
            continue;
        };
        by_region.entry(record.region_name()).or_default()[slot] += 1;
    }
    let mut regions = Vec::new();
    for code in REGION_ORDER {
        let name = region_name(Some(code));
        if let Some(counts) = by_region.remove(name) {
            regions.push(RegionGrowthRow { name, counts });
        }
    }
    regions.extend(by_region.into_iter().map(|(name, counts)| RegionGrowthRow { name, counts }));

    let cohort = |label: &'static str, keep: fn(i32) -> bool| {
        let members: Vec<&OfRecord> = ctx
            .tam
            .iter()
            .copied()
            .filter(|r| r.declaration_year.map_or(false, keep))
            .collect();
        CohortRow {
            label,
            count: members.len(),
            mean_trainees: mean(&members.iter().filter_map(|r| r.trainees).collect::<Vec<_>>()),
            mean_headcount: mean(&members.iter().filter_map(|r| r.headcount.map(f64::from)).collect::<Vec<_>>()),
        }
    };
    let cohorts = vec![
        cohort("Nouveau (2025)", |y| y == 2025),
        cohort("Récent (2024)", |y| y == 2024),
        cohort("Ancien (≤2023)", |y| y <= 2023),
    ];

    TemporelReport {
        years,
        dated,
        undated: ctx.records.len() - dated,
        months,
        durations,
        regions,
        cohorts,
    }
}

fn growth_text(growth: Option<f64>) -> String {
    growth.map_or_else(|| "--".to_string(), |g| format!("{:+.1}%", g))
}

pub fn write(report: &TemporelReport, writer: &mut ReportWriter) -> AppResult<()> {
    let mut doc = MarkdownDoc::new("Évolution temporelle des déclarations");
    doc.bullet(format!("OF avec année de dernière déclaration : {}", format_count(report.dated)))
        .bullet(format!("OF sans date exploitable : {}", format_count(report.undated)))
        .blank();

    let mut rows: Vec<Vec<String>> = report
        .years
        .iter()
        .map(|y| {
            vec![
                y.label.clone(),
                format_count(y.count),
                format_percent(y.share),
                format_count(y.tam_count),
                growth_text(y.growth),
            ]
        })
        .collect();
    rows.push(vec![
        "TOTAL".to_string(),
        format_count(report.dated),
        "100.0%".to_string(),
        format_count(report.years.iter().map(|y| y.tam_count).sum()),
        "--".to_string(),
    ]);
    doc.heading(2, "Tableau 1 : Déclarations par année")
        .table(&["Année", "OF", "% total", "OF TAM", "Croissance"], rows);

    let rows = report.months.iter().map(|m| {
        vec![
            MONTHS[(m.month - 1) as usize].to_string(),
            format_count(m.count),
            format_percent(m.share),
            month_interpretation(m.month).to_string(),
        ]
    });
    doc.heading(2, "Tableau 2 : Mois de début d'exercice (TAM)")
        .table(&["Mois", "OF TAM", "%", "Lecture"], rows);

    let rows = report.durations.iter().map(|d| {
        vec![d.label.to_string(), format_count(d.count), format_percent(d.share)]
    });
    doc.heading(2, "Tableau 3 : Durée d'exercice (TAM)")
        .table(&["Durée", "OF TAM", "%"], rows);

    let mut rows: Vec<Vec<String>> = report
        .regions
        .iter()
        .map(|r| {
            vec![
                r.name.to_string(),
                format_count(r.counts[0]),
                format_count(r.counts[1]),
                format_count(r.counts[2]),
                r.growth_label(),
            ]
        })
        .collect();
    let total = |i: usize| format_count(report.regions.iter().map(|r| r.counts[i]).sum());
    rows.push(vec!["TOTAL".to_string(), total(0), total(1), total(2), String::new()]);
    doc.heading(2, "Tableau 4 : TAM par région et année de déclaration")
        .table(&["Région", "2023", "2024", "2025", "Croissance 2023-2025"], rows);

    let rows = report.cohorts.iter().map(|c| {
        vec![
            c.label.to_string(),
            format_count(c.count),
            format_float(c.mean_trainees, 1),
            format_float(c.mean_headcount, 1),
        ]
    });
    doc.heading(2, "Tableau 5 : Cohortes TAM")
        .table(&["Segment", "OF TAM", "Stagiaires moyens", "Effectif moyen"], rows);
    writer.write_markdown("evolution_temporelle.md", &doc)?;

    let rows = report.years.iter().map(|y| {
        vec![
            y.label.clone(),
            y.count.to_string(),
            format!("{:.2}", y.share),
            y.tam_count.to_string(),
            y.growth.map(|g| format!("{:.2}", g)).unwrap_or_default(),
        ]
    });
    writer.write_csv(
        "evolution_annees.csv",
        &["annee", "of_total", "pct_total", "of_tam", "croissance_pct"],
        rows,
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reports::fixtures::of;
    use crate::services::tam::TamFilter;

    fn dated(year: i32, headcount: u32, region: u32) -> OfRecord {
        let mut record = of(headcount, 40.0, region);
        record.declaration_year = Some(year);
        record
    }

    #[test]
    fn test_exercise_months() {
        let d = |y, m, day| NaiveDate::from_ymd_opt(y, m, day);
        assert_eq!(exercise_months(d(2024, 1, 1), d(2024, 12, 31)), Some(12));
        assert_eq!(exercise_months(d(2023, 7, 1), d(2024, 12, 31)), Some(18));
        assert_eq!(exercise_months(d(2024, 12, 31), d(2024, 1, 1)), None);
        assert_eq!(exercise_months(None, d(2024, 1, 1)), None);
    }

    #[test]
    fn test_years_pool_legacy_and_compute_growth() {
        let records = vec![
            dated(2018, 5, 11),
            dated(2021, 50, 11),
            dated(2023, 5, 11),
            dated(2024, 5, 11),
            dated(2024, 5, 84),
            dated(2024, 50, 11),
            dated(2025, 5, 84),
            of(5, 10.0, 11),
        ];
        let ctx = ReportContext::new(&records, TamFilter::default());
        let report = build(&ctx);

        assert_eq!(report.dated, 7);
        assert_eq!(report.undated, 1);
        let labels: Vec<&str> = report.years.iter().map(|y| y.label.as_str()).collect();
        assert_eq!(labels, vec!["≤2022", "2023", "2024", "2025"]);
        assert_eq!(report.years[0].count, 2);
        assert_eq!(report.years[0].tam_count, 1);
        assert_eq!(report.years[0].growth, None);
        assert_eq!(report.years[1].growth, Some(-50.0));
        assert_eq!(report.years[2].growth, Some(200.0));
        assert_eq!(report.years[2].tam_count, 2);

        let idf = &report.regions[0];
        assert_eq!(idf.name, "Île-de-France");
        assert_eq!(idf.counts, [1, 1, 0]);
        assert_eq!(idf.growth_label(), "-100.0%");
        let ara = &report.regions[1];
        assert_eq!(ara.counts, [0, 1, 1]);
        assert_eq!(ara.growth_label(), "+∞");

        assert_eq!(report.cohorts[2].count, 2);
    }

    #[test]
    fn test_start_months_and_durations() {
        let mut a = of(5, 10.0, 11);
        a.exercise_start = NaiveDate::from_ymd_opt(2024, 1, 1);
        a.exercise_end = NaiveDate::from_ymd_opt(2024, 12, 31);
        let mut b = of(5, 10.0, 11);
        b.exercise_start = NaiveDate::from_ymd_opt(2024, 7, 1);
        b.exercise_end = NaiveDate::from_ymd_opt(2024, 9, 30);
        let records = vec![a, b];
        let ctx = ReportContext::new(&records, TamFilter::default());
        let report = build(&ctx);

        assert_eq!(report.months[0].count, 1);
        assert_eq!(report.months[6].count, 1);
        assert_eq!(report.months[0].share, 50.0);
        assert_eq!(report.durations[0].count, 1);
        assert_eq!(report.durations[3].count, 1);
    }
}
