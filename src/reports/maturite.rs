use std::collections::BTreeMap;

use super::ReportContext;
use crate::error::AppResult;
use crate::models::OfRecord;
use crate::services::reference::department_name;
use crate::services::stats::{mean, percent, safe_ratio};
use crate::services::tam::TamFilter;
use crate::services::writer::{format_count, format_float, format_percent, MarkdownDoc, ReportWriter};

const DYNAMICS_YEARS: std::ops::RangeInclusive<i32> = 2023..=2025;
const TOP_DEPARTMENTS: usize = 30;
/// Regions certified below this rate are awareness targets.
const AWARENESS_RATE: f64 = 50.0;
const HIGH_POTENTIAL_INDEX: f64 = 1.2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Maturity {
    TresElevee,
    Elevee,
    Moyenne,
    Faible,
}

impl Maturity {
    pub fn from_rate(rate: f64) -> Self {
        if rate > 80.0 {
            Maturity::TresElevee
        } else if rate > 60.0 {
            Maturity::Elevee
        } else if rate >= 40.0 {
            Maturity::Moyenne
        } else {
            Maturity::Faible
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Maturity::TresElevee => "Très élevée",
            Maturity::Elevee => "Élevée",
            Maturity::Moyenne => "Moyenne",
            Maturity::Faible => "Faible",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RegionMaturity {
    pub name: &'static str,
    pub total: usize,
    pub certified: usize,
    pub rate: f64,
    pub mean_trainees: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupActivity {
    pub count: usize,
    pub mean_trainees: Option<f64>,
    pub active_share: f64,
    pub mean_headcount: Option<f64>,
}

impl GroupActivity {
    fn from_records(records: &[&OfRecord]) -> Self {
        let trainees: Vec<f64> = records.iter().filter_map(|r| r.trainees).collect();
        let headcounts: Vec<f64> = records.iter().filter_map(|r| r.headcount.map(f64::from)).collect();
        GroupActivity {
            count: records.len(),
            mean_trainees: mean(&trainees),
            active_share: percent(records.iter().filter(|r| r.has_trainees()).count(), records.len()),
            mean_headcount: mean(&headcounts),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DynamicsRow {
    pub year: i32,
    pub new_certified: usize,
    pub cumulative: usize,
    pub growth: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PotentialRow {
    pub name: &'static str,
    pub rate: f64,
    pub mean_trainees: Option<f64>,
    pub index: f64,
    pub high: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DepartmentMaturity {
    pub code: String,
    pub total: usize,
    pub rate: f64,
    pub maturity: Maturity,
}

#[derive(Debug, Clone)]
pub struct MaturiteReport {
    pub base_total: usize,
    pub base_certified: usize,
    pub target_total: usize,
    pub target_certified: usize,
    /// All sizes, ranked by certification rate.
    pub regions_all: Vec<RegionMaturity>,
    /// Headcount in range, ranked by certification rate.
    pub regions_target: Vec<RegionMaturity>,
    pub certified: GroupActivity,
    pub uncertified: GroupActivity,
    pub dynamics: Vec<DynamicsRow>,
    pub potential: Vec<PotentialRow>,
    pub departments: Vec<DepartmentMaturity>,
}

impl MaturiteReport {
    pub fn base_rate(&self) -> f64 {
        percent(self.base_certified, self.base_total)
    }

    pub fn target_rate(&self) -> f64 {
        percent(self.target_certified, self.target_total)
    }
}

/// Per-region certification, ordered by rate then region name.
pub fn region_maturity(records: &[&OfRecord], filter: &TamFilter) -> Vec<RegionMaturity> {
    let mut groups: BTreeMap<&'static str, Vec<&OfRecord>> = BTreeMap::new();
    for record in records {
        groups.entry(record.region_name()).or_default().push(*record);
    }
    let mut rows: Vec<RegionMaturity> = groups
        .into_iter()
        .map(|(name, members)| {
            let certified = members.iter().filter(|r| filter.is_certified(r)).count();
            let trainees: Vec<f64> = members.iter().filter_map(|r| r.trainees).collect();
            RegionMaturity {
                name,
                total: members.len(),
                certified,
                rate: percent(certified, members.len()),
                mean_trainees: mean(&trainees),
            }
        })
        .collect();
    rows.sort_by(|a, b| b.rate.total_cmp(&a.rate));
    rows
}

fn dynamics(certified: &[&OfRecord]) -> Vec<DynamicsRow> {
    let mut per_year: BTreeMap<i32, usize> = BTreeMap::new();
    for year in certified.iter().filter_map(|r| r.declaration_year) {
        if DYNAMICS_YEARS.contains(&year) {
            *per_year.entry(year).or_default() += 1;
        }
    }
    let mut cumulative = 0;
    per_year
        .into_iter()
        .map(|(year, new_certified)| {
            let previous = cumulative;
            cumulative += new_certified;
            DynamicsRow {
                year,
                new_certified,
                cumulative,
                growth: safe_ratio(new_certified as f64, previous as f64).map(|g| g * 100.0),
            }
        })
        .collect()
}

pub fn build(ctx: &ReportContext<'_>) -> MaturiteReport {
    let filter = &ctx.filter;
    let all: Vec<&OfRecord> = ctx.records.iter().collect();
    let target: Vec<&OfRecord> = all.iter().copied().filter(|r| filter.headcount_in_range(r)).collect();
    let (certified, uncertified): (Vec<&OfRecord>, Vec<&OfRecord>) =
        target.iter().copied().partition(|r| filter.is_certified(r));

    let regions_target = region_maturity(&target, filter);
    let national_trainees = mean(&target.iter().filter_map(|r| r.trainees).collect::<Vec<_>>());

    let mut potential: Vec<PotentialRow> = match national_trainees.filter(|n| *n > 0.0) {
        Some(national) => regions_target
            .iter()
            .filter(|r| r.rate < AWARENESS_RATE)
            .map(|r| {
                let regional = r.mean_trainees.unwrap_or(0.0);
                let index = (1.0 - r.rate / 100.0) * regional / national;
                PotentialRow {
                    name: r.name,
                    rate: r.rate,
                    mean_trainees: r.mean_trainees,
                    index,
                    high: regional > national && index >= HIGH_POTENTIAL_INDEX,
                }
            })
            .collect(),
        None => Vec::new(),
    };
    potential.sort_by(|a, b| b.index.total_cmp(&a.index));

    let mut by_department: BTreeMap<&str, (usize, usize)> = BTreeMap::new();
    for record in &target {
        if let Some(code) = record.department.as_deref() {
            let entry = by_department.entry(code).or_default();
            entry.0 += 1;
            if filter.is_certified(record) {
                entry.1 += 1;
            }
        }
    }
    let mut departments: Vec<DepartmentMaturity> = by_department
        .into_iter()
        .map(|(code, (total, certified))| {
            let rate = percent(certified, total);
            DepartmentMaturity { code: code.to_string(), total, rate, maturity: Maturity::from_rate(rate) }
        })
        .collect();
    departments.sort_by(|a, b| b.total.cmp(&a.total));
    departments.truncate(TOP_DEPARTMENTS);

    MaturiteReport {
        base_total: all.len(),
        base_certified: all.iter().filter(|r| filter.is_certified(r)).count(),
        target_total: target.len(),
        target_certified: certified.len(),
        regions_all: region_maturity(&all, filter),
        regions_target,
        certified: GroupActivity::from_records(&certified),
        uncertified: GroupActivity::from_records(&uncertified),
        dynamics: dynamics(&certified),
        potential,
        departments,
    }
}

fn relative_gap(value: Option<f64>, reference: Option<f64>) -> String {
    match (value, reference) {
        (Some(v), Some(r)) if r != 0.0 => format!("{:+.1}%", (v - r) / r * 100.0),
        _ => "-".to_string(),
    }
}

pub fn write(report: &MaturiteReport, writer: &mut ReportWriter) -> AppResult<()> {
    let target_rate = report.target_rate();
    let (c, u) = (&report.certified, &report.uncertified);

    let mut doc = MarkdownDoc::new("Maturité Qualiopi");
    doc.paragraph("National (toutes tailles) :")
        .bullet(format!("Taux certification : {}", format_percent(report.base_rate())))
        .bullet(format!(
            "{} OF certifiés / {}",
            format_count(report.base_certified),
            format_count(report.base_total)
        ))
        .blank()
        .paragraph("Cible 3-10 formateurs :")
        .bullet(format!("Taux certification : {}", format_percent(target_rate)))
        .bullet(format!(
            "{} OF certifiés / {}",
            format_count(report.target_certified),
            format_count(report.target_total)
        ))
        .blank()
        .paragraph("Top 3 régions matures :");
    for (i, r) in report.regions_target.iter().take(3).enumerate() {
        doc.bullet(format!(
            "{}. {} : {} (vs {} national)",
            i + 1,
            r.name,
            format_percent(r.rate),
            format_percent(target_rate)
        ));
    }
    doc.blank().paragraph("Régions à sensibiliser :");
    for p in report.potential.iter().take(3) {
        doc.bullet(format!(
            "{} : {} (potentiel {})",
            p.name,
            format_percent(p.rate),
            if p.high { "HAUTE" } else { "MOYENNE" }
        ));
    }
    let uncertified_target = report.target_total - report.target_certified;
    doc.blank()
        .paragraph("Impact certification :")
        .bullet(format!(
            "Certifiés : {} stagiaires en moyenne ({} vs non certifiés)",
            format_float(c.mean_trainees, 1),
            relative_gap(c.mean_trainees, u.mean_trainees)
        ))
        .bullet(format!(
            "Certifiés : {} actifs vs {} non certifiés",
            format_percent(c.active_share),
            format_percent(u.active_share)
        ))
        .blank()
        .paragraph("Opportunité :")
        .bullet(format!(
            "{} des 3-10 non certifiés = {} OF",
            format_percent(percent(uncertified_target, report.target_total)),
            format_count(uncertified_target)
        ))
        .blank();

    let mut rows: Vec<Vec<String>> = report
        .regions_all
        .iter()
        .enumerate()
        .map(|(i, r)| {
            vec![
                r.name.to_string(),
                format_count(r.total),
                format_count(r.certified),
                format_percent(r.rate),
                (i + 1).to_string(),
            ]
        })
        .collect();
    rows.push(vec![
        "FRANCE".to_string(),
        format_count(report.base_total),
        format_count(report.base_certified),
        format_percent(report.base_rate()),
        "-".to_string(),
    ]);
    doc.heading(2, "Tableau 1 : Certification régionale (toutes tailles)")
        .table(&["Région", "OF total", "OF certifiés", "Taux certif", "Rang"], rows);

    let mut rows: Vec<Vec<String>> = report
        .regions_target
        .iter()
        .map(|r| {
            vec![
                r.name.to_string(),
                format_count(r.total),
                format_count(r.certified),
                format_percent(r.rate),
                format!("{:+.1} pp", r.rate - target_rate),
            ]
        })
        .collect();
    rows.push(vec![
        "FRANCE".to_string(),
        format_count(report.target_total),
        format_count(report.target_certified),
        format_percent(target_rate),
        "-".to_string(),
    ]);
    doc.heading(2, "Tableau 2 : Certification cible 3-10")
        .table(&["Région", "OF 3-10", "OF certifiés", "Taux certif", "vs National"], rows);

    let rows = vec![
        vec!["Nombre OF".to_string(), format_count(c.count), format_count(u.count), "-".to_string()],
        vec![
            "Stagiaires moyens".to_string(),
            format_float(c.mean_trainees, 1),
            format_float(u.mean_trainees, 1),
            relative_gap(c.mean_trainees, u.mean_trainees),
        ],
        vec![
            "% d'OF actifs (>0 stag.)".to_string(),
            format_percent(c.active_share),
            format_percent(u.active_share),
            format!("{:+.1} pp", c.active_share - u.active_share),
        ],
        vec![
            "Effectif formateurs moyen".to_string(),
            format_float(c.mean_headcount, 2),
            format_float(u.mean_headcount, 2),
            relative_gap(c.mean_headcount, u.mean_headcount),
        ],
    ];
    doc.heading(2, "Tableau 3 : Impact certification sur activité")
        .table(&["Métrique", "Certifiés", "Non certifiés", "Écart"], rows);

    let rows: Vec<Vec<String>> = if report.dynamics.is_empty() {
        vec![vec!["2023-2025".to_string(), "0".to_string(), "0".to_string(), "-".to_string()]]
    } else {
        report
            .dynamics
            .iter()
            .map(|d| {
                vec![
                    d.year.to_string(),
                    format_count(d.new_certified),
                    format_count(d.cumulative),
                    d.growth.map_or_else(|| "-".to_string(), |g| format!("{:+.1}%", g)),
                ]
            })
            .collect()
    };
    doc.heading(2, "Tableau 4 : Dynamique certification 2023-2025")
        .table(&["Année", "Nouveaux certifiés", "Total certifiés", "Taux croissance"], rows);

    let rows: Vec<Vec<String>> = if report.potential.is_empty() {
        vec![vec!["Aucune région".to_string(), "-".into(), "-".into(), "-".into(), "-".into()]]
    } else {
        report
            .potential
            .iter()
            .map(|p| {
                vec![
                    p.name.to_string(),
                    format_percent(p.rate),
                    format_float(p.mean_trainees, 1),
                    format!("{:.2}", p.index),
                    if p.high { "HAUTE" } else { "MOYENNE" }.to_string(),
                ]
            })
            .collect()
    };
    doc.heading(2, "Tableau 5 : Régions opportunité sensibilisation").table(
        &["Région", "Taux certif", "Stag. moyen", "Index potentiel", "Opportunité"],
        rows,
    );

    let rows = report.departments.iter().map(|d| {
        vec![
            format!("{} {}", d.code, department_name(&d.code)),
            format_count(d.total),
            format_percent(d.rate),
            d.maturity.label().to_string(),
        ]
    });
    doc.heading(2, "Tableau 6 : Départements maturité Qualiopi")
        .table(&["Dept", "OF 3-10", "Taux certif", "Maturité"], rows);
    writer.write_markdown("maturite_qualiopi.md", &doc)?;

    let mut by_name: Vec<&RegionMaturity> = report.regions_target.iter().collect();
    by_name.sort_by_key(|r| r.name);
    let rows = by_name.into_iter().map(|r| {
        vec![
            r.name.to_string(),
            r.total.to_string(),
            r.certified.to_string(),
            format!("{:.4}", r.rate / 100.0),
            format!("{:.2}", r.mean_trainees.unwrap_or(0.0)),
        ]
    });
    writer.write_csv(
        "maturite_regions.csv",
        &["region", "total_of", "certified_of", "certification_rate", "avg_stagiaires"],
        rows,
    )?;
    Ok(())
}
