use std::collections::BTreeMap;

use super::scenarios::PRICE;
use super::ReportContext;
use crate::error::AppResult;
use crate::models::OfRecord;
use crate::services::classify::MacroTheme;
use crate::services::stats::{mean, percent, safe_ratio};
use crate::services::writer::{format_count, format_float, format_percent, MarkdownDoc, ReportWriter};

/// Trainees per year from which a qualified organisation is highly active.
pub const HIGH_ACTIVITY: f64 = 500.0;
const TOP_N: usize = 50;
const HOURS_PER_DELIVERABLE: f64 = 2.0;
const HOURLY_VALUE: f64 = 120.0;

const TRANCHES: [(&str, f64, Option<f64>); 4] = [
    ("500-1000", 500.0, Some(1000.0)),
    ("1000-2000", 1000.0, Some(2000.0)),
    ("2000-5000", 2000.0, Some(5000.0)),
    ("5000+", 5000.0, None),
];

fn trainees(record: &OfRecord) -> f64 {
    record.trainees.unwrap_or(0.0)
}

/// Deliverables per month: one per trainee, spread over the year.
pub fn monthly_deliverables(record: &OfRecord) -> f64 {
    trainees(record) / 12.0
}

/// Aggregate activity of a group of organisations.
#[derive(Debug, Clone, PartialEq)]
pub struct ActivityProfile {
    pub count: usize,
    pub mean_headcount: Option<f64>,
    pub mean_trainees: Option<f64>,
    /// Total trainees over total trainers.
    pub trainees_per_trainer: Option<f64>,
    pub mean_deliverables: Option<f64>,
}

impl ActivityProfile {
    pub fn from_records(records: &[&OfRecord]) -> Self {
        let headcounts: Vec<f64> = records.iter().map(|r| f64::from(r.headcount.unwrap_or(0))).collect();
        let volumes: Vec<f64> = records.iter().map(|r| trainees(r)).collect();
        let deliverables: Vec<f64> = records.iter().map(|r| monthly_deliverables(r)).collect();
        ActivityProfile {
            count: records.len(),
            mean_headcount: mean(&headcounts),
            mean_trainees: mean(&volumes),
            trainees_per_trainer: safe_ratio(volumes.iter().sum(), headcounts.iter().sum()),
            mean_deliverables: mean(&deliverables),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrancheRow {
    pub label: &'static str,
    pub tam_share: f64,
    pub profile: ActivityProfile,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RegionActivityRow {
    pub name: &'static str,
    pub high: usize,
    /// Highly active share of the region's qualified organisations.
    pub region_share: f64,
    /// Region's share of all highly active organisations.
    pub national_share: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Representation {
    Over,
    Aligned,
    Under,
}

impl Representation {
    pub fn compare(share: f64, reference: f64) -> Self {
        if (reference == 0.0 && share > 0.0) || share >= reference * 1.1 {
            Representation::Over
        } else if share <= reference * 0.9 {
            Representation::Under
        } else {
            Representation::Aligned
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Representation::Over => "Sur-représenté",
            Representation::Aligned => "Aligné",
            Representation::Under => "Sous-représenté",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ThemeActivityRow {
    pub theme: MacroTheme,
    pub high: usize,
    pub high_share: f64,
    pub tam_share: f64,
    pub status: Representation,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Roi {
    pub deliverables: f64,
    pub hours_saved: f64,
    pub value: f64,
    pub net: f64,
    pub multiplier: f64,
}

impl Roi {
    pub fn from_deliverables(deliverables: f64) -> Self {
        let hours_saved = deliverables * HOURS_PER_DELIVERABLE;
        let value = hours_saved * HOURLY_VALUE;
        Roi { deliverables, hours_saved, value, net: value - PRICE, multiplier: value / PRICE }
    }
}

#[derive(Debug, Clone)]
pub struct HauteActiviteReport<'a> {
    pub tam_total: usize,
    pub high: ActivityProfile,
    pub tam: ActivityProfile,
    pub tranches: Vec<TrancheRow>,
    pub regions: Vec<RegionActivityRow>,
    pub themes: Vec<ThemeActivityRow>,
    pub top: Vec<&'a OfRecord>,
    pub roi: Roi,
}

pub fn build<'a>(ctx: &ReportContext<'a>) -> HauteActiviteReport<'a> {
    let tam_total = ctx.tam.len();
    let high: Vec<&'a OfRecord> = ctx.tam.iter().copied().filter(|r| trainees(r) >= HIGH_ACTIVITY).collect();

    let tranches = TRANCHES
        .iter()
        .map(|&(label, lower, upper)| {
            let members: Vec<&OfRecord> = high
                .iter()
                .copied()
                .filter(|r| trainees(r) >= lower && upper.map_or(true, |u| trainees(r) < u))
                .collect();
            TrancheRow {
                label,
                tam_share: percent(members.len(), tam_total),
                profile: ActivityProfile::from_records(&members),
            }
        })
        .collect();

    let mut per_region: BTreeMap<&'static str, (usize, usize)> = BTreeMap::new();
    for record in ctx.tam.iter().filter(|r| r.region_code.is_some()) {
        let entry = per_region.entry(record.region_name()).or_default();
        entry.0 += 1;
        if trainees(record) >= HIGH_ACTIVITY {
            entry.1 += 1;
        }
    }
    let mut regions: Vec<RegionActivityRow> = per_region
        .into_iter()
        .filter(|(_, (_, high_count))| *high_count > 0)
        .map(|(name, (tam_count, high_count))| RegionActivityRow {
            name,
            high: high_count,
            region_share: percent(high_count, tam_count),
            national_share: percent(high_count, high.len()),
        })
        .collect();
    regions.sort_by(|a, b| b.high.cmp(&a.high));

    let mut themes: Vec<ThemeActivityRow> = MacroTheme::ALL
        .iter()
        .map(|&theme| {
            let high_count = high.iter().filter(|r| r.main_theme() == theme).count();
            let tam_count = ctx.tam.iter().filter(|r| r.main_theme() == theme).count();
            let high_share = percent(high_count, high.len());
            let tam_share = percent(tam_count, tam_total);
            ThemeActivityRow {
                theme,
                high: high_count,
                high_share,
                tam_share,
                status: Representation::compare(high_share, tam_share),
            }
        })
        .collect();
    themes.sort_by(|a, b| b.high_share.total_cmp(&a.high_share));

    let mut top = high.clone();
    top.sort_by(|a, b| trainees(b).total_cmp(&trainees(a)));
    top.truncate(TOP_N);

    let high_profile = ActivityProfile::from_records(&high);
    let roi = Roi::from_deliverables(high_profile.mean_deliverables.unwrap_or(0.0));

    HauteActiviteReport {
        tam_total,
        high: high_profile,
        tam: ActivityProfile::from_records(&ctx.tam),
        tranches,
        regions,
        themes,
        top,
        roi,
    }
}

fn profile_cells(label: &str, share: f64, p: &ActivityProfile) -> Vec<String> {
    vec![
        label.to_string(),
        format_count(p.count),
        format_percent(share),
        format_float(p.mean_headcount, 1),
        format_float(p.trainees_per_trainer, 1),
        format_float(p.mean_deliverables, 1),
    ]
}

fn gap(value: Option<f64>, reference: Option<f64>) -> String {
    match (value, reference) {
        (Some(v), Some(r)) if r != 0.0 => format!("{:+.1}%", (v / r - 1.0) * 100.0),
        _ => "-".to_string(),
    }
}

fn euros(value: f64) -> String {
    format!("{}€", format_float(Some(value), 0))
}

pub fn write(report: &HauteActiviteReport<'_>, writer: &mut ReportWriter) -> AppResult<()> {
    let high_share = percent(report.high.count, report.tam_total);
    let mut doc = MarkdownDoc::new("OF à haute activité (≥500 stagiaires)");

    let mut rows: Vec<Vec<String>> =
        report.tranches.iter().map(|t| profile_cells(t.label, t.tam_share, &t.profile)).collect();
    rows.push(profile_cells("TOTAL ≥500", high_share, &report.high));
    doc.heading(2, "Tableau 1 : Tranches haute activité").table(
        &["Tranche stag./an", "OF", "% TAM", "Effectif moy.", "Stag./form", "Prod est. (livr./mois)"],
        rows,
    );

    let (h, t) = (&report.high, &report.tam);
    let rows = vec![
        vec![
            "Nombre OF".to_string(),
            format_count(h.count),
            format_count(t.count),
            format_percent(high_share),
        ],
        vec!["Part du TAM".to_string(), format_percent(high_share), "100%".to_string(), "-".to_string()],
        vec![
            "Effectif moyen".to_string(),
            format_float(h.mean_headcount, 1),
            format_float(t.mean_headcount, 1),
            gap(h.mean_headcount, t.mean_headcount),
        ],
        vec![
            "Stagiaires moyen".to_string(),
            format_float(h.mean_trainees, 0),
            format_float(t.mean_trainees, 0),
            gap(h.mean_trainees, t.mean_trainees),
        ],
        vec![
            "Stagiaires / formateur".to_string(),
            format_float(h.trainees_per_trainer, 1),
            format_float(t.trainees_per_trainer, 1),
            gap(h.trainees_per_trainer, t.trainees_per_trainer),
        ],
        vec![
            "Prod est. (livr./mois)".to_string(),
            format_float(h.mean_deliverables, 1),
            format_float(t.mean_deliverables, 1),
            gap(h.mean_deliverables, t.mean_deliverables),
        ],
    ];
    doc.heading(2, "Tableau 2 : Profil type haute activité")
        .table(&["Métrique", "Haute activité (≥500)", "TAM général", "Écart"], rows);

    let mut rows: Vec<Vec<String>> = report
        .regions
        .iter()
        .map(|r| {
            vec![
                r.name.to_string(),
                format_count(r.high),
                format_percent(r.region_share),
                format_percent(r.national_share),
            ]
        })
        .collect();
    rows.push(vec!["TOTAL".to_string(), format_count(h.count), "-".to_string(), "100.0%".to_string()]);
    doc.heading(2, "Tableau 3 : Répartition géographique")
        .table(&["Région", "OF ≥500 stag.", "% région", "% haute_act national"], rows);

    let rows = report.themes.iter().map(|row| {
        vec![
            row.theme.label().to_string(),
            format_count(row.high),
            format_percent(row.high_share),
            format!("{:+.1} pp", row.high_share - row.tam_share),
            row.status.label().to_string(),
        ]
    });
    doc.heading(2, "Tableau 4 : Spécialités haute activité")
        .table(&["Macro-thème", "OF ≥500 stag.", "% macro", "vs TAM général", "Statut"], rows);

    let rows = report.top.iter().enumerate().map(|(i, r)| {
        vec![
            (i + 1).to_string(),
            r.denomination.clone().unwrap_or_else(|| "-".to_string()),
            r.department.clone().unwrap_or_else(|| "-".to_string()),
            r.headcount.map_or_else(|| "-".to_string(), |h| h.to_string()),
            format_float(r.trainees, 0),
            format_float(r.headcount.and_then(|h| safe_ratio(trainees(r), f64::from(h))), 1),
            r.main_specialty().unwrap_or("-").to_string(),
            format_float(Some(monthly_deliverables(r)), 1),
        ]
    });
    doc.heading(2, "Tableau 5 : Top 50 OF ultra-actifs").table(
        &["Rang", "Dénomination", "Dept", "Effectif", "Stagiaires", "Stag./form", "Spécialité", "Prod est. (livr./mois)"],
        rows,
    );

    let roi = &report.roi;
    let rows = vec![
        vec!["Prod est. moyenne (livr./mois)".to_string(), format_float(Some(roi.deliverables), 1)],
        vec!["Temps gagné estimé (2h/livrable)".to_string(), format_float(Some(roi.hours_saved), 1)],
        vec!["Valeur temps (120€/h)".to_string(), euros(roi.value)],
        vec!["Coût abonnement".to_string(), euros(PRICE)],
        vec!["ROI net".to_string(), euros(roi.net)],
        vec!["~ROI".to_string(), format!("×{:.1}", roi.multiplier)],
    ];
    doc.heading(2, "Tableau 6 : ROI haute activité").table(&["Métrique", "Valeur"], rows);
    writer.write_markdown("haute_activite.md", &doc)?;

    let rows = report.top.iter().enumerate().map(|(i, r)| {
        let ratio = r.headcount.and_then(|h| safe_ratio(trainees(r), f64::from(h)));
        vec![
            (i + 1).to_string(),
            r.denomination.clone().unwrap_or_default(),
            r.postal_code.clone().unwrap_or_default(),
            r.city.clone().unwrap_or_default(),
            r.street.clone().unwrap_or_default(),
            r.region_name().to_string(),
            r.department.clone().unwrap_or_default(),
            r.headcount.map(|h| h.to_string()).unwrap_or_default(),
            format!("{:.0}", trainees(r)),
            ratio.map(|v| format!("{:.1}", v)).unwrap_or_default(),
            r.main_specialty().unwrap_or_default().to_string(),
            format!("{:.1}", monthly_deliverables(r)),
        ]
    });
    writer.write_csv(
        "haute_activite_top50.csv",
        &[
            "rang",
            "denomination",
            "code_postal",
            "ville",
            "adresse",
            "region",
            "dept",
            "effectif",
            "nb_stagiaires",
            "stagiaires_par_formateur",
            "specialite",
            "production_estimee_livrables_par_mois",
        ],
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
    fn test_tranches_and_profile() {
        let records = vec![
            of(5, 600.0, 11),
            of(5, 1500.0, 11),
            of(10, 6000.0, 84),
            of(4, 100.0, 84),
            of(20, 9000.0, 84),
        ];
        let ctx = ReportContext::new(&records, TamFilter::default());
        let report = build(&ctx);

        assert_eq!(report.tam_total, 4);
        assert_eq!(report.high.count, 3);
        let counts: Vec<usize> = report.tranches.iter().map(|t| t.profile.count).collect();
        assert_eq!(counts, vec![1, 1, 0, 1]);
        assert_eq!(report.tranches[3].tam_share, 25.0);
        assert_eq!(report.tranches[2].profile.mean_headcount, None);
        // 8100 trainees over 20 trainers
        assert_eq!(report.high.trainees_per_trainer, Some(405.0));
        assert_eq!(report.top[0].trainees, Some(6000.0));
        assert_eq!(report.top.len(), 3);
    }

    #[test]
    fn test_regions_and_themes() {
        let records = vec![
            with_specialties(of(5, 800.0, 11), &["Langues vivantes"]),
            with_specialties(of(5, 50.0, 11), &["Langues vivantes"]),
            with_specialties(of(5, 900.0, 84), &["Informatique"]),
            with_specialties(of(5, 40.0, 84), &["Droit"]),
            with_specialties(of(5, 30.0, 84), &["Droit"]),
        ];
        let ctx = ReportContext::new(&records, TamFilter::default());
        let report = build(&ctx);

        assert_eq!(report.regions.len(), 2);
        let ara = report.regions.iter().find(|r| r.name == "Auvergne-Rhône-Alpes").unwrap();
        assert!((ara.region_share - 100.0 / 3.0).abs() < 1e-9);
        assert_eq!(ara.national_share, 50.0);

        let droit = report.themes.iter().find(|t| t.theme == MacroTheme::Juridique).unwrap();
        assert_eq!(droit.high, 0);
        assert_eq!(droit.status, Representation::Under);
        let tech = report.themes.iter().find(|t| t.theme == MacroTheme::TechDigital).unwrap();
        assert_eq!(tech.status, Representation::Over);
        assert_eq!(Representation::compare(20.0, 20.5), Representation::Aligned);
    }

    #[test]
    fn test_roi() {
        let roi = Roi::from_deliverables(100.0);
        assert_eq!(roi.hours_saved, 200.0);
        assert_eq!(roi.value, 24_000.0);
        assert_eq!(roi.net, 24_000.0 - PRICE);
        assert!((roi.multiplier - 24_000.0 / 299.0).abs() < 1e-9);
    }
}
