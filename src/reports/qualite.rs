use std::collections::BTreeMap;

use super::ReportContext;
use crate::error::AppResult;
use crate::models::OfRecord;
use crate::services::stats::{dominant, mean, percent};
use crate::services::writer::{
    format_count, format_float, format_opt_percent, format_percent, MarkdownDoc, ReportWriter,
};

const EXCELLENT_FIELD: f64 = 90.0;
const WEAK_FIELD: f64 = 60.0;
/// Gap in mean trainees above which missing postal codes are not random.
const BIAS_GAP: f64 = 10.0;

type Presence = fn(&OfRecord) -> bool;

fn label_in_slot(record: &OfRecord, slot: usize) -> bool {
    record.specialties.get(slot).map_or(false, |s| s.label.is_some())
}

fn tracked_fields() -> [(&'static str, Presence); 12] {
    [
        ("numeroDeclarationActivite", |r| r.numero.is_some()),
        ("denomination", |r| r.denomination.is_some()),
        ("effectifFormateurs", |r| r.headcount.is_some()),
        ("nbStagiaires", |r| r.trainees.is_some()),
        ("codeRegion", |r| r.region_code.is_some()),
        ("codePostal", |r| r.postal_code.is_some()),
        ("ville", |r| r.city.is_some()),
        ("voie", |r| r.street.is_some()),
        ("actionsDeFormation", |r| r.certification.is_some()),
        ("libelleSpecialite1", |r| label_in_slot(r, 0)),
        ("libelleSpecialite2", |r| label_in_slot(r, 1)),
        ("libelleSpecialite3", |r| label_in_slot(r, 2)),
    ]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Usability {
    Usable,
    Partial,
    Unusable,
}

impl Usability {
    pub fn from_share(share: f64) -> Self {
        if share > EXCELLENT_FIELD {
            Usability::Usable
        } else if share >= 50.0 {
            Usability::Partial
        } else {
            Usability::Unusable
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Usability::Usable => "✅ Oui",
            Usability::Partial => "⚠️ Partiel",
            Usability::Unusable => "❌ Non",
        }
    }
}

/// Regional data quality, driven by postal code completeness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataQuality {
    Excellente,
    Bonne,
    Moyenne,
    Faible,
}

impl DataQuality {
    pub fn from_postal_share(share: f64) -> Self {
        if share > 80.0 {
            DataQuality::Excellente
        } else if share >= 60.0 {
            DataQuality::Bonne
        } else if share >= 40.0 {
            DataQuality::Moyenne
        } else {
            DataQuality::Faible
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            DataQuality::Excellente => "Excellente",
            DataQuality::Bonne => "Bonne",
            DataQuality::Moyenne => "Moyenne",
            DataQuality::Faible => "Faible",
        }
    }
}

pub fn acquisition_strategy(postal_share: f64) -> &'static str {
    if postal_share > 70.0 {
        "Ads géo Facebook/LinkedIn"
    } else if postal_share >= 50.0 {
        "LinkedIn organique + Ads large"
    } else {
        "Contenu national uniquement"
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldRow {
    pub field: &'static str,
    pub filled: usize,
    pub share: f64,
    pub usability: Usability,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RegionQualityRow {
    pub name: &'static str,
    pub tam_count: usize,
    pub without_postal: usize,
    pub postal_share: f64,
    pub city_share: f64,
    pub street_share: f64,
    pub quality: DataQuality,
}

impl RegionQualityRow {
    fn from_records(name: &'static str, records: &[&OfRecord]) -> Self {
        let total = records.len();
        let with_postal = records.iter().filter(|r| r.postal_code.is_some()).count();
        let postal_share = percent(with_postal, total);
        RegionQualityRow {
            name,
            tam_count: total,
            without_postal: total - with_postal,
            postal_share,
            city_share: percent(records.iter().filter(|r| r.city.is_some()).count(), total),
            street_share: percent(records.iter().filter(|r| r.street.is_some()).count(), total),
            quality: DataQuality::from_postal_share(postal_share),
        }
    }
}

/// Profile of one side of the postal-code split.
#[derive(Debug, Clone, PartialEq)]
pub struct PostalGroup {
    pub count: usize,
    pub mean_headcount: Option<f64>,
    pub mean_trainees: Option<f64>,
    pub certified_share: Option<f64>,
    pub top_region: Option<&'static str>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpecialtyLevelRow {
    pub declared: usize,
    pub count: usize,
    pub share: f64,
    pub label: &'static str,
}

#[derive(Debug, Clone)]
pub struct QualiteReport {
    pub base_total: usize,
    pub fields: Vec<FieldRow>,
    pub regions: Vec<RegionQualityRow>,
    pub france: RegionQualityRow,
    pub with_postal: PostalGroup,
    pub without_postal: PostalGroup,
    pub specialty_levels: Vec<SpecialtyLevelRow>,
}

impl QualiteReport {
    fn field_share(&self, field: &str) -> f64 {
        self.fields.iter().find(|f| f.field == field).map_or(0.0, |f| f.share)
    }

    /// Missing postal codes skew activity when trainee means differ by more
    /// than `BIAS_GAP`.
    pub fn is_bias_systematic(&self) -> bool {
        let with = self.with_postal.mean_trainees.unwrap_or(0.0);
        let without = self.without_postal.mean_trainees.unwrap_or(0.0);
        (without - with).abs() > BIAS_GAP
    }
}

fn postal_group(ctx: &ReportContext<'_>, records: &[&OfRecord]) -> PostalGroup {
    let headcounts: Vec<f64> = records.iter().filter_map(|r| r.headcount.map(f64::from)).collect();
    let trainees: Vec<f64> = records.iter().filter_map(|r| r.trainees).collect();
    let certified = records.iter().filter(|r| ctx.filter.is_certified(r)).count();
    PostalGroup {
        count: records.len(),
        mean_headcount: mean(&headcounts),
        mean_trainees: mean(&trainees),
        certified_share: (!records.is_empty()).then(|| percent(certified, records.len())),
        top_region: dominant(
            records.iter().filter(|r| r.region_code.is_some()).map(|r| r.region_name()),
        )
        .map(|(name, _)| name),
    }
}

pub fn build(ctx: &ReportContext<'_>) -> QualiteReport {
    let base_total = ctx.records.len();

    let fields = tracked_fields()
        .into_iter()
        .map(|(field, present)| {
            let filled = ctx.records.iter().filter(|r| present(r)).count();
            let share = percent(filled, base_total);
            FieldRow { field, filled, share, usability: Usability::from_share(share) }
        })
        .collect();

    let mut by_region: BTreeMap<&'static str, Vec<&OfRecord>> = BTreeMap::new();
    for record in &ctx.tam {
        by_region.entry(record.region_name()).or_default().push(*record);
    }
    let regions = by_region
        .iter()
        .map(|(&name, records)| RegionQualityRow::from_records(name, records))
        .collect();
    let france = RegionQualityRow::from_records("France", &ctx.tam);

    let (with, without): (Vec<&OfRecord>, Vec<&OfRecord>) =
        ctx.records.iter().partition(|r| r.postal_code.is_some());

    let specialty_levels = [(0, "Aucune"), (1, "Minimale"), (2, "Bonne"), (3, "Complète")]
        .into_iter()
        .map(|(declared, label)| {
            let count = ctx.records.iter().filter(|r| r.specialty_count() == declared).count();
            SpecialtyLevelRow { declared, count, share: percent(count, base_total), label }
        })
        .collect();

    QualiteReport {
        base_total,
        fields,
        regions,
        france,
        with_postal: postal_group(ctx, &with),
        without_postal: postal_group(ctx, &without),
        specialty_levels,
    }
}

fn relative_gap(base: Option<f64>, other: Option<f64>) -> String {
    match (base, other) {
        (Some(b), Some(o)) if b != 0.0 => format!("{:+.1}%", (o - b) / b * 100.0),
        _ => "-".to_string(),
    }
}

fn point_gap(base: Option<f64>, other: Option<f64>) -> String {
    match (base, other) {
        (Some(b), Some(o)) => format!("{:+.1} pp", o - b),
        _ => "-".to_string(),
    }
}

pub fn write(report: &QualiteReport, writer: &mut ReportWriter) -> AppResult<()> {
    let mut doc = MarkdownDoc::new("Qualité des données");
    doc.paragraph(format!("Base analysée : {} OF", format_count(report.base_total)));

    let rows = report.fields.iter().map(|f| {
        vec![
            f.field.to_string(),
            format_count(f.filled),
            format_percent(f.share),
            f.usability.label().to_string(),
        ]
    });
    doc.heading(2, "Tableau 1 : Taux de complétude des champs")
        .table(&["Champ", "Valeurs renseignées", "% complétude", "Utilisable ?"], rows);

    let region_cells = |r: &RegionQualityRow| {
        vec![
            r.name.to_string(),
            format_count(r.tam_count),
            format_percent(r.postal_share),
            format_percent(r.city_share),
            format_percent(r.street_share),
            r.quality.label().to_string(),
        ]
    };
    let rows = report.regions.iter().chain(std::iter::once(&report.france)).map(region_cells);
    doc.heading(2, "Tableau 2 : Qualité des données régionales (TAM)").table(
        &["Région", "OF TAM", "% codePostal", "% ville", "% voie", "Qualité globale"],
        rows,
    );

    let mut feasibility: Vec<&RegionQualityRow> = report.regions.iter().collect();
    feasibility.sort_by(|a, b| b.postal_share.total_cmp(&a.postal_share));
    let rows = feasibility.iter().map(|r| {
        vec![
            r.name.to_string(),
            format_percent(r.postal_share),
            acquisition_strategy(r.postal_share).to_string(),
        ]
    });
    doc.heading(2, "Tableau 3 : Faisabilité du ciblage par région")
        .table(&["Région", "Complétude CP", "Stratégie acquisition"], rows);

    let (w, wo) = (&report.with_postal, &report.without_postal);
    let rows = vec![
        vec![
            "Nombre OF".to_string(),
            format_count(w.count),
            format_count(wo.count),
            "-".to_string(),
        ],
        vec![
            "Effectif moyen".to_string(),
            format_float(w.mean_headcount, 1),
            format_float(wo.mean_headcount, 1),
            relative_gap(w.mean_headcount, wo.mean_headcount),
        ],
        vec![
            "Stagiaires moyens".to_string(),
            format_float(w.mean_trainees, 1),
            format_float(wo.mean_trainees, 1),
            relative_gap(w.mean_trainees, wo.mean_trainees),
        ],
        vec![
            "Taux certif".to_string(),
            format_opt_percent(w.certified_share),
            format_opt_percent(wo.certified_share),
            point_gap(w.certified_share, wo.certified_share),
        ],
        vec![
            "Région dominante".to_string(),
            w.top_region.unwrap_or("-").to_string(),
            wo.top_region.unwrap_or("-").to_string(),
            "-".to_string(),
        ],
    ];
    doc.heading(2, "Tableau 4 : Profil des données manquantes")
        .table(&["Caractéristique", "OF avec CP", "OF sans CP", "Différence"], rows);

    let rows = report.specialty_levels.iter().map(|l| {
        vec![
            l.declared.to_string(),
            format_count(l.count),
            format_percent(l.share),
            l.label.to_string(),
        ]
    });
    doc.heading(2, "Tableau 5 : Niveau de spécialités renseignées")
        .table(&["Nb spés renseignées", "OF", "%", "Complétude"], rows);

    let missing = |field: &str| format!("{:.0}%", 100.0 - report.field_share(field));
    let rows = vec![
        vec![
            format!("{} CP manquants", missing("codePostal")),
            "Limite ads géo".to_string(),
            "Enrichissement externe (LinkedIn)".to_string(),
            "🔴 HAUTE".to_string(),
        ],
        vec![
            format!("{} Spé2 manquants", missing("libelleSpecialite2")),
            "Limite segmentation".to_string(),
            "Acceptable (Spé1 suffit)".to_string(),
            "🟢 BASSE".to_string(),
        ],
        vec![
            format!("{} Spé3 manquants", missing("libelleSpecialite3")),
            "Limite analyse".to_string(),
            "Acceptable".to_string(),
            "🟢 BASSE".to_string(),
        ],
    ];
    doc.heading(2, "Tableau 6 : Plan d'amélioration de la qualité")
        .table(&["Problème", "Impact", "Action recommandée", "Priorité"], rows);

    doc.heading(2, "Synthèse");
    doc.paragraph("Champs excellents (>90%) :");
    let excellent: Vec<&FieldRow> = report.fields.iter().filter(|f| f.share > EXCELLENT_FIELD).collect();
    if excellent.is_empty() {
        doc.bullet("Aucun");
    }
    for f in excellent {
        doc.bullet(f.field);
    }
    doc.blank().paragraph("Champs problématiques (<60%) :");
    let weak: Vec<&FieldRow> = report.fields.iter().filter(|f| f.share < WEAK_FIELD).collect();
    if weak.is_empty() {
        doc.bullet("Aucun");
    }
    for f in weak {
        doc.bullet(f.field);
    }

    let above = report.regions.iter().filter(|r| r.postal_share > 70.0).count();
    let middle = report
        .regions
        .iter()
        .filter(|r| (50.0..=70.0).contains(&r.postal_share))
        .count();
    let below = report.regions.iter().filter(|r| r.postal_share < 50.0).count();
    doc.blank()
        .paragraph("Impact ciblage :")
        .bullet(format!("Régions >70% CP : {} → Ads géo OK", above))
        .bullet(format!("Régions 50-70% CP : {} → LinkedIn organique / Ads large", middle))
        .bullet(format!("Régions <50% CP : {} → Contenu organique", below))
        .blank()
        .paragraph("Biais données manquantes :")
        .bullet(if report.is_bias_systematic() { "Systématique" } else { "Aléatoire" })
        .bullet(format!(
            "Impact : Stagiaires moyens sans CP {} vs {}",
            format_float(wo.mean_trainees, 1),
            format_float(w.mean_trainees, 1)
        ))
        .blank();
    writer.write_markdown("qualite_donnees.md", &doc)?;

    let rows = report.regions.iter().map(|r| {
        vec![
            r.name.to_string(),
            r.tam_count.to_string(),
            r.without_postal.to_string(),
            format!("{:.1}", 100.0 - r.postal_share),
        ]
    });
    writer.write_csv(
        "qualite_sans_cp.csv",
        &["region", "of_tam_total", "of_sans_cp", "pct_sans_cp"],
        rows,
    )?;
    Ok(())
}
