use super::ReportContext;
use crate::error::AppResult;
use crate::models::OfRecord;
use crate::services::reference::{region_name, REGION_ORDER, UNKNOWN_REGION};
use crate::services::stats::{dominant, mean, percent};
use crate::services::writer::{format_count, format_float, format_opt_percent, format_percent, MarkdownDoc, ReportWriter};

const OCCASIONAL_KEYWORDS: [&str; 6] = ["CONDUITE", "TRANSPORT", "SECUR", "PREVENT", "EVENEMENT", "SPECTACLE"];
const UNLABELLED: &str = "Non renseigné";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DormantProfile {
    ReconversionRecente,
    CessationActivite,
    SousDeclaration,
    ActivitePonctuelle,
}

impl DormantProfile {
    pub const ALL: [DormantProfile; 4] = [
        DormantProfile::ReconversionRecente,
        DormantProfile::CessationActivite,
        DormantProfile::SousDeclaration,
        DormantProfile::ActivitePonctuelle,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            DormantProfile::ReconversionRecente => "Reconversion récente",
            DormantProfile::CessationActivite => "Cessation activité",
            DormantProfile::SousDeclaration => "Sous-déclaration",
            DormantProfile::ActivitePonctuelle => "Activité ponctuelle",
        }
    }

    pub fn hypothesis(&self) -> &'static str {
        match self {
            DormantProfile::ReconversionRecente => "Pas encore clients",
            DormantProfile::CessationActivite => "Certif maintenue",
            DormantProfile::SousDeclaration => "Erreur données",
            DormantProfile::ActivitePonctuelle => "Pas d'exercice déclaré",
        }
    }
}

/// First matching rule wins: old declaration, several specialties,
/// occasional-activity specialty or peripheral region, recent declaration.
pub fn classify_dormant(record: &OfRecord) -> DormantProfile {
    let year = record.declaration_year;
    if year.map_or(false, |y| y <= 2022) {
        return DormantProfile::CessationActivite;
    }
    if record.specialty_count() >= 2 {
        return DormantProfile::SousDeclaration;
    }
    let specialty = record.main_specialty().unwrap_or_default().to_uppercase();
    let region = record.region_name();
    if OCCASIONAL_KEYWORDS.iter().any(|k| specialty.contains(k)) || region == UNKNOWN_REGION || region == "Corse" {
        return DormantProfile::ActivitePonctuelle;
    }
    if year.map_or(false, |y| y >= 2024) {
        return DormantProfile::ReconversionRecente;
    }
    DormantProfile::ActivitePonctuelle
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupProfile {
    pub count: usize,
    pub share: f64,
    pub mean_headcount: Option<f64>,
    pub top_region: Option<(&'static str, f64)>,
    pub top_specialty: Option<(String, f64)>,
}

impl GroupProfile {
    fn new(records: &[&OfRecord], certified: usize) -> Self {
        let headcounts: Vec<f64> = records.iter().filter_map(|r| r.headcount.map(f64::from)).collect();
        GroupProfile {
            count: records.len(),
            share: percent(records.len(), certified),
            mean_headcount: mean(&headcounts),
            top_region: dominant(records.iter().map(|r| r.region_name())),
            top_specialty: dominant(records.iter().map(|r| r.main_specialty().unwrap_or(UNLABELLED)))
                .map(|(name, share)| (name.to_string(), share)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProfileRow {
    pub profile: DormantProfile,
    pub count: usize,
    pub share: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RegionRow {
    pub name: &'static str,
    pub dormants: usize,
    pub regional_share: f64,
    pub national_share: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetingCounts {
    pub recent: usize,
    pub older: usize,
    pub multi_specialty: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubcontractRow {
    pub label: &'static str,
    pub count: usize,
    pub share: f64,
    pub mean_subcontracted: Option<f64>,
    pub mean_trainees: Option<f64>,
    pub mean_ratio: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct DormantsReport<'a> {
    pub certified: usize,
    pub dormant_profile: GroupProfile,
    pub active_profile: GroupProfile,
    pub dormants: Vec<(&'a OfRecord, DormantProfile)>,
    pub profiles: Vec<ProfileRow>,
    pub regions: Vec<RegionRow>,
    pub targeting: TargetingCounts,
    pub subcontracting: Vec<SubcontractRow>,
    pub top_subcontractors: Vec<&'a OfRecord>,
}

fn subcontract_ratio(record: &OfRecord) -> Option<f64> {
    match (record.subcontracted_trainees, record.trainees) {
        (Some(s), Some(t)) if t > 0.0 => Some(s / t),
        _ => None,
    }
}

fn subcontract_row(label: &'static str, members: &[&OfRecord], total: usize) -> SubcontractRow {
    SubcontractRow {
        label,
        count: members.len(),
        share: percent(members.len(), total),
        mean_subcontracted: mean(&members.iter().filter_map(|r| r.subcontracted_trainees).collect::<Vec<_>>()),
        mean_trainees: mean(&members.iter().filter_map(|r| r.trainees).collect::<Vec<_>>()),
        mean_ratio: mean(&members.iter().filter_map(|r| subcontract_ratio(r)).collect::<Vec<_>>()),
    }
}

pub fn build<'a>(ctx: &ReportContext<'a>) -> DormantsReport<'a> {
    let certified: Vec<&OfRecord> = ctx
        .records
        .iter()
        .filter(|r| ctx.filter.headcount_in_range(r) && ctx.filter.is_certified(r))
        .collect();
    let (active, dormant): (Vec<&OfRecord>, Vec<&OfRecord>) =
        certified.iter().copied().partition(|r| r.has_trainees());

    let dormants: Vec<(&OfRecord, DormantProfile)> =
        dormant.iter().map(|&r| (r, classify_dormant(r))).collect();
    let profiles = DormantProfile::ALL
        .iter()
        .map(|&profile| {
            let count = dormants.iter().filter(|(_, p)| *p == profile).count();
            ProfileRow { profile, count, share: percent(count, dormant.len()) }
        })
        .collect();

    let mut names: Vec<&'static str> = REGION_ORDER.iter().map(|&c| region_name(Some(c))).collect();
    let mut extra: Vec<&'static str> = certified
        .iter()
        .map(|r| r.region_name())
        .filter(|n| !names.contains(n))
        .collect();
    extra.sort_unstable();
    extra.dedup();
    names.extend(extra);
    let regions = names
        .into_iter()
        .map(|name| {
            let in_region = certified.iter().filter(|r| r.region_name() == name).count();
            let dormants = dormant.iter().filter(|r| r.region_name() == name).count();
            RegionRow {
                name,
                dormants,
                regional_share: percent(dormants, in_region),
                national_share: percent(dormants, dormant.len()),
            }
        })
        .collect();

    let recent = dormant.iter().filter(|r| r.declaration_year.map_or(false, |y| y >= 2024)).count();
    let targeting = TargetingCounts {
        recent,
        older: dormant.len() - recent,
        multi_specialty: dormant.iter().filter(|r| r.specialty_count() >= 2).count(),
    };

    let subcontractors: Vec<&OfRecord> = certified
        .iter()
        .copied()
        .filter(|r| r.subcontracted_trainees.map_or(false, |s| s > 0.0))
        .collect();
    let mut subcontracting: Vec<SubcontractRow> = [("1-50", 1.0, Some(50.0)), ("51-200", 51.0, Some(200.0)), ("201+", 201.0, None)]
        .into_iter()
        .map(|(label, lower, upper): (&'static str, f64, Option<f64>)| {
            let members: Vec<&OfRecord> = subcontractors
                .iter()
                .copied()
                .filter(|r| {
                    let value = r.subcontracted_trainees.unwrap_or(0.0);
                    value >= lower && upper.map_or(true, |u| value <= u)
                })
                .collect();
            subcontract_row(label, &members, subcontractors.len())
        })
        .collect();
    subcontracting.push(subcontract_row("TOTAL", &subcontractors, subcontractors.len()));

    let mut top_subcontractors = subcontractors.clone();
    top_subcontractors.sort_by(|a, b| {
        b.subcontracted_trainees
            .unwrap_or(0.0)
            .total_cmp(&a.subcontracted_trainees.unwrap_or(0.0))
    });
    top_subcontractors.truncate(20);

    DormantsReport {
        certified: certified.len(),
        dormant_profile: GroupProfile::new(&dormant, certified.len()),
        active_profile: GroupProfile::new(&active, certified.len()),
        dormants,
        profiles,
        regions,
        targeting,
        subcontracting,
        top_subcontractors,
    }
}

fn dominant_cell<T: AsRef<str>>(value: &Option<(T, f64)>) -> String {
    match value {
        Some((name, share)) => format!("{} ({:.1}%)", name.as_ref(), share),
        None => "-".to_string(),
    }
}

fn dominant_gap<T: AsRef<str>>(a: &Option<(T, f64)>, b: &Option<(T, f64)>) -> String {
    match (a, b) {
        (Some((x, sx)), Some((y, sy))) if x.as_ref() == y.as_ref() => format!("{:+.1} pts", sx - sy),
        _ => "Différent".to_string(),
    }
}

pub fn write(report: &DormantsReport<'_>, writer: &mut ReportWriter) -> AppResult<()> {
    let d = &report.dormant_profile;
    let a = &report.active_profile;
    let mut doc = MarkdownDoc::new("Analyse dormants et sous-traitance (effectif 3-10)");
    doc.bullet(format!("OF certifiés dans la tranche : {}", format_count(report.certified)))
        .blank();

    let gap_headcount = d.mean_headcount.zip(a.mean_headcount).map(|(x, y)| x - y);
    let rows = vec![
        vec![
            "Nombre OF".to_string(),
            format_count(d.count),
            format_count(a.count),
            format_float(Some(d.count as f64 - a.count as f64), 0),
        ],
        vec![
            "% de certifiés".to_string(),
            format_percent(d.share),
            format_percent(a.share),
            format_percent(d.share - a.share),
        ],
        vec![
            "Effectif moyen".to_string(),
            format_float(d.mean_headcount, 1),
            format_float(a.mean_headcount, 1),
            format_float(gap_headcount, 1),
        ],
        vec![
            "Région dominante".to_string(),
            dominant_cell(&d.top_region),
            dominant_cell(&a.top_region),
            dominant_gap(&d.top_region, &a.top_region),
        ],
        vec![
            "Spé dominante".to_string(),
            dominant_cell(&d.top_specialty),
            dominant_cell(&a.top_specialty),
            dominant_gap(&d.top_specialty, &a.top_specialty),
        ],
    ];
    doc.heading(3, "Tableau 1 : Profil OF dormants")
        .table(&["Caractéristique", "OF dormants", "TAM actifs", "Écart"], rows);

    let rows = report.profiles.iter().map(|p| {
        vec![
            p.profile.label().to_string(),
            format_count(p.count),
            format_percent(p.share),
            p.profile.hypothesis().to_string(),
        ]
    });
    doc.heading(3, "Tableau 2 : Répartition dormants par profil")
        .table(&["Profil hypothétique", "OF estimés", "% dormants", "Hypothèse"], rows);

    let mut rows: Vec<Vec<String>> = report
        .regions
        .iter()
        .map(|r| {
            vec![
                r.name.to_string(),
                format_count(r.dormants),
                format_percent(r.regional_share),
                format_percent(r.national_share),
            ]
        })
        .collect();
    rows.push(vec![
        "TOTAL".to_string(),
        format_count(d.count),
        format_percent(d.share),
        "100%".to_string(),
    ]);
    doc.heading(3, "Tableau 3 : Dormants par région")
        .table(&["Région", "OF dormants", "% région", "% dormants_national"], rows);

    let t = report.targeting;
    let rows = vec![
        vec!["Récents (2024-2025)".to_string(), format_count(t.recent), "Nouveaux certifiés".to_string(), "Accompagnement lancement".to_string()],
        vec!["Anciens (≤2023)".to_string(), format_count(t.older), "Certifiés depuis >1 an".to_string(), "Réactivation".to_string()],
        vec!["Multi-spécialités".to_string(), format_count(t.multi_specialty), "Polyvalents".to_string(), "Opportunité diversification".to_string()],
    ];
    doc.heading(3, "Tableau 4 : Ciblage dormants")
        .table(&["Segment", "OF", "Caractéristiques", "Action"], rows);

    let rows = report.subcontracting.iter().map(|s| {
        vec![
            s.label.to_string(),
            format_count(s.count),
            if s.label == "TOTAL" { "100%".to_string() } else { format_percent(s.share) },
            format_float(s.mean_subcontracted, 1),
            format_float(s.mean_trainees, 1),
            format_opt_percent(s.mean_ratio.map(|r| r * 100.0)),
        ]
    });
    doc.heading(3, "Tableau 5 : OF sous-traitants")
        .table(&["Tranche confiés", "OF", "%", "Stag confiés moy", "Stag total moy", "Ratio"], rows);

    let rows = report.top_subcontractors.iter().enumerate().map(|(i, r)| {
        vec![
            (i + 1).to_string(),
            r.denomination.clone().unwrap_or_else(|| "-".to_string()),
            r.department.clone().unwrap_or_else(|| "-".to_string()),
            format_float(r.subcontracted_trainees, 0),
            format_float(r.trainees, 0),
            format_opt_percent(subcontract_ratio(r).map(|x| x * 100.0)),
            r.main_specialty().unwrap_or(UNLABELLED).to_string(),
        ]
    });
    doc.heading(3, "Tableau 6 : Top 20 sous-traitants").table(
        &["Rang", "Dénomination", "Département", "Stag confiés", "Stag total", "Ratio", "Spécialité"],
        rows,
    );
    writer.write_markdown("dormants_analysis.md", &doc)?;

    let rows = report.dormants.iter().map(|(r, profile)| {
        let specialties: Vec<&str> = r.specialties.iter().filter_map(|s| s.label.as_deref()).collect();
        vec![
            r.denomination.clone().unwrap_or_default(),
            r.siren.clone().unwrap_or_default(),
            r.region_name().to_string(),
            r.declaration_year.map(|y| y.to_string()).unwrap_or_else(|| "-".to_string()),
            r.headcount.map(|h| h.to_string()).unwrap_or_default(),
            specialties.join(" | "),
            profile.label().to_string(),
            r.declaration_year.map_or(false, |y| y <= 2023).to_string(),
        ]
    });
    writer.write_csv(
        "dormants_export.csv",
        &[
            "denomination",
            "siren",
            "region",
            "annee_derniere_declaration",
            "effectif",
            "specialites",
            "profil",
            "reactivable",
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

    fn dormant(year: Option<i32>, region: u32, specialties: &[&str]) -> OfRecord {
        let mut record = with_specialties(of(5, 0.0, region), specialties);
        record.declaration_year = year;
        record
    }

    #[test]
    fn test_classify_dormant_rule_order() {
        assert_eq!(
            classify_dormant(&dormant(Some(2021), 11, &["Droit", "Langues"])),
            DormantProfile::CessationActivite
        );
        assert_eq!(
            classify_dormant(&dormant(Some(2024), 11, &["Droit", "Langues"])),
            DormantProfile::SousDeclaration
        );
        assert_eq!(
            classify_dormant(&dormant(Some(2024), 11, &["Conduite d'engins"])),
            DormantProfile::ActivitePonctuelle
        );
        assert_eq!(classify_dormant(&dormant(Some(2024), 94, &["Droit"])), DormantProfile::ActivitePonctuelle);
        assert_eq!(classify_dormant(&dormant(Some(2025), 11, &["Droit"])), DormantProfile::ReconversionRecente);
        assert_eq!(classify_dormant(&dormant(Some(2023), 11, &["Droit"])), DormantProfile::ActivitePonctuelle);
        assert_eq!(classify_dormant(&dormant(None, 11, &[])), DormantProfile::ActivitePonctuelle);
    }

    #[test]
    fn test_dormants_against_actives() {
        let mut no_trainees = dormant(Some(2025), 84, &["Droit"]);
        no_trainees.trainees = None;
        let mut subcontractor = of(6, 200.0, 11);
        subcontractor.subcontracted_trainees = Some(80.0);
        let records = vec![
            dormant(Some(2020), 11, &["Droit"]),
            no_trainees,
            of(4, 120.0, 11),
            subcontractor,
            of(15, 0.0, 11),
        ];
        let ctx = ReportContext::new(&records, TamFilter::default());
        let report = build(&ctx);

        assert_eq!(report.certified, 4);
        assert_eq!(report.dormant_profile.count, 2);
        assert_eq!(report.active_profile.count, 2);
        assert_eq!(report.active_profile.mean_headcount, Some(5.0));
        assert_eq!(report.active_profile.top_region, Some(("Île-de-France", 100.0)));

        let cessation = &report.profiles[1];
        assert_eq!(cessation.profile, DormantProfile::CessationActivite);
        assert_eq!(cessation.count, 1);
        assert_eq!(report.targeting, TargetingCounts { recent: 1, older: 1, multi_specialty: 0 });

        let idf = report.regions.iter().find(|r| r.name == "Île-de-France").unwrap();
        assert_eq!(idf.dormants, 1);
        assert!((idf.regional_share - 100.0 / 3.0).abs() < 1e-9);
        assert_eq!(idf.national_share, 50.0);

        let first_band = &report.subcontracting[1];
        assert_eq!(first_band.label, "51-200");
        assert_eq!(first_band.count, 1);
        assert_eq!(first_band.mean_ratio, Some(0.4));
        assert_eq!(report.top_subcontractors.len(), 1);
    }
}
