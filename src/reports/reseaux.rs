use std::collections::{BTreeSet, HashMap, HashSet};

use once_cell::sync::Lazy;
use regex::Regex;

use super::ReportContext;
use crate::error::AppResult;
use crate::models::OfRecord;
use crate::services::classify::MacroTheme;
use crate::services::stats::mean;
use crate::services::tam::TamFilter;
use crate::services::writer::{format_count, format_float, format_int, MarkdownDoc, ReportWriter};

const MIN_SITES: usize = 3;
const MIN_HEADCOUNT: u64 = 10;
const FRANCHISE_SHARE: f64 = 0.7;
const COOPERATIVE_KEYWORDS: [&str; 6] =
    ["FEDERATION", "UNION", "RESEAU", "COOPERATIVE", "GROUPEMENT", "SYNDICAT"];
const LEADER_THEMES: [MacroTheme; 4] = [
    MacroTheme::SoftSkills,
    MacroTheme::TechDigital,
    MacroTheme::CommerceGestion,
    MacroTheme::Sante,
];

static NON_ALNUM: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^A-Z0-9]+").unwrap());

/// Upper-cased name with every non `[A-Z0-9]` run collapsed to one space.
pub fn normalize_name(name: &str) -> String {
    NON_ALNUM
        .replace_all(&name.to_uppercase(), " ")
        .trim()
        .to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coverage {
    Nationale,
    Regionale,
    Locale,
}

impl Coverage {
    pub fn from_region_count(n: usize) -> Self {
        match n {
            5.. => Coverage::Nationale,
            2..=4 => Coverage::Regionale,
            _ => Coverage::Locale,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Coverage::Nationale => "Nationale",
            Coverage::Regionale => "Régionale",
            Coverage::Locale => "Locale",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkType {
    Franchise,
    Cooperative,
    GroupeIntegre,
}

impl NetworkType {
    pub fn label(&self) -> &'static str {
        match self {
            NetworkType::Franchise => "Franchise",
            NetworkType::Cooperative => "Coopérative",
            NetworkType::GroupeIntegre => "Groupe intégré",
        }
    }
}

/// Franchise when one normalised name covers at least 70% of the sites,
/// cooperative when any name carries a federative keyword.
pub fn classify_network_type(denominations: &[&str]) -> (NetworkType, &'static str) {
    let names: Vec<String> = denominations
        .iter()
        .map(|d| normalize_name(d))
        .filter(|n| !n.is_empty())
        .collect();
    if names.is_empty() {
        return (NetworkType::GroupeIntegre, "Données incomplètes");
    }
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for name in &names {
        *counts.entry(name.as_str()).or_default() += 1;
    }
    let top = counts.values().copied().max().unwrap_or(0);
    if top as f64 / names.len() as f64 >= FRANCHISE_SHARE {
        return (NetworkType::Franchise, "Marque commune dominante");
    }
    if names
        .iter()
        .any(|n| COOPERATIVE_KEYWORDS.iter().any(|k| n.contains(k)))
    {
        return (NetworkType::Cooperative, "Gouvernance partagée");
    }
    (NetworkType::GroupeIntegre, "Portefeuille multi-marques")
}

/// Most frequent theme, ties broken by theme order.
fn dominant_theme<'a>(records: impl Iterator<Item = &'a OfRecord>) -> MacroTheme {
    let mut counts: HashMap<MacroTheme, usize> = HashMap::new();
    for record in records {
        *counts.entry(record.main_theme()).or_default() += 1;
    }
    let best = counts.values().copied().max().unwrap_or(0);
    MacroTheme::ALL
        .iter()
        .copied()
        .find(|t| best > 0 && counts.get(t) == Some(&best))
        .unwrap_or(MacroTheme::Autre)
}

/// Most frequent denomination, first seen on ties.
fn network_name(records: &[&OfRecord]) -> String {
    let mut order: Vec<&str> = Vec::new();
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for name in records.iter().filter_map(|r| r.denomination.as_deref()) {
        let count = counts.entry(name).or_default();
        if *count == 0 {
            order.push(name);
        }
        *count += 1;
    }
    let mut best: Option<(&str, usize)> = None;
    for name in order {
        let n = counts[name];
        if best.map_or(true, |(_, b)| n > b) {
            best = Some((name, n));
        }
    }
    best.map_or_else(|| "Non renseigné".to_string(), |(name, _)| name.to_string())
}

#[derive(Debug, Clone)]
pub struct Network<'a> {
    pub siren: String,
    pub name: String,
    pub establishments: Vec<&'a OfRecord>,
    pub siret_count: usize,
    pub headcount_total: u64,
    pub tam_count: usize,
    pub regions: Vec<&'static str>,
    pub coverage: Coverage,
    pub kind: NetworkType,
    pub kind_reason: &'static str,
    pub main_theme: MacroTheme,
}

impl<'a> Network<'a> {
    fn new(siren: &str, establishments: Vec<&'a OfRecord>, filter: &TamFilter) -> Self {
        let siret_count = establishments
            .iter()
            .filter_map(|r| r.siret.as_deref())
            .collect::<HashSet<_>>()
            .len();
        let headcount_total = establishments.iter().map(|r| r.headcount.unwrap_or(0) as u64).sum();
        let tam: Vec<&OfRecord> = establishments.iter().copied().filter(|r| filter.is_tam(r)).collect();
        let regions: Vec<&'static str> = establishments
            .iter()
            .filter(|r| r.region_code.is_some())
            .map(|r| r.region_name())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let denominations: Vec<&str> =
            establishments.iter().filter_map(|r| r.denomination.as_deref()).collect();
        let (kind, kind_reason) = classify_network_type(&denominations);
        let main_theme = if tam.is_empty() {
            dominant_theme(establishments.iter().copied())
        } else {
            dominant_theme(tam.iter().copied())
        };

        Network {
            siren: siren.to_string(),
            name: network_name(&establishments),
            siret_count,
            headcount_total,
            tam_count: tam.len(),
            coverage: Coverage::from_region_count(regions.len()),
            regions,
            kind,
            kind_reason,
            main_theme,
            establishments,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NetworkDiagnostics {
    pub total_sirens: usize,
    pub multi_site: usize,
    pub headcount_ok: usize,
    pub tam_ok: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SizeRow {
    pub label: &'static str,
    pub networks: usize,
    pub establishments: usize,
    pub headcount: u64,
    pub tam: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProfileRow {
    pub metric: &'static str,
    pub networks: Option<f64>,
    pub independents: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct ReseauxReport<'a> {
    pub diagnostics: NetworkDiagnostics,
    pub networks: Vec<Network<'a>>,
    pub sizes: Vec<SizeRow>,
    pub profile: Vec<ProfileRow>,
}

fn size_label(sites: usize) -> &'static str {
    match sites {
        0..=5 => "3-5 étab",
        6..=10 => "6-10 étab",
        11..=20 => "11-20 étab",
        _ => "21+ étab",
    }
}

/// Groups by SIREN and keeps multi-site groups with enough trainers and at
/// least one qualified establishment, largest headcount first.
pub fn detect_networks<'a>(
    records: &'a [OfRecord],
    filter: &TamFilter,
) -> (Vec<Network<'a>>, NetworkDiagnostics) {
    let mut order: Vec<&str> = Vec::new();
    let mut groups: HashMap<&str, Vec<&OfRecord>> = HashMap::new();
    for record in records {
        let Some(siren) = record.siren.as_deref() else { continue };
        let group = groups.entry(siren).or_default();
        if group.is_empty() {
            order.push(siren);
        }
        group.push(record);
    }

    let mut diagnostics = NetworkDiagnostics { total_sirens: groups.len(), ..Default::default() };
    let mut networks = Vec::new();
    for siren in order {
        let Some(establishments) = groups.remove(siren) else { continue };
        let network = Network::new(siren, establishments, filter);
        if network.siret_count < MIN_SITES {
            continue;
        }
        diagnostics.multi_site += 1;
        if network.headcount_total < MIN_HEADCOUNT {
            continue;
        }
        diagnostics.headcount_ok += 1;
        if network.tam_count == 0 {
            continue;
        }
        diagnostics.tam_ok += 1;
        networks.push(network);
    }
    networks.sort_by(|a, b| b.headcount_total.cmp(&a.headcount_total));
    (networks, diagnostics)
}

pub fn build<'a>(ctx: &ReportContext<'a>) -> ReseauxReport<'a> {
    let (networks, diagnostics) = detect_networks(ctx.records, &ctx.filter);

    let sizes = ["3-5 étab", "6-10 étab", "11-20 étab", "21+ étab"]
        .into_iter()
        .map(|label| {
            let members: Vec<&Network> = networks.iter().filter(|n| size_label(n.siret_count) == label).collect();
            SizeRow {
                label,
                networks: members.len(),
                establishments: members.iter().map(|n| n.siret_count).sum(),
                headcount: members.iter().map(|n| n.headcount_total).sum(),
                tam: members.iter().map(|n| n.tam_count).sum(),
            }
        })
        .collect();

    let network_sirens: HashSet<&str> = networks.iter().map(|n| n.siren.as_str()).collect();
    let mut sites_per_siren: HashMap<&str, HashSet<&str>> = HashMap::new();
    for record in ctx.records {
        if let (Some(siren), Some(siret)) = (record.siren.as_deref(), record.siret.as_deref()) {
            sites_per_siren.entry(siren).or_default().insert(siret);
        }
    }
    let in_network: Vec<&OfRecord> = ctx
        .tam
        .iter()
        .copied()
        .filter(|r| r.siren.as_deref().map_or(false, |s| network_sirens.contains(s)))
        .collect();
    let independent: Vec<&OfRecord> = ctx
        .tam
        .iter()
        .copied()
        .filter(|r| {
            r.siren
                .as_deref()
                .and_then(|s| sites_per_siren.get(s))
                .map_or(0, HashSet::len)
                <= 2
        })
        .collect();

    let metric = |records: &[&OfRecord], f: fn(&OfRecord) -> Option<f64>| {
        mean(&records.iter().filter_map(|r| f(r)).collect::<Vec<_>>())
    };
    let profile = vec![
        ProfileRow {
            metric: "Nombre OF",
            networks: Some(in_network.len() as f64),
            independents: Some(independent.len() as f64),
        },
        ProfileRow {
            metric: "Stagiaires moyens",
            networks: metric(&in_network, |r| r.trainees),
            independents: metric(&independent, |r| r.trainees),
        },
        ProfileRow {
            metric: "Effectif moyen",
            networks: metric(&in_network, |r| r.headcount.map(f64::from)),
            independents: metric(&independent, |r| r.headcount.map(f64::from)),
        },
    ];

    ReseauxReport { diagnostics, networks, sizes, profile }
}

pub fn write(report: &ReseauxReport<'_>, writer: &mut ReportWriter) -> AppResult<()> {
    let d = &report.diagnostics;
    let mut doc = MarkdownDoc::new("Réseaux et groupes multi-établissements");
    doc.heading(2, "Diagnostic de détection")
        .bullet(format!("SIREN distincts : {}", format_count(d.total_sirens)))
        .bullet(format!("≥ {} établissements : {}", MIN_SITES, format_count(d.multi_site)))
        .bullet(format!("+ effectif cumulé ≥ {} : {}", MIN_HEADCOUNT, format_count(d.headcount_ok)))
        .bullet(format!("+ au moins un établissement TAM : {}", format_count(d.tam_ok)))
        .blank();

    let rows = report.networks.iter().take(50).enumerate().map(|(i, n)| {
        vec![
            (i + 1).to_string(),
            n.siren.clone(),
            n.name.clone(),
            format_count(n.siret_count),
            format_int(n.headcount_total as i64),
            format_count(n.tam_count),
            n.coverage.label().to_string(),
            n.kind.label().to_string(),
            n.main_theme.label().to_string(),
        ]
    });
    doc.heading(2, "Tableau 1 : Top 50 réseaux par effectif").table(
        &["Rang", "SIREN", "Réseau", "Étab.", "Effectif", "OF TAM", "Couverture", "Type", "Thème principal"],
        rows,
    );

    let mut rows: Vec<Vec<String>> = report
        .sizes
        .iter()
        .map(|s| {
            vec![
                s.label.to_string(),
                format_count(s.networks),
                format_count(s.establishments),
                format_int(s.headcount as i64),
                format_count(s.tam),
            ]
        })
        .collect();
    rows.push(vec![
        "TOTAL".to_string(),
        format_count(report.sizes.iter().map(|s| s.networks).sum()),
        format_count(report.sizes.iter().map(|s| s.establishments).sum()),
        format_int(report.sizes.iter().map(|s| s.headcount).sum::<u64>() as i64),
        format_count(report.sizes.iter().map(|s| s.tam).sum()),
    ]);
    doc.heading(2, "Tableau 2 : Taille des réseaux")
        .table(&["Taille", "Réseaux", "Établissements", "Effectif", "OF TAM"], rows);

    let mut rows = Vec::new();
    for theme in LEADER_THEMES {
        rows.push(leader_row(theme.label(), report.networks.iter().filter(|n| n.main_theme == theme)));
    }
    rows.push(leader_row(
        "Autres",
        report.networks.iter().filter(|n| !LEADER_THEMES.contains(&n.main_theme)),
    ));
    doc.heading(2, "Tableau 3 : Réseau leader par thème")
        .table(&["Thème", "Réseau", "Étab.", "OF TAM", "Opportunité"], rows);

    let rows = report.profile.iter().map(|p| {
        vec![
            p.metric.to_string(),
            format_float(p.networks, 1),
            format_float(p.independents, 1),
        ]
    });
    doc.heading(2, "Tableau 4 : Profil TAM réseaux vs indépendants")
        .table(&["Indicateur", "Réseaux", "Indépendants (≤ 2 étab.)"], rows);
    writer.write_markdown("reseaux_nationaux.md", &doc)?;

    let rows = report.networks.iter().take(50).enumerate().map(|(i, n)| {
        vec![
            (i + 1).to_string(),
            n.siren.clone(),
            n.name.clone(),
            n.siret_count.to_string(),
            n.headcount_total.to_string(),
            n.tam_count.to_string(),
            n.regions.join(", "),
            n.coverage.label().to_string(),
            n.kind.label().to_string(),
            n.kind_reason.to_string(),
            n.main_theme.label().to_string(),
        ]
    });
    writer.write_csv(
        "reseaux_top50.csv",
        &[
            "rang",
            "siren",
            "reseau",
            "etablissements",
            "effectif_total",
            "of_tam",
            "regions",
            "couverture",
            "type",
            "justification",
            "theme_principal",
        ],
        rows,
    )?;
    Ok(())
}

fn leader_row<'n, 'a: 'n>(label: &str, networks: impl Iterator<Item = &'n Network<'a>>) -> Vec<String> {
    let best = networks.max_by_key(|n| (n.tam_count, n.headcount_total));
    match best {
        Some(n) => vec![
            label.to_string(),
            n.name.clone(),
            format_count(n.siret_count),
            format_count(n.tam_count),
            format!("{} OF TAM, {}", n.tam_count, n.coverage.label().to_lowercase()),
        ],
        None => vec![
            label.to_string(),
            "Aucun réseau éligible".to_string(),
            "0".to_string(),
            "0".to_string(),
            "Données à qualifier".to_string(),
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reports::fixtures::{of, with_specialties};

    fn site(siren: &str, siret: &str, name: &str, headcount: u32, region: u32) -> OfRecord {
        let mut record = with_specialties(of(headcount, 50.0, region), &["Langues vivantes"]);
        record.siren = Some(siren.to_string());
        record.siret = Some(siret.to_string());
        record.denomination = Some(name.to_string());
        record
    }

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("Acadomia - Lyon 3e"), "ACADOMIA LYON 3E");
        assert_eq!(normalize_name("  l'école  "), "L COLE");
    }

    #[test]
    fn test_classify_network_type() {
        assert_eq!(classify_network_type(&["Acadomia", "ACADOMIA", "acadomia", "Other"]).0, NetworkType::Franchise);
        assert_eq!(
            classify_network_type(&["Union des centres", "Centre A", "Centre B"]).0,
            NetworkType::Cooperative
        );
        assert_eq!(classify_network_type(&["A", "B", "C"]).0, NetworkType::GroupeIntegre);
        assert_eq!(classify_network_type(&[]).1, "Données incomplètes");
    }

    #[test]
    fn test_coverage_thresholds() {
        assert_eq!(Coverage::from_region_count(5), Coverage::Nationale);
        assert_eq!(Coverage::from_region_count(2), Coverage::Regionale);
        assert_eq!(Coverage::from_region_count(1), Coverage::Locale);
    }

    #[test]
    fn test_detect_networks_filters_in_order() {
        let records = vec![
            // network: 3 sites, headcount 12, TAM present
            site("111111111", "11111111100001", "Acadomia", 4, 11),
            site("111111111", "11111111100002", "Acadomia", 4, 84),
            site("111111111", "11111111100003", "Acadomia", 4, 11),
            // 3 sites but only 6 trainers in total
            site("222222222", "22222222200001", "Petit", 2, 11),
            site("222222222", "22222222200002", "Petit", 2, 11),
            site("222222222", "22222222200003", "Petit", 2, 11),
            // 2 sites
            site("333333333", "33333333300001", "Duo", 8, 11),
            site("333333333", "33333333300002", "Duo", 8, 11),
            // 3 sites, enough trainers, nobody in range
            site("444444444", "44444444400001", "Gros", 30, 11),
            site("444444444", "44444444400002", "Gros", 30, 11),
            site("444444444", "44444444400003", "Gros", 30, 11),
        ];
        let (networks, diagnostics) = detect_networks(&records, &TamFilter::default());

        assert_eq!(
            diagnostics,
            NetworkDiagnostics { total_sirens: 4, multi_site: 3, headcount_ok: 2, tam_ok: 1 }
        );
        assert_eq!(networks.len(), 1);
        let network = &networks[0];
        assert_eq!(network.name, "Acadomia");
        assert_eq!(network.headcount_total, 12);
        assert_eq!(network.tam_count, 3);
        assert_eq!(network.regions, vec!["Auvergne-Rhône-Alpes", "Île-de-France"]);
        assert_eq!(network.coverage, Coverage::Regionale);
        assert_eq!(network.kind, NetworkType::Franchise);
        assert_eq!(network.main_theme, MacroTheme::Langues);
    }

    #[test]
    fn test_dominant_theme_tie_uses_theme_order() {
        let records = vec![
            with_specialties(of(5, 1.0, 11), &["Langues vivantes"]),
            with_specialties(of(5, 1.0, 11), &["Informatique"]),
        ];
        assert_eq!(dominant_theme(records.iter()), MacroTheme::TechDigital);
    }
}
