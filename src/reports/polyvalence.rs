use std::collections::{BTreeMap, HashMap};

use super::ReportContext;
use crate::error::AppResult;
use crate::models::OfRecord;
use crate::services::reference::UNKNOWN_REGION;
use crate::services::stats::{mean, percent, safe_ratio};
use crate::services::writer::{format_count, format_float, format_percent, MarkdownDoc, ReportWriter};

const TOP_PAIRS: usize = 20;

/// A slot counts as declared when it carries a code or a label.
fn declared(record: &OfRecord, slot: usize) -> bool {
    record.specialties.get(slot).map_or(false, |s| s.code.is_some() || s.label.is_some())
}

pub fn declared_count(record: &OfRecord) -> usize {
    (0..3).filter(|&slot| declared(record, slot)).count()
}

/// Distinct specialty names of a record, label first then code, sorted
/// case-insensitively.
pub fn distinct_labels(record: &OfRecord) -> Vec<&str> {
    let mut labels: Vec<&str> = Vec::with_capacity(3);
    for specialty in &record.specialties {
        if let Some(label) = specialty.label.as_deref().or(specialty.code.as_deref()) {
            if !labels.contains(&label) {
                labels.push(label);
            }
        }
    }
    labels.sort_by_key(|l| l.to_lowercase());
    labels
}

fn pairs<'a>(labels: &'a [&'a str]) -> impl Iterator<Item = (String, String)> + 'a {
    labels
        .iter()
        .enumerate()
        .flat_map(move |(i, a)| labels[i + 1..].iter().map(move |b| (a.to_string(), b.to_string())))
}

fn trainees(record: &OfRecord) -> f64 {
    record.trainees.unwrap_or(0.0)
}

#[derive(Debug, Clone, PartialEq)]
pub struct InclusiveRow {
    pub label: &'static str,
    pub base: usize,
    pub base_share: f64,
    pub tam: usize,
    pub tam_share: f64,
    pub mean_trainees: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExclusiveRow {
    pub label: &'static str,
    pub count: usize,
    pub share: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActivityRow {
    pub label: &'static str,
    pub count: usize,
    pub share: f64,
    pub mean_trainees: Option<f64>,
    pub mean_productivity: Option<f64>,
    pub mean_headcount: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PairRow {
    pub first: String,
    pub second: String,
    pub count: usize,
    /// Share of records declaring two or more distinct specialties.
    pub multi_share: f64,
    pub mean_tam_trainees: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RegionPolyRow {
    pub name: &'static str,
    pub single: usize,
    pub multi: usize,
    pub share: f64,
    pub delta: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HeadcountPolyRow {
    pub category: &'static str,
    pub counts: [usize; 3],
    pub share: f64,
}

fn headcount_category(headcount: u32) -> &'static str {
    match headcount {
        0..=2 => "≤2",
        3 => "3",
        4 => "4",
        5..=6 => "5-6",
        7..=8 => "7-8",
        9..=10 => "9-10",
        _ => ">10",
    }
}

const CATEGORY_ORDER: [&str; 7] = ["3", "4", "5-6", "7-8", "9-10", "≤2", ">10"];

#[derive(Debug, Clone)]
pub struct PolyvalenceReport {
    pub inclusive: Vec<InclusiveRow>,
    pub exclusive: Vec<ExclusiveRow>,
    pub activity: Vec<ActivityRow>,
    /// Every pair, most frequent first.
    pub pairs: Vec<PairRow>,
    pub regions: Vec<RegionPolyRow>,
    pub national: RegionPolyRow,
    pub headcounts: Vec<HeadcountPolyRow>,
}

impl PolyvalenceReport {
    pub fn exclusive_share(&self, label: &str) -> f64 {
        self.exclusive.iter().find(|r| r.label == label).map_or(0.0, |r| r.share)
    }
}

fn inclusive_rows(ctx: &ReportContext<'_>) -> Vec<InclusiveRow> {
    let (base_total, tam_total) = (ctx.records.len(), ctx.tam.len());
    [("0 (non renseigné)", None), ("1 seule", Some(0)), ("2 spécialités", Some(1)), ("3 spécialités", Some(2))]
        .into_iter()
        .map(|(label, slot)| {
            let in_group = |r: &OfRecord| match slot {
                None => !declared(r, 0),
                Some(s) => declared(r, s),
            };
            let base = ctx.records.iter().filter(|r| in_group(r)).count();
            let tam: Vec<f64> = ctx.tam.iter().copied().filter(|r| in_group(r)).map(trainees).collect();
            InclusiveRow {
                label,
                base,
                base_share: percent(base, base_total),
                tam: tam.len(),
                tam_share: percent(tam.len(), tam_total),
                mean_trainees: mean(&tam),
            }
        })
        .collect()
}

fn pair_rows(ctx: &ReportContext<'_>) -> Vec<PairRow> {
    let mut seen: HashMap<(String, String), (usize, usize)> = HashMap::new();
    let mut multi = 0;
    for record in ctx.records {
        let labels = distinct_labels(record);
        if labels.len() < 2 {
            continue;
        }
        multi += 1;
        for pair in pairs(&labels) {
            let order = seen.len();
            seen.entry(pair).or_insert((order, 0)).1 += 1;
        }
    }

    let mut tam_trainees: HashMap<(String, String), Vec<f64>> = HashMap::new();
    for record in &ctx.tam {
        let labels = distinct_labels(record);
        for pair in pairs(&labels) {
            tam_trainees.entry(pair).or_default().push(trainees(record));
        }
    }

    let mut ranked: Vec<((String, String), (usize, usize))> = seen.into_iter().collect();
    ranked.sort_by(|(_, (oa, ca)), (_, (ob, cb))| cb.cmp(ca).then(oa.cmp(ob)));
    ranked
        .into_iter()
        .map(|(key, (_, count))| {
            let mean_tam_trainees = tam_trainees.get(&key).and_then(|v| mean(v));
            PairRow { first: key.0, second: key.1, count, multi_share: percent(count, multi), mean_tam_trainees }
        })
        .collect()
}

fn region_rows(records: &[OfRecord]) -> (Vec<RegionPolyRow>, RegionPolyRow) {
    let mut groups: BTreeMap<&'static str, (usize, usize, usize)> = BTreeMap::new();
    for record in records.iter().filter(|r| r.region_code.is_some()) {
        let entry = groups.entry(record.region_name()).or_default();
        entry.0 += 1;
        match declared_count(record) {
            1 => entry.1 += 1,
            n if n >= 2 => entry.2 += 1,
            _ => {}
        }
    }
    let located: usize = groups.values().map(|g| g.0).sum();
    let located_multi: usize = groups.values().map(|g| g.2).sum();
    let national_share = percent(located_multi, located);

    let mut rows: Vec<RegionPolyRow> = groups
        .into_iter()
        .map(|(name, (total, single, multi))| {
            let share = percent(multi, total);
            RegionPolyRow { name, single, multi, share, delta: share - national_share }
        })
        .collect();
    rows.sort_by(|a, b| b.share.total_cmp(&a.share));

    let national = RegionPolyRow {
        name: "National",
        single: records.iter().filter(|r| declared_count(r) == 1).count(),
        multi: records.iter().filter(|r| declared_count(r) >= 2).count(),
        share: national_share,
        delta: 0.0,
    };
    (rows, national)
}

pub fn build(ctx: &ReportContext<'_>) -> PolyvalenceReport {
    let base_total = ctx.records.len();
    let exclusive = ["Non renseigné", "Spécialisés", "Diversifiés", "Polyvalents"]
        .into_iter()
        .enumerate()
        .map(|(n, label)| {
            let count = ctx.records.iter().filter(|r| declared_count(r) == n).count();
            ExclusiveRow { label, count, share: percent(count, base_total) }
        })
        .collect();

    let activity = ["1 spécialité", "2 spécialités", "3 spécialités"]
        .into_iter()
        .enumerate()
        .map(|(i, label)| {
            let group: Vec<&OfRecord> = ctx.tam.iter().copied().filter(|r| declared_count(r) == i + 1).collect();
            let volumes: Vec<f64> = group.iter().map(|r| trainees(r)).collect();
            let staffed: Vec<(f64, f64)> = group
                .iter()
                .filter_map(|r| r.headcount.filter(|&h| h > 0).map(|h| (trainees(r), f64::from(h))))
                .collect();
            let productivity: Vec<f64> = staffed.iter().filter_map(|&(t, h)| safe_ratio(t, h)).collect();
            let headcounts: Vec<f64> = staffed.iter().map(|&(_, h)| h).collect();
            ActivityRow {
                label,
                count: group.len(),
                share: percent(group.len(), ctx.tam.len()),
                mean_trainees: mean(&volumes),
                mean_productivity: mean(&productivity),
                mean_headcount: mean(&headcounts),
            }
        })
        .collect();

    let mut by_category: HashMap<&'static str, [usize; 4]> = HashMap::new();
    for record in &ctx.tam {
        if let Some(headcount) = record.headcount {
            let entry = by_category.entry(headcount_category(headcount)).or_default();
            entry[0] += 1;
            if let n @ 1..=3 = declared_count(record) {
                entry[n] += 1;
            }
        }
    }
    let headcounts = CATEGORY_ORDER
        .iter()
        .enumerate()
        .filter_map(|(i, &category)| {
            // The five in-range categories always show; the others only when populated.
            let counts = by_category.get(category).copied();
            if i >= 5 && counts.is_none() {
                return None;
            }
            let [total, one, two, three] = counts.unwrap_or_default();
            Some(HeadcountPolyRow { category, counts: [one, two, three], share: percent(two + three, total) })
        })
        .collect();

    let (regions, national) = region_rows(ctx.records);
    PolyvalenceReport {
        inclusive: inclusive_rows(ctx),
        exclusive,
        activity,
        pairs: pair_rows(ctx),
        regions,
        national,
        headcounts,
    }
}

fn summary(report: &PolyvalenceReport) -> Vec<String> {
    let mut bullets = vec![format!(
        "Répartition : {:.1}% spécialisés (1 spé), {:.1}% diversifiés (2 spés) et {:.1}% polyvalents (3 spés).",
        report.exclusive_share("Spécialisés"),
        report.exclusive_share("Diversifiés"),
        report.exclusive_share("Polyvalents"),
    )];

    let stag = |i: usize| report.activity.get(i).and_then(|r| r.mean_trainees).filter(|v| *v != 0.0);
    if let (Some(one), Some(three)) = (stag(0), stag(2)) {
        bullets.push(format!(
            "TAM : les OF à 3 spés forment en moyenne {:.0} stagiaires ({:+.0} vs 1 spé).",
            three,
            three - one
        ));
    }

    if !report.pairs.is_empty() {
        let text: Vec<String> = report
            .pairs
            .iter()
            .take(3)
            .map(|p| format!("{} + {} ({} OF)", p.first, p.second, format_count(p.count)))
            .collect();
        bullets.push(format!("Top combinaisons : {}.", text.join("; ")));
    }

    let high = report.regions.iter().find(|r| r.name != UNKNOWN_REGION).or(report.regions.first());
    let low = report.regions.iter().rev().find(|r| r.name != UNKNOWN_REGION).or(report.regions.last());
    if let (Some(high), Some(low)) = (high, low) {
        bullets.push(format!(
            "Régions les plus polyvalentes : {} ({:.1}%), les moins : {} ({:.1}%).",
            high.name, high.share, low.name, low.share
        ));
    }

    if let Some(peak) = report.headcounts.iter().reduce(|best, r| if r.share > best.share { r } else { best }) {
        bullets.push(format!(
            "Polyvalence et taille : pic à {} formateurs ({:.1}% d'OF à 2+ spés).",
            peak.category, peak.share
        ));
    }
    bullets
}

pub fn write(report: &PolyvalenceReport, writer: &mut ReportWriter) -> AppResult<()> {
    let mut doc = MarkdownDoc::new("Analyse polyvalence OF France 2025");

    let rows = report.inclusive.iter().map(|r| {
        vec![
            r.label.to_string(),
            format_count(r.base),
            format_percent(r.base_share),
            format_count(r.tam),
            format_percent(r.tam_share),
            format_float(r.mean_trainees, 0),
        ]
    });
    doc.heading(2, "Tableau 1a : Spécialités déclarées (cumulatives)")
        .table(&["Nb spécialités", "OF total", "% base", "OF TAM", "% TAM", "Stag. moyen TAM"], rows);

    let rows = report
        .exclusive
        .iter()
        .map(|r| vec![r.label.to_string(), format_count(r.count), format_percent(r.share)]);
    doc.heading(2, "Tableau 1b : Répartition exclusive des OF").table(&["Statut", "OF", "% base"], rows);

    let rows = report.activity.iter().map(|r| {
        vec![
            r.label.to_string(),
            format_count(r.count),
            format_percent(r.share),
            format_float(r.mean_trainees, 0),
            format_float(r.mean_productivity, 1),
            format_float(r.mean_headcount, 1),
        ]
    });
    doc.heading(2, "Tableau 2 : Polyvalence vs activité (TAM)").table(
        &["Nb spécialités", "OF TAM", "% TAM", "Stag. moyen", "Prod. estimée", "Effectif moyen"],
        rows,
    );

    let rows = report.pairs.iter().take(TOP_PAIRS).enumerate().map(|(i, p)| {
        vec![
            (i + 1).to_string(),
            p.first.clone(),
            p.second.clone(),
            format_count(p.count),
            format_percent(p.multi_share),
            format_float(p.mean_tam_trainees, 0),
            format!("Offre combinant {} & {}", p.first, p.second),
        ]
    });
    doc.heading(2, "Tableau 3 : Paires de spécialités les plus fréquentes").table(
        &["Rang", "Spé 1", "Spé 2", "OF", "% multi-spés", "Stag. moyen TAM", "Interprétation"],
        rows,
    );

    let rows = report.regions.iter().chain(std::iter::once(&report.national)).map(|r| {
        vec![
            r.name.to_string(),
            format_count(r.single),
            format_count(r.multi),
            format_percent(r.share),
            format!("{:+.1}", r.delta),
        ]
    });
    doc.heading(2, "Tableau 4 : Polyvalence par région")
        .table(&["Région", "OF 1 spé", "OF 2+ spés", "% polyvalents", "vs national (pp)"], rows);

    let rows = report.headcounts.iter().map(|r| {
        vec![
            r.category.to_string(),
            format_count(r.counts[0]),
            format_count(r.counts[1]),
            format_count(r.counts[2]),
            format_percent(r.share),
        ]
    });
    doc.heading(2, "Tableau 5 : Polyvalence selon l'effectif (TAM)")
        .table(&["Effectif", "OF 1 spé", "OF 2 spés", "OF 3 spés", "% polyvalents"], rows);

    doc.heading(2, "Synthèse");
    for bullet in summary(report) {
        doc.bullet(bullet);
    }
    writer.write_markdown("polyvalence_analysis.md", &doc)?;

    let rows = report.pairs.iter().map(|p| {
        vec![
            p.first.clone(),
            p.second.clone(),
            p.count.to_string(),
            format!("{:.2}", p.multi_share),
            p.mean_tam_trainees.map(|v| format!("{:.1}", v)).unwrap_or_default(),
        ]
    });
    writer.write_csv(
        "polyvalence_combinations.csv",
        &["specialite_1", "specialite_2", "of", "pct_multi", "stag_mean_tam"],
        rows,
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Specialty;
    use crate::reports::fixtures::{of, with_specialties};
    use crate::services::tam::TamFilter;

    #[test]
    fn test_code_only_slot_counts_as_declared() {
        let mut record = of(5, 10.0, 11);
        record.specialties.push(Specialty { code: Some("326".to_string()), label: None });
        record.specialties.push(Specialty::default());
        record.specialties.push(Specialty { code: None, label: Some("Droit".to_string()) });
        assert_eq!(declared_count(&record), 2);
        assert_eq!(distinct_labels(&record), vec!["326", "Droit"]);
    }

    #[test]
    fn test_distinct_labels_sort_case_insensitively() {
        let record = with_specialties(of(5, 10.0, 11), &["langues vivantes", "Droit", "Droit"]);
        assert_eq!(distinct_labels(&record), vec!["Droit", "langues vivantes"]);
    }

    #[test]
    fn test_groups_pairs_and_regions() {
        let records = vec![
            with_specialties(of(5, 100.0, 11), &["Informatique", "Droit"]),
            with_specialties(of(5, 300.0, 11), &["Droit", "Informatique", "Langues vivantes"]),
            with_specialties(of(4, 50.0, 84), &["Droit"]),
            with_specialties(of(20, 0.0, 84), &["Santé", "Informatique"]),
            of(5, 10.0, 84),
        ];
        let ctx = ReportContext::new(&records, TamFilter::default());
        let report = build(&ctx);

        let counts: Vec<usize> = report.exclusive.iter().map(|r| r.count).collect();
        assert_eq!(counts, vec![1, 1, 2, 1]);
        assert_eq!(report.inclusive[0].base, 1);
        assert_eq!(report.inclusive[2].base, 3);
        assert_eq!(report.inclusive[3].tam, 1);

        let top = &report.pairs[0];
        assert_eq!((top.first.as_str(), top.second.as_str()), ("Droit", "Informatique"));
        assert_eq!(top.count, 2);
        assert!((top.multi_share - 200.0 / 3.0).abs() < 1e-9);
        assert_eq!(top.mean_tam_trainees, Some(200.0));
        // Santé + Informatique only appears outside the TAM
        let sante = report.pairs.iter().find(|p| p.second == "Santé").unwrap();
        assert_eq!(sante.mean_tam_trainees, None);

        assert_eq!(report.regions[0].name, "Île-de-France");
        assert_eq!(report.regions[0].share, 100.0);
        assert_eq!(report.national.multi, 3);
        assert_eq!(report.national.share, 60.0);
        assert!((report.regions[1].delta - (100.0 / 3.0 - 60.0)).abs() < 1e-9);

        let five_six = report.headcounts.iter().find(|r| r.category == "5-6").unwrap();
        assert_eq!(five_six.counts, [0, 1, 1]);
        assert!((five_six.share - 200.0 / 3.0).abs() < 1e-9);
        assert_eq!(report.headcounts.len(), 5);
    }
}
