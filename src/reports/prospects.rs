use std::collections::BTreeMap;

use super::ReportContext;
use crate::error::AppResult;
use crate::models::OfRecord;
use crate::services::classify::MacroTheme;
use crate::services::reference::{region_tier, RegionTier};
use crate::services::stats::percent;
use crate::services::writer::{format_count, format_percent, MarkdownDoc, ReportWriter};

const TOP_N: usize = 500;
const ENRICH_N: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    TresHaute,
    Haute,
    Moyenne,
    Basse,
    HorsCible,
}

impl Priority {
    pub const ALL: [Priority; 5] = [
        Priority::TresHaute,
        Priority::Haute,
        Priority::Moyenne,
        Priority::Basse,
        Priority::HorsCible,
    ];

    /// Bands are closed on their lower bound so no score falls between two.
    pub fn from_score(score: f64) -> Self {
        if score >= 90.0 {
            Priority::TresHaute
        } else if score >= 75.0 {
            Priority::Haute
        } else if score >= 60.0 {
            Priority::Moyenne
        } else if score >= 45.0 {
            Priority::Basse
        } else {
            Priority::HorsCible
        }
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            Priority::TresHaute => "🔴",
            Priority::Haute => "🟠",
            Priority::Moyenne => "🟡",
            Priority::Basse => "🟢",
            Priority::HorsCible => "⚪",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Priority::TresHaute => "Très haute priorité",
            Priority::Haute => "Haute priorité",
            Priority::Moyenne => "Priorité moyenne",
            Priority::Basse => "Priorité basse",
            Priority::HorsCible => "Hors cible",
        }
    }

    pub fn range(&self) -> &'static str {
        match self {
            Priority::TresHaute => "90-100",
            Priority::Haute => "75-89",
            Priority::Moyenne => "60-74",
            Priority::Basse => "45-59",
            Priority::HorsCible => "0-44",
        }
    }

    pub fn interpretation(&self) -> &'static str {
        match self {
            Priority::TresHaute => "Pipeline immédiat",
            Priority::Haute => "Ciblage M1-M2",
            Priority::Moyenne => "Ciblage M3-M6",
            Priority::Basse => "Opportuniste",
            Priority::HorsCible => "Ignorer",
        }
    }

    /// Sales action and timeline; `None` for out-of-target prospects.
    pub fn pipeline(&self) -> Option<(&'static str, &'static str)> {
        match self {
            Priority::TresHaute => Some(("Contact direct + Démo", "M1")),
            Priority::Haute => Some(("Outreach LinkedIn", "M1-M2")),
            Priority::Moyenne => Some(("Nurturing contenu", "M3-M6")),
            Priority::Basse => Some(("Base données", "M6+")),
            Priority::HorsCible => None,
        }
    }
}

pub fn score_headcount(record: &OfRecord) -> u32 {
    match record.headcount {
        Some(4 | 5) => 25,
        Some(3 | 6 | 7) => 15,
        Some(8..=10) => 10,
        _ => 0,
    }
}

pub fn score_soft_skills(record: &OfRecord) -> u32 {
    let mut themes = record.themes();
    match themes.next() {
        Some(MacroTheme::SoftSkills) => 25,
        Some(_) if themes.any(|t| t == MacroTheme::SoftSkills) => 15,
        _ => 0,
    }
}

pub fn score_activity(record: &OfRecord) -> u32 {
    let trainees = record.trainees.unwrap_or(0.0);
    if trainees >= 500.0 {
        20
    } else if trainees >= 200.0 {
        15
    } else if trainees >= 100.0 {
        10
    } else if trainees >= 50.0 {
        5
    } else {
        2
    }
}

pub fn score_region(record: &OfRecord) -> u32 {
    match region_tier(record.region_name()) {
        RegionTier::Primary => 15,
        RegionTier::Secondary => 10,
        RegionTier::Other => 5,
    }
}

pub fn score_breadth(record: &OfRecord) -> u32 {
    match record.specialty_count() {
        0 => 0,
        1 => 5,
        2 => 10,
        _ => 15,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProspectScore<'a> {
    pub record: &'a OfRecord,
    pub headcount: u32,
    pub soft_skills: u32,
    pub activity: u32,
    pub region: u32,
    pub breadth: u32,
}

impl<'a> ProspectScore<'a> {
    pub fn new(record: &'a OfRecord) -> Self {
        ProspectScore {
            record,
            headcount: score_headcount(record),
            soft_skills: score_soft_skills(record),
            activity: score_activity(record),
            region: score_region(record),
            breadth: score_breadth(record),
        }
    }

    /// Each sub-score over its maximum, weighted, on a 0..100 scale.
    pub fn total(&self) -> f64 {
        let components = [
            (self.headcount, 25.0, 0.25),
            (self.soft_skills, 25.0, 0.25),
            (self.activity, 20.0, 0.20),
            (self.region, 15.0, 0.15),
            (self.breadth, 15.0, 0.15),
        ];
        components
            .iter()
            .map(|&(score, max, weight)| f64::from(score) / max * weight)
            .sum::<f64>()
            * 100.0
    }

    pub fn priority(&self) -> Priority {
        Priority::from_score(self.total())
    }
}

/// Score descending, then trainees, then estimated production.
pub fn rank_prospects<'a>(records: &[&'a OfRecord]) -> Vec<ProspectScore<'a>> {
    let mut scores: Vec<ProspectScore<'a>> = records.iter().map(|&r| ProspectScore::new(r)).collect();
    scores.sort_by(|a, b| {
        b.total()
            .total_cmp(&a.total())
            .then_with(|| {
                b.record
                    .trainees
                    .unwrap_or(0.0)
                    .total_cmp(&a.record.trainees.unwrap_or(0.0))
            })
            .then_with(|| b.record.production_estimee().total_cmp(&a.record.production_estimee()))
    });
    scores
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SegmentMetrics {
    pub score_mean: f64,
    pub headcount_mean: f64,
    pub trainees_mean: f64,
    pub soft_share: f64,
    pub primary_region_share: f64,
    pub production_mean: f64,
}

impl SegmentMetrics {
    fn of(scores: &[ProspectScore<'_>]) -> Self {
        if scores.is_empty() {
            return Self::default();
        }
        let n = scores.len() as f64;
        let avg = |f: &dyn Fn(&ProspectScore<'_>) -> f64| scores.iter().map(f).sum::<f64>() / n;
        SegmentMetrics {
            score_mean: avg(&|s| s.total()),
            headcount_mean: avg(&|s| f64::from(s.record.headcount.unwrap_or(0))),
            trainees_mean: avg(&|s| s.record.trainees.unwrap_or(0.0)),
            soft_share: percent(scores.iter().filter(|s| s.soft_skills >= 15).count(), scores.len()),
            primary_region_share: percent(
                scores
                    .iter()
                    .filter(|s| region_tier(s.record.region_name()) == RegionTier::Primary)
                    .count(),
                scores.len(),
            ),
            production_mean: avg(&|s| s.record.production_estimee()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opportunity {
    Elevee,
    Moyenne,
    Faible,
}

impl Opportunity {
    /// Over- or under-representation of at least 3 points.
    pub fn from_gap(gap: f64) -> Self {
        if gap >= 3.0 {
            Opportunity::Elevee
        } else if gap <= -3.0 {
            Opportunity::Faible
        } else {
            Opportunity::Moyenne
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Opportunity::Elevee => "Élevée",
            Opportunity::Moyenne => "Moy",
            Opportunity::Faible => "Faible",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RegionShare {
    pub name: &'static str,
    pub top_share: f64,
    pub tam_share: f64,
    pub opportunity: Opportunity,
}

#[derive(Debug, Clone)]
pub struct ProspectsReport<'a> {
    pub ranked: Vec<ProspectScore<'a>>,
    pub distribution: Vec<(Priority, usize, f64)>,
    pub top_metrics: SegmentMetrics,
    pub tam_metrics: SegmentMetrics,
    pub regions: Vec<RegionShare>,
}

impl<'a> ProspectsReport<'a> {
    pub fn top(&self) -> &[ProspectScore<'a>] {
        &self.ranked[..self.ranked.len().min(TOP_N)]
    }
}

fn region_shares(top: &[ProspectScore<'_>], tam: &[ProspectScore<'_>]) -> Vec<RegionShare> {
    let mut counts: BTreeMap<&'static str, (usize, usize)> = BTreeMap::new();
    for s in top {
        counts.entry(s.record.region_name()).or_default().0 += 1;
    }
    for s in tam {
        counts.entry(s.record.region_name()).or_default().1 += 1;
    }
    let mut rows: Vec<RegionShare> = counts
        .into_iter()
        .map(|(name, (in_top, in_tam))| {
            let top_share = percent(in_top, top.len());
            let tam_share = percent(in_tam, tam.len());
            RegionShare {
                name,
                top_share,
                tam_share,
                opportunity: Opportunity::from_gap(top_share - tam_share),
            }
        })
        .collect();
    rows.sort_by(|a, b| b.top_share.total_cmp(&a.top_share));
    rows
}

pub fn build<'a>(ctx: &ReportContext<'a>) -> ProspectsReport<'a> {
    let ranked = rank_prospects(&ctx.tam);
    let distribution = Priority::ALL
        .iter()
        .map(|&p| {
            let count = ranked.iter().filter(|s| s.priority() == p).count();
            (p, count, percent(count, ranked.len()))
        })
        .collect();

    let top = &ranked[..ranked.len().min(TOP_N)];
    let top_metrics = SegmentMetrics::of(top);
    let tam_metrics = SegmentMetrics::of(&ranked);
    let regions = region_shares(top, &ranked);

    ProspectsReport { distribution, top_metrics, tam_metrics, regions, ranked }
}

fn export_rows<'r>(scores: &'r [ProspectScore<'_>]) -> impl Iterator<Item = Vec<String>> + 'r {
    scores.iter().enumerate().map(|(i, s)| {
        let r = s.record;
        vec![
            (i + 1).to_string(),
            r.denomination.clone().unwrap_or_default(),
            r.siren.clone().unwrap_or_default(),
            r.city.clone().unwrap_or_default(),
            r.postal_code.clone().unwrap_or_default(),
            r.region_name().to_string(),
            r.headcount.unwrap_or(0).to_string(),
            format!("{:.0}", r.trainees.unwrap_or(0.0)),
            r.main_specialty().unwrap_or("Non renseigné").to_string(),
            format!("{:.1}", s.total()),
            s.priority().emoji().to_string(),
            format!("{:.1}", r.production_estimee()),
            String::new(),
            String::new(),
            String::new(),
            String::new(),
        ]
    })
}

const EXPORT_HEADERS: [&str; 16] = [
    "Rang",
    "Dénomination",
    "SIREN",
    "Ville",
    "CP",
    "Région",
    "Effectif",
    "Stagiaires",
    "Spécialité",
    "Score",
    "Priorité",
    "Production_est",
    "Email",
    "LinkedIn",
    "Statut",
    "Notes",
];

pub fn write(report: &ProspectsReport<'_>, writer: &mut ReportWriter) -> AppResult<()> {
    let top = report.top();
    let count = |p: Priority| report.distribution.iter().find(|(q, _, _)| *q == p).map_or(0, |d| d.1);

    let mut doc = MarkdownDoc::new("Top 500 prospects scorés");
    doc.heading(2, "Synthèse")
        .bullet(format!("Base TAM qualifiée : **{}** organismes", format_count(report.ranked.len())))
        .bullet(format!("Prospects priorisés (Top {}) : **{}**", TOP_N, format_count(top.len())))
        .bullet(format!(
            "Distribution scoring TAM : 🔴 {} | 🟠 {} | 🟡 {}",
            format_count(count(Priority::TresHaute)),
            format_count(count(Priority::Haute)),
            format_count(count(Priority::Moyenne)),
        ))
        .blank();

    let rows = report.distribution.iter().map(|(p, n, share)| {
        vec![
            format!("{} {}", p.emoji(), p.label()),
            p.range().to_string(),
            format_count(*n),
            format_percent(*share),
            p.interpretation().to_string(),
        ]
    });
    doc.heading(2, "Distribution des scores TAM")
        .table(&["Priorité", "Score", "OF", "% TAM", "Interprétation"], rows);

    let (t, m) = (&report.top_metrics, &report.tam_metrics);
    let rows = vec![
        vec![
            "Score moyen".to_string(),
            format!("{:.1}", t.score_mean),
            format!("{:.1}", m.score_mean),
            format!("{:+.1} pts", t.score_mean - m.score_mean),
        ],
        vec![
            "Effectif moyen".to_string(),
            format!("{:.2}", t.headcount_mean),
            format!("{:.2}", m.headcount_mean),
            format!("{:+.2} form", t.headcount_mean - m.headcount_mean),
        ],
        vec![
            "Stagiaires moyen".to_string(),
            format!("{:.0}", t.trainees_mean),
            format!("{:.0}", m.trainees_mean),
            format!("{:+.0}/an", t.trainees_mean - m.trainees_mean),
        ],
        vec![
            "% Soft skills".to_string(),
            format_percent(t.soft_share),
            format_percent(m.soft_share),
            format!("{:+.1} pp", t.soft_share - m.soft_share),
        ],
        vec![
            "% IDF/AURA/PACA".to_string(),
            format_percent(t.primary_region_share),
            format_percent(m.primary_region_share),
            format!("{:+.1} pp", t.primary_region_share - m.primary_region_share),
        ],
        vec![
            "Production est.".to_string(),
            format!("{:.1}", t.production_mean),
            format!("{:.1}", m.production_mean),
            format!("{:+.1} livr/mois", t.production_mean - m.production_mean),
        ],
    ];
    doc.heading(2, "Profil Top 500 vs TAM")
        .table(&["Métrique", "Top 500", "TAM général", "Enrichissement"], rows);

    doc.heading(2, "Top 500 prospects prioritaires")
        .paragraph("Export complet dans `prospects_top500.csv`, Top 100 à enrichir dans `prospects_top100.csv`.");

    let rows = report.regions.iter().map(|r| {
        vec![
            r.name.to_string(),
            format_percent(r.top_share),
            format_percent(r.tam_share),
            r.opportunity.label().to_string(),
        ]
    });
    doc.heading(2, "Répartition géographique (Top 500)")
        .table(&["Région", "% Top 500", "% TAM", "Opportunité"], rows);

    let rows = Priority::ALL.iter().filter_map(|p| {
        let (actions, timeline) = p.pipeline()?;
        Some(vec![
            format!("{} {}", p.emoji(), p.label()),
            p.range().to_string(),
            format_count(count(*p)),
            actions.to_string(),
            timeline.to_string(),
        ])
    });
    doc.heading(2, "Pipeline par priorité")
        .table(&["Priorité", "Score", "OF", "Actions", "Timeline"], rows);

    let tasks = [
        ["1. Recherche LinkedIn entreprise", "LinkedIn", "2 min", "⏳"],
        ["2. Identification décideur", "LinkedIn Sales Nav", "3 min", "⏳"],
        ["3. Email professionnel", "Hunter.io / LinkedIn", "2 min", "⏳"],
        ["4. Veille activité (posts récents)", "LinkedIn", "2 min", "⏳"],
        ["5. Événement déclencheur", "Google News / LinkedIn", "2 min", "⏳"],
    ];
    doc.heading(2, "Checklist enrichissement").table(
        &["Tâche", "Outil", "Temps", "Statut"],
        tasks.iter().map(|t| t.to_vec()),
    );
    writer.write_markdown("prospects_top500.md", &doc)?;

    writer.write_csv("prospects_top500.csv", &EXPORT_HEADERS, export_rows(top))?;
    writer.write_csv(
        "prospects_top100.csv",
        &EXPORT_HEADERS,
        export_rows(&top[..top.len().min(ENRICH_N)]),
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reports::fixtures::{of, with_specialties};

    #[test]
    fn test_sub_scores() {
        let record = with_specialties(
            of(5, 600.0, 11),
            &["Enseignement, formation", "Droit", "Langues vivantes"],
        );
        let score = ProspectScore::new(&record);
        assert_eq!(
            (score.headcount, score.soft_skills, score.activity, score.region, score.breadth),
            (25, 25, 20, 15, 15)
        );
        assert!((score.total() - 100.0).abs() < 1e-9);
        assert_eq!(score.priority(), Priority::TresHaute);

        let secondary = with_specialties(of(9, 10.0, 76), &["Droit", "Enseignement, formation"]);
        let score = ProspectScore::new(&secondary);
        assert_eq!(
            (score.headcount, score.soft_skills, score.activity, score.region, score.breadth),
            (10, 15, 2, 10, 10)
        );
    }

    #[test]
    fn test_priority_bands_have_no_gaps() {
        assert_eq!(Priority::from_score(90.0), Priority::TresHaute);
        assert_eq!(Priority::from_score(89.5), Priority::Haute);
        assert_eq!(Priority::from_score(74.9), Priority::Moyenne);
        assert_eq!(Priority::from_score(45.0), Priority::Basse);
        assert_eq!(Priority::from_score(44.99), Priority::HorsCible);
    }

    #[test]
    fn test_ranking_tie_breaks_on_trainees() {
        let records = vec![of(5, 60.0, 11), of(5, 90.0, 11), of(8, 10.0, 11)];
        let refs: Vec<&OfRecord> = records.iter().collect();
        let ranked = rank_prospects(&refs);
        // equal scores for the first two, more trainees wins
        assert_eq!(ranked[0].record.trainees, Some(90.0));
        assert_eq!(ranked[1].record.trainees, Some(60.0));
        assert_eq!(ranked[2].record.headcount, Some(8));
    }

    #[test]
    fn test_region_opportunity() {
        assert_eq!(Opportunity::from_gap(3.0), Opportunity::Elevee);
        assert_eq!(Opportunity::from_gap(-3.0), Opportunity::Faible);
        assert_eq!(Opportunity::from_gap(2.9), Opportunity::Moyenne);
    }

    #[test]
    fn test_build_caps_top_at_500() {
        let records: Vec<OfRecord> = (0..520).map(|i| of(3 + (i % 8) as u32, 100.0 + i as f64, 11)).collect();
        let ctx = ReportContext::new(&records, crate::services::tam::TamFilter::default());
        let report = build(&ctx);
        assert_eq!(report.ranked.len(), 520);
        assert_eq!(report.top().len(), 500);
        let total: usize = report.distribution.iter().map(|d| d.1).sum();
        assert_eq!(total, 520);
        assert_eq!(report.regions[0].name, "Île-de-France");
        assert_eq!(report.regions[0].opportunity, Opportunity::Moyenne);
    }
}
