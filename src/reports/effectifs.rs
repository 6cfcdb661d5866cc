use super::ReportContext;
use crate::error::AppResult;
use crate::models::OfRecord;
use crate::services::stats::{mean, percent, percentile, sorted};
use crate::services::writer::{format_count, format_float, MarkdownDoc, ReportWriter};

const PERCENTILES: [(&str, f64); 7] = [
    ("P10", 0.10),
    ("P25", 0.25),
    ("P50", 0.50),
    ("P75", 0.75),
    ("P90", 0.90),
    ("P95", 0.95),
    ("P99", 0.99),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segment {
    SansFormateur,
    Solo,
    Duo,
    Cible,
    PmeFormation,
    GrandesStructures,
    TresGrandes,
    Geantes,
}

impl Segment {
    pub const ALL: [Segment; 8] = [
        Segment::SansFormateur,
        Segment::Solo,
        Segment::Duo,
        Segment::Cible,
        Segment::PmeFormation,
        Segment::GrandesStructures,
        Segment::TresGrandes,
        Segment::Geantes,
    ];

    pub fn of(headcount: u32) -> Self {
        match headcount {
            0 => Segment::SansFormateur,
            1 => Segment::Solo,
            2 => Segment::Duo,
            3..=10 => Segment::Cible,
            11..=20 => Segment::PmeFormation,
            21..=50 => Segment::GrandesStructures,
            51..=100 => Segment::TresGrandes,
            _ => Segment::Geantes,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Segment::SansFormateur => "Sans formateur",
            Segment::Solo => "Solo",
            Segment::Duo => "Duo",
            Segment::Cible => "Cible 3-10",
            Segment::PmeFormation => "PME formation",
            Segment::GrandesStructures => "Grandes structures",
            Segment::TresGrandes => "Très grandes",
            Segment::Geantes => "Géantes",
        }
    }

    pub fn range(&self) -> &'static str {
        match self {
            Segment::SansFormateur => "0",
            Segment::Solo => "1",
            Segment::Duo => "2",
            Segment::Cible => "3-10",
            Segment::PmeFormation => "11-20",
            Segment::GrandesStructures => "21-50",
            Segment::TresGrandes => "51-100",
            Segment::Geantes => "101+",
        }
    }

    pub fn interpretation(&self) -> &'static str {
        match self {
            Segment::SansFormateur => "Administratif uniquement",
            Segment::Solo => "Indépendants",
            Segment::Duo => "Binôme",
            Segment::Cible => "Sweet spot",
            Segment::PmeFormation => "Scale-up",
            Segment::GrandesStructures => "Entreprise",
            Segment::TresGrandes => "Groupe",
            Segment::Geantes => "Holding/Réseau",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DistributionRow {
    pub headcount: u32,
    pub count: usize,
    pub share: f64,
    pub cumulative: usize,
    pub cumulative_share: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SegmentRow {
    pub segment: Segment,
    pub count: usize,
    pub share: f64,
    pub mean_trainees: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct EffectifsReport {
    pub with_headcount: usize,
    pub without_headcount: usize,
    pub distribution: Vec<DistributionRow>,
    pub segments: Vec<SegmentRow>,
    pub tam_percentiles: Vec<(&'static str, Option<f64>)>,
    pub tam_mean_trainees: Option<f64>,
}

pub fn build(ctx: &ReportContext<'_>) -> EffectifsReport {
    let base: Vec<&OfRecord> = ctx.records.iter().filter(|r| r.headcount.is_some()).collect();
    let total = base.len();

    let mut counts = [0usize; 101];
    for record in &base {
        if let Some(h) = record.headcount.filter(|h| *h <= 100) {
            counts[h as usize] += 1;
        }
    }
    let mut cumulative = 0;
    let distribution = counts
        .iter()
        .enumerate()
        .map(|(h, &count)| {
            cumulative += count;
            DistributionRow {
                headcount: h as u32,
                count,
                share: percent(count, total),
                cumulative,
                cumulative_share: percent(cumulative, total),
            }
        })
        .collect();

    let segments = Segment::ALL
        .iter()
        .map(|&segment| {
            let members: Vec<&OfRecord> = base
                .iter()
                .copied()
                .filter(|r| r.headcount.map(Segment::of) == Some(segment))
                .collect();
            let trainees: Vec<f64> = members.iter().filter_map(|r| r.trainees).collect();
            SegmentRow {
                segment,
                count: members.len(),
                share: percent(members.len(), total),
                mean_trainees: mean(&trainees),
            }
        })
        .collect();

    let tam_trainees = sorted(&ctx.tam.iter().filter_map(|r| r.trainees).collect::<Vec<_>>());
    let tam_percentiles = PERCENTILES
        .iter()
        .map(|(label, p)| (*label, percentile(&tam_trainees, *p)))
        .collect();

    EffectifsReport {
        with_headcount: total,
        without_headcount: ctx.records.len() - total,
        distribution,
        segments,
        tam_percentiles,
        tam_mean_trainees: mean(&tam_trainees),
    }
}

pub fn write(report: &EffectifsReport, writer: &mut ReportWriter) -> AppResult<()> {
    let mut doc = MarkdownDoc::new("Analyse des effectifs formateurs");
    doc.bullet(format!("OF avec effectif renseigné : {}", format_count(report.with_headcount)))
        .bullet(format!("OF sans effectif : {}", format_count(report.without_headcount)))
        .blank();

    let rows = report.segments.iter().map(|row| {
        vec![
            row.segment.label().to_string(),
            row.segment.range().to_string(),
            format_count(row.count),
            format!("{:.2}%", row.share),
            format_float(row.mean_trainees, 0),
            row.segment.interpretation().to_string(),
        ]
    });
    doc.heading(2, "Segments par taille").table(
        &["Segment", "Tranche effectif", "Nombre OF", "% total", "Moyenne stagiaires", "Interprétation"],
        rows,
    );

    let rows = report.tam_percentiles.iter().map(|(label, value)| {
        vec![label.to_string(), format_float(*value, 0)]
    });
    doc.heading(2, "Stagiaires annuels du TAM (percentiles)")
        .table(&["Percentile", "Stagiaires"], rows)
        .paragraph(format!(
            "Moyenne TAM : {} stagiaires par OF.",
            format_float(report.tam_mean_trainees, 1)
        ));

    let rows = report.distribution.iter().map(|row| {
        vec![
            row.headcount.to_string(),
            format_count(row.count),
            format!("{:.2}%", row.share),
            format_count(row.cumulative),
            format!("{:.2}%", row.cumulative_share),
        ]
    });
    doc.heading(2, "Distribution 0-100 formateurs")
        .table(&["effectif", "nombre_OF", "% total", "cumul_OF", "cumul_%"], rows);
    writer.write_markdown("effectifs_analysis.md", &doc)?;

    let rows = report.distribution.iter().map(|row| {
        vec![
            row.headcount.to_string(),
            row.count.to_string(),
            format!("{:.6}", row.share),
            row.cumulative.to_string(),
            format!("{:.6}", row.cumulative_share),
        ]
    });
    writer.write_csv(
        "distribution_0_100.csv",
        &["effectif", "nombre_OF", "pct_total", "cumul_OF", "cumul_pct"],
        rows,
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reports::fixtures::of;
    use crate::services::tam::TamFilter;

    #[test]
    fn test_segment_bounds() {
        assert_eq!(Segment::of(0), Segment::SansFormateur);
        assert_eq!(Segment::of(3), Segment::Cible);
        assert_eq!(Segment::of(10), Segment::Cible);
        assert_eq!(Segment::of(11), Segment::PmeFormation);
        assert_eq!(Segment::of(100), Segment::TresGrandes);
        assert_eq!(Segment::of(101), Segment::Geantes);
    }

    #[test]
    fn test_distribution_and_segments() {
        let mut no_headcount = of(1, 5.0, 11);
        no_headcount.headcount = None;
        let records = vec![of(0, 0.0, 11), of(1, 10.0, 11), of(5, 100.0, 11), of(5, 300.0, 11), of(250, 9.0, 11), no_headcount];
        let ctx = ReportContext::new(&records, TamFilter::default());
        let report = build(&ctx);

        assert_eq!(report.with_headcount, 5);
        assert_eq!(report.without_headcount, 1);
        assert_eq!(report.distribution.len(), 101);
        assert_eq!(report.distribution[5].count, 2);
        assert_eq!(report.distribution[5].cumulative, 4);
        assert_eq!(report.distribution[100].cumulative, 4);

        let cible = report.segments.iter().find(|s| s.segment == Segment::Cible).unwrap();
        assert_eq!(cible.count, 2);
        assert_eq!(cible.mean_trainees, Some(200.0));
        let geantes = report.segments.iter().find(|s| s.segment == Segment::Geantes).unwrap();
        assert_eq!(geantes.count, 1);

        let p50 = report.tam_percentiles.iter().find(|(l, _)| *l == "P50").unwrap().1;
        assert_eq!(p50, Some(200.0));
    }
}
