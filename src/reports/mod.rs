pub mod departements;
pub mod dormants;
pub mod effectifs;
pub mod haute_activite;
pub mod maturite;
pub mod polyvalence;
pub mod prospects;
pub mod qualite;
pub mod reseaux;
pub mod scenarios;
pub mod specialites;
pub mod tam;
pub mod temporel;

use std::fmt;
use std::str::FromStr;

use crate::error::{AppError, AppResult};
use crate::models::OfRecord;
use crate::services::tam::{TamFilter, TamFunnel};
use crate::services::writer::ReportWriter;

/// Parsed base plus the qualified subset, computed once and shared by every
/// report of a run.
pub struct ReportContext<'a> {
    pub records: &'a [OfRecord],
    pub filter: TamFilter,
    pub tam: Vec<&'a OfRecord>,
    pub funnel: TamFunnel,
}

impl<'a> ReportContext<'a> {
    pub fn new(records: &'a [OfRecord], filter: TamFilter) -> Self {
        let tam = filter.select(records);
        let funnel = filter.funnel(records);
        tracing::info!(
            "TAM funnel: base {} -> headcount {}..={} {} -> certified {} -> active {}",
            funnel.base,
            filter.min_headcount,
            filter.max_headcount,
            funnel.headcount_in_range,
            funnel.certified,
            funnel.active
        );
        Self { records, filter, tam, funnel }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReportKind {
    Tam,
    Effectifs,
    Departements,
    Specialites,
    Reseaux,
    Dormants,
    Prospects,
    Temporel,
    Scenarios,
    Qualite,
    Maturite,
    HauteActivite,
    Polyvalence,
}

impl ReportKind {
    pub const ALL: [ReportKind; 13] = [
        ReportKind::Tam,
        ReportKind::Effectifs,
        ReportKind::Departements,
        ReportKind::Specialites,
        ReportKind::Reseaux,
        ReportKind::Dormants,
        ReportKind::Prospects,
        ReportKind::Temporel,
        ReportKind::Scenarios,
        ReportKind::Qualite,
        ReportKind::Maturite,
        ReportKind::HauteActivite,
        ReportKind::Polyvalence,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ReportKind::Tam => "tam",
            ReportKind::Effectifs => "effectifs",
            ReportKind::Departements => "departements",
            ReportKind::Specialites => "specialites",
            ReportKind::Reseaux => "reseaux",
            ReportKind::Dormants => "dormants",
            ReportKind::Prospects => "prospects",
            ReportKind::Temporel => "temporel",
            ReportKind::Scenarios => "scenarios",
            ReportKind::Qualite => "qualite",
            ReportKind::Maturite => "maturite",
            ReportKind::HauteActivite => "haute_activite",
            ReportKind::Polyvalence => "polyvalence",
        }
    }

    pub fn run(&self, ctx: &ReportContext<'_>, writer: &mut ReportWriter) -> AppResult<()> {
        match self {
            ReportKind::Tam => tam::write(&tam::build(ctx), writer),
            ReportKind::Effectifs => effectifs::write(&effectifs::build(ctx), writer),
            ReportKind::Departements => departements::write(&departements::build(ctx), writer),
            ReportKind::Specialites => specialites::write(&specialites::build(ctx), writer),
            ReportKind::Reseaux => reseaux::write(&reseaux::build(ctx), writer),
            ReportKind::Dormants => dormants::write(&dormants::build(ctx), writer),
            ReportKind::Prospects => prospects::write(&prospects::build(ctx), writer),
            ReportKind::Temporel => temporel::write(&temporel::build(ctx), writer),
            ReportKind::Scenarios => scenarios::write(&scenarios::build(ctx), writer),
            ReportKind::Qualite => qualite::write(&qualite::build(ctx), writer),
            ReportKind::Maturite => maturite::write(&maturite::build(ctx), writer),
            ReportKind::HauteActivite => haute_activite::write(&haute_activite::build(ctx), writer),
            ReportKind::Polyvalence => polyvalence::write(&polyvalence::build(ctx), writer),
        }
    }
}

impl fmt::Display for ReportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ReportKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_lowercase();
        ReportKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.name() == name)
            .ok_or_else(|| AppError::InvalidConfig(format!("unknown report '{}'", s.trim())))
    }
}

/// Runs `kinds` in order. A failing report stops the run.
pub fn run_reports(
    kinds: &[ReportKind],
    ctx: &ReportContext<'_>,
    writer: &mut ReportWriter,
) -> AppResult<()> {
    for kind in kinds {
        let start = std::time::Instant::now();
        tracing::info!("Running report {}", kind);
        kind.run(ctx, writer)?;
        tracing::info!("Report {} done in {:?}", kind, start.elapsed());
    }
    Ok(())
}
