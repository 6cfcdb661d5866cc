use chrono::NaiveDate;
use smallvec::SmallVec;

use crate::services::classify::{classify_specialite, MacroTheme};
use crate::services::reference::region_name;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Specialty {
    pub code: Option<String>,
    pub label: Option<String>,
}

impl Specialty {
    pub fn theme(&self) -> MacroTheme {
        classify_specialite(self.label.as_deref())
    }
}

/// One training organisation snapshot, i.e. one data row of the export.
///
/// Every field is optional because every cell may be blank; aggregates skip
/// absent values instead of treating them as zero.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OfRecord {
    pub row: u32,
    pub numero: Option<String>,
    pub denomination: Option<String>,
    pub siren: Option<String>,
    pub siret: Option<String>,
    pub postal_code: Option<String>,
    pub department: Option<String>,
    pub city: Option<String>,
    pub street: Option<String>,
    pub region_code: Option<u32>,
    pub headcount: Option<u32>,
    pub trainees: Option<f64>,
    pub subcontracted_trainees: Option<f64>,
    pub certification: Option<String>,
    pub last_declaration: Option<NaiveDate>,
    pub declaration_year: Option<i32>,
    pub exercise_start: Option<NaiveDate>,
    pub exercise_end: Option<NaiveDate>,
    pub specialties: SmallVec<[Specialty; 3]>,
}

impl OfRecord {
    pub fn region_name(&self) -> &'static str {
        region_name(self.region_code)
    }

    /// First labelled specialty slot, so a blank slot 1 falls through to 2 or 3.
    pub fn main_specialty(&self) -> Option<&str> {
        self.specialties.iter().find_map(|s| s.label.as_deref())
    }

    /// Number of specialty slots that carry a label.
    pub fn specialty_count(&self) -> usize {
        self.specialties.iter().filter(|s| s.label.is_some()).count()
    }

    pub fn main_theme(&self) -> MacroTheme {
        classify_specialite(self.main_specialty())
    }

    pub fn themes(&self) -> impl Iterator<Item = MacroTheme> + '_ {
        self.specialties
            .iter()
            .filter(|s| s.label.is_some())
            .map(Specialty::theme)
    }

    /// Rough monthly document volume: trainees spread over 12 months and 20
    /// working days, plus two documents per trainer.
    pub fn production_estimee(&self) -> f64 {
        let trainees = self.trainees.unwrap_or(0.0);
        let headcount = self.headcount.unwrap_or(0) as f64;
        trainees / 12.0 / 20.0 + headcount * 2.0
    }

    pub fn has_trainees(&self) -> bool {
        self.trainees.map_or(false, |t| t > 0.0)
    }
}
