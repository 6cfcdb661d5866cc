use serde::Deserialize;
use anyhow::Result;
use dotenvy::dotenv;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::AppError;
use crate::reports::ReportKind;

fn default_xlsx_path() -> PathBuf {
    PathBuf::from("OF 3-10.xlsx")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("analysis_outputs")
}

/// Which workbook reader feeds the parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReaderBackend {
    /// zip + XML pull parser over `xl/worksheets/sheet1.xml`, one row in memory at a time
    #[default]
    Stream,
    /// calamine, loads the first sheet range in one go (xls/xlsb/ods too)
    Calamine,
}

impl FromStr for ReaderBackend {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "stream" | "xlsx" => Ok(ReaderBackend::Stream),
            "calamine" => Ok(ReaderBackend::Calamine),
            other => Err(AppError::InvalidConfig(format!("unknown reader backend '{}'", other))),
        }
    }
}

/// How the `certifications.actionsDeFormation` cell is read as "Qualiopi
/// certified for training actions".
///
/// Historical extracts disagree: some treat any non-empty value as certified,
/// some require the literal `1`, some accept boolean-like words. The rule is
/// explicit configuration so the choice is visible in the run log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CertificationRule {
    /// Any non-empty cell value
    #[default]
    Present,
    /// Numeric value equal to 1
    EqualsOne,
    /// `1`, `true`, `vrai`, `oui`, `o`, `y`, `yes` (case-insensitive)
    Truthy,
}

impl CertificationRule {
    pub fn name(&self) -> &'static str {
        match self {
            CertificationRule::Present => "present",
            CertificationRule::EqualsOne => "equals_one",
            CertificationRule::Truthy => "truthy",
        }
    }

    pub fn is_certified(&self, value: Option<&str>) -> bool {
        let text = match value.map(str::trim) {
            Some(t) if !t.is_empty() && !t.eq_ignore_ascii_case("nan") => t,
            _ => return false,
        };
        match self {
            CertificationRule::Present => true,
            CertificationRule::EqualsOne => text
                .parse::<f64>()
                .map(|v| v == 1.0)
                .unwrap_or(false),
            CertificationRule::Truthy => matches!(
                text.to_lowercase().as_str(),
                "1" | "1.0" | "true" | "vrai" | "oui" | "o" | "y" | "yes"
            ),
        }
    }
}

impl FromStr for CertificationRule {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "present" => Ok(CertificationRule::Present),
            "equals_one" => Ok(CertificationRule::EqualsOne),
            "truthy" => Ok(CertificationRule::Truthy),
            other => Err(AppError::InvalidConfig(format!("unknown certification rule '{}'", other))),
        }
    }
}

/// Field name to header string. Columns are resolved by exact match against
/// row 1 of the worksheet, never by position.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ColumnSchema {
    pub numero: String,
    pub denomination: String,
    pub siren: String,
    pub siret: String,
    pub postal_code: String,
    pub city: String,
    pub street: String,
    pub region: String,
    pub certification: String,
    pub last_declaration: String,
    pub exercise_start: String,
    pub exercise_end: String,
    pub trainees: String,
    pub subcontracted_trainees: String,
    pub headcount: String,
    pub specialty_codes: [String; 3],
    pub specialty_labels: [String; 3],
}

impl Default for ColumnSchema {
    fn default() -> Self {
        let specialty = |kind: &str, n: usize| {
            format!("informationsDeclarees.specialitesDeFormation.{}Specialite{}", kind, n)
        };
        Self {
            numero: "numeroDeclarationActivite".to_string(),
            denomination: "denomination".to_string(),
            siren: "siren".to_string(),
            siret: "siretEtablissementDeclarant".to_string(),
            postal_code: "adressePhysiqueOrganismeFormation.codePostal".to_string(),
            city: "adressePhysiqueOrganismeFormation.ville".to_string(),
            street: "adressePhysiqueOrganismeFormation.voie".to_string(),
            region: "adressePhysiqueOrganismeFormation.codeRegion".to_string(),
            certification: "certifications.actionsDeFormation".to_string(),
            last_declaration: "informationsDeclarees.dateDerniereDeclaration".to_string(),
            exercise_start: "informationsDeclarees.debutExercice".to_string(),
            exercise_end: "informationsDeclarees.finExercice".to_string(),
            trainees: "informationsDeclarees.nbStagiaires".to_string(),
            subcontracted_trainees: "informationsDeclarees.nbStagiairesConfiesParUnAutreOF".to_string(),
            headcount: "informationsDeclarees.effectifFormateurs".to_string(),
            specialty_codes: [specialty("code", 1), specialty("code", 2), specialty("code", 3)],
            specialty_labels: [specialty("libelle", 1), specialty("libelle", 2), specialty("libelle", 3)],
        }
    }
}

impl ColumnSchema {
    /// Reads a JSON object overriding some or all header names.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, AppError> {
        let content = std::fs::read_to_string(path)?;
        let schema = serde_json::from_str(&content)?;
        Ok(schema)
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub xlsx_path: PathBuf,
    pub output_dir: PathBuf,
    pub reader: ReaderBackend,
    pub certification_rule: CertificationRule,
    pub reports: Vec<ReportKind>,
    pub schema: ColumnSchema,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            xlsx_path: default_xlsx_path(),
            output_dir: default_output_dir(),
            reader: ReaderBackend::default(),
            certification_rule: CertificationRule::default(),
            reports: ReportKind::ALL.to_vec(),
            schema: ColumnSchema::default(),
        }
    }
}

impl Config {
    pub fn new() -> Result<Self> {
        // Load .env file first
        dotenv().ok();

        let mut config = Config::default();

        if let Ok(path) = std::env::var("OF_XLSX_PATH") {
            config.xlsx_path = PathBuf::from(path);
        }
        if let Ok(dir) = std::env::var("OF_OUTPUT_DIR") {
            config.output_dir = PathBuf::from(dir);
        }
        if let Ok(reader) = std::env::var("OF_READER") {
            config.reader = reader.parse()?;
        }
        if let Ok(rule) = std::env::var("OF_CERTIFICATION_RULE") {
            config.certification_rule = rule.parse()?;
        }
        if let Ok(list) = std::env::var("OF_REPORTS") {
            config.reports = parse_report_list(&list)?;
        }
        if let Ok(path) = std::env::var("OF_SCHEMA_PATH") {
            config.schema = ColumnSchema::from_json_file(&path)?;
        }

        Ok(config)
    }
}

pub fn parse_report_list(list: &str) -> Result<Vec<ReportKind>, AppError> {
    let reports = list
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::parse)
        .collect::<Result<Vec<ReportKind>, AppError>>()?;

    if reports.is_empty() {
        return Err(AppError::InvalidConfig("OF_REPORTS names no report".to_string()));
    }
    Ok(reports)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_certification_rules() {
        assert!(CertificationRule::Present.is_certified(Some("2")));
        assert!(!CertificationRule::Present.is_certified(Some("  ")));
        assert!(!CertificationRule::Present.is_certified(None));
        assert!(!CertificationRule::Present.is_certified(Some("nan")));

        assert!(CertificationRule::EqualsOne.is_certified(Some("1")));
        assert!(CertificationRule::EqualsOne.is_certified(Some("1.0")));
        assert!(!CertificationRule::EqualsOne.is_certified(Some("2")));
        assert!(!CertificationRule::EqualsOne.is_certified(Some("oui")));

        assert!(CertificationRule::Truthy.is_certified(Some("Oui")));
        assert!(CertificationRule::Truthy.is_certified(Some("TRUE")));
        assert!(!CertificationRule::Truthy.is_certified(Some("non")));
    }

    #[test]
    fn test_default_schema_headers() {
        let schema = ColumnSchema::default();
        assert_eq!(schema.headcount, "informationsDeclarees.effectifFormateurs");
        assert_eq!(
            schema.specialty_labels[2],
            "informationsDeclarees.specialitesDeFormation.libelleSpecialite3"
        );
        assert_eq!(
            schema.specialty_codes[0],
            "informationsDeclarees.specialitesDeFormation.codeSpecialite1"
        );
    }

    #[test]
    fn test_partial_schema_override() {
        let schema: ColumnSchema =
            serde_json::from_str(r#"{"headcount": "effectif", "city": "ville"}"#).unwrap();
        assert_eq!(schema.headcount, "effectif");
        assert_eq!(schema.city, "ville");
        assert_eq!(schema.siren, "siren");
    }

    #[test]
    fn test_parse_enums() {
        assert_eq!("calamine".parse::<ReaderBackend>().unwrap(), ReaderBackend::Calamine);
        assert_eq!(" Stream ".parse::<ReaderBackend>().unwrap(), ReaderBackend::Stream);
        assert!("sqlite".parse::<ReaderBackend>().is_err());
        assert_eq!("equals_one".parse::<CertificationRule>().unwrap(), CertificationRule::EqualsOne);
    }

    #[test]
    fn test_parse_report_list() {
        let reports = parse_report_list("tam, prospects").unwrap();
        assert_eq!(reports, vec![ReportKind::Tam, ReportKind::Prospects]);
        assert!(parse_report_list(" , ").is_err());
        assert!(parse_report_list("tam,unknown").is_err());
    }

    #[test]
    fn test_default_config_runs_everything() {
        let config = Config::default();
        assert_eq!(config.reports.len(), ReportKind::ALL.len());
        assert_eq!(config.output_dir, PathBuf::from("analysis_outputs"));
    }
}
