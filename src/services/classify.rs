use std::collections::HashMap;
use std::fmt;

use once_cell::sync::Lazy;

/// Coarse grouping of NSF specialty labels. Declaration order is the display
/// order and the tie-break order wherever themes are ranked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MacroTheme {
    SoftSkills,
    TechDigital,
    CommerceGestion,
    Sante,
    Langues,
    Juridique,
    Industrie,
    Services,
    Securite,
    Autre,
}

impl MacroTheme {
    pub const ALL: [MacroTheme; 10] = [
        MacroTheme::SoftSkills,
        MacroTheme::TechDigital,
        MacroTheme::CommerceGestion,
        MacroTheme::Sante,
        MacroTheme::Langues,
        MacroTheme::Juridique,
        MacroTheme::Industrie,
        MacroTheme::Services,
        MacroTheme::Securite,
        MacroTheme::Autre,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            MacroTheme::SoftSkills => "Soft Skills",
            MacroTheme::TechDigital => "Tech/Digital",
            MacroTheme::CommerceGestion => "Commerce/Gestion",
            MacroTheme::Sante => "Santé",
            MacroTheme::Langues => "Langues",
            MacroTheme::Juridique => "Juridique",
            MacroTheme::Industrie => "Industrie",
            MacroTheme::Services => "Services",
            MacroTheme::Securite => "Sécurité",
            MacroTheme::Autre => "Autre",
        }
    }
}

impl fmt::Display for MacroTheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

static SPECIFIC_MAPPING: Lazy<HashMap<&'static str, MacroTheme>> = Lazy::new(|| {
    use MacroTheme::*;
    HashMap::from([
        ("enseignement, formation", SoftSkills),
        ("ressources humaines, gestion du personnel, gestion de l'emploi", SoftSkills),
        ("développement des capacités comportementales et relationnelles", SoftSkills),
        (
            "développement des capacités d'orientation, d'insertion ou de réinsertion sociales et professionnelles",
            SoftSkills,
        ),
        ("formations générales", Autre),
        ("pluridisciplinaire", Autre),
        ("finances, banque, assurances", CommerceGestion),
        ("banque et assurances", CommerceGestion),
        ("comptabilité, gestion", CommerceGestion),
        ("techniques de vente", CommerceGestion),
        ("commerce, vente", CommerceGestion),
        ("marketing", CommerceGestion),
        ("soins infirmiers", Sante),
        ("santé", Sante),
        ("sanitaire et social", Sante),
        ("travail social", Sante),
        ("action sociale", Sante),
        ("services domestiques", Services),
        ("services à la personne", Services),
        ("transport, manutention, magasinage", Services),
        ("logistique, transport", Services),
        ("bâtiment et travaux publics", Industrie),
        ("génie civil, construction, bois", Industrie),
        ("mécanique générale", Industrie),
        ("mécanique et structures métalliques", Industrie),
        ("maintenance industrielle", Industrie),
        ("électronique", TechDigital),
        ("électricité", Industrie),
        ("énergie", Industrie),
        ("informatique", TechDigital),
        ("programmation, développement", TechDigital),
        ("réseaux informatiques", TechDigital),
        ("langues vivantes", Langues),
        ("linguistique", Langues),
        ("traduction, interprétation", Langues),
        ("droit", Juridique),
        ("sécurité des biens et des personnes", Securite),
        ("sécurité, armée, police", Securite),
        ("hôtellerie, restauration", Services),
        ("tourisme", Services),
        ("esthétique, coiffure", Services),
        ("coiffure", Services),
        ("esthétique", Services),
        ("agriculture", Autre),
        ("agronomie", Autre),
        ("environnement", Autre),
    ])
});

/// Substring rules, tried in order after the exact table. First hit wins.
const KEYWORD_RULES: &[(MacroTheme, &[&str])] = &[
    (
        MacroTheme::TechDigital,
        &[
            "informatique", "numér", "programm", "réseau", "logiciel", "digital", "donnée",
            "cyber", "cloud", "web", "intelligence artificielle", "information",
        ],
    ),
    (
        MacroTheme::SoftSkills,
        &[
            "orientation", "ressources humaines", "gestion du personnel", "enseignement",
            "pédagog", "insertion", "comportement", "formation de formateurs",
        ],
    ),
    (
        MacroTheme::CommerceGestion,
        &[
            "vente", "commercial", "marketing", "gestion", "finance", "banque", "assurance",
            "comptabil", "achats", "immobilier",
        ],
    ),
    (
        MacroTheme::Sante,
        &["sant", "médic", "paraméd", "infirm", "social", "soin", "pharma", "handicap"],
    ),
    (MacroTheme::Langues, &["langue", "lingu", "tradu", "interpr"]),
    (
        MacroTheme::Juridique,
        &["droit", "jurid", "justice", "crimin", "sciences politiques"],
    ),
    (
        MacroTheme::Industrie,
        &[
            "mécan", "industri", "électric", "électrotech", "maintenance", "fabrication",
            "production", "chim", "bâtiment", "travaux publics", "construction", "métall",
            "plasturg", "energie",
        ],
    ),
    (
        MacroTheme::Services,
        &[
            "service", "transport", "logist", "coiff", "esthé", "restauration", "hôtel",
            "tourisme", "nettoyage", "sport", "animation", "santé animale", "assistan", "secrét",
        ],
    ),
    (
        MacroTheme::Securite,
        &["sécur", "police", "gendar", "sûreté", "pompier", "secours", "défense"],
    ),
];

const CATCH_ALL: &[&str] = &["formations générales", "non class"];

/// Maps a specialty label to its macro-theme. Total: blank or unknown labels
/// land in [`MacroTheme::Autre`].
pub fn classify_specialite(label: Option<&str>) -> MacroTheme {
    let normalized = match label.map(|l| l.trim().to_lowercase()) {
        Some(l) if !l.is_empty() => l,
        _ => return MacroTheme::Autre,
    };

    if let Some(theme) = SPECIFIC_MAPPING.get(normalized.as_str()) {
        return *theme;
    }
    if CATCH_ALL.iter().any(|phrase| normalized.contains(phrase)) {
        return MacroTheme::Autre;
    }
    KEYWORD_RULES
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| normalized.contains(k)))
        .map(|(theme, _)| *theme)
        .unwrap_or(MacroTheme::Autre)
}

pub fn is_soft_skill(label: Option<&str>) -> bool {
    classify_specialite(label) == MacroTheme::SoftSkills
}
