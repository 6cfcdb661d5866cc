//! Static geographic reference data. Built once, never mutated.

use std::collections::HashMap;

use once_cell::sync::Lazy;

pub const UNKNOWN_REGION: &str = "Autres DOM-TOM";

static REGION_NAMES: Lazy<HashMap<u32, &'static str>> = Lazy::new(|| {
    HashMap::from([
        (11, "Île-de-France"),
        (24, "Centre-Val de Loire"),
        (27, "Bourgogne-Franche-Comté"),
        (28, "Normandie"),
        (32, "Hauts-de-France"),
        (44, "Grand Est"),
        (52, "Pays de la Loire"),
        (53, "Bretagne"),
        (75, "Nouvelle-Aquitaine"),
        (76, "Occitanie"),
        (84, "Auvergne-Rhône-Alpes"),
        (93, "Provence-Alpes-Côte d'Azur"),
        (94, "Corse"),
        (1, "Guadeloupe"),
        (2, "Martinique"),
        (3, "Guyane"),
        (4, "La Réunion"),
        (6, "Mayotte"),
        (905, "Hors territoire (Etranger/Monaco)"),
        (975, "Saint-Pierre-et-Miquelon"),
        (977, "Saint-Barthélemy"),
        (978, "Saint-Martin"),
        (986, "Wallis-et-Futuna"),
        (987, "Polynésie française"),
        (988, "Nouvelle-Calédonie"),
        (989, "Îles de Clipperton"),
    ])
});

/// Mainland regions, largest markets first. Tables that list regions in a
/// fixed order use this one and append whatever else shows up.
pub const REGION_ORDER: [u32; 13] = [11, 84, 76, 93, 75, 44, 52, 32, 53, 28, 27, 24, 94];

pub const PRIMARY_REGIONS: [&str; 3] = [
    "Île-de-France",
    "Auvergne-Rhône-Alpes",
    "Provence-Alpes-Côte d'Azur",
];

pub const SECONDARY_REGIONS: [&str; 3] = ["Occitanie", "Nouvelle-Aquitaine", "Grand Est"];

/// Overseas departments reported in their own table.
pub const OVERSEAS_DEPARTMENTS: [&str; 7] = ["971", "972", "973", "974", "976", "987", "988"];

static DEPARTMENT_NAMES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("01", "Ain"),
        ("02", "Aisne"),
        ("03", "Allier"),
        ("04", "Alpes-de-Haute-Provence"),
        ("05", "Hautes-Alpes"),
        ("06", "Alpes-Maritimes"),
        ("07", "Ardèche"),
        ("08", "Ardennes"),
        ("09", "Ariège"),
        ("10", "Aube"),
        ("11", "Aude"),
        ("12", "Aveyron"),
        ("13", "Bouches-du-Rhône"),
        ("14", "Calvados"),
        ("15", "Cantal"),
        ("16", "Charente"),
        ("17", "Charente-Maritime"),
        ("18", "Cher"),
        ("19", "Corrèze"),
        ("2A", "Corse-du-Sud"),
        ("2B", "Haute-Corse"),
        ("21", "Côte-d'Or"),
        ("22", "Côtes-d'Armor"),
        ("23", "Creuse"),
        ("24", "Dordogne"),
        ("25", "Doubs"),
        ("26", "Drôme"),
        ("27", "Eure"),
        ("28", "Eure-et-Loir"),
        ("29", "Finistère"),
        ("30", "Gard"),
        ("31", "Haute-Garonne"),
        ("32", "Gers"),
        ("33", "Gironde"),
        ("34", "Hérault"),
        ("35", "Ille-et-Vilaine"),
        ("36", "Indre"),
        ("37", "Indre-et-Loire"),
        ("38", "Isère"),
        ("39", "Jura"),
        ("40", "Landes"),
        ("41", "Loir-et-Cher"),
        ("42", "Loire"),
        ("43", "Haute-Loire"),
        ("44", "Loire-Atlantique"),
        ("45", "Loiret"),
        ("46", "Lot"),
        ("47", "Lot-et-Garonne"),
        ("48", "Lozère"),
        ("49", "Maine-et-Loire"),
        ("50", "Manche"),
        ("51", "Marne"),
        ("52", "Haute-Marne"),
        ("53", "Mayenne"),
        ("54", "Meurthe-et-Moselle"),
        ("55", "Meuse"),
        ("56", "Morbihan"),
        ("57", "Moselle"),
        ("58", "Nièvre"),
        ("59", "Nord"),
        ("60", "Oise"),
        ("61", "Orne"),
        ("62", "Pas-de-Calais"),
        ("63", "Puy-de-Dôme"),
        ("64", "Pyrénées-Atlantiques"),
        ("65", "Hautes-Pyrénées"),
        ("66", "Pyrénées-Orientales"),
        ("67", "Bas-Rhin"),
        ("68", "Haut-Rhin"),
        ("69", "Rhône"),
        ("70", "Haute-Saône"),
        ("71", "Saône-et-Loire"),
        ("72", "Sarthe"),
        ("73", "Savoie"),
        ("74", "Haute-Savoie"),
        ("75", "Paris"),
        ("76", "Seine-Maritime"),
        ("77", "Seine-et-Marne"),
        ("78", "Yvelines"),
        ("79", "Deux-Sèvres"),
        ("80", "Somme"),
        ("81", "Tarn"),
        ("82", "Tarn-et-Garonne"),
        ("83", "Var"),
        ("84", "Vaucluse"),
        ("85", "Vendée"),
        ("86", "Vienne"),
        ("87", "Haute-Vienne"),
        ("88", "Vosges"),
        ("89", "Yonne"),
        ("90", "Territoire de Belfort"),
        ("91", "Essonne"),
        ("92", "Hauts-de-Seine"),
        ("93", "Seine-Saint-Denis"),
        ("94", "Val-de-Marne"),
        ("95", "Val-d'Oise"),
        ("971", "Guadeloupe"),
        ("972", "Martinique"),
        ("973", "Guyane"),
        ("974", "La Réunion"),
        ("975", "Saint-Pierre-et-Miquelon"),
        ("976", "Mayotte"),
        ("977", "Saint-Barthélemy"),
        ("978", "Saint-Martin"),
        ("986", "Wallis-et-Futuna"),
        ("987", "Polynésie française"),
        ("988", "Nouvelle-Calédonie"),
        ("989", "Île de Clipperton"),
        ("990", "Monaco"),
    ])
});

pub fn region_name(code: Option<u32>) -> &'static str {
    code.and_then(|c| REGION_NAMES.get(&c).copied())
        .unwrap_or(UNKNOWN_REGION)
}

/// Department display name, falling back to the code itself.
pub fn department_name(code: &str) -> &str {
    DEPARTMENT_NAMES.get(code).copied().unwrap_or(code)
}

pub fn is_overseas_department(code: &str) -> bool {
    code.len() == 3 && (code.starts_with("97") || code.starts_with("98"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionTier {
    Primary,
    Secondary,
    Other,
}

pub fn region_tier(name: &str) -> RegionTier {
    if PRIMARY_REGIONS.contains(&name) {
        RegionTier::Primary
    } else if SECONDARY_REGIONS.contains(&name) {
        RegionTier::Secondary
    } else {
        RegionTier::Other
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_name_fallback() {
        assert_eq!(region_name(Some(11)), "Île-de-France");
        assert_eq!(region_name(Some(4)), "La Réunion");
        assert_eq!(region_name(Some(999)), UNKNOWN_REGION);
        assert_eq!(region_name(None), UNKNOWN_REGION);
    }

    #[test]
    fn test_department_name() {
        assert_eq!(department_name("2A"), "Corse-du-Sud");
        assert_eq!(department_name("974"), "La Réunion");
        assert_eq!(department_name("XX"), "XX");
        assert!(is_overseas_department("971"));
        assert!(!is_overseas_department("75"));
    }

    #[test]
    fn test_region_order_is_all_named() {
        for code in REGION_ORDER {
            assert_ne!(region_name(Some(code)), UNKNOWN_REGION);
        }
        assert_eq!(region_tier("Grand Est"), RegionTier::Secondary);
        assert_eq!(region_tier("Bretagne"), RegionTier::Other);
    }
}
