use std::collections::HashMap;

use super::ReportContext;
use crate::error::AppResult;
use crate::models::OfRecord;
use crate::services::parser::normalize_city_key;
use crate::services::reference::{department_name, OVERSEAS_DEPARTMENTS};
use crate::services::stats::{mean, percent};
use crate::services::writer::{format_count, format_float, format_percent, MarkdownDoc, ReportWriter};

/// Metropolitan clusters of neighbouring departments.
const CLUSTERS: [(&str, &[&str]); 7] = [
    ("Grand Paris", &["75", "92", "93", "94", "91", "78", "95", "77"]),
    ("Lyon Métropole", &["69", "01", "38", "42"]),
    ("Aix-Marseille-Provence", &["13", "83", "84"]),
    ("Toulouse & Occitanie Ouest", &["31", "32", "82", "81"]),
    ("Lille - Flandres", &["59", "62", "80"]),
    ("Bordeaux - Nouvelle Aquitaine", &["33", "24", "47", "40"]),
    ("Nantes - Bretagne Sud", &["44", "49", "56", "85"]),
];

/// Counts per city key, keeping the first spelling seen for display.
#[derive(Debug, Clone, Default)]
struct CityTally {
    order: Vec<String>,
    entries: HashMap<String, (String, usize)>,
}

impl CityTally {
    fn add(&mut self, raw: &str) {
        let key = normalize_city_key(Some(raw));
        if key.is_empty() {
            return;
        }
        let entry = self.entries.entry(key.clone()).or_insert_with(|| {
            self.order.push(key);
            (raw.trim().to_string(), 0)
        });
        entry.1 += 1;
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    /// Most frequent first; ties keep first-seen order.
    fn top(&self, n: usize) -> Vec<(String, usize)> {
        let mut all: Vec<(String, usize)> = self
            .order
            .iter()
            .filter_map(|k| self.entries.get(k).cloned())
            .collect();
        all.sort_by(|a, b| b.1.cmp(&a.1));
        all.truncate(n);
        all
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DepartmentRow {
    pub code: String,
    pub name: String,
    pub count: usize,
    pub share: f64,
    pub mean_trainees: Option<f64>,
    pub trainees_sum: f64,
    pub trainees_count: usize,
    pub top_cities: Vec<(String, usize)>,
    pub city_ratio: f64,
    pub completeness: f64,
    pub density: f64,
}

impl DepartmentRow {
    fn cities_label(&self) -> String {
        if self.top_cities.is_empty() {
            return "-".to_string();
        }
        self.top_cities
            .iter()
            .map(|(city, n)| format!("{} ({})", city, n))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CityRow {
    pub city: String,
    pub department: String,
    pub count: usize,
    pub mean_trainees: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClusterRow {
    pub name: &'static str,
    pub departments: String,
    pub count: usize,
    pub share: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoreRow {
    pub rank: usize,
    pub code: String,
    pub name: String,
    pub count: usize,
    pub score: f64,
    pub priority: &'static str,
}

#[derive(Debug, Clone)]
pub struct DepartementsReport {
    pub total: usize,
    pub without_department: usize,
    pub departments: Vec<DepartmentRow>,
    pub cities: Vec<CityRow>,
    pub overseas: Vec<DepartmentRow>,
    pub clusters: Vec<ClusterRow>,
    pub scores: Vec<ScoreRow>,
}

fn summarize(code: &str, records: &[&OfRecord], total: usize) -> DepartmentRow {
    let count = records.len();
    let mut cities = CityTally::default();
    let mut with_city = 0;
    for record in records {
        if let Some(city) = record.city.as_deref() {
            with_city += 1;
            cities.add(city);
        }
    }
    let trainees: Vec<f64> = records.iter().filter_map(|r| r.trainees).collect();
    let city_ratio = if count > 0 { with_city as f64 / count as f64 } else { 0.0 };
    let trainee_ratio = if count > 0 { trainees.len() as f64 / count as f64 } else { 0.0 };

    DepartmentRow {
        code: code.to_string(),
        name: department_name(code).to_string(),
        count,
        share: percent(count, total),
        mean_trainees: mean(&trainees),
        trainees_sum: trainees.iter().sum(),
        trainees_count: trainees.len(),
        top_cities: cities.top(3),
        city_ratio,
        completeness: 0.5 * (city_ratio + trainee_ratio),
        density: if cities.len() > 0 { count as f64 / cities.len() as f64 } else { 0.0 },
    }
}

fn priority_for_rank(rank: usize) -> &'static str {
    match rank {
        1..=10 => "🔴 HAUTE",
        11..=20 => "🟠 MOYENNE",
        21..=30 => "🟢 BASSE",
        _ => "",
    }
}

/// Weighted attractiveness: volume 0.35, mean trainees 0.25 (damped below
/// 50 observations), city density 0.20, completeness 0.20, all scaled down
/// for departments under 500 organisations.
pub fn score_departments(departments: &[DepartmentRow]) -> Vec<ScoreRow> {
    let max_of = |f: fn(&DepartmentRow) -> f64| departments.iter().map(f).fold(0.0_f64, f64::max);
    let max_count = max_of(|d| d.count as f64);
    let max_avg = max_of(|d| d.mean_trainees.unwrap_or(0.0));
    let max_density = max_of(|d| d.density);
    let norm = |value: f64, max: f64| if max > 0.0 { value / max } else { 0.0 };

    let mut scored: Vec<ScoreRow> = departments
        .iter()
        .map(|d| {
            let avg_weight = (d.trainees_count as f64 / 50.0).min(1.0);
            let norm_count = norm(d.count as f64, max_count);
            let norm_avg = norm(d.mean_trainees.unwrap_or(0.0), max_avg) * avg_weight;
            let norm_density = norm(d.density, max_density);
            let completeness = d.completeness * (0.5 + 0.5 * avg_weight);
            let size_factor = if d.count > 0 {
                0.5 + 0.5 * (d.count as f64 / 500.0).min(1.0)
            } else {
                0.0
            };
            let score = (0.35 * norm_count + 0.25 * norm_avg + 0.20 * norm_density + 0.20 * completeness)
                * size_factor;
            ScoreRow {
                rank: 0,
                code: d.code.clone(),
                name: d.name.clone(),
                count: d.count,
                score,
                priority: "",
            }
        })
        .collect();

    scored.sort_by(|a, b| b.score.total_cmp(&a.score));
    for (i, row) in scored.iter_mut().enumerate() {
        row.rank = i + 1;
        row.priority = priority_for_rank(row.rank);
    }
    scored
}

pub fn build(ctx: &ReportContext<'_>) -> DepartementsReport {
    let tam = &ctx.tam;
    let total = tam.len();

    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Vec<&OfRecord>> = HashMap::new();
    let mut without_department = 0;
    for record in tam.iter().copied() {
        match record.department.as_deref() {
            Some(code) => {
                if !groups.contains_key(code) {
                    order.push(code.to_string());
                }
                groups.entry(code.to_string()).or_default().push(record);
            }
            None => without_department += 1,
        }
    }

    let mut departments: Vec<DepartmentRow> = order
        .iter()
        .map(|code| summarize(code, &groups[code], total))
        .collect();
    departments.sort_by(|a, b| {
        b.count
            .cmp(&a.count)
            .then(b.mean_trainees.unwrap_or(0.0).total_cmp(&a.mean_trainees.unwrap_or(0.0)))
    });

    let mut city_groups: HashMap<(String, String), (String, Vec<f64>, usize)> = HashMap::new();
    let mut city_order: Vec<(String, String)> = Vec::new();
    for record in tam.iter().copied() {
        let (Some(department), Some(city)) = (record.department.as_deref(), record.city.as_deref()) else {
            continue;
        };
        let key = (normalize_city_key(Some(city)), department.to_string());
        let entry = city_groups.entry(key.clone()).or_insert_with(|| {
            city_order.push(key);
            (city.to_string(), Vec::new(), 0)
        });
        entry.2 += 1;
        entry.1.extend(record.trainees);
    }
    let mut cities: Vec<CityRow> = city_order
        .iter()
        .map(|key| {
            let (display, trainees, count) = &city_groups[key];
            CityRow {
                city: display.clone(),
                department: key.1.clone(),
                count: *count,
                mean_trainees: mean(trainees),
            }
        })
        .collect();
    cities.sort_by(|a, b| b.count.cmp(&a.count));
    cities.truncate(20);

    let mut overseas: Vec<DepartmentRow> = OVERSEAS_DEPARTMENTS
        .iter()
        .map(|code| {
            departments
                .iter()
                .find(|d| d.code == *code)
                .cloned()
                .unwrap_or_else(|| summarize(code, &[], total))
        })
        .collect();
    overseas.sort_by(|a, b| b.count.cmp(&a.count));

    let mut clusters: Vec<ClusterRow> = CLUSTERS
        .iter()
        .map(|(name, codes)| {
            let count = codes
                .iter()
                .filter_map(|c| groups.get(*c))
                .map(Vec::len)
                .sum();
            ClusterRow {
                name,
                departments: codes.join(", "),
                count,
                share: percent(count, total),
            }
        })
        .collect();
    clusters.sort_by(|a, b| b.count.cmp(&a.count));

    let scores = score_departments(&departments);

    DepartementsReport {
        total,
        without_department,
        departments,
        cities,
        overseas,
        clusters,
        scores,
    }
}

pub fn write(report: &DepartementsReport, writer: &mut ReportWriter) -> AppResult<()> {
    let mut doc = MarkdownDoc::new("Analyse départementale du TAM");
    doc.bullet(format!("OF TAM : {}", format_count(report.total)))
        .bullet(format!("Sans code postal exploitable : {}", format_count(report.without_department)))
        .blank();

    let rows = report.departments.iter().take(100).enumerate().map(|(i, d)| {
        vec![
            (i + 1).to_string(),
            d.code.clone(),
            d.name.clone(),
            format_count(d.count),
            format!("{:.2}%", d.share),
            format_percent(d.city_ratio * 100.0),
            format_float(d.mean_trainees, 1),
            d.cities_label(),
        ]
    });
    doc.heading(2, "Tableau 1 : Top départements").table(
        &[
            "Rang",
            "Dept",
            "Nom",
            "Nombre OF",
            "% TAM",
            "% fiches avec ville",
            "Stagiaires moyen",
            "Villes principales",
        ],
        rows,
    );

    let mut rows: Vec<Vec<String>> = report
        .overseas
        .iter()
        .map(|d| {
            vec![
                d.code.clone(),
                d.name.clone(),
                format_count(d.count),
                format!("{:.2}%", d.share),
                format_float(d.mean_trainees, 1),
                d.top_cities.first().map_or("-".to_string(), |(c, _)| c.clone()),
            ]
        })
        .collect();
    let dom_count: usize = report.overseas.iter().map(|d| d.count).sum();
    let dom_sum: f64 = report.overseas.iter().map(|d| d.trainees_sum).sum();
    let dom_n: usize = report.overseas.iter().map(|d| d.trainees_count).sum();
    rows.push(vec![
        "TOTAL".to_string(),
        "DOM-TOM".to_string(),
        format_count(dom_count),
        format!("{:.2}%", percent(dom_count, report.total)),
        format_float((dom_n > 0).then(|| dom_sum / dom_n as f64), 1),
        "-".to_string(),
    ]);
    doc.heading(2, "Tableau 2 : Outre-mer").table(
        &["Code", "Département", "Nombre OF", "% TAM", "Stagiaires moyen", "Ville principale"],
        rows,
    );

    let rows = report.cities.iter().enumerate().map(|(i, c)| {
        vec![
            (i + 1).to_string(),
            c.city.clone(),
            c.department.clone(),
            format_count(c.count),
            format_float(c.mean_trainees, 1),
        ]
    });
    doc.heading(2, "Tableau 3 : Top 20 villes")
        .table(&["Rang", "Ville", "Dept", "Nombre OF", "Stagiaires moyen"], rows);

    let rows = report.clusters.iter().map(|c| {
        vec![
            c.name.to_string(),
            c.departments.clone(),
            format_count(c.count),
            format!("{:.2}%", c.share),
        ]
    });
    doc.heading(2, "Tableau 4 : Clusters métropolitains")
        .table(&["Cluster", "Départements", "Nombre OF", "% TAM"], rows);

    let rows = report.scores.iter().take(30).map(|s| {
        vec![
            s.rank.to_string(),
            s.code.clone(),
            s.name.clone(),
            format_count(s.count),
            format!("{:.3}", s.score),
            s.priority.to_string(),
        ]
    });
    doc.heading(2, "Tableau 5 : Scoring départemental (top 30)")
        .table(&["Rang", "Dept", "Nom", "Nombre OF", "Score", "Priorité"], rows);
    writer.write_markdown("departements_analysis.md", &doc)?;

    let rows = report.scores.iter().map(|s| {
        vec![
            s.rank.to_string(),
            s.code.clone(),
            s.name.clone(),
            s.count.to_string(),
            format!("{:.4}", s.score),
            s.priority.to_string(),
        ]
    });
    writer.write_csv(
        "departements_scoring.csv",
        &["rang", "departement", "nom", "nombre_of", "score", "priorite"],
        rows,
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reports::fixtures::of;
    use crate::services::tam::TamFilter;

    fn located(department: &str, city: &str, trainees: f64) -> OfRecord {
        let mut record = of(5, trainees, 11);
        record.department = Some(department.to_string());
        record.city = Some(city.to_string());
        record
    }

    #[test]
    fn test_department_table_and_cities() {
        let records = vec![
            located("25", "Besançon", 10.0),
            located("25", "BESANCON", 30.0),
            located("25", "Pontarlier", 20.0),
            located("974", "Saint-Denis", 50.0),
            of(5, 10.0, 11),
        ];
        let ctx = ReportContext::new(&records, TamFilter::default());
        let report = build(&ctx);

        assert_eq!(report.without_department, 1);
        let doubs = &report.departments[0];
        assert_eq!(doubs.code, "25");
        assert_eq!(doubs.name, "Doubs");
        assert_eq!(doubs.count, 3);
        assert_eq!(doubs.top_cities[0], ("Besançon".to_string(), 2));
        assert!((doubs.density - 1.5).abs() < 1e-9);

        assert_eq!(report.cities[0].city, "Besançon");
        assert_eq!(report.cities[0].count, 2);
        assert_eq!(report.cities[0].mean_trainees, Some(20.0));

        assert_eq!(report.overseas.len(), OVERSEAS_DEPARTMENTS.len());
        assert_eq!(report.overseas[0].code, "974");
        assert_eq!(report.overseas[0].count, 1);
    }

    #[test]
    fn test_scores_rank_and_priority() {
        let records: Vec<OfRecord> = (0..40)
            .map(|i| located(&format!("{:02}", i + 1), "Ville", 10.0 + i as f64))
            .chain((0..5).map(|_| located("75", "Paris", 100.0)))
            .collect();
        let ctx = ReportContext::new(&records, TamFilter::default());
        let report = build(&ctx);

        assert_eq!(report.scores[0].code, "75");
        assert_eq!(report.scores[0].rank, 1);
        assert_eq!(report.scores[0].priority, "🔴 HAUTE");
        assert_eq!(report.scores[14].priority, "🟠 MOYENNE");
        assert_eq!(report.scores[25].priority, "🟢 BASSE");
        assert_eq!(report.scores[35].priority, "");
        assert!(report.scores.windows(2).all(|w| w[0].score >= w[1].score));
    }
}
