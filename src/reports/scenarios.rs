use super::ReportContext;
use crate::error::AppResult;
use crate::services::stats::safe_ratio;
use crate::services::writer::{format_count, format_float, MarkdownDoc, ReportWriter};

/// Monthly subscription price in euros.
pub const PRICE: f64 = 299.0;
/// MRR milestone tracked in the recap table.
pub const MRR_TARGET: f64 = 150_000.0;

const LEAD_CONVERSION: f64 = 0.15;
const COST_PER_LEAD: f64 = 70.0;
const SALARY: f64 = 4000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferralMode {
    None,
    /// A share of the previous month's new clients refer someone.
    PreviousNew,
    /// A share of the whole installed base refers someone.
    InstalledBase,
}

impl ReferralMode {
    pub const ALL: [ReferralMode; 3] = [ReferralMode::None, ReferralMode::PreviousNew, ReferralMode::InstalledBase];

    pub fn label(&self) -> &'static str {
        match self {
            ReferralMode::None => "Sans parrainage",
            ReferralMode::PreviousNew => "Nouveaux du mois précédent",
            ReferralMode::InstalledBase => "Base installée",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Scenario {
    pub name: &'static str,
    pub new_clients: Vec<f64>,
    pub churn_rate: f64,
    pub referral_rate: f64,
    pub referral_mode: ReferralMode,
}

impl Scenario {
    pub fn conservative() -> Self {
        Scenario {
            name: "Scénario A",
            new_clients: vec![10.0, 10.0, 15.0, 20.0, 25.0, 30.0, 25.0, 25.0, 25.0, 30.0, 30.0, 35.0],
            churn_rate: 0.03,
            referral_rate: 0.0,
            referral_mode: ReferralMode::None,
        }
    }

    pub fn realistic() -> Self {
        Scenario {
            name: "Scénario B",
            new_clients: vec![39.0, 41.0, 43.0, 45.0, 47.0, 49.0, 45.0, 45.0, 45.0, 42.0, 44.0, 44.0],
            churn_rate: 0.02,
            referral_rate: 0.05,
            referral_mode: ReferralMode::PreviousNew,
        }
    }

    pub fn aggressive() -> Self {
        Scenario {
            name: "Scénario C",
            new_clients: vec![65.0, 75.0, 85.0, 95.0, 105.0, 128.0],
            churn_rate: 0.015,
            referral_rate: 0.10,
            referral_mode: ReferralMode::PreviousNew,
        }
    }

    /// Same plan and rates, different referral source.
    pub fn with_referral_mode(mut self, referral_mode: ReferralMode) -> Self {
        self.referral_mode = referral_mode;
        self
    }

    /// Month by month: churn and referrals are computed on the state at
    /// the start of the month, then this month's acquisitions are added.
    pub fn simulate(&self, tam: usize) -> Vec<MonthState> {
        let mut clients = 0.0;
        let mut previous_new = 0.0;
        self.new_clients
            .iter()
            .enumerate()
            .map(|(i, &new_clients)| {
                let referrals = match self.referral_mode {
                    ReferralMode::None => 0.0,
                    ReferralMode::PreviousNew => previous_new * self.referral_rate,
                    ReferralMode::InstalledBase => clients * self.referral_rate,
                };
                let churn = clients * self.churn_rate;
                clients = clients - churn + new_clients + referrals;
                previous_new = new_clients;
                MonthState {
                    month: i as u32 + 1,
                    new_clients,
                    referrals,
                    churn,
                    clients,
                    mrr: clients * PRICE,
                    arr: clients * PRICE * 12.0,
                    penetration: safe_ratio(clients, tam as f64),
                }
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MonthState {
    pub month: u32,
    pub new_clients: f64,
    pub referrals: f64,
    pub churn: f64,
    pub clients: f64,
    pub mrr: f64,
    pub arr: f64,
    pub penetration: Option<f64>,
}

/// Acquisition cost of one month of the realistic plan.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Volumetry {
    pub month: u32,
    pub conversions: f64,
    pub leads: u64,
    pub lead_budget: f64,
    pub salespeople: u32,
    pub salaries: f64,
}

impl Volumetry {
    pub fn for_month(state: &MonthState) -> Self {
        let leads = (state.new_clients / LEAD_CONVERSION).ceil() as u64;
        let salespeople = match state.month {
            0..=2 => 2,
            3..=6 => 3,
            _ => 4,
        };
        Volumetry {
            month: state.month,
            conversions: state.new_clients,
            leads,
            lead_budget: leads as f64 * COST_PER_LEAD,
            salespeople,
            salaries: f64::from(salespeople) * SALARY,
        }
    }

    pub fn total_cost(&self) -> f64 {
        self.lead_budget + self.salaries
    }
}

#[derive(Debug, Clone)]
pub struct ScenarioRun {
    pub scenario: Scenario,
    pub months: Vec<MonthState>,
}

impl ScenarioRun {
    pub fn at(&self, month: u32) -> Option<&MonthState> {
        self.months.iter().find(|m| m.month == month)
    }

    /// First month whose MRR reaches the milestone, within the horizon.
    pub fn target_month(&self) -> Option<u32> {
        self.months.iter().find(|m| m.mrr >= MRR_TARGET).map(|m| m.month)
    }
}

#[derive(Debug, Clone)]
pub struct ScenariosReport {
    pub tam: usize,
    pub runs: Vec<ScenarioRun>,
    pub volumetry: Vec<Volumetry>,
    /// The realistic plan under each referral mode.
    pub referral_sensitivity: Vec<ScenarioRun>,
}

pub fn build(ctx: &ReportContext<'_>) -> ScenariosReport {
    let tam = ctx.funnel.tam();
    let runs: Vec<ScenarioRun> = [Scenario::conservative(), Scenario::realistic(), Scenario::aggressive()]
        .into_iter()
        .map(|scenario| ScenarioRun { months: scenario.simulate(tam), scenario })
        .collect();
    let volumetry = runs[1].months.iter().map(Volumetry::for_month).collect();
    let referral_sensitivity = ReferralMode::ALL
        .into_iter()
        .map(|mode| {
            let scenario = Scenario::realistic().with_referral_mode(mode);
            ScenarioRun { months: scenario.simulate(tam), scenario }
        })
        .collect();
    ScenariosReport { tam, runs, volumetry, referral_sensitivity }
}

/// Two decimals with trailing zeros dropped.
fn rounded(value: f64) -> String {
    let text = format!("{:.2}", value);
    text.trim_end_matches('0').trim_end_matches('.').to_string()
}

fn euros(value: f64) -> String {
    format!("{}€", format_float(Some(value), 0))
}

fn penetration(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |p| format!("{:.2}%", p * 100.0))
}

pub fn write(report: &ScenariosReport, writer: &mut ReportWriter) -> AppResult<()> {
    let mut doc = MarkdownDoc::new("Scénarios de croissance");
    doc.paragraph(format!(
        "TAM de référence : {} OF, abonnement {} par mois.",
        format_count(report.tam),
        euros(PRICE)
    ));

    for (i, run) in report.runs.iter().enumerate() {
        let rows = run.months.iter().map(|m| {
            vec![
                m.month.to_string(),
                rounded(m.new_clients),
                rounded(m.referrals),
                rounded(m.churn),
                rounded(m.clients),
                euros(m.mrr),
                euros(m.arr),
                penetration(m.penetration),
            ]
        });
        doc.heading(
            2,
            &format!("Tableau {} : Progression {} (M1-M{})", i + 1, run.scenario.name, run.months.len()),
        )
        .table(
            &["Mois", "Nouveaux", "Referrals", "Churn", "Total clients", "MRR", "ARR", "Pénétration TAM"],
            rows,
        );
    }

    let metric = |label: &str, f: &dyn Fn(&ScenarioRun) -> String| {
        let mut row = vec![label.to_string()];
        row.extend(report.runs.iter().map(f));
        row
    };
    let at = |month: u32, f: fn(&MonthState) -> String| {
        move |run: &ScenarioRun| run.at(month).map_or_else(|| "-".to_string(), f)
    };
    let rows = vec![
        metric("Atteinte 150K€", &|r| r.target_month().map_or_else(|| "-".to_string(), |m| format!("M{}", m))),
        metric("MRR M6", &at(6, |m| euros(m.mrr))),
        metric("MRR M12", &at(12, |m| euros(m.mrr))),
        metric("Clients M6", &at(6, |m| format!("{:.0}", m.clients))),
        metric("Clients M12", &at(12, |m| format!("{:.0}", m.clients))),
        metric("Pénétration fin d'horizon", &|r| {
            penetration(r.months.last().and_then(|m| m.penetration))
        }),
        metric("Churn mensuel", &|r| format!("{}%", rounded(r.scenario.churn_rate * 100.0))),
    ];
    let mut headers = vec!["Métrique"];
    headers.extend(report.runs.iter().map(|r| r.scenario.name));
    doc.heading(2, &format!("Tableau {} : Récapitulatif des scénarios", report.runs.len() + 1))
        .table(&headers, rows);

    let rows = report.volumetry.iter().map(|v| {
        vec![
            format!("M{}", v.month),
            format!("{:.1}", v.conversions),
            v.leads.to_string(),
            format!("{:.1}K€", v.lead_budget / 1000.0),
            v.salespeople.to_string(),
            format!("{:.0}K€", v.salaries / 1000.0),
            format!("{:.0}K€", v.total_cost() / 1000.0),
        ]
    });
    doc.heading(2, &format!("Tableau {} : Volumétrie Scénario B", report.runs.len() + 2)).table(
        &[
            "Mois",
            "Conv nécessaires",
            "Leads (conv 15%)",
            "Budget leads (70€)",
            "Commerciaux",
            "Salaires",
            "Total coûts",
        ],
        rows,
    );

    let rows = report.referral_sensitivity.iter().map(|run| {
        let referrals: f64 = run.months.iter().map(|m| m.referrals).sum();
        let last = run.months.last();
        vec![
            run.scenario.referral_mode.label().to_string(),
            format!("{:.0}", referrals),
            last.map_or_else(|| "-".to_string(), |m| format!("{:.0}", m.clients)),
            last.map_or_else(|| "-".to_string(), |m| euros(m.mrr)),
            run.target_month().map_or_else(|| "-".to_string(), |m| format!("M{}", m)),
        ]
    });
    doc.heading(2, &format!("Tableau {} : Sensibilité au parrainage (Scénario B)", report.runs.len() + 3))
        .table(&["Source des referrals", "Referrals cumulés", "Clients fin", "MRR fin", "Atteinte 150K€"], rows);
    writer.write_markdown("scenarios_croissance.md", &doc)?;

    let rows = report.runs[1].months.iter().zip(&report.volumetry).map(|(m, v)| {
        vec![
            m.month.to_string(),
            format!("{:.4}", m.new_clients),
            format!("{:.4}", m.referrals),
            format!("{:.4}", m.churn),
            format!("{:.4}", m.clients),
            format!("{:.2}", m.mrr),
            format!("{:.2}", m.arr),
            m.penetration.map(|p| format!("{:.6}", p)).unwrap_or_default(),
            v.leads.to_string(),
            format!("{:.2}", v.lead_budget),
            v.salespeople.to_string(),
            format!("{:.2}", v.salaries),
            format!("{:.2}", v.total_cost()),
        ]
    });
    writer.write_csv(
        "scenario_b_projection.csv",
        &[
            "Month",
            "New_clients",
            "Referrals",
            "Churn",
            "Total_clients",
            "MRR",
            "ARR",
            "TAM_penetration",
            "Leads_required",
            "Marketing_budget",
            "Salespeople",
            "Salary_cost",
            "Total_costs",
        ],
        rows,
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_realistic_first_months() {
        let months = Scenario::realistic().simulate(1000);
        // month 1: nothing to churn or refer yet
        assert!(close(months[0].clients, 39.0));
        assert!(close(months[0].referrals, 0.0));
        // month 2: 39 * 0.02 churn, 39 * 0.05 referrals
        assert!(close(months[1].churn, 0.78));
        assert!(close(months[1].referrals, 1.95));
        assert!(close(months[1].clients, 39.0 - 0.78 + 41.0 + 1.95));
        assert!(close(months[1].mrr, months[1].clients * PRICE));
        assert_eq!(months[0].penetration, Some(0.039));
    }

    #[test]
    fn test_installed_base_referrals() {
        let scenario = Scenario {
            name: "base",
            new_clients: vec![100.0, 0.0],
            churn_rate: 0.0,
            referral_rate: 0.1,
            referral_mode: ReferralMode::InstalledBase,
        };
        let months = scenario.simulate(0);
        assert!(close(months[1].referrals, 10.0));
        assert!(close(months[1].clients, 110.0));
        assert_eq!(months[1].penetration, None);
    }

    #[test]
    fn test_referral_sensitivity_covers_every_mode() {
        let records = Vec::new();
        let ctx = ReportContext::new(&records, crate::services::tam::TamFilter::default());
        let report = build(&ctx);

        let modes: Vec<ReferralMode> =
            report.referral_sensitivity.iter().map(|r| r.scenario.referral_mode).collect();
        assert_eq!(modes, ReferralMode::ALL.to_vec());
        let end = |i: usize| report.referral_sensitivity[i].months.last().unwrap().clients;
        // the installed base outgrows last month's acquisitions as a referral source
        assert!(end(0) < end(1));
        assert!(end(1) < end(2));
        assert_eq!(report.referral_sensitivity[1].months, report.runs[1].months);
    }

    #[test]
    fn test_volumetry_staffing() {
        let state = |month, new_clients| MonthState {
            month,
            new_clients,
            referrals: 0.0,
            churn: 0.0,
            clients: 0.0,
            mrr: 0.0,
            arr: 0.0,
            penetration: None,
        };
        let v = Volumetry::for_month(&state(1, 39.0));
        assert_eq!(v.leads, 260);
        assert!(close(v.lead_budget, 18_200.0));
        assert_eq!(v.salespeople, 2);
        assert!(close(v.total_cost(), 26_200.0));
        assert_eq!(Volumetry::for_month(&state(6, 49.0)).salespeople, 3);
        assert_eq!(Volumetry::for_month(&state(7, 45.0)).salespeople, 4);
    }

    #[test]
    fn test_rounded_trims_zeros() {
        assert_eq!(rounded(39.0), "39");
        assert_eq!(rounded(0.78), "0.78");
        assert_eq!(rounded(1.5), "1.5");
    }

    #[test]
    fn test_target_month() {
        let run = ScenarioRun { months: Scenario::aggressive().simulate(8612), scenario: Scenario::aggressive() };
        let reached = run.target_month().unwrap();
        assert!(run.at(reached).unwrap().mrr >= MRR_TARGET);
        assert!(run.at(reached - 1).map_or(true, |m| m.mrr < MRR_TARGET));
    }
}
