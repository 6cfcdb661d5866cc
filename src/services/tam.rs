use serde::Serialize;

use crate::config::CertificationRule;
use crate::models::OfRecord;

/// The target-market predicate: trainer headcount within bounds, certified
/// for training actions, and at least one declared trainee.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TamFilter {
    pub min_headcount: u32,
    pub max_headcount: u32,
    pub rule: CertificationRule,
}

impl Default for TamFilter {
    fn default() -> Self {
        Self::new(CertificationRule::default())
    }
}

impl TamFilter {
    pub fn new(rule: CertificationRule) -> Self {
        Self { min_headcount: 3, max_headcount: 10, rule }
    }

    pub fn headcount_in_range(&self, record: &OfRecord) -> bool {
        record
            .headcount
            .map_or(false, |h| (self.min_headcount..=self.max_headcount).contains(&h))
    }

    pub fn is_certified(&self, record: &OfRecord) -> bool {
        self.rule.is_certified(record.certification.as_deref())
    }

    pub fn is_tam(&self, record: &OfRecord) -> bool {
        self.headcount_in_range(record) && self.is_certified(record) && record.has_trainees()
    }

    /// Qualified records, in input order.
    pub fn select<'a>(&self, records: &'a [OfRecord]) -> Vec<&'a OfRecord> {
        records.iter().filter(|r| self.is_tam(r)).collect()
    }

    /// Record counts after each successive condition.
    pub fn funnel(&self, records: &[OfRecord]) -> TamFunnel {
        let in_range: Vec<&OfRecord> = records.iter().filter(|r| self.headcount_in_range(r)).collect();
        let certified: Vec<&OfRecord> = in_range.iter().copied().filter(|r| self.is_certified(r)).collect();
        let active = certified.iter().filter(|r| r.has_trainees()).count();

        TamFunnel {
            base: records.len(),
            headcount_in_range: in_range.len(),
            certified: certified.len(),
            active,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TamFunnel {
    pub base: usize,
    pub headcount_in_range: usize,
    pub certified: usize,
    pub active: usize,
}

impl TamFunnel {
    pub fn tam(&self) -> usize {
        self.active
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(headcount: Option<u32>, certified: bool, trainees: Option<f64>) -> OfRecord {
        OfRecord {
            headcount,
            certification: certified.then(|| "1".to_string()),
            trainees,
            ..Default::default()
        }
    }

    #[test]
    fn test_headcount_boundaries() {
        let filter = TamFilter::default();
        assert!(filter.is_tam(&record(Some(3), true, Some(1.0))));
        assert!(filter.is_tam(&record(Some(10), true, Some(1.0))));
        assert!(!filter.is_tam(&record(Some(2), true, Some(1.0))));
        assert!(!filter.is_tam(&record(Some(11), true, Some(1.0))));
        assert!(!filter.is_tam(&record(None, true, Some(1.0))));
    }

    #[test]
    fn test_certification_and_activity_required() {
        let filter = TamFilter::default();
        assert!(!filter.is_tam(&record(Some(5), false, Some(10.0))));
        assert!(!filter.is_tam(&record(Some(5), true, Some(0.0))));
        assert!(!filter.is_tam(&record(Some(5), true, None)));
    }

    #[test]
    fn test_select_preserves_order_and_funnel_counts() {
        let records = vec![
            record(Some(5), true, Some(3.0)),
            record(Some(1), true, Some(3.0)),
            record(Some(4), false, Some(3.0)),
            record(Some(8), true, Some(0.0)),
            record(Some(9), true, Some(40.0)),
        ];
        let filter = TamFilter::default();
        let selected = filter.select(&records);
        assert_eq!(selected.len(), 2);
        assert_eq!(selected[0].headcount, Some(5));
        assert_eq!(selected[1].headcount, Some(9));

        let funnel = filter.funnel(&records);
        assert_eq!(
            funnel,
            TamFunnel { base: 5, headcount_in_range: 4, certified: 3, active: 2 }
        );
        assert_eq!(funnel.tam(), selected.len());
    }

    #[test]
    fn test_rule_changes_membership() {
        let mut rec = record(Some(5), false, Some(3.0));
        rec.certification = Some("oui".to_string());
        assert!(TamFilter::new(CertificationRule::Present).is_tam(&rec));
        assert!(!TamFilter::new(CertificationRule::EqualsOne).is_tam(&rec));
        assert!(TamFilter::new(CertificationRule::Truthy).is_tam(&rec));
    }
}
