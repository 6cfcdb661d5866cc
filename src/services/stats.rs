//! Small descriptive statistics over `f64` samples. Empty input yields `None`.

use std::collections::HashMap;

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

pub fn sorted(values: &[f64]) -> Vec<f64> {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    sorted
}

pub fn median(values: &[f64]) -> Option<f64> {
    percentile(&sorted(values), 0.5)
}

/// Linear interpolation between the two closest ranks of an already sorted
/// sample, `p` in `[0, 1]`.
pub fn percentile(sorted_values: &[f64], p: f64) -> Option<f64> {
    let (first, last) = (sorted_values.first()?, sorted_values.last()?);
    if p <= 0.0 {
        return Some(*first);
    }
    if p >= 1.0 {
        return Some(*last);
    }
    let k = (sorted_values.len() - 1) as f64 * p;
    let (f, c) = (k.floor(), k.ceil());
    if f == c {
        return Some(sorted_values[k as usize]);
    }
    Some(sorted_values[f as usize] * (c - k) + sorted_values[c as usize] * (k - f))
}

pub fn safe_ratio(numerator: f64, denominator: f64) -> Option<f64> {
    if denominator == 0.0 {
        None
    } else {
        Some(numerator / denominator)
    }
}

/// `part / total * 100`, or 0 when the total is empty.
pub fn percent(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64 * 100.0
    }
}

/// Most frequent value and its share, first seen on ties.
pub fn dominant<'a>(values: impl Iterator<Item = &'a str>) -> Option<(&'a str, f64)> {
    let mut order = Vec::new();
    let mut counts: HashMap<&str, usize> = HashMap::new();
    let mut total = 0;
    for value in values {
        total += 1;
        let count = counts.entry(value).or_default();
        if *count == 0 {
            order.push(value);
        }
        *count += 1;
    }
    let mut best: Option<(&str, usize)> = None;
    for value in order {
        let n = counts[value];
        if best.map_or(true, |(_, b)| n > b) {
            best = Some((value, n));
        }
    }
    best.map(|(value, n)| (value, percent(n, total)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_and_median() {
        assert_eq!(mean(&[]), None);
        assert_eq!(mean(&[1.0, 2.0, 6.0]), Some(3.0));
        assert_eq!(median(&[5.0, 1.0, 3.0]), Some(3.0));
        assert_eq!(median(&[4.0, 1.0, 3.0, 2.0]), Some(2.5));
    }

    #[test]
    fn test_percentile_interpolates() {
        let values = [10.0, 20.0, 30.0, 40.0, 50.0];
        assert_eq!(percentile(&values, 0.0), Some(10.0));
        assert_eq!(percentile(&values, 1.0), Some(50.0));
        assert_eq!(percentile(&values, 0.5), Some(30.0));
        let p90 = percentile(&values, 0.9).unwrap();
        assert!((p90 - 46.0).abs() < 1e-9);
        assert_eq!(percentile(&[], 0.5), None);
    }

    #[test]
    fn test_ratios() {
        assert_eq!(safe_ratio(1.0, 0.0), None);
        assert_eq!(safe_ratio(3.0, 4.0), Some(0.75));
        assert_eq!(percent(1, 4), 25.0);
        assert_eq!(percent(3, 0), 0.0);
    }

    #[test]
    fn test_dominant_keeps_first_seen_on_ties() {
        assert_eq!(dominant(["b", "a", "a", "b"].into_iter()), Some(("b", 50.0)));
        assert_eq!(dominant(["x", "y", "y"].into_iter()), Some(("y", 200.0 / 3.0)));
        assert_eq!(dominant(std::iter::empty()), None);
    }
}
