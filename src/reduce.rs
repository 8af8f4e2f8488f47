//! Order statistics and reductions over observation series.
//!
//! Series can hold hundreds of thousands of elements (one per matching
//! transaction across the whole export), so every reduction here is an
//! explicit loop. Empty input uniformly yields `0.0`; series only ever contain
//! present, non-zero observations, so zero is unambiguous as "no data".

pub fn sum(values: &[f64]) -> f64 {
    let mut total = 0.0;
    for &value in values {
        total += value;
    }
    total
}

pub fn average(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    sum(values) / values.len() as f64
}

/// Middle element of a sorted copy; even-length input averages the two middle
/// elements. The input slice is never mutated.
pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

pub fn min(values: &[f64]) -> f64 {
    let mut result: Option<f64> = None;
    for &value in values {
        result = Some(match result {
            Some(current) if current <= value => current,
            _ => value,
        });
    }
    result.unwrap_or(0.0)
}

pub fn max(values: &[f64]) -> f64 {
    let mut result: Option<f64> = None;
    for &value in values {
        result = Some(match result {
            Some(current) if current >= value => current,
            _ => value,
        });
    }
    result.unwrap_or(0.0)
}
