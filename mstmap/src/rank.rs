//! Rank-based normalization of property columns for coloring.

use std::cmp::Ordering;

/// Total order with every NaN after every number.
fn nan_last(a: f32, b: f32) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
    }
}

///Ranks with ties sharing the average of their positions, 1-based.
pub fn rankdata(values: &[f32]) -> Vec<f32> {

    let n = values.len();
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|a, b| nan_last(values[*a], values[*b]));

    let mut ranks = vec![0f32; n];
    let mut i = 0;
    while i < n {
        let mut j = i + 1;
        while j < n && nan_last(values[order[i]], values[order[j]]) == Ordering::Equal {
            j += 1;
        }

        //positions i..j hold ranks i+1..=j
        let average = (i + 1 + j) as f32 / 2.0;
        for idx in order[i..j].iter() {
            ranks[*idx] = average;
        }

        i = j;
    }

    return ranks;
}

///Scales by the largest finite value (when it is non-zero), then maps each value to its
///average rank divided by `n`. Results are in `(0, 1]`.
pub fn rank_normalize(values: &[f32]) -> Vec<f32> {

    let n = values.len();
    if n == 0 {
        return Vec::new();
    }

    let max = values.iter().cloned().filter(|v| v.is_finite()).fold(f32::NEG_INFINITY, f32::max);

    let scaled: Vec<f32> = match max.is_finite() && max != 0.0 {
        true => values.iter().map(|v| v / max).collect(),
        false => values.to_vec(),
    };

    return rankdata(&scaled).into_iter().map(|r| r / n as f32).collect();
}

#[derive(Debug, Clone, PartialEq)]
pub struct QuintileSummary {
    pub min: f32,
    pub q40: f32,
    pub q60: f32,
    pub q80: f32,
    pub max: f32,
}

///Minimum, the values at positions `2l`, `3l` and `4l` of the sorted column (`l = n / 5`), and
///the maximum. NaN values are ignored for the minimum and maximum.
pub fn quintile_summary(values: &[f32]) -> Option<QuintileSummary> {

    if values.is_empty() {
        return None;
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| nan_last(*a, *b));

    let l = values.len() / 5;
    let numbers: Vec<f32> = sorted.iter().cloned().filter(|v| !v.is_nan()).collect();

    return Some(QuintileSummary {
        min: numbers.first().cloned().unwrap_or(f32::NAN),
        q40: sorted[2 * l],
        q60: sorted[3 * l],
        q80: sorted[4 * l],
        max: numbers.last().cloned().unwrap_or(f32::NAN),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn ranks_average_ties() {

        let ranks = rankdata(&[10.0, 20.0, 10.0, 30.0]);
        assert_eq!(ranks, vec![1.5, 3.0, 1.5, 4.0]);
    }

    #[test]
    fn normalized_ranks_in_unit_interval() {

        let values = vec![5.0, 1.0, 3.0, 3.0, 9.0];
        let normalized = rank_normalize(&values);

        assert_approx_eq!(normalized[4], 1.0);
        assert_approx_eq!(normalized[1], 0.2);
        assert_approx_eq!(normalized[2], 0.5);
        assert_eq!(normalized[2], normalized[3]);
        assert!(normalized.iter().all(|v| *v > 0.0 && *v <= 1.0));
    }

    #[test]
    fn nan_and_inf_rank_last() {

        let values = vec![f32::NAN, 2.0, f32::INFINITY, 1.0];
        let normalized = rank_normalize(&values);

        assert_approx_eq!(normalized[3], 0.25);
        assert_approx_eq!(normalized[1], 0.5);
        assert_approx_eq!(normalized[2], 0.75);
        assert_approx_eq!(normalized[0], 1.0);
    }

    #[test]
    fn negative_max_reverses_order() {

        let normalized = rank_normalize(&[-1.0, -2.0, -4.0]);
        assert_eq!(normalized, vec![1.0 / 3.0, 2.0 / 3.0, 1.0]);
    }

    #[test]
    fn zero_max_keeps_order() {

        let normalized = rank_normalize(&[0.0, -1.0]);
        assert_eq!(normalized, vec![1.0, 0.5]);
        assert!(rank_normalize(&[]).is_empty());
    }

    #[test]
    fn quintiles() {

        let values: Vec<f32> = (0..10).rev().map(|x| x as f32).collect();
        let summary = quintile_summary(&values).unwrap();

        assert_eq!(summary, QuintileSummary { min: 0.0, q40: 4.0, q60: 6.0, q80: 8.0, max: 9.0 });
        assert!(quintile_summary(&[]).is_none());

        let summary = quintile_summary(&[3.0]).unwrap();
        assert_eq!(summary.q80, 3.0);
    }
}
