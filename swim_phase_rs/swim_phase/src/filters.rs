//! Numeric kernels shared by the cleaner and the detectors.
//!
//! Two moving averages live here on purpose: [`centered_rolling_mean`]
//! truncates its window at the series edges, while [`uniform_filter`]
//! mirrors the series past its edges. The cleaner uses the former, the phase
//! builders the latter, and the two give different values near the ends.

use std::cmp::Reverse;

use ordered_float::OrderedFloat;

use crate::FrameId;

/// Centered moving average. The window for sample `i` covers
/// `[i - (window-1)/2, i + window/2]`, cut at the series bounds, so an even
/// window reaches one sample further forward. NaN samples are ignored and a
/// window with no finite sample yields NaN.
pub fn centered_rolling_mean(values: &[f64], window: usize) -> Vec<f64> {
    let n = values.len();
    if window <= 1 {
        return values.to_vec();
    }
    let before = (window - 1) / 2;
    let after = window / 2;
    (0..n)
        .map(|i| {
            let lo = i.saturating_sub(before);
            let hi = (i + after + 1).min(n);
            let (sum, count) = values[lo..hi]
                .iter()
                .filter(|v| !v.is_nan())
                .fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
            if count == 0 {
                f64::NAN
            } else {
                sum / count as f64
            }
        })
        .collect()
}

/// Box filter of `size` samples with mirror boundaries (`d c b a | a b c d |
/// d c b a`). The window for sample `i` starts at `i - size/2`.
pub fn uniform_filter(values: &[f64], size: usize) -> Vec<f64> {
    let n = values.len();
    if n == 0 || size <= 1 {
        return values.to_vec();
    }
    let left = (size / 2) as isize;
    (0..n)
        .map(|i| {
            let start = i as isize - left;
            let sum: f64 = (0..size as isize)
                .map(|k| values[reflect_index(start + k, n)])
                .sum();
            sum / size as f64
        })
        .collect()
}

fn reflect_index(j: isize, n: usize) -> usize {
    let n = n as isize;
    let period = 2 * n;
    let m = j.rem_euclid(period);
    if m < n {
        m as usize
    } else {
        (period - 1 - m) as usize
    }
}

/// Fills NaN gaps by linear interpolation over frame ids. Leading and
/// trailing gaps take the nearest valid sample. Returns `false`, leaving the
/// slice untouched, when no sample is valid.
pub fn interpolate_linear(frames: &[FrameId], values: &mut [f64]) -> bool {
    debug_assert_eq!(frames.len(), values.len());
    let valid: Vec<usize> = (0..values.len()).filter(|&i| !values[i].is_nan()).collect();
    let (first, last) = match (valid.first(), valid.last()) {
        (Some(&first), Some(&last)) => (first, last),
        _ => return false,
    };

    let head = values[first];
    for v in values[..first].iter_mut() {
        *v = head;
    }
    let tail = values[last];
    for v in values[last + 1..].iter_mut() {
        *v = tail;
    }

    for pair in valid.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        if b - a < 2 {
            continue;
        }
        let (fa, fb) = (frames[a] as f64, frames[b] as f64);
        let (va, vb) = (values[a], values[b]);
        for i in a + 1..b {
            let t = if fb > fa {
                (frames[i] as f64 - fa) / (fb - fa)
            } else {
                0.0
            };
            values[i] = va + t * (vb - va);
        }
    }
    true
}

/// Indices `i` where the sign of `a - b` differs between `i` and `i + 1`.
/// A zero difference has its own sign, so touching curves count as a change.
pub fn sign_changes(a: &[f64], b: &[f64]) -> Vec<usize> {
    let signs: Vec<Option<i8>> = a
        .iter()
        .zip(b)
        .map(|(x, y)| {
            let d = x - y;
            if d.is_nan() {
                None
            } else if d > 0.0 {
                Some(1)
            } else if d < 0.0 {
                Some(-1)
            } else {
                Some(0)
            }
        })
        .collect();
    signs
        .windows(2)
        .enumerate()
        .filter_map(|(i, w)| match (w[0], w[1]) {
            (Some(s0), Some(s1)) if s0 != s1 => Some(i),
            _ => None,
        })
        .collect()
}

/// Strict local minima: sample `i` must be below the samples at `i - k` and
/// `i + k` for every `k` in `1..=order`. Neighbour indices past either end
/// are clipped to the end sample, so the first and last samples never
/// qualify.
pub fn local_minima(values: &[f64], order: usize) -> Vec<usize> {
    let n = values.len();
    if n == 0 {
        return Vec::new();
    }
    (0..n)
        .filter(|&i| {
            let v = values[i];
            !v.is_nan()
                && (1..=order).all(|k| {
                    let lo = i.saturating_sub(k);
                    let hi = (i + k).min(n - 1);
                    v < values[lo] && v < values[hi]
                })
        })
        .collect()
}

/// Index of the first smallest finite sample.
pub fn argmin(values: &[f64]) -> Option<usize> {
    values
        .iter()
        .enumerate()
        .filter(|(_, v)| !v.is_nan())
        .min_by_key(|(_, v)| OrderedFloat(**v))
        .map(|(i, _)| i)
}

/// Index of the first largest finite sample.
pub fn argmax(values: &[f64]) -> Option<usize> {
    values
        .iter()
        .enumerate()
        .filter(|(_, v)| !v.is_nan())
        .min_by_key(|(_, v)| Reverse(OrderedFloat(**v)))
        .map(|(i, _)| i)
}
