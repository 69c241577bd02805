//! Persistence filtering of boolean condition series.
//!
//! A condition only counts once it has held for a whole window. The filter is
//! a morphological opening over elapsed time:
//! - erode: a sample survives if every sample in the trailing window `(t - W, t]` holds
//! - dilate: every sample of a surviving window is restored, so a qualifying run
//!   comes back at its full original extent while shorter runs vanish
//!
//! Windows are measured in milliseconds of recording time, not in sample
//! counts, so irregular sampling and gaps do not stretch or shrink them.
//! At the very start of the night the trailing window is truncated to the
//! samples that exist; a run touching the first sample therefore survives and
//! surfaces as an episode with no observed start.

use crate::classification::{condition_series, ClassifiedSample, Condition};
use crate::config::Settings;
use chrono::NaiveDateTime;
use log::debug;

/// Debounce window lengths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Window {
    Minimum,
    Sustained,
}

impl Window {
    pub const ALL: [Window; 2] = [Window::Minimum, Window::Sustained];

    pub fn label(&self) -> &'static str {
        match self {
            Window::Minimum => "min",
            Window::Sustained => "sustained",
        }
    }

    pub fn seconds(&self, settings: &Settings) -> f64 {
        match self {
            Window::Minimum => settings.minimum_interval_secs,
            Window::Sustained => settings.sustained_interval_secs,
        }
    }
}

/// Milliseconds since the first timestamp
pub fn elapsed_millis(timestamps: &[NaiveDateTime]) -> Vec<i64> {
    match timestamps.first() {
        Some(&t0) => timestamps
            .iter()
            .map(|&t| (t - t0).num_milliseconds())
            .collect(),
        None => Vec::new(),
    }
}

/// Trailing rolling minimum over `(t - window, t]`.
pub fn erode(times: &[i64], values: &[bool], window_ms: i64) -> Vec<bool> {
    let mut out = vec![false; values.len()];
    let mut left = 0;
    let mut falses = 0usize;

    for t in 0..values.len() {
        if !values[t] {
            falses += 1;
        }
        while left < t && times[left] <= times[t] - window_ms {
            if !values[left] {
                falses -= 1;
            }
            left += 1;
        }
        out[t] = falses == 0;
    }
    out
}

/// Rolling maximum over `[t, t + window)`, the reflection of the erosion window.
pub fn dilate(times: &[i64], values: &[bool], window_ms: i64) -> Vec<bool> {
    let n = values.len();
    let mut out = vec![false; n];
    let mut right = 0;
    let mut trues = 0usize;

    for t in 0..n {
        while right < n && times[right] < times[t] + window_ms {
            if values[right] {
                trues += 1;
            }
            right += 1;
        }
        out[t] = trues > 0;
        if values[t] {
            trues -= 1;
        }
    }
    out
}

pub fn persistent(times: &[i64], values: &[bool], window_ms: i64) -> Vec<bool> {
    let trimmed = erode(times, values, window_ms);
    dilate(times, &trimmed, window_ms)
}

/// `+1` where a run starts, `-1` on the first sample after it ends. The first
/// sample has no predecessor and is always 0.
pub fn edges(mask: &[bool]) -> Vec<i8> {
    let mut out = vec![0i8; mask.len()];
    for i in 1..mask.len() {
        out[i] = mask[i] as i8 - mask[i - 1] as i8;
    }
    out
}

#[derive(Debug, Clone)]
pub struct PersistenceMask {
    pub condition: Condition,
    pub window: Window,
    pub values: Vec<bool>,
    pub edges: Vec<i8>,
}

impl PersistenceMask {
    pub fn build(
        condition: Condition,
        window: Window,
        times: &[i64],
        series: &[bool],
        window_secs: f64,
    ) -> Self {
        let window_ms = (window_secs * 1000.0).round() as i64;
        let values = persistent(times, series, window_ms);
        let edges = edges(&values);
        Self {
            condition,
            window,
            values,
            edges,
        }
    }

    pub fn starts(&self, samples: &[ClassifiedSample]) -> Vec<NaiveDateTime> {
        self.edge_timestamps(samples, 1)
    }

    pub fn stops(&self, samples: &[ClassifiedSample]) -> Vec<NaiveDateTime> {
        self.edge_timestamps(samples, -1)
    }

    fn edge_timestamps(&self, samples: &[ClassifiedSample], edge: i8) -> Vec<NaiveDateTime> {
        self.edges
            .iter()
            .zip(samples)
            .filter(|(e, _)| **e == edge)
            .map(|(_, s)| s.sample.timestamp)
            .collect()
    }
}

/// All six (condition, window) masks of one night.
#[derive(Debug, Clone)]
pub struct MaskSet {
    masks: Vec<PersistenceMask>,
}

impl MaskSet {
    fn slot(condition: Condition, window: Window) -> usize {
        let c = match condition {
            Condition::Desat => 0,
            Condition::Subdesat => 1,
            Condition::SevereDesat => 2,
        };
        let w = match window {
            Window::Minimum => 0,
            Window::Sustained => 1,
        };
        c * 2 + w
    }

    pub fn get(&self, condition: Condition, window: Window) -> &PersistenceMask {
        &self.masks[Self::slot(condition, window)]
    }

    pub fn iter(&self) -> impl Iterator<Item = &PersistenceMask> {
        self.masks.iter()
    }
}

pub fn debounce_night(samples: &[ClassifiedSample], settings: &Settings) -> MaskSet {
    let timestamps: Vec<NaiveDateTime> = samples.iter().map(|s| s.sample.timestamp).collect();
    let times = elapsed_millis(&timestamps);

    let mut masks = Vec::with_capacity(6);
    for condition in Condition::ALL {
        let series = condition_series(samples, condition);
        for window in Window::ALL {
            let mask =
                PersistenceMask::build(condition, window, &times, &series, window.seconds(settings));
            debug!(
                "{} {}: {} raw samples, {} persistent, {} starts",
                window.label(),
                condition.label(),
                series.iter().filter(|&&v| v).count(),
                mask.values.iter().filter(|&&v| v).count(),
                mask.edges.iter().filter(|&&e| e == 1).count()
            );
            masks.push(mask);
        }
    }
    MaskSet { masks }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn seconds(n: usize) -> Vec<i64> {
        (0..n as i64).map(|i| i * 1000).collect()
    }

    fn run(n: usize, from: usize, to: usize) -> Vec<bool> {
        (0..n).map(|i| i >= from && i <= to).collect()
    }

    #[test]
    fn test_erode_needs_full_window() {
        let times = seconds(30);
        let values = run(30, 10, 25);
        let trimmed = erode(&times, &values, 10_000);
        let trues: Vec<usize> = (0..30).filter(|&i| trimmed[i]).collect();
        assert_eq!(trues, (19..=25).collect::<Vec<_>>());
    }

    #[test]
    fn test_opening_restores_full_run() {
        let times = seconds(40);
        let values = run(40, 10, 25);
        let mask = persistent(&times, &values, 10_000);
        assert_eq!(mask, values);
    }

    #[test]
    fn test_short_run_suppressed() {
        let times = seconds(40);
        let values = run(40, 10, 18);
        let mask = persistent(&times, &values, 10_000);
        assert!(mask.iter().all(|&v| !v));
    }

    #[test]
    fn test_flicker_removed_inside_long_run() {
        let times = seconds(60);
        let mut values = run(60, 5, 50);
        values[30] = false;
        let mask = persistent(&times, &values, 10_000);
        // the single dropout splits the run into two qualifying halves
        assert!(mask[5] && mask[29] && !mask[30] && mask[31] && mask[50]);
        assert!(!mask[4] && !mask[51]);
    }

    #[test]
    fn test_window_measured_in_time_not_samples() {
        // 2 s sampling: five samples already span ten seconds
        let times: Vec<i64> = (0..20).map(|i| i * 2000).collect();
        let values = run(20, 5, 9);
        let mask = persistent(&times, &values, 10_000);
        assert_eq!(mask, values);

        let values = run(20, 5, 8);
        let mask = persistent(&times, &values, 10_000);
        assert!(mask.iter().all(|&v| !v));
    }

    #[test]
    fn test_edges() {
        let mask = [true, true, false, false, true, true, false];
        assert_eq!(edges(&mask), vec![0, 0, -1, 0, 1, 0, -1]);
        assert!(edges(&[]).is_empty());
    }

    #[test]
    fn test_run_touching_first_sample_has_no_start_edge() {
        let times = seconds(30);
        let values = run(30, 0, 4);
        let mask = persistent(&times, &values, 10_000);
        let e = edges(&mask);
        assert!(!e.contains(&1));
        assert_eq!(e[5], -1);
    }

    #[test]
    fn test_mask_slots_are_distinct() {
        let mut slots: Vec<usize> = Condition::ALL
            .iter()
            .flat_map(|&c| Window::ALL.iter().map(move |&w| MaskSet::slot(c, w)))
            .collect();
        slots.sort();
        assert_eq!(slots, vec![0, 1, 2, 3, 4, 5]);
    }

    /// Maximal runs of `true` as `(start, end)` with `end` exclusive
    fn runs(values: &[bool]) -> Vec<(usize, usize)> {
        let mut out = Vec::new();
        let mut i = 0;
        while i < values.len() {
            if values[i] {
                let start = i;
                while i < values.len() && values[i] {
                    i += 1;
                }
                out.push((start, i));
            } else {
                i += 1;
            }
        }
        out
    }

    proptest! {
        #[test]
        fn prop_opening_keeps_long_runs_and_drops_short_ones(
            values in proptest::collection::vec(any::<bool>(), 1..200),
            window in 1usize..30,
        ) {
            let times = seconds(values.len());
            let mask = persistent(&times, &values, window as i64 * 1000);

            for (v, m) in values.iter().zip(&mask) {
                prop_assert!(!m || *v);
            }
            for (start, end) in runs(&values) {
                let kept = mask[start..end].iter().all(|&m| m);
                let dropped = mask[start..end].iter().all(|&m| !m);
                if end - start >= window || start == 0 {
                    prop_assert!(kept, "run {}..{} should survive", start, end);
                } else {
                    prop_assert!(dropped, "run {}..{} should vanish", start, end);
                }
            }
        }

        #[test]
        fn prop_edges_balance(values in proptest::collection::vec(any::<bool>(), 0..200)) {
            let e = edges(&values);
            let starts = e.iter().filter(|&&x| x == 1).count() as i64;
            let stops = e.iter().filter(|&&x| x == -1).count() as i64;
            let opens_at_start = values.first().copied().unwrap_or(false) as i64;
            let open_at_end = values.last().copied().unwrap_or(false) as i64;
            prop_assert_eq!(opens_at_start + starts - stops, open_at_end);
        }
    }
}
