use crate::classification::{ClassifiedSample, Condition};
use crate::debounce::{PersistenceMask, Window};
use crate::preprocessing::{seconds_between, ConditionedSample};
use crate::stats;
use chrono::NaiveDateTime;
use log::debug;
use std::fmt;

/// Whether the sample just before a bout was inside a sustained sub-desaturation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubdesatOnset {
    Yes,
    No,
    Unknown,
}

impl fmt::Display for SubdesatOnset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubdesatOnset::Yes => write!(f, "true"),
            SubdesatOnset::No => write!(f, "false"),
            SubdesatOnset::Unknown => write!(f, "unknown"),
        }
    }
}

/// One debounced episode of a condition.
#[derive(Debug, Clone, PartialEq)]
pub struct Bout {
    pub condition: Condition,
    pub window: Window,
    pub start_ts: NaiveDateTime,
    pub stop_ts: NaiveDateTime,
    pub duration_seconds: f64,
    pub artifact_pulse_duration: f64,
    pub artifact_spo2_duration: f64,
    pub artifact_both_duration: f64,
    pub artifact_either_duration: f64,
    pub severe_overlap_duration: f64,
    pub severe_overlap_ratio: f64,
    pub min_spo2: f64,
    pub mean_spo2: f64,
    pub median_spo2: f64,
    pub preceded_by_subdesat: SubdesatOnset,
}

/// The bouts of one (condition, window) pairing.
#[derive(Debug, Clone, PartialEq)]
pub struct BoutList {
    pub condition: Condition,
    pub window: Window,
    pub bouts: Vec<Bout>,
}

impl BoutList {
    pub fn name(&self) -> String {
        match self.window {
            Window::Minimum => self.condition.label().to_string(),
            Window::Sustained => format!("sustained {}", self.condition.label()),
        }
    }
}

/// Pair episode starts with stops.
///
/// When the first stop comes before the first start the night began inside an
/// episode; that leading stop is skipped. A start with no stop after it is dropped.
pub fn pair_edges(
    starts: &[NaiveDateTime],
    stops: &[NaiveDateTime],
) -> Vec<(NaiveDateTime, NaiveDateTime)> {
    if starts.is_empty() || stops.is_empty() {
        return Vec::new();
    }

    let offset = if stops[0] < starts[0] { 1 } else { 0 };
    let count = starts.len().min(stops.len() - offset);
    (0..count).map(|i| (starts[i], stops[i + offset])).collect()
}

fn overlap(samples: &[ConditionedSample], flag: impl Fn(&ConditionedSample) -> bool) -> f64 {
    samples.iter().filter(|s| flag(s)).map(|s| s.weight()).sum()
}

/// Turn the edges of `mask` into bouts with metrics taken from `samples`.
///
/// `onset_mask` is the sustained sub-desaturation mask; when given, each bout
/// records whether the sample just before its start was inside it.
pub fn assemble_bouts(
    mask: &PersistenceMask,
    samples: &[ClassifiedSample],
    onset_mask: Option<&[bool]>,
) -> Vec<Bout> {
    let pairs = pair_edges(&mask.starts(samples), &mask.stops(samples));
    let mut bouts = Vec::with_capacity(pairs.len());

    for (start, stop) in pairs {
        let duration_seconds = seconds_between(start, stop);
        if duration_seconds <= 0.0 {
            debug!(
                "dropping zero-length {} {} bout at {}",
                mask.window.label(),
                mask.condition.label(),
                start
            );
            continue;
        }

        let lo = samples.partition_point(|s| s.sample.timestamp < start);
        let hi = samples.partition_point(|s| s.sample.timestamp <= stop);
        let inside = &samples[lo..hi];
        let conditioned: Vec<ConditionedSample> = inside.iter().map(|s| s.sample).collect();

        let severe_overlap_duration: f64 = inside
            .iter()
            .filter(|s| s.flags.severe_desat)
            .map(|s| s.sample.weight())
            .sum();

        let readings: Vec<f64> = conditioned
            .iter()
            .filter(|s| !s.spo2_invalid)
            .map(|s| s.raw_spo2)
            .collect();

        let preceded_by_subdesat = match onset_mask {
            Some(onset) if lo > 0 => match onset.get(lo - 1).copied() {
                Some(true) => SubdesatOnset::Yes,
                Some(false) => SubdesatOnset::No,
                None => SubdesatOnset::Unknown,
            },
            _ => SubdesatOnset::Unknown,
        };

        bouts.push(Bout {
            condition: mask.condition,
            window: mask.window,
            start_ts: start,
            stop_ts: stop,
            duration_seconds,
            artifact_pulse_duration: overlap(&conditioned, |s| s.pulse_invalid),
            artifact_spo2_duration: overlap(&conditioned, |s| s.spo2_invalid),
            artifact_both_duration: overlap(&conditioned, |s| s.both_invalid),
            artifact_either_duration: overlap(&conditioned, |s| s.either_invalid),
            severe_overlap_duration,
            severe_overlap_ratio: stats::ratio(severe_overlap_duration, duration_seconds),
            min_spo2: stats::min(&readings),
            mean_spo2: stats::mean(&readings),
            median_spo2: stats::median(&readings),
            preceded_by_subdesat,
        });
    }

    bouts
}
