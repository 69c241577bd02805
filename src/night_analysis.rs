use crate::bouts::{BoutList, SubdesatOnset};
use crate::classification::{ClassifiedSample, Condition};
use crate::config::Settings;
use crate::debounce::{MaskSet, Window};
use crate::stats;
use crate::NightRecord;
use chrono::NaiveDateTime;
use log::{info, warn};
use std::collections::BTreeMap;

/// Hour thresholds nights are bucketed into, ascending, always containing 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DurationBins {
    hours: Vec<u32>,
}

impl DurationBins {
    pub fn new(minimum: u32, complete: u32, step: u32) -> Self {
        let mut hours: Vec<u32> = (minimum..complete).step_by(step.max(1) as usize).collect();
        hours.push(complete);
        hours.push(0);
        hours.sort_unstable();
        hours.dedup();

        for h in &hours {
            match *h {
                0 => info!("adding 0 hr duration bin (insufficient data bin)"),
                h if h == complete => info!("adding complete night duration bin ({} hrs)", h),
                h => info!("adding {} hour night duration bin", h),
            }
        }
        Self { hours }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            settings.minimum_night_hours,
            settings.complete_night_hours,
            settings.bin_size_hours,
        )
    }

    pub fn hours(&self) -> &[u32] {
        &self.hours
    }

    /// Whole hours after adding the round-up tolerance
    pub fn rounded_hours(duration_seconds: f64, round_up_minutes: f64) -> u32 {
        let hours = ((duration_seconds + round_up_minutes * 60.0) / 3600.0).floor();
        if hours.is_finite() && hours > 0.0 {
            hours as u32
        } else {
            0
        }
    }

    /// Greatest bin not above `hours`; the 0 bin catches everything shorter than the minimum.
    pub fn select(&self, hours: u32) -> u32 {
        let mut descending = self.hours.clone();
        descending.sort_unstable_by(|a, b| b.cmp(a));
        descending.into_iter().find(|&bin| hours >= bin).unwrap_or(0)
    }

    pub fn classify(&self, duration_seconds: f64, round_up_minutes: f64) -> u32 {
        self.select(Self::rounded_hours(duration_seconds, round_up_minutes))
    }
}

/// Flat, ordered key -> value summary of one night.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Summary {
    entries: Vec<(String, f64)>,
}

impl Summary {
    pub fn insert(&mut self, key: impl Into<String>, value: f64) {
        let key = key.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<f64> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| *v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn weighted_sum<'a>(samples: impl Iterator<Item = &'a ClassifiedSample>) -> f64 {
    samples.map(|s| s.sample.weight()).sum()
}

fn add_bout_statistics(summary: &mut Summary, prefix: &str, durations: &[f64]) {
    summary.insert(format!("{} count", prefix), durations.len() as f64);
    summary.insert(format!("{} duration", prefix), durations.iter().sum::<f64>());
    summary.insert(format!("{} mean duration", prefix), stats::mean(durations));
    summary.insert(format!("{} median duration", prefix), stats::median(durations));
}

/// Reduce one night's samples, masks and bout lists into its summary.
pub fn summarize_night(
    samples: &[ClassifiedSample],
    masks: &MaskSet,
    bout_lists: &[BoutList],
    parts: usize,
    total_duration_seconds: f64,
    settings: &Settings,
) -> Summary {
    let mut summary = Summary::default();

    summary.insert("recording files", parts as f64);
    summary.insert("duration recording", total_duration_seconds);
    summary.insert(
        "duration gap",
        weighted_sum(samples.iter().filter(|s| s.sample.is_gap)),
    );
    summary.insert(
        "duration artifact",
        weighted_sum(samples.iter().filter(|s| s.sample.spo2_invalid)),
    );
    summary.insert(
        "duration artifact pulse",
        weighted_sum(samples.iter().filter(|s| s.sample.pulse_invalid)),
    );
    summary.insert(
        "duration artifact both",
        weighted_sum(samples.iter().filter(|s| s.sample.both_invalid)),
    );
    summary.insert(
        "duration artifact either",
        weighted_sum(samples.iter().filter(|s| s.sample.either_invalid)),
    );
    summary.insert(
        "maximum recording gap",
        samples
            .iter()
            .filter_map(|s| s.sample.interval_seconds)
            .reduce(f64::max)
            .unwrap_or(f64::NAN),
    );

    for condition in Condition::ALL {
        summary.insert(
            format!("any duration {}", condition.label()),
            weighted_sum(samples.iter().filter(|s| s.flags.get(condition))),
        );
        for window in Window::ALL {
            let mask = masks.get(condition, window);
            let duration = weighted_sum(
                samples
                    .iter()
                    .zip(&mask.values)
                    .filter(|(_, on)| **on)
                    .map(|(s, _)| s),
            );
            let count = mask.edges.iter().filter(|&&e| e == 1).count() as f64;
            let name = format!("{} duration {}", window.label(), condition.label());

            summary.insert(name.clone(), duration);
            summary.insert(format!("count {}", name), count);
            summary.insert(format!("avg {}", name), stats::ratio(duration, count));
            summary.insert(
                format!("perc time {}", name),
                stats::ratio(duration, total_duration_seconds) * 100.0,
            );
        }
    }

    summary.insert(
        "count spike desat",
        samples.iter().filter(|s| s.flags.spike_desat).count() as f64,
    );

    for list in bout_lists {
        let prefix = format!("bounded {}", list.name());
        let durations: Vec<f64> = list.bouts.iter().map(|b| b.duration_seconds).collect();
        add_bout_statistics(&mut summary, &prefix, &durations);

        if list.condition == Condition::Desat {
            let from_subdesat = list
                .bouts
                .iter()
                .filter(|b| b.preceded_by_subdesat == SubdesatOnset::Yes)
                .count();
            summary.insert(format!("{} from subdesat count", prefix), from_subdesat as f64);
        }

        let clean: Vec<f64> = list
            .bouts
            .iter()
            .filter(|b| b.artifact_either_duration < settings.artifact_threshold_secs)
            .map(|b| b.duration_seconds)
            .collect();
        add_bout_statistics(&mut summary, &format!("clean {}", prefix), &clean);
    }

    summary
}

/// What the cohort table keeps per subject.
#[derive(Debug, Clone, PartialEq)]
pub struct NightSummary {
    pub recording_start: NaiveDateTime,
    pub recording_stop: NaiveDateTime,
    pub summary: Summary,
}

/// Duration bin -> subject -> summary, every configured bin present.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CohortSummary {
    pub bins: BTreeMap<u32, BTreeMap<String, NightSummary>>,
}

/// Merge independently computed nights into the cohort table.
pub fn aggregate<'a>(
    bins: &DurationBins,
    records: impl IntoIterator<Item = &'a NightRecord>,
) -> CohortSummary {
    let mut cohort = CohortSummary {
        bins: bins.hours().iter().map(|&h| (h, BTreeMap::new())).collect(),
    };

    for record in records {
        let bin = if cohort.bins.contains_key(&record.duration_bin) {
            record.duration_bin
        } else {
            warn!(
                "{}: bin {} not in bin table, using insufficient data bin",
                record.subject_id, record.duration_bin
            );
            0
        };
        cohort.bins.entry(bin).or_default().insert(
            record.subject_id.clone(),
            NightSummary {
                recording_start: record.recording_start,
                recording_stop: record.recording_stop,
                summary: record.summary.clone(),
            },
        );
    }
    cohort
}
