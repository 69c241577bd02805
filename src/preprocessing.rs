use crate::config::Settings;
use crate::error::{AnalysisError, AnalysisResult};
use chrono::{NaiveDateTime, NaiveTime};
use log::debug;

/// One oximeter reading as ingested, already timestamp-corrected.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct RawSample {
    pub timestamp: NaiveDateTime,
    pub spo2: f64,
    pub pulse: f64,
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct ConditionedSample {
    pub timestamp: NaiveDateTime,
    pub raw_spo2: f64,
    pub raw_pulse: f64,
    /// Seconds since the previous sample of the full recording; `None` for the first
    pub interval_seconds: Option<f64>,
    pub is_night: bool,
    pub spo2_invalid: bool,
    pub pulse_invalid: bool,
    pub both_invalid: bool,
    pub either_invalid: bool,
    pub is_gap: bool,
    pub filled_spo2: Option<f64>,
    pub filled_pulse: Option<f64>,
    pub delta_spo2: Option<f64>,
}

impl ConditionedSample {
    /// Time weight of this sample in duration sums
    pub fn weight(&self) -> f64 {
        self.interval_seconds.unwrap_or(0.0)
    }
}

/// Clock-time range treated as sleep hours.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NightWindow {
    pub start: NaiveTime,
    pub stop: NaiveTime,
}

impl NightWindow {
    pub fn new(start: NaiveTime, stop: NaiveTime) -> Self {
        Self { start, stop }
    }

    pub fn contains_time(&self, time: NaiveTime) -> bool {
        if self.start < self.stop {
            self.start <= time && time <= self.stop
        } else {
            // window spans midnight
            time >= self.start || time <= self.stop
        }
    }

    pub fn contains(&self, timestamp: NaiveDateTime) -> bool {
        self.contains_time(timestamp.time())
    }
}

/// The night-restricted, conditioned samples of one subject.
#[derive(Debug, Clone)]
pub struct ConditionedNight {
    pub samples: Vec<ConditionedSample>,
    pub recording_start: NaiveDateTime,
    pub recording_stop: NaiveDateTime,
    /// Number of source files the recording was assembled from
    pub parts: usize,
}

impl ConditionedNight {
    pub fn total_duration_seconds(&self) -> f64 {
        seconds_between(self.recording_start, self.recording_stop)
    }
}

pub fn seconds_between(start: NaiveDateTime, stop: NaiveDateTime) -> f64 {
    (stop - start).num_milliseconds() as f64 / 1000.0
}

pub fn is_invalid_reading(value: f64, invalid_code: f64) -> bool {
    !value.is_finite() || value == invalid_code
}

/// Propagate the next valid value backwards into invalid runs.
/// A trailing invalid run with nothing after it stays `None`.
pub fn back_fill(values: &[f64], invalid: &[bool]) -> Vec<Option<f64>> {
    let mut filled = vec![None; values.len()];
    let mut next_valid = None;
    for i in (0..values.len()).rev() {
        if !invalid[i] {
            next_valid = Some(values[i]);
        }
        filled[i] = next_valid;
    }
    filled
}

pub fn first_difference(values: &[Option<f64>]) -> Vec<Option<f64>> {
    let mut diffs = Vec::with_capacity(values.len());
    for i in 0..values.len() {
        let diff = if i == 0 {
            None
        } else {
            match (values[i - 1], values[i]) {
                (Some(prev), Some(curr)) => Some(curr - prev),
                _ => None,
            }
        };
        diffs.push(diff);
    }
    diffs
}

/// Merge the parts of a subject's recording, mask sentinel readings, derive
/// intervals and fills, then keep the samples inside the night window.
pub fn condition_recording(
    subject: &str,
    parts: &[Vec<RawSample>],
    settings: &Settings,
) -> AnalysisResult<ConditionedNight> {
    let mut raw: Vec<RawSample> = parts.iter().flatten().copied().collect();
    if raw.is_empty() {
        return Err(AnalysisError::EmptyRecording(subject.to_string()));
    }
    raw.sort_by_key(|s| s.timestamp);

    let spo2: Vec<f64> = raw.iter().map(|s| s.spo2).collect();
    let pulse: Vec<f64> = raw.iter().map(|s| s.pulse).collect();
    let spo2_invalid: Vec<bool> = spo2
        .iter()
        .map(|&v| is_invalid_reading(v, settings.invalid_code))
        .collect();
    let pulse_invalid: Vec<bool> = pulse
        .iter()
        .map(|&v| is_invalid_reading(v, settings.invalid_code))
        .collect();

    let filled_spo2 = back_fill(&spo2, &spo2_invalid);
    let filled_pulse = back_fill(&pulse, &pulse_invalid);
    let delta_spo2 = first_difference(&filled_spo2);

    let window = settings.night_window();
    let mut samples = Vec::with_capacity(raw.len());
    for (i, sample) in raw.iter().enumerate() {
        let interval_seconds = if i == 0 {
            None
        } else {
            Some(seconds_between(raw[i - 1].timestamp, sample.timestamp))
        };
        let is_gap = interval_seconds.is_some_and(|dt| dt > settings.sampling_period_secs);

        samples.push(ConditionedSample {
            timestamp: sample.timestamp,
            raw_spo2: sample.spo2,
            raw_pulse: sample.pulse,
            interval_seconds,
            is_night: window.contains(sample.timestamp),
            spo2_invalid: spo2_invalid[i],
            pulse_invalid: pulse_invalid[i],
            both_invalid: spo2_invalid[i] && pulse_invalid[i],
            either_invalid: spo2_invalid[i] || pulse_invalid[i],
            is_gap,
            filled_spo2: filled_spo2[i],
            filled_pulse: filled_pulse[i],
            delta_spo2: delta_spo2[i],
        });
    }

    let total = samples.len();
    samples.retain(|s| s.is_night);
    debug!(
        "{}: {} of {} samples inside night window {} to {}",
        subject,
        samples.len(),
        total,
        window.start,
        window.stop
    );

    let (recording_start, recording_stop) = match (samples.first(), samples.last()) {
        (Some(first), Some(last)) => (first.timestamp, last.timestamp),
        _ => {
            return Err(AnalysisError::EmptyNight {
                subject: subject.to_string(),
                start: window.start,
                stop: window.stop,
            })
        }
    };

    Ok(ConditionedNight {
        samples,
        recording_start,
        recording_stop,
        parts: parts.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    fn sample(ts: NaiveDateTime, spo2: f64, pulse: f64) -> RawSample {
        RawSample {
            timestamp: ts,
            spo2,
            pulse,
        }
    }

    #[test]
    fn test_night_window_wraps_midnight() {
        let window = NightWindow::new(
            NaiveTime::from_hms_opt(21, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(7, 0, 0).unwrap(),
        );
        assert!(window.contains_time(NaiveTime::from_hms_opt(23, 30, 0).unwrap()));
        assert!(window.contains_time(NaiveTime::from_hms_opt(3, 0, 0).unwrap()));
        assert!(!window.contains_time(NaiveTime::from_hms_opt(12, 0, 0).unwrap()));
        assert!(window.contains_time(NaiveTime::from_hms_opt(7, 0, 0).unwrap()));
    }

    #[test]
    fn test_night_window_same_day() {
        let window = NightWindow::new(
            NaiveTime::from_hms_opt(1, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(5, 0, 0).unwrap(),
        );
        assert!(window.contains_time(NaiveTime::from_hms_opt(1, 0, 0).unwrap()));
        assert!(window.contains_time(NaiveTime::from_hms_opt(4, 59, 0).unwrap()));
        assert!(!window.contains_time(NaiveTime::from_hms_opt(23, 0, 0).unwrap()));
    }

    #[test]
    fn test_back_fill_leaves_trailing_run_missing() {
        let values = [95.0, 500.0, 500.0, 93.0, 500.0];
        let invalid = [false, true, true, false, true];
        let filled = back_fill(&values, &invalid);
        assert_eq!(
            filled,
            vec![Some(95.0), Some(93.0), Some(93.0), Some(93.0), None]
        );
    }

    #[test]
    fn test_first_difference_skips_missing() {
        let diffs = first_difference(&[Some(95.0), Some(90.0), None, Some(91.0)]);
        assert_eq!(diffs, vec![None, Some(-5.0), None, None]);
    }

    #[test]
    fn test_condition_merges_and_sorts_parts() {
        let settings = Settings::default();
        let parts = vec![
            vec![sample(at(23, 0, 2), 94.0, 60.0), sample(at(23, 0, 3), 500.0, 500.0)],
            vec![sample(at(23, 0, 0), 96.0, 61.0), sample(at(23, 0, 1), 95.0, 500.0)],
        ];
        let night = condition_recording("s1", &parts, &settings).unwrap();
        assert_eq!(night.parts, 2);
        assert_eq!(night.samples.len(), 4);
        assert_eq!(night.samples[0].raw_spo2, 96.0);
        assert_eq!(night.samples[0].interval_seconds, None);
        assert_eq!(night.samples[1].interval_seconds, Some(1.0));
        assert!(night.samples[1].pulse_invalid);
        assert!(!night.samples[1].spo2_invalid);
        assert!(night.samples[1].either_invalid);
        assert!(!night.samples[1].both_invalid);
        assert_eq!(night.samples[1].filled_pulse, Some(60.0));
        assert!(night.samples[3].both_invalid);
        assert_eq!(night.samples[3].filled_spo2, None);
        assert_eq!(night.samples[2].delta_spo2, Some(-1.0));
        assert_eq!(night.recording_start, at(23, 0, 0));
        assert_eq!(night.recording_stop, at(23, 0, 3));
    }

    #[test]
    fn test_gap_flagged_when_interval_exceeds_period() {
        let settings = Settings::default();
        let parts = vec![vec![
            sample(at(22, 0, 0), 95.0, 60.0),
            sample(at(22, 0, 1), 95.0, 60.0),
            sample(at(22, 0, 5), 95.0, 60.0),
        ]];
        let night = condition_recording("s1", &parts, &settings).unwrap();
        let gaps: Vec<bool> = night.samples.iter().map(|s| s.is_gap).collect();
        assert_eq!(gaps, vec![false, false, true]);
    }

    #[test]
    fn test_daytime_only_recording_is_empty_night() {
        let settings = Settings::default();
        let parts = vec![vec![sample(at(12, 0, 0), 95.0, 60.0)]];
        assert!(matches!(
            condition_recording("day", &parts, &settings),
            Err(AnalysisError::EmptyNight { .. })
        ));
    }

    #[test]
    fn test_no_samples_is_empty_recording() {
        let settings = Settings::default();
        assert!(matches!(
            condition_recording("none", &[Vec::new()], &settings),
            Err(AnalysisError::EmptyRecording(_))
        ));
    }
}
