pub mod bouts;
pub mod classification;
pub mod config;
pub mod data_loading;
pub mod debounce;
pub mod error;
pub mod night_analysis;
pub mod output;
pub mod preprocessing;
pub mod stats;

use bouts::{assemble_bouts, BoutList};
use chrono::NaiveDateTime;
use classification::{ClassifiedSample, Condition};
use config::Settings;
use debounce::{MaskSet, Window};
use error::AnalysisResult;
use log::debug;
use night_analysis::{DurationBins, Summary};
use preprocessing::RawSample;

/// Everything derived from one subject's night.
#[derive(Debug, Clone)]
pub struct NightRecord {
    pub subject_id: String,
    pub recording_start: NaiveDateTime,
    pub recording_stop: NaiveDateTime,
    pub total_duration_seconds: f64,
    pub duration_bin: u32,
    /// Annotated, night-restricted samples
    pub samples: Vec<ClassifiedSample>,
    pub masks: MaskSet,
    pub bout_lists: Vec<BoutList>,
    pub summary: Summary,
}

impl NightRecord {
    pub fn bouts(&self, condition: Condition, window: Window) -> Option<&BoutList> {
        self.bout_lists
            .iter()
            .find(|l| l.condition == condition && l.window == window)
    }
}

/// Run the whole pipeline for one subject. Nothing here is shared between
/// subjects, so nights can be analysed independently and merged afterwards.
pub fn analyze_night(
    subject_id: &str,
    parts: &[Vec<RawSample>],
    settings: &Settings,
    bins: &DurationBins,
) -> AnalysisResult<NightRecord> {
    let night = preprocessing::condition_recording(subject_id, parts, settings)?;
    let total_duration_seconds = night.total_duration_seconds();
    let duration_bin = bins.classify(total_duration_seconds, settings.round_up_minutes);
    debug!(
        "{}: night {} to {} ({:.0} s) -> {} hour bin",
        subject_id, night.recording_start, night.recording_stop, total_duration_seconds, duration_bin
    );

    let samples = classification::classify_night(&night.samples, settings);
    let masks = debounce::debounce_night(&samples, settings);

    let onset = &masks.get(Condition::Subdesat, Window::Sustained).values;
    let mut bout_lists = Vec::with_capacity(6);
    for condition in Condition::ALL {
        for window in Window::ALL {
            let onset_mask = match condition {
                Condition::Desat => Some(onset.as_slice()),
                _ => None,
            };
            let bouts = assemble_bouts(masks.get(condition, window), &samples, onset_mask);
            bout_lists.push(BoutList {
                condition,
                window,
                bouts,
            });
        }
    }

    let summary = night_analysis::summarize_night(
        &samples,
        &masks,
        &bout_lists,
        night.parts,
        total_duration_seconds,
        settings,
    );

    Ok(NightRecord {
        subject_id: subject_id.to_string(),
        recording_start: night.recording_start,
        recording_stop: night.recording_stop,
        total_duration_seconds,
        duration_bin,
        samples,
        masks,
        bout_lists,
        summary,
    })
}
