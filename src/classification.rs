use crate::config::Settings;
use crate::preprocessing::ConditionedSample;

/// The saturation conditions that can be debounced into bouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Condition {
    Desat,
    Subdesat,
    SevereDesat,
}

impl Condition {
    pub const ALL: [Condition; 3] = [Condition::Desat, Condition::Subdesat, Condition::SevereDesat];

    pub fn label(&self) -> &'static str {
        match self {
            Condition::Desat => "desat",
            Condition::Subdesat => "sub desat",
            Condition::SevereDesat => "severe desat",
        }
    }
}

/// Per-sample condition flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventFlags {
    pub desat: bool,
    pub subdesat: bool,
    pub severe_desat: bool,
    pub spike_desat: bool,
}

impl EventFlags {
    pub fn get(&self, condition: Condition) -> bool {
        match condition {
            Condition::Desat => self.desat,
            Condition::Subdesat => self.subdesat,
            Condition::SevereDesat => self.severe_desat,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassifiedSample {
    pub sample: ConditionedSample,
    pub flags: EventFlags,
}

/// Threshold the filled saturation channel. Missing values never match and
/// gap samples are never classified.
pub fn classify_sample(sample: &ConditionedSample, settings: &Settings) -> EventFlags {
    if sample.is_gap {
        return EventFlags::default();
    }

    let (desat, subdesat, severe_desat) = match sample.filled_spo2 {
        Some(spo2) => (
            spo2 < settings.desat_threshold,
            spo2 < settings.desat_subthreshold && spo2 >= settings.desat_threshold,
            spo2 < settings.severe_threshold,
        ),
        None => (false, false, false),
    };
    let spike_desat = sample
        .delta_spo2
        .is_some_and(|delta| delta <= settings.spike_threshold);

    EventFlags {
        desat,
        subdesat,
        severe_desat,
        spike_desat,
    }
}

pub fn classify_night(samples: &[ConditionedSample], settings: &Settings) -> Vec<ClassifiedSample> {
    samples
        .iter()
        .map(|s| ClassifiedSample {
            sample: *s,
            flags: classify_sample(s, settings),
        })
        .collect()
}

/// Boolean series of one condition across the night
pub fn condition_series(samples: &[ClassifiedSample], condition: Condition) -> Vec<bool> {
    samples.iter().map(|s| s.flags.get(condition)).collect()
}
