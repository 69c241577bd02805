use crate::error::ConfigError;
use crate::preprocessing::NightWindow;
use anyhow::{Context, Result};
use chrono::NaiveTime;
use clap::Parser;
use log::debug;
use serde::{Deserialize, Deserializer};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Score oxygen desaturation events from overnight pulse-oximetry CSV files
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Directory containing per-subject sample CSV files (<subject>_<part>.csv)
    #[arg(help = "Directory containing per-subject sample CSV files")]
    pub input_path: PathBuf,

    /// Settings file: two-column CSV (parameter,value) or JSON object
    #[arg(long, env = "DESAT_SETTINGS")]
    pub settings: PathBuf,

    /// Directory to write annotated nights, bout lists and aggregate tables into
    #[arg(long, default_value = "output")]
    pub output: PathBuf,

    /// Optional CSV (filename,end hour,end minute) listing files whose end time was misrecorded
    #[arg(long)]
    pub time_fix: Option<PathBuf>,
}

/// Analysis thresholds and windows, resolved once before any subject is processed.
///
/// Field names on the wire are the flat keys of the settings sheet.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Settings {
    #[serde(rename = "desat threshold")]
    pub desat_threshold: f64,

    #[serde(rename = "desat subthreshold")]
    pub desat_subthreshold: f64,

    #[serde(rename = "desat severe threshold")]
    pub severe_threshold: f64,

    /// Negative: a single-step SpO2 change at or below this is a spike
    #[serde(rename = "desat spike")]
    pub spike_threshold: f64,

    #[serde(rename = "minimum desat interval (sec)")]
    pub minimum_interval_secs: f64,

    #[serde(rename = "sustained desat interval (sec)")]
    pub sustained_interval_secs: f64,

    /// Intervals longer than this are sampling gaps
    #[serde(rename = "expected sampling rate (sec)")]
    pub sampling_period_secs: f64,

    #[serde(
        rename = "night_start_time (24hr HH:MM)",
        alias = "night start time",
        deserialize_with = "deserialize_clock_time",
        default = "default_night_start"
    )]
    pub night_start: NaiveTime,

    #[serde(
        rename = "night_stop_time (24hr HH:MM)",
        alias = "night stop time",
        deserialize_with = "deserialize_clock_time",
        default = "default_night_stop"
    )]
    pub night_stop: NaiveTime,

    #[serde(rename = "night duration round up within (minutes)", default)]
    pub round_up_minutes: f64,

    #[serde(rename = "minimum night duration (hours)")]
    pub minimum_night_hours: u32,

    #[serde(rename = "complete night duration (hours)")]
    pub complete_night_hours: u32,

    #[serde(rename = "night duration bin size (hours)")]
    pub bin_size_hours: u32,

    /// Bouts with at least this much artifact time are left out of the clean statistics
    #[serde(rename = "artifact duration threshold (sec)")]
    pub artifact_threshold_secs: f64,

    /// Sensor code written when there is no reading
    #[serde(rename = "invalid reading code", default = "default_invalid_code")]
    pub invalid_code: f64,
}

fn default_night_start() -> NaiveTime {
    NaiveTime::from_hms_opt(21, 0, 0).unwrap_or_default()
}

fn default_night_stop() -> NaiveTime {
    NaiveTime::from_hms_opt(7, 0, 0).unwrap_or_default()
}

fn default_invalid_code() -> f64 {
    500.0
}

pub fn parse_clock_time(s: &str) -> Option<NaiveTime> {
    let s = s.trim();
    NaiveTime::parse_from_str(s, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
        .ok()
}

fn deserialize_clock_time<'de, D>(deserializer: D) -> Result<NaiveTime, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    parse_clock_time(&s)
        .ok_or_else(|| serde::de::Error::custom(format!("expected HH:MM time of day, got {:?}", s)))
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            desat_threshold: 90.0,
            desat_subthreshold: 94.0,
            severe_threshold: 80.0,
            spike_threshold: -4.0,
            minimum_interval_secs: 10.0,
            sustained_interval_secs: 60.0,
            sampling_period_secs: 1.0,
            night_start: default_night_start(),
            night_stop: default_night_stop(),
            round_up_minutes: 15.0,
            minimum_night_hours: 4,
            complete_night_hours: 10,
            bin_size_hours: 2,
            artifact_threshold_secs: 10.0,
            invalid_code: default_invalid_code(),
        }
    }
}

impl Settings {
    /// Build settings from the flat parameter -> value map of a settings sheet.
    ///
    /// Integers, then floats, are tried for each value; anything else stays a string.
    pub fn from_map(map: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let object: serde_json::Map<String, serde_json::Value> = map
            .iter()
            .map(|(key, value)| (key.trim().to_string(), typed_value(value)))
            .collect();
        Self::from_json(serde_json::Value::Object(object))
    }

    pub fn from_json(value: serde_json::Value) -> Result<Self, ConfigError> {
        let settings: Settings = serde_json::from_value(value)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        fn check(ok: bool, key: &'static str, reason: String) -> Result<(), ConfigError> {
            if ok {
                Ok(())
            } else {
                Err(ConfigError::OutOfRange { key, reason })
            }
        }

        check(
            self.severe_threshold < self.desat_threshold,
            "desat severe threshold",
            format!(
                "{} must be below desat threshold {}",
                self.severe_threshold, self.desat_threshold
            ),
        )?;
        check(
            self.desat_threshold < self.desat_subthreshold,
            "desat subthreshold",
            format!(
                "{} must be above desat threshold {}",
                self.desat_subthreshold, self.desat_threshold
            ),
        )?;
        check(
            self.spike_threshold < 0.0,
            "desat spike",
            format!("{} must be negative", self.spike_threshold),
        )?;
        check(
            self.minimum_interval_secs > 0.0,
            "minimum desat interval (sec)",
            format!("{} must be positive", self.minimum_interval_secs),
        )?;
        check(
            self.sustained_interval_secs > self.minimum_interval_secs,
            "sustained desat interval (sec)",
            format!(
                "{} must be longer than the minimum interval {}",
                self.sustained_interval_secs, self.minimum_interval_secs
            ),
        )?;
        check(
            self.sampling_period_secs > 0.0,
            "expected sampling rate (sec)",
            format!("{} must be positive", self.sampling_period_secs),
        )?;
        check(
            self.round_up_minutes >= 0.0,
            "night duration round up within (minutes)",
            format!("{} must not be negative", self.round_up_minutes),
        )?;
        check(
            self.minimum_night_hours > 0 && self.minimum_night_hours <= self.complete_night_hours,
            "minimum night duration (hours)",
            format!(
                "{} must be between 1 and the complete night duration {}",
                self.minimum_night_hours, self.complete_night_hours
            ),
        )?;
        check(
            self.bin_size_hours > 0,
            "night duration bin size (hours)",
            "must be positive".to_string(),
        )?;
        check(
            self.artifact_threshold_secs >= 0.0,
            "artifact duration threshold (sec)",
            format!("{} must not be negative", self.artifact_threshold_secs),
        )?;
        Ok(())
    }

    pub fn night_window(&self) -> NightWindow {
        NightWindow::new(self.night_start, self.night_stop)
    }
}

fn typed_value(raw: &str) -> serde_json::Value {
    let raw = raw.trim();
    if let Ok(i) = raw.parse::<i64>() {
        return serde_json::Value::from(i);
    }
    if let Ok(f) = raw.parse::<f64>() {
        if let Some(n) = serde_json::Number::from_f64(f) {
            return serde_json::Value::Number(n);
        }
    }
    serde_json::Value::String(raw.to_string())
}

/// Load settings from a `parameter,value` CSV or a JSON object file.
pub fn load_settings(path: &Path) -> Result<Settings> {
    let is_json = path.extension().and_then(|s| s.to_str()) == Some("json");

    let settings = if is_json {
        let file = std::fs::File::open(path)
            .with_context(|| format!("Failed to open settings file: {}", path.display()))?;
        let value: serde_json::Value = serde_json::from_reader(std::io::BufReader::new(file))
            .with_context(|| format!("Failed to parse settings JSON: {}", path.display()))?;
        Settings::from_json(value)?
    } else {
        let mut rdr = csv::ReaderBuilder::new()
            .flexible(true)
            .from_path(path)
            .with_context(|| format!("Failed to open settings file: {}", path.display()))?;
        let mut map = HashMap::new();
        for result in rdr.records() {
            let record = result?;
            if let (Some(key), Some(value)) = (record.get(0), record.get(1)) {
                if !key.trim().is_empty() {
                    map.insert(key.trim().to_string(), value.to_string());
                }
            }
        }
        Settings::from_map(&map)?
    };

    debug!("Loaded settings from {}: {:?}", path.display(), settings);
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sheet() -> HashMap<String, String> {
        [
            ("desat threshold", "90"),
            ("desat subthreshold", "94"),
            ("desat severe threshold", "80"),
            ("desat spike", "-4"),
            ("minimum desat interval (sec)", "10"),
            ("sustained desat interval (sec)", "60"),
            ("expected sampling rate (sec)", "1"),
            ("night_start_time (24hr HH:MM)", "21:00"),
            ("night_stop_time (24hr HH:MM)", "07:00:00"),
            ("night duration round up within (minutes)", "15"),
            ("minimum night duration (hours)", "4"),
            ("complete night duration (hours)", "10"),
            ("night duration bin size (hours)", "2"),
            ("artifact duration threshold (sec)", "10.5"),
            ("unrelated note", "ignored"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    #[test]
    fn test_from_map_parses_flat_sheet() {
        let settings = Settings::from_map(&sheet()).unwrap();
        assert_eq!(settings.desat_threshold, 90.0);
        assert_eq!(settings.spike_threshold, -4.0);
        assert_eq!(settings.artifact_threshold_secs, 10.5);
        assert_eq!(settings.night_stop, NaiveTime::from_hms_opt(7, 0, 0).unwrap());
        assert_eq!(settings.invalid_code, 500.0);
        assert_eq!(settings.complete_night_hours, 10);
    }

    #[test]
    fn test_night_time_aliases_accepted() {
        let mut map = sheet();
        map.remove("night_start_time (24hr HH:MM)");
        map.insert("night start time".to_string(), "22:30".to_string());
        let settings = Settings::from_map(&map).unwrap();
        assert_eq!(settings.night_start, NaiveTime::from_hms_opt(22, 30, 0).unwrap());
    }

    #[test]
    fn test_missing_key_is_malformed() {
        let mut map = sheet();
        map.remove("desat threshold");
        assert!(matches!(
            Settings::from_map(&map),
            Err(ConfigError::Malformed(_))
        ));
    }

    #[test]
    fn test_sustained_window_must_exceed_minimum() {
        let mut map = sheet();
        map.insert("sustained desat interval (sec)".to_string(), "5".to_string());
        match Settings::from_map(&map) {
            Err(ConfigError::OutOfRange { key, .. }) => {
                assert_eq!(key, "sustained desat interval (sec)")
            }
            other => panic!("expected out of range error, got {:?}", other),
        }
    }

    #[test]
    fn test_positive_spike_rejected() {
        let settings = Settings {
            spike_threshold: 3.0,
            ..Settings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_default_settings_are_valid() {
        assert!(Settings::default().validate().is_ok());
    }

    #[test]
    fn test_bad_clock_time() {
        let mut map = sheet();
        map.insert("night_start_time (24hr HH:MM)".to_string(), "late".to_string());
        assert!(Settings::from_map(&map).is_err());
    }
}
