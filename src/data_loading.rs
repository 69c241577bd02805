use crate::preprocessing::RawSample;
use anyhow::{anyhow, Context, Result};
use chrono::{Duration, NaiveDate, NaiveDateTime};
use log::{debug, info, warn};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// One row of an oximeter export.
#[derive(Debug, Deserialize)]
struct SampleRow {
    year: i32,
    month: u32,
    day: u32,
    hour: u32,
    minute: u32,
    second: u32,
    spo2: f64,
    pulse: f64,
}

impl SampleRow {
    fn timestamp(&self) -> Option<NaiveDateTime> {
        NaiveDate::from_ymd_opt(self.year, self.month, self.day)?.and_hms_opt(
            self.hour,
            self.minute,
            self.second,
        )
    }
}

/// Manual correction for a file whose clock was wrong: the real end time of the recording.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct TimeFix {
    pub filename: String,
    #[serde(rename = "end hour")]
    pub end_hour: u32,
    #[serde(rename = "end minute")]
    pub end_minute: u32,
}

#[derive(Debug)]
pub struct SubjectRecording {
    pub subject_id: String,
    pub files: Vec<PathBuf>,
    /// One sample sequence per file, in file name order
    pub parts: Vec<Vec<RawSample>>,
}

/// Subject id is the file stem up to the first underscore: `S12_part2.csv` -> `S12`.
pub fn subject_id_from_path(path: &Path) -> Option<String> {
    let stem = path.file_stem()?.to_str()?;
    let id = stem.split('_').next()?;
    if id.is_empty() {
        None
    } else {
        Some(id.to_string())
    }
}

/// Group the CSV files directly inside `input_dir` by subject.
pub fn discover_subject_files(input_dir: &Path) -> Result<BTreeMap<String, Vec<PathBuf>>> {
    let mut subjects: BTreeMap<String, Vec<PathBuf>> = BTreeMap::new();

    for entry in WalkDir::new(input_dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry =
            entry.with_context(|| format!("Failed to list directory: {}", input_dir.display()))?;
        let path = entry.path();
        if !entry.file_type().is_file()
            || path.extension().and_then(|s| s.to_str()) != Some("csv")
        {
            continue;
        }
        match subject_id_from_path(path) {
            Some(id) => subjects.entry(id).or_default().push(path.to_path_buf()),
            None => warn!("Skipping file without subject id: {}", path.display()),
        }
    }

    info!(
        "input files found: {} file(s) for {} subject(s)",
        subjects.values().map(Vec::len).sum::<usize>(),
        subjects.len()
    );
    Ok(subjects)
}

pub fn read_sample_file(path: &Path) -> Result<Vec<RawSample>> {
    let file =
        File::open(path).with_context(|| format!("Failed to open file: {}", path.display()))?;
    let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(file);
    let mut samples = Vec::new();

    for (line, result) in rdr.deserialize::<SampleRow>().enumerate() {
        let row = result.with_context(|| format!("Bad sample row in {}", path.display()))?;
        let timestamp = row.timestamp().ok_or_else(|| {
            anyhow!(
                "Invalid date/time on data row {} of {}: {:?}",
                line + 1,
                path.display(),
                row
            )
        })?;
        samples.push(RawSample {
            timestamp,
            spo2: row.spo2,
            pulse: row.pulse,
        });
    }

    debug!("Read {} samples from {}", samples.len(), path.display());
    Ok(samples)
}

pub fn load_time_fixes(path: &Path) -> Result<HashMap<String, TimeFix>> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("Failed to open time fix table: {}", path.display()))?;
    let mut fixes = HashMap::new();
    for result in rdr.deserialize::<TimeFix>() {
        let fix = result.with_context(|| format!("Bad time fix row in {}", path.display()))?;
        fixes.insert(fix.filename.clone(), fix);
    }
    Ok(fixes)
}

/// Re-timestamp `samples` as an evenly spaced series ending at the fixed end
/// time on the date of the last sample. The spacing is the first interval of the file.
pub fn apply_time_fix(samples: &mut [RawSample], fix: &TimeFix) -> Result<()> {
    if samples.len() < 2 {
        return Err(anyhow!(
            "{} needs at least two samples to infer its sampling interval",
            fix.filename
        ));
    }
    let interval = samples[1].timestamp - samples[0].timestamp;
    let last_date = samples[samples.len() - 1].timestamp.date();
    let end = last_date
        .and_hms_opt(fix.end_hour, fix.end_minute, 0)
        .ok_or_else(|| {
            anyhow!(
                "Invalid end time {}:{} for {}",
                fix.end_hour,
                fix.end_minute,
                fix.filename
            )
        })?;

    let n = samples.len() as i32;
    for (i, sample) in samples.iter_mut().enumerate() {
        let steps_from_end = n - 1 - i as i32;
        sample.timestamp = end - interval * steps_from_end;
    }

    info!(
        "fixing timestamps in file: {}, new start: {}, new end: {}",
        fix.filename,
        samples[0].timestamp,
        samples[samples.len() - 1].timestamp
    );
    Ok(())
}

/// Read every part of one subject, applying any listed timestamp fixes.
pub fn load_subject(
    subject_id: &str,
    files: &[PathBuf],
    fixes: &HashMap<String, TimeFix>,
) -> Result<SubjectRecording> {
    let mut parts = Vec::with_capacity(files.len());
    let mut interval = None;

    for path in files {
        let mut samples = read_sample_file(path)?;
        if samples.len() >= 2 {
            interval = Some(samples[1].timestamp - samples[0].timestamp);
        }

        let filename = path.file_name().and_then(|s| s.to_str()).unwrap_or_default();
        if let Some(fix) = fixes.get(filename) {
            apply_time_fix(&mut samples, fix)?;
        }
        parts.push(samples);
    }

    info!(
        "{}: {} piece(s). sampling interval {} sec",
        subject_id,
        parts.len(),
        interval
            .map(|d: Duration| d.num_seconds().to_string())
            .unwrap_or_else(|| "unknown".to_string())
    );

    Ok(SubjectRecording {
        subject_id: subject_id.to_string(),
        files: files.to_vec(),
        parts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        let mut file = File::create(&path).unwrap();
        file.write_all(body.as_bytes()).unwrap();
        path
    }

    const HEADER: &str = "year,month,day,hour,minute,second,spo2,pulse\n";

    #[test]
    fn test_subject_id_from_path() {
        assert_eq!(
            subject_id_from_path(Path::new("/data/S12_part2.csv")),
            Some("S12".to_string())
        );
        assert_eq!(
            subject_id_from_path(Path::new("S7.csv")),
            Some("S7".to_string())
        );
        assert_eq!(subject_id_from_path(Path::new("_x.csv")), None);
    }

    #[test]
    fn test_discover_groups_by_subject() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "A_2.csv", HEADER);
        write_file(dir.path(), "A_1.csv", HEADER);
        write_file(dir.path(), "B.csv", HEADER);
        write_file(dir.path(), "notes.txt", "x");

        let subjects = discover_subject_files(dir.path()).unwrap();
        assert_eq!(subjects.keys().collect::<Vec<_>>(), vec!["A", "B"]);
        let a: Vec<_> = subjects["A"]
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(a, vec!["A_1.csv", "A_2.csv"]);
    }

    #[test]
    fn test_read_sample_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            dir.path(),
            "S1.csv",
            &format!("{}2024,3,1,23,0,0,95,61\n2024,3,1,23,0,1,500,500\n", HEADER),
        );
        let samples = read_sample_file(&path).unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[1].spo2, 500.0);
        assert_eq!(
            samples[1].timestamp,
            NaiveDate::from_ymd_opt(2024, 3, 1)
                .unwrap()
                .and_hms_opt(23, 0, 1)
                .unwrap()
        );
    }

    #[test]
    fn test_invalid_date_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            dir.path(),
            "S1.csv",
            &format!("{}2024,2,30,23,0,0,95,61\n", HEADER),
        );
        assert!(read_sample_file(&path).is_err());
    }

    #[test]
    fn test_time_fix_ends_at_given_time() {
        let base = NaiveDate::from_ymd_opt(2024, 3, 2)
            .unwrap()
            .and_hms_opt(1, 0, 0)
            .unwrap();
        let mut samples: Vec<RawSample> = (0..4)
            .map(|i| RawSample {
                timestamp: base + Duration::seconds(4 * i),
                spo2: 95.0,
                pulse: 60.0,
            })
            .collect();
        let fix = TimeFix {
            filename: "S1.csv".to_string(),
            end_hour: 6,
            end_minute: 30,
        };
        apply_time_fix(&mut samples, &fix).unwrap();

        let end = NaiveDate::from_ymd_opt(2024, 3, 2)
            .unwrap()
            .and_hms_opt(6, 30, 0)
            .unwrap();
        assert_eq!(samples[3].timestamp, end);
        assert_eq!(samples[0].timestamp, end - Duration::seconds(12));
    }

    #[test]
    fn test_load_time_fixes() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            dir.path(),
            "fix.csv",
            "filename,end hour,end minute\nS1_a.csv,6,45\n",
        );
        let fixes = load_time_fixes(&path).unwrap();
        assert_eq!(fixes["S1_a.csv"].end_hour, 6);
        assert_eq!(fixes["S1_a.csv"].end_minute, 45);
    }
}
