use crate::night_analysis::CohortSummary;
use crate::NightRecord;
use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use log::info;
use std::path::{Path, PathBuf};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

fn format_ts(ts: NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

fn format_opt(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn create_writer(dir: &Path, filename: &str) -> Result<(csv::Writer<std::fs::File>, PathBuf)> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create output directory: {}", dir.display()))?;
    let full_path = dir.join(filename);
    let file = std::fs::File::create(&full_path)
        .with_context(|| format!("Failed to create file: {}", full_path.display()))?;
    Ok((csv::Writer::from_writer(file), full_path))
}

/// Write the annotated night: conditioned values, flags, then every mask and its edges.
pub fn write_annotated_night(dir: &Path, record: &NightRecord) -> Result<PathBuf> {
    let (mut writer, path) = create_writer(dir, &format!("{}_night.csv", record.subject_id))?;

    let mut header: Vec<String> = [
        "timestamp",
        "spo2",
        "pulse",
        "interval",
        "spo2_invalid",
        "pulse_invalid",
        "both_invalid",
        "either_invalid",
        "gap",
        "filled_spo2",
        "filled_pulse",
        "diff_spo2",
        "desat",
        "sub_desat",
        "severe_desat",
        "spike_desat",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    for mask in record.masks.iter() {
        let name = format!(
            "{}_dur_{}",
            mask.window.label(),
            mask.condition.label().replace(' ', "_")
        );
        let edge_name = format!("{}_bout_start", name);
        header.push(name);
        header.push(edge_name);
    }
    writer.write_record(&header)?;

    for (i, s) in record.samples.iter().enumerate() {
        let c = &s.sample;
        let mut row = vec![
            format_ts(c.timestamp),
            c.raw_spo2.to_string(),
            c.raw_pulse.to_string(),
            format_opt(c.interval_seconds),
            c.spo2_invalid.to_string(),
            c.pulse_invalid.to_string(),
            c.both_invalid.to_string(),
            c.either_invalid.to_string(),
            c.is_gap.to_string(),
            format_opt(c.filled_spo2),
            format_opt(c.filled_pulse),
            format_opt(c.delta_spo2),
            s.flags.desat.to_string(),
            s.flags.subdesat.to_string(),
            s.flags.severe_desat.to_string(),
            s.flags.spike_desat.to_string(),
        ];
        for mask in record.masks.iter() {
            row.push(mask.values[i].to_string());
            row.push(mask.edges[i].to_string());
        }
        writer.write_record(&row)?;
    }

    writer.flush()?;
    info!("annotated night time series saved to {}", path.display());
    Ok(path)
}

/// One CSV per bout list, header written even when the list is empty.
pub fn write_bout_lists(dir: &Path, record: &NightRecord) -> Result<()> {
    for list in &record.bout_lists {
        let filename = format!(
            "{}_{}_bouts.csv",
            record.subject_id,
            list.name().replace(' ', "_")
        );
        let (mut writer, _) = create_writer(dir, &filename)?;
        writer.write_record([
            "start",
            "stop",
            "duration",
            "artifact_pulse_duration",
            "artifact_spo2_duration",
            "artifact_both_duration",
            "artifact_either_duration",
            "severe_overlap_duration",
            "severe_overlap_ratio",
            "min_spo2",
            "mean_spo2",
            "median_spo2",
            "started_subdesat",
        ])?;
        for bout in &list.bouts {
            writer.write_record(&[
                format_ts(bout.start_ts),
                format_ts(bout.stop_ts),
                bout.duration_seconds.to_string(),
                bout.artifact_pulse_duration.to_string(),
                bout.artifact_spo2_duration.to_string(),
                bout.artifact_both_duration.to_string(),
                bout.artifact_either_duration.to_string(),
                bout.severe_overlap_duration.to_string(),
                bout.severe_overlap_ratio.to_string(),
                bout.min_spo2.to_string(),
                bout.mean_spo2.to_string(),
                bout.median_spo2.to_string(),
                bout.preceded_by_subdesat.to_string(),
            ])?;
        }
        writer.flush()?;
    }
    Ok(())
}

pub fn write_summary(dir: &Path, record: &NightRecord) -> Result<PathBuf> {
    let (mut writer, path) = create_writer(dir, &format!("{}_summary.csv", record.subject_id))?;

    let mut header = vec![
        "night start".to_string(),
        "night stop".to_string(),
        "duration bin (hours)".to_string(),
    ];
    header.extend(record.summary.iter().map(|(k, _)| k.to_string()));
    writer.write_record(&header)?;

    let mut row = vec![
        format_ts(record.recording_start),
        format_ts(record.recording_stop),
        record.duration_bin.to_string(),
    ];
    row.extend(record.summary.iter().map(|(_, v)| v.to_string()));
    writer.write_record(&row)?;

    writer.flush()?;
    Ok(path)
}

pub fn write_night(dir: &Path, record: &NightRecord) -> Result<()> {
    write_annotated_night(dir, record)?;
    write_bout_lists(dir, record)?;
    write_summary(dir, record)?;
    Ok(())
}

/// One table per duration bin, one row per subject.
pub fn write_aggregate(dir: &Path, cohort: &CohortSummary) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::with_capacity(cohort.bins.len());

    for (bin, subjects) in &cohort.bins {
        let (mut writer, path) =
            create_writer(dir, &format!("aggregate_{}_hour_night_session.csv", bin))?;

        let keys: Vec<String> = subjects
            .values()
            .next()
            .map(|night| night.summary.iter().map(|(k, _)| k.to_string()).collect())
            .unwrap_or_default();

        let mut header = vec![
            "subject".to_string(),
            "night start".to_string(),
            "night stop".to_string(),
        ];
        header.extend(keys.iter().cloned());
        writer.write_record(&header)?;

        for (subject, night) in subjects {
            let mut row = vec![
                subject.clone(),
                format_ts(night.recording_start),
                format_ts(night.recording_stop),
            ];
            row.extend(keys.iter().map(|k| format_opt(night.summary.get(k))));
            writer.write_record(&row)?;
        }

        writer.flush()?;
        info!(
            "{} hour night session: {} subject(s) written to {}",
            bin,
            subjects.len(),
            path.display()
        );
        paths.push(path);
    }

    Ok(paths)
}
