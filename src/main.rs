use anyhow::Context;
use clap::Parser;
use desat_decoder::config::{load_settings, Args};
use desat_decoder::data_loading::{discover_subject_files, load_subject, load_time_fixes};
use desat_decoder::night_analysis::{aggregate, DurationBins};
use desat_decoder::{analyze_night, output};
use env_logger::Env;
use log::{error, info, warn};
use std::collections::HashMap;

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let settings = load_settings(&args.settings)?;
    info!(
        "night window {} to {}, desat < {}, sub desat < {}, severe < {}",
        settings.night_start,
        settings.night_stop,
        settings.desat_threshold,
        settings.desat_subthreshold,
        settings.severe_threshold
    );
    let bins = DurationBins::from_settings(&settings);

    let fixes = match &args.time_fix {
        Some(path) => load_time_fixes(path)?,
        None => HashMap::new(),
    };

    let subjects = discover_subject_files(&args.input_path)
        .with_context(|| format!("Failed to scan {}", args.input_path.display()))?;
    if subjects.is_empty() {
        warn!("No sample files found in {}", args.input_path.display());
    }

    let mut records = Vec::with_capacity(subjects.len());
    for (subject_id, files) in &subjects {
        info!("processing {} ({} file(s))", subject_id, files.len());

        let recording = match load_subject(subject_id, files, &fixes) {
            Ok(recording) => recording,
            Err(e) => {
                error!("{}: failed to load recording: {:#}", subject_id, e);
                continue;
            }
        };

        let record = match analyze_night(subject_id, &recording.parts, &settings, &bins) {
            Ok(record) => record,
            Err(e) => {
                error!("{}: {}", subject_id, e);
                continue;
            }
        };

        if let Err(e) = output::write_night(&args.output, &record) {
            error!("{}: failed to write results: {:#}", subject_id, e);
            continue;
        }
        info!(
            "{}: {:.2} hours recorded, {} hour bin",
            subject_id,
            record.total_duration_seconds / 3600.0,
            record.duration_bin
        );
        records.push(record);
    }

    let cohort = aggregate(&bins, &records);
    let written = output::write_aggregate(&args.output, &cohort)?;
    info!(
        "{} of {} subject(s) analysed, {} aggregate table(s) written to {}",
        records.len(),
        subjects.len(),
        written.len(),
        args.output.display()
    );

    Ok(())
}
