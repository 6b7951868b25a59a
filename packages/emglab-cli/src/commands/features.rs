use crate::cli::FeaturesArgs;
use crate::exit_codes;
use crate::output;
use emglab_core::{EmgError, RecordingTable, TrainingSet};
use rayon::prelude::*;
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Serialize)]
struct FileResult {
    input: String,
    output: Option<String>,
    segments: usize,
    dropped_segments: usize,
    error: Option<String>,
}

#[derive(Serialize)]
struct FeaturesOutput {
    total: usize,
    succeeded: usize,
    failed: usize,
    results: Vec<FileResult>,
}

fn output_path(input: &Path, output_dir: Option<&Path>) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "recording".to_string());
    let file_name = format!("{}.features.csv", stem);
    match output_dir {
        Some(dir) => dir.join(file_name),
        None => input.with_file_name(file_name),
    }
}

fn convert(input: &Path, output: &Path) -> Result<TrainingSet, EmgError> {
    let recording = RecordingTable::read_csv(input)?;
    let set = TrainingSet::from_recording(&recording)?;
    set.table.write_csv(output)?;
    Ok(set)
}

pub fn execute(args: FeaturesArgs) -> i32 {
    if let Some(dir) = &args.output_dir {
        if let Err(e) = std::fs::create_dir_all(dir) {
            eprintln!("Error: cannot create '{}': {}", dir.display(), e);
            return exit_codes::INPUT_ERROR;
        }
    }

    let results: Vec<FileResult> = args
        .inputs
        .par_iter()
        .map(|input| {
            let output = output_path(input, args.output_dir.as_deref());
            match convert(input, &output) {
                Ok(set) => {
                    log::info!(
                        "{} -> {} ({} segments)",
                        input.display(),
                        output.display(),
                        set.num_samples()
                    );
                    FileResult {
                        input: input.display().to_string(),
                        output: Some(output.display().to_string()),
                        segments: set.num_samples(),
                        dropped_segments: set.dropped_segments,
                        error: None,
                    }
                }
                Err(e) => FileResult {
                    input: input.display().to_string(),
                    output: None,
                    segments: 0,
                    dropped_segments: 0,
                    error: Some(e.to_string()),
                },
            }
        })
        .collect();

    let failed = results.iter().filter(|r| r.error.is_some()).count();
    let summary = FeaturesOutput {
        total: results.len(),
        succeeded: results.len() - failed,
        failed,
        results,
    };

    if args.json {
        let code = output::print_json(&summary);
        if code != exit_codes::SUCCESS {
            return code;
        }
    } else {
        for r in &summary.results {
            match (&r.output, &r.error) {
                (Some(out), _) => println!(
                    "{} -> {} ({} segments, {} dropped)",
                    r.input, out, r.segments, r.dropped_segments
                ),
                (None, Some(err)) => eprintln!("Error: {}: {}", r.input, err),
                (None, None) => {}
            }
        }
    }

    if summary.failed == 0 {
        exit_codes::SUCCESS
    } else if summary.succeeded > 0 {
        exit_codes::PARTIAL_FAILURE
    } else {
        exit_codes::INPUT_ERROR
    }
}
