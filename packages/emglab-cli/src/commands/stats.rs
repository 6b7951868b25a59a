use crate::cli::StatsArgs;
use crate::exit_codes;
use crate::output;
use emglab_core::features::segment_statistics;
use emglab_core::RecordingTable;
use serde::Serialize;

#[derive(Serialize)]
struct StatsOutput {
    file: String,
    rows: usize,
    channels: usize,
    labels: Vec<emglab_core::features::LabelStatistics>,
}

pub fn execute(args: StatsArgs) -> i32 {
    let recording = match RecordingTable::read_csv(&args.input) {
        Ok(recording) => recording,
        Err(e) => {
            eprintln!("Error: {}: {}", args.input.display(), e);
            return exit_codes::for_error(&e);
        }
    };

    let stats = StatsOutput {
        file: args.input.display().to_string(),
        rows: recording.num_rows(),
        channels: recording.num_channels(),
        labels: segment_statistics(&recording.labels),
    };

    if args.json {
        return output::print_json(&stats);
    }

    println!(
        "{}: {} rows, {} channels",
        stats.file, stats.rows, stats.channels
    );
    println!();
    println!(
        "{:<16} {:>8} {:>8} {:>8} {:>8}",
        "LABEL", "SEGMENTS", "MIN", "MAX", "AVG"
    );
    for s in &stats.labels {
        println!(
            "{:<16} {:>8} {:>8} {:>8} {:>8.1}",
            s.label, s.segments, s.min_len, s.max_len, s.avg_len
        );
    }

    exit_codes::SUCCESS
}
