use crate::cli::TrainArgs;
use crate::exit_codes;
use crate::output;
use emglab_core::{train_model, TrainingOptions};

pub async fn execute(args: TrainArgs) -> i32 {
    let options = TrainingOptions::new(&args.input, &args.output)
        .with_standardize(!args.no_standardize)
        .with_classifier(args.classifier.into());
    let channels = args.channels;

    log::info!(
        "Training {} from {}",
        options.classifier,
        options.input_path.display()
    );

    // fitting is CPU-bound
    let result = tokio::task::spawn_blocking(move || train_model(&options, channels)).await;

    let report = match result {
        Ok(Ok(report)) => report,
        Ok(Err(e)) => {
            eprintln!("Error: {}", e);
            return exit_codes::for_error(&e);
        }
        Err(e) => {
            eprintln!("Error: training task failed: {}", e);
            return exit_codes::EXECUTION_ERROR;
        }
    };

    if args.json {
        return output::print_json(&report);
    }

    println!("Model written to {}", report.output_path.display());
    println!(
        "  classifier: {} ({})",
        report.classifier,
        if report.standardized {
            "standardized"
        } else {
            "raw features"
        }
    );
    println!("  channels:   {}", report.num_channels);
    println!(
        "  segments:   {} ({} dropped)",
        report.samples, report.dropped_segments
    );
    println!("  classes:    {}", report.classes.join(", "));
    println!("  elapsed:    {} ms", report.elapsed_ms);

    exit_codes::SUCCESS
}
