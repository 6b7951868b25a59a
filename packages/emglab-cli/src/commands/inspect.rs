use crate::cli::InspectArgs;
use crate::exit_codes;
use crate::output;
use emglab_core::Pipeline;

pub fn execute(args: InspectArgs) -> i32 {
    let pipeline = match Pipeline::load(&args.model, args.channels) {
        Ok(pipeline) => pipeline,
        Err(e) => {
            eprintln!("Error: {}", e);
            return exit_codes::for_error(&e);
        }
    };
    let summary = pipeline.summary();

    if args.json {
        return output::print_json(&summary);
    }

    println!("{}", args.model.display());
    println!("  classifier:   {}", summary.kind);
    println!("  classes:      {}", summary.classes.join(", "));
    println!(
        "  inputs:       {} features ({} channels)",
        summary.num_features, summary.num_channels
    );
    println!(
        "  standardized: {}",
        if summary.standardized { "yes" } else { "no" }
    );
    println!("  trained on:   {} segments", summary.training_samples);
    println!("  trained at:   {}", summary.trained_at.to_rfc3339());

    exit_codes::SUCCESS
}
