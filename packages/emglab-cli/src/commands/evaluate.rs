use crate::cli::EvaluateArgs;
use crate::exit_codes;
use crate::output;
use emglab_core::model::{cross_validate, CrossValidation};
use emglab_core::FeatureTable;
use serde::Serialize;

#[derive(Serialize)]
struct EvaluateOutput {
    file: String,
    #[serde(flatten)]
    result: CrossValidation,
}

pub fn execute(args: EvaluateArgs) -> i32 {
    let result = FeatureTable::read_csv(&args.input).and_then(|table| {
        log::info!(
            "{}: {} segments, {} features",
            args.input.display(),
            table.len(),
            table.num_features()
        );
        cross_validate(&table, args.folds)
    });

    let result = match result {
        Ok(result) => result,
        Err(e) => {
            eprintln!("Error: {}: {}", args.input.display(), e);
            return exit_codes::for_error(&e);
        }
    };

    if args.json {
        return output::print_json(&EvaluateOutput {
            file: args.input.display().to_string(),
            result,
        });
    }

    println!(
        "{}: {} segments, {}-fold cross-validation (Gaussian naive Bayes)",
        args.input.display(),
        result.samples,
        result.folds
    );
    println!("Mean accuracy: {:.3}", result.accuracy);
    for (fold, accuracy) in result.fold_accuracy.iter().enumerate() {
        println!("  fold {}: {:.3}", fold + 1, accuracy);
    }

    let width = result
        .confusion
        .labels
        .iter()
        .map(String::len)
        .max()
        .unwrap_or(0)
        .max("ACTUAL".len());

    println!();
    print!("{:<width$}", "ACTUAL", width = width);
    for label in &result.confusion.labels {
        print!(" {:>8}", label);
    }
    println!();
    for (label, row) in result.confusion.labels.iter().zip(&result.confusion.counts) {
        print!("{:<width$}", label, width = width);
        for count in row {
            print!(" {:>8}", count);
        }
        println!();
    }

    exit_codes::SUCCESS
}
