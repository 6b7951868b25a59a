use clap::{Args, Parser, Subcommand, ValueEnum};
use emglab_core::model::DEFAULT_FOLDS;
use emglab_core::ClassifierKind;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "emglab",
    version,
    about = "EMG recording and gesture model command-line tool",
    long_about = "Offline tools for labeled EMG recordings (CSV with a 'label' column\n\
                  and one 'ch_<i>' column per channel) and trained gesture models."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand)]
pub enum Command {
    /// Convert recordings into per-segment feature tables
    Features(FeaturesArgs),
    /// Show segment length statistics per label
    Stats(StatsArgs),
    /// Train a gesture model from a recording
    Train(TrainArgs),
    /// Show what a model artifact contains
    Inspect(InspectArgs),
    /// Cross-validate a feature table with Gaussian naive Bayes
    Evaluate(EvaluateArgs),
}

#[derive(Args)]
pub struct FeaturesArgs {
    /// Recording CSV files
    #[arg(required = true, num_args = 1..)]
    pub inputs: Vec<PathBuf>,

    /// Directory for the feature tables (default: next to each input)
    #[arg(long, short = 'o')]
    pub output_dir: Option<PathBuf>,

    /// Print a JSON summary instead of text
    #[arg(long)]
    pub json: bool,
}

#[derive(Args)]
pub struct StatsArgs {
    /// Recording CSV file
    pub input: PathBuf,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum ClassifierArg {
    LinearSvm,
}

impl From<ClassifierArg> for ClassifierKind {
    fn from(arg: ClassifierArg) -> Self {
        match arg {
            ClassifierArg::LinearSvm => ClassifierKind::LinearSvm,
        }
    }
}

#[derive(Args)]
pub struct TrainArgs {
    /// Recording CSV used as training input
    #[arg(long, short = 'i')]
    pub input: PathBuf,

    /// Where to write the model artifact
    #[arg(long, short = 'o')]
    pub output: PathBuf,

    /// Skip feature standardization
    #[arg(long)]
    pub no_standardize: bool,

    /// Classifier to fit
    #[arg(long, value_enum, default_value_t = ClassifierArg::LinearSvm)]
    pub classifier: ClassifierArg,

    /// Require this many channels in the recording
    #[arg(long, env = "EMGLAB_CHANNELS")]
    pub channels: Option<usize>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args)]
pub struct InspectArgs {
    /// Model artifact file
    pub model: PathBuf,

    /// Reject the model unless it was trained on this many channels
    #[arg(long, env = "EMGLAB_CHANNELS")]
    pub channels: Option<usize>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args)]
pub struct EvaluateArgs {
    /// Feature table CSV, as written by `features`
    pub input: PathBuf,

    /// Number of stratified folds
    #[arg(long, short = 'k', default_value_t = DEFAULT_FOLDS)]
    pub folds: usize,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}
