//! `h5merge`: merge HDF5 files written with h5composites.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use h5composites::{FileMerger, MergeSettings};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "h5merge")]
#[command(about = "Merge HDF5 files", version)]
#[command(override_usage = "h5merge [OPTIONS] [--input input1,input2,... | input1 [input2 ...]]")]
struct Cli {
    /// The output file
    #[arg(short, long, default_value = "merged.h5")]
    output: PathBuf,

    /// A comma separated list of input files
    #[arg(short, long, value_delimiter = ',')]
    input: Vec<String>,

    /// The size of the buffer to use in MB
    #[arg(short = 'B', long = "buffer-size-mb", default_value_t = 10)]
    buffer_size_mb: usize,

    /// Overwrite the output file if it already exists
    #[arg(short = 'w', long)]
    overwrite: bool,

    /// Only output scalars
    #[arg(short = 's', long, conflicts_with = "only_datasets")]
    only_scalars: bool,

    /// Only output data sets
    #[arg(short = 'd', long)]
    only_datasets: bool,

    /// Log every object as it is merged
    #[arg(short, long)]
    verbose: bool,

    /// The input files
    inputs: Vec<PathBuf>,
}

impl Cli {
    fn input_files(&self) -> Vec<PathBuf> {
        self.input
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .chain(self.inputs.iter().cloned())
            .collect()
    }
}

fn run(cli: &Cli, inputs: &[PathBuf]) -> Result<()> {
    let settings = MergeSettings {
        only_scalars: cli.only_scalars,
        only_datasets: cli.only_datasets,
    };
    info!(output = %cli.output.display(), inputs = inputs.len(), "Create merger");
    let merger = FileMerger::new(&cli.output, inputs, cli.overwrite)
        .with_context(|| format!("cannot create merger for {}", cli.output.display()))?
        .with_buffer_size(cli.buffer_size_mb * 1024 * 1024)
        .with_merge_axis(0);
    info!("Merge");
    merger
        .merge(&settings)
        .with_context(|| format!("failed to merge into {}", cli.output.display()))?;
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let inputs = cli.input_files();
    if inputs.is_empty() {
        error!("You must specify at least 1 input file!");
        return ExitCode::FAILURE;
    }
    match run(&cli, &inputs) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}
