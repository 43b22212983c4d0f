//! cutflow CLI

mod config;
mod report;
mod run;
mod source;

use anyhow::{Result, bail};
use cf_analysis::Analysis;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use crate::config::Overrides;

#[derive(Parser)]
#[command(name = "cutflow")]
#[command(about = "cutflow - event selection and histogramming for e+e- -> Z -> mu mu")]
#[command(version)]
struct Cli {
    /// Log verbosity level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    log_level: tracing::Level,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an analysis over every configured process
    Run {
        /// Run configuration (YAML, or JSON by extension)
        #[arg(short, long)]
        config: PathBuf,

        /// Analysis to run (zmumu_xsec, zmumu_afb). Overrides the config.
        #[arg(long)]
        analysis: Option<Analysis>,

        /// Restrict to these processes (repeatable). Overrides the config.
        #[arg(long = "process")]
        processes: Vec<String>,

        /// Input directory with `<process>/*.jsonl`
        #[arg(long)]
        input_dir: Option<PathBuf>,

        /// Output directory for `<process>.json`
        #[arg(long)]
        output_dir: Option<PathBuf>,

        /// Sample dictionary (cross sections, generated events)
        #[arg(long)]
        sample_dict: Option<PathBuf>,

        /// Worker threads
        #[arg(long)]
        workers: Option<usize>,

        /// Integrated luminosity (pb^-1) for --scale
        #[arg(long)]
        int_lumi: Option<f64>,

        /// Scale histograms to the integrated luminosity before writing
        #[arg(long)]
        scale: bool,

        /// Retries for a failing partition
        #[arg(long)]
        max_retries: Option<usize>,

        /// Run summary file (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Selected-event yields per process, bare and normalized
    Yields {
        /// Directory with `cutflow run` outputs
        #[arg(long)]
        output_dir: PathBuf,

        /// Process (repeatable)
        #[arg(long = "process", required = true)]
        processes: Vec<String>,

        /// Luminosity (pb^-1); LEP is 44.84
        #[arg(long, default_value = "44.84")]
        lumi: f64,

        /// Cut-flow bin holding the final selection
        #[arg(long, default_value = "4")]
        bin: usize,

        /// Output file for results (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Selection acceptance from the cut-flow counter
    Acceptance {
        /// Directory with `cutflow run` outputs
        #[arg(long)]
        output_dir: PathBuf,

        /// Process
        #[arg(long)]
        process: String,

        /// Cut-flow bin of all events
        #[arg(long, default_value = "0")]
        total_bin: usize,

        /// Cut-flow bin of selected events
        #[arg(long, default_value = "4")]
        selected_bin: usize,

        /// Output file for results (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Forward-backward asymmetry from the cos(theta_c) distribution
    Afb {
        /// Directory with `cutflow run` outputs
        #[arg(long)]
        output_dir: PathBuf,

        /// Process
        #[arg(long)]
        process: String,

        /// Luminosity (pb^-1); LEP is 44.84
        #[arg(long, default_value = "44.84")]
        lumi: f64,

        /// Lower bound on |cos theta_c|
        #[arg(long, default_value = "0.0")]
        min: f64,

        /// Upper bound on |cos theta_c|
        #[arg(long, default_value = "0.9")]
        max: f64,

        /// Merge this many adjacent bins first
        #[arg(long, default_value = "1")]
        rebin: usize,

        /// Angular histogram (e.g. gen_cosThetac for generator level)
        #[arg(long, default_value = "cosThetac")]
        histogram: String,

        /// Output file for results (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(cli.log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run {
            config,
            analysis,
            processes,
            input_dir,
            output_dir,
            sample_dict,
            workers,
            int_lumi,
            scale,
            max_retries,
            output,
        } => {
            let overrides = Overrides {
                analysis,
                input_dir,
                output_dir,
                sample_dict,
                workers,
                int_lumi,
                do_scale: scale,
                max_retries,
                processes,
            };
            cmd_run(&config, overrides, output.as_ref())
        }
        Commands::Yields { output_dir, processes, lumi, bin, output } => {
            write_json(output.as_ref(), report::yields(&output_dir, &processes, lumi, bin)?)
        }
        Commands::Acceptance { output_dir, process, total_bin, selected_bin, output } => write_json(
            output.as_ref(),
            report::acceptance(&output_dir, &process, total_bin, selected_bin)?,
        ),
        Commands::Afb { output_dir, process, lumi, min, max, rebin, histogram, output } => {
            let args = report::AfbArgs { histogram: &histogram, lumi, abs_min: min, abs_max: max, rebin };
            write_json(output.as_ref(), report::afb(&output_dir, &process, &args)?)
        }
    }
}

fn cmd_run(config: &Path, overrides: Overrides, output: Option<&PathBuf>) -> Result<()> {
    let cfg = config::read_run_config(config)?.apply(overrides);
    let summary = run::run_all(&cfg)?;
    write_json(output, serde_json::to_value(&summary)?)?;
    let failed = summary.n_failed();
    if failed > 0 {
        bail!("{failed} of {} dataset(s) failed", summary.datasets.len());
    }
    Ok(())
}

fn write_json(output: Option<&PathBuf>, value: serde_json::Value) -> Result<()> {
    if let Some(path) = output {
        std::fs::write(path, serde_json::to_string_pretty(&value)?)?;
    } else {
        println!("{}", serde_json::to_string_pretty(&value)?);
    }
    Ok(())
}
