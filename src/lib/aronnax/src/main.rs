use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use aronnax::{Config, Model};

#[derive(Parser, Debug)]
#[command(
    name = "aronnax",
    about = "Idealized isopycnal ocean model",
    long_about = "Idealized isopycnal ocean model.\n\nReads a run configuration, integrates the \
                  layered shallow-water equations on an Arakawa C-grid, and writes snapshots, \
                  averages, checkpoints, and diagnostics.",
    version = env!("CARGO_PKG_VERSION")
)]
struct Cli {
    /// Run configuration file
    #[arg(long, default_value = "aronnax.toml")]
    config: PathBuf,

    /// Directory that receives output/ and checkpoints/
    #[arg(long, default_value = ".")]
    output_dir: PathBuf,

    /// Increase log verbosity (-v: debug, -vv: trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

fn init_logging(cli: &Cli) {
    let default_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    let config = Config::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    let mut model = Model::new(config, &cli.output_dir).context("assembling the model")?;
    model.run().context("time stepping")?;
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli);
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}
