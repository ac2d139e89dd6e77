use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;

use medrec::analysis::OpenAiClient;
use medrec::checksum::SkipDecision;
use medrec::export::{default_sinks, write_all};
use medrec::extraction::TextExtractor;
use medrec::logging::{init_logging, log_banner};
use medrec::pipeline::{clean_output, PipelineEvent, ProgressReporter};
use medrec::{Config, RecordPipeline};

/// Incremental ingestion of scanned medical records.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "config/config.toml")]
    config: PathBuf,

    /// Remove previous output (records, data files, HTML) before the run.
    #[arg(long)]
    clean: bool,

    /// Directory for the rotated log files.
    #[arg(long, default_value = "logs")]
    log_dir: PathBuf,

    /// Validate the configuration and exit.
    #[arg(long)]
    check: bool,
}

struct ConsoleProgress;

impl ProgressReporter for ConsoleProgress {
    fn report(&self, event: PipelineEvent<'_>) {
        match event {
            PipelineEvent::FilesFound { count } => {
                println!("{} {} files", "Found".bold(), count);
            }
            PipelineEvent::Skipping { file, days_since } => {
                println!(
                    "{} {} (processed {} days ago)",
                    "Skipping".yellow(),
                    display_name(file),
                    days_since
                );
            }
            PipelineEvent::Processing { file, decision } => {
                let reason = match decision {
                    SkipDecision::ProcessNew => "new".to_string(),
                    SkipDecision::ProcessStale { days_since } => {
                        format!("last processed {} days ago", days_since)
                    }
                    SkipDecision::ProcessUnknownDate => "unknown processing date".to_string(),
                    SkipDecision::Skip { days_since } => format!("processed {} days ago", days_since),
                };
                println!("{} {} ({})", "Processing".cyan(), display_name(file), reason);
            }
            PipelineEvent::Dropped { file, status } => {
                println!("{} {} ({:?})", "No text".red(), display_name(file), status);
            }
            PipelineEvent::Analyzing { file } => {
                println!("{} {}", "Analyzing".blue(), display_name(file));
            }
            PipelineEvent::Renamed { file, new_name } => {
                println!("{} {} -> {}", "Saved".green(), display_name(file), new_name);
            }
            PipelineEvent::CopyFailed { file } => {
                println!("{} {}", "Copy failed".red().bold(), display_name(file));
            }
            PipelineEvent::SummaryGenerated => {
                println!("{}", "Overall summary generated".green());
            }
        }
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

fn run(cli: Cli) -> Result<()> {
    if cli.check {
        Config::load(&cli.config)?;
        println!("{}", "Configuration OK".green());
        return Ok(());
    }

    let _guard = init_logging(&cli.log_dir)?;
    log_banner();

    let config = Config::load(&cli.config)?;
    let client = OpenAiClient::new(config.api_key()?);
    if cli.clean || config.clean_output_on_start {
        tracing::info!("Cleaning up previous output files");
        clean_output(&config).context("Failed to clean output location")?;
    }

    let extractor = TextExtractor::from_config(&config);
    let pipeline = RecordPipeline::new(&config, extractor, &client).with_progress(ConsoleProgress);

    let outcome = pipeline.run()?;
    write_all(&default_sinks(&config), &outcome)?;

    println!(
        "{} {} examined, {} processed, {} skipped, {} dropped, {} failed",
        "Done:".bold(),
        outcome.examined,
        outcome.processed,
        outcome.skipped,
        outcome.dropped,
        outcome.failed
    );
    println!("Output written to {}", config.output_location.display());
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %format!("{:#}", e), "Run aborted");
            eprintln!("{} {:#}", "error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}
