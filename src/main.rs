use anyhow::{bail, Result};
use clap::Parser;
use colored::Colorize;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod capability;
mod config;
mod diff;
mod error;
mod orchestrator;
mod state;

use capability::{
    CommandTestRunner, GeminiClient, GitVersionControl, LlmFixGenerator, LlmReviewer,
    PineconeMemory,
};
use config::{Config, Credentials, Overrides};
use orchestrator::{Capabilities, Orchestrator};

#[derive(Parser)]
#[command(name = "preflight")]
#[command(
    author,
    version,
    about = "Preflight - review, fix, and test a pending change before it leaves your machine"
)]
struct Cli {
    /// Path to the git working tree to review
    repo_path: PathBuf,

    /// Maximum review/fix/test attempts (default: 3)
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    max_attempts: Option<u32>,

    /// Test command to run after applying a fix (default: "npm test")
    #[arg(long)]
    test_command: Option<String>,

    /// Memory index name
    #[arg(long, env = "PINECONE_INDEX")]
    index: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Before parsing, so `.env` can supply argument defaults
    let _ = dotenvy::dotenv();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // Help and version are "errors" that go to stdout
            let code = if e.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
            let _ = e.print();
            return code;
        }
    };

    // Initialize logging; stdout is reserved for the run report
    let filter = if cli.verbose {
        EnvFilter::new("preflight=debug")
    } else {
        EnvFilter::new("preflight=info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("{} {e:#}", "Error:".red().bold());
            ExitCode::FAILURE
        }
    }
}

/// Wires the capabilities together and runs to completion.
///
/// Returns whether the run succeeded; `Err` only for setup failures.
async fn run(cli: Cli) -> Result<bool> {
    if !cli.repo_path.is_dir() {
        bail!(
            "Repository path does not exist or is not a directory: {}",
            cli.repo_path.display()
        );
    }

    let credentials = Credentials::from_env()?;
    let config = Config::load(&cli.repo_path)?.with_overrides(Overrides {
        max_attempts: cli.max_attempts,
        test_command: cli.test_command,
        index: cli.index,
    })?;
    tracing::debug!("Configuration: {:?}", config);

    let gemini = GeminiClient::new(&config.llm, credentials.google_api_key)?;
    let memory = PineconeMemory::new(
        &config.memory,
        credentials.pinecone_api_key,
        gemini.clone(),
    )?;
    let capabilities = Capabilities {
        vcs: Box::new(GitVersionControl::new()),
        tests: Box::new(CommandTestRunner::new(&config.tests)),
        reviewer: Box::new(LlmReviewer::new(
            gemini.clone(),
            config.llm.review_temperature,
        )),
        fixer: Box::new(LlmFixGenerator::new(gemini, config.llm.fix_temperature)),
        memory: Box::new(memory),
    };

    let orchestrator = Orchestrator::new(capabilities, config.memory.top_k);
    let state = orchestrator
        .run(&cli.repo_path, config.run.max_attempts)
        .await;

    Ok(state.success)
}
