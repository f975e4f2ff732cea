use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use docs_rag::Result;
use docs_rag::commands::{ask, check_models, handle_telegram_event, run_indexation};
use docs_rag::config::{Config, show_config};

#[derive(Parser)]
#[command(name = "docs-rag")]
#[command(about = "Question answering over PDF documents with a Telegram bot front end")]
#[command(version)]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the default configuration, or the effective one with --show
    Config {
        /// Print the configuration in effect instead of the defaults
        #[arg(long)]
        show: bool,
    },
    /// Extract the source PDFs, embed them and export the index snapshot
    Index,
    /// Answer a question against the exported index
    Ask {
        /// The question to answer
        question: String,
    },
    /// Handle one webhook event read from a file or stdin
    Webhook {
        /// JSON event file; stdin is read when omitted
        #[arg(long)]
        event: Option<PathBuf>,
    },
    /// Check that the model endpoint serves both configured models
    Check,
}

fn read_event(path: Option<&Path>) -> Result<serde_json::Value> {
    let raw = match path {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read event file {}", path.display()))?,
        None => {
            let mut raw = String::new();
            std::io::stdin().read_to_string(&mut raw)?;
            raw
        }
    };

    Ok(serde_json::from_str(&raw).context("Event is not valid JSON")?)
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Commands::Config { show: false } = cli.command {
        println!("{}", Config::default().to_toml()?);
        return Ok(ExitCode::SUCCESS);
    }

    let config = Config::load(cli.config.as_deref())?;

    let response = match cli.command {
        Commands::Config { .. } => {
            show_config(&config)?;
            return Ok(ExitCode::SUCCESS);
        }
        Commands::Index => run_indexation(&config).await,
        Commands::Ask { question } => {
            ask(&config, &question).await?;
            return Ok(ExitCode::SUCCESS);
        }
        Commands::Webhook { event } => {
            let event = read_event(event.as_deref())?;
            handle_telegram_event(&config, &event).await
        }
        Commands::Check => {
            check_models(&config).await?;
            return Ok(ExitCode::SUCCESS);
        }
    };

    println!(
        "{}",
        serde_json::to_string_pretty(&response.to_event_response())
            .context("Failed to serialize response")?
    );

    Ok(if response.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
