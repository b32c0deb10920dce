//! Main entry point for Catalog Translator CLI

#![forbid(unsafe_code)]

use clap::Parser;
use dotenvy::dotenv;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use catalog_translator::cli::commands::{self, Commands, Session};

/// Catalog Translator - cached, quota-aware translation of catalog metadata
#[derive(Parser, Debug)]
#[command(name = "catalog-translator", version, about, long_about = None)]
struct Args {
    /// Settings file (JSON); environment variables override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenv().ok();

    let args = Args::parse();

    let log_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("catalog_translator={}", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let Some(command) = args.command else {
        println!("Please specify a command. Use --help for more information.");
        return Ok(());
    };

    let session = Session::load(args.config)?;

    match command {
        Commands::Translate {
            text,
            content_type,
            video_code,
            force_fresh,
        } => {
            commands::handle_translate(&session, text, content_type, video_code, force_fresh).await?;
        }
        Commands::Batch {
            file,
            content_type,
            video_code,
        } => {
            commands::handle_batch(&session, file, content_type, video_code).await?;
        }
        Commands::Tags { tags, video_code } => {
            commands::handle_tags(&session, tags, video_code).await?;
        }
        Commands::Stats => commands::handle_stats(&session).await?,
        Commands::Cache { action } => commands::handle_cache(&session, action).await?,
        Commands::Model { action } => commands::handle_model(&session, action).await?,
        Commands::Settings { action } => commands::handle_settings(&session, action).await?,
    }

    Ok(())
}
