use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "gds-cli")]
#[command(about = "Group Directory Sync command-line interface")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one full resynchronization from Planning Center into the
    /// directory table.
    Sync,
}

#[tokio::main]
async fn main() -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Sync) {
        Commands::Sync => {
            tracing::info!("starting sync from Planning Center to the directory table");
            let summary = gds_sync::run_sync_once_from_env().await?;
            println!(
                "sync complete: run_id={} pages={} groups={} rows={} batches={}",
                summary.run_id,
                summary.outcome.pages,
                summary.outcome.fetched_groups,
                summary.outcome.rows_upserted,
                summary.outcome.batches
            );
        }
    }

    Ok(())
}
