//! statlane: cache and backfill partner-portal analytics from the shell.
//!
//! # Usage
//!
//! ```text
//! statlane init --app 440 --page-created 2020-02-03
//! statlane sync --app 440
//! statlane get --app 440 --metric traffic --start 2024-01-01 --end 2024-01-31
//! ```

use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use statlane_core::Metric;

mod commands;
mod runtime;

#[derive(Parser)]
#[command(
    name = "statlane",
    about = "Single-lane analytics cache for partner-portal reports",
    version,
    propagate_version = true
)]
struct Cli {
    /// Configuration file.
    #[arg(short, long, global = true, default_value = "statlane.toml")]
    config: PathBuf,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a starter statlane.toml for one application.
    Init {
        #[arg(long)]
        app: String,
        /// Earliest day the portal can have data for the application.
        #[arg(long)]
        page_created: NaiveDate,
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
    /// Read a date range, filling gaps from the portal.
    Get {
        #[arg(long)]
        app: String,
        #[arg(long)]
        metric: Metric,
        #[arg(long)]
        start: NaiveDate,
        #[arg(long)]
        end: NaiveDate,
        /// Return cached rows even if some days could not be filled.
        #[arg(long)]
        partial: bool,
    },
    /// Backfill the full history of one metric, or of all of them.
    Sync {
        #[arg(long)]
        app: String,
        #[arg(long)]
        metric: Option<Metric>,
    },
    /// Merge a saved report into the cache.
    Ingest {
        #[arg(long)]
        app: String,
        #[arg(long)]
        metric: Metric,
        /// Report file, or `-` for stdin.
        #[arg(long, default_value = "-")]
        file: PathBuf,
    },
    /// Row and sentinel counts per configured application.
    Status,
    /// Clear one metric, or drop every table of an application.
    Reset {
        #[arg(long)]
        app: String,
        #[arg(long)]
        metric: Option<Metric>,
    },
    /// List physical tables and their row counts.
    Tables,
    /// Answer JSON requests read line by line from stdin.
    Messages,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,statlane=debug"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Command::Init {
            app,
            page_created,
            force,
        } => commands::init::run(&cli.config, &app, page_created, force),
        Command::Get {
            app,
            metric,
            start,
            end,
            partial,
        } => commands::query::get(&cli.config, &app, metric, start, end, partial).await,
        Command::Sync { app, metric } => commands::sync::sync(&cli.config, &app, metric).await,
        Command::Ingest { app, metric, file } => {
            commands::sync::ingest(&cli.config, &app, metric, &file).await
        }
        Command::Status => commands::admin::status(&cli.config).await,
        Command::Reset { app, metric } => commands::admin::reset(&cli.config, &app, metric).await,
        Command::Tables => commands::admin::tables(&cli.config),
        Command::Messages => commands::messages::serve(&cli.config).await,
    }
}
