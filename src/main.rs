use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use log::info;
use metstat::{
    collect, inndata, kildomat, load, run_all, Corrections, FrostClient, Settings, Storage,
    DEFAULT_ENVIRONMENT, DEFAULT_SETTINGS_FILE,
};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Frost weather data pipeline")]
struct Cli {
    /// Settings file with one table per environment.
    #[arg(long, default_value = DEFAULT_SETTINGS_FILE)]
    config: PathBuf,

    /// Environment table to use, falls back to `METSTAT_ENV`, then `default`.
    #[arg(long)]
    env: Option<String>,

    /// More logging, repeat for trace output.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Station id to drop when station validation fails, as `ID` or `ID=reason`.
    #[arg(long = "drop-station", value_name = "ID[=REASON]")]
    drop_stations: Vec<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch weather stations and new observations into kildedata.
    Collect,
    /// Convert kildedata JSON snapshots to pre-inndata parquet.
    Kildomat,
    /// Standardise and validate pre-inndata into inndata.
    Inndata,
    /// Reconcile inndata into the datastore.
    Load,
    /// Run every stage in order.
    RunAll,
}

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("metstat={default_level},warn")));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn corrections(drop_stations: &[String]) -> Corrections {
    drop_stations
        .iter()
        .fold(Corrections::new(), |corrections, arg| match arg.split_once('=') {
            Some((id, reason)) => corrections.drop_station(id, reason),
            None => corrections.drop_station(arg.as_str(), "dropped on request"),
        })
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let environment = cli
        .env
        .or_else(|| std::env::var("METSTAT_ENV").ok())
        .unwrap_or_else(|| DEFAULT_ENVIRONMENT.to_string());
    let settings = Settings::load(&cli.config, &environment)
        .with_context(|| format!("loading settings from {}", cli.config.display()))?;
    if settings.kildedata_root_dir.is_remote() || settings.datastore_dir.is_remote() {
        info!("Remote directories are read from Google Cloud Storage");
    }
    let storage = Storage::default();
    let corrections = corrections(&cli.drop_stations);

    match cli.command {
        Command::Collect => {
            let client = FrostClient::from_env()?;
            let today = Utc::now().date_naive();
            let written = collect::run(&settings, &storage, &client, today).await?;
            info!("Collected {} files", written.len());
        }
        Command::Kildomat => {
            kildomat::run(&settings, &storage)?;
        }
        Command::Inndata => {
            inndata::run(&settings, &storage, &corrections)?;
        }
        Command::Load => {
            let summary = load::run(&settings, &storage)?;
            info!("{} rows inserted, {} rows updated", summary.inserted, summary.updated);
        }
        Command::RunAll => {
            let client = FrostClient::from_env()?;
            run_all(&settings, &storage, &client, &corrections).await?;
        }
    }
    Ok(())
}
