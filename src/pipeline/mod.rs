//! The staged pipeline: collect, kildomat, inndata, load.
//!
//! Each stage reads the directory the previous one writes and only processes files it
//! has not seen yet, so stages can be rerun independently.

pub mod collect;
pub mod error;
pub mod inndata;
pub mod kildomat;
pub mod load;
pub mod validate;

use crate::config::settings::Settings;
use crate::error::MetstatError;
use crate::files::storage::Storage;
use crate::frost::client::FrostClient;
use crate::pipeline::inndata::Corrections;
use crate::pipeline::load::LoadSummary;
use chrono::Utc;
use log::info;

/// Runs every stage in order, stopping at the first failing stage.
pub async fn run_all(
    settings: &Settings,
    storage: &Storage,
    client: &FrostClient,
    corrections: &Corrections,
) -> Result<LoadSummary, MetstatError> {
    let today = Utc::now().date_naive();
    info!("Running pipeline [{}] for {}", settings.environment, today);

    let collected = collect::run(settings, storage, client, today).await?;
    info!("Collected {} new snapshots", collected.len());
    kildomat::run(settings, storage)?;
    inndata::run(settings, storage, corrections)?;
    let summary = load::run(settings, storage)?;
    info!(
        "Pipeline finished: {} rows inserted, {} rows updated",
        summary.inserted, summary.updated
    );
    Ok(summary)
}
