//! Binary entry point: parse CLI flags, sample a job stream from the
//! configured dataset, run the fleet to completion, and emit reports.
//! Author: Oveshen Govender | SupercomputeR

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing_subscriber::EnvFilter;

use plebiscito::config::{Cli, SimulatorConfig};
use plebiscito::controller::Controller;
use plebiscito::dataset;
use plebiscito::gpu::GpuType;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config: SimulatorConfig = cli.into();

    let rows = dataset::load_rows(&config.dataset).context("loading dataset")?;
    let mut rng = StdRng::from_entropy();
    let jobs = dataset::sample_jobs(
        &rows,
        config.entries_num,
        config.utility,
        config.decrement,
        GpuType::A100,
        &mut rng,
    )?;

    tracing::info!(jobs = jobs.len(), nodes = config.num_nodes, "starting simulation");

    let mut controller = Controller::spawn(config, jobs);
    let reports = controller.run_to_completion(Duration::from_secs(30)).await?;
    controller.write_reports(&reports, "fifo")?;
    controller.shutdown().await?;

    Ok(())
}
