//! Dataset sampler: reads a CSV of job templates and synthesizes a stream
//! of jobs by weighted sampling, mirroring the way job corpora are expanded
//! into concrete submissions.
//! Author: Oveshen Govender | SupercomputeR

use anyhow::{Context, Result};
use rand::distributions::WeightedIndex;
use rand::Rng;
use serde::Deserialize;

use crate::gpu::GpuType;
use crate::job::{Job, LayerDemand, Utility};

/// One row of the input dataset: a template job profile and its relative
/// frequency in the corpus.
#[derive(Debug, Clone, Deserialize)]
pub struct DatasetRow {
    pub count: u64,
    pub num_cpu: f64,
    pub num_gpu: f64,
    pub duration_median: f64,
    pub bandwidth_median: f64,
}

/// Loads `path` and returns its rows, failing loudly if the CSV is
/// malformed.
pub fn load_rows(path: &str) -> Result<Vec<DatasetRow>> {
    let mut reader = csv::Reader::from_path(path).with_context(|| format!("opening dataset {path}"))?;
    let mut rows = Vec::new();
    for record in reader.deserialize() {
        let row: DatasetRow = record.context("parsing dataset row")?;
        rows.push(row);
    }
    Ok(rows)
}

/// Draw `n` synthetic jobs from `rows`, weighted by each row's `count`.
pub fn sample_jobs(
    rows: &[DatasetRow],
    n: usize,
    utility: Utility,
    decrement: f64,
    gpu_type: GpuType,
    rng: &mut impl Rng,
) -> Result<Vec<Job>> {
    let weights: Vec<u64> = rows.iter().map(|r| r.count.max(1)).collect();
    let dist = WeightedIndex::new(&weights).context("building weighted sampler")?;

    let mut jobs = Vec::with_capacity(n);
    for job_id in 0..n as u64 {
        let row = &rows[rng.sample(&dist)];
        jobs.push(synthesize_job(job_id, row, utility, decrement, gpu_type, rng));
    }
    Ok(jobs)
}

/// Expand one dataset row into a concrete job message: a random layer count
/// in `[3, 6]`, resource demand split evenly across layers, and
/// `n_layer_max` drawn below the full layer count so jobs aren't always
/// forced to claim every layer on one node.
fn synthesize_job(
    job_id: u64,
    row: &DatasetRow,
    utility: Utility,
    decrement: f64,
    gpu_type: GpuType,
    rng: &mut impl Rng,
) -> Job {
    let num_layers = rng.gen_range(3..=6);
    let n_layer_min = 1usize;
    let n_layer_max = if num_layers > n_layer_min {
        num_layers - rng.gen_range(0..num_layers - n_layer_min)
    } else {
        num_layers
    };

    let per_layer_cpu = row.num_cpu / num_layers as f64;
    let per_layer_gpu = row.num_gpu / num_layers as f64;
    let per_layer_bw = row.bandwidth_median / num_layers as f64;

    let layers = (0..num_layers)
        .map(|_| LayerDemand { cpu: per_layer_cpu, gpu: per_layer_gpu, bw: per_layer_bw })
        .collect();

    Job {
        job_id,
        gpu_type,
        utility,
        decrement,
        alpha: 0.5,
        layers,
        n_layer_min,
        n_layer_max,
        duration: row.duration_median,
        submit_time: 0.0,
        speedup: 0.0,
        increase: true,
    }
}
