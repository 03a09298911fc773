//! Shared fixtures for the cross-node integration tests.
//! Author: Oveshen Govender | SupercomputeR

use plebiscito::gpu::GpuType;
use plebiscito::job::{Job, LayerDemand, Utility};

/// A job with `n` equal-demand layers, ready to submit fresh (never through
/// a rebid sweep).
pub fn job(job_id: u64, n: usize, gpu_type: GpuType, utility: Utility) -> Job {
    Job {
        job_id,
        gpu_type,
        utility,
        decrement: 0.05,
        alpha: 0.5,
        layers: (0..n).map(|_| LayerDemand { cpu: 1.0, gpu: 1.0, bw: 1.0 }).collect(),
        n_layer_min: 1,
        n_layer_max: n,
        duration: 10.0,
        submit_time: 0.0,
        speedup: 0.0,
        increase: true,
    }
}
