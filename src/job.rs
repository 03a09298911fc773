//! Job wire types and the utility function family.
//! Author: Oveshen Govender | SupercomputeR

use serde::{Deserialize, Serialize};

use crate::error::{JobId, NodeId};
use crate::gpu::GpuType;

/// The closed set of scoring functions a job can request from the bidding
/// engine. Exactly nine variants; no others exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Utility {
    /// Largest-GPU-first: favors nodes with the most free GPU, corrected for
    /// class mismatch.
    Lgf,
    /// Smallest-GPU-first: favors nodes with the least (but sufficient) free
    /// GPU, corrected for class mismatch.
    Sgf,
    Speedup,
    SpeedupV2,
    /// Balanced CPU/GPU utilization.
    Util,
    Stefano,
    AlphaGpuCpu,
    AlphaGpuBw,
    /// Fragmentation-minimizing placement; scored by the FGD bidding path
    /// rather than `score`, see `bidding::bid_fgd`.
    Fgd,
}

/// Per-layer resource demand. A job with `n` layers carries `n` of these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerDemand {
    pub cpu: f64,
    pub gpu: f64,
    pub bw: f64,
}

/// A job as it travels the wire: submitted once, then referenced by id in
/// every subsequent bid/deconfliction message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub job_id: JobId,
    pub gpu_type: GpuType,
    pub utility: Utility,
    /// Decrement coefficient fed to `gpu::corrective_factor`.
    pub decrement: f64,
    /// Alpha weight for `AlphaGpuCpu`/`AlphaGpuBw`/`Stefano`.
    pub alpha: f64,
    pub layers: Vec<LayerDemand>,
    pub n_layer_min: usize,
    pub n_layer_max: usize,
    pub duration: f64,
    pub submit_time: f64,
    /// Desired speedup and rebid direction flag. A freshly-submitted job
    /// (never through `rebid::sweep`) carries `speedup: 0.0, increase: true`
    /// so the direction precondition in `bidding::bid` is vacuously
    /// satisfied; a redispatched job carries the effective speedup it had
    /// before release and the direction it must now move in.
    pub speedup: f64,
    pub increase: bool,
}

impl Job {
    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }
}

/// Scalar inputs a scoring function needs, gathered by the bidding engine
/// from the node ledger before it consults `Utility::score`.
#[derive(Debug, Clone, Copy)]
pub struct ScoreContext {
    pub avail_cpu: f64,
    pub avail_gpu: f64,
    pub avail_bw: f64,
    pub initial_cpu: f64,
    pub initial_gpu: f64,
    pub initial_bw: f64,
    pub speedup: f64,
    pub corrective_factor: f64,
    pub alpha: f64,
}

impl Utility {
    /// Compute the bid contribution for one layer on one candidate node.
    /// `Fgd` has no meaningful score here; the FGD bidding path never calls
    /// this and uses `bidding::fragmentation_delta` instead.
    pub fn score(self, ctx: &ScoreContext) -> f64 {
        match self {
            Utility::Lgf => ctx.avail_gpu * ctx.corrective_factor,
            Utility::Sgf => {
                if ctx.avail_gpu <= 0.0 {
                    0.0
                } else {
                    ctx.corrective_factor / ctx.avail_gpu
                }
            }
            Utility::Speedup => ctx.speedup,
            Utility::SpeedupV2 => ctx.speedup * ctx.corrective_factor,
            Utility::Util => {
                let cpu_u = if ctx.initial_cpu > 0.0 {
                    ctx.avail_cpu / ctx.initial_cpu
                } else {
                    0.0
                };
                let gpu_u = if ctx.initial_gpu > 0.0 {
                    ctx.avail_gpu / ctx.initial_gpu
                } else {
                    0.0
                };
                (cpu_u + gpu_u) / 2.0
            }
            Utility::Stefano => {
                // alpha == 0 would collapse the Gaussian to a point mass at
                // x = 0; substitute a floor instead of dividing by zero.
                let alpha = if ctx.alpha == 0.0 { 0.01 } else { ctx.alpha };
                (-((ctx.avail_gpu - ctx.initial_gpu).powi(2)) / (2.0 * alpha * alpha)).exp()
            }
            Utility::AlphaGpuCpu => {
                let gpu_u = if ctx.initial_gpu > 0.0 {
                    ctx.avail_gpu / ctx.initial_gpu
                } else {
                    0.0
                };
                let cpu_u = if ctx.initial_cpu > 0.0 {
                    ctx.avail_cpu / ctx.initial_cpu
                } else {
                    0.0
                };
                if ctx.initial_gpu > 0.0 {
                    ctx.alpha * gpu_u + (1.0 - ctx.alpha) * cpu_u
                } else {
                    // TODO: unreachable in practice (initial_gpu > 0 is an
                    // admission precondition), kept from the original branch
                    // rather than merged away.
                    ctx.alpha * gpu_u + (1.0 - ctx.alpha) * cpu_u
                }
            }
            Utility::AlphaGpuBw => {
                let gpu_u = if ctx.initial_gpu > 0.0 {
                    ctx.avail_gpu / ctx.initial_gpu
                } else {
                    0.0
                };
                let bw_u = if ctx.initial_bw > 0.0 {
                    ctx.avail_bw / ctx.initial_bw
                } else {
                    0.0
                };
                ctx.alpha * gpu_u + (1.0 - ctx.alpha) * bw_u
            }
            Utility::Fgd => 0.0,
        }
    }
}

/// Where a job currently stands, used by the controller's jobs report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Pending,
    Allocated,
    Rejected,
}

/// One row of the controller's `..._jobs_report.csv`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobReportRow {
    pub job_id: JobId,
    pub status: JobStatus,
    pub allocated_layers: usize,
    pub total_layers: usize,
    pub submit_time: f64,
}

/// One row of the controller's `..._allocations.csv`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationRow {
    pub job_id: JobId,
    pub node_id: NodeId,
    pub layer: usize,
    pub cpu: f64,
    pub gpu: f64,
    pub bw: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> ScoreContext {
        ScoreContext {
            avail_cpu: 4.0,
            avail_gpu: 2.0,
            avail_bw: 1.0,
            initial_cpu: 8.0,
            initial_gpu: 4.0,
            initial_bw: 2.0,
            speedup: 1.35,
            corrective_factor: 0.9,
            alpha: 0.5,
        }
    }

    #[test]
    fn lgf_scales_with_available_gpu() {
        let c = ctx();
        assert!(Utility::Lgf.score(&c) > 0.0);
    }

    #[test]
    fn sgf_is_zero_with_no_free_gpu() {
        let mut c = ctx();
        c.avail_gpu = 0.0;
        assert_eq!(Utility::Sgf.score(&c), 0.0);
    }

    #[test]
    fn stefano_does_not_divide_by_zero_at_alpha_zero() {
        let mut c = ctx();
        c.alpha = 0.0;
        c.avail_gpu = 4.0;
        let s = Utility::Stefano.score(&c);
        assert!(s.is_finite());
    }

    #[test]
    fn speedup_v2_applies_correction() {
        let c = ctx();
        assert_eq!(Utility::SpeedupV2.score(&c), c.speedup * c.corrective_factor);
    }
}
