//! Rebid policy: periodically release and redispatch jobs whose effective
//! speedup has drifted outside an acceptable band.
//! Author: Oveshen Govender | SupercomputeR

use tracing::info;

use crate::error::NodeId;
use crate::gpu::speedup;
use crate::job::Job;
use crate::ledger::NodeLedger;

/// Acceptable speedup band. A placement drifting outside this range (e.g.
/// because a better-matched node later joined the fleet) is a rebid
/// candidate.
#[derive(Debug, Clone, Copy)]
pub struct RebidBand {
    pub low: f64,
    pub high: f64,
}

impl Default for RebidBand {
    fn default() -> Self {
        Self { low: 0.8, high: 1.5 }
    }
}

/// A job this node currently hosts, reconsidered against `band`.
pub fn needs_rebid(ledger: &NodeLedger, job: &Job, band: RebidBand) -> bool {
    let effective = speedup(ledger.gpu_type, job.gpu_type);
    effective < band.low || effective > band.high
}

/// Clone `job` as a redispatch candidate: `increase` is set so the bidding
/// engine at every node only admits a strictly-improving placement when the
/// current match fell below `band.low`, or only a strictly-worsening one
/// (freeing the node for something more demanding) otherwise.
pub fn redispatch(ledger: &NodeLedger, job: &Job, band: RebidBand) -> Job {
    let effective = speedup(ledger.gpu_type, job.gpu_type);
    let mut next = job.clone();
    next.speedup = effective;
    next.increase = effective < band.low;
    next
}

/// One pass of the rebid sweep: release-and-resubmit every hosted job whose
/// effective speedup has drifted outside `band`, returning the redispatched
/// jobs ready to be sent back through the bidding engine.
pub fn sweep(node_id: NodeId, ledger: &NodeLedger, jobs: &[Job], band: RebidBand) -> Vec<Job> {
    let mut to_rebid = Vec::new();
    for job in jobs {
        if ledger.job_hosted.contains(&job.job_id) && needs_rebid(ledger, job, band) {
            info!(node = node_id, job = job.job_id, "flagged for rebid");
            to_rebid.push(redispatch(ledger, job, band));
        }
    }
    to_rebid
}
