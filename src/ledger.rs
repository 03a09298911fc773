//! Per-node resource ledger: capacity accounting plus the fragmentation
//! scoring the FGD bidding path needs to pick a GPU slot.
//! Author: Oveshen Govender | SupercomputeR

use std::collections::{HashMap, HashSet};

use tracing::{debug, trace};

use crate::error::{JobId, NodeId};
use crate::gpu::GpuType;
use crate::job::LayerDemand;

/// Quadrant classification of a single GPU unit's remaining-capacity
/// transition when a candidate allocation lands on it. `Q3` is the
/// fragmenting case: a unit that had comfortable headroom is left with an
/// unusable sliver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quadrant {
    Q124,
    Q3,
    Other,
}

/// Per-(node) capacity ledger.
#[derive(Debug, Clone)]
pub struct NodeLedger {
    pub node_id: NodeId,
    pub gpu_type: GpuType,

    pub initial_cpu: f64,
    pub initial_gpu: f64,
    pub initial_bw: f64,

    pub updated_cpu: f64,
    pub updated_gpu: f64,
    pub updated_bw: f64,

    /// Free capacity per physical GPU unit, for FGD placement.
    pub individual_gpu: Vec<f64>,
    /// Which GPU units are currently serving `(job_id, layer)`.
    pub allocated_on: HashMap<(JobId, usize), Vec<usize>>,

    /// Jobs with any footprint on this node, so `unallocate` can find and
    /// release them without a separate lookup.
    pub job_hosted: HashSet<JobId>,

    /// Idempotence cache: last message body sent to each neighbor for a
    /// given job, so the event loop can suppress an identical rebroadcast.
    pub last_sent_msg: HashMap<(NodeId, JobId), String>,
}

impl NodeLedger {
    pub fn new(node_id: NodeId, gpu_type: GpuType, cpu: f64, gpu: f64, bw: f64, gpu_units: usize) -> Self {
        let per_unit = if gpu_units > 0 { gpu / gpu_units as f64 } else { 0.0 };
        Self {
            node_id,
            gpu_type,
            initial_cpu: cpu,
            initial_gpu: gpu,
            initial_bw: bw,
            updated_cpu: cpu,
            updated_gpu: gpu,
            updated_bw: bw,
            individual_gpu: vec![per_unit; gpu_units],
            allocated_on: HashMap::new(),
            job_hosted: HashSet::new(),
            last_sent_msg: HashMap::new(),
        }
    }

    pub fn has_capacity(&self, demand: &LayerDemand) -> bool {
        demand.cpu <= self.updated_cpu && demand.gpu <= self.updated_gpu && demand.bw <= self.updated_bw
    }

    /// Commit a layer's demand against this node's free capacity. Caller
    /// must have already checked `has_capacity`.
    pub fn reserve(&mut self, job_id: JobId, demand: &LayerDemand) {
        self.updated_cpu -= demand.cpu;
        self.updated_gpu -= demand.gpu;
        self.updated_bw -= demand.bw;
        self.job_hosted.insert(job_id);
        trace!(node = self.node_id, job = job_id, "reserved layer demand");
    }

    /// Release a layer's demand back to this node's free capacity, clamped
    /// to the initial budget so repeated or out-of-order releases can never
    /// push free capacity above what the node started with.
    pub fn release(&mut self, job_id: JobId, demand: &LayerDemand) {
        self.updated_cpu = (self.updated_cpu + demand.cpu).min(self.initial_cpu);
        self.updated_gpu = (self.updated_gpu + demand.gpu).min(self.initial_gpu);
        self.updated_bw = (self.updated_bw + demand.bw).min(self.initial_bw);
        debug!(node = self.node_id, job = job_id, "released layer demand");
    }

    fn quadrant(remaining_before: f64, remaining_after: f64, capacity: f64) -> Quadrant {
        let half = capacity / 2.0;
        match (remaining_before >= half, remaining_after >= half) {
            (true, true) | (false, false) => Quadrant::Q124,
            (true, false) => Quadrant::Q3,
            (false, true) => Quadrant::Other,
        }
    }

    fn fragmentation_score(quadrant: Quadrant, remaining_after: f64) -> f64 {
        match quadrant {
            Quadrant::Q3 => remaining_after,
            Quadrant::Q124 | Quadrant::Other => 0.0,
        }
    }

    /// Pick the GPU unit whose fragmentation delta is smallest if `demand`
    /// were placed on it, returning `(unit_index, delta)`. `None` if no unit
    /// has room.
    pub fn best_fgd_slot(&self, demand: f64) -> Option<(usize, f64)> {
        self.individual_gpu
            .iter()
            .enumerate()
            .filter(|(_, &free)| free >= demand)
            .map(|(idx, &free)| {
                let capacity = self.initial_gpu / self.individual_gpu.len().max(1) as f64;
                let before_q = Self::quadrant(free, free, capacity);
                let after = free - demand;
                let after_q = Self::quadrant(free, after, capacity);
                let before_score = Self::fragmentation_score(before_q, free);
                let after_score = Self::fragmentation_score(after_q, after);
                (idx, after_score - before_score)
            })
            .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap())
    }

    pub fn reserve_fgd(&mut self, job_id: JobId, layer: usize, unit: usize, demand: f64) {
        self.individual_gpu[unit] -= demand;
        self.updated_gpu -= demand;
        self.allocated_on.entry((job_id, layer)).or_default().push(unit);
        self.job_hosted.insert(job_id);
    }

    pub fn release_fgd(&mut self, job_id: JobId, layer: usize, demand_per_unit: f64) {
        if let Some(units) = self.allocated_on.remove(&(job_id, layer)) {
            for unit in units {
                self.individual_gpu[unit] = (self.individual_gpu[unit] + demand_per_unit).min(
                    self.initial_gpu / self.individual_gpu.len().max(1) as f64,
                );
                self.updated_gpu = (self.updated_gpu + demand_per_unit).min(self.initial_gpu);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger() -> NodeLedger {
        NodeLedger::new(1, GpuType::A100, 16.0, 8.0, 4.0, 4)
    }

    #[test]
    fn reserve_then_release_restores_capacity() {
        let mut l = ledger();
        let demand = LayerDemand { cpu: 2.0, gpu: 1.0, bw: 0.5 };
        l.reserve(7, &demand);
        assert!((l.updated_cpu - 14.0).abs() < 1e-9);
        l.release(7, &demand);
        assert!((l.updated_cpu - 16.0).abs() < 1e-9);
        assert!((l.updated_gpu - 8.0).abs() < 1e-9);
    }

    #[test]
    fn release_never_exceeds_initial_budget() {
        let mut l = ledger();
        let demand = LayerDemand { cpu: 1.0, gpu: 1.0, bw: 1.0 };
        l.release(1, &demand);
        assert_eq!(l.updated_cpu, l.initial_cpu);
    }

    #[test]
    fn best_fgd_slot_picks_lowest_fragmentation_delta() {
        let l = ledger();
        let picked = l.best_fgd_slot(1.0);
        assert!(picked.is_some());
    }

    #[test]
    fn best_fgd_slot_none_when_no_unit_fits() {
        let l = NodeLedger::new(1, GpuType::A100, 16.0, 8.0, 4.0, 4);
        assert!(l.best_fgd_slot(100.0).is_none());
    }
}
