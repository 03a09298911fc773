//! Bidding engine: the non-FGD grow-and-claim algorithm, and the FGD
//! fragmentation-minimizing variant.
//! Author: Oveshen Govender | SupercomputeR

use tracing::trace;

use crate::bidbook::BidEntry;
use crate::error::NodeId;
use crate::gpu::{can_host, corrective_factor, speedup};
use crate::job::{Job, ScoreContext};
use crate::ledger::NodeLedger;

/// Deterministic tie-break perturbation applied when a node's own id needs
/// to break a numeric tie: vanishingly small relative to any real bid, but
/// unique per node so ties never recur after one retry.
const PERTURBATION: f64 = 1e-9;

#[derive(Debug, Clone)]
pub struct BidOutcome {
    /// Layer indices this node is claiming, inclusive contiguous range.
    pub layers: Vec<usize>,
    /// Per-layer bid values to publish.
    pub bid_values: Vec<f64>,
}

/// `true` iff `self_id` wins the tie-break against `existing`: a strictly
/// higher bid wins outright; an equal bid favors the lower node id.
fn wins(my_bid: f64, my_id: NodeId, existing_bid: f64, existing_id: Option<NodeId>) -> bool {
    match existing_id {
        None => true,
        Some(id) => my_bid > existing_bid || (my_bid == existing_bid && my_id < id),
    }
}

/// Speedup-direction admission rule: a rebid-in-progress job (`increase`
/// flag set by `rebid::sweep`) only admits nodes that move the placement
/// strictly in the requested direction, with an affinity exception for the
/// node that already hosts the job when the speedup ties exactly.
fn admits_direction(ledger: &NodeLedger, job: &Job) -> bool {
    let node_speedup = speedup(ledger.gpu_type, job.gpu_type);
    if job.increase {
        if node_speedup < job.speedup {
            return false;
        }
    } else if node_speedup > job.speedup {
        return false;
    }
    if node_speedup == job.speedup && !ledger.job_hosted.contains(&job.job_id) {
        return false;
    }
    true
}

/// Per-layer feasibility mask: capacity present and this node hasn't already
/// placed (and lost, or won) a bid on it.
fn possible_layers(ledger: &NodeLedger, job: &Job, entry: &BidEntry) -> Vec<bool> {
    (0..job.num_layers())
        .map(|i| !entry.layer_bid_already[i] && ledger.has_capacity(&job.layers[i]))
        .collect()
}

/// Grow a contiguous run of feasible layers outward from `seed`, stopping at
/// infeasible layers or at `max_len`. Returns `None` if the resulting run is
/// shorter than `min_len`.
fn grow(possible: &[bool], seed: usize, min_len: usize, max_len: usize) -> Option<(usize, usize)> {
    if !possible[seed] {
        return None;
    }
    let mut left = seed;
    let mut right = seed;
    loop {
        let len = right - left + 1;
        if len >= max_len {
            break;
        }
        if left > 0 && possible[left - 1] {
            left -= 1;
            continue;
        }
        if right + 1 < possible.len() && possible[right + 1] {
            right += 1;
            continue;
        }
        break;
    }
    let len = right - left + 1;
    if len >= min_len {
        Some((left, right))
    } else {
        None
    }
}

/// Pick the longest feasible contiguous run whose length lies in
/// `[job.n_layer_min, job.n_layer_max]`, preferring the earliest seed on
/// ties so the search is deterministic.
fn best_run(possible: &[bool], min_len: usize, max_len: usize) -> Option<(usize, usize)> {
    let mut best: Option<(usize, usize)> = None;
    for seed in 0..possible.len() {
        if let Some((l, r)) = grow(possible, seed, min_len, max_len) {
            let len = r - l + 1;
            let best_len = best.map(|(bl, br)| br - bl + 1).unwrap_or(0);
            if len > best_len {
                best = Some((l, r));
            }
        }
    }
    best
}

/// Run the non-FGD bidding engine for one job against one node's ledger and
/// bid-book entry. Returns the claimed layer range and bid values to
/// broadcast, or `None` if this node cannot or should not bid.
pub fn bid(
    self_id: NodeId,
    ledger: &NodeLedger,
    entry: &mut BidEntry,
    job: &Job,
) -> Option<BidOutcome> {
    if !can_host(ledger.gpu_type, job.gpu_type) {
        return None;
    }
    if !admits_direction(ledger, job) {
        return None;
    }
    // Monotonicity: a node that already holds layers of this job never
    // re-enters the auction for layers it doesn't already hold.
    if entry.auction_id.iter().any(|o| *o == Some(self_id)) {
        trace!(node = self_id, job = job.job_id, "already an owner, skipping re-bid");
        return None;
    }

    let possible = possible_layers(ledger, job, entry);
    let (left, right) = best_run(&possible, job.n_layer_min, job.n_layer_max)?;

    let sp = speedup(ledger.gpu_type, job.gpu_type);
    let cf = corrective_factor(ledger.gpu_type, job.gpu_type, job.decrement);

    let mut layers = Vec::new();
    let mut bid_values = Vec::new();
    for l in left..=right {
        let ctx = ScoreContext {
            avail_cpu: ledger.updated_cpu,
            avail_gpu: ledger.updated_gpu,
            avail_bw: ledger.updated_bw,
            initial_cpu: ledger.initial_cpu,
            initial_gpu: ledger.initial_gpu,
            initial_bw: ledger.initial_bw,
            speedup: sp,
            corrective_factor: cf,
            alpha: job.alpha,
        };
        let mut value = job.utility.score(&ctx);

        // Speedup-direction rule: a node never underbids a strictly slower
        // placement unless it is the incumbent (affinity-on-equal
        // exception handled by the `==` branch of `wins`).
        if value < 0.0 {
            continue;
        }

        if !wins(value, self_id, entry.bid[l], entry.auction_id[l]) {
            // Deterministic perturbation retry: nudge down by a node-unique
            // epsilon and see if that still wins (it only can if the
            // existing claim was also ours at a stale timestamp).
            value -= self_id as f64 * PERTURBATION;
            if !wins(value, self_id, entry.bid[l], entry.auction_id[l]) {
                continue;
            }
        }

        layers.push(l);
        bid_values.push(value);
    }

    if layers.len() < job.n_layer_min {
        return None;
    }

    for (offset, &l) in layers.iter().enumerate() {
        entry.auction_id[l] = Some(self_id);
        entry.bid[l] = bid_values[offset];
        entry.layer_bid_already[l] = true;
    }
    entry.count += 1;

    Some(BidOutcome { layers, bid_values })
}

/// FGD bidding: rather than scoring per layer, pick the GPU slot for the
/// first claimable layer that minimizes fragmentation, then share that
/// single score (negated, averaged across the run) across every layer in
/// the run so the whole job is claimed atomically at one bid value.
pub fn bid_fgd(
    self_id: NodeId,
    ledger: &NodeLedger,
    entry: &mut BidEntry,
    job: &Job,
) -> Option<BidOutcome> {
    if !can_host(ledger.gpu_type, job.gpu_type) {
        return None;
    }
    if !admits_direction(ledger, job) {
        return None;
    }
    if entry.auction_id.iter().any(|o| *o == Some(self_id)) {
        return None;
    }

    let possible = possible_layers(ledger, job, entry);
    let (left, right) = best_run(&possible, job.n_layer_min, job.n_layer_max)?;
    let layers: Vec<usize> = (left..=right).collect();

    let mut total_delta = 0.0;
    for &l in &layers {
        let (_, delta) = ledger.best_fgd_slot(job.layers[l].gpu)?;
        total_delta += delta;
    }
    let shared_bid = -total_delta / layers.len() as f64;

    for &l in &layers {
        if !wins(shared_bid, self_id, entry.bid[l], entry.auction_id[l]) {
            return None;
        }
    }

    for &l in &layers {
        entry.auction_id[l] = Some(self_id);
        entry.bid[l] = shared_bid;
        entry.layer_bid_already[l] = true;
    }
    entry.count += 1;

    Some(BidOutcome { layers, bid_values: vec![shared_bid; layers.len()] })
}
