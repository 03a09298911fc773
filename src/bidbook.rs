//! Bid book: per-(node, job) auction state.
//! Author: Oveshen Govender | SupercomputeR

use std::collections::HashMap;

use crate::error::{JobId, NodeId};

/// Auction state for one job, as seen by one node. Layer-indexed vectors are
/// all the same length (`num_layers`).
#[derive(Debug, Clone)]
pub struct BidEntry {
    /// Current claimant of each layer. `None` represents the `-infinity`
    /// sentinel: unclaimed.
    pub auction_id: Vec<Option<NodeId>>,
    /// Current winning bid for each layer. `f64::NEG_INFINITY` for an
    /// unclaimed layer.
    pub bid: Vec<f64>,
    /// Logical timestamp (message sequence number) each layer's claim was
    /// last updated at.
    pub timestamp: Vec<u64>,
    /// Whether this node has ever placed a bid on a given layer, used by the
    /// bidding engine's monotonicity precondition.
    pub layer_bid_already: Vec<bool>,

    pub count: u64,
    pub consensus_count: u64,
    pub forward_count: u64,
    pub deconflictions: u64,
}

impl BidEntry {
    pub fn new(num_layers: usize) -> Self {
        Self {
            auction_id: vec![None; num_layers],
            bid: vec![f64::NEG_INFINITY; num_layers],
            timestamp: vec![0; num_layers],
            layer_bid_already: vec![false; num_layers],
            count: 0,
            consensus_count: 0,
            forward_count: 0,
            deconflictions: 0,
        }
    }

    pub fn num_layers(&self) -> usize {
        self.auction_id.len()
    }

    /// `true` once every layer has a claimant, i.e. the job is fully placed
    /// from this node's point of view.
    pub fn is_fully_claimed(&self) -> bool {
        self.auction_id.iter().all(Option::is_some)
    }

    /// Structural equality on `auction_id`, `bid`, and `timestamp`. The event
    /// loop's consensus short-circuit additionally requires
    /// `is_fully_claimed()` — two freshly-created all-unclaimed entries are
    /// `same_as` each other without a single real bid having happened.
    pub fn same_as(&self, other: &BidEntry) -> bool {
        self.auction_id == other.auction_id
            && self.bid == other.bid
            && self.timestamp == other.timestamp
    }

    pub fn layers_owned_by(&self, node: NodeId) -> Vec<usize> {
        self.auction_id
            .iter()
            .enumerate()
            .filter_map(|(i, owner)| if *owner == Some(node) { Some(i) } else { None })
            .collect()
    }
}

/// All jobs a node currently knows about.
#[derive(Debug, Clone, Default)]
pub struct BidBook {
    entries: HashMap<JobId, BidEntry>,
}

impl BidBook {
    pub fn new() -> Self {
        Self { entries: HashMap::new() }
    }

    pub fn entry(&mut self, job_id: JobId, num_layers: usize) -> &mut BidEntry {
        self.entries.entry(job_id).or_insert_with(|| BidEntry::new(num_layers))
    }

    pub fn get(&self, job_id: JobId) -> Option<&BidEntry> {
        self.entries.get(&job_id)
    }

    pub fn get_mut(&mut self, job_id: JobId) -> Option<&mut BidEntry> {
        self.entries.get_mut(&job_id)
    }

    pub fn remove(&mut self, job_id: JobId) -> Option<BidEntry> {
        self.entries.remove(&job_id)
    }

    pub fn contains(&self, job_id: JobId) -> bool {
        self.entries.contains_key(&job_id)
    }

    /// Snapshot every entry this node currently knows about, for the
    /// controller's on-demand state dump.
    pub fn snapshot(&self) -> HashMap<JobId, BidEntry> {
        self.entries.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_entry_is_all_unclaimed() {
        let e = BidEntry::new(3);
        assert!(!e.is_fully_claimed());
        assert!(e.bid.iter().all(|b| *b == f64::NEG_INFINITY));
    }

    #[test]
    fn fully_claimed_once_every_layer_has_an_owner() {
        let mut e = BidEntry::new(2);
        e.auction_id = vec![Some(1), Some(2)];
        assert!(e.is_fully_claimed());
    }

    #[test]
    fn layers_owned_by_filters_correctly() {
        let mut e = BidEntry::new(3);
        e.auction_id = vec![Some(1), Some(2), Some(1)];
        assert_eq!(e.layers_owned_by(1), vec![0, 2]);
    }

    #[test]
    fn same_as_requires_timestamp_equality_too() {
        let mut a = BidEntry::new(1);
        a.auction_id[0] = Some(1);
        a.bid[0] = 5.0;
        a.timestamp[0] = 1;
        let mut b = a.clone();
        assert!(a.same_as(&b));
        b.timestamp[0] = 2;
        assert!(!a.same_as(&b));
    }

    #[test]
    fn two_fresh_entries_are_same_as_each_other_but_not_fully_claimed() {
        let a = BidEntry::new(3);
        let b = BidEntry::new(3);
        assert!(a.same_as(&b));
        assert!(!a.is_fully_claimed());
    }

    #[test]
    fn bid_book_creates_entries_on_demand() {
        let mut book = BidBook::new();
        assert!(!book.contains(42));
        book.entry(42, 4);
        assert!(book.contains(42));
    }
}
