//! A node whose class cannot host the requested GPU class never enters the
//! auction; a node of the matching class wins every layer.
//! Author: Oveshen Govender | SupercomputeR

mod common;

use plebiscito::bidbook::BidEntry;
use plebiscito::bidding;
use plebiscito::gpu::GpuType;
use plebiscito::job::Utility;
use plebiscito::ledger::NodeLedger;

#[test]
fn t4_node_is_filtered_out_and_v100_node_wins_all_layers() {
    let job = common::job(1, 2, GpuType::V100, Utility::Speedup);

    let t4 = NodeLedger::new(10, GpuType::T4, 64.0, 16.0, 8.0, 4);
    let mut t4_entry = BidEntry::new(job.num_layers());
    assert!(bidding::bid(10, &t4, &mut t4_entry, &job).is_none(), "a T4 node cannot bid on a V100 job");

    let v100 = NodeLedger::new(20, GpuType::V100, 64.0, 16.0, 8.0, 4);
    let mut v100_entry = BidEntry::new(job.num_layers());
    let outcome = bidding::bid(20, &v100, &mut v100_entry, &job).expect("V100 node can host and wins");
    assert_eq!(outcome.layers, vec![0, 1]);
    assert!(v100_entry.auction_id.iter().all(|o| *o == Some(20)));
}
