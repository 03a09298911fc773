//! Two nodes bid on the same single-layer job with an equal bid value;
//! after gossip converges, the layer is claimed by the lower node id.
//! Author: Oveshen Govender | SupercomputeR

mod common;

use std::time::Duration;

use plebiscito::config::SimulatorConfig;
use plebiscito::controller::Controller;
use plebiscito::gpu::GpuType;
use plebiscito::job::Utility;

const NUM_NODES: usize = 10;

#[tokio::test]
async fn simultaneous_equal_bids_settle_on_the_lower_id() {
    let config = SimulatorConfig { num_nodes: NUM_NODES, ..Default::default() };
    let job = common::job(7, 1, GpuType::A100, Utility::Speedup);

    let mut controller = Controller::spawn(config, vec![job]);
    controller.run_to_completion(Duration::from_secs(2)).await.unwrap();

    // Nodes 4 and 9 are the only A100 candidates; both bid with an equal
    // value since they share the same class, speedup, and utility.
    let low = controller.snapshot(4).await.unwrap();
    let high = controller.snapshot(9).await.unwrap();

    assert_eq!(low.bids.get(&7).unwrap().auction_id[0], Some(4));
    assert_eq!(high.bids.get(&7).unwrap().auction_id[0], Some(4));

    controller.shutdown().await.unwrap();
}
