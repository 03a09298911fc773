//! Two candidate nodes, one job: the lower-id node wins every layer and the
//! loser's ledger ends back at full capacity.
//! Author: Oveshen Govender | SupercomputeR

mod common;

use std::time::Duration;

use plebiscito::config::SimulatorConfig;
use plebiscito::controller::Controller;
use plebiscito::gpu::GpuType;
use plebiscito::job::Utility;

/// `Controller::spawn` round-robins `GpuType::ALL` across node ids, so with
/// ten nodes exactly two (ids 4 and 9) land on A100 — the only class that
/// can host an A100 job. Every other node is filtered out by `can_host`
/// before it ever reaches the bidding engine's speedup precondition.
const NUM_NODES: usize = 10;
const WINNER: u64 = 4;
const LOSER: u64 = 9;

#[tokio::test]
async fn lower_id_a100_node_wins_all_layers_and_the_other_settles_back_to_full() {
    let config = SimulatorConfig { num_nodes: NUM_NODES, ..Default::default() };
    let job = common::job(1, 3, GpuType::A100, Utility::Speedup);

    let mut controller = Controller::spawn(config, vec![job]);
    let reports = controller.run_to_completion(Duration::from_secs(2)).await.unwrap();
    assert!(reports.iter().any(|r| r.job_id == 1 && r.consensus_reached));

    let winner = controller.snapshot(WINNER).await.expect("winner node responds");
    let loser = controller.snapshot(LOSER).await.expect("loser node responds");

    let winner_entry = winner.bids.get(&1).expect("winner has a bid-book entry");
    assert!(winner_entry.auction_id.iter().all(|o| *o == Some(WINNER)), "winner must own all three layers");
    assert_eq!(winner.updated_cpu, 64.0 - 3.0);
    assert_eq!(winner.updated_gpu, 16.0 - 3.0);
    assert!(winner.job_hosted.contains(&1));

    assert_eq!(loser.updated_cpu, 64.0);
    assert_eq!(loser.updated_gpu, 16.0);

    controller.shutdown().await.unwrap();
}
