//! FGD placement prefers the slot that minimizes fragmentation increase
//! over the first geometrically available one.
//! Author: Oveshen Govender | SupercomputeR

use plebiscito::gpu::GpuType;
use plebiscito::ledger::NodeLedger;

#[test]
fn the_partially_free_unit_is_chosen_over_the_fully_free_ones() {
    // 3 units of 1.2 capacity each; unit 1 already sits at its half-point.
    // Placing a 0.5 demand there empties it cleanly (no new fragment),
    // while placing it on a fully-free unit pushes that unit below half,
    // creating a 0.5-sized unusable sliver.
    let mut ledger = NodeLedger::new(1, GpuType::A100, 8.0, 3.6, 4.0, 3);
    ledger.individual_gpu = vec![1.0, 0.5, 1.0];

    let (slot, delta) = ledger.best_fgd_slot(0.5).expect("some unit has room for 0.5");
    assert_eq!(slot, 1, "slot 1 minimizes fragmentation, not slot 0 or 2");
    assert_eq!(delta, 0.0);
}
