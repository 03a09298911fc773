//! A claims layer 0 for itself and layer 1; B claims layers 2 and 3. A
//! message arrives at A whose own record already attributes layer 0 to B
//! while the message itself claims layer 0 belongs to A — the classic
//! cross-claim double-bounce — so layer 0 alone is reset and rebroadcast,
//! re-advertising exactly what the incoming message asserted, while A's
//! undisputed layer 1 and B's undisputed [2,3] pass through unchanged.
//! Author: Oveshen Govender | SupercomputeR

use plebiscito::bidbook::BidEntry;
use plebiscito::deconfliction;

const NODE_A: u64 = 1;
const NODE_B: u64 = 2;

#[test]
fn cross_claim_on_layer_zero_resets_that_layer_only() {
    let mut local = BidEntry::new(4);
    local.auction_id = vec![Some(NODE_B), Some(NODE_A), Some(NODE_B), Some(NODE_B)];
    local.bid = vec![5.0, 5.0, 5.0, 5.0];
    local.timestamp = vec![1, 1, 1, 1];

    let mut incoming = BidEntry::new(4);
    incoming.auction_id = vec![Some(NODE_A), Some(NODE_A), Some(NODE_B), Some(NODE_B)];
    incoming.bid = vec![6.0, 5.0, 5.0, 5.0];
    incoming.timestamp = vec![9, 1, 1, 1];

    let outcome =
        deconfliction::deconflict(NODE_B, NODE_A, &incoming, &mut local, 42, false).unwrap();

    assert!(!outcome.allow_bidding, "a round containing a reset never also runs bidding");
    assert_eq!(local.auction_id[0], None, "layer 0 is reset to unclaimed");
    assert_eq!(local.bid[0], f64::NEG_INFINITY);
    assert_eq!(local.auction_id[1], Some(NODE_A), "A's undisputed layer 1 claim is untouched");
    assert_eq!(local.auction_id[2], Some(NODE_B));
    assert_eq!(local.auction_id[3], Some(NODE_B));

    let rebroadcast = outcome.rebroadcast.expect("a reset always rebroadcasts");
    assert_eq!(
        rebroadcast.auction_id[0],
        incoming.auction_id[0],
        "the rebroadcast re-advertises exactly what the incoming message claimed"
    );
    assert_eq!(rebroadcast.auction_id[1], Some(NODE_A));
    assert_eq!(rebroadcast.auction_id[2], Some(NODE_B));
    assert_eq!(rebroadcast.auction_id[3], Some(NODE_B));
}
