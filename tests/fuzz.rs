use manifold_prog::call::Addr;
use manifold_prog::model::{run_tx, BatchTx, World};
use manifold_prog::state::Forwarder;
use manifold_prog::{engine, reference};
use proptest::prelude::*;

proptest! {
    #[test]
    fn fuzz_aggregate_never_panics(
        targets in proptest::collection::vec(any::<[u8; 32]>(), 0..4),
        payloads in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 0..64), 0..4),
        values in proptest::collection::vec(any::<u128>(), 0..4),
        attached in any::<u128>(),
    ) {
        // Arbitrary, possibly mismatched inputs must never panic.
        let tx = BatchTx {
            initiator: Addr::new([0xCC; 32]),
            attached,
            targets: targets.into_iter().map(Addr::new).collect(),
            payloads,
            values,
        };
        let _ = run_tx(&mut World::new(), &mut Forwarder::new(), &tx, engine::aggregate_with_sender::<World>);
        let _ = run_tx(&mut World::new(), &mut Forwarder::new(), &tx, reference::aggregate_with_sender::<World>);
    }
}
