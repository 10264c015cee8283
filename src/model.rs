//! In-memory execution substrate model.
//!
//! The differential harness and the scenario tests need a substrate that can
//! run the same batch twice, against two fully independent engine instances,
//! and be compared field by field afterwards. `World` models the pieces the
//! engine trusts the substrate for: balance transfers, all-or-nothing
//! transaction effects, and callee behavior (scripted per target, including
//! callees that attempt to re-enter the forwarder mid-batch).
//!
//! Balances are transactional and roll back when a batch aborts. The
//! `received` ledger, observed senders, and reentry results are observer-side
//! traces: they record what actually happened during execution and survive
//! rollback on purpose.

use std::collections::BTreeMap;

use crate::call::{Addr, CallDispatcher, CallOutcome};
use crate::error::ManifoldError;
use crate::state::Forwarder;
use crate::verify;

/// A batch executor: either `engine::aggregate_with_sender` or
/// `reference::aggregate_with_sender`, instantiated for `World`.
pub type Executor = fn(
    &mut Forwarder,
    &mut World,
    Addr,
    &[Addr],
    &[Vec<u8>],
    &[u128],
) -> Result<Vec<Vec<u8>>, ManifoldError>;

/// Scripted behavior for one callee address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalleeScript {
    /// Whether calls to this address succeed, substrate funding permitting.
    pub succeed: bool,
    /// Raw output bytes the callee returns, on success and failure alike.
    pub output: Vec<u8>,
    /// Attempt to re-enter the forwarder before returning.
    pub reenter: bool,
}

impl CalleeScript {
    pub fn succeeds(output: Vec<u8>) -> Self {
        CalleeScript {
            succeed: true,
            output,
            reenter: false,
        }
    }

    pub fn fails(output: Vec<u8>) -> Self {
        CalleeScript {
            succeed: false,
            output,
            reenter: false,
        }
    }
}

/// One batch transaction as submitted by an external caller.
///
/// Attached funds live in the envelope, not in the engine signature: the
/// engine never reads them (it does not validate `sum(values)` against them),
/// the substrate credits them to the forwarder before execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchTx {
    pub initiator: Addr,
    pub attached: u128,
    pub targets: Vec<Addr>,
    pub payloads: Vec<Vec<u8>>,
    pub values: Vec<u128>,
}

/// In-memory substrate: balances plus scripted callee behavior.
#[derive(Debug, Clone, Default)]
pub struct World {
    /// The forwarder's own balance. Attached funds are credited here and
    /// every forwarded value is paid out of here.
    pub engine_balance: u128,
    /// Per-address balances of call targets.
    pub balances: BTreeMap<Addr, u128>,
    /// Callee behavior by target. Unscripted targets succeed with empty
    /// output.
    pub scripts: BTreeMap<Addr, CalleeScript>,
    /// Executor a reentering callee invokes; set alongside `reenter` scripts.
    pub reentry_exec: Option<Executor>,
    /// Trace: cumulative value each target actually received. Survives
    /// rollback.
    pub received: BTreeMap<Addr, u128>,
    /// Trace: sender observed by each executed callee, in call order.
    pub observed_senders: Vec<Option<Addr>>,
    /// Trace: result of every reentry attempt made by a callee.
    pub reentry_results: Vec<Result<Vec<Vec<u8>>, ManifoldError>>,
}

impl World {
    pub fn new() -> Self {
        World::default()
    }

    /// Script the callee at `target`.
    pub fn script(&mut self, target: Addr, script: CalleeScript) {
        self.scripts.insert(target, script);
    }

    pub fn balance_of(&self, addr: Addr) -> u128 {
        self.balances.get(&addr).copied().unwrap_or(0)
    }

    pub fn received_by(&self, addr: Addr) -> u128 {
        self.received.get(&addr).copied().unwrap_or(0)
    }

    fn snapshot(&self) -> (u128, BTreeMap<Addr, u128>) {
        (self.engine_balance, self.balances.clone())
    }

    fn restore(&mut self, snap: (u128, BTreeMap<Addr, u128>)) {
        self.engine_balance = snap.0;
        self.balances = snap.1;
    }
}

impl CallDispatcher for World {
    fn dispatch(
        &mut self,
        ctx: &mut Forwarder,
        target: Addr,
        _payload: &[u8],
        value: u128,
    ) -> CallOutcome {
        // A transfer the forwarder cannot fund fails the sub-call at the
        // substrate level: the callee never runs, the output is empty.
        if !verify::transfer_funded(self.engine_balance, value) {
            return CallOutcome::failed(Vec::new());
        }

        // The callee executes from here on and can see the published sender.
        self.observed_senders.push(ctx.sender());

        let script = self
            .scripts
            .get(&target)
            .cloned()
            .unwrap_or_else(|| CalleeScript::succeeds(Vec::new()));

        if script.reenter {
            if let Some(exec) = self.reentry_exec {
                // The callee turns around and submits its own (empty) batch
                // against the same forwarder. The guard must reject it.
                let nested = exec(ctx, self, target, &[], &[], &[]);
                self.reentry_results.push(nested);
            }
        }

        if !script.succeed {
            // Reverting callee: no value moves.
            return CallOutcome::failed(script.output);
        }

        self.engine_balance -= value;
        let balance = self.balances.entry(target).or_insert(0);
        *balance = balance.saturating_add(value);
        let received = self.received.entry(target).or_insert(0);
        *received = received.saturating_add(value);
        CallOutcome::ok(script.output)
    }
}

/// Run one batch transaction with the substrate's all-or-nothing semantics:
/// attached funds are credited to the forwarder up front, and every balance
/// effect, the credit included, is rolled back if the batch aborts. The
/// forwarder's register and guard are restored from the same snapshot, so a
/// failed batch leaves no trace in state even if an executor forgot to
/// restore them itself.
pub fn run_tx(
    world: &mut World,
    state: &mut Forwarder,
    tx: &BatchTx,
    exec: Executor,
) -> Result<Vec<Vec<u8>>, ManifoldError> {
    let world_snap = world.snapshot();
    let state_snap = state.clone();

    world.engine_balance = world.engine_balance.saturating_add(tx.attached);
    let result = exec(
        state,
        world,
        tx.initiator,
        &tx.targets,
        &tx.payloads,
        &tx.values,
    );

    if result.is_err() {
        world.restore(world_snap);
        *state = state_snap;
    }
    result
}
