//! Manifold: single-file batched-call forwarding engine.
//!
//! One external caller submits an ordered batch of (target, payload, value)
//! calls. The engine runs them in sequence against the substrate, publishes
//! the original caller's identity to every callee for the batch's duration,
//! and aborts the whole batch on the first sub-call failure, surfacing that
//! failure's raw output verbatim.
//!
//! The crate ships two interchangeable executors over the same state type:
//! the optimized engine (`engine`) and a deliberately naive reference
//! restatement (`reference`) used as ground truth by the differential
//! harness in `tests/`.

#![deny(unsafe_code)]

/// In-memory substrate model used by the differential harness.
#[path = "model.rs"]
pub mod model;

// 1. mod constants
pub mod constants {
    /// Substrate address width in bytes.
    pub const ADDR_LEN: usize = 32;

    /// Guard rest value: a new batch may begin.
    pub const REST_UNLOCKED: bool = true;
}

// 2. mod verify
pub mod verify {
    //! Pure decision helpers extracted from the executors so the admission
    //! policy can be proven in isolation (Kani harnesses in `tests/kani.rs`).
    //! The optimized engine routes its checks through these; the reference
    //! restatement deliberately does not.

    /// Batch admission outcome, in check order.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum AdmitDecision {
        /// The three call arrays disagree in length. Checked first, before
        /// any state is read for effect.
        MismatchedLengths,
        /// A batch is already running on this forwarder.
        Locked,
        /// Zero calls: succeed immediately. The guard is never acquired and
        /// the sender register is never written.
        EmptyBatch,
        /// Acquire the guard, publish the sender, run the calls.
        Run,
    }

    /// Shape check: all three call arrays must have the same length.
    #[inline]
    pub fn lengths_ok(targets: usize, payloads: usize, values: usize) -> bool {
        targets == payloads && payloads == values
    }

    /// Pure admission policy for a batch request.
    ///
    /// Check order is part of the observable contract: shape, then guard,
    /// then the zero-call short-circuit. In particular an empty batch
    /// requested while the guard is held is `Locked`, not `EmptyBatch`.
    #[inline]
    pub fn decide_admit(
        targets: usize,
        payloads: usize,
        values: usize,
        unlocked: bool,
    ) -> AdmitDecision {
        if !lengths_ok(targets, payloads, values) {
            return AdmitDecision::MismatchedLengths;
        }
        if !unlocked {
            return AdmitDecision::Locked;
        }
        if targets == 0 {
            return AdmitDecision::EmptyBatch;
        }
        AdmitDecision::Run
    }

    /// Per-call outcome decision.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum StepDecision {
        /// Record the callee's output at this position and continue.
        Append,
        /// Abort the batch; the callee's raw output becomes the batch's own
        /// failure output, unmodified.
        Abort,
    }

    /// First failure aborts; there is no retry policy beyond this.
    #[inline]
    pub fn decide_step(success: bool) -> StepDecision {
        if success {
            StepDecision::Append
        } else {
            StepDecision::Abort
        }
    }

    /// Substrate funding predicate: a value transfer out of the forwarder
    /// must be covered by its current balance.
    #[inline]
    pub fn transfer_funded(balance: u128, value: u128) -> bool {
        value <= balance
    }
}

// 3. mod error
pub mod error {
    use thiserror::Error;

    /// Batch execution failures.
    ///
    /// `Reverted` is a pass-through, not a synthesized error: the bytes in
    /// the variant are the failing callee's raw output, and the `Display`
    /// text is diagnostic only.
    #[derive(Debug, Clone, PartialEq, Eq, Error)]
    pub enum ManifoldError {
        /// Targets, payloads, and values arrays disagree in length.
        #[error("call array lengths mismatch")]
        ArrayLengthsMismatch,
        /// A batch is already executing on this forwarder.
        #[error("reentrant batch rejected")]
        Reentrancy,
        /// A sub-call failed; carries its raw output verbatim.
        #[error("sub-call reverted with {} output bytes", .0.len())]
        Reverted(Vec<u8>),
    }

    impl ManifoldError {
        /// Stable numeric code for substrate error channels.
        pub fn code(&self) -> u32 {
            match self {
                ManifoldError::ArrayLengthsMismatch => 1,
                ManifoldError::Reentrancy => 2,
                ManifoldError::Reverted(_) => 3,
            }
        }
    }
}

// 4. mod call
pub mod call {
    use crate::constants::ADDR_LEN;
    use crate::state::Forwarder;
    use core::fmt;

    /// Opaque substrate address.
    #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct Addr(pub [u8; ADDR_LEN]);

    impl Addr {
        pub const ZERO: Addr = Addr([0u8; ADDR_LEN]);

        pub const fn new(bytes: [u8; ADDR_LEN]) -> Self {
            Addr(bytes)
        }

        pub fn as_bytes(&self) -> &[u8; ADDR_LEN] {
            &self.0
        }
    }

    impl fmt::Debug for Addr {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            // Leading 4 bytes are enough to tell fixture addresses apart.
            write!(f, "Addr({}…)", hex::encode(&self.0[..4]))
        }
    }

    /// One forwarded call's observable result.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct CallOutcome {
        pub success: bool,
        pub output: Vec<u8>,
    }

    impl CallOutcome {
        pub fn ok(output: Vec<u8>) -> Self {
            CallOutcome {
                success: true,
                output,
            }
        }

        pub fn failed(output: Vec<u8>) -> Self {
            CallOutcome {
                success: false,
                output,
            }
        }
    }

    /// The one primitive the engine cannot supply itself: execute a single
    /// call against the substrate and report (success, raw output).
    ///
    /// The forwarder state is passed through so the callee (arbitrary,
    /// untrusted code) can observe the published sender, and can attempt to
    /// re-enter the same forwarder, which must fail with `Reentrancy`.
    pub trait CallDispatcher {
        fn dispatch(
            &mut self,
            ctx: &mut Forwarder,
            target: Addr,
            payload: &[u8],
            value: u128,
        ) -> CallOutcome;
    }
}

// 5. mod state
pub mod state {
    use crate::call::Addr;
    use crate::constants::REST_UNLOCKED;

    /// Caller-context register and reentrancy guard, owned by one engine
    /// instance. Rest state: no sender published, guard unlocked.
    ///
    /// Independent instances never share state; the harness runs two
    /// forwarders side by side and compares them post-hoc.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct Forwarder {
        sender: Option<Addr>,
        unlocked: bool,
    }

    impl Forwarder {
        pub fn new() -> Self {
            Forwarder {
                sender: None,
                unlocked: REST_UNLOCKED,
            }
        }

        /// Batch initiator visible to sub-calls; `None` outside an active
        /// batch.
        pub fn sender(&self) -> Option<Addr> {
            self.sender
        }

        /// Whether a new batch may begin.
        pub fn reentrancy_unlocked(&self) -> bool {
            self.unlocked
        }

        /// Both slots at their rest values.
        pub fn at_rest(&self) -> bool {
            self.sender.is_none() && self.unlocked
        }

        /// Publish the batch initiator and take the guard.
        pub(crate) fn acquire(&mut self, initiator: Addr) {
            self.sender = Some(initiator);
            self.unlocked = false;
        }

        /// Clear the register and release the guard.
        pub(crate) fn release(&mut self) {
            self.sender = None;
            self.unlocked = true;
        }
    }

    impl Default for Forwarder {
        fn default() -> Self {
            Forwarder::new()
        }
    }
}

// 6. mod engine
pub mod engine {
    use crate::call::{Addr, CallDispatcher};
    use crate::error::ManifoldError;
    use crate::state::Forwarder;
    use crate::verify::{self, AdmitDecision, StepDecision};
    use tracing::{debug, trace};

    /// Execute a batch of forwarded calls. Optimized executor.
    ///
    /// Checks run in a fixed, observable order: array shape, then the guard,
    /// then the zero-call short-circuit. A zero-call batch never acquires
    /// the guard or publishes a sender. On the first failing sub-call the
    /// whole batch aborts and the callee's raw output becomes this
    /// operation's failure output, byte for byte.
    ///
    /// The register and guard are explicitly restored on the abort path;
    /// rolling back substrate balance effects is the transaction layer's
    /// responsibility (see `model::run_tx`).
    pub fn aggregate_with_sender<D: CallDispatcher>(
        state: &mut Forwarder,
        dispatcher: &mut D,
        initiator: Addr,
        targets: &[Addr],
        payloads: &[Vec<u8>],
        values: &[u128],
    ) -> Result<Vec<Vec<u8>>, ManifoldError> {
        let n = targets.len();
        match verify::decide_admit(
            n,
            payloads.len(),
            values.len(),
            state.reentrancy_unlocked(),
        ) {
            AdmitDecision::MismatchedLengths => {
                return Err(ManifoldError::ArrayLengthsMismatch)
            }
            AdmitDecision::Locked => return Err(ManifoldError::Reentrancy),
            AdmitDecision::EmptyBatch => return Ok(Vec::new()),
            AdmitDecision::Run => {}
        }

        trace!(calls = n, initiator = ?initiator, "batch start");
        state.acquire(initiator);

        let mut outputs = Vec::with_capacity(n);
        for i in 0..n {
            let out = dispatcher.dispatch(state, targets[i], &payloads[i], values[i]);
            match verify::decide_step(out.success) {
                StepDecision::Append => outputs.push(out.output),
                StepDecision::Abort => {
                    state.release();
                    debug!(index = i, "sub-call failed, batch aborted");
                    return Err(ManifoldError::Reverted(out.output));
                }
            }
        }

        state.release();
        trace!(calls = n, "batch complete");
        Ok(outputs)
    }
}

// 7. mod reference
pub mod reference {
    //! Naive restatement of the batch contract, used as differential ground
    //! truth. Every step takes the most obvious construction available and
    //! shares no decision logic with the optimized engine. Behavior must be
    //! identical in every externally observable respect; efficiency is a
    //! non-goal here.

    use crate::call::{Addr, CallDispatcher};
    use crate::error::ManifoldError;
    use crate::state::Forwarder;

    pub fn aggregate_with_sender<D: CallDispatcher>(
        state: &mut Forwarder,
        dispatcher: &mut D,
        initiator: Addr,
        targets: &[Addr],
        payloads: &[Vec<u8>],
        values: &[u128],
    ) -> Result<Vec<Vec<u8>>, ManifoldError> {
        // Shape first: all three arrays describe the same calls.
        let same_length =
            targets.len() == payloads.len() && payloads.len() == values.len();
        if !same_length {
            return Err(ManifoldError::ArrayLengthsMismatch);
        }

        // One batch at a time.
        if !state.reentrancy_unlocked() {
            return Err(ManifoldError::Reentrancy);
        }

        // Nothing to do: succeed without ever touching register or guard.
        if targets.is_empty() {
            return Ok(Vec::new());
        }

        state.acquire(initiator);

        // Materialize the batch as owned triples before running anything.
        let calls: Vec<(Addr, Vec<u8>, u128)> = targets
            .iter()
            .copied()
            .zip(payloads.iter().cloned())
            .zip(values.iter().copied())
            .map(|((target, payload), value)| (target, payload, value))
            .collect();

        let mut outputs: Vec<Vec<u8>> = Vec::new();
        for (target, payload, value) in calls {
            let outcome = dispatcher.dispatch(state, target, &payload, value);
            if outcome.success {
                outputs.push(outcome.output.clone());
            } else {
                state.release();
                return Err(ManifoldError::Reverted(outcome.output.clone()));
            }
        }

        state.release();
        Ok(outputs)
    }
}
