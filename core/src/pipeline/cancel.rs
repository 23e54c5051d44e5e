//! Cooperative cancellation shared between the coordinator and a running loader.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use crate::types::GenerationToken;

const RUNNING: u8 = 0;
const CANCELLED: u8 = 1;
const COMMITTED: u8 = 2;

/// Cancellation flag for one load request.
///
/// The loader claims the right to publish its result with [`CancellationToken::try_commit`].
/// Cancel and commit race on a single atomic, so exactly one of them wins: a cancelled request
/// can never commit, and a committed request is no longer affected by a later cancel.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    generation: GenerationToken,
    state: Arc<AtomicU8>,
}

impl CancellationToken {
    pub fn new(generation: GenerationToken) -> Self {
        Self { generation, state: Arc::new(AtomicU8::new(RUNNING)) }
    }

    pub fn generation(&self) -> GenerationToken {
        self.generation
    }

    /// Returns `true` if this call moved the request from running to cancelled.
    pub fn cancel(&self) -> bool {
        self.state
            .compare_exchange(RUNNING, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.load(Ordering::Acquire) == CANCELLED
    }

    /// Claim the request's result for publication. Fails once cancelled.
    pub fn try_commit(&self) -> bool {
        self.state
            .compare_exchange(RUNNING, COMMITTED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_committed(&self) -> bool {
        self.state.load(Ordering::Acquire) == COMMITTED
    }
}
