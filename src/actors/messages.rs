//! Command types for actor communication
//!
//! Every actor owns an mpsc command receiver. Queries carry a oneshot sender
//! for the reply; everything else is fire-and-forget.

use tokio::sync::oneshot;

use crate::intake::IntakeStats;
use crate::thresholds::RefreshOutcome;

/// Commands accepted by an intake worker
#[derive(Debug)]
pub enum IntakeCommand {
    /// Counters accumulated since the worker started
    GetStats {
        respond_to: oneshot::Sender<IntakeStats>,
    },

    /// Stop after the batch in flight, if any, has been committed
    Shutdown,
}

/// Commands accepted by the liveness actor
#[derive(Debug)]
pub enum LivenessCommand {
    /// Sweep immediately, replying with the number of timeouts reported
    SweepNow {
        respond_to: oneshot::Sender<usize>,
    },

    Shutdown,
}

/// Commands accepted by the raw metric fan-out actor
#[derive(Debug)]
pub enum FanoutCommand {
    /// Remove closed sessions now, replying with how many were removed
    SweepNow {
        respond_to: oneshot::Sender<usize>,
    },

    Shutdown,
}

/// Commands accepted by the threshold refresh actor
#[derive(Debug)]
pub enum ReplicaCommand {
    RefreshNow {
        respond_to: oneshot::Sender<RefreshOutcome>,
    },

    Shutdown,
}
