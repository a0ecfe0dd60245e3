//! Client state and reply reconciliation
//!
//! The reconciler owns the only copy of the client's view of the world and
//! is the sole place it is mutated: once per turn, from a decoded reply or
//! a timeout.

use thiserror::Error;

use crate::protocol::{
    Broadcasts, Command, DroneFrame, Outcome, Position, RejectReason, DRONE_SLOTS,
};

/// Reconciliation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    #[error("A request is already awaiting its reply")]
    AlreadyAwaiting,

    #[error("No request is awaiting a reply")]
    NotAwaiting,
}

pub type StateResult<T> = Result<T, StateError>;

/// What the client currently knows
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientState {
    /// Our drone's position
    pub position: Position,
    /// Outcome of the last answered command
    pub last_outcome: Option<Outcome>,
    /// Why the last answered command was refused, if it was
    pub last_reject: Option<RejectReason>,
    /// Last position each peer broadcast
    pub peers: Broadcasts,
}

impl Default for ClientState {
    fn default() -> Self {
        Self {
            position: Position::ORIGIN,
            last_outcome: None,
            last_reject: None,
            peers: [None; DRONE_SLOTS],
        }
    }
}

/// Per-turn phase
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TurnPhase {
    #[default]
    Idle,
    AwaitingReply { op: Command },
}

/// Result of one answered (or unanswered) request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    Accepted {
        position: Position,
        broadcasts: Broadcasts,
    },
    Rejected {
        reason: RejectReason,
        /// The position we are still at, not the one that was attempted
        position: Position,
        broadcasts: Broadcasts,
    },
    NoResponse,
}

/// Applies replies to the client state
#[derive(Debug, Default)]
pub struct Reconciler {
    state: ClientState,
    phase: TurnPhase,
}

impl Reconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &ClientState {
        &self.state
    }

    pub fn phase(&self) -> TurnPhase {
        self.phase
    }

    /// Mark a request for `op` as sent
    pub fn begin(&mut self, op: Command) -> StateResult<()> {
        if let TurnPhase::AwaitingReply { .. } = self.phase {
            return Err(StateError::AlreadyAwaiting);
        }
        self.phase = TurnPhase::AwaitingReply { op };
        Ok(())
    }

    /// Fold a decoded reply into the state
    ///
    /// Fields are taken at face value; the echoed op code is only checked
    /// for logging.
    pub fn on_reply(&mut self, reply: &DroneFrame) -> StateResult<TurnOutcome> {
        let TurnPhase::AwaitingReply { op } = self.phase else {
            return Err(StateError::NotAwaiting);
        };
        self.phase = TurnPhase::Idle;

        if reply.op != op {
            tracing::warn!("Reply echoes op '{}' but '{}' was sent", reply.op, op);
        }

        for (known, broadcast) in self.state.peers.iter_mut().zip(reply.broadcasts) {
            if broadcast.is_some() {
                *known = broadcast;
            }
        }

        self.state.last_outcome = Some(reply.outcome);
        let outcome = match reply.outcome {
            Outcome::Accepted => {
                self.state.position = reply.position;
                self.state.last_reject = None;
                TurnOutcome::Accepted {
                    position: self.state.position,
                    broadcasts: reply.broadcasts,
                }
            }
            Outcome::Rejected => {
                self.state.last_reject = Some(reply.reject_reason);
                TurnOutcome::Rejected {
                    reason: reply.reject_reason,
                    position: self.state.position,
                    broadcasts: reply.broadcasts,
                }
            }
        };

        tracing::debug!("Reconciled drone {} reply: {:?}", reply.drone_id, outcome);
        Ok(outcome)
    }

    /// No reply arrived in time; nothing changes
    pub fn on_timeout(&mut self) -> StateResult<TurnOutcome> {
        if self.phase == TurnPhase::Idle {
            return Err(StateError::NotAwaiting);
        }
        self.phase = TurnPhase::Idle;
        Ok(TurnOutcome::NoResponse)
    }

    /// Abandon the pending request without touching the state
    pub fn abort(&mut self) {
        self.phase = TurnPhase::Idle;
    }
}
