//! Protocol-level error taxonomy. These are rejection outcomes, not
//! process failures: callers log them and carry on with the round.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoreError {
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// Submission carried a round number other than the round in flight.
    #[error("round mismatch: got update for round {got}, current round is {expected}")]
    StaleRound { expected: u64, got: u64 },

    /// No distribute/collect cycle is currently accepting updates.
    #[error("no collection round is open")]
    RoundNotOpen,

    #[error("node '{node_id}' already submitted an update this round")]
    DuplicateSubmission { node_id: String },

    #[error("cannot aggregate an empty set of parameter sets")]
    EmptyAggregation,
}
