use std::time::Duration;

use thiserror::Error;

/// Why a single connection attempt produced no stream.
#[derive(Debug, Error)]
pub enum DialError {
    #[error("invalid target {0:?}: {1}")]
    InvalidTarget(String, &'static str),
    #[error("dial timeout after {0:?}")]
    Timeout(Duration),
    #[error("dial cancelled")]
    Cancelled,
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum RaceError {
    #[error("host(s) unavailable")]
    AllUnreachable,
    /// A dial task ended without reporting its outcome.
    #[error("race: {reported} of {launched} attempts reported before the result channel closed")]
    Internal { launched: usize, reported: usize },
}

impl RaceError {
    pub fn is_all_unreachable(&self) -> bool {
        matches!(self, RaceError::AllUnreachable)
    }
}
