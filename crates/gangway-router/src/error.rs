use std::time::Duration;

use thiserror::Error;
use tonic::Status;

/// Session-level failures surfaced on a stream. None of these are
/// fatal to the server; a clean peer close is not an error and is
/// propagated as a close frame instead.
#[derive(Debug, Error)]
pub enum RouterError {
    #[error("invalid init: {0}")]
    InvalidInit(String),

    #[error("session {0} already has a live stream for this side")]
    DuplicateSession(String),

    #[error("partner did not arrive within {0:?}")]
    RendezvousTimeout(Duration),

    #[error("peer did not accept a frame within {0:?}")]
    ForwardingTimeout(Duration),

    #[error("internal fault: {0}")]
    Internal(String),
}

impl RouterError {
    /// Stable code attached to wire error frames.
    pub fn code(&self) -> &'static str {
        match self {
            RouterError::InvalidInit(_) => "INVALID_INIT",
            RouterError::DuplicateSession(_) => "DUPLICATE_SESSION",
            RouterError::RendezvousTimeout(_) => "RENDEZVOUS_TIMEOUT",
            RouterError::ForwardingTimeout(_) => "FORWARDING_TIMEOUT",
            RouterError::Internal(_) => "INTERNAL",
        }
    }

    /// The gRPC status reported on the offending stream.
    pub fn to_status(&self) -> Status {
        match self {
            RouterError::InvalidInit(_) => Status::invalid_argument(self.to_string()),
            RouterError::DuplicateSession(_) => Status::already_exists(self.to_string()),
            RouterError::RendezvousTimeout(_) => Status::deadline_exceeded(self.to_string()),
            // Distinct from deadline_exceeded so a caller can tell "my
            // pairing was torn down" from "my own rendezvous timed out".
            RouterError::ForwardingTimeout(_) => Status::aborted(self.to_string()),
            RouterError::Internal(_) => Status::internal(self.to_string()),
        }
    }
}
