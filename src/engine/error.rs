use thiserror::Error;
use ulid::Ulid;

use crate::auth::AuthorizationError;
use crate::gateway::GatewayError;
use crate::model::{DateRange, InvalidRange};

use super::store::StoreError;

/// What a candidate stay collided with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictReason {
    /// Owner blackout period.
    Blackout(DateRange),
    /// An Approved or Paid reservation.
    Reservation(Ulid),
    /// The property is waiting on its own listing payment.
    PendingPayment(Ulid),
}

impl std::fmt::Display for ConflictReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConflictReason::Blackout(r) => write!(f, "property is unavailable from {} to {}", r.start(), r.end()),
            ConflictReason::Reservation(id) => write!(f, "dates are taken by reservation {id}"),
            ConflictReason::PendingPayment(id) => write!(f, "property {id} is pending payment"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("conflict: {0}")]
    Conflict(ConflictReason),
    #[error("unauthorized: {0}")]
    Unauthorized(#[from] AuthorizationError),
    #[error("{entity} {key} not found")]
    NotFound { entity: &'static str, key: String },
    #[error("illegal transition: {0}")]
    State(String),
    #[error("payment gateway: {0}")]
    Gateway(#[from] GatewayError),
    #[error("persistence: {0}")]
    Persistence(String),
}

impl EngineError {
    pub(crate) fn not_found(entity: &'static str, key: impl ToString) -> Self {
        EngineError::NotFound {
            entity,
            key: key.to_string(),
        }
    }

    pub(crate) fn state(msg: impl Into<String>) -> Self {
        EngineError::State(msg.into())
    }

    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        EngineError::Validation(msg.into())
    }

    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "validation",
            EngineError::Conflict(_) => "conflict",
            EngineError::Unauthorized(_) => "unauthorized",
            EngineError::NotFound { .. } => "not_found",
            EngineError::State(_) => "state",
            EngineError::Gateway(_) => "gateway",
            EngineError::Persistence(_) => "persistence",
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => EngineError::not_found("record", id),
            other => {
                tracing::error!("store failure: {other}");
                EngineError::Persistence(other.to_string())
            }
        }
    }
}

impl From<InvalidRange> for EngineError {
    fn from(e: InvalidRange) -> Self {
        EngineError::Validation(e.to_string())
    }
}
