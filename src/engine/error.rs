use thiserror::Error;
use ulid::Ulid;

use crate::model::AppointmentStatus;

#[derive(Debug, Error)]
pub enum EngineError {
    /// The branch has no usable hours for the requested day. Distinct from
    /// [`EngineError::Closed`]: this means "not set up", not "closed today".
    #[error("{0}")]
    Configuration(String),
    #[error("{0}")]
    Closed(String),
    #[error("stylist {stylist_id} is no longer available at the selected time (held by appointment {conflicting})")]
    SlotUnavailable { stylist_id: String, conflicting: Ulid },
    #[error("{0}")]
    LeadTime(String),
    #[error("invalid appointment: {0}")]
    Validation(String),
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },
    #[error("cannot change appointment status from {from} to {to}")]
    InvalidTransition {
        from: AppointmentStatus,
        to: AppointmentStatus,
    },
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("WAL error: {0}")]
    Wal(String),
}

impl EngineError {
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        EngineError::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// Short reason label for metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            EngineError::Configuration(_) => "configuration",
            EngineError::Closed(_) => "closed",
            EngineError::SlotUnavailable { .. } => "slot_unavailable",
            EngineError::LeadTime(_) => "lead_time",
            EngineError::Validation(_) => "validation",
            EngineError::NotFound { .. } => "not_found",
            EngineError::InvalidTransition { .. } => "invalid_transition",
            EngineError::LimitExceeded(_) => "limit_exceeded",
            EngineError::Wal(_) => "wal",
        }
    }
}
