use ulid::Ulid;

use crate::model::{BookingStatus, Ms, Span};

#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    /// No active tenant owns this hostname.
    TenantNotFound(String),
    AlreadyExists(Ulid),
    InvalidInterval { start: Ms, end: Ms },
    /// Overlaps the given booking.
    Conflict(Ulid),
    OutsideWorkingHours { staff_id: Ulid, span: Span },
    InvalidTransition { id: Ulid, from: BookingStatus, to: BookingStatus },
    HasBookings(Ulid),
    Validation(String),
    LimitExceeded(&'static str),
    Store(String),
}

impl EngineError {
    /// Stable classification surfaced to callers.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::NotFound(_) | EngineError::TenantNotFound(_) => "not_found",
            EngineError::InvalidInterval { .. } => "invalid_interval",
            EngineError::Conflict(_) | EngineError::AlreadyExists(_) => "conflict",
            EngineError::OutsideWorkingHours { .. }
            | EngineError::InvalidTransition { .. }
            | EngineError::HasBookings(_)
            | EngineError::Validation(_)
            | EngineError::LimitExceeded(_) => "validation",
            EngineError::Store(_) => "store",
        }
    }

    /// Whether a caller may reasonably retry with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Store(_))
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::TenantNotFound(host) => write!(f, "no tenant for host: {host}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::InvalidInterval { start, end } => {
                write!(f, "invalid interval [{start}, {end}): start must be before end")
            }
            EngineError::Conflict(id) => write!(f, "conflict with booking: {id}"),
            EngineError::OutsideWorkingHours { staff_id, span } => write!(
                f,
                "[{}, {}) is outside working hours of staff {staff_id}",
                span.start, span.end
            ),
            EngineError::InvalidTransition { id, from, to } => {
                write!(f, "booking {id} cannot go from {from} to {to}")
            }
            EngineError::HasBookings(id) => {
                write!(f, "cannot remove staff {id}: has active bookings")
            }
            EngineError::Validation(msg) => write!(f, "validation failed: {msg}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::Store(e) => write!(f, "store error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_separate_rejections_from_store_failures() {
        assert_eq!(EngineError::Conflict(Ulid::new()).kind(), "conflict");
        assert_eq!(EngineError::InvalidInterval { start: 2, end: 1 }.kind(), "invalid_interval");
        assert_eq!(EngineError::TenantNotFound("x".into()).kind(), "not_found");
        assert_eq!(EngineError::Validation("missing client".into()).kind(), "validation");
        assert!(!EngineError::Conflict(Ulid::new()).is_retryable());
        assert!(EngineError::Store("disk full".into()).is_retryable());
    }
}
