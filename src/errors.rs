//! Error types for referral operations

use thiserror::Error;

use crate::domain::{CircleId, EventId, FailureId, PromoterId};

/// Errors that can occur in the referral core
///
/// None of these are meant for end users. They surface on the operational
/// channel (logs, failed-effect records, drift reports).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReferralError {
    /// Condition evaluated against a wrong-typed snapshot value
    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    /// Percentage commission requested for an event without usable revenue
    #[error("Invalid revenue on event {0}: percentage commission needs revenue in range")]
    InvalidRevenue(EventId),

    /// Target circle does not exist in the program
    #[error("Circle not found: {0}")]
    CircleNotFound(CircleId),

    /// Another circle switch for the same promoter is in flight
    #[error("Concurrent circle switch rejected for promoter {0}")]
    ConcurrentSwitchRejected(PromoterId),

    /// Rebuilt totals differ from the incrementally maintained ones
    #[error("Aggregate drift detected for {key}: {detail}")]
    AggregateDrift { key: String, detail: String },

    /// Rule-triggered-by-rule loop guard
    #[error("Cascade depth {depth} exceeds limit {limit}")]
    CascadeDepthExceeded { depth: u8, limit: u8 },

    /// Event id was already committed
    #[error("Duplicate event: {0}")]
    DuplicateEvent(EventId),

    /// Input failed validation
    #[error("Validation error: {0}")]
    Validation(String),

    /// Failed-effect record not found
    #[error("Failed effect not found: {0}")]
    FailureNotFound(FailureId),

    /// Storage error
    #[error("Store error: {0}")]
    Store(String),

    /// Operation timed out
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Operation was cancelled
    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    /// Notification forwarding error
    #[error("Notification error: {0}")]
    Notification(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl ReferralError {
    /// Stable short name used in failed-effect records and log fields
    pub fn kind(&self) -> &'static str {
        match self {
            ReferralError::TypeMismatch(_) => "type_mismatch",
            ReferralError::InvalidRevenue(_) => "invalid_revenue",
            ReferralError::CircleNotFound(_) => "circle_not_found",
            ReferralError::ConcurrentSwitchRejected(_) => "concurrent_switch_rejected",
            ReferralError::AggregateDrift { .. } => "aggregate_drift",
            ReferralError::CascadeDepthExceeded { .. } => "cascade_depth_exceeded",
            ReferralError::DuplicateEvent(_) => "duplicate_event",
            ReferralError::Validation(_) => "validation",
            ReferralError::FailureNotFound(_) => "failure_not_found",
            ReferralError::Store(_) => "store",
            ReferralError::Timeout(_) => "timeout",
            ReferralError::Cancelled(_) => "cancelled",
            ReferralError::Notification(_) => "notification",
            ReferralError::Configuration(_) => "configuration",
            ReferralError::Serialization(_) => "serialization",
        }
    }

    /// Whether retrying the same unit of work may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, ReferralError::Store(_) | ReferralError::Timeout(_))
    }
}

/// Result type for referral operations
pub type ReferralResult<T> = Result<T, ReferralError>;

impl From<serde_json::Error> for ReferralError {
    fn from(err: serde_json::Error) -> Self {
        ReferralError::Serialization(err.to_string())
    }
}
