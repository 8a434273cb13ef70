//! Error types for veilpay.

use crate::ids::IdError;

/// Result type for veilpay domain operations.
pub type Result<T> = std::result::Result<T, PayError>;

/// Errors that can occur in veilpay domain operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PayError {
    /// Invalid input to a creation or update call.
    #[error("validation failed: {0}")]
    Validation(String),

    /// An illegal state transition was attempted.
    #[error("invalid {entity} transition: cannot {attempted} while {current}")]
    InvalidTransition {
        /// The aggregate kind ("payment" or "subscription").
        entity: &'static str,
        /// The current status, as its wire name.
        current: String,
        /// The attempted operation.
        attempted: &'static str,
    },

    /// Binary money operation across differing currencies.
    #[error("currency mismatch: {left} vs {right}")]
    CurrencyMismatch {
        /// Currency of the left operand.
        left: String,
        /// Currency of the right operand.
        right: String,
    },

    /// Amount outside the configured bounds for its currency.
    #[error("amount out of range for {currency}: {amount} not in [{min}, {max}]")]
    AmountOutOfRange {
        /// Currency code.
        currency: String,
        /// Offending amount in minor units.
        amount: i64,
        /// Minimum allowed, minor units.
        min: i64,
        /// Maximum allowed, minor units.
        max: i64,
    },

    /// Webhook signature verification failed.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Referenced aggregate does not exist.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// The entity kind.
        entity: &'static str,
        /// The identifier that was not found.
        id: String,
    },

    /// Gateway or other external dependency failed.
    #[error("external service error: {service} - {message}")]
    ExternalService {
        /// The service that failed.
        service: String,
        /// Error message, transport details stripped.
        message: String,
    },

    /// The gateway does not support the requested capability.
    #[error("{gateway} does not support {operation}")]
    Unsupported {
        /// Gateway name.
        gateway: String,
        /// The unsupported operation.
        operation: &'static str,
    },

    /// Gateway name outside the configured allow-list.
    #[error("unknown payment gateway: {0}")]
    UnknownGateway(String),

    /// Currency code missing from the precision table.
    #[error("unknown currency: {0}")]
    UnknownCurrency(String),

    /// Invalid identifier.
    #[error("invalid identifier: {0}")]
    InvalidId(#[from] IdError),
}

impl PayError {
    /// Build a validation error from anything printable.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Whether a caller may safely retry the failed operation.
    ///
    /// Only transport-level failures are retryable; business-rule
    /// violations will fail the same way every time.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::ExternalService { .. })
    }
}
