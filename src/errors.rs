use http::StatusCode;

/// Crate-wide error type returned by every aggregate operation and service.
///
/// Variants are grouped by how a caller should react: caller-input problems
/// (`ValidationError`, `InvalidStatusTransition`, `InvalidOperation`,
/// `MinimumOrderValueNotMet`), lookup misses (`NotFound`), concurrency or
/// idempotency conflicts (`Conflict`), and failures of collaborators behind the
/// persistence and provider ports.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Invalid {kind} transition from {from} to {to}")]
    InvalidStatusTransition {
        kind: &'static str,
        from: String,
        to: String,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Minimum order value not met: requires {required}, got {actual}")]
    MinimumOrderValueNotMet { required: i64, actual: i64 },

    #[error("Payment provider not available: {0}")]
    ProviderUnavailable(String),

    #[error("Payment failed: {0}")]
    PaymentFailed(String),

    #[error("External service error: {0}")]
    ExternalServiceError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl ServiceError {
    /// Shorthand used by the status state machines.
    pub fn transition(
        kind: &'static str,
        from: impl ToString,
        to: impl ToString,
    ) -> Self {
        ServiceError::InvalidStatusTransition {
            kind,
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// Returns the HTTP status code an API layer should render for this error.
    /// This is the single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::ValidationError(_) | Self::InvalidOperation(_) => StatusCode::BAD_REQUEST,
            Self::InvalidStatusTransition { .. } | Self::Conflict(_) => StatusCode::CONFLICT,
            Self::MinimumOrderValueNotMet { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::PaymentFailed(_) => StatusCode::PAYMENT_REQUIRED,
            Self::ProviderUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::ExternalServiceError(_) => StatusCode::BAD_GATEWAY,
            Self::DatabaseError(_) | Self::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether retrying the same call may succeed. Caller-input errors and
    /// illegal transitions never become valid by retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ExternalServiceError(_) | Self::DatabaseError(_) | Self::ProviderUnavailable(_)
        )
    }

    /// Returns the error message suitable for API responses.
    /// Internal errors return generic messages to avoid leaking implementation details.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::InternalError(_) => "Internal server error".to_string(),
            _ => self.to_string(),
        }
    }
}
