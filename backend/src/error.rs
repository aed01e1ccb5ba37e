use thiserror::Error;

/// Caller-facing error kinds. Internal failure detail stays in logs; the
/// message here is safe to surface.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    #[error("offer expired")]
    OfferExpired,

    #[error("captain unavailable")]
    CaptainUnavailable,

    #[error("insufficient funds")]
    InsufficientFunds,

    #[error("idempotency key reuse with different payload")]
    IdempotencyConflict,

    #[error("rate limit exceeded")]
    RateLimited { retry_after_sec: u64 },

    #[error("ledger invariant violated: {0}")]
    LedgerImbalance(String),

    #[error("dependency failure: {0}")]
    Dependency(String),
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn status(&self) -> u16 {
        match self {
            AppError::Validation(_) => 400,
            AppError::Unauthorized(_) => 401,
            AppError::Forbidden(_) => 403,
            AppError::NotFound(_) => 404,
            AppError::InvalidTransition(_)
            | AppError::OfferExpired
            | AppError::CaptainUnavailable
            | AppError::InsufficientFunds
            | AppError::IdempotencyConflict => 409,
            AppError::RateLimited { .. } => 429,
            // A ledger that does not balance is a programming defect.
            AppError::LedgerImbalance(_) => 500,
            AppError::Dependency(_) => 502,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "validation_error",
            AppError::Unauthorized(_) => "unauthorized",
            AppError::Forbidden(_) => "forbidden",
            AppError::NotFound(_) => "not_found",
            AppError::InvalidTransition(_) => "invalid_transition",
            AppError::OfferExpired => "offer_expired",
            AppError::CaptainUnavailable => "captain_unavailable",
            AppError::InsufficientFunds => "insufficient_funds",
            AppError::IdempotencyConflict => "idempotency_conflict",
            AppError::RateLimited { .. } => "rate_limited",
            AppError::LedgerImbalance(_) => "ledger_imbalance",
            AppError::Dependency(_) => "dependency",
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        AppError::Dependency(format!("storage: {e}"))
    }
}

impl From<anyhow::Error> for AppError {
    fn from(e: anyhow::Error) -> Self {
        AppError::Dependency(format!("{e:#}"))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        AppError::Dependency(format!("serialization: {e}"))
    }
}
