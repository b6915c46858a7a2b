//! Billing error taxonomy.

use rust_decimal::Decimal;
use serde::Serialize;
use service_core::error::AppError;
use thiserror::Error;

/// Failure category reported to callers alongside the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ValidationError,
    NotFound,
    InsufficientBalance,
    ConcurrencyConflict,
    GatewayError,
    PersistenceError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ValidationError => "validation_error",
            ErrorKind::NotFound => "not_found",
            ErrorKind::InsufficientBalance => "insufficient_balance",
            ErrorKind::ConcurrencyConflict => "concurrency_conflict",
            ErrorKind::GatewayError => "gateway_error",
            ErrorKind::PersistenceError => "persistence_error",
        }
    }
}

#[derive(Debug, Error)]
pub enum BillingError {
    #[error("{0}")]
    Validation(String),

    #[error("plan not available")]
    PlanUnavailable,

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("an active subscription to this plan already exists")]
    AlreadySubscribed,

    #[error("{0}")]
    InvalidState(String),

    #[error("insufficient balance")]
    InsufficientBalance { required: Decimal, available: Decimal },

    #[error("balance changed by a concurrent operation")]
    ConcurrencyConflict,

    #[error("payment gateway error: {0}")]
    Gateway(String),

    #[error("persistence error")]
    Persistence(#[source] anyhow::Error),
}

impl BillingError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BillingError::Validation(_)
            | BillingError::PlanUnavailable
            | BillingError::AlreadySubscribed
            | BillingError::InvalidState(_) => ErrorKind::ValidationError,
            BillingError::NotFound(_) => ErrorKind::NotFound,
            BillingError::InsufficientBalance { .. } => ErrorKind::InsufficientBalance,
            BillingError::ConcurrencyConflict => ErrorKind::ConcurrencyConflict,
            BillingError::Gateway(_) => ErrorKind::GatewayError,
            BillingError::Persistence(_) => ErrorKind::PersistenceError,
        }
    }

    /// Message safe to show to the end user. Storage details are never included.
    pub fn user_message(&self) -> String {
        match self {
            BillingError::Persistence(_) => "the operation could not be completed".to_string(),
            BillingError::ConcurrencyConflict => "insufficient balance".to_string(),
            other => other.to_string(),
        }
    }

    pub fn persistence(context: &str, err: impl Into<anyhow::Error>) -> Self {
        BillingError::Persistence(err.into().context(context.to_string()))
    }
}

impl From<validator::ValidationErrors> for BillingError {
    fn from(err: validator::ValidationErrors) -> Self {
        BillingError::Validation(err.to_string())
    }
}

impl From<BillingError> for AppError {
    fn from(err: BillingError) -> Self {
        let message = err.user_message();
        match err {
            BillingError::Validation(_) | BillingError::PlanUnavailable => {
                AppError::BadRequest(anyhow::anyhow!(message))
            }
            BillingError::InvalidState(_) => AppError::Unprocessable(anyhow::anyhow!(message)),
            BillingError::NotFound(_) => AppError::NotFound(anyhow::anyhow!(message)),
            BillingError::AlreadySubscribed | BillingError::ConcurrencyConflict => {
                AppError::Conflict(anyhow::anyhow!(message))
            }
            BillingError::InsufficientBalance { .. } => {
                AppError::Unprocessable(anyhow::anyhow!(message))
            }
            BillingError::Gateway(_) => AppError::BadGateway(message),
            BillingError::Persistence(e) => AppError::DatabaseError(e),
        }
    }
}
