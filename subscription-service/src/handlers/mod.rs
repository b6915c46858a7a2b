//! HTTP handlers. Each one translates a request into a single lifecycle
//! call and wraps the outcome in the `{success, ...}` envelope.

pub mod context;
pub mod health;
pub mod payments;
pub mod renewals;
pub mod subscriptions;

use crate::dtos::LifecycleResult;
use crate::services::BillingError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use service_core::error::AppError;

pub use context::{AuthContext, Role};

/// Envelope response; the status code follows the error kind on failure.
pub fn respond<T: Serialize>(result: Result<T, BillingError>, success: StatusCode) -> Response {
    match result {
        Ok(data) => (success, Json(LifecycleResult::ok(data))).into_response(),
        Err(err) => {
            let body: LifecycleResult<T> = LifecycleResult::failure(&err);
            (AppError::from(err).status_code(), Json(body)).into_response()
        }
    }
}
