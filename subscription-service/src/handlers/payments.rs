use super::{respond, AuthContext};
use crate::dtos::RefundPaymentRequest;
use crate::services::BillingError;
use crate::startup::AppState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use uuid::Uuid;
use validator::Validate;

/// Admin-only explicit refund of a completed payment.
pub async fn refund_payment(
    State(state): State<AppState>,
    ctx: AuthContext,
    Path(payment_id): Path<Uuid>,
    Json(request): Json<RefundPaymentRequest>,
) -> Response {
    if let Err(e) = ctx.ensure_admin() {
        return e.into_response();
    }
    if let Err(e) = request.validate() {
        return respond::<()>(Err(BillingError::from(e)), StatusCode::OK);
    }

    tracing::info!(admin_id = %ctx.user_id, payment_id = %payment_id, "Refund requested");
    let result = state
        .manager
        .refund_payment(payment_id, request.amount, request.reason.as_deref())
        .await;
    respond(result, StatusCode::OK)
}
