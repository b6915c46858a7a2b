use super::{respond, AuthContext};
use crate::dtos::RunRenewalsQuery;
use crate::services::BillingError;
use crate::startup::AppState;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use validator::Validate;

/// Trigger one renewal batch. Called by the external cron.
pub async fn run_renewals(
    State(state): State<AppState>,
    ctx: AuthContext,
    Query(query): Query<RunRenewalsQuery>,
) -> Response {
    if let Err(e) = ctx.ensure_operator() {
        return e.into_response();
    }
    if let Err(e) = query.validate() {
        return respond::<()>(Err(BillingError::from(e)), StatusCode::OK);
    }

    let window = query
        .window_hours
        .map(chrono::Duration::hours)
        .unwrap_or(state.renewal_window);
    let result = state
        .renewals
        .process_expiring_subscriptions(window)
        .await;
    respond(result, StatusCode::OK)
}
