use super::{respond, AuthContext};
use crate::dtos::{
    CancelSubscriptionRequest, CreateSubscriptionRequest, UpgradeSubscriptionRequest,
};
use crate::models::Subscription;
use crate::services::BillingError;
use crate::startup::AppState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use uuid::Uuid;
use validator::Validate;

/// Load the subscription and check the caller may act on it.
async fn authorize(
    state: &AppState,
    ctx: &AuthContext,
    subscription_id: Uuid,
) -> Result<Subscription, Response> {
    let subscription = state
        .manager
        .get_subscription(subscription_id)
        .await
        .map_err(|e| respond::<()>(Err(e), StatusCode::OK))?;
    ctx.ensure_owner(subscription.user_id)
        .map_err(IntoResponse::into_response)?;
    Ok(subscription)
}

pub async fn create_subscription(
    State(state): State<AppState>,
    ctx: AuthContext,
    Json(request): Json<CreateSubscriptionRequest>,
) -> Response {
    if let Err(resp) = ctx.ensure_owner(request.user_id) {
        return resp.into_response();
    }
    if let Err(e) = request.validate() {
        return respond::<()>(Err(BillingError::from(e)), StatusCode::CREATED);
    }

    let result = state
        .manager
        .create(request.user_id, request.plan_id, &request.payment_method)
        .await;
    respond(result, StatusCode::CREATED)
}

pub async fn get_subscription(
    State(state): State<AppState>,
    ctx: AuthContext,
    Path(subscription_id): Path<Uuid>,
) -> Response {
    match authorize(&state, &ctx, subscription_id).await {
        Ok(subscription) => respond(Ok(subscription), StatusCode::OK),
        Err(resp) => resp,
    }
}

pub async fn renew_subscription(
    State(state): State<AppState>,
    ctx: AuthContext,
    Path(subscription_id): Path<Uuid>,
) -> Response {
    if let Err(resp) = authorize(&state, &ctx, subscription_id).await {
        return resp;
    }
    respond(state.manager.renew(subscription_id).await, StatusCode::OK)
}

pub async fn cancel_subscription(
    State(state): State<AppState>,
    ctx: AuthContext,
    Path(subscription_id): Path<Uuid>,
    Json(request): Json<CancelSubscriptionRequest>,
) -> Response {
    if let Err(resp) = authorize(&state, &ctx, subscription_id).await {
        return resp;
    }
    if let Err(e) = request.validate() {
        return respond::<()>(Err(BillingError::from(e)), StatusCode::OK);
    }

    let result = state
        .manager
        .cancel(subscription_id, request.reason.as_deref(), request.immediately)
        .await;
    respond(result, StatusCode::OK)
}

pub async fn upgrade_subscription(
    State(state): State<AppState>,
    ctx: AuthContext,
    Path(subscription_id): Path<Uuid>,
    Json(request): Json<UpgradeSubscriptionRequest>,
) -> Response {
    if let Err(resp) = authorize(&state, &ctx, subscription_id).await {
        return resp;
    }

    let result = state
        .manager
        .upgrade(subscription_id, request.new_plan_id)
        .await;
    respond(result, StatusCode::OK)
}
