//! Typed requests and responses for the lifecycle operations.

use crate::services::error::{BillingError, ErrorKind};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

fn default_payment_method() -> String {
    "balance".to_string()
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateSubscriptionRequest {
    pub user_id: Uuid,
    pub plan_id: Uuid,
    #[serde(default = "default_payment_method")]
    #[validate(length(min = 1, max = 32, message = "payment_method must be 1-32 characters"))]
    pub payment_method: String,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct CancelSubscriptionRequest {
    #[validate(length(max = 500, message = "reason must be at most 500 characters"))]
    pub reason: Option<String>,
    #[serde(default)]
    pub immediately: bool,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct UpgradeSubscriptionRequest {
    pub new_plan_id: Uuid,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct RefundPaymentRequest {
    /// Defaults to the full payment amount.
    pub amount: Option<Decimal>,
    #[validate(length(max = 500, message = "reason must be at most 500 characters"))]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct RunRenewalsQuery {
    #[validate(range(min = 1, max = 8760, message = "window_hours must be between 1 and 8760"))]
    pub window_hours: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubscriptionCreated {
    pub subscription_id: Uuid,
    pub plan_id: Uuid,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub next_billing_date: DateTime<Utc>,
    pub amount_charged: Decimal,
    pub currency: String,
    pub transaction_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubscriptionRenewed {
    pub subscription_id: Uuid,
    pub previous_end_date: DateTime<Utc>,
    pub new_end_date: DateTime<Utc>,
    pub new_next_billing_date: DateTime<Utc>,
    pub amount_charged: Decimal,
    pub transaction_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubscriptionCancelled {
    pub subscription_id: Uuid,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub end_date: DateTime<Utc>,
    /// True when the subscription was already cancelled and nothing changed.
    pub already_cancelled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubscriptionUpgraded {
    pub subscription_id: Uuid,
    pub previous_plan_id: Uuid,
    pub new_plan_id: Uuid,
    pub days_remaining: Decimal,
    pub proration_credit: Decimal,
    pub price_difference: Decimal,
    pub amount_charged: Decimal,
    pub new_end_date: DateTime<Utc>,
    pub transaction_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaymentRefunded {
    pub payment_id: Uuid,
    pub user_id: Uuid,
    pub refund_amount: Decimal,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenewalFailure {
    pub subscription_id: Uuid,
    pub error_kind: ErrorKind,
    pub message: String,
}

/// Outcome of one renewal batch run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RenewalSummary {
    pub total: usize,
    pub renewed: usize,
    /// Renewed by an overlapping run or no longer eligible once locked.
    pub skipped: usize,
    pub failed: usize,
    pub failures: Vec<RenewalFailure>,
}

/// Result envelope exposed to the API layer.
///
/// Serializes as `{"success": true, "data": ...}` or
/// `{"success": false, "error_kind": ..., "message": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum LifecycleResult<T> {
    Success {
        success: bool,
        data: T,
    },
    Failure {
        success: bool,
        error_kind: ErrorKind,
        message: String,
    },
}

impl<T> LifecycleResult<T> {
    pub fn ok(data: T) -> Self {
        LifecycleResult::Success {
            success: true,
            data,
        }
    }

    pub fn failure(err: &BillingError) -> Self {
        LifecycleResult::Failure {
            success: false,
            error_kind: err.kind(),
            message: err.user_message(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, LifecycleResult::Success { .. })
    }
}

impl<T> From<Result<T, BillingError>> for LifecycleResult<T> {
    fn from(result: Result<T, BillingError>) -> Self {
        match result {
            Ok(data) => LifecycleResult::ok(data),
            Err(err) => LifecycleResult::failure(&err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_envelope_shape() {
        let result: LifecycleResult<RenewalSummary> = Ok(RenewalSummary {
            total: 2,
            renewed: 2,
            skipped: 0,
            failed: 0,
            failures: vec![],
        })
        .into();

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["data"]["renewed"], 2);
    }

    #[test]
    fn failure_envelope_shape() {
        let result: LifecycleResult<RenewalSummary> = Err(BillingError::PlanUnavailable).into();

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error_kind"], "validation_error");
        assert_eq!(json["message"], "plan not available");
        assert!(json.get("data").is_none());
    }

    #[test]
    fn payment_method_defaults_to_balance() {
        let request: CreateSubscriptionRequest = serde_json::from_value(serde_json::json!({
            "user_id": Uuid::new_v4(),
            "plan_id": Uuid::new_v4(),
        }))
        .unwrap();
        assert_eq!(request.payment_method, "balance");
        assert!(request.validate().is_ok());
    }

    #[test]
    fn overlong_reason_fails_validation() {
        let request = CancelSubscriptionRequest {
            reason: Some("x".repeat(501)),
            immediately: false,
        };
        assert!(request.validate().is_err());
    }
}
