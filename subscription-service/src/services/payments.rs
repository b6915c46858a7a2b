//! Payment record writer.

use crate::models::{NewPayment, Payment, PaymentStatus, TransactionPrefix};
use crate::services::error::BillingError;
use crate::services::store::UnitOfWork;
use chrono::{DateTime, Utc};
use tracing::info;
use uuid::Uuid;

/// Unique transaction identifier, e.g. `RENEW-<uuid>`.
pub fn transaction_id(prefix: TransactionPrefix) -> String {
    format!("{}-{}", prefix.as_str(), Uuid::new_v4())
}

pub async fn append(uow: &mut dyn UnitOfWork, input: &NewPayment) -> Result<Payment, BillingError> {
    let payment = uow.insert_payment(input).await?;
    info!(
        payment_id = %payment.payment_id,
        transaction_id = %payment.transaction_id,
        amount = %payment.amount,
        status = %payment.status,
        "Payment recorded"
    );
    Ok(payment)
}

/// Move a completed payment to refunded.
pub async fn mark_refunded(
    uow: &mut dyn UnitOfWork,
    payment: &Payment,
    now: DateTime<Utc>,
) -> Result<Payment, BillingError> {
    let current = payment.status();
    if !current.can_transition_to(PaymentStatus::Refunded) {
        return Err(BillingError::InvalidState(format!(
            "payment is {} and cannot be refunded",
            current.as_str()
        )));
    }
    uow.update_payment_status(payment.payment_id, PaymentStatus::Refunded, now)
        .await
}
