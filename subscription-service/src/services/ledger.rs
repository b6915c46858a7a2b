//! Balance ledger.
//!
//! All balance mutation goes through here so the sufficiency check and the
//! decrement are never split across separate writes.

use crate::models::UserAccount;
use crate::services::error::BillingError;
use crate::services::store::UnitOfWork;
use rust_decimal::Decimal;
use tracing::{debug, warn};
use uuid::Uuid;

/// Debit `amount` from the user's balance.
///
/// `user` is the snapshot read earlier in the same unit of work. If the
/// snapshot already shows too little money the caller gets
/// [`BillingError::InsufficientBalance`]; if the snapshot was sufficient but
/// the conditional write matched nothing, a concurrent debit won the race
/// and the result is [`BillingError::ConcurrencyConflict`].
pub async fn debit(
    uow: &mut dyn UnitOfWork,
    user: &UserAccount,
    amount: Decimal,
) -> Result<(), BillingError> {
    if amount <= Decimal::ZERO {
        return Err(BillingError::Validation(
            "debit amount must be positive".to_string(),
        ));
    }
    if !user.covers(amount) {
        return Err(BillingError::InsufficientBalance {
            required: amount,
            available: user.balance,
        });
    }

    if uow.debit_balance(user.user_id, amount).await? {
        debug!(user_id = %user.user_id, amount = %amount, "Balance debited");
        Ok(())
    } else {
        warn!(user_id = %user.user_id, amount = %amount, "Conditional debit matched no rows");
        Err(BillingError::ConcurrencyConflict)
    }
}

pub async fn credit(
    uow: &mut dyn UnitOfWork,
    user_id: Uuid,
    amount: Decimal,
) -> Result<(), BillingError> {
    if amount <= Decimal::ZERO {
        return Err(BillingError::Validation(
            "credit amount must be positive".to_string(),
        ));
    }
    if uow.credit_balance(user_id, amount).await? {
        debug!(user_id = %user_id, amount = %amount, "Balance credited");
        Ok(())
    } else {
        Err(BillingError::NotFound("user"))
    }
}
