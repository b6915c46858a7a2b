//! Persistence seam for the lifecycle manager.
//!
//! Every lifecycle operation runs inside exactly one [`UnitOfWork`]. Writes
//! made through it become visible only on [`UnitOfWork::commit`]; a unit of
//! work that is rolled back or dropped leaves no trace.

mod memory;
mod postgres;

pub use memory::InMemoryStore;
pub use postgres::PgStore;

use crate::models::{NewPayment, NewSubscription, Payment, PaymentStatus, Plan, Subscription, UserAccount};
use crate::services::error::BillingError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Open a new transaction.
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, BillingError>;

    /// Read-only lookup outside any transaction.
    async fn get_subscription(
        &self,
        subscription_id: Uuid,
    ) -> Result<Option<Subscription>, BillingError>;

    /// Active, auto-renewing subscriptions with `from <= end_date <= until`,
    /// oldest `end_date` first.
    async fn find_expiring(
        &self,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<Subscription>, BillingError>;

    async fn health_check(&self) -> Result<(), BillingError>;
}

#[async_trait]
pub trait UnitOfWork: Send {
    async fn find_user(&mut self, user_id: Uuid) -> Result<Option<UserAccount>, BillingError>;

    async fn find_plan(&mut self, plan_id: Uuid) -> Result<Option<Plan>, BillingError>;

    /// Load a subscription and hold it for the rest of the unit of work.
    async fn find_subscription(
        &mut self,
        subscription_id: Uuid,
    ) -> Result<Option<Subscription>, BillingError>;

    async fn has_active_subscription(
        &mut self,
        user_id: Uuid,
        plan_id: Uuid,
    ) -> Result<bool, BillingError>;

    /// Decrement the balance only if it covers `amount`, as a single
    /// conditional write. Returns `false` when nothing was debited.
    async fn debit_balance(&mut self, user_id: Uuid, amount: Decimal) -> Result<bool, BillingError>;

    /// Returns `false` when the user does not exist.
    async fn credit_balance(&mut self, user_id: Uuid, amount: Decimal)
        -> Result<bool, BillingError>;

    /// Fails with [`BillingError::AlreadySubscribed`] when an active
    /// subscription to the same plan exists for the user.
    async fn insert_subscription(
        &mut self,
        input: &NewSubscription,
    ) -> Result<Subscription, BillingError>;

    async fn update_subscription_period(
        &mut self,
        subscription_id: Uuid,
        end_date: DateTime<Utc>,
        next_billing_date: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Subscription, BillingError>;

    async fn update_subscription_plan(
        &mut self,
        subscription_id: Uuid,
        plan_id: Uuid,
        billing_cycle: &str,
        end_date: DateTime<Utc>,
        next_billing_date: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Subscription, BillingError>;

    /// Set status to cancelled and clear auto-renew.
    async fn mark_subscription_cancelled(
        &mut self,
        subscription_id: Uuid,
        cancelled_at: DateTime<Utc>,
        reason: Option<&str>,
        end_date: DateTime<Utc>,
    ) -> Result<Subscription, BillingError>;

    async fn insert_payment(&mut self, input: &NewPayment) -> Result<Payment, BillingError>;

    /// Load a payment and hold it for the rest of the unit of work.
    async fn find_payment(&mut self, payment_id: Uuid) -> Result<Option<Payment>, BillingError>;

    async fn update_payment_status(
        &mut self,
        payment_id: Uuid,
        status: PaymentStatus,
        now: DateTime<Utc>,
    ) -> Result<Payment, BillingError>;

    async fn commit(self: Box<Self>) -> Result<(), BillingError>;

    async fn rollback(self: Box<Self>) -> Result<(), BillingError>;
}
