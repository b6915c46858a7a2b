//! PostgreSQL store.
//!
//! Subscription and payment rows are locked with `FOR UPDATE` when loaded
//! inside a unit of work. Balance debits are a single conditional `UPDATE`.

use super::{SubscriptionStore, UnitOfWork};
use crate::models::{
    NewPayment, NewSubscription, Payment, PaymentStatus, Plan, Subscription, SubscriptionStatus,
    UserAccount,
};
use crate::services::database::Database;
use crate::services::error::BillingError;
use crate::services::metrics::DB_QUERY_DURATION;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use prometheus::HistogramTimer;
use rust_decimal::Decimal;
use sqlx::{Postgres, Transaction};
use tracing::{debug, instrument};
use uuid::Uuid;

const SUBSCRIPTION_COLUMNS: &str = "subscription_id, user_id, plan_id, status, start_date, end_date, next_billing_date, billing_cycle, payment_method, auto_renew, cancelled_at, cancellation_reason, created_utc, updated_utc";

const PAYMENT_COLUMNS: &str = "payment_id, user_id, subscription_id, amount, currency, method, status, transaction_id, description, created_utc, updated_utc";

fn timer(operation: &str) -> HistogramTimer {
    DB_QUERY_DURATION
        .with_label_values(&[operation])
        .start_timer()
}

/// Serialization failures and deadlocks surface as conflicts so callers can
/// retry; everything else is a persistence failure.
fn db_error(context: &str, e: sqlx::Error) -> BillingError {
    if let sqlx::Error::Database(db) = &e {
        if matches!(db.code().as_deref(), Some("40001") | Some("40P01")) {
            return BillingError::ConcurrencyConflict;
        }
    }
    BillingError::persistence(context, anyhow::anyhow!("{}: {}", context, e))
}

#[derive(Clone)]
pub struct PgStore {
    db: Database,
}

impl PgStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }
}

#[async_trait]
impl SubscriptionStore for PgStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, BillingError> {
        let tx = self
            .db
            .pool()
            .begin()
            .await
            .map_err(|e| db_error("Failed to begin transaction", e))?;
        Ok(Box::new(PgUnitOfWork { tx }))
    }

    #[instrument(skip(self))]
    async fn get_subscription(
        &self,
        subscription_id: Uuid,
    ) -> Result<Option<Subscription>, BillingError> {
        let timer = timer("get_subscription");
        let sql = format!(
            "SELECT {} FROM subscriptions WHERE subscription_id = $1",
            SUBSCRIPTION_COLUMNS
        );
        let subscription = sqlx::query_as::<_, Subscription>(&sql)
            .bind(subscription_id)
            .fetch_optional(self.db.pool())
            .await
            .map_err(|e| db_error("Failed to get subscription", e))?;
        timer.observe_duration();
        Ok(subscription)
    }

    #[instrument(skip(self))]
    async fn find_expiring(
        &self,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<Subscription>, BillingError> {
        let timer = timer("find_expiring");
        let sql = format!(
            r#"
            SELECT {} FROM subscriptions
            WHERE status = 'active' AND auto_renew = TRUE
              AND end_date >= $1 AND end_date <= $2
            ORDER BY end_date ASC, subscription_id ASC
            "#,
            SUBSCRIPTION_COLUMNS
        );
        let subscriptions = sqlx::query_as::<_, Subscription>(&sql)
            .bind(from)
            .bind(until)
            .fetch_all(self.db.pool())
            .await
            .map_err(|e| db_error("Failed to find expiring subscriptions", e))?;
        timer.observe_duration();
        debug!(count = subscriptions.len(), "Expiring subscriptions loaded");
        Ok(subscriptions)
    }

    async fn health_check(&self) -> Result<(), BillingError> {
        self.db
            .health_check()
            .await
            .map_err(|e| BillingError::persistence("Health check failed", anyhow::anyhow!("{}", e)))
    }
}

struct PgUnitOfWork {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    async fn find_user(&mut self, user_id: Uuid) -> Result<Option<UserAccount>, BillingError> {
        let timer = timer("find_user");
        let user = sqlx::query_as::<_, UserAccount>(
            "SELECT user_id, balance, currency, created_utc, updated_utc FROM users WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| db_error("Failed to get user", e))?;
        timer.observe_duration();
        Ok(user)
    }

    async fn find_plan(&mut self, plan_id: Uuid) -> Result<Option<Plan>, BillingError> {
        let timer = timer("find_plan");
        let plan = sqlx::query_as::<_, Plan>(
            "SELECT plan_id, name, price, currency, duration_days, status, created_utc FROM plans WHERE plan_id = $1",
        )
        .bind(plan_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| db_error("Failed to get plan", e))?;
        timer.observe_duration();
        Ok(plan)
    }

    async fn find_subscription(
        &mut self,
        subscription_id: Uuid,
    ) -> Result<Option<Subscription>, BillingError> {
        let timer = timer("lock_subscription");
        let sql = format!(
            "SELECT {} FROM subscriptions WHERE subscription_id = $1 FOR UPDATE",
            SUBSCRIPTION_COLUMNS
        );
        let subscription = sqlx::query_as::<_, Subscription>(&sql)
            .bind(subscription_id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| db_error("Failed to lock subscription", e))?;
        timer.observe_duration();
        Ok(subscription)
    }

    async fn has_active_subscription(
        &mut self,
        user_id: Uuid,
        plan_id: Uuid,
    ) -> Result<bool, BillingError> {
        let timer = timer("has_active_subscription");
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM subscriptions WHERE user_id = $1 AND plan_id = $2 AND status = 'active')",
        )
        .bind(user_id)
        .bind(plan_id)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| db_error("Failed to check active subscription", e))?;
        timer.observe_duration();
        Ok(exists)
    }

    async fn debit_balance(&mut self, user_id: Uuid, amount: Decimal) -> Result<bool, BillingError> {
        let timer = timer("debit_balance");
        let result = sqlx::query(
            r#"
            UPDATE users SET balance = balance - $2, updated_utc = NOW()
            WHERE user_id = $1 AND balance >= $2
            "#,
        )
        .bind(user_id)
        .bind(amount)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| db_error("Failed to debit balance", e))?;
        timer.observe_duration();
        Ok(result.rows_affected() == 1)
    }

    async fn credit_balance(
        &mut self,
        user_id: Uuid,
        amount: Decimal,
    ) -> Result<bool, BillingError> {
        let timer = timer("credit_balance");
        let result = sqlx::query(
            "UPDATE users SET balance = balance + $2, updated_utc = NOW() WHERE user_id = $1",
        )
        .bind(user_id)
        .bind(amount)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| db_error("Failed to credit balance", e))?;
        timer.observe_duration();
        Ok(result.rows_affected() == 1)
    }

    async fn insert_subscription(
        &mut self,
        input: &NewSubscription,
    ) -> Result<Subscription, BillingError> {
        let timer = timer("insert_subscription");
        let sql = format!(
            r#"
            INSERT INTO subscriptions (subscription_id, user_id, plan_id, status, start_date, end_date, next_billing_date, billing_cycle, payment_method, auto_renew, created_utc, updated_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $5, $5)
            RETURNING {}
            "#,
            SUBSCRIPTION_COLUMNS
        );
        let subscription = sqlx::query_as::<_, Subscription>(&sql)
            .bind(Uuid::new_v4())
            .bind(input.user_id)
            .bind(input.plan_id)
            .bind(SubscriptionStatus::Active.as_str())
            .bind(input.start_date)
            .bind(input.end_date)
            .bind(input.next_billing_date)
            .bind(&input.billing_cycle)
            .bind(&input.payment_method)
            .bind(input.auto_renew)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|e| match &e {
                sqlx::Error::Database(db) if db.is_unique_violation() => {
                    BillingError::AlreadySubscribed
                }
                _ => db_error("Failed to insert subscription", e),
            })?;
        timer.observe_duration();
        Ok(subscription)
    }

    async fn update_subscription_period(
        &mut self,
        subscription_id: Uuid,
        end_date: DateTime<Utc>,
        next_billing_date: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Subscription, BillingError> {
        let timer = timer("update_subscription_period");
        let sql = format!(
            r#"
            UPDATE subscriptions SET end_date = $2, next_billing_date = $3, updated_utc = $4
            WHERE subscription_id = $1
            RETURNING {}
            "#,
            SUBSCRIPTION_COLUMNS
        );
        let subscription = sqlx::query_as::<_, Subscription>(&sql)
            .bind(subscription_id)
            .bind(end_date)
            .bind(next_billing_date)
            .bind(now)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| db_error("Failed to update subscription period", e))?
            .ok_or(BillingError::NotFound("subscription"))?;
        timer.observe_duration();
        Ok(subscription)
    }

    async fn update_subscription_plan(
        &mut self,
        subscription_id: Uuid,
        plan_id: Uuid,
        billing_cycle: &str,
        end_date: DateTime<Utc>,
        next_billing_date: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Subscription, BillingError> {
        let timer = timer("update_subscription_plan");
        let sql = format!(
            r#"
            UPDATE subscriptions
            SET plan_id = $2, billing_cycle = $3, end_date = $4, next_billing_date = $5, updated_utc = $6
            WHERE subscription_id = $1
            RETURNING {}
            "#,
            SUBSCRIPTION_COLUMNS
        );
        let subscription = sqlx::query_as::<_, Subscription>(&sql)
            .bind(subscription_id)
            .bind(plan_id)
            .bind(billing_cycle)
            .bind(end_date)
            .bind(next_billing_date)
            .bind(now)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| match &e {
                sqlx::Error::Database(db) if db.is_unique_violation() => {
                    BillingError::AlreadySubscribed
                }
                _ => db_error("Failed to update subscription plan", e),
            })?
            .ok_or(BillingError::NotFound("subscription"))?;
        timer.observe_duration();
        Ok(subscription)
    }

    async fn mark_subscription_cancelled(
        &mut self,
        subscription_id: Uuid,
        cancelled_at: DateTime<Utc>,
        reason: Option<&str>,
        end_date: DateTime<Utc>,
    ) -> Result<Subscription, BillingError> {
        let timer = timer("cancel_subscription");
        let sql = format!(
            r#"
            UPDATE subscriptions
            SET status = $2, auto_renew = FALSE, cancelled_at = $3, cancellation_reason = $4,
                end_date = $5, updated_utc = $3
            WHERE subscription_id = $1
            RETURNING {}
            "#,
            SUBSCRIPTION_COLUMNS
        );
        let subscription = sqlx::query_as::<_, Subscription>(&sql)
            .bind(subscription_id)
            .bind(SubscriptionStatus::Cancelled.as_str())
            .bind(cancelled_at)
            .bind(reason)
            .bind(end_date)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| db_error("Failed to cancel subscription", e))?
            .ok_or(BillingError::NotFound("subscription"))?;
        timer.observe_duration();
        Ok(subscription)
    }

    async fn insert_payment(&mut self, input: &NewPayment) -> Result<Payment, BillingError> {
        let timer = timer("insert_payment");
        let sql = format!(
            r#"
            INSERT INTO payments (payment_id, user_id, subscription_id, amount, currency, method, status, transaction_id, description, created_utc, updated_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $10)
            RETURNING {}
            "#,
            PAYMENT_COLUMNS
        );
        let payment = sqlx::query_as::<_, Payment>(&sql)
            .bind(Uuid::new_v4())
            .bind(input.user_id)
            .bind(input.subscription_id)
            .bind(input.amount)
            .bind(&input.currency)
            .bind(&input.method)
            .bind(input.status.as_str())
            .bind(&input.transaction_id)
            .bind(&input.description)
            .bind(input.created_utc)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|e| db_error("Failed to insert payment", e))?;
        timer.observe_duration();
        Ok(payment)
    }

    async fn find_payment(&mut self, payment_id: Uuid) -> Result<Option<Payment>, BillingError> {
        let timer = timer("lock_payment");
        let sql = format!(
            "SELECT {} FROM payments WHERE payment_id = $1 FOR UPDATE",
            PAYMENT_COLUMNS
        );
        let payment = sqlx::query_as::<_, Payment>(&sql)
            .bind(payment_id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| db_error("Failed to lock payment", e))?;
        timer.observe_duration();
        Ok(payment)
    }

    async fn update_payment_status(
        &mut self,
        payment_id: Uuid,
        status: PaymentStatus,
        now: DateTime<Utc>,
    ) -> Result<Payment, BillingError> {
        let timer = timer("update_payment_status");
        let sql = format!(
            "UPDATE payments SET status = $2, updated_utc = $3 WHERE payment_id = $1 RETURNING {}",
            PAYMENT_COLUMNS
        );
        let payment = sqlx::query_as::<_, Payment>(&sql)
            .bind(payment_id)
            .bind(status.as_str())
            .bind(now)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| db_error("Failed to update payment status", e))?
            .ok_or(BillingError::NotFound("payment"))?;
        timer.observe_duration();
        Ok(payment)
    }

    async fn commit(self: Box<Self>) -> Result<(), BillingError> {
        self.tx
            .commit()
            .await
            .map_err(|e| db_error("Failed to commit transaction", e))
    }

    async fn rollback(self: Box<Self>) -> Result<(), BillingError> {
        self.tx
            .rollback()
            .await
            .map_err(|e| db_error("Failed to roll back transaction", e))
    }
}
