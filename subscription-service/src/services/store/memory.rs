//! In-memory store.
//!
//! A unit of work holds the whole-state lock from `begin` until it finishes
//! and writes to a staged copy, so transactions are serializable and a
//! commit swaps the staged copy in at once. Faults can be injected to drive
//! rollback paths in tests.

use super::{SubscriptionStore, UnitOfWork};
use crate::models::{
    NewPayment, NewSubscription, Payment, PaymentStatus, Plan, PlanStatus, Subscription,
    SubscriptionStatus, UserAccount,
};
use crate::services::error::BillingError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
struct State {
    users: HashMap<Uuid, UserAccount>,
    plans: HashMap<Uuid, Plan>,
    subscriptions: HashMap<Uuid, Subscription>,
    payments: Vec<Payment>,
}

#[derive(Debug, Default)]
struct Faults {
    fail_payment_insert: AtomicBool,
    fail_commit: AtomicBool,
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<State>>,
    faults: Arc<Faults>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_user(&self, balance: Decimal, currency: &str) -> UserAccount {
        let now = Utc::now();
        let user = UserAccount {
            user_id: Uuid::new_v4(),
            balance,
            currency: currency.to_string(),
            created_utc: now,
            updated_utc: now,
        };
        self.state
            .lock()
            .await
            .users
            .insert(user.user_id, user.clone());
        user
    }

    pub async fn insert_plan(
        &self,
        name: &str,
        price: Decimal,
        currency: &str,
        duration_days: i32,
        status: PlanStatus,
    ) -> Plan {
        let plan = Plan {
            plan_id: Uuid::new_v4(),
            name: name.to_string(),
            price,
            currency: currency.to_string(),
            duration_days,
            status: status.as_str().to_string(),
            created_utc: Utc::now(),
        };
        self.state
            .lock()
            .await
            .plans
            .insert(plan.plan_id, plan.clone());
        plan
    }

    pub async fn set_plan_status(&self, plan_id: Uuid, status: PlanStatus) {
        if let Some(plan) = self.state.lock().await.plans.get_mut(&plan_id) {
            plan.status = status.as_str().to_string();
        }
    }

    /// Seed or overwrite a subscription row as-is.
    pub async fn put_subscription(&self, subscription: Subscription) {
        self.state
            .lock()
            .await
            .subscriptions
            .insert(subscription.subscription_id, subscription);
    }

    pub async fn user(&self, user_id: Uuid) -> Option<UserAccount> {
        self.state.lock().await.users.get(&user_id).cloned()
    }

    pub async fn subscription(&self, subscription_id: Uuid) -> Option<Subscription> {
        self.state
            .lock()
            .await
            .subscriptions
            .get(&subscription_id)
            .cloned()
    }

    pub async fn subscriptions(&self) -> Vec<Subscription> {
        self.state
            .lock()
            .await
            .subscriptions
            .values()
            .cloned()
            .collect()
    }

    /// Payments in insertion order.
    pub async fn payments(&self) -> Vec<Payment> {
        self.state.lock().await.payments.clone()
    }

    pub fn fail_next_payment_insert(&self) {
        self.faults.fail_payment_insert.store(true, Ordering::SeqCst);
    }

    pub fn fail_next_commit(&self) {
        self.faults.fail_commit.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl SubscriptionStore for InMemoryStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, BillingError> {
        let guard = self.state.clone().lock_owned().await;
        let staged = guard.clone();
        Ok(Box::new(InMemoryUnitOfWork {
            guard,
            staged,
            faults: self.faults.clone(),
        }))
    }

    async fn get_subscription(
        &self,
        subscription_id: Uuid,
    ) -> Result<Option<Subscription>, BillingError> {
        Ok(self.subscription(subscription_id).await)
    }

    async fn find_expiring(
        &self,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<Subscription>, BillingError> {
        let state = self.state.lock().await;
        let mut expiring: Vec<Subscription> = state
            .subscriptions
            .values()
            .filter(|s| s.is_active() && s.auto_renew)
            .filter(|s| s.end_date >= from && s.end_date <= until)
            .cloned()
            .collect();
        expiring.sort_by_key(|s| (s.end_date, s.subscription_id));
        Ok(expiring)
    }

    async fn health_check(&self) -> Result<(), BillingError> {
        Ok(())
    }
}

struct InMemoryUnitOfWork {
    guard: OwnedMutexGuard<State>,
    staged: State,
    faults: Arc<Faults>,
}

impl InMemoryUnitOfWork {
    fn subscription_mut(
        &mut self,
        subscription_id: Uuid,
    ) -> Result<&mut Subscription, BillingError> {
        self.staged
            .subscriptions
            .get_mut(&subscription_id)
            .ok_or(BillingError::NotFound("subscription"))
    }
}

#[async_trait]
impl UnitOfWork for InMemoryUnitOfWork {
    async fn find_user(&mut self, user_id: Uuid) -> Result<Option<UserAccount>, BillingError> {
        Ok(self.staged.users.get(&user_id).cloned())
    }

    async fn find_plan(&mut self, plan_id: Uuid) -> Result<Option<Plan>, BillingError> {
        Ok(self.staged.plans.get(&plan_id).cloned())
    }

    async fn find_subscription(
        &mut self,
        subscription_id: Uuid,
    ) -> Result<Option<Subscription>, BillingError> {
        Ok(self.staged.subscriptions.get(&subscription_id).cloned())
    }

    async fn has_active_subscription(
        &mut self,
        user_id: Uuid,
        plan_id: Uuid,
    ) -> Result<bool, BillingError> {
        Ok(self
            .staged
            .subscriptions
            .values()
            .any(|s| s.user_id == user_id && s.plan_id == plan_id && s.is_active()))
    }

    async fn debit_balance(&mut self, user_id: Uuid, amount: Decimal) -> Result<bool, BillingError> {
        match self.staged.users.get_mut(&user_id) {
            Some(user) if user.balance >= amount => {
                user.balance -= amount;
                user.updated_utc = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn credit_balance(
        &mut self,
        user_id: Uuid,
        amount: Decimal,
    ) -> Result<bool, BillingError> {
        match self.staged.users.get_mut(&user_id) {
            Some(user) => {
                user.balance += amount;
                user.updated_utc = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn insert_subscription(
        &mut self,
        input: &NewSubscription,
    ) -> Result<Subscription, BillingError> {
        let duplicate = self
            .staged
            .subscriptions
            .values()
            .any(|s| s.user_id == input.user_id && s.plan_id == input.plan_id && s.is_active());
        if duplicate {
            return Err(BillingError::AlreadySubscribed);
        }

        let subscription = Subscription {
            subscription_id: Uuid::new_v4(),
            user_id: input.user_id,
            plan_id: input.plan_id,
            status: SubscriptionStatus::Active.as_str().to_string(),
            start_date: input.start_date,
            end_date: input.end_date,
            next_billing_date: input.next_billing_date,
            billing_cycle: input.billing_cycle.clone(),
            payment_method: input.payment_method.clone(),
            auto_renew: input.auto_renew,
            cancelled_at: None,
            cancellation_reason: None,
            created_utc: input.start_date,
            updated_utc: input.start_date,
        };
        self.staged
            .subscriptions
            .insert(subscription.subscription_id, subscription.clone());
        Ok(subscription)
    }

    async fn update_subscription_period(
        &mut self,
        subscription_id: Uuid,
        end_date: DateTime<Utc>,
        next_billing_date: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Subscription, BillingError> {
        let subscription = self.subscription_mut(subscription_id)?;
        subscription.end_date = end_date;
        subscription.next_billing_date = next_billing_date;
        subscription.updated_utc = now;
        Ok(subscription.clone())
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
        let subscription = self.subscription_mut(subscription_id)?;
        subscription.plan_id = plan_id;
        subscription.billing_cycle = billing_cycle.to_string();
        subscription.end_date = end_date;
        subscription.next_billing_date = next_billing_date;
        subscription.updated_utc = now;
        Ok(subscription.clone())
    }

    async fn mark_subscription_cancelled(
        &mut self,
        subscription_id: Uuid,
        cancelled_at: DateTime<Utc>,
        reason: Option<&str>,
        end_date: DateTime<Utc>,
    ) -> Result<Subscription, BillingError> {
        let subscription = self.subscription_mut(subscription_id)?;
        subscription.status = SubscriptionStatus::Cancelled.as_str().to_string();
        subscription.auto_renew = false;
        subscription.cancelled_at = Some(cancelled_at);
        subscription.cancellation_reason = reason.map(str::to_string);
        subscription.end_date = end_date;
        subscription.updated_utc = cancelled_at;
        Ok(subscription.clone())
    }

    async fn insert_payment(&mut self, input: &NewPayment) -> Result<Payment, BillingError> {
        if self.faults.fail_payment_insert.swap(false, Ordering::SeqCst) {
            return Err(BillingError::persistence(
                "Failed to insert payment",
                anyhow::anyhow!("injected fault"),
            ));
        }
        if self
            .staged
            .payments
            .iter()
            .any(|p| p.transaction_id == input.transaction_id)
        {
            return Err(BillingError::persistence(
                "Failed to insert payment",
                anyhow::anyhow!("duplicate transaction_id {}", input.transaction_id),
            ));
        }

        let payment = Payment {
            payment_id: Uuid::new_v4(),
            user_id: input.user_id,
            subscription_id: input.subscription_id,
            amount: input.amount,
            currency: input.currency.clone(),
            method: input.method.clone(),
            status: input.status.as_str().to_string(),
            transaction_id: input.transaction_id.clone(),
            description: input.description.clone(),
            created_utc: input.created_utc,
            updated_utc: input.created_utc,
        };
        self.staged.payments.push(payment.clone());
        Ok(payment)
    }

    async fn find_payment(&mut self, payment_id: Uuid) -> Result<Option<Payment>, BillingError> {
        Ok(self
            .staged
            .payments
            .iter()
            .find(|p| p.payment_id == payment_id)
            .cloned())
    }

    async fn update_payment_status(
        &mut self,
        payment_id: Uuid,
        status: PaymentStatus,
        now: DateTime<Utc>,
    ) -> Result<Payment, BillingError> {
        let payment = self
            .staged
            .payments
            .iter_mut()
            .find(|p| p.payment_id == payment_id)
            .ok_or(BillingError::NotFound("payment"))?;
        payment.status = status.as_str().to_string();
        payment.updated_utc = now;
        Ok(payment.clone())
    }

    async fn commit(self: Box<Self>) -> Result<(), BillingError> {
        if self.faults.fail_commit.swap(false, Ordering::SeqCst) {
            return Err(BillingError::persistence(
                "Failed to commit transaction",
                anyhow::anyhow!("injected fault"),
            ));
        }
        let InMemoryUnitOfWork {
            mut guard, staged, ..
        } = *self;
        *guard = staged;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), BillingError> {
        Ok(())
    }
}
