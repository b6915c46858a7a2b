//! Subscription lifecycle manager.
//!
//! Each operation opens one unit of work, performs every read and write for
//! the operation inside it, and commits once. Any error rolls the whole unit
//! back, so balance, subscription and payment rows move together or not at
//! all. Events are published only after a successful commit.

use crate::dtos::{
    PaymentRefunded, SubscriptionCancelled, SubscriptionCreated, SubscriptionRenewed,
    SubscriptionUpgraded,
};
use crate::models::{
    NewPayment, NewSubscription, PaymentMethod, PaymentStatus, Plan, Subscription,
    SubscriptionStatus, TransactionPrefix, UserAccount,
};
use crate::services::clock::{Clock, SystemClock};
use crate::services::error::{BillingError, ErrorKind};
use crate::services::events::{EventPublisher, SubscriptionEvent, TracingEventPublisher};
use crate::services::gateway::{DisabledGateway, GatewayCharge, PaymentGateway};
use crate::services::metrics;
use crate::services::proration::{round_money, Proration};
use crate::services::store::{SubscriptionStore, UnitOfWork};
use crate::services::{ledger, payments};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// A charge already taken by the external gateway. Refunded if the unit of
/// work that was supposed to record it does not commit.
#[derive(Debug, Clone)]
struct GatewayCharged {
    transaction_id: String,
    amount: Decimal,
}

#[derive(Clone)]
pub struct SubscriptionManager {
    store: Arc<dyn SubscriptionStore>,
    gateway: Arc<dyn PaymentGateway>,
    events: Arc<dyn EventPublisher>,
    clock: Arc<dyn Clock>,
}

impl SubscriptionManager {
    pub fn new(store: Arc<dyn SubscriptionStore>) -> Self {
        Self {
            store,
            gateway: Arc::new(DisabledGateway),
            events: Arc::new(TracingEventPublisher),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_gateway(mut self, gateway: Arc<dyn PaymentGateway>) -> Self {
        self.gateway = gateway;
        self
    }

    pub fn with_events(mut self, events: Arc<dyn EventPublisher>) -> Self {
        self.events = events;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn store(&self) -> &Arc<dyn SubscriptionStore> {
        &self.store
    }

    pub fn events(&self) -> &Arc<dyn EventPublisher> {
        &self.events
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    // =========================================================================
    // Create
    // =========================================================================

    /// Purchase a plan for a user.
    #[instrument(skip(self), fields(user_id = %user_id, plan_id = %plan_id))]
    pub async fn create(
        &self,
        user_id: Uuid,
        plan_id: Uuid,
        payment_method: &str,
    ) -> Result<SubscriptionCreated, BillingError> {
        let result = async {
            let method = parse_method(payment_method)?;
            let mut uow = self.store.begin().await?;
            let mut charged = None;
            let outcome = self
                .create_in(uow.as_mut(), &mut charged, user_id, plan_id, &method)
                .await;
            self.finish(uow, charged, outcome).await
        }
        .await;

        self.observe("create", &result);
        if let Ok(created) = &result {
            metrics::record_charge_amount(&created.currency, "create", created.amount_charged);
            self.events
                .publish(SubscriptionEvent::Created {
                    subscription_id: created.subscription_id,
                    user_id,
                    plan_id,
                    end_date: created.end_date,
                    amount: created.amount_charged,
                })
                .await;
        }
        result
    }

    async fn create_in(
        &self,
        uow: &mut dyn UnitOfWork,
        charged: &mut Option<GatewayCharged>,
        user_id: Uuid,
        plan_id: Uuid,
        method: &PaymentMethod,
    ) -> Result<SubscriptionCreated, BillingError> {
        let plan = uow
            .find_plan(plan_id)
            .await?
            .filter(Plan::is_available)
            .ok_or(BillingError::PlanUnavailable)?;
        let user = uow
            .find_user(user_id)
            .await?
            .ok_or(BillingError::NotFound("user"))?;
        ensure_currency(&user, &plan, method)?;

        if uow.has_active_subscription(user_id, plan_id).await? {
            return Err(BillingError::AlreadySubscribed);
        }

        let now = self.clock.now();
        let end_date = period_end(now, &plan)?;
        let description = format!("Subscription to {}", plan.name);

        // Balance check and debit precede every write.
        let transaction_id = if plan.price > Decimal::ZERO {
            Some(
                self.settle(
                    uow,
                    charged,
                    &user,
                    method,
                    plan.price,
                    &plan.currency,
                    TransactionPrefix::Subscription,
                    &description,
                )
                .await?,
            )
        } else {
            None
        };

        let subscription = uow
            .insert_subscription(&NewSubscription {
                user_id,
                plan_id,
                start_date: now,
                end_date,
                next_billing_date: end_date,
                billing_cycle: plan.billing_cycle().as_str().to_string(),
                payment_method: method.as_str().to_string(),
                auto_renew: true,
            })
            .await?;

        if let Some(transaction_id) = &transaction_id {
            payments::append(
                uow,
                &NewPayment {
                    user_id,
                    subscription_id: Some(subscription.subscription_id),
                    amount: plan.price,
                    currency: plan.currency.clone(),
                    method: method.as_str().to_string(),
                    status: PaymentStatus::Completed,
                    transaction_id: transaction_id.clone(),
                    description,
                    created_utc: now,
                },
            )
            .await?;
        }

        info!(
            subscription_id = %subscription.subscription_id,
            amount = %plan.price,
            end_date = %subscription.end_date,
            "Subscription created"
        );

        Ok(SubscriptionCreated {
            subscription_id: subscription.subscription_id,
            plan_id,
            start_date: subscription.start_date,
            end_date: subscription.end_date,
            next_billing_date: subscription.next_billing_date,
            amount_charged: if transaction_id.is_some() {
                plan.price
            } else {
                Decimal::ZERO
            },
            currency: plan.currency,
            transaction_id,
        })
    }

    // =========================================================================
    // Renew
    // =========================================================================

    /// Extend an active subscription by one plan period, anchored to the
    /// previous end date. Never retries.
    #[instrument(skip(self), fields(subscription_id = %subscription_id))]
    pub async fn renew(&self, subscription_id: Uuid) -> Result<SubscriptionRenewed, BillingError> {
        self.renew_checked(subscription_id, None)
            .await?
            .ok_or_else(|| BillingError::InvalidState("subscription was not renewed".to_string()))
    }

    /// Batch renewal. The subscription is re-read under lock and renewed only
    /// if it is still active, auto-renewing and ending no later than `due_by`;
    /// otherwise `None` is returned and nothing is charged.
    #[instrument(skip(self), fields(subscription_id = %subscription_id, due_by = %due_by))]
    pub async fn renew_if_due(
        &self,
        subscription_id: Uuid,
        due_by: DateTime<Utc>,
    ) -> Result<Option<SubscriptionRenewed>, BillingError> {
        self.renew_checked(subscription_id, Some(due_by)).await
    }

    async fn renew_checked(
        &self,
        subscription_id: Uuid,
        due_by: Option<DateTime<Utc>>,
    ) -> Result<Option<SubscriptionRenewed>, BillingError> {
        let result = async {
            let mut uow = self.store.begin().await?;
            let mut charged = None;
            let outcome = self
                .renew_in(uow.as_mut(), &mut charged, subscription_id, due_by)
                .await;
            self.finish(uow, charged, outcome).await
        }
        .await;

        self.observe("renew", &result);
        if let Ok(Some((renewed, user_id, currency))) = &result {
            metrics::record_charge_amount(currency, "renew", renewed.amount_charged);
            self.events
                .publish(SubscriptionEvent::Renewed {
                    subscription_id,
                    user_id: *user_id,
                    new_end_date: renewed.new_end_date,
                    amount: renewed.amount_charged,
                })
                .await;
        }
        result.map(|renewed| renewed.map(|(renewed, _, _)| renewed))
    }

    async fn renew_in(
        &self,
        uow: &mut dyn UnitOfWork,
        charged: &mut Option<GatewayCharged>,
        subscription_id: Uuid,
        due_by: Option<DateTime<Utc>>,
    ) -> Result<Option<(SubscriptionRenewed, Uuid, String)>, BillingError> {
        let subscription = uow
            .find_subscription(subscription_id)
            .await?
            .ok_or(BillingError::NotFound("subscription"))?;
        if let Some(due_by) = due_by {
            let due = subscription.is_active()
                && subscription.auto_renew
                && subscription.end_date <= due_by;
            if !due {
                info!(
                    status = %subscription.status,
                    end_date = %subscription.end_date,
                    "Subscription no longer due, renewal skipped"
                );
                return Ok(None);
            }
        }
        if !subscription.is_active() {
            return Err(BillingError::InvalidState(format!(
                "subscription is {} and cannot be renewed",
                subscription.status
            )));
        }
        let plan = uow
            .find_plan(subscription.plan_id)
            .await?
            .ok_or(BillingError::NotFound("plan"))?;
        if plan.duration_days <= 0 {
            return Err(BillingError::PlanUnavailable);
        }
        let user = uow
            .find_user(subscription.user_id)
            .await?
            .ok_or(BillingError::NotFound("user"))?;
        let method = parse_method(&subscription.payment_method)?;
        ensure_currency(&user, &plan, &method)?;

        let now = self.clock.now();
        let new_end_date = period_end(subscription.end_date, &plan)?;
        let new_next_billing_date = period_end(subscription.next_billing_date, &plan)?;
        let description = format!("Renewal of {}", plan.name);

        let transaction_id = if plan.price > Decimal::ZERO {
            Some(
                self.settle(
                    uow,
                    charged,
                    &user,
                    &method,
                    plan.price,
                    &plan.currency,
                    TransactionPrefix::Renewal,
                    &description,
                )
                .await?,
            )
        } else {
            None
        };

        let updated = uow
            .update_subscription_period(subscription_id, new_end_date, new_next_billing_date, now)
            .await?;

        if let Some(transaction_id) = &transaction_id {
            payments::append(
                uow,
                &NewPayment {
                    user_id: subscription.user_id,
                    subscription_id: Some(subscription_id),
                    amount: plan.price,
                    currency: plan.currency.clone(),
                    method: method.as_str().to_string(),
                    status: PaymentStatus::Completed,
                    transaction_id: transaction_id.clone(),
                    description,
                    created_utc: now,
                },
            )
            .await?;
        }

        info!(
            previous_end_date = %subscription.end_date,
            new_end_date = %updated.end_date,
            amount = %plan.price,
            "Subscription renewed"
        );

        let amount_charged = if transaction_id.is_some() {
            plan.price
        } else {
            Decimal::ZERO
        };
        Ok(Some((
            SubscriptionRenewed {
                subscription_id,
                previous_end_date: subscription.end_date,
                new_end_date: updated.end_date,
                new_next_billing_date: updated.next_billing_date,
                amount_charged,
                transaction_id,
            },
            subscription.user_id,
            plan.currency,
        )))
    }

    // =========================================================================
    // Cancel
    // =========================================================================

    /// Cancel a subscription. Cancelling an already-cancelled subscription
    /// succeeds without side effects.
    #[instrument(skip(self, reason), fields(subscription_id = %subscription_id))]
    pub async fn cancel(
        &self,
        subscription_id: Uuid,
        reason: Option<&str>,
        immediately: bool,
    ) -> Result<SubscriptionCancelled, BillingError> {
        let result = async {
            let mut uow = self.store.begin().await?;
            let outcome = self
                .cancel_in(uow.as_mut(), subscription_id, reason, immediately)
                .await;
            self.finish(uow, None, outcome).await
        }
        .await;

        self.observe("cancel", &result);
        if let Ok((cancelled, Some(user_id))) = &result {
            self.events
                .publish(SubscriptionEvent::Cancelled {
                    subscription_id: cancelled.subscription_id,
                    user_id: *user_id,
                    immediately,
                    reason: reason.map(str::to_string),
                })
                .await;
        }
        result.map(|(cancelled, _)| cancelled)
    }

    /// Returns the owning user only when something changed.
    async fn cancel_in(
        &self,
        uow: &mut dyn UnitOfWork,
        subscription_id: Uuid,
        reason: Option<&str>,
        immediately: bool,
    ) -> Result<(SubscriptionCancelled, Option<Uuid>), BillingError> {
        let subscription = uow
            .find_subscription(subscription_id)
            .await?
            .ok_or(BillingError::NotFound("subscription"))?;

        match subscription.status() {
            SubscriptionStatus::Cancelled => {
                info!("Subscription already cancelled");
                return Ok((
                    SubscriptionCancelled {
                        subscription_id,
                        cancelled_at: subscription.cancelled_at,
                        end_date: subscription.end_date,
                        already_cancelled: true,
                    },
                    None,
                ));
            }
            SubscriptionStatus::Expired => {
                return Err(BillingError::InvalidState(
                    "subscription has expired and cannot be cancelled".to_string(),
                ));
            }
            SubscriptionStatus::Active => {}
        }

        let now = self.clock.now();
        let end_date = if immediately {
            subscription.end_date.min(now)
        } else {
            subscription.end_date
        };
        let reason = reason.map(str::trim).filter(|r| !r.is_empty());

        let cancelled = uow
            .mark_subscription_cancelled(subscription_id, now, reason, end_date)
            .await?;

        info!(immediately, end_date = %cancelled.end_date, "Subscription cancelled");

        Ok((
            SubscriptionCancelled {
                subscription_id,
                cancelled_at: cancelled.cancelled_at,
                end_date: cancelled.end_date,
                already_cancelled: false,
            },
            Some(subscription.user_id),
        ))
    }

    // =========================================================================
    // Upgrade
    // =========================================================================

    /// Move an active subscription to another plan, charging the prorated
    /// difference. A credit larger than the new price is forfeited.
    #[instrument(skip(self), fields(subscription_id = %subscription_id, new_plan_id = %new_plan_id))]
    pub async fn upgrade(
        &self,
        subscription_id: Uuid,
        new_plan_id: Uuid,
    ) -> Result<SubscriptionUpgraded, BillingError> {
        let result = async {
            let mut uow = self.store.begin().await?;
            let mut charged = None;
            let outcome = self
                .upgrade_in(uow.as_mut(), &mut charged, subscription_id, new_plan_id)
                .await;
            self.finish(uow, charged, outcome).await
        }
        .await;

        self.observe("upgrade", &result);
        if let Ok((upgraded, user_id, currency)) = &result {
            metrics::record_charge_amount(currency, "upgrade", upgraded.amount_charged);
            self.events
                .publish(SubscriptionEvent::Upgraded {
                    subscription_id,
                    user_id: *user_id,
                    previous_plan_id: upgraded.previous_plan_id,
                    new_plan_id: upgraded.new_plan_id,
                    amount_charged: upgraded.amount_charged,
                })
                .await;
        }
        result.map(|(upgraded, _, _)| upgraded)
    }

    async fn upgrade_in(
        &self,
        uow: &mut dyn UnitOfWork,
        charged: &mut Option<GatewayCharged>,
        subscription_id: Uuid,
        new_plan_id: Uuid,
    ) -> Result<(SubscriptionUpgraded, Uuid, String), BillingError> {
        let subscription = uow
            .find_subscription(subscription_id)
            .await?
            .ok_or(BillingError::NotFound("subscription"))?;
        if !subscription.is_active() {
            return Err(BillingError::InvalidState(format!(
                "subscription is {} and cannot be upgraded",
                subscription.status
            )));
        }
        if subscription.plan_id == new_plan_id {
            return Err(BillingError::Validation(
                "subscription is already on this plan".to_string(),
            ));
        }

        let current = uow
            .find_plan(subscription.plan_id)
            .await?
            .ok_or(BillingError::NotFound("plan"))?;
        let target = uow
            .find_plan(new_plan_id)
            .await?
            .filter(Plan::is_available)
            .ok_or(BillingError::PlanUnavailable)?;
        if current.currency != target.currency {
            return Err(BillingError::Validation(format!(
                "cannot change plan currency from {} to {}",
                current.currency, target.currency
            )));
        }
        if uow
            .has_active_subscription(subscription.user_id, new_plan_id)
            .await?
        {
            return Err(BillingError::AlreadySubscribed);
        }

        let user = uow
            .find_user(subscription.user_id)
            .await?
            .ok_or(BillingError::NotFound("user"))?;
        let method = parse_method(&subscription.payment_method)?;

        let now = self.clock.now();
        let new_end_date = period_end(now, &target)?;
        let proration = Proration::compute(&current, &target, subscription.end_date, now);

        let transaction_id = if proration.amount_due > Decimal::ZERO {
            ensure_currency(&user, &target, &method)?;
            Some(
                self.settle(
                    uow,
                    charged,
                    &user,
                    &method,
                    proration.amount_due,
                    &target.currency,
                    TransactionPrefix::Upgrade,
                    &format!("Upgrade from {} to {}", current.name, target.name),
                )
                .await?,
            )
        } else {
            None
        };

        let updated = uow
            .update_subscription_plan(
                subscription_id,
                new_plan_id,
                target.billing_cycle().as_str(),
                new_end_date,
                new_end_date,
                now,
            )
            .await?;

        if let Some(transaction_id) = &transaction_id {
            payments::append(
                uow,
                &NewPayment {
                    user_id: subscription.user_id,
                    subscription_id: Some(subscription_id),
                    amount: proration.amount_due,
                    currency: target.currency.clone(),
                    method: method.as_str().to_string(),
                    status: PaymentStatus::Completed,
                    transaction_id: transaction_id.clone(),
                    description: format!("Upgrade from {} to {}", current.name, target.name),
                    created_utc: now,
                },
            )
            .await?;
        }

        info!(
            previous_plan_id = %current.plan_id,
            days_remaining = %proration.days_remaining,
            credit = %proration.credit,
            amount = %proration.amount_due,
            "Subscription upgraded"
        );

        Ok((
            SubscriptionUpgraded {
                subscription_id,
                previous_plan_id: current.plan_id,
                new_plan_id,
                days_remaining: proration.days_remaining,
                proration_credit: proration.credit,
                price_difference: proration.price_difference,
                amount_charged: proration.amount_due,
                new_end_date: updated.end_date,
                transaction_id,
            },
            subscription.user_id,
            target.currency,
        ))
    }

    // =========================================================================
    // Refund
    // =========================================================================

    /// Refund a completed payment, in full by default. The existing payment
    /// row is flipped to refunded; no new row is written.
    #[instrument(skip(self, reason), fields(payment_id = %payment_id))]
    pub async fn refund_payment(
        &self,
        payment_id: Uuid,
        amount: Option<Decimal>,
        reason: Option<&str>,
    ) -> Result<PaymentRefunded, BillingError> {
        let result = async {
            let mut uow = self.store.begin().await?;
            let outcome = self.refund_in(uow.as_mut(), payment_id, amount).await;
            let (refunded, gateway_transaction) = self.finish(uow, None, outcome).await?;
            if let Some(transaction_id) = gateway_transaction {
                self.refund_through_gateway(&refunded, &transaction_id, reason)
                    .await?;
            }
            Ok::<_, BillingError>(refunded)
        }
        .await;

        self.observe("refund", &result);
        if let Ok(refunded) = &result {
            self.events
                .publish(SubscriptionEvent::PaymentRefunded {
                    payment_id,
                    user_id: refunded.user_id,
                    amount: refunded.refund_amount,
                })
                .await;
        }
        result
    }

    /// Flip the payment to refunded and credit balance payments. For gateway
    /// payments the external transaction id is returned; the gateway is only
    /// called once this unit of work has committed.
    async fn refund_in(
        &self,
        uow: &mut dyn UnitOfWork,
        payment_id: Uuid,
        amount: Option<Decimal>,
    ) -> Result<(PaymentRefunded, Option<String>), BillingError> {
        let payment = uow
            .find_payment(payment_id)
            .await?
            .ok_or(BillingError::NotFound("payment"))?;

        let refund_amount = round_money(amount.unwrap_or(payment.amount));
        if refund_amount <= Decimal::ZERO {
            return Err(BillingError::Validation(
                "refund amount must be positive".to_string(),
            ));
        }
        if refund_amount > payment.amount {
            return Err(BillingError::Validation(format!(
                "refund amount {} exceeds payment amount {}",
                refund_amount, payment.amount
            )));
        }

        let now = self.clock.now();
        let refunded = payments::mark_refunded(uow, &payment, now).await?;

        let gateway_transaction = match parse_method(&payment.method)? {
            PaymentMethod::Balance => {
                ledger::credit(uow, payment.user_id, refund_amount).await?;
                None
            }
            PaymentMethod::External(_) => Some(payment.transaction_id.clone()),
        };

        info!(user_id = %payment.user_id, amount = %refund_amount, "Payment refunded");

        Ok((
            PaymentRefunded {
                payment_id,
                user_id: payment.user_id,
                refund_amount,
                status: refunded.status,
            },
            gateway_transaction,
        ))
    }

    /// Return the money through the gateway after the refunded status is
    /// committed. A declined refund puts the payment back to completed.
    async fn refund_through_gateway(
        &self,
        refunded: &PaymentRefunded,
        transaction_id: &str,
        reason: Option<&str>,
    ) -> Result<(), BillingError> {
        let err = match self
            .gateway
            .refund(transaction_id, refunded.refund_amount, reason.unwrap_or("refund"))
            .await
        {
            Ok(_) => return Ok(()),
            Err(e) => e,
        };

        let restored = async {
            let mut uow = self.store.begin().await?;
            let outcome = uow
                .update_payment_status(
                    refunded.payment_id,
                    PaymentStatus::Completed,
                    self.clock.now(),
                )
                .await;
            self.finish(uow, None, outcome).await
        }
        .await;

        match restored {
            Ok(_) => warn!(
                transaction_id,
                error = %err,
                "Gateway refund declined, payment restored to completed"
            ),
            Err(restore_err) => error!(
                transaction_id,
                error = %err,
                restore_error = %restore_err,
                "Gateway refund declined and payment could not be restored"
            ),
        }
        Err(err)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    #[instrument(skip(self))]
    pub async fn get_subscription(&self, subscription_id: Uuid) -> Result<Subscription, BillingError> {
        self.store
            .get_subscription(subscription_id)
            .await?
            .ok_or(BillingError::NotFound("subscription"))
    }

    /// Active auto-renewing subscriptions ending between now and `until`.
    pub async fn expiring_subscriptions(
        &self,
        until: DateTime<Utc>,
    ) -> Result<Vec<Subscription>, BillingError> {
        self.store.find_expiring(self.clock.now(), until).await
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    /// Take the money for a charge and return the transaction id to record.
    #[allow(clippy::too_many_arguments)]
    async fn settle(
        &self,
        uow: &mut dyn UnitOfWork,
        charged: &mut Option<GatewayCharged>,
        user: &UserAccount,
        method: &PaymentMethod,
        amount: Decimal,
        currency: &str,
        prefix: TransactionPrefix,
        description: &str,
    ) -> Result<String, BillingError> {
        match method {
            PaymentMethod::Balance => {
                ledger::debit(uow, user, amount).await?;
                Ok(payments::transaction_id(prefix))
            }
            PaymentMethod::External(name) => {
                let receipt = self
                    .gateway
                    .charge(&GatewayCharge {
                        user_id: user.user_id,
                        amount,
                        currency: currency.to_string(),
                        method: name.clone(),
                        description: description.to_string(),
                    })
                    .await?;
                *charged = Some(GatewayCharged {
                    transaction_id: receipt.transaction_id.clone(),
                    amount,
                });
                Ok(receipt.transaction_id)
            }
        }
    }

    /// Commit on success, roll back on failure. A gateway charge taken during
    /// a unit of work that does not commit is refunded.
    async fn finish<T>(
        &self,
        uow: Box<dyn UnitOfWork>,
        charged: Option<GatewayCharged>,
        outcome: Result<T, BillingError>,
    ) -> Result<T, BillingError> {
        let err = match outcome {
            Ok(value) => match uow.commit().await {
                Ok(()) => return Ok(value),
                Err(e) => e,
            },
            Err(e) => {
                if let Err(rollback_err) = uow.rollback().await {
                    error!(error = ?rollback_err, "Rollback failed");
                }
                e
            }
        };

        if let Some(charge) = charged {
            match self
                .gateway
                .refund(&charge.transaction_id, charge.amount, "transaction rolled back")
                .await
            {
                Ok(_) => warn!(
                    transaction_id = %charge.transaction_id,
                    amount = %charge.amount,
                    "Gateway charge compensated"
                ),
                Err(refund_err) => error!(
                    transaction_id = %charge.transaction_id,
                    amount = %charge.amount,
                    error = %refund_err,
                    "Gateway compensation failed"
                ),
            }
        }
        Err(err)
    }

    fn observe<T>(&self, operation: &str, result: &Result<T, BillingError>) {
        match result {
            Ok(_) => metrics::record_operation(operation, "success"),
            Err(err) => {
                let kind = err.kind();
                metrics::record_operation(operation, kind.as_str());
                metrics::record_error(kind.as_str(), operation);
                match kind {
                    ErrorKind::PersistenceError | ErrorKind::GatewayError => {
                        error!(operation, error = ?err, "Lifecycle operation failed")
                    }
                    _ => warn!(operation, error = %err, "Lifecycle operation rejected"),
                }
            }
        }
    }
}

/// `from` moved forward by one plan period.
fn period_end(from: DateTime<Utc>, plan: &Plan) -> Result<DateTime<Utc>, BillingError> {
    from.checked_add_signed(plan.duration()).ok_or_else(|| {
        BillingError::Validation(format!(
            "plan duration of {} days is out of range",
            plan.duration_days
        ))
    })
}

fn parse_method(method: &str) -> Result<PaymentMethod, BillingError> {
    PaymentMethod::parse(method)
        .ok_or_else(|| BillingError::Validation(format!("invalid payment method '{}'", method)))
}

/// The internal balance holds a single currency.
fn ensure_currency(
    user: &UserAccount,
    plan: &Plan,
    method: &PaymentMethod,
) -> Result<(), BillingError> {
    if *method == PaymentMethod::Balance && !user.currency.eq_ignore_ascii_case(&plan.currency) {
        return Err(BillingError::Validation(format!(
            "plan is priced in {} but balance is held in {}",
            plan.currency, user.currency
        )));
    }
    Ok(())
}
