//! Subscription purchase tests.

mod common;

use chrono::Duration;
use common::{Harness, CURRENCY};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use subscription_service::models::{PaymentStatus, PlanStatus};
use subscription_service::services::{BillingError, ErrorKind, SubscriptionManager};
use uuid::Uuid;

#[tokio::test]
async fn subscribe_with_sufficient_balance() {
    let h = Harness::new();
    let user = h.user(dec!(100)).await;
    let plan = h.plan("Basic", dec!(30), 30).await;

    let created = h
        .manager
        .create(user.user_id, plan.plan_id, "balance")
        .await
        .unwrap();

    assert_eq!(h.balance(user.user_id).await, dec!(70));
    assert_eq!(created.start_date, h.now());
    assert_eq!(created.end_date, h.now() + Duration::days(30));
    assert_eq!(created.next_billing_date, created.end_date);
    assert_eq!(created.amount_charged, dec!(30));
    assert_eq!(created.currency, CURRENCY);

    let subscription = h.subscription(created.subscription_id).await;
    assert!(subscription.is_active());
    assert!(subscription.auto_renew);
    assert_eq!(subscription.billing_cycle, "monthly");

    let payments = h.payments().await;
    assert_eq!(payments.len(), 1);
    let payment = &payments[0];
    assert_eq!(payment.amount, dec!(30));
    assert_eq!(payment.status(), PaymentStatus::Completed);
    assert_eq!(payment.subscription_id, Some(created.subscription_id));
    assert!(payment.transaction_id.starts_with("SUB-"));
    assert_eq!(Some(payment.transaction_id.clone()), created.transaction_id);
    assert!(payment.description.contains("Basic"));

    assert_eq!(h.events.names(), vec!["subscription.created"]);
}

#[tokio::test]
async fn insufficient_balance_changes_nothing() {
    let h = Harness::new();
    let user = h.user(dec!(20)).await;
    let plan = h.plan("Basic", dec!(30), 30).await;

    let err = h
        .manager
        .create(user.user_id, plan.plan_id, "balance")
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::InsufficientBalance);
    assert_eq!(err.user_message(), "insufficient balance");
    assert_eq!(h.balance(user.user_id).await, dec!(20));
    assert!(h.store.subscriptions().await.is_empty());
    assert!(h.payments().await.is_empty());
    assert!(h.events.events().is_empty());
}

#[tokio::test]
async fn inactive_or_missing_plan_is_unavailable() {
    let h = Harness::new();
    let user = h.user(dec!(100)).await;
    let plan = h.plan("Retired", dec!(30), 30).await;
    h.store.set_plan_status(plan.plan_id, PlanStatus::Inactive).await;

    let err = h
        .manager
        .create(user.user_id, plan.plan_id, "balance")
        .await
        .unwrap_err();
    assert!(matches!(err, BillingError::PlanUnavailable));
    assert_eq!(err.user_message(), "plan not available");

    let err = h
        .manager
        .create(user.user_id, Uuid::new_v4(), "balance")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ValidationError);
    assert_eq!(h.balance(user.user_id).await, dec!(100));
}

#[tokio::test]
async fn second_active_subscription_to_same_plan_is_rejected() {
    let h = Harness::new();
    let user = h.user(dec!(100)).await;
    let plan = h.plan("Basic", dec!(30), 30).await;
    h.subscribe(&user, &plan).await;

    let err = h
        .manager
        .create(user.user_id, plan.plan_id, "balance")
        .await
        .unwrap_err();

    assert!(matches!(err, BillingError::AlreadySubscribed));
    assert_eq!(h.balance(user.user_id).await, dec!(70));
    assert_eq!(h.payments().await.len(), 1);
}

#[tokio::test]
async fn resubscribe_after_cancellation_is_allowed() {
    let h = Harness::new();
    let user = h.user(dec!(100)).await;
    let plan = h.plan("Basic", dec!(30), 30).await;
    let first = h.subscribe(&user, &plan).await;
    h.manager.cancel(first, None, true).await.unwrap();

    h.manager
        .create(user.user_id, plan.plan_id, "balance")
        .await
        .unwrap();

    assert_eq!(h.balance(user.user_id).await, dec!(40));
}

#[tokio::test]
async fn free_plan_writes_no_payment() {
    let h = Harness::new();
    let user = h.user(Decimal::ZERO).await;
    let plan = h.plan("Free", Decimal::ZERO, 7).await;

    let created = h
        .manager
        .create(user.user_id, plan.plan_id, "balance")
        .await
        .unwrap();

    assert_eq!(created.amount_charged, Decimal::ZERO);
    assert!(created.transaction_id.is_none());
    assert!(h.payments().await.is_empty());
    assert_eq!(h.subscription(created.subscription_id).await.billing_cycle, "weekly");
}

#[tokio::test]
async fn unknown_user_is_not_found() {
    let h = Harness::new();
    let plan = h.plan("Basic", dec!(30), 30).await;

    let err = h
        .manager
        .create(Uuid::new_v4(), plan.plan_id, "balance")
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn malformed_payment_method_is_rejected() {
    let h = Harness::new();
    let user = h.user(dec!(100)).await;
    let plan = h.plan("Basic", dec!(30), 30).await;

    let err = h
        .manager
        .create(user.user_id, plan.plan_id, "card; DROP TABLE")
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ValidationError);
    assert!(h.gateway.charges().is_empty());
}

#[tokio::test]
async fn plan_in_other_currency_cannot_be_paid_from_balance() {
    let h = Harness::new();
    let user = h.user(dec!(100)).await;
    let plan = h
        .store
        .insert_plan("Euro", dec!(30), "EUR", 30, PlanStatus::Active)
        .await;

    let err = h
        .manager
        .create(user.user_id, plan.plan_id, "balance")
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ValidationError);
    assert_eq!(h.balance(user.user_id).await, dec!(100));
}

#[tokio::test]
async fn external_method_charges_the_gateway() {
    let h = Harness::new();
    let user = h.user(Decimal::ZERO).await;
    let plan = h.plan("Pro", dec!(50), 30).await;

    let created = h
        .manager
        .create(user.user_id, plan.plan_id, "card")
        .await
        .unwrap();

    let charges = h.gateway.charges();
    assert_eq!(charges.len(), 1);
    assert_eq!(charges[0].amount, dec!(50));
    assert_eq!(charges[0].method, "card");

    let payments = h.payments().await;
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].method, "card");
    assert!(payments[0].transaction_id.starts_with("GW-"));
    assert_eq!(created.transaction_id, Some(payments[0].transaction_id.clone()));
    assert_eq!(h.balance(user.user_id).await, Decimal::ZERO);
}

#[tokio::test]
async fn declined_gateway_charge_changes_nothing() {
    let h = Harness::new();
    let user = h.user(Decimal::ZERO).await;
    let plan = h.plan("Pro", dec!(50), 30).await;
    h.gateway.set_declining(true);

    let err = h
        .manager
        .create(user.user_id, plan.plan_id, "card")
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::GatewayError);
    assert!(h.store.subscriptions().await.is_empty());
    assert!(h.payments().await.is_empty());
}

#[tokio::test]
async fn gateway_charge_is_refunded_when_the_write_fails() {
    let h = Harness::new();
    let user = h.user(Decimal::ZERO).await;
    let plan = h.plan("Pro", dec!(50), 30).await;
    h.store.fail_next_payment_insert();

    let err = h
        .manager
        .create(user.user_id, plan.plan_id, "card")
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::PersistenceError);
    assert_eq!(h.gateway.charges().len(), 1);
    let refunds = h.gateway.refunds();
    assert_eq!(refunds.len(), 1);
    assert_eq!(refunds[0].1, dec!(50));
    assert!(h.store.subscriptions().await.is_empty());
}

#[tokio::test]
async fn without_a_gateway_external_methods_are_rejected() {
    let h = Harness::new();
    let user = h.user(dec!(100)).await;
    let plan = h.plan("Pro", dec!(50), 30).await;
    let manager = SubscriptionManager::new(Arc::new(h.store.clone())).with_clock(h.clock.clone());

    let err = manager
        .create(user.user_id, plan.plan_id, "paypal")
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ValidationError);
    assert!(h.store.subscriptions().await.is_empty());
}

#[tokio::test]
async fn failed_commit_leaves_balance_untouched_and_hides_details() {
    let h = Harness::new();
    let user = h.user(dec!(100)).await;
    let plan = h.plan("Basic", dec!(30), 30).await;
    h.store.fail_next_commit();

    let err = h
        .manager
        .create(user.user_id, plan.plan_id, "balance")
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::PersistenceError);
    assert!(!err.user_message().contains("injected"));
    assert_eq!(h.balance(user.user_id).await, dec!(100));
    assert!(h.store.subscriptions().await.is_empty());
    assert!(h.payments().await.is_empty());
    assert!(h.events.events().is_empty());
}

#[tokio::test]
async fn plan_period_past_the_calendar_is_rejected() {
    let h = Harness::new();
    let user = h.user(dec!(100)).await;
    let plan = h.plan("Forever", dec!(30), 100_000_000).await;

    let err = h
        .manager
        .create(user.user_id, plan.plan_id, "balance")
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ValidationError);
    assert_eq!(h.balance(user.user_id).await, dec!(100));
    assert!(h.payments().await.is_empty());
}
