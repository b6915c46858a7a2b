//! Renewal batch driver tests.

mod common;

use chrono::Duration;
use common::Harness;
use rust_decimal_macros::dec;
use subscription_service::services::{ErrorKind, SubscriptionEvent};

#[tokio::test]
async fn renews_eligible_and_reports_failures() {
    let h = Harness::new();
    let plan = h.plan("Basic", dec!(30), 30).await;
    let rich_a = h.user(dec!(100)).await;
    let rich_b = h.user(dec!(100)).await;
    let poor = h.user(dec!(10)).await;

    let soon = h.now() + Duration::hours(6);
    h.seed_subscription(&rich_a, &plan, soon).await;
    h.seed_subscription(&rich_b, &plan, soon + Duration::hours(1)).await;
    let failing = h
        .seed_subscription(&poor, &plan, soon + Duration::hours(2))
        .await;

    let summary = h
        .driver()
        .process_expiring_subscriptions(Duration::hours(24))
        .await
        .unwrap();

    assert_eq!(summary.total, 3);
    assert_eq!(summary.renewed, 2);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.failures.len(), 1);
    assert_eq!(summary.failures[0].subscription_id, failing);
    assert_eq!(summary.failures[0].error_kind, ErrorKind::InsufficientBalance);

    assert_eq!(h.payments().await.len(), 2);
    assert_eq!(h.balance(rich_a.user_id).await, dec!(70));
    assert_eq!(h.balance(poor.user_id).await, dec!(10));
    assert_eq!(h.subscription(failing).await.end_date, soon + Duration::hours(2));

    let names = h.events.names();
    assert_eq!(
        names.iter().filter(|n| **n == "subscription.renewed").count(),
        2
    );
    assert!(h.events.events().iter().any(|e| matches!(
        e,
        SubscriptionEvent::RenewalFailed { subscription_id, error_kind: ErrorKind::InsufficientBalance, .. }
            if *subscription_id == failing
    )));
}

#[tokio::test]
async fn only_active_auto_renewing_subscriptions_in_window_are_picked() {
    let h = Harness::new();
    let plan = h.plan("Basic", dec!(30), 30).await;
    let user = h.user(dec!(500)).await;
    let other_plan = h.plan("Other", dec!(5), 30).await;
    let third_plan = h.plan("Third", dec!(5), 30).await;

    let in_window = h
        .seed_subscription(&user, &plan, h.now() + Duration::hours(2))
        .await;
    h.seed_subscription(&user, &other_plan, h.now() + Duration::days(5))
        .await;
    let cancelled = h
        .seed_subscription(&user, &third_plan, h.now() + Duration::hours(3))
        .await;
    h.manager.cancel(cancelled, None, false).await.unwrap();

    let summary = h
        .driver()
        .process_expiring_subscriptions(Duration::hours(24))
        .await
        .unwrap();

    assert_eq!(summary.total, 1);
    assert_eq!(summary.renewed, 1);
    assert_eq!(
        h.subscription(in_window).await.end_date,
        h.now() + Duration::hours(2) + Duration::days(30)
    );
}

#[tokio::test]
async fn same_user_renewals_run_one_after_another() {
    let h = Harness::new();
    let user = h.user(dec!(40)).await;
    let plan_a = h.plan("A", dec!(30), 30).await;
    let plan_b = h.plan("B", dec!(30), 30).await;
    h.seed_subscription(&user, &plan_a, h.now() + Duration::hours(1))
        .await;
    h.seed_subscription(&user, &plan_b, h.now() + Duration::hours(2))
        .await;

    let summary = h
        .driver()
        .process_expiring_subscriptions(Duration::hours(24))
        .await
        .unwrap();

    assert_eq!(summary.renewed, 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(h.balance(user.user_id).await, dec!(10));
}

#[tokio::test]
async fn failed_renewal_is_picked_up_by_next_run() {
    let h = Harness::new();
    let plan = h.plan("Basic", dec!(30), 30).await;
    let user = h.user(dec!(10)).await;
    let subscription_id = h
        .seed_subscription(&user, &plan, h.now() + Duration::hours(5))
        .await;

    let first = h
        .driver()
        .process_expiring_subscriptions(Duration::hours(24))
        .await
        .unwrap();
    assert_eq!(first.failed, 1);

    // Top up between runs.
    {
        use subscription_service::services::SubscriptionStore;
        let mut uow = h.store.begin().await.unwrap();
        uow.credit_balance(user.user_id, dec!(40)).await.unwrap();
        uow.commit().await.unwrap();
    }

    h.advance(Duration::hours(1));
    let second = h
        .driver()
        .process_expiring_subscriptions(Duration::hours(24))
        .await
        .unwrap();

    assert_eq!(second.renewed, 1);
    assert_eq!(h.balance(user.user_id).await, dec!(20));
    assert!(h.subscription(subscription_id).await.end_date > h.now() + Duration::days(29));
}

#[tokio::test]
async fn empty_window_is_rejected() {
    let h = Harness::new();
    let err = h
        .driver()
        .process_expiring_subscriptions(Duration::zero())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ValidationError);
}

#[tokio::test]
async fn nothing_to_renew_returns_empty_summary() {
    let h = Harness::new();
    let summary = h
        .driver()
        .process_expiring_subscriptions(Duration::hours(24))
        .await
        .unwrap();
    assert_eq!(summary.total, 0);
    assert_eq!(summary.renewed, 0);
    assert_eq!(summary.failed, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn overlapping_batches_renew_each_subscription_once() {
    let h = Harness::new();
    let plan = h.plan("Basic", dec!(30), 30).await;
    let mut seeded = Vec::new();
    for i in 0..20 {
        let user = h.user(dec!(100)).await;
        let end_date = h.now() + Duration::minutes(30 * (i + 1));
        let subscription_id = h.seed_subscription(&user, &plan, end_date).await;
        seeded.push((subscription_id, user.user_id, end_date));
    }

    let first = h.driver();
    let second = h.driver();
    let a = tokio::spawn(async move {
        first
            .process_expiring_subscriptions(Duration::hours(24))
            .await
    });
    let b = tokio::spawn(async move {
        second
            .process_expiring_subscriptions(Duration::hours(24))
            .await
    });
    let a = a.await.unwrap().unwrap();
    let b = b.await.unwrap().unwrap();

    assert_eq!(a.failed + b.failed, 0);
    assert_eq!(a.renewed + b.renewed, 20);
    assert_eq!(a.renewed + a.skipped, a.total);
    assert_eq!(b.renewed + b.skipped, b.total);

    assert_eq!(h.payments().await.len(), 20);
    for (subscription_id, user_id, end_date) in seeded {
        assert_eq!(
            h.subscription(subscription_id).await.end_date,
            end_date + Duration::days(30)
        );
        assert_eq!(h.balance(user_id).await, dec!(70));
    }
}

#[tokio::test]
async fn renew_if_due_skips_subscription_already_pushed_past_the_window() {
    let h = Harness::new();
    let plan = h.plan("Basic", dec!(30), 30).await;
    let user = h.user(dec!(100)).await;
    let subscription_id = h
        .seed_subscription(&user, &plan, h.now() + Duration::hours(2))
        .await;
    let due_by = h.now() + Duration::hours(24);

    let renewed = h
        .manager
        .renew_if_due(subscription_id, due_by)
        .await
        .unwrap();
    assert!(renewed.is_some());

    let again = h
        .manager
        .renew_if_due(subscription_id, due_by)
        .await
        .unwrap();
    assert!(again.is_none());
    assert_eq!(h.payments().await.len(), 1);
    assert_eq!(h.balance(user.user_id).await, dec!(70));
}
