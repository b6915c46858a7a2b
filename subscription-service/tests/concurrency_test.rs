//! Concurrent lifecycle calls against one user's balance.

mod common;

use chrono::Duration;
use common::Harness;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use subscription_service::models::PaymentStatus;
use subscription_service::services::ErrorKind;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_purchases_never_overdraw() {
    let h = Harness::new();
    let user = h.user(dec!(100)).await;
    let mut plans = Vec::new();
    for i in 0..10 {
        plans.push(h.plan(&format!("Plan {i}"), dec!(30), 30).await);
    }

    let handles: Vec<_> = plans
        .iter()
        .map(|plan| {
            let manager = h.manager.clone();
            let user_id = user.user_id;
            let plan_id = plan.plan_id;
            tokio::spawn(async move { manager.create(user_id, plan_id, "balance").await })
        })
        .collect();

    let mut succeeded = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => succeeded += 1,
            Err(err) => assert!(matches!(
                err.kind(),
                ErrorKind::InsufficientBalance | ErrorKind::ConcurrencyConflict
            )),
        }
    }

    assert_eq!(succeeded, 3);
    let balance = h.balance(user.user_id).await;
    assert!(balance >= Decimal::ZERO);
    assert_eq!(balance, dec!(10));

    // Every debit has exactly one completed payment.
    let payments = h.payments().await;
    assert_eq!(payments.len(), succeeded);
    let paid: Decimal = payments
        .iter()
        .filter(|p| p.status() == PaymentStatus::Completed)
        .map(|p| p.amount)
        .sum();
    assert_eq!(paid, dec!(100) - balance);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn renewal_racing_an_upgrade_charges_at_most_what_exists() {
    let h = Harness::new();
    let user = h.user(dec!(65)).await;
    let basic = h.plan("Basic", dec!(30), 30).await;
    let pro = h.plan("Pro", dec!(50), 30).await;
    let subscription_id = h.subscribe(&user, &basic).await;
    h.advance(Duration::days(15));

    let renew = {
        let manager = h.manager.clone();
        tokio::spawn(async move { manager.renew(subscription_id).await })
    };
    let upgrade = {
        let manager = h.manager.clone();
        let plan_id = pro.plan_id;
        tokio::spawn(async move { manager.upgrade(subscription_id, plan_id).await })
    };

    let renewed = renew.await.unwrap();
    let upgraded = upgrade.await.unwrap();

    assert!(renewed.is_ok() || upgraded.is_ok());
    let balance = h.balance(user.user_id).await;
    assert!(balance >= Decimal::ZERO);

    let charged: Decimal = h.payments().await.iter().map(|p| p.amount).sum();
    assert_eq!(charged, dec!(65) - balance);
}
