//! Test helpers for subscription-service integration tests.
//!
//! Lifecycle tests run against the in-memory store with a fixed clock, so
//! they need no external services. PostgreSQL tests build their own schema
//! (see `postgres_store_test.rs`).

#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use service_core::config::Config as CoreConfig;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use subscription_service::config::{DatabaseConfig, RenewalConfig, SubscriptionConfig};
use subscription_service::models::{Payment, Plan, PlanStatus, Subscription, UserAccount};
use subscription_service::services::{
    init_metrics, FixedClock, InMemoryStore, MockGateway, RecordingEventPublisher,
    RenewalBatchDriver, SubscriptionManager,
};
use subscription_service::startup::{AppState, Application};
use uuid::Uuid;

pub const CURRENCY: &str = "USD";

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
}

pub struct Harness {
    pub store: InMemoryStore,
    pub clock: Arc<FixedClock>,
    pub events: Arc<RecordingEventPublisher>,
    pub gateway: Arc<MockGateway>,
    pub manager: Arc<SubscriptionManager>,
}

impl Harness {
    pub fn new() -> Self {
        init_metrics();

        let store = InMemoryStore::new();
        let clock = Arc::new(FixedClock::new(start_time()));
        let events = Arc::new(RecordingEventPublisher::new());
        let gateway = Arc::new(MockGateway::new());
        let manager = SubscriptionManager::new(Arc::new(store.clone()))
            .with_clock(clock.clone())
            .with_events(events.clone())
            .with_gateway(gateway.clone());

        Self {
            store,
            clock,
            events,
            gateway,
            manager: Arc::new(manager),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        use subscription_service::services::Clock;
        self.clock.now()
    }

    pub fn advance(&self, by: Duration) {
        self.clock.advance(by);
    }

    pub fn driver(&self) -> RenewalBatchDriver {
        RenewalBatchDriver::new(self.manager.clone())
    }

    pub async fn user(&self, balance: Decimal) -> UserAccount {
        self.store.insert_user(balance, CURRENCY).await
    }

    pub async fn plan(&self, name: &str, price: Decimal, duration_days: i32) -> Plan {
        self.store
            .insert_plan(name, price, CURRENCY, duration_days, PlanStatus::Active)
            .await
    }

    pub async fn balance(&self, user_id: Uuid) -> Decimal {
        self.store
            .user(user_id)
            .await
            .map(|u| u.balance)
            .expect("user exists")
    }

    pub async fn subscription(&self, subscription_id: Uuid) -> Subscription {
        self.store
            .subscription(subscription_id)
            .await
            .expect("subscription exists")
    }

    pub async fn payments(&self) -> Vec<Payment> {
        self.store.payments().await
    }

    /// Subscribe with the balance and return the subscription id.
    pub async fn subscribe(&self, user: &UserAccount, plan: &Plan) -> Uuid {
        self.manager
            .create(user.user_id, plan.plan_id, "balance")
            .await
            .expect("subscription created")
            .subscription_id
    }

    /// Seed an active subscription ending at `end_date` without charging.
    pub async fn seed_subscription(
        &self,
        user: &UserAccount,
        plan: &Plan,
        end_date: DateTime<Utc>,
    ) -> Uuid {
        let subscription_id = Uuid::new_v4();
        self.store
            .put_subscription(Subscription {
                subscription_id,
                user_id: user.user_id,
                plan_id: plan.plan_id,
                status: "active".to_string(),
                start_date: end_date.checked_sub_signed(plan.duration()).unwrap_or(end_date),
                end_date,
                next_billing_date: end_date,
                billing_cycle: plan.billing_cycle().as_str().to_string(),
                payment_method: "balance".to_string(),
                auto_renew: true,
                cancelled_at: None,
                cancellation_reason: None,
                created_utc: end_date - plan.duration(),
                updated_utc: end_date - plan.duration(),
            })
            .await;
        subscription_id
    }
}

pub fn test_config() -> SubscriptionConfig {
    SubscriptionConfig {
        common: CoreConfig {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 0,
        },
        service_name: "subscription-service-test".to_string(),
        service_version: "0.1.0".to_string(),
        log_level: "warn".to_string(),
        otlp_endpoint: None,
        database: DatabaseConfig {
            url: "postgres://unused".to_string(),
            max_connections: 1,
            min_connections: 1,
        },
        renewal: RenewalConfig::default(),
    }
}

/// HTTP test application over the in-memory harness.
pub struct TestApp {
    pub address: String,
    pub harness: Harness,
    pub client: reqwest::Client,
}

impl TestApp {
    pub async fn spawn() -> Self {
        let harness = Harness::new();
        let config = test_config();
        let state = AppState {
            manager: harness.manager.clone(),
            renewals: harness.driver(),
            renewal_window: config.renewal.window(),
            service_name: config.service_name.clone(),
        };

        let app = Application::build_with_state(config, state)
            .await
            .expect("Failed to build test application");
        let address = format!("http://127.0.0.1:{}", app.http_port());

        tokio::spawn(async move {
            app.run_until_stopped().await.ok();
        });

        let client = reqwest::Client::new();
        for _ in 0..50 {
            if client
                .get(format!("{}/health", address))
                .send()
                .await
                .is_ok()
            {
                break;
            }
            tokio::time::sleep(tokio::time::Duration::from_millis(20)).await;
        }

        TestApp {
            address,
            harness,
            client,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.address, path)
    }

    pub fn post_as(&self, path: &str, user_id: Uuid, role: &str) -> reqwest::RequestBuilder {
        self.client
            .post(self.url(path))
            .header("X-User-ID", user_id.to_string())
            .header("X-User-Role", role)
    }

    pub fn get_as(&self, path: &str, user_id: Uuid, role: &str) -> reqwest::RequestBuilder {
        self.client
            .get(self.url(path))
            .header("X-User-ID", user_id.to_string())
            .header("X-User-Role", role)
    }
}
