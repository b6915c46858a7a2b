//! Logical lifecycle events for the notification collaborator.
//!
//! Events are published only after the owning unit of work has committed.
//! Delivery (email, SMS, webhook) belongs to the subscriber of these events.

use crate::services::error::ErrorKind;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SubscriptionEvent {
    Created {
        subscription_id: Uuid,
        user_id: Uuid,
        plan_id: Uuid,
        end_date: DateTime<Utc>,
        amount: Decimal,
    },
    Renewed {
        subscription_id: Uuid,
        user_id: Uuid,
        new_end_date: DateTime<Utc>,
        amount: Decimal,
    },
    RenewalFailed {
        subscription_id: Uuid,
        user_id: Uuid,
        error_kind: ErrorKind,
        message: String,
    },
    Cancelled {
        subscription_id: Uuid,
        user_id: Uuid,
        immediately: bool,
        reason: Option<String>,
    },
    Upgraded {
        subscription_id: Uuid,
        user_id: Uuid,
        previous_plan_id: Uuid,
        new_plan_id: Uuid,
        amount_charged: Decimal,
    },
    PaymentRefunded {
        payment_id: Uuid,
        user_id: Uuid,
        amount: Decimal,
    },
}

impl SubscriptionEvent {
    pub fn name(&self) -> &'static str {
        match self {
            SubscriptionEvent::Created { .. } => "subscription.created",
            SubscriptionEvent::Renewed { .. } => "subscription.renewed",
            SubscriptionEvent::RenewalFailed { .. } => "subscription.renewal_failed",
            SubscriptionEvent::Cancelled { .. } => "subscription.cancelled",
            SubscriptionEvent::Upgraded { .. } => "subscription.upgraded",
            SubscriptionEvent::PaymentRefunded { .. } => "payment.refunded",
        }
    }
}

/// Sink for lifecycle events. Publishing never fails the operation that
/// produced the event.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: SubscriptionEvent);
}

/// Emits events as structured log lines.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventPublisher;

#[async_trait]
impl EventPublisher for TracingEventPublisher {
    async fn publish(&self, event: SubscriptionEvent) {
        let payload = serde_json::to_string(&event).unwrap_or_default();
        tracing::info!(event = event.name(), payload = %payload, "Lifecycle event");
    }
}

/// Keeps every published event in memory.
#[derive(Debug, Default)]
pub struct RecordingEventPublisher {
    events: Mutex<Vec<SubscriptionEvent>>,
}

impl RecordingEventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SubscriptionEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.events().iter().map(SubscriptionEvent::name).collect()
    }
}

#[async_trait]
impl EventPublisher for RecordingEventPublisher {
    async fn publish(&self, event: SubscriptionEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn recording_publisher_keeps_order() {
        let publisher = RecordingEventPublisher::new();
        let subscription_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();

        publisher
            .publish(SubscriptionEvent::Cancelled {
                subscription_id,
                user_id,
                immediately: true,
                reason: None,
            })
            .await;
        publisher
            .publish(SubscriptionEvent::RenewalFailed {
                subscription_id,
                user_id,
                error_kind: ErrorKind::InsufficientBalance,
                message: "insufficient balance".to_string(),
            })
            .await;

        assert_eq!(
            publisher.names(),
            vec!["subscription.cancelled", "subscription.renewal_failed"]
        );
    }

    #[test]
    fn payload_is_tagged_by_kind() {
        let event = SubscriptionEvent::PaymentRefunded {
            payment_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            amount: Decimal::new(1500, 2),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "payment_refunded");
        assert_eq!(json["amount"], "15.00");
    }
}
