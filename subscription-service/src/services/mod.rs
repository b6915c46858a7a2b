//! Services module for subscription-service.

pub mod clock;
pub mod database;
pub mod error;
pub mod events;
pub mod gateway;
pub mod ledger;
pub mod lifecycle;
pub mod metrics;
pub mod payments;
pub mod proration;
pub mod renewal;
pub mod store;

pub use clock::{Clock, FixedClock, SystemClock};
pub use database::Database;
pub use error::{BillingError, ErrorKind};
pub use events::{EventPublisher, RecordingEventPublisher, SubscriptionEvent, TracingEventPublisher};
pub use gateway::{DisabledGateway, GatewayCharge, GatewayReceipt, MockGateway, PaymentGateway};
pub use lifecycle::SubscriptionManager;
pub use metrics::{get_metrics, init_metrics};
pub use renewal::{spawn_renewal_scheduler, RenewalBatchDriver};
pub use store::{InMemoryStore, PgStore, SubscriptionStore, UnitOfWork};
