//! Domain models for subscription-service.

mod payment;
mod plan;
mod subscription;
mod user;

pub use payment::{NewPayment, Payment, PaymentMethod, PaymentStatus, TransactionPrefix};
pub use plan::{BillingCycle, Plan, PlanStatus};
pub use subscription::{NewSubscription, Subscription, SubscriptionStatus};
pub use user::UserAccount;
