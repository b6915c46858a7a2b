//! Plan catalog model.
//!
//! Plans are owned by an external catalog; this service only reads them.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Plan availability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Active,
    Inactive,
}

impl PlanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanStatus::Active => "active",
            PlanStatus::Inactive => "inactive",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "active" => PlanStatus::Active,
            _ => PlanStatus::Inactive,
        }
    }
}

/// Billing cycle label derived from a plan's duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingCycle {
    Daily,
    Weekly,
    Monthly,
    Quarterly,
    Annually,
    Custom,
}

impl BillingCycle {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingCycle::Daily => "daily",
            BillingCycle::Weekly => "weekly",
            BillingCycle::Monthly => "monthly",
            BillingCycle::Quarterly => "quarterly",
            BillingCycle::Annually => "annually",
            BillingCycle::Custom => "custom",
        }
    }

    pub fn from_duration_days(days: i32) -> Self {
        match days {
            1 => BillingCycle::Daily,
            7 => BillingCycle::Weekly,
            28..=31 => BillingCycle::Monthly,
            89..=92 => BillingCycle::Quarterly,
            365 | 366 => BillingCycle::Annually,
            _ => BillingCycle::Custom,
        }
    }
}

/// Priced service tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Plan {
    pub plan_id: Uuid,
    pub name: String,
    pub price: Decimal,
    pub currency: String,
    pub duration_days: i32,
    pub status: String,
    pub created_utc: DateTime<Utc>,
}

impl Plan {
    pub fn status(&self) -> PlanStatus {
        PlanStatus::from_string(&self.status)
    }

    /// A plan can be purchased only when active and well-formed.
    pub fn is_available(&self) -> bool {
        self.status() == PlanStatus::Active
            && self.duration_days > 0
            && self.price >= Decimal::ZERO
    }

    pub fn duration(&self) -> Duration {
        Duration::days(i64::from(self.duration_days))
    }

    pub fn billing_cycle(&self) -> BillingCycle {
        BillingCycle::from_duration_days(self.duration_days)
    }
}
