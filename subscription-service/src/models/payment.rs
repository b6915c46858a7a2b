//! Payment record model.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Payment status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Refunded => "refunded",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "completed" => PaymentStatus::Completed,
            "failed" => PaymentStatus::Failed,
            "refunded" => PaymentStatus::Refunded,
            _ => PaymentStatus::Pending,
        }
    }

    /// Payment rows are immutable apart from these status transitions.
    pub fn can_transition_to(&self, next: PaymentStatus) -> bool {
        matches!(
            (self, next),
            (PaymentStatus::Pending, PaymentStatus::Completed)
                | (PaymentStatus::Pending, PaymentStatus::Failed)
                | (PaymentStatus::Completed, PaymentStatus::Refunded)
        )
    }
}

/// How a charge is funded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentMethod {
    /// Internal balance ledger.
    Balance,
    /// Anything else is settled through the external payment gateway.
    External(String),
}

impl PaymentMethod {
    pub const BALANCE: &'static str = "balance";

    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        if s.is_empty()
            || !s
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return None;
        }
        if s.eq_ignore_ascii_case(Self::BALANCE) {
            Some(PaymentMethod::Balance)
        } else {
            Some(PaymentMethod::External(s.to_ascii_lowercase()))
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            PaymentMethod::Balance => Self::BALANCE,
            PaymentMethod::External(name) => name,
        }
    }
}

/// Transaction id prefix by payment purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionPrefix {
    Subscription,
    Renewal,
    Upgrade,
}

impl TransactionPrefix {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionPrefix::Subscription => "SUB",
            TransactionPrefix::Renewal => "RENEW",
            TransactionPrefix::Upgrade => "UPG",
        }
    }
}

/// Payment row. Appended once; afterwards only `status` may change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Payment {
    pub payment_id: Uuid,
    pub user_id: Uuid,
    pub subscription_id: Option<Uuid>,
    pub amount: Decimal,
    pub currency: String,
    pub method: String,
    pub status: String,
    pub transaction_id: String,
    pub description: String,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl Payment {
    pub fn status(&self) -> PaymentStatus {
        PaymentStatus::from_string(&self.status)
    }
}

/// Input for appending a payment row.
#[derive(Debug, Clone)]
pub struct NewPayment {
    pub user_id: Uuid,
    pub subscription_id: Option<Uuid>,
    pub amount: Decimal,
    pub currency: String,
    pub method: String,
    pub status: PaymentStatus,
    pub transaction_id: String,
    pub description: String,
    pub created_utc: DateTime<Utc>,
}
