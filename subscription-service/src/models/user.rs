//! User balance model.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A user's internal monetary balance. Never negative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct UserAccount {
    pub user_id: Uuid,
    pub balance: Decimal,
    pub currency: String,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl UserAccount {
    pub fn covers(&self, amount: Decimal) -> bool {
        self.balance >= amount
    }
}
