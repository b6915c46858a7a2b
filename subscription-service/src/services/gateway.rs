//! External payment gateway capability.
//!
//! Used for every payment method other than the internal balance. The wire
//! protocol of a concrete gateway lives behind this trait.

use crate::services::error::BillingError;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub struct GatewayCharge {
    pub user_id: Uuid,
    pub amount: Decimal,
    pub currency: String,
    pub method: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayReceipt {
    pub transaction_id: String,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn name(&self) -> &str;

    async fn charge(&self, charge: &GatewayCharge) -> Result<GatewayReceipt, BillingError>;

    async fn refund(
        &self,
        transaction_id: &str,
        amount: Decimal,
        reason: &str,
    ) -> Result<GatewayReceipt, BillingError>;
}

/// Gateway used when none is configured: every external method is rejected
/// before anything is mutated.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledGateway;

#[async_trait]
impl PaymentGateway for DisabledGateway {
    fn name(&self) -> &str {
        "disabled"
    }

    async fn charge(&self, charge: &GatewayCharge) -> Result<GatewayReceipt, BillingError> {
        Err(BillingError::Validation(format!(
            "payment method '{}' is not supported",
            charge.method
        )))
    }

    async fn refund(
        &self,
        _transaction_id: &str,
        _amount: Decimal,
        _reason: &str,
    ) -> Result<GatewayReceipt, BillingError> {
        Err(BillingError::Validation(
            "gateway refunds are not supported".to_string(),
        ))
    }
}

/// In-process gateway that records calls and can be told to decline.
#[derive(Debug, Default)]
pub struct MockGateway {
    decline: AtomicBool,
    charges: Mutex<Vec<GatewayCharge>>,
    refunds: Mutex<Vec<(String, Decimal)>>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_declining(&self, decline: bool) {
        self.decline.store(decline, Ordering::SeqCst);
    }

    pub fn charges(&self) -> Vec<GatewayCharge> {
        self.charges.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn refunds(&self) -> Vec<(String, Decimal)> {
        self.refunds.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    fn name(&self) -> &str {
        "mock"
    }

    async fn charge(&self, charge: &GatewayCharge) -> Result<GatewayReceipt, BillingError> {
        if self.decline.load(Ordering::SeqCst) {
            return Err(BillingError::Gateway("card declined".to_string()));
        }
        if let Ok(mut charges) = self.charges.lock() {
            charges.push(charge.clone());
        }
        Ok(GatewayReceipt {
            transaction_id: format!("GW-{}", Uuid::new_v4()),
        })
    }

    async fn refund(
        &self,
        transaction_id: &str,
        amount: Decimal,
        _reason: &str,
    ) -> Result<GatewayReceipt, BillingError> {
        if self.decline.load(Ordering::SeqCst) {
            return Err(BillingError::Gateway("refund declined".to_string()));
        }
        if let Ok(mut refunds) = self.refunds.lock() {
            refunds.push((transaction_id.to_string(), amount));
        }
        Ok(GatewayReceipt {
            transaction_id: format!("GWR-{}", Uuid::new_v4()),
        })
    }
}
