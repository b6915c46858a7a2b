//! Renewal batch driver and the optional in-process scheduler.

use crate::dtos::{RenewalFailure, RenewalSummary};
use crate::services::error::BillingError;
use crate::services::events::SubscriptionEvent;
use crate::services::lifecycle::SubscriptionManager;
use crate::services::metrics;
use chrono::Duration;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, instrument, warn};

#[derive(Clone)]
pub struct RenewalBatchDriver {
    manager: Arc<SubscriptionManager>,
}

impl RenewalBatchDriver {
    pub fn new(manager: Arc<SubscriptionManager>) -> Self {
        Self { manager }
    }

    /// Renew every active, auto-renewing subscription that ends within
    /// `window` from now.
    ///
    /// Candidates are renewed one at a time, in end-date order. A failed
    /// renewal is reported and left for the next run. A candidate that an
    /// overlapping run renewed first is counted as skipped.
    #[instrument(skip(self), fields(window_hours = window.num_hours()))]
    pub async fn process_expiring_subscriptions(
        &self,
        window: Duration,
    ) -> Result<RenewalSummary, BillingError> {
        if window <= Duration::zero() {
            return Err(BillingError::Validation(
                "renewal window must be positive".to_string(),
            ));
        }

        let started = Instant::now();
        let until = self
            .manager
            .now()
            .checked_add_signed(window)
            .ok_or_else(|| BillingError::Validation("renewal window is out of range".to_string()))?;
        let candidates = self.manager.expiring_subscriptions(until).await?;
        let mut summary = RenewalSummary {
            total: candidates.len(),
            ..Default::default()
        };

        for subscription in candidates {
            match self
                .manager
                .renew_if_due(subscription.subscription_id, until)
                .await
            {
                Ok(Some(_)) => {
                    summary.renewed += 1;
                    metrics::record_renewal("renewed");
                }
                Ok(None) => {
                    summary.skipped += 1;
                    metrics::record_renewal("skipped");
                }
                Err(err) => {
                    summary.failed += 1;
                    metrics::record_renewal("failed");
                    warn!(
                        subscription_id = %subscription.subscription_id,
                        error_kind = err.kind().as_str(),
                        "Renewal failed"
                    );
                    self.manager
                        .events()
                        .publish(SubscriptionEvent::RenewalFailed {
                            subscription_id: subscription.subscription_id,
                            user_id: subscription.user_id,
                            error_kind: err.kind(),
                            message: err.user_message(),
                        })
                        .await;
                    summary.failures.push(RenewalFailure {
                        subscription_id: subscription.subscription_id,
                        error_kind: err.kind(),
                        message: err.user_message(),
                    });
                }
            }
        }

        metrics::record_renewal_batch_duration("batch", started.elapsed().as_secs_f64());
        info!(
            total = summary.total,
            renewed = summary.renewed,
            skipped = summary.skipped,
            failed = summary.failed,
            "Renewal batch completed"
        );

        Ok(summary)
    }
}

/// Run the batch driver every `interval` until the task is aborted. A tick
/// that arrives while a batch is still running is skipped.
pub fn spawn_renewal_scheduler(
    driver: RenewalBatchDriver,
    interval: std::time::Duration,
    window: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(interval_secs = interval.as_secs(), "Renewal scheduler started");
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            if let Err(e) = driver.process_expiring_subscriptions(window).await {
                error!(error = %e, "Scheduled renewal batch failed");
            }
        }
    })
}
