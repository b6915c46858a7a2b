//! Mid-cycle plan change pricing.

use crate::models::Plan;
use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};

const SECONDS_PER_DAY: i64 = 86_400;

/// Money values are settled to cents.
pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Proration {
    /// Fractional days left on the current period, never negative.
    pub days_remaining: Decimal,
    pub credit: Decimal,
    pub price_difference: Decimal,
    /// Amount to charge now. Zero when the credit covers the new price; the
    /// excess credit is forfeited.
    pub amount_due: Decimal,
}

impl Proration {
    pub fn compute(
        current: &Plan,
        target: &Plan,
        end_date: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        let seconds = (end_date - now).num_seconds().max(0);
        let days_remaining = Decimal::from(seconds) / Decimal::from(SECONDS_PER_DAY);

        let credit = if current.duration_days > 0 {
            current.price / Decimal::from(current.duration_days) * days_remaining
        } else {
            Decimal::ZERO
        };

        let price_difference = target.price - credit;
        let amount_due = if price_difference > Decimal::ZERO {
            round_money(price_difference)
        } else {
            Decimal::ZERO
        };

        Self {
            days_remaining: days_remaining.round_dp(4),
            credit: round_money(credit),
            price_difference: round_money(price_difference),
            amount_due,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PlanStatus;
    use chrono::Duration;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn plan(price: Decimal, days: i32) -> Plan {
        Plan {
            plan_id: Uuid::new_v4(),
            name: "plan".to_string(),
            price,
            currency: "USD".to_string(),
            duration_days: days,
            status: PlanStatus::Active.as_str().to_string(),
            created_utc: Utc::now(),
        }
    }

    #[test]
    fn half_period_left() {
        let now = Utc::now();
        let p = Proration::compute(
            &plan(dec!(30), 30),
            &plan(dec!(50), 30),
            now + Duration::days(15),
            now,
        );
        assert_eq!(p.days_remaining, dec!(15));
        assert_eq!(p.credit, dec!(15.00));
        assert_eq!(p.price_difference, dec!(35.00));
        assert_eq!(p.amount_due, dec!(35.00));
    }

    #[test]
    fn full_period_left_charges_the_price_gap() {
        let now = Utc::now();
        let p = Proration::compute(
            &plan(dec!(30), 30),
            &plan(dec!(50), 30),
            now + Duration::days(30),
            now,
        );
        assert_eq!(p.amount_due, dec!(20.00));
    }

    #[test]
    fn days_are_fractional() {
        let now = Utc::now();
        let p = Proration::compute(
            &plan(dec!(30), 30),
            &plan(dec!(50), 30),
            now + Duration::hours(12),
            now,
        );
        assert_eq!(p.days_remaining, dec!(0.5));
        assert_eq!(p.credit, dec!(0.50));
        assert_eq!(p.amount_due, dec!(49.50));
    }

    #[test]
    fn lapsed_period_gives_no_credit() {
        let now = Utc::now();
        let p = Proration::compute(
            &plan(dec!(30), 30),
            &plan(dec!(50), 30),
            now - Duration::days(2),
            now,
        );
        assert_eq!(p.days_remaining, Decimal::ZERO);
        assert_eq!(p.amount_due, dec!(50.00));
    }

    #[test]
    fn excess_credit_is_not_charged() {
        let now = Utc::now();
        let p = Proration::compute(
            &plan(dec!(300), 30),
            &plan(dec!(50), 30),
            now + Duration::days(20),
            now,
        );
        assert_eq!(p.credit, dec!(200.00));
        assert_eq!(p.price_difference, dec!(-150.00));
        assert_eq!(p.amount_due, Decimal::ZERO);
    }
}
