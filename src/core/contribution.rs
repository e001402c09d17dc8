use super::types::{ContributionInputs, Frequency};

/// Average days per month (365.25 / 12, rounded).
pub const DAYS_PER_MONTH: f64 = 30.44;
/// Average weeks per month (52.14 / 12, rounded).
pub const WEEKS_PER_MONTH: f64 = 4.345;

pub fn to_monthly(amount: f64, frequency: Frequency) -> f64 {
    match frequency {
        Frequency::Daily => amount * DAYS_PER_MONTH,
        Frequency::Weekly => amount * WEEKS_PER_MONTH,
        Frequency::Monthly => amount,
        Frequency::Quarterly => amount / 3.0,
    }
}

/// Monthly amount invested by rounding each purchase up to `round_up_to`.
///
/// The per-transaction round-up is taken from the average transaction
/// amount, so a non-positive `round_up_to` yields whatever the formula gives.
pub fn round_up_contribution(
    avg_tx_per_month: f64,
    avg_tx_amount: f64,
    round_up_to: f64,
    multiplier: f64,
) -> f64 {
    if avg_tx_per_month <= 0.0 || avg_tx_amount <= 0.0 {
        return 0.0;
    }

    let avg_round_up = round_up_to - (avg_tx_amount % round_up_to);
    avg_tx_per_month * avg_round_up * multiplier
}

pub fn total_monthly(inputs: &ContributionInputs) -> f64 {
    let periodic = to_monthly(inputs.amount, inputs.frequency);
    let round_ups = inputs
        .round_up
        .map(|r| {
            round_up_contribution(r.avg_tx_per_month, r.avg_tx_amount, r.round_up_to, r.multiplier)
        })
        .unwrap_or(0.0);
    periodic + round_ups
}

/// Month-by-month contribution amounts derived from [`ContributionInputs`].
#[derive(Debug, Clone, Copy)]
pub struct ContributionSchedule {
    base_monthly: f64,
    start_delay_months: u32,
    escalation: f64,
    contributing_months_per_year: u32,
}

impl ContributionSchedule {
    pub fn new(inputs: &ContributionInputs) -> Self {
        Self {
            base_monthly: total_monthly(inputs),
            start_delay_months: inputs.start_delay_months,
            escalation: inputs.annual_escalation_percent / 100.0,
            contributing_months_per_year: 12 - inputs.skip_months_per_year.min(12),
        }
    }

    pub fn base_monthly(&self) -> f64 {
        self.base_monthly
    }

    /// Contribution for `month`, counted from 1. Skipped months fall at the
    /// end of each projection year.
    pub fn amount_for_month(&self, month: u32) -> f64 {
        if month == 0 || month <= self.start_delay_months {
            return 0.0;
        }

        let month_of_year = (month - 1) % 12 + 1;
        if month_of_year > self.contributing_months_per_year {
            return 0.0;
        }

        let years_elapsed = ((month - 1) / 12) as i32;
        self.base_monthly * (1.0 + self.escalation).powi(years_elapsed)
    }

    /// Sum of contributions over months 1..=months.
    #[cfg(test)]
    pub fn cumulative(&self, months: u32) -> f64 {
        (1..=months).map(|m| self.amount_for_month(m)).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::RoundUp;
    use proptest::prelude::{prop_assert, proptest};

    const EPS: f64 = 1e-9;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS,
            "expected {expected}, got {actual}"
        );
    }

    #[test]
    fn frequencies_convert_with_average_month_constants() {
        assert_approx(to_monthly(10.0, Frequency::Daily), 304.4);
        assert_approx(to_monthly(100.0, Frequency::Weekly), 434.5);
        assert_approx(to_monthly(250.0, Frequency::Monthly), 250.0);
        assert_approx(to_monthly(900.0, Frequency::Quarterly), 300.0);
    }

    #[test]
    fn round_up_uses_remainder_against_target() {
        // 40 purchases averaging 3.30, rounded to 1: 0.70 each.
        assert_approx(round_up_contribution(40.0, 3.30, 1.0, 1.0), 28.0);
        // Doubling multiplier doubles the sweep.
        assert_approx(round_up_contribution(40.0, 3.30, 1.0, 2.0), 56.0);
        // Rounding to 10 on a 3.30 purchase leaves 6.70.
        assert_approx(round_up_contribution(10.0, 3.30, 10.0, 1.0), 67.0);
    }

    #[test]
    fn round_up_is_zero_without_transactions() {
        assert_eq!(round_up_contribution(0.0, 5.0, 1.0, 1.0), 0.0);
        assert_eq!(round_up_contribution(30.0, 0.0, 1.0, 1.0), 0.0);
        assert_eq!(round_up_contribution(-3.0, 5.0, 1.0, 1.0), 0.0);
    }

    #[test]
    fn total_monthly_adds_periodic_and_round_ups() {
        let inputs = ContributionInputs {
            amount: 50.0,
            frequency: Frequency::Weekly,
            round_up: Some(RoundUp {
                avg_tx_per_month: 40.0,
                avg_tx_amount: 3.30,
                round_up_to: 1.0,
                multiplier: 1.0,
            }),
            ..ContributionInputs::monthly(0.0)
        };
        assert_approx(total_monthly(&inputs), 50.0 * 4.345 + 28.0);
    }

    #[test]
    fn schedule_honours_start_delay() {
        let inputs = ContributionInputs {
            start_delay_months: 3,
            ..ContributionInputs::monthly(100.0)
        };
        let schedule = ContributionSchedule::new(&inputs);
        assert_eq!(schedule.amount_for_month(3), 0.0);
        assert_approx(schedule.amount_for_month(4), 100.0);
        assert_approx(schedule.cumulative(12), 900.0);
    }

    #[test]
    fn schedule_skips_trailing_months_each_year() {
        let inputs = ContributionInputs {
            skip_months_per_year: 2,
            ..ContributionInputs::monthly(100.0)
        };
        let schedule = ContributionSchedule::new(&inputs);
        assert_approx(schedule.amount_for_month(10), 100.0);
        assert_eq!(schedule.amount_for_month(11), 0.0);
        assert_eq!(schedule.amount_for_month(12), 0.0);
        assert_approx(schedule.amount_for_month(13), 100.0);
        assert_approx(schedule.cumulative(24), 2_000.0);
    }

    #[test]
    fn schedule_skip_larger_than_year_contributes_nothing() {
        let inputs = ContributionInputs {
            skip_months_per_year: 40,
            ..ContributionInputs::monthly(100.0)
        };
        let schedule = ContributionSchedule::new(&inputs);
        assert_eq!(schedule.cumulative(36), 0.0);
    }

    #[test]
    fn schedule_escalates_once_per_year() {
        let inputs = ContributionInputs {
            annual_escalation_percent: 10.0,
            ..ContributionInputs::monthly(100.0)
        };
        let schedule = ContributionSchedule::new(&inputs);
        assert_approx(schedule.amount_for_month(12), 100.0);
        assert_approx(schedule.amount_for_month(13), 110.0);
        assert_approx(schedule.amount_for_month(25), 121.0);
    }

    #[test]
    fn negative_amounts_flow_through_unchanged() {
        let schedule = ContributionSchedule::new(&ContributionInputs::monthly(-50.0));
        assert_approx(schedule.cumulative(12), -600.0);
    }

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(64))]

        #[test]
        fn prop_to_monthly_is_scale_linear(amount_cents in 0u32..10_000_000, freq in 0usize..4) {
            let frequency = [
                Frequency::Daily,
                Frequency::Weekly,
                Frequency::Monthly,
                Frequency::Quarterly,
            ][freq];
            let a = amount_cents as f64 / 100.0;
            let single = to_monthly(a, frequency);
            let doubled = to_monthly(2.0 * a, frequency);
            prop_assert!((doubled - 2.0 * single).abs() <= 1e-9 * single.abs().max(1.0));
        }
    }
}
