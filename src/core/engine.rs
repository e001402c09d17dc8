use std::sync::atomic::{AtomicBool, Ordering};

use rayon::iter::{IntoParallelIterator, ParallelIterator};
use tracing::{debug, warn};

use super::adjust::apply_glide_path;
use super::contribution::ContributionSchedule;
use super::error::{EngineError, Result};
use super::random::{Rng, derive_seed};
use super::returns::{ScenarioTables, effective_rates};
use super::solver::required_monthly_contribution;
use super::types::{
    FinalStats, GoalOutcome, MAX_DURATION_YEARS, MonteCarloConfig, MonteCarloResult,
    PercentileBand, ProjectionInputs, SimulationResult, YearlySnapshot,
};

const TRIAL_BATCH: u32 = 64;

/// `base^periods`, falling back to `powf` once the count no longer fits `i32`.
fn compound(base: f64, periods: u32) -> f64 {
    match i32::try_from(periods) {
        Ok(n) => base.powi(n),
        Err(_) => base.powf(f64::from(periods)),
    }
}

pub fn future_value_lump_sum(present_value: f64, annual_rate: f64, years: u32) -> f64 {
    present_value * compound(1.0 + annual_rate, years)
}

/// Ordinary annuity; degrades to a plain sum at a zero rate.
pub fn future_value_annuity(monthly_payment: f64, monthly_rate: f64, months: u32) -> f64 {
    if monthly_rate == 0.0 {
        return monthly_payment * months as f64;
    }

    monthly_payment * (compound(1.0 + monthly_rate, months) - 1.0) / monthly_rate
}

#[derive(Debug, Clone, Copy)]
struct YearRates {
    net_return: f64,
    volatility: f64,
}

/// Rates for every growth step; index 0 is the undrifted starting year and
/// index `y` drives the step that ends at year `y`.
fn yearly_rates(inputs: &ProjectionInputs, tables: &ScenarioTables) -> Vec<YearRates> {
    (0..=inputs.duration_years)
        .map(|year| {
            let allocation = apply_glide_path(&inputs.allocation, &inputs.glide_path, year);
            let (net_return, volatility) =
                effective_rates(&allocation, &inputs.assumptions, tables);
            YearRates {
                net_return,
                volatility,
            }
        })
        .collect()
}

fn cumulative_contributions(inputs: &ProjectionInputs, schedule: &ContributionSchedule) -> Vec<f64> {
    let mut totals = Vec::with_capacity(inputs.duration_years as usize + 1);
    let mut running = inputs.lump_sum;
    totals.push(running);
    for year in 1..=inputs.duration_years {
        let first_month = (year - 1) * 12 + 1;
        running += (first_month..first_month + 12)
            .map(|m| schedule.amount_for_month(m))
            .sum::<f64>();
        totals.push(running);
    }
    totals
}

fn build_snapshots(contributions: &[f64], values: &[f64]) -> Vec<YearlySnapshot> {
    contributions
        .iter()
        .zip(values)
        .enumerate()
        .map(|(year, (&contributions, &portfolio_value))| YearlySnapshot {
            year: year as u32,
            contributions,
            portfolio_value,
            returns: portfolio_value - contributions,
        })
        .collect()
}

fn inflation_factor(inputs: &ProjectionInputs) -> f64 {
    compound(1.0 + inputs.assumptions.inflation, inputs.duration_years)
}

fn goal_outcome(
    inputs: &ProjectionInputs,
    final_nominal: f64,
    starting_return: f64,
    success_probability: Option<f64>,
) -> GoalOutcome {
    GoalOutcome {
        final_value_real: final_nominal / inflation_factor(inputs),
        success_probability,
        required_monthly: inputs.target_amount.map(|target| {
            required_monthly_contribution(
                target,
                inputs.lump_sum,
                inputs.duration_years,
                starting_return,
            )
        }),
    }
}

/// Closed-form compounding of the lump sum and the contribution stream,
/// stepped year by year so glide paths and shocks can change the path.
///
/// The lump sum compounds annually at `(1 + r)`; contributions accrue as an
/// ordinary annuity at `r / 12` per month. With no glide path, shock or
/// schedule variation this reproduces [`future_value_lump_sum`] plus
/// [`future_value_annuity`] exactly.
///
/// `duration_years` is expected to be at most [`MAX_DURATION_YEARS`]; the
/// Monte Carlo projector rejects longer runs.
pub fn project_deterministic(inputs: &ProjectionInputs, tables: &ScenarioTables) -> SimulationResult {
    let schedule = ContributionSchedule::new(&inputs.contribution);
    let rates = yearly_rates(inputs, tables);
    let contributions = cumulative_contributions(inputs, &schedule);

    let mut lump_value = inputs.lump_sum;
    let mut annuity_value = 0.0;
    let mut values = Vec::with_capacity(rates.len());
    values.push(lump_value);

    for year in 1..=inputs.duration_years {
        let shock = inputs.shock.factor_for_year(year);
        lump_value *= shock;
        annuity_value *= shock;

        let rate = rates[year as usize].net_return;
        lump_value *= 1.0 + rate;

        let monthly_rate = rate / 12.0;
        let first_month = (year - 1) * 12 + 1;
        for month in first_month..first_month + 12 {
            annuity_value = annuity_value * (1.0 + monthly_rate) + schedule.amount_for_month(month);
        }
        values.push(lump_value + annuity_value);
    }

    let final_value = lump_value + annuity_value;
    let total_contributions = contributions.last().copied().unwrap_or(inputs.lump_sum);
    let success_probability = inputs.target_amount.map(|target| {
        if final_value / inflation_factor(inputs) >= target {
            1.0
        } else {
            0.0
        }
    });

    SimulationResult {
        yearly_snapshots: build_snapshots(&contributions, &values),
        final_value,
        total_contributions,
        total_returns: final_value - total_contributions,
        monthly_contribution: schedule.base_monthly(),
        goal: goal_outcome(inputs, final_value, rates[0].net_return, success_probability),
    }
}

/// One simulated trial: balance at each year boundary, year 0 included.
fn simulate_trial(
    inputs: &ProjectionInputs,
    schedule: &ContributionSchedule,
    rates: &[YearRates],
    rng: &mut Rng,
) -> Vec<f64> {
    let mut path = Vec::with_capacity(rates.len());
    let mut balance = inputs.lump_sum;
    path.push(balance);

    for year in 1..=inputs.duration_years {
        balance *= inputs.shock.factor_for_year(year);

        let rate = rates[year as usize];
        let monthly_return = rate.net_return / 12.0;
        let monthly_vol = rate.volatility / 12.0_f64.sqrt();
        let drift = monthly_return - 0.5 * monthly_vol * monthly_vol;

        let first_month = (year - 1) * 12 + 1;
        for month in first_month..first_month + 12 {
            balance += schedule.amount_for_month(month);
            let z = rng.standard_normal();
            balance *= (drift + monthly_vol * z).exp();
        }
        path.push(balance);
    }

    path
}

pub fn project_monte_carlo(
    inputs: &ProjectionInputs,
    config: &MonteCarloConfig,
    tables: &ScenarioTables,
) -> Result<MonteCarloResult> {
    project_monte_carlo_with_cancel(inputs, config, tables, None)
}

/// Runs `num_simulations` independent log-normal paths and aggregates
/// per-year percentile bands. Trials are seeded individually, so the result
/// does not depend on how batches are scheduled across threads. `cancel` is
/// polled before each batch starts.
pub fn project_monte_carlo_with_cancel(
    inputs: &ProjectionInputs,
    config: &MonteCarloConfig,
    tables: &ScenarioTables,
    cancel: Option<&AtomicBool>,
) -> Result<MonteCarloResult> {
    let requested = config.num_simulations;
    if requested == 0 {
        return Err(EngineError::InvalidSimulationCount(requested));
    }
    if inputs.duration_years > MAX_DURATION_YEARS {
        return Err(EngineError::DurationTooLong {
            years: inputs.duration_years,
            max: MAX_DURATION_YEARS,
        });
    }

    let schedule = ContributionSchedule::new(&inputs.contribution);
    let rates = yearly_rates(inputs, tables);
    let contributions = cumulative_contributions(inputs, &schedule);

    let batches: Vec<Option<Vec<Vec<f64>>>> = (0..requested.div_ceil(TRIAL_BATCH))
        .into_par_iter()
        .map(|batch| {
            if cancel.is_some_and(|flag| flag.load(Ordering::Relaxed)) {
                return None;
            }
            let start = batch * TRIAL_BATCH;
            let end = (start + TRIAL_BATCH).min(requested);
            Some(
                (start..end)
                    .map(|trial| {
                        let mut rng = Rng::new(derive_seed(config.seed, trial));
                        simulate_trial(inputs, &schedule, &rates, &mut rng)
                    })
                    .collect(),
            )
        })
        .collect();

    let mut paths = Vec::with_capacity(requested as usize);
    let mut cancelled = false;
    for batch in batches {
        match batch {
            Some(batch_paths) => paths.extend(batch_paths),
            None => cancelled = true,
        }
    }
    if cancelled {
        let completed = paths.len() as u32;
        warn!(completed, requested, "monte carlo run cancelled");
        return Err(EngineError::Cancelled {
            completed,
            requested,
        });
    }

    let year_count = rates.len();
    let mut percentiles = Vec::with_capacity(year_count);
    let mut column = Vec::with_capacity(paths.len());
    for year in 0..year_count {
        column.clear();
        column.extend(paths.iter().map(|path| path[year]));
        percentiles.push(PercentileBand {
            year: year as u32,
            p10: percentile(&mut column, 10.0),
            p50: percentile(&mut column, 50.0),
            p90: percentile(&mut column, 90.0),
        });
    }

    let mut finals: Vec<f64> = paths.iter().map(|path| path[year_count - 1]).collect();
    drop(paths);
    let final_stats = summarize(&mut finals);

    let inflation = inflation_factor(inputs);
    let success_probability = inputs.target_amount.map(|target| {
        let successes = finals.iter().filter(|&&v| v / inflation >= target).count();
        successes as f64 / finals.len() as f64
    });

    let medians: Vec<f64> = percentiles.iter().map(|band| band.p50).collect();
    let total_contributions = contributions.last().copied().unwrap_or(inputs.lump_sum);
    let final_value = final_stats.median;

    debug!(
        trials = requested,
        years = inputs.duration_years,
        median = final_value,
        p10 = final_stats.p10,
        p90 = final_stats.p90,
        "monte carlo projection complete"
    );

    Ok(MonteCarloResult {
        summary: SimulationResult {
            yearly_snapshots: build_snapshots(&contributions, &medians),
            final_value,
            total_contributions,
            total_returns: final_value - total_contributions,
            monthly_contribution: schedule.base_monthly(),
            goal: goal_outcome(inputs, final_value, rates[0].net_return, success_probability),
        },
        percentiles,
        final_stats,
    })
}

fn summarize(values: &mut [f64]) -> FinalStats {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;

    FinalStats {
        mean,
        median: percentile(values, 50.0),
        stddev: variance.sqrt(),
        p10: percentile(values, 10.0),
        p90: percentile(values, 90.0),
    }
}

fn percentile(values: &mut [f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }

    values.sort_by(|a, b| a.total_cmp(b));

    let n = values.len();
    if n == 1 {
        return values[0];
    }

    let rank = (p / 100.0) * (n as f64 - 1.0);
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;

    if lower == upper {
        values[lower]
    } else {
        let w = rank - lower as f64;
        values[lower] * (1.0 - w) + values[upper] * w
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::returns::{AssetReturn, ReturnTable, Scenario};
    use crate::core::types::{
        AssetAllocation, ContributionInputs, Frequency, GlidePath, MarketAssumptions, MarketShock,
    };
    use proptest::prelude::{any, prop_assert, proptest};

    const EPS: f64 = 1e-6;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS,
            "expected {expected}, got {actual}"
        );
    }

    fn assert_approx_tol(actual: f64, expected: f64, tol: f64) {
        assert!(
            (actual - expected).abs() <= tol,
            "expected {expected}, got {actual}, tolerance {tol}"
        );
    }

    /// One-asset table so the portfolio return equals `mean` exactly.
    fn single_asset(mean: f64, volatility: f64) -> Scenario {
        let base = ScenarioTables::default().medium;
        Scenario::Custom(ReturnTable {
            domestic_equity: AssetReturn::new(mean, volatility),
            ..base
        })
    }

    fn sample_inputs() -> ProjectionInputs {
        ProjectionInputs {
            lump_sum: 10_000.0,
            contribution: ContributionInputs::monthly(500.0),
            duration_years: 10,
            allocation: AssetAllocation::new(35.0, 15.0, 30.0, 8.0, 7.0, 5.0),
            assumptions: MarketAssumptions::default(),
            glide_path: GlidePath::default(),
            shock: MarketShock::default(),
            target_amount: None,
        }
    }

    fn oracle_inputs(mean: f64, volatility: f64) -> ProjectionInputs {
        ProjectionInputs {
            allocation: AssetAllocation::new(100.0, 0.0, 0.0, 0.0, 0.0, 0.0),
            assumptions: MarketAssumptions {
                scenario: single_asset(mean, volatility),
                ..MarketAssumptions::default()
            },
            ..sample_inputs()
        }
    }

    fn mc(num_simulations: u32, seed: u64) -> MonteCarloConfig {
        MonteCarloConfig {
            num_simulations,
            seed,
        }
    }

    #[test]
    fn lump_sum_compounds_annually() {
        let mut inputs = oracle_inputs(0.08, 0.0);
        inputs.contribution = ContributionInputs::monthly(0.0);

        let result = project_deterministic(&inputs, &ScenarioTables::default());
        assert_approx_tol(result.final_value, 21_589.25, 0.01);
        assert_approx(result.final_value, 10_000.0 * 1.08_f64.powi(10));
        assert_approx(result.total_contributions, 10_000.0);
    }

    #[test]
    fn annuity_at_zero_rate_is_plain_sum() {
        assert_eq!(future_value_annuity(5_000.0, 0.0, 120), 600_000.0);

        let mut inputs = oracle_inputs(0.0, 0.0);
        inputs.lump_sum = 0.0;
        inputs.contribution = ContributionInputs::monthly(5_000.0);
        let result = project_deterministic(&inputs, &ScenarioTables::default());
        assert_eq!(result.final_value, 600_000.0);
    }

    #[test]
    fn year_by_year_values_match_closed_forms() {
        let inputs = oracle_inputs(0.06, 0.0);
        let result = project_deterministic(&inputs, &ScenarioTables::default());

        assert_eq!(result.yearly_snapshots.len(), 11);
        for snap in &result.yearly_snapshots {
            let expected = future_value_lump_sum(10_000.0, 0.06, snap.year)
                + future_value_annuity(500.0, 0.005, snap.year * 12);
            assert_approx(snap.portfolio_value, expected);
            assert_approx(snap.contributions, 10_000.0 + 500.0 * 12.0 * snap.year as f64);
            assert_approx(snap.returns, snap.portfolio_value - snap.contributions);
        }
    }

    #[test]
    fn year_zero_is_the_lump_sum() {
        let result = project_deterministic(&sample_inputs(), &ScenarioTables::default());
        let first = result.yearly_snapshots[0];
        assert_eq!(first.year, 0);
        assert_eq!(first.portfolio_value, 10_000.0);
        assert_eq!(first.contributions, 10_000.0);
        assert_eq!(first.returns, 0.0);
    }

    #[test]
    fn zero_duration_is_a_single_snapshot() {
        let mut inputs = sample_inputs();
        inputs.duration_years = 0;
        let det = project_deterministic(&inputs, &ScenarioTables::default());
        assert_eq!(det.yearly_snapshots.len(), 1);
        assert_eq!(det.final_value, 10_000.0);

        let stochastic = project_monte_carlo(&inputs, &mc(20, 1), &ScenarioTables::default())
            .expect("zero years is valid");
        assert_eq!(stochastic.percentiles.len(), 1);
        assert_eq!(stochastic.final_stats.stddev, 0.0);
    }

    #[test]
    fn fees_and_tax_drag_reduce_growth() {
        let mut inputs = oracle_inputs(0.08, 0.0);
        inputs.contribution = ContributionInputs::monthly(0.0);
        inputs.assumptions.fees = 0.01;
        inputs.assumptions.tax_drag = 0.01;
        let result = project_deterministic(&inputs, &ScenarioTables::default());
        assert_approx(result.final_value, 10_000.0 * 1.06_f64.powi(10));
    }

    #[test]
    fn shock_and_recovery_apply_before_growth() {
        let mut inputs = oracle_inputs(0.10, 0.0);
        inputs.contribution = ContributionInputs::monthly(0.0);
        inputs.duration_years = 3;
        inputs.shock = MarketShock {
            enabled: true,
            year: 2,
            magnitude_percent: -50.0,
            recovery_percent: Some(20.0),
        };
        let result = project_deterministic(&inputs, &ScenarioTables::default());
        let values: Vec<f64> = result
            .yearly_snapshots
            .iter()
            .map(|s| s.portfolio_value)
            .collect();
        assert_approx(values[1], 11_000.0);
        assert_approx(values[2], 11_000.0 * 0.5 * 1.1);
        assert_approx(values[3], 11_000.0 * 0.5 * 1.1 * 1.2 * 1.1);
    }

    #[test]
    fn glide_path_lowers_growth_in_later_years() {
        let mut inputs = sample_inputs();
        let flat = project_deterministic(&inputs, &ScenarioTables::default());

        inputs.glide_path = GlidePath {
            enabled: true,
            reduce_equity_percent_per_step: 10.0,
            every_years: 2,
            floor_percent: 20.0,
        };
        let glided = project_deterministic(&inputs, &ScenarioTables::default());

        assert_approx(glided.yearly_snapshots[1].portfolio_value, flat.yearly_snapshots[1].portfolio_value);
        assert!(glided.final_value < flat.final_value);
        assert_approx(glided.total_contributions, flat.total_contributions);
    }

    #[test]
    fn monte_carlo_trials_follow_the_glide_path() {
        let mut table = ScenarioTables::default().medium.with_volatility(0.0);
        table.domestic_equity = AssetReturn::new(0.10, 0.0);
        table.bonds = AssetReturn::new(0.02, 0.0);
        let tables = ScenarioTables::default();

        let mut inputs = sample_inputs();
        inputs.lump_sum = 10_000.0;
        inputs.contribution = ContributionInputs::monthly(0.0);
        inputs.duration_years = 6;
        inputs.allocation = AssetAllocation::new(80.0, 0.0, 20.0, 0.0, 0.0, 0.0);
        inputs.assumptions.scenario = Scenario::Custom(table);
        let plain = project_monte_carlo(&inputs, &mc(16, 3), &tables).expect("valid config");

        inputs.glide_path = GlidePath {
            enabled: true,
            reduce_equity_percent_per_step: 20.0,
            every_years: 2,
            floor_percent: 20.0,
        };
        let glided = project_monte_carlo(&inputs, &mc(16, 3), &tables).expect("valid config");
        let det = project_deterministic(&inputs, &tables);

        let mc_values: Vec<f64> = glided.percentiles.iter().map(|band| band.p50).collect();
        let det_values: Vec<f64> = det.yearly_snapshots.iter().map(|s| s.portfolio_value).collect();
        for year in 1..=6usize {
            let allocation = apply_glide_path(&inputs.allocation, &inputs.glide_path, year as u32);
            let (rate, _) = effective_rates(&allocation, &inputs.assumptions, &tables);

            // Same glide-adjusted rate each year: log growth for the trials,
            // simple growth for the deterministic lump sum.
            assert_approx_tol((mc_values[year] / mc_values[year - 1]).ln(), rate, 1e-9);
            assert_approx_tol(det_values[year] / det_values[year - 1] - 1.0, rate, 1e-9);

            let band = glided.percentiles[year];
            assert_approx(band.p10, band.p90);
        }

        assert_approx(glided.percentiles[1].p50, plain.percentiles[1].p50);
        assert!(glided.summary.final_value < plain.summary.final_value - 1.0);
    }

    #[test]
    fn monte_carlo_rejects_durations_beyond_month_index() {
        let mut inputs = sample_inputs();
        inputs.duration_years = MAX_DURATION_YEARS + 1;
        let err = project_monte_carlo(&inputs, &mc(1, 1), &ScenarioTables::default())
            .expect_err("duration overflows the month index");
        assert!(matches!(err, EngineError::DurationTooLong { .. }));
    }

    #[test]
    fn closed_forms_accept_exponents_beyond_i32() {
        let huge = u32::MAX;
        assert_eq!(future_value_lump_sum(1.0, 0.0, huge), 1.0);
        assert_eq!(future_value_annuity(1.0, 0.0, huge), f64::from(huge));
        assert!(future_value_lump_sum(1.0, 0.01, huge).is_infinite());
    }

    #[test]
    fn schedule_delay_skip_and_escalation_feed_contributions() {
        let mut inputs = oracle_inputs(0.0, 0.0);
        inputs.lump_sum = 0.0;
        inputs.duration_years = 2;
        inputs.contribution = ContributionInputs {
            amount: 100.0,
            frequency: Frequency::Monthly,
            start_delay_months: 2,
            annual_escalation_percent: 50.0,
            skip_months_per_year: 1,
            round_up: None,
        };
        let result = project_deterministic(&inputs, &ScenarioTables::default());
        // Year 1 contributes months 3..=11; year 2 months 13..=23 at 150.
        assert_approx(result.yearly_snapshots[1].contributions, 900.0);
        assert_approx(result.total_contributions, 900.0 + 11.0 * 150.0);
        assert_approx(result.final_value, result.total_contributions);
        assert_approx(result.monthly_contribution, 100.0);
    }

    #[test]
    fn goal_outcome_reports_real_value_and_target() {
        let mut inputs = oracle_inputs(0.0, 0.0);
        inputs.assumptions.inflation = 0.02;
        inputs.target_amount = Some(50_000.0);
        let result = project_deterministic(&inputs, &ScenarioTables::default());

        let nominal = 10_000.0 + 500.0 * 120.0;
        assert_approx(result.final_value, nominal);
        assert_approx(result.goal.final_value_real, nominal / 1.02_f64.powi(10));
        assert_eq!(result.goal.success_probability, Some(1.0));
        assert_approx(result.goal.required_monthly.expect("target set"), 40_000.0 / 120.0);
    }

    #[test]
    fn monte_carlo_rejects_zero_simulations() {
        let err = project_monte_carlo(&sample_inputs(), &mc(0, 1), &ScenarioTables::default())
            .expect_err("must reject zero trials");
        assert!(matches!(err, EngineError::InvalidSimulationCount(0)));
    }

    #[test]
    fn monte_carlo_zero_volatility_has_no_spread() {
        let inputs = oracle_inputs(0.07, 0.0);
        let result = project_monte_carlo(&inputs, &mc(25, 9), &ScenarioTables::default())
            .expect("valid run");
        for band in &result.percentiles {
            assert_approx_tol(band.p10, band.p50, 1e-6 * band.p50.abs().max(1.0));
            assert_approx_tol(band.p90, band.p50, 1e-6 * band.p50.abs().max(1.0));
        }
        assert_approx_tol(result.final_stats.stddev, 0.0, 1e-6);
    }

    #[test]
    fn monte_carlo_matches_deterministic_at_zero_return_and_volatility() {
        let mut inputs = oracle_inputs(0.0, 0.0);
        inputs.contribution.annual_escalation_percent = 5.0;
        inputs.contribution.start_delay_months = 7;
        let det = project_deterministic(&inputs, &ScenarioTables::default());
        let stochastic = project_monte_carlo(&inputs, &mc(16, 3), &ScenarioTables::default())
            .expect("valid run");

        for (band, snap) in stochastic.percentiles.iter().zip(&det.yearly_snapshots) {
            assert_approx(band.p10, snap.portfolio_value);
            assert_approx(band.p50, snap.portfolio_value);
            assert_approx(band.p90, snap.portfolio_value);
        }
        assert_approx(stochastic.summary.final_value, det.final_value);
    }

    #[test]
    fn monte_carlo_zero_volatility_uses_continuous_monthly_drift() {
        let mut inputs = oracle_inputs(0.12, 0.0);
        inputs.contribution = ContributionInputs::monthly(0.0);
        inputs.duration_years = 1;
        let result = project_monte_carlo(&inputs, &mc(4, 2), &ScenarioTables::default())
            .expect("valid run");
        assert_approx(result.summary.final_value, 10_000.0 * 0.12_f64.exp());
    }

    #[test]
    fn monte_carlo_is_reproducible_for_a_seed() {
        let inputs = sample_inputs();
        let a = project_monte_carlo(&inputs, &mc(300, 77), &ScenarioTables::default())
            .expect("valid run");
        let b = project_monte_carlo(&inputs, &mc(300, 77), &ScenarioTables::default())
            .expect("valid run");
        assert_eq!(a, b);

        let c = project_monte_carlo(&inputs, &mc(300, 78), &ScenarioTables::default())
            .expect("valid run");
        assert_ne!(a.final_stats.mean, c.final_stats.mean);
    }

    #[test]
    fn monte_carlo_bands_are_ordered_and_snapshots_follow_median() {
        let inputs = sample_inputs();
        let result = project_monte_carlo(&inputs, &mc(400, 11), &ScenarioTables::default())
            .expect("valid run");

        assert_eq!(result.percentiles.len(), 11);
        for (band, snap) in result.percentiles.iter().zip(&result.summary.yearly_snapshots) {
            assert!(band.p10 <= band.p50 && band.p50 <= band.p90);
            assert_eq!(snap.portfolio_value, band.p50);
        }
        let last = result.percentiles.last().expect("bands expected");
        assert!(last.p90 > last.p10);
        assert_eq!(result.final_stats.median, last.p50);
        assert_eq!(result.final_stats.p10, last.p10);
        assert_eq!(result.final_stats.p90, last.p90);
        assert!(result.final_stats.stddev > 0.0);
    }

    #[test]
    fn monte_carlo_median_tracks_lognormal_expectation() {
        let mut inputs = oracle_inputs(0.06, 0.15);
        inputs.contribution = ContributionInputs::monthly(0.0);
        let result = project_monte_carlo(&inputs, &mc(4_000, 2024), &ScenarioTables::default())
            .expect("valid run");
        // Log-normal median is exp((mu - sigma^2 / 2) * t).
        let expected_median = 10_000.0 * ((0.06 - 0.5 * 0.15 * 0.15) * 10.0_f64).exp();
        assert_approx_tol(result.final_stats.median, expected_median, expected_median * 0.05);
        let expected_mean = 10_000.0 * (0.06 * 10.0_f64).exp();
        assert_approx_tol(result.final_stats.mean, expected_mean, expected_mean * 0.05);
    }

    #[test]
    fn monte_carlo_shock_cuts_every_trial() {
        let mut inputs = oracle_inputs(0.05, 0.0);
        let baseline = project_monte_carlo(&inputs, &mc(8, 1), &ScenarioTables::default())
            .expect("valid run");
        inputs.shock = MarketShock {
            enabled: true,
            year: 4,
            magnitude_percent: -40.0,
            recovery_percent: None,
        };
        let shocked = project_monte_carlo(&inputs, &mc(8, 1), &ScenarioTables::default())
            .expect("valid run");

        for year in 0..4 {
            assert_approx(shocked.percentiles[year].p50, baseline.percentiles[year].p50);
        }
        assert!(shocked.percentiles[4].p50 < baseline.percentiles[4].p50);
        assert!(shocked.percentiles[4].p50 > 0.0);
    }

    #[test]
    fn monte_carlo_success_probability_counts_real_finals() {
        let mut inputs = sample_inputs();
        inputs.target_amount = Some(0.0);
        let all = project_monte_carlo(&inputs, &mc(50, 4), &ScenarioTables::default())
            .expect("valid run");
        assert_eq!(all.summary.goal.success_probability, Some(1.0));

        inputs.target_amount = Some(1e12);
        let none = project_monte_carlo(&inputs, &mc(50, 4), &ScenarioTables::default())
            .expect("valid run");
        assert_eq!(none.summary.goal.success_probability, Some(0.0));
    }

    #[test]
    fn monte_carlo_honours_cancellation() {
        let flag = AtomicBool::new(true);
        let err = project_monte_carlo_with_cancel(
            &sample_inputs(),
            &mc(500, 1),
            &ScenarioTables::default(),
            Some(&flag),
        )
        .expect_err("pre-set flag must cancel");
        assert!(matches!(
            err,
            EngineError::Cancelled {
                completed: 0,
                requested: 500
            }
        ));
    }

    #[test]
    fn negative_allocation_skews_results_without_error() {
        // Known laxity: invalid weights are not rejected.
        let mut inputs = sample_inputs();
        inputs.allocation = AssetAllocation::new(-50.0, 0.0, 150.0, 0.0, 0.0, 0.0);
        let result = project_monte_carlo(&inputs, &mc(50, 6), &ScenarioTables::default())
            .expect("invalid weights still simulate");
        assert!(result.summary.final_value.is_finite());
        let det = project_deterministic(&inputs, &ScenarioTables::default());
        assert!(det.final_value.is_finite());
    }

    #[test]
    fn percentile_interpolates_between_points() {
        let mut values = vec![4.0, 1.0, 3.0, 2.0];
        assert_approx(percentile(&mut values, 25.0), 1.75);
        assert_approx(percentile(&mut values, 50.0), 2.5);
        assert_approx(percentile(&mut values, 90.0), 3.7);
    }

    #[test]
    fn final_stats_use_population_stddev() {
        let mut values = vec![2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let stats = summarize(&mut values);
        assert_approx(stats.mean, 5.0);
        assert_approx(stats.stddev, 2.0);
        assert_approx(stats.median, 4.5);
    }

    #[test]
    fn simulation_result_json_round_trip_is_exact() {
        let mut inputs = sample_inputs();
        inputs.target_amount = Some(80_000.0);
        let result = project_monte_carlo(&inputs, &mc(64, 21), &ScenarioTables::default())
            .expect("valid run");
        let json = serde_json::to_string_pretty(&result).expect("result should serialize");
        let parsed: MonteCarloResult = serde_json::from_str(&json).expect("result should parse");
        assert_eq!(parsed, result);

        let det = project_deterministic(&inputs, &ScenarioTables::default());
        let json = serde_json::to_string_pretty(&det).expect("result should serialize");
        let parsed: SimulationResult = serde_json::from_str(&json).expect("result should parse");
        assert_eq!(parsed, det);
    }

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(32))]

        #[test]
        fn prop_zero_return_preserves_principal(
            lump in 0u32..500_000,
            monthly in 0u32..10_000,
            years in 0u32..40,
            delay in 0u32..30,
            skip in 0u32..4
        ) {
            let mut inputs = oracle_inputs(0.0, 0.12);
            inputs.lump_sum = lump as f64;
            inputs.duration_years = years;
            inputs.contribution = ContributionInputs {
                start_delay_months: delay,
                skip_months_per_year: skip,
                ..ContributionInputs::monthly(monthly as f64)
            };
            let result = project_deterministic(&inputs, &ScenarioTables::default());
            for snap in &result.yearly_snapshots {
                prop_assert!((snap.portfolio_value - snap.contributions).abs() <= 1e-6 * snap.contributions.max(1.0));
            }
        }

        #[test]
        fn prop_monte_carlo_outputs_are_finite_and_positive(
            seed in any::<u64>(),
            lump in 0u32..200_000,
            monthly in 0u32..5_000,
            years in 1u32..25,
            mean_bp in -300i32..1500,
            vol_bp in 0u32..4000,
            simulations in 1u32..40
        ) {
            let mut inputs = oracle_inputs(mean_bp as f64 / 10_000.0, vol_bp as f64 / 10_000.0);
            inputs.lump_sum = lump as f64;
            inputs.duration_years = years;
            inputs.contribution = ContributionInputs::monthly(monthly as f64);
            let result = project_monte_carlo(&inputs, &mc(simulations, seed), &ScenarioTables::default())
                .expect("valid run");
            for band in &result.percentiles {
                prop_assert!(band.p10.is_finite() && band.p10 >= 0.0);
                prop_assert!(band.p10 <= band.p50 + 1e-9 && band.p50 <= band.p90 + 1e-9);
            }
            prop_assert!(result.final_stats.stddev.is_finite());
        }
    }
}
