use serde::Serialize;

use super::engine::{future_value_annuity, future_value_lump_sum, project_monte_carlo};
use super::error::{EngineError, Result};
use super::returns::ScenarioTables;
use super::types::{MonteCarloConfig, ProjectionInputs};

const MILESTONES: [f64; 6] = [1_000.0, 5_000.0, 10_000.0, 25_000.0, 50_000.0, 100_000.0];
const MAX_MILESTONE_MONTHS: u32 = 600;

/// Level monthly payment that, together with `current` compounding at
/// `annual_return`, reaches `target` after `years`.
pub fn required_monthly_contribution(target: f64, current: f64, years: u32, annual_return: f64) -> f64 {
    if years == 0 {
        return 0.0;
    }

    let monthly_rate = annual_return / 12.0;
    let months = f64::from(years) * 12.0;
    let remaining = (target - future_value_lump_sum(current, annual_return, years)).max(0.0);
    if remaining <= 0.0 {
        return 0.0;
    }

    if monthly_rate == 0.0 {
        return remaining / months;
    }

    remaining * monthly_rate / ((1.0 + monthly_rate).powf(months) - 1.0)
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
pub struct Milestone {
    pub amount: f64,
    pub months: u32,
}

/// Months until each standard milestone is reached. Milestones that would
/// take 600 months or more are left out.
pub fn estimate_milestones(monthly: f64, annual_return: f64, lump_sum: f64) -> Vec<Milestone> {
    let monthly_rate = annual_return / 12.0;

    MILESTONES
        .iter()
        .filter_map(|&target| {
            if lump_sum >= target {
                return Some(Milestone {
                    amount: target,
                    months: 0,
                });
            }
            if monthly <= 0.0 {
                return None;
            }

            let months = if monthly_rate == 0.0 {
                ((target - lump_sum) / monthly).ceil() as u32
            } else {
                (1..MAX_MILESTONE_MONTHS).find(|&m| {
                    let value = lump_sum * (1.0 + monthly_rate).powi(m as i32)
                        + future_value_annuity(monthly, monthly_rate, m);
                    value >= target
                })?
            };

            (months < MAX_MILESTONE_MONTHS).then_some(Milestone {
                amount: target,
                months,
            })
        })
        .collect()
}

#[derive(Debug, Clone, Copy)]
pub struct ContributionSolveConfig {
    pub target_success_rate: f64,
    pub search_min: f64,
    pub search_max: f64,
    pub tolerance: f64,
    pub max_iterations: u32,
    pub simulation: MonteCarloConfig,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContributionSolveIteration {
    pub iteration: u32,
    pub lower_bound: f64,
    pub upper_bound: f64,
    pub candidate_amount: f64,
    pub success_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContributionSolveResult {
    pub solved_amount: Option<f64>,
    pub achieved_success_rate: Option<f64>,
    pub iterations: Vec<ContributionSolveIteration>,
    pub converged: bool,
    pub feasible: bool,
    pub message: String,
}

/// Bisects the periodic contribution amount until the Monte Carlo
/// probability of reaching the target meets `target_success_rate`.
pub fn solve_required_contribution(
    inputs: &ProjectionInputs,
    config: ContributionSolveConfig,
    tables: &ScenarioTables,
) -> Result<ContributionSolveResult> {
    if inputs.target_amount.is_none() {
        return Err(EngineError::MissingTarget);
    }
    let valid_bounds = config.search_min <= config.search_max;
    let valid_tolerance = config.tolerance > 0.0;
    if !valid_bounds || !valid_tolerance {
        return Err(EngineError::InvalidSearch {
            min: config.search_min,
            max: config.search_max,
            tolerance: config.tolerance,
        });
    }

    let evaluate = |amount: f64| -> Result<f64> {
        let mut candidate = inputs.clone();
        candidate.contribution.amount = amount;
        let result = project_monte_carlo(&candidate, &config.simulation, tables)?;
        Ok(result.summary.goal.success_probability.unwrap_or(0.0))
    };

    let meets = |rate: f64| rate + 1e-12 >= config.target_success_rate;

    let low_rate = evaluate(config.search_min)?;
    if meets(low_rate) {
        return Ok(ContributionSolveResult {
            solved_amount: Some(config.search_min),
            achieved_success_rate: Some(low_rate),
            iterations: Vec::new(),
            converged: true,
            feasible: true,
            message: "Already meets target at lower contribution bound.".to_string(),
        });
    }

    let high_rate = evaluate(config.search_max)?;
    if !meets(high_rate) {
        return Ok(ContributionSolveResult {
            solved_amount: None,
            achieved_success_rate: None,
            iterations: Vec::new(),
            converged: false,
            feasible: false,
            message: "No feasible contribution found within the search bounds.".to_string(),
        });
    }

    let mut iterations = Vec::with_capacity(config.max_iterations as usize);
    let mut lo = config.search_min;
    let mut hi = config.search_max;
    let mut hi_rate = high_rate;
    let mut converged = false;

    for it in 1..=config.max_iterations {
        let mid = (lo + hi) * 0.5;
        let rate = evaluate(mid)?;
        iterations.push(ContributionSolveIteration {
            iteration: it,
            lower_bound: lo,
            upper_bound: hi,
            candidate_amount: mid,
            success_rate: rate,
        });

        if meets(rate) {
            hi = mid;
            hi_rate = rate;
        } else {
            lo = mid;
        }

        if (hi - lo).abs() <= config.tolerance {
            converged = true;
            break;
        }
    }

    let message = if converged {
        "Solved required contribution.".to_string()
    } else {
        "Reached max iterations before tolerance was met; returning best estimate.".to_string()
    };

    Ok(ContributionSolveResult {
        solved_amount: Some(hi),
        achieved_success_rate: Some(hi_rate),
        iterations,
        converged,
        feasible: true,
        message,
    })
}
